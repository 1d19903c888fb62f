#![forbid(unsafe_code)]

pub mod backend;
pub mod bundle;
pub mod loader;

pub use backend::{Backend, ReferenceBackend};
pub use bundle::{
    ActualOutputs, BundleState, ExampleBundle, OutputVerification, TensorValues, Tolerance,
    ValueMismatch, VerificationLedger, VerificationResult, verify,
};
pub use loader::{LoadedModel, load_model, load_model_file};

use nfx_op::OpError;
use nfx_tensor::TensorError;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::ffi::OsString;
use std::fmt::Write as _;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, OnceLock};

#[derive(Debug, Clone, PartialEq)]
pub enum FixtureError {
    Parse {
        line: usize,
        detail: String,
    },
    Io {
        path: String,
        detail: String,
    },
    Tensor(TensorError),
    Op(OpError),
    Binding {
        operand: String,
        detail: String,
    },
    LengthMismatch {
        tensor: String,
        expected: usize,
        actual: usize,
    },
    ValueMismatch {
        tensor: String,
        index: usize,
        expected: f64,
        actual: f64,
    },
    UnexpectedOutput {
        tensor: String,
    },
}

impl std::fmt::Display for FixtureError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Parse { line, detail } => write!(f, "fixture line {line}: {detail}"),
            Self::Io { path, detail } => write!(f, "failed reading {path}: {detail}"),
            Self::Tensor(err) => write!(f, "{err}"),
            Self::Op(err) => write!(f, "{err}"),
            Self::Binding { operand, detail } => {
                write!(f, "example literal for '{operand}': {detail}")
            }
            Self::LengthMismatch {
                tensor,
                expected,
                actual,
            } => write!(
                f,
                "'{tensor}' holds {actual} values, expected {expected}"
            ),
            Self::ValueMismatch {
                tensor,
                index,
                expected,
                actual,
            } => write!(
                f,
                "'{tensor}'[{index}] is {actual}, expected {expected}"
            ),
            Self::UnexpectedOutput { tensor } => {
                write!(f, "backend produced undeclared output '{tensor}'")
            }
        }
    }
}

impl std::error::Error for FixtureError {}

impl From<TensorError> for FixtureError {
    fn from(value: TensorError) -> Self {
        Self::Tensor(value)
    }
}

impl From<OpError> for FixtureError {
    fn from(value: OpError) -> Self {
        Self::Op(value)
    }
}

impl FixtureError {
    #[must_use]
    pub fn reason_code(&self) -> &'static str {
        match self {
            Self::Parse { .. } => "fixture_parse_error",
            Self::Io { .. } => "fixture_io_error",
            Self::Tensor(err) => err.reason_code(),
            Self::Op(err) => err.reason_code(),
            Self::Binding { .. } => "bundle_binding_invalid",
            Self::LengthMismatch { .. } => "length_mismatch",
            Self::ValueMismatch { .. } => "value_mismatch",
            Self::UnexpectedOutput { .. } => "unexpected_output",
        }
    }
}

pub(crate) fn sha256_hex(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    let mut out = String::with_capacity(digest.len() * 2);
    for byte in digest {
        let _ = write!(&mut out, "{byte:02x}");
    }
    out
}

#[derive(Debug, Clone)]
pub struct HarnessConfig {
    pub fixture_root: PathBuf,
    /// Absolute tolerance for float outputs; integer outputs ignore it.
    pub float_epsilon: f64,
    /// Rejection cases must also match their expected error text.
    pub strict_mode: bool,
}

impl HarnessConfig {
    #[must_use]
    pub fn default_paths() -> Self {
        Self {
            fixture_root: PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("fixtures"),
            float_epsilon: 0.0,
            strict_mode: true,
        }
    }

    /// `default_paths()` with `NFX_FIXTURE_ROOT` and `NFX_FLOAT_EPSILON` applied.
    pub fn from_env() -> Result<Self, String> {
        Self::default_paths().with_overrides(
            std::env::var_os("NFX_FIXTURE_ROOT"),
            std::env::var("NFX_FLOAT_EPSILON").ok(),
        )
    }

    pub fn with_overrides(
        mut self,
        fixture_root: Option<OsString>,
        float_epsilon: Option<String>,
    ) -> Result<Self, String> {
        if let Some(root) = fixture_root.filter(|root| !root.is_empty()) {
            self.fixture_root = PathBuf::from(root);
        }
        if let Some(raw) = float_epsilon {
            self.float_epsilon = parse_epsilon(&raw)?;
        }
        Ok(self)
    }

    #[must_use]
    pub fn tolerance(&self) -> Tolerance {
        Tolerance::float(self.float_epsilon)
    }

    fn mode(&self) -> &'static str {
        if self.strict_mode { "strict" } else { "lenient" }
    }
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self::default_paths()
    }
}

pub fn parse_epsilon(raw: &str) -> Result<f64, String> {
    let value = raw
        .trim()
        .parse::<f64>()
        .map_err(|err| format!("invalid float epsilon '{raw}': {err}"))?;
    if !value.is_finite() || value < 0.0 {
        return Err(format!(
            "float epsilon must be a finite non-negative number, got {value}"
        ));
    }
    Ok(value)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HarnessReport {
    pub suite: &'static str,
    pub fixture_count: usize,
    pub rejection_cases_present: bool,
    pub strict_mode: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SuiteReport {
    pub suite: &'static str,
    pub case_count: usize,
    pub pass_count: usize,
    pub failures: Vec<String>,
}

impl SuiteReport {
    fn empty(suite: &'static str) -> Self {
        Self {
            suite,
            case_count: 0,
            pass_count: 0,
            failures: Vec::new(),
        }
    }

    #[must_use]
    pub fn all_passed(&self) -> bool {
        self.case_count == self.pass_count && self.failures.is_empty()
    }
}

/// Harness step at which a rejection case must fail.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
enum FailureStage {
    /// Parsing, declaration or literal binding.
    #[default]
    Load,
    /// Backend execution or output verification of a fixture that loads.
    Run,
}

impl FailureStage {
    const fn name(self) -> &'static str {
        match self {
            Self::Load => "load",
            Self::Run => "run",
        }
    }
}

#[derive(Debug, Deserialize)]
struct RejectionCase {
    id: String,
    source: String,
    #[serde(default)]
    stage: FailureStage,
    expected_reason_code: String,
    #[serde(default)]
    expected_error_contains: Option<String>,
}

#[derive(Debug)]
struct StageFailure {
    stage: FailureStage,
    reason_code: &'static str,
    message: String,
}

impl StageFailure {
    fn new(stage: FailureStage, reason_code: &'static str, message: String) -> Self {
        Self {
            stage,
            reason_code,
            message,
        }
    }
}

#[derive(Debug, Serialize)]
struct VerificationLogEntry<'a> {
    suite: &'static str,
    fixture_id: &'a str,
    bundle_index: Option<usize>,
    backend: &'a str,
    mode: &'static str,
    reason_code: &'a str,
    fixture_sha256: &'a str,
    mismatch_count: usize,
    passed: bool,
}

#[derive(Debug, Serialize)]
struct SuiteReportArtifact<'a> {
    status: &'static str,
    total_cases: usize,
    passed_cases: usize,
    suites: &'a [SuiteReport],
}

static VERIFICATION_LOG_PATH: OnceLock<Mutex<Option<PathBuf>>> = OnceLock::new();

const FIXTURE_SUFFIX: &str = ".mod.py";
const REJECTION_CASES_FILE: &str = "rejection_cases.json";

pub fn set_verification_log_path(path: Option<PathBuf>) {
    let cell = VERIFICATION_LOG_PATH.get_or_init(|| Mutex::new(None));
    if let Ok(mut slot) = cell.lock() {
        *slot = path;
    }
}

#[must_use]
pub fn run_smoke(config: &HarnessConfig) -> HarnessReport {
    let fixture_count = list_fixture_files(&config.fixture_root)
        .map(|files| files.len())
        .unwrap_or(0);

    HarnessReport {
        suite: "smoke",
        fixture_count,
        rejection_cases_present: config.fixture_root.join(REJECTION_CASES_FILE).exists(),
        strict_mode: config.strict_mode,
    }
}

fn list_fixture_files(fixture_root: &Path) -> Result<Vec<PathBuf>, String> {
    let entries = fs::read_dir(fixture_root)
        .map_err(|err| format!("failed reading {}: {err}", fixture_root.display()))?;
    let mut files = entries
        .filter_map(Result::ok)
        .map(|entry| entry.path())
        .filter(|path| {
            path.is_file()
                && path
                    .file_name()
                    .and_then(|name| name.to_str())
                    .is_some_and(|name| name.ends_with(FIXTURE_SUFFIX))
        })
        .collect::<Vec<_>>();
    files.sort();
    Ok(files)
}

fn fixture_id(path: &Path) -> String {
    let name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    name.strip_suffix(FIXTURE_SUFFIX)
        .map_or_else(|| name.clone(), str::to_string)
}

/// Loads every `*.mod.py` fixture, runs each bundle through `backend` and
/// verifies the produced outputs. One JSONL log entry is appended per bundle.
pub fn run_fixture_suite(
    config: &HarnessConfig,
    backend: &dyn Backend,
) -> Result<SuiteReport, String> {
    let files = list_fixture_files(&config.fixture_root)?;
    let tolerance = config.tolerance();
    let mut report = SuiteReport::empty("fixture_verification");

    for path in files {
        let id = fixture_id(&path);
        let model = match load_model_file(&path) {
            Ok(model) => model,
            Err(err) => {
                report.case_count += 1;
                report
                    .failures
                    .push(format!("{id}: load failed [{}]: {err}", err.reason_code()));
                maybe_append_verification_log(&VerificationLogEntry {
                    suite: report.suite,
                    fixture_id: &id,
                    bundle_index: None,
                    backend: backend.name(),
                    mode: config.mode(),
                    reason_code: err.reason_code(),
                    fixture_sha256: "",
                    mismatch_count: 0,
                    passed: false,
                })?;
                continue;
            }
        };

        let mut ledger = VerificationLedger::new(model.bundles.len());
        for (bundle_index, bundle) in model.bundles.iter().enumerate() {
            report.case_count += 1;
            let (reason_code, mismatch_count, passed) =
                match backend.execute(bundle.declaration(), bundle.inputs()) {
                    Ok(actual) => {
                        let result = verify(bundle, &actual, tolerance);
                        ledger.record(bundle_index, &result);
                        if let Some(err) = result.first_error() {
                            report.failures.push(format!(
                                "{id}: example {bundle_index} [{}]: {err} ({} mismatches)",
                                err.reason_code(),
                                result.mismatch_count()
                            ));
                        }
                        (result.reason_code(), result.mismatch_count(), result.passed())
                    }
                    Err(err) => {
                        report.failures.push(format!(
                            "{id}: example {bundle_index} [backend_error]: {} failed: {err}",
                            backend.name()
                        ));
                        ("backend_error", 0, false)
                    }
                };

            maybe_append_verification_log(&VerificationLogEntry {
                suite: report.suite,
                fixture_id: &id,
                bundle_index: Some(bundle_index),
                backend: backend.name(),
                mode: config.mode(),
                reason_code,
                fixture_sha256: &model.sha256,
                mismatch_count,
                passed,
            })?;
        }
        report.pass_count += ledger.passed_count();
    }

    Ok(report)
}

fn load_rejection_cases(fixture_root: &Path) -> Result<Vec<RejectionCase>, String> {
    let path = fixture_root.join(REJECTION_CASES_FILE);
    let raw = fs::read_to_string(&path)
        .map_err(|err| format!("failed reading {}: {err}", path.display()))?;
    serde_json::from_str(&raw).map_err(|err| format!("invalid json: {err}"))
}

/// Drives a rejection case as far as its fixture allows and returns the
/// first failure, or a description of how far it got.
fn drive_rejection_case(
    case: &RejectionCase,
    backend: &dyn Backend,
    tolerance: Tolerance,
) -> Result<String, StageFailure> {
    let model = load_model(&case.source).map_err(|err| {
        StageFailure::new(FailureStage::Load, err.reason_code(), err.to_string())
    })?;
    if case.stage == FailureStage::Load {
        return Ok(format!("fixture loaded with {} examples", model.bundles.len()));
    }

    for (bundle_index, bundle) in model.bundles.iter().enumerate() {
        let actual = backend
            .execute(bundle.declaration(), bundle.inputs())
            .map_err(|err| {
                StageFailure::new(
                    FailureStage::Run,
                    "backend_error",
                    format!("example {bundle_index}: {} failed: {err}", backend.name()),
                )
            })?;
        if let Some(err) = verify(bundle, &actual, tolerance).first_error() {
            return Err(StageFailure::new(
                FailureStage::Run,
                err.reason_code(),
                format!("example {bundle_index}: {err}"),
            ));
        }
    }
    Ok(format!(
        "{} examples ran and verified on {}",
        model.bundles.len(),
        backend.name()
    ))
}

/// Checks that each case in `rejection_cases.json` fails at its declared
/// stage with its declared reason code. `load` cases must fail while
/// loading; `run` cases must load, then fail on `backend` or in verification.
pub fn run_rejection_suite(
    config: &HarnessConfig,
    backend: &dyn Backend,
) -> Result<SuiteReport, String> {
    let cases = load_rejection_cases(&config.fixture_root)?;
    let tolerance = config.tolerance();
    let mut report = SuiteReport::empty("fixture_rejection");
    report.case_count = cases.len();

    for case in cases {
        let fixture_sha256 = sha256_hex(case.source.as_bytes());
        let (reason_code, passed) = match drive_rejection_case(&case, backend, tolerance) {
            Ok(progress) => {
                report.failures.push(format!(
                    "{}: {progress}, expected {} failure with {}",
                    case.id,
                    case.stage.name(),
                    case.expected_reason_code
                ));
                let outcome = match case.stage {
                    FailureStage::Load => "loaded",
                    FailureStage::Run => "verified",
                };
                (outcome, false)
            }
            Err(failure) => {
                let StageFailure {
                    stage,
                    reason_code: code,
                    message,
                } = failure;
                let mut ok = stage == case.stage;
                if !ok {
                    report.failures.push(format!(
                        "{}: failed at {} stage, expected {} [{code}]: {message}",
                        case.id,
                        stage.name(),
                        case.stage.name()
                    ));
                }
                if code != case.expected_reason_code {
                    ok = false;
                    report.failures.push(format!(
                        "{}: expected reason_code {}, got {code}: {message}",
                        case.id, case.expected_reason_code
                    ));
                }
                let missing_text = case
                    .expected_error_contains
                    .as_deref()
                    .filter(|needle| config.strict_mode && !message.contains(needle));
                if let Some(needle) = missing_text {
                    ok = false;
                    report.failures.push(format!(
                        "{}: error '{message}' does not contain '{needle}'",
                        case.id
                    ));
                }
                (code, ok)
            }
        };
        if passed {
            report.pass_count += 1;
        }

        maybe_append_verification_log(&VerificationLogEntry {
            suite: report.suite,
            fixture_id: &case.id,
            bundle_index: None,
            backend: match case.stage {
                FailureStage::Load => "loader",
                FailureStage::Run => backend.name(),
            },
            mode: config.mode(),
            reason_code,
            fixture_sha256: &fixture_sha256,
            mismatch_count: 0,
            passed,
        })?;
    }

    Ok(report)
}

pub fn run_all_suites(
    config: &HarnessConfig,
    backend: &dyn Backend,
) -> Result<Vec<SuiteReport>, String> {
    Ok(vec![
        run_fixture_suite(config, backend)?,
        run_rejection_suite(config, backend)?,
    ])
}

pub fn suite_report_json(reports: &[SuiteReport]) -> Result<String, String> {
    let total_cases = reports.iter().map(|r| r.case_count).sum();
    let passed_cases = reports.iter().map(|r| r.pass_count).sum();
    let status = if reports.iter().all(SuiteReport::all_passed) {
        "pass"
    } else {
        "fail"
    };
    serde_json::to_string_pretty(&SuiteReportArtifact {
        status,
        total_cases,
        passed_cases,
        suites: reports,
    })
    .map_err(|err| format!("failed serializing suite report: {err}"))
}

pub fn write_suite_report(path: &Path, reports: &[SuiteReport]) -> Result<(), String> {
    let payload = suite_report_json(reports)?;
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .map_err(|err| format!("failed creating {}: {err}", parent.display()))?;
    }
    fs::write(path, payload.as_bytes())
        .map_err(|err| format!("failed writing report {}: {err}", path.display()))
}

fn maybe_append_verification_log(entry: &VerificationLogEntry<'_>) -> Result<(), String> {
    let configured = VERIFICATION_LOG_PATH
        .get()
        .and_then(|cell| cell.lock().ok())
        .and_then(|slot| slot.clone());
    let from_env = std::env::var_os("NFX_VERIFICATION_LOG_PATH").map(PathBuf::from);
    let Some(path) = configured.or(from_env) else {
        return Ok(());
    };

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .map_err(|err| format!("failed creating {}: {err}", parent.display()))?;
    }

    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .map_err(|err| format!("failed opening {}: {err}", path.display()))?;
    let line = serde_json::to_string(entry)
        .map_err(|err| format!("failed serializing verification log entry: {err}"))?;
    let mut payload = line.into_bytes();
    payload.push(b'\n');
    file.write_all(&payload).map_err(|err| {
        format!(
            "failed appending verification log {}: {err}",
            path.display()
        )
    })
}
