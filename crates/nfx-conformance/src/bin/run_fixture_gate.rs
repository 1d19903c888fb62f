#![forbid(unsafe_code)]

use nfx_conformance::{
    Backend, HarnessConfig, ReferenceBackend, parse_epsilon, run_all_suites,
    set_verification_log_path, suite_report_json, write_suite_report,
};
use std::path::PathBuf;

#[derive(Debug, Default)]
struct GateOptions {
    fixture_root: Option<PathBuf>,
    float_epsilon: Option<f64>,
    log_path: Option<PathBuf>,
    report_path: Option<PathBuf>,
    lenient: bool,
}

fn main() {
    if let Err(err) = run() {
        eprintln!("run_fixture_gate failed: {err}");
        std::process::exit(1);
    }
}

fn run() -> Result<(), String> {
    let options = parse_args()?;
    let mut cfg = HarnessConfig::from_env()?;
    if let Some(root) = options.fixture_root {
        cfg.fixture_root = root;
    }
    if let Some(epsilon) = options.float_epsilon {
        cfg.float_epsilon = epsilon;
    }
    if options.lenient {
        cfg.strict_mode = false;
    }
    if let Some(log_path) = options.log_path {
        set_verification_log_path(Some(log_path));
    }

    let backend = ReferenceBackend;
    let suites = run_all_suites(&cfg, &backend)?;
    let all_passed = suites.iter().all(|suite| suite.all_passed());

    if let Some(report_path) = &options.report_path {
        write_suite_report(report_path, &suites)?;
    }
    println!("{}", suite_report_json(&suites)?);
    eprintln!(
        "run_fixture_gate: backend={} fixture_root={} epsilon={} status={}",
        backend.name(),
        cfg.fixture_root.display(),
        cfg.float_epsilon,
        if all_passed { "pass" } else { "fail" }
    );

    if !all_passed {
        std::process::exit(2);
    }
    Ok(())
}

fn parse_args() -> Result<GateOptions, String> {
    let mut options = GateOptions::default();
    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--fixture-root" => {
                let value = args
                    .next()
                    .ok_or_else(|| "--fixture-root requires a value".to_string())?;
                options.fixture_root = Some(PathBuf::from(value));
            }
            "--epsilon" => {
                let value = args
                    .next()
                    .ok_or_else(|| "--epsilon requires a value".to_string())?;
                options.float_epsilon = Some(parse_epsilon(&value)?);
            }
            "--log-path" => {
                let value = args
                    .next()
                    .ok_or_else(|| "--log-path requires a value".to_string())?;
                options.log_path = Some(PathBuf::from(value));
            }
            "--report" => {
                let value = args
                    .next()
                    .ok_or_else(|| "--report requires a value".to_string())?;
                options.report_path = Some(PathBuf::from(value));
            }
            "--lenient" => options.lenient = true,
            "--help" | "-h" => {
                println!(
                    "Usage: cargo run -p nfx-conformance --bin run_fixture_gate -- [--fixture-root <dir>] [--epsilon <abs>] [--log-path <path>] [--report <path>] [--lenient]"
                );
                std::process::exit(0);
            }
            unknown => {
                return Err(format!("unknown argument: {unknown}"));
            }
        }
    }
    Ok(options)
}
