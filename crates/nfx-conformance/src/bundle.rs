#![forbid(unsafe_code)]

use crate::FixtureError;
use nfx_op::OperationDeclaration;
use nfx_tensor::{ElementType, TensorDescriptor};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Flat row-major literals keyed by operand name.
pub type TensorValues = BTreeMap<String, Vec<f64>>;

/// Outputs produced by a backend for one bundle.
pub type ActualOutputs = TensorValues;

/// One literal input/expected-output pair for a declared operation.
#[derive(Debug, Clone, PartialEq)]
pub struct ExampleBundle {
    declaration: Arc<OperationDeclaration>,
    inputs: TensorValues,
    expected: TensorValues,
}

impl ExampleBundle {
    pub fn new(
        declaration: Arc<OperationDeclaration>,
        inputs: Vec<(String, Vec<f64>)>,
        expected: Vec<(String, Vec<f64>)>,
    ) -> Result<Self, FixtureError> {
        let mut input_map = TensorValues::new();
        for (name, values) in inputs {
            let Some(operand) = declaration.input(&name) else {
                return Err(binding(&name, "not an input of the operation"));
            };
            let Some(tensor) = operand.as_tensor() else {
                return Err(binding(
                    &name,
                    "scalar operands carry their value in the declaration",
                ));
            };
            let values = check_literals(tensor, &values)?;
            if input_map.insert(name.clone(), values).is_some() {
                return Err(binding(&name, "bound more than once"));
            }
        }
        if let Some(missing) = declaration
            .tensor_inputs()
            .find(|t| !input_map.contains_key(t.name()))
        {
            return Err(binding(missing.name(), "input has no literal values"));
        }

        let mut expected_map = TensorValues::new();
        for (name, values) in expected {
            let Some(tensor) = declaration.output(&name) else {
                return Err(binding(&name, "not an output of the operation"));
            };
            let values = check_literals(tensor, &values)?;
            if expected_map.insert(name.clone(), values).is_some() {
                return Err(binding(&name, "bound more than once"));
            }
        }
        if let Some(missing) = declaration
            .outputs()
            .iter()
            .find(|t| !expected_map.contains_key(t.name()))
        {
            return Err(binding(missing.name(), "output has no expected values"));
        }

        Ok(Self {
            declaration,
            inputs: input_map,
            expected: expected_map,
        })
    }

    #[must_use]
    pub fn declaration(&self) -> &OperationDeclaration {
        &self.declaration
    }

    #[must_use]
    pub fn inputs(&self) -> &TensorValues {
        &self.inputs
    }

    #[must_use]
    pub fn input(&self, name: &str) -> Option<&[f64]> {
        self.inputs.get(name).map(Vec::as_slice)
    }

    #[must_use]
    pub fn expected(&self, name: &str) -> Option<&[f64]> {
        self.expected.get(name).map(Vec::as_slice)
    }
}

fn binding(operand: &str, detail: &str) -> FixtureError {
    FixtureError::Binding {
        operand: operand.to_string(),
        detail: detail.to_string(),
    }
}

/// Validates literals for `tensor` and rounds them to its storage type.
fn check_literals(tensor: &TensorDescriptor, values: &[f64]) -> Result<Vec<f64>, FixtureError> {
    if values.len() != tensor.element_count() {
        return Err(FixtureError::LengthMismatch {
            tensor: tensor.name().to_string(),
            expected: tensor.element_count(),
            actual: values.len(),
        });
    }
    let ty = tensor.element_type();
    if let Some((idx, value)) = values
        .iter()
        .enumerate()
        .find(|(_, v)| !ty.accepts_literal(**v))
    {
        return Err(FixtureError::Binding {
            operand: tensor.name().to_string(),
            detail: format!("literal {value} at index {idx} is not representable as {ty}"),
        });
    }
    Ok(values.iter().map(|&v| ty.to_storage(v)).collect())
}

/// Comparison tolerance. Integer and boolean outputs always compare exactly.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Tolerance {
    pub float_epsilon: f64,
}

impl Tolerance {
    #[must_use]
    pub const fn exact() -> Self {
        Self { float_epsilon: 0.0 }
    }

    #[must_use]
    pub const fn float(epsilon: f64) -> Self {
        Self {
            float_epsilon: epsilon,
        }
    }

    #[must_use]
    pub fn for_type(self, ty: ElementType) -> f64 {
        if ty.is_float() {
            self.float_epsilon.abs()
        } else {
            0.0
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValueMismatch {
    pub index: usize,
    pub expected: f64,
    pub actual: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OutputVerification {
    pub tensor: String,
    pub expected_len: usize,
    /// `None` when the backend produced nothing for this output.
    pub actual_len: Option<usize>,
    pub tolerance: f64,
    pub max_abs_error: f64,
    pub mismatches: Vec<ValueMismatch>,
}

impl OutputVerification {
    #[must_use]
    pub fn length_matches(&self) -> bool {
        self.actual_len == Some(self.expected_len)
    }

    #[must_use]
    pub fn passed(&self) -> bool {
        self.length_matches() && self.mismatches.is_empty()
    }
}

/// Report of one `verify` call, listing every mismatch found.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VerificationResult {
    pub outputs: Vec<OutputVerification>,
    pub unexpected_outputs: Vec<String>,
}

impl VerificationResult {
    #[must_use]
    pub fn passed(&self) -> bool {
        self.unexpected_outputs.is_empty() && self.outputs.iter().all(OutputVerification::passed)
    }

    #[must_use]
    pub fn mismatch_count(&self) -> usize {
        self.outputs
            .iter()
            .map(|out| {
                if out.length_matches() {
                    out.mismatches.len()
                } else {
                    1
                }
            })
            .sum::<usize>()
            + self.unexpected_outputs.len()
    }

    /// First failure in declaration order, as a typed error.
    #[must_use]
    pub fn first_error(&self) -> Option<FixtureError> {
        for out in &self.outputs {
            if !out.length_matches() {
                return Some(FixtureError::LengthMismatch {
                    tensor: out.tensor.clone(),
                    expected: out.expected_len,
                    actual: out.actual_len.unwrap_or(0),
                });
            }
            if let Some(first) = out.mismatches.first() {
                return Some(FixtureError::ValueMismatch {
                    tensor: out.tensor.clone(),
                    index: first.index,
                    expected: first.expected,
                    actual: first.actual,
                });
            }
        }
        self.unexpected_outputs
            .first()
            .map(|tensor| FixtureError::UnexpectedOutput {
                tensor: tensor.clone(),
            })
    }

    pub fn into_result(self) -> Result<(), FixtureError> {
        match self.first_error() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    #[must_use]
    pub fn reason_code(&self) -> &'static str {
        self.first_error()
            .map_or("verified", |err| err.reason_code())
    }
}

fn values_match(expected: f64, actual: f64, tolerance: f64) -> bool {
    if expected.is_nan() || actual.is_nan() {
        return expected.is_nan() && actual.is_nan();
    }
    // equal infinities would otherwise produce a NaN difference
    expected == actual || (expected - actual).abs() <= tolerance
}

fn verify_output(
    tensor: &TensorDescriptor,
    expected: &[f64],
    actual: Option<&[f64]>,
    tolerance: Tolerance,
) -> OutputVerification {
    let ty = tensor.element_type();
    let tol = tolerance.for_type(ty);
    let mut report = OutputVerification {
        tensor: tensor.name().to_string(),
        expected_len: expected.len(),
        actual_len: actual.map(<[f64]>::len),
        tolerance: tol,
        max_abs_error: 0.0,
        mismatches: Vec::new(),
    };

    let Some(actual) = actual.filter(|a| a.len() == expected.len()) else {
        report.max_abs_error = f64::INFINITY;
        return report;
    };

    // Expected literals were rounded to the storage type at load.
    let actual: Vec<f64> = actual.iter().map(|&v| ty.to_storage(v)).collect();
    for (index, (&want, &got)) in expected.iter().zip(&actual).enumerate() {
        if values_match(want, got, tol) {
            continue;
        }
        let abs_err = (want - got).abs();
        report.max_abs_error = if abs_err.is_nan() {
            f64::INFINITY
        } else {
            report.max_abs_error.max(abs_err)
        };
        report.mismatches.push(ValueMismatch {
            index,
            expected: want,
            actual: got,
        });
    }
    if report.mismatches.is_empty() {
        report.max_abs_error = expected
            .iter()
            .zip(&actual)
            .map(|(want, got)| (want - got).abs())
            .filter(|err| err.is_finite())
            .fold(0.0, f64::max);
    }
    report
}

/// Compares backend outputs with the bundle's expected literals.
///
/// Pure: repeated calls with the same arguments give the same result and the
/// bundle is never modified.
#[must_use]
pub fn verify(
    bundle: &ExampleBundle,
    actual_outputs: &ActualOutputs,
    tolerance: Tolerance,
) -> VerificationResult {
    let declaration = bundle.declaration();
    let outputs = declaration
        .outputs()
        .iter()
        .map(|tensor| {
            let expected = bundle.expected(tensor.name()).unwrap_or_default();
            let actual = actual_outputs.get(tensor.name()).map(Vec::as_slice);
            verify_output(tensor, expected, actual, tolerance)
        })
        .collect();
    let unexpected_outputs = actual_outputs
        .keys()
        .filter(|name| declaration.output(name).is_none())
        .cloned()
        .collect();

    VerificationResult {
        outputs,
        unexpected_outputs,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BundleState {
    Unverified,
    Verified { passed: bool },
}

/// Per-bundle verification state for one harness run.
#[derive(Debug, Default, Clone)]
pub struct VerificationLedger {
    states: Vec<BundleState>,
}

impl VerificationLedger {
    #[must_use]
    pub fn new(bundle_count: usize) -> Self {
        Self {
            states: vec![BundleState::Unverified; bundle_count],
        }
    }

    /// Records the latest outcome for `bundle_index`; later calls replace earlier ones.
    pub fn record(&mut self, bundle_index: usize, result: &VerificationResult) {
        if bundle_index >= self.states.len() {
            self.states
                .resize(bundle_index + 1, BundleState::Unverified);
        }
        self.states[bundle_index] = BundleState::Verified {
            passed: result.passed(),
        };
    }

    #[must_use]
    pub fn state(&self, bundle_index: usize) -> BundleState {
        self.states
            .get(bundle_index)
            .copied()
            .unwrap_or(BundleState::Unverified)
    }

    #[must_use]
    pub fn all_verified(&self) -> bool {
        self.states
            .iter()
            .all(|state| matches!(state, BundleState::Verified { .. }))
    }

    #[must_use]
    pub fn passed_count(&self) -> usize {
        self.states
            .iter()
            .filter(|state| matches!(state, BundleState::Verified { passed: true }))
            .count()
    }
}
