#![forbid(unsafe_code)]

use crate::bundle::{ActualOutputs, TensorValues};
use nfx_op::{OpKind, OperationDeclaration, normalize_axis, split_row_major};

/// Executes a declared operation on literal inputs.
///
/// The verification core never calls a backend itself; the suite runner does,
/// then hands the produced outputs to [`crate::verify`].
pub trait Backend: Send + Sync {
    fn name(&self) -> &'static str;

    fn execute(
        &self,
        declaration: &OperationDeclaration,
        inputs: &TensorValues,
    ) -> Result<ActualOutputs, String>;
}

/// In-process executor built on the reference layout functions of `nfx-op`.
#[derive(Debug, Default, Clone, Copy)]
pub struct ReferenceBackend;

impl Backend for ReferenceBackend {
    fn name(&self) -> &'static str {
        "reference"
    }

    fn execute(
        &self,
        declaration: &OperationDeclaration,
        inputs: &TensorValues,
    ) -> Result<ActualOutputs, String> {
        match declaration.kind() {
            OpKind::Split => execute_split(declaration, inputs),
        }
    }
}

fn execute_split(
    declaration: &OperationDeclaration,
    inputs: &TensorValues,
) -> Result<ActualOutputs, String> {
    let input = declaration
        .tensor_inputs()
        .next()
        .ok_or_else(|| "split declaration has no tensor input".to_string())?;
    let values = inputs
        .get(input.name())
        .ok_or_else(|| format!("no values for input '{}'", input.name()))?;
    let axis = declaration
        .scalar_input(1)
        .and_then(|s| s.value().as_i32())
        .ok_or_else(|| "split declaration has no INT32 axis".to_string())?;
    let axis = normalize_axis(i64::from(axis), input.rank())
        .map_err(|err| format!("split axis error: {err}"))?;

    let outputs = declaration.outputs();
    let parts = split_row_major(values, input.shape(), axis, outputs.len())
        .map_err(|err| format!("split layout error: {err}"))?;

    Ok(outputs
        .iter()
        .map(|t| t.name().to_string())
        .zip(parts)
        .collect())
}

#[cfg(test)]
mod tests {
    use super::{Backend, ReferenceBackend};
    use crate::bundle::TensorValues;
    use crate::loader::load_model;

    const SPLIT_2D: &str = r#"
model = Model()
i1 = Input("in", "TENSOR_INT32", "{3, 4}")
axis = Int32Scalar("axis", -2)
n = Int32Scalar("n", 3)
o1 = Output("a", "TENSOR_INT32", "{1, 4}")
o2 = Output("b", "TENSOR_INT32", "{1, 4}")
o3 = Output("c", "TENSOR_INT32", "{1, 4}")
model = model.Operation("SPLIT", i1, axis, n).To([o1, o2, o3])
Example(({i1: [1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12]},
         {o1: [1, 2, 3, 4], o2: [5, 6, 7, 8], o3: [9, 10, 11, 12]}))
"#;

    #[test]
    fn reference_backend_splits_rows() {
        let model = load_model(SPLIT_2D).expect("model");
        let bundle = &model.bundles[0];
        let out = ReferenceBackend
            .execute(&model.declaration, bundle.inputs())
            .expect("execute");
        assert_eq!(out.get("b"), Some(&vec![5.0, 6.0, 7.0, 8.0]));
        assert_eq!(out.len(), 3);
    }

    #[test]
    fn reference_backend_reports_missing_input() {
        let model = load_model(SPLIT_2D).expect("model");
        let err = ReferenceBackend
            .execute(&model.declaration, &TensorValues::new())
            .expect_err("no inputs");
        assert!(err.contains("no values"), "{err}");
    }
}
