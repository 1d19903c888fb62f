#![forbid(unsafe_code)]

use nfx_tensor::{ElementType, ScalarParameter, TensorDescriptor, TensorError, element_count};
use std::collections::BTreeSet;

/// Operator kinds with a registered signature.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OpKind {
    Split,
}

impl OpKind {
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Split => "SPLIT",
        }
    }

    #[must_use]
    pub fn parse(name: &str) -> Option<Self> {
        match name.trim() {
            "SPLIT" => Some(Self::Split),
            _ => None,
        }
    }
}

impl std::fmt::Display for OpKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum OpError {
    Tensor(TensorError),
    SignatureMismatch {
        op: String,
        detail: String,
    },
    InvalidAxis {
        axis: i64,
        rank: usize,
    },
    NotDivisible {
        axis: usize,
        extent: usize,
        num_outputs: usize,
    },
    ShapeMismatch {
        output: String,
        expected: Vec<usize>,
        actual: Vec<usize>,
    },
    BufferLength {
        expected: usize,
        actual: usize,
    },
}

impl std::fmt::Display for OpError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Tensor(err) => write!(f, "tensor error: {err}"),
            Self::SignatureMismatch { op, detail } => {
                write!(f, "{op} signature mismatch: {detail}")
            }
            Self::InvalidAxis { axis, rank } => {
                write!(f, "axis {axis} out of bounds for rank={rank}")
            }
            Self::NotDivisible {
                axis,
                extent,
                num_outputs,
            } => write!(
                f,
                "extent {extent} of axis {axis} is not divisible into {num_outputs} outputs"
            ),
            Self::ShapeMismatch {
                output,
                expected,
                actual,
            } => write!(
                f,
                "output '{output}' shape mismatch expected={expected:?} declared={actual:?}"
            ),
            Self::BufferLength { expected, actual } => {
                write!(f, "buffer length mismatch expected={expected} actual={actual}")
            }
        }
    }
}

impl std::error::Error for OpError {}

impl From<TensorError> for OpError {
    fn from(err: TensorError) -> Self {
        Self::Tensor(err)
    }
}

impl OpError {
    #[must_use]
    pub fn reason_code(&self) -> &'static str {
        match self {
            Self::Tensor(err) => err.reason_code(),
            Self::SignatureMismatch { .. } => "op_signature_mismatch",
            Self::InvalidAxis { .. } => "split_invalid_axis",
            Self::NotDivisible { .. } => "split_not_divisible",
            Self::ShapeMismatch { .. } => "op_output_shape_mismatch",
            Self::BufferLength { .. } => "layout_buffer_length",
        }
    }
}

fn signature_mismatch(kind: OpKind, detail: impl Into<String>) -> OpError {
    OpError::SignatureMismatch {
        op: kind.name().to_string(),
        detail: detail.into(),
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    Tensor(TensorDescriptor),
    Scalar(ScalarParameter),
}

impl Operand {
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Self::Tensor(t) => t.name(),
            Self::Scalar(s) => s.name(),
        }
    }

    #[must_use]
    pub fn element_type(&self) -> ElementType {
        match self {
            Self::Tensor(t) => t.element_type(),
            Self::Scalar(s) => s.element_type(),
        }
    }

    #[must_use]
    pub fn as_tensor(&self) -> Option<&TensorDescriptor> {
        match self {
            Self::Tensor(t) => Some(t),
            Self::Scalar(_) => None,
        }
    }

    #[must_use]
    pub fn as_scalar(&self) -> Option<&ScalarParameter> {
        match self {
            Self::Tensor(_) => None,
            Self::Scalar(s) => Some(s),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperandRule {
    Tensor(&'static [ElementType]),
    Scalar(ElementType),
}

#[derive(Debug, Clone, Copy)]
pub struct OperandSlot {
    pub role: &'static str,
    pub rule: OperandRule,
}

pub type ShapeInference = fn(&[Operand]) -> Result<Vec<Vec<usize>>, OpError>;

/// Arity, operand types and shape inference of one operator kind.
#[derive(Debug, Clone, Copy)]
pub struct OpSignature {
    pub kind: OpKind,
    pub inputs: &'static [OperandSlot],
    /// Input whose element type and quantization every output must share.
    pub output_type_from: usize,
    pub infer: ShapeInference,
}

const SPLIT_TENSOR_TYPES: &[ElementType] = &[
    ElementType::TensorFloat32,
    ElementType::TensorFloat16,
    ElementType::TensorInt32,
    ElementType::TensorQuant8Asymm,
];

const SPLIT_INPUTS: &[OperandSlot] = &[
    OperandSlot {
        role: "input",
        rule: OperandRule::Tensor(SPLIT_TENSOR_TYPES),
    },
    OperandSlot {
        role: "axis",
        rule: OperandRule::Scalar(ElementType::Int32),
    },
    OperandSlot {
        role: "num_outputs",
        rule: OperandRule::Scalar(ElementType::Int32),
    },
];

static SIGNATURES: &[OpSignature] = &[OpSignature {
    kind: OpKind::Split,
    inputs: SPLIT_INPUTS,
    output_type_from: 0,
    infer: infer_split,
}];

#[must_use]
pub fn signature(kind: OpKind) -> Option<&'static OpSignature> {
    SIGNATURES.iter().find(|sig| sig.kind == kind)
}

/// Normalizes a possibly negative axis into `[0, rank)`.
pub fn normalize_axis(axis: i64, rank: usize) -> Result<usize, OpError> {
    let rank_i128 = i128::try_from(rank).map_err(|_| OpError::InvalidAxis { axis, rank })?;
    let axis_i128 = i128::from(axis);
    let normalized = if axis_i128 < 0 {
        rank_i128 + axis_i128
    } else {
        axis_i128
    };
    if normalized < 0 || normalized >= rank_i128 {
        return Err(OpError::InvalidAxis { axis, rank });
    }
    usize::try_from(normalized).map_err(|_| OpError::InvalidAxis { axis, rank })
}

/// Output shapes of an even split of `shape` into `num_outputs` parts along `axis`.
pub fn split_output_shapes(
    shape: &[usize],
    axis: i64,
    num_outputs: i64,
) -> Result<Vec<Vec<usize>>, OpError> {
    let axis = normalize_axis(axis, shape.len())?;
    let count = usize::try_from(num_outputs)
        .ok()
        .filter(|&n| n >= 1)
        .ok_or_else(|| {
            signature_mismatch(
                OpKind::Split,
                format!("num_outputs must be >= 1, got {num_outputs}"),
            )
        })?;

    let extent = shape[axis];
    if !extent.is_multiple_of(count) {
        return Err(OpError::NotDivisible {
            axis,
            extent,
            num_outputs: count,
        });
    }

    let mut part = shape.to_vec();
    part[axis] = extent / count;
    Ok(vec![part; count])
}

fn scalar_i32(inputs: &[Operand], idx: usize, kind: OpKind) -> Result<i32, OpError> {
    inputs
        .get(idx)
        .and_then(Operand::as_scalar)
        .and_then(|s| s.value().as_i32())
        .ok_or_else(|| signature_mismatch(kind, format!("input {idx} must be an INT32 scalar")))
}

fn infer_split(inputs: &[Operand]) -> Result<Vec<Vec<usize>>, OpError> {
    let input = inputs
        .first()
        .and_then(Operand::as_tensor)
        .ok_or_else(|| signature_mismatch(OpKind::Split, "input 0 must be a tensor"))?;
    let axis = scalar_i32(inputs, 1, OpKind::Split)?;
    let num_outputs = scalar_i32(inputs, 2, OpKind::Split)?;
    split_output_shapes(input.shape(), i64::from(axis), i64::from(num_outputs))
}

/// Output shapes the signature of `kind` infers from `inputs` alone.
pub fn infer_output_shapes(kind: OpKind, inputs: &[Operand]) -> Result<Vec<Vec<usize>>, OpError> {
    let sig = signature(kind)
        .ok_or_else(|| signature_mismatch(kind, "operator kind has no registered signature"))?;
    (sig.infer)(inputs)
}

/// A validated operator instance.
#[derive(Debug, Clone, PartialEq)]
pub struct OperationDeclaration {
    kind: OpKind,
    inputs: Vec<Operand>,
    outputs: Vec<TensorDescriptor>,
}

impl OperationDeclaration {
    #[must_use]
    pub fn kind(&self) -> OpKind {
        self.kind
    }

    #[must_use]
    pub fn inputs(&self) -> &[Operand] {
        &self.inputs
    }

    #[must_use]
    pub fn outputs(&self) -> &[TensorDescriptor] {
        &self.outputs
    }

    pub fn tensor_inputs(&self) -> impl Iterator<Item = &TensorDescriptor> {
        self.inputs.iter().filter_map(Operand::as_tensor)
    }

    #[must_use]
    pub fn input(&self, name: &str) -> Option<&Operand> {
        self.inputs.iter().find(|op| op.name() == name)
    }

    #[must_use]
    pub fn output(&self, name: &str) -> Option<&TensorDescriptor> {
        self.outputs.iter().find(|t| t.name() == name)
    }

    /// Scalar input by position, for executors that need operator attributes.
    #[must_use]
    pub fn scalar_input(&self, idx: usize) -> Option<&ScalarParameter> {
        self.inputs.get(idx).and_then(Operand::as_scalar)
    }
}

/// Validates `inputs`/`outputs` against the signature table entry for `kind`.
pub fn declare_operation(
    kind: OpKind,
    inputs: Vec<Operand>,
    outputs: Vec<TensorDescriptor>,
) -> Result<OperationDeclaration, OpError> {
    let sig = signature(kind)
        .ok_or_else(|| signature_mismatch(kind, "operator kind has no registered signature"))?;

    if inputs.len() != sig.inputs.len() {
        return Err(signature_mismatch(
            kind,
            format!(
                "expected {} inputs, got {}",
                sig.inputs.len(),
                inputs.len()
            ),
        ));
    }

    for (idx, (slot, operand)) in sig.inputs.iter().zip(&inputs).enumerate() {
        let ok = match (slot.rule, operand) {
            (OperandRule::Tensor(allowed), Operand::Tensor(t)) => {
                allowed.contains(&t.element_type())
            }
            (OperandRule::Scalar(ty), Operand::Scalar(s)) => s.element_type() == ty,
            _ => false,
        };
        if !ok {
            return Err(signature_mismatch(
                kind,
                format!(
                    "input {idx} ({}) '{}' has incompatible type {}",
                    slot.role,
                    operand.name(),
                    operand.element_type()
                ),
            ));
        }
    }

    // Inference sees only the inputs, so axis and divisibility errors win
    // over a mismatched output list.
    let inferred = infer_output_shapes(kind, &inputs)?;
    if outputs.len() != inferred.len() {
        return Err(signature_mismatch(
            kind,
            format!(
                "expected {} outputs, got {}",
                inferred.len(),
                outputs.len()
            ),
        ));
    }

    let mut names = BTreeSet::new();
    for name in inputs
        .iter()
        .map(Operand::name)
        .chain(outputs.iter().map(TensorDescriptor::name))
    {
        if !names.insert(name) {
            return Err(signature_mismatch(
                kind,
                format!("operand name '{name}' is used more than once"),
            ));
        }
    }

    if let Some(reference) = inputs
        .get(sig.output_type_from)
        .and_then(Operand::as_tensor)
    {
        if let Some(bad) = outputs.iter().find(|out| !out.same_type_as(reference)) {
            return Err(signature_mismatch(
                kind,
                format!(
                    "output '{}' type {} does not match input type {}",
                    bad.name(),
                    bad.element_type(),
                    reference.element_type()
                ),
            ));
        }
    }

    for (out, expected) in outputs.iter().zip(&inferred) {
        if out.shape() != expected.as_slice() {
            return Err(OpError::ShapeMismatch {
                output: out.name().to_string(),
                expected: expected.clone(),
                actual: out.shape().to_vec(),
            });
        }
    }

    Ok(OperationDeclaration {
        kind,
        inputs,
        outputs,
    })
}

fn axis_extents(shape: &[usize], axis: usize) -> (usize, usize, usize) {
    let outer = shape[..axis].iter().product();
    let inner = shape[axis + 1..].iter().product();
    (outer, shape[axis], inner)
}

/// Partitions a row-major buffer into `num_outputs` equal slices along `axis`.
///
/// Output `k` holds the elements whose coordinate on `axis` lies in
/// `[k * extent / n, (k + 1) * extent / n)`, still in row-major order.
pub fn split_row_major<T: Copy>(
    values: &[T],
    shape: &[usize],
    axis: usize,
    num_outputs: usize,
) -> Result<Vec<Vec<T>>, OpError> {
    let expected = element_count(shape).ok_or(OpError::BufferLength {
        expected: usize::MAX,
        actual: values.len(),
    })?;
    if values.len() != expected {
        return Err(OpError::BufferLength {
            expected,
            actual: values.len(),
        });
    }
    if axis >= shape.len() {
        return Err(OpError::InvalidAxis {
            axis: i64::try_from(axis).unwrap_or(i64::MAX),
            rank: shape.len(),
        });
    }
    let (outer, extent, inner) = axis_extents(shape, axis);
    if num_outputs == 0 || !extent.is_multiple_of(num_outputs) {
        return Err(OpError::NotDivisible {
            axis,
            extent,
            num_outputs,
        });
    }

    let block = extent / num_outputs * inner;
    let mut parts: Vec<Vec<T>> = (0..num_outputs)
        .map(|_| Vec::with_capacity(outer * block))
        .collect();
    for o in 0..outer {
        let base = o * extent * inner;
        for (k, part) in parts.iter_mut().enumerate() {
            let start = base + k * block;
            part.extend_from_slice(&values[start..start + block]);
        }
    }
    Ok(parts)
}

/// Inverse of [`split_row_major`]: joins equally shaped parts along `axis`.
pub fn concat_row_major<T: Copy>(
    parts: &[Vec<T>],
    part_shape: &[usize],
    axis: usize,
) -> Result<Vec<T>, OpError> {
    if axis >= part_shape.len() {
        return Err(OpError::InvalidAxis {
            axis: i64::try_from(axis).unwrap_or(i64::MAX),
            rank: part_shape.len(),
        });
    }
    let expected = element_count(part_shape).ok_or(OpError::BufferLength {
        expected: usize::MAX,
        actual: 0,
    })?;
    if let Some(bad) = parts.iter().find(|p| p.len() != expected) {
        return Err(OpError::BufferLength {
            expected,
            actual: bad.len(),
        });
    }

    let (outer, extent, inner) = axis_extents(part_shape, axis);
    let block = extent * inner;
    let mut out = Vec::with_capacity(expected * parts.len());
    for o in 0..outer {
        for part in parts {
            out.extend_from_slice(&part[o * block..(o + 1) * block]);
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::{
        OpError, OpKind, Operand, concat_row_major, declare_operation, infer_output_shapes,
        normalize_axis, signature, split_output_shapes, split_row_major,
    };
    use nfx_tensor::{ElementType, ScalarParameter, TensorDescriptor};

    fn tensor(name: &str, ty: ElementType, shape: &[usize]) -> TensorDescriptor {
        TensorDescriptor::new(name, ty, shape.to_vec()).expect("tensor")
    }

    fn int32(name: &str, value: i32) -> Operand {
        Operand::Scalar(
            ScalarParameter::new(name, ElementType::Int32, f64::from(value)).expect("scalar"),
        )
    }

    fn split_inputs(shape: &[usize], axis: i32, num_out: i32) -> Vec<Operand> {
        vec![
            Operand::Tensor(tensor("op1", ElementType::TensorFloat32, shape)),
            int32("axis", axis),
            int32("num_out", num_out),
        ]
    }

    fn split_outputs(shape: &[usize], count: usize) -> Vec<TensorDescriptor> {
        (0..count)
            .map(|k| tensor(&format!("out{k}"), ElementType::TensorFloat32, shape))
            .collect()
    }

    #[test]
    fn split_table_entry_is_registered() {
        let sig = signature(OpKind::Split).expect("split signature");
        assert_eq!(sig.inputs.len(), 3);
        assert_eq!(OpKind::parse("SPLIT"), Some(OpKind::Split));
        assert_eq!(OpKind::parse("CONCATENATION"), None);
    }

    #[test]
    fn declares_four_dim_split() {
        let decl = declare_operation(
            OpKind::Split,
            split_inputs(&[2, 2, 2, 2], 3, 2),
            split_outputs(&[2, 2, 2, 1], 2),
        )
        .expect("valid split");
        assert_eq!(decl.kind(), OpKind::Split);
        assert_eq!(decl.tensor_inputs().count(), 1);
        assert_eq!(decl.outputs().len(), 2);
        assert!(decl.output("out1").is_some());
        assert_eq!(
            decl.scalar_input(1).and_then(|s| s.value().as_i32()),
            Some(3)
        );
    }

    #[test]
    fn negative_axis_matches_positive_axis() {
        assert_eq!(normalize_axis(-1, 4).expect("axis"), 3);
        assert_eq!(
            split_output_shapes(&[2, 2, 2, 2], -1, 2).expect("neg"),
            split_output_shapes(&[2, 2, 2, 2], 3, 2).expect("pos")
        );
        declare_operation(
            OpKind::Split,
            split_inputs(&[2, 2, 2, 2], -1, 2),
            split_outputs(&[2, 2, 2, 1], 2),
        )
        .expect("negative axis split");
    }

    #[test]
    fn rejects_out_of_range_axis() {
        let err = split_output_shapes(&[2, 2, 2, 2], 4, 2).expect_err("axis 4");
        assert!(matches!(err, OpError::InvalidAxis { axis: 4, rank: 4 }));
        let err = split_output_shapes(&[2, 2, 2, 2], -5, 2).expect_err("axis -5");
        assert_eq!(err.reason_code(), "split_invalid_axis");
        let err = split_output_shapes(&[], 0, 1).expect_err("rank 0");
        assert!(matches!(err, OpError::InvalidAxis { .. }));
    }

    #[test]
    fn rejects_indivisible_extent() {
        let err = declare_operation(
            OpKind::Split,
            split_inputs(&[2, 2, 2, 2], 3, 3),
            split_outputs(&[2, 2, 2, 1], 3),
        )
        .expect_err("2 into 3");
        assert!(matches!(
            err,
            OpError::NotDivisible {
                axis: 3,
                extent: 2,
                num_outputs: 3
            }
        ));
    }

    #[test]
    fn infers_shapes_from_inputs_alone() {
        let shapes =
            infer_output_shapes(OpKind::Split, &split_inputs(&[2, 3, 2], -2, 3)).expect("shapes");
        assert_eq!(shapes, vec![vec![2, 1, 2]; 3]);
        let err = infer_output_shapes(OpKind::Split, &split_inputs(&[2, 2], 0, 0))
            .expect_err("zero outputs");
        assert!(err.to_string().contains("num_outputs must be >= 1"), "{err}");
    }

    #[test]
    fn indivisible_extent_wins_over_output_count() {
        // Four declared outputs where the scalar asks for three.
        let err = declare_operation(
            OpKind::Split,
            split_inputs(&[2, 2, 2, 2], 3, 3),
            split_outputs(&[2, 2, 2, 1], 4),
        )
        .expect_err("2 into 3");
        assert_eq!(err.reason_code(), "split_not_divisible");

        let err = declare_operation(
            OpKind::Split,
            split_inputs(&[2, 2], 5, 2),
            split_outputs(&[1, 2], 3),
        )
        .expect_err("axis 5");
        assert_eq!(err.reason_code(), "split_invalid_axis");
    }

    #[test]
    fn rejects_arity_and_type_errors() {
        let mut inputs = split_inputs(&[2, 2], 0, 2);
        inputs.pop();
        let err = declare_operation(OpKind::Split, inputs, split_outputs(&[1, 2], 2))
            .expect_err("missing num_out");
        assert!(matches!(err, OpError::SignatureMismatch { .. }));

        let err = declare_operation(
            OpKind::Split,
            split_inputs(&[2, 2], 0, 2),
            split_outputs(&[1, 2], 3),
        )
        .expect_err("output count");
        assert_eq!(err.reason_code(), "op_signature_mismatch");

        let mut inputs = split_inputs(&[2, 2], 0, 2);
        inputs[1] = Operand::Scalar(
            ScalarParameter::new("axis", ElementType::Float32, 0.0).expect("float scalar"),
        );
        declare_operation(OpKind::Split, inputs, split_outputs(&[1, 2], 2))
            .expect_err("float axis");

        let outputs = vec![
            tensor("a", ElementType::TensorFloat32, &[1, 2]),
            tensor("b", ElementType::TensorInt32, &[1, 2]),
        ];
        let err = declare_operation(OpKind::Split, split_inputs(&[2, 2], 0, 2), outputs)
            .expect_err("mixed output types");
        assert!(matches!(err, OpError::SignatureMismatch { .. }));

        let err = declare_operation(
            OpKind::Split,
            split_inputs(&[2, 2], 0, 0),
            Vec::new(),
        )
        .expect_err("zero outputs");
        assert!(matches!(err, OpError::SignatureMismatch { .. }));
    }

    #[test]
    fn rejects_duplicate_names() {
        let outputs = vec![
            tensor("dup", ElementType::TensorFloat32, &[1, 2]),
            tensor("dup", ElementType::TensorFloat32, &[1, 2]),
        ];
        let err = declare_operation(OpKind::Split, split_inputs(&[2, 2], 0, 2), outputs)
            .expect_err("duplicate");
        assert!(err.to_string().contains("dup"));
    }

    #[test]
    fn rejects_wrong_output_shapes() {
        let err = declare_operation(
            OpKind::Split,
            split_inputs(&[2, 2, 2, 2], 3, 2),
            split_outputs(&[2, 2, 1, 2], 2),
        )
        .expect_err("shape");
        assert!(matches!(err, OpError::ShapeMismatch { .. }));
    }

    #[test]
    fn split_layout_matches_fixture() {
        let values: Vec<f64> = (1..=16).map(f64::from).collect();
        let parts = split_row_major(&values, &[2, 2, 2, 2], 3, 2).expect("split");
        assert_eq!(
            parts[0],
            vec![1.0, 3.0, 5.0, 7.0, 9.0, 11.0, 13.0, 15.0]
        );
        assert_eq!(
            parts[1],
            vec![2.0, 4.0, 6.0, 8.0, 10.0, 12.0, 14.0, 16.0]
        );

        let parts = split_row_major(&values, &[2, 2, 2, 2], 0, 2).expect("axis 0");
        assert_eq!(parts[0], (1..=8).map(f64::from).collect::<Vec<_>>());
    }

    #[test]
    fn split_then_concat_round_trips() {
        let cases: &[(&[usize], usize, usize)] = &[
            (&[2, 2, 2, 2], 3, 2),
            (&[6], 0, 3),
            (&[3, 4, 5], 1, 4),
            (&[2, 6, 1], 1, 2),
            (&[4, 3], 0, 1),
        ];
        for &(shape, axis, n) in cases {
            let len: usize = shape.iter().product();
            let values: Vec<u32> = (0..u32::try_from(len).expect("len")).collect();
            let parts = split_row_major(&values, shape, axis, n).expect("split");
            let mut part_shape = shape.to_vec();
            part_shape[axis] /= n;
            let joined = concat_row_major(&parts, &part_shape, axis).expect("concat");
            assert_eq!(joined, values, "shape={shape:?} axis={axis} n={n}");
        }
    }

    #[test]
    fn split_layout_validates_buffer() {
        let err = split_row_major(&[1.0, 2.0, 3.0], &[2, 2], 0, 2).expect_err("short");
        assert!(matches!(err, OpError::BufferLength { expected: 4, actual: 3 }));
        let err = split_row_major(&[1.0, 2.0, 3.0], &[3], 0, 2).expect_err("indivisible");
        assert!(matches!(err, OpError::NotDivisible { .. }));
    }
}
