#![forbid(unsafe_code)]

use half::f16;

/// Operand element types accepted by operator fixtures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ElementType {
    TensorFloat32,
    TensorFloat16,
    TensorInt32,
    TensorInt64,
    TensorQuant8Asymm,
    TensorBool8,
    Int32,
    Float32,
    Bool,
}

impl ElementType {
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::TensorFloat32 => "TENSOR_FLOAT32",
            Self::TensorFloat16 => "TENSOR_FLOAT16",
            Self::TensorInt32 => "TENSOR_INT32",
            Self::TensorInt64 => "TENSOR_INT64",
            Self::TensorQuant8Asymm => "TENSOR_QUANT8_ASYMM",
            Self::TensorBool8 => "TENSOR_BOOL8",
            Self::Int32 => "INT32",
            Self::Float32 => "FLOAT32",
            Self::Bool => "BOOL",
        }
    }

    #[must_use]
    pub const fn item_size(self) -> usize {
        match self {
            Self::TensorQuant8Asymm | Self::TensorBool8 | Self::Bool => 1,
            Self::TensorFloat16 => 2,
            Self::TensorFloat32 | Self::TensorInt32 | Self::Int32 | Self::Float32 => 4,
            Self::TensorInt64 => 8,
        }
    }

    #[must_use]
    pub fn parse(name: &str) -> Option<Self> {
        match name.trim() {
            "TENSOR_FLOAT32" => Some(Self::TensorFloat32),
            "TENSOR_FLOAT16" => Some(Self::TensorFloat16),
            "TENSOR_INT32" => Some(Self::TensorInt32),
            "TENSOR_INT64" => Some(Self::TensorInt64),
            "TENSOR_QUANT8_ASYMM" => Some(Self::TensorQuant8Asymm),
            "TENSOR_BOOL8" => Some(Self::TensorBool8),
            "INT32" => Some(Self::Int32),
            "FLOAT32" => Some(Self::Float32),
            "BOOL" => Some(Self::Bool),
            _ => None,
        }
    }

    /// Returns `true` for the `TENSOR_*` types.
    #[must_use]
    pub const fn is_tensor(self) -> bool {
        matches!(
            self,
            Self::TensorFloat32
                | Self::TensorFloat16
                | Self::TensorInt32
                | Self::TensorInt64
                | Self::TensorQuant8Asymm
                | Self::TensorBool8
        )
    }

    /// Returns `true` if values of this type are compared with a tolerance.
    #[must_use]
    pub const fn is_float(self) -> bool {
        matches!(self, Self::TensorFloat32 | Self::TensorFloat16 | Self::Float32)
    }

    #[must_use]
    pub const fn is_quantized(self) -> bool {
        matches!(self, Self::TensorQuant8Asymm)
    }

    /// Whether `value` can be stored in this element type without loss.
    #[must_use]
    pub fn accepts_literal(self, value: f64) -> bool {
        match self {
            Self::TensorFloat32 | Self::Float32 => {
                !value.is_finite() || value.abs() <= f64::from(f32::MAX)
            }
            Self::TensorFloat16 => !value.is_finite() || value.abs() <= 65504.0,
            Self::TensorInt32 | Self::Int32 => {
                integral_in_range(value, f64::from(i32::MIN), f64::from(i32::MAX))
            }
            // i64 bounds are not exactly representable as f64; stay inside 2^63.
            Self::TensorInt64 => {
                integral_in_range(value, -(2f64.powi(63)), 2f64.powi(63) - 1024.0)
            }
            Self::TensorQuant8Asymm => integral_in_range(value, 0.0, 255.0),
            Self::TensorBool8 | Self::Bool => value == 0.0 || value == 1.0,
        }
    }

    /// Rounds `value` to the nearest value this type can hold.
    ///
    /// Float types round through their storage width; the other types hold
    /// every literal `accepts_literal` admits and return it unchanged.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn to_storage(self, value: f64) -> f64 {
        match self {
            Self::TensorFloat32 | Self::Float32 => f64::from(value as f32),
            Self::TensorFloat16 => f16::from_f64(value).to_f64(),
            _ => value,
        }
    }
}

fn integral_in_range(value: f64, min: f64, max: f64) -> bool {
    value.is_finite() && value.fract() == 0.0 && value >= min && value <= max
}

impl std::fmt::Display for ElementType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum TensorError {
    MalformedShape {
        shape: String,
        detail: String,
    },
    UnknownElementType {
        type_name: String,
    },
    TypeClass {
        name: String,
        element_type: ElementType,
        expected: &'static str,
    },
    UnrepresentableScalar {
        name: String,
        element_type: ElementType,
        value: f64,
    },
}

impl std::fmt::Display for TensorError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MalformedShape { shape, detail } => {
                write!(f, "malformed shape '{shape}': {detail}")
            }
            Self::UnknownElementType { type_name } => {
                write!(f, "unknown element type '{type_name}'")
            }
            Self::TypeClass {
                name,
                element_type,
                expected,
            } => write!(
                f,
                "operand '{name}' has type {element_type} but a {expected} type is required"
            ),
            Self::UnrepresentableScalar {
                name,
                element_type,
                value,
            } => write!(
                f,
                "scalar '{name}' value {value} is not representable as {element_type}"
            ),
        }
    }
}

impl std::error::Error for TensorError {}

impl TensorError {
    #[must_use]
    pub fn reason_code(&self) -> &'static str {
        match self {
            Self::MalformedShape { .. } => "tensor_malformed_shape",
            Self::UnknownElementType { .. } => "tensor_unknown_element_type",
            Self::TypeClass { .. } => "operand_type_class_mismatch",
            Self::UnrepresentableScalar { .. } => "scalar_not_representable",
        }
    }
}

/// Affine quantization parameters of a `TENSOR_QUANT8_ASYMM` operand.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Quantization {
    pub scale: f64,
    pub zero_point: i32,
}

/// Parsed form of a fixture shape string such as `"{2,2}, 0.5f, 128"`.
#[derive(Debug, Clone, PartialEq)]
pub struct ShapeSpec {
    pub dims: Vec<usize>,
    pub quantization: Option<Quantization>,
}

fn malformed(shape: &str, detail: impl Into<String>) -> TensorError {
    TensorError::MalformedShape {
        shape: shape.to_string(),
        detail: detail.into(),
    }
}

/// Parses `{d0,d1,...}` optionally followed by `, scale, zero_point`.
pub fn parse_shape_spec(text: &str) -> Result<ShapeSpec, TensorError> {
    let trimmed = text.trim();
    let Some(body) = trimmed.strip_prefix('{') else {
        return Err(malformed(text, "shape must start with '{'"));
    };
    let Some(close) = body.find('}') else {
        return Err(malformed(text, "shape is missing closing '}'"));
    };

    let inner = body[..close].trim();
    let mut dims = Vec::new();
    if !inner.is_empty() {
        for token in inner.split(',') {
            let token = token.trim();
            let dim: i64 = token
                .parse()
                .map_err(|_| malformed(text, format!("dimension '{token}' is not an integer")))?;
            if dim <= 0 {
                return Err(malformed(text, format!("dimension {dim} must be positive")));
            }
            let dim = usize::try_from(dim)
                .map_err(|_| malformed(text, format!("dimension {dim} does not fit usize")))?;
            dims.push(dim);
        }
    }

    let rest = body[close + 1..].trim();
    let quantization = if rest.is_empty() {
        None
    } else {
        let Some(params) = rest.strip_prefix(',') else {
            return Err(malformed(text, format!("unexpected trailing text '{rest}'")));
        };
        let parts: Vec<&str> = params.split(',').map(str::trim).collect();
        let [scale_raw, zero_raw] = parts.as_slice() else {
            return Err(malformed(
                text,
                "quantization must be given as '<scale>, <zero_point>'",
            ));
        };
        let scale: f64 = scale_raw
            .trim_end_matches(['f', 'F'])
            .parse()
            .map_err(|_| malformed(text, format!("scale '{scale_raw}' is not a number")))?;
        let zero_point: i32 = zero_raw
            .parse()
            .map_err(|_| malformed(text, format!("zero point '{zero_raw}' is not an integer")))?;
        Some(Quantization { scale, zero_point })
    };

    Ok(ShapeSpec { dims, quantization })
}

/// Product of `shape`; `1` for rank 0.
pub fn element_count(shape: &[usize]) -> Option<usize> {
    shape
        .iter()
        .try_fold(1usize, |acc, &dim| acc.checked_mul(dim))
}

fn shape_text(shape: &[usize]) -> String {
    let dims: Vec<String> = shape.iter().map(ToString::to_string).collect();
    format!("{{{}}}", dims.join(","))
}

/// A named tensor operand with a fixed type and shape.
#[derive(Debug, Clone, PartialEq)]
pub struct TensorDescriptor {
    name: String,
    element_type: ElementType,
    shape: Vec<usize>,
    element_count: usize,
    quantization: Option<Quantization>,
}

impl TensorDescriptor {
    pub fn new(
        name: impl Into<String>,
        element_type: ElementType,
        shape: Vec<usize>,
    ) -> Result<Self, TensorError> {
        Self::build(name.into(), element_type, shape, None)
    }

    /// Builds a descriptor from the textual type name and shape used in fixtures.
    pub fn parse(
        name: impl Into<String>,
        type_name: &str,
        shape: &str,
    ) -> Result<Self, TensorError> {
        let element_type =
            ElementType::parse(type_name).ok_or_else(|| TensorError::UnknownElementType {
                type_name: type_name.to_string(),
            })?;
        let spec = parse_shape_spec(shape)?;
        Self::build(name.into(), element_type, spec.dims, spec.quantization)
    }

    fn build(
        name: String,
        element_type: ElementType,
        shape: Vec<usize>,
        quantization: Option<Quantization>,
    ) -> Result<Self, TensorError> {
        if !element_type.is_tensor() {
            return Err(TensorError::TypeClass {
                name,
                element_type,
                expected: "tensor",
            });
        }
        if let Some(dim) = shape.iter().find(|&&dim| dim == 0) {
            return Err(malformed(
                &shape_text(&shape),
                format!("dimension {dim} must be positive"),
            ));
        }
        let element_count = element_count(&shape)
            .ok_or_else(|| malformed(&shape_text(&shape), "element count overflows"))?;
        let quantization = validate_quantization(element_type, &shape, quantization)?;

        Ok(Self {
            name,
            element_type,
            shape,
            element_count,
            quantization,
        })
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn element_type(&self) -> ElementType {
        self.element_type
    }

    #[must_use]
    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    #[must_use]
    pub fn rank(&self) -> usize {
        self.shape.len()
    }

    #[must_use]
    pub fn element_count(&self) -> usize {
        self.element_count
    }

    #[must_use]
    pub fn quantization(&self) -> Option<Quantization> {
        self.quantization
    }

    /// Buffer size in bytes, `None` on overflow.
    #[must_use]
    pub fn byte_size(&self) -> Option<usize> {
        self.element_count
            .checked_mul(self.element_type.item_size())
    }

    /// Same element type and quantization, ignoring name and shape.
    #[must_use]
    pub fn same_type_as(&self, other: &Self) -> bool {
        self.element_type == other.element_type && self.quantization == other.quantization
    }
}

fn validate_quantization(
    element_type: ElementType,
    shape: &[usize],
    quantization: Option<Quantization>,
) -> Result<Option<Quantization>, TensorError> {
    if element_type.is_quantized() {
        let Some(q) = quantization else {
            return Err(malformed(
                &shape_text(shape),
                "quantized tensor requires scale and zero point",
            ));
        };
        if !q.scale.is_finite() || q.scale <= 0.0 {
            return Err(malformed(
                &shape_text(shape),
                format!("scale {} must be finite and positive", q.scale),
            ));
        }
        if !(0..=255).contains(&q.zero_point) {
            return Err(malformed(
                &shape_text(shape),
                format!("zero point {} outside 0..=255", q.zero_point),
            ));
        }
        return Ok(Some(q));
    }

    match quantization {
        None => Ok(None),
        Some(q) if q.scale == 0.0 && q.zero_point == 0 => Ok(None),
        Some(q) => Err(malformed(
            &shape_text(shape),
            format!(
                "{element_type} does not take quantization (scale={} zero_point={})",
                q.scale, q.zero_point
            ),
        )),
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ScalarValue {
    Int32(i32),
    Float32(f32),
    Bool(bool),
}

impl ScalarValue {
    #[must_use]
    pub fn as_i32(self) -> Option<i32> {
        match self {
            Self::Int32(v) => Some(v),
            Self::Float32(_) | Self::Bool(_) => None,
        }
    }
}

/// A named scalar operand with a literal value.
#[derive(Debug, Clone, PartialEq)]
pub struct ScalarParameter {
    name: String,
    element_type: ElementType,
    value: ScalarValue,
}

impl ScalarParameter {
    pub fn new(
        name: impl Into<String>,
        element_type: ElementType,
        literal: f64,
    ) -> Result<Self, TensorError> {
        let name = name.into();
        if element_type.is_tensor() {
            return Err(TensorError::TypeClass {
                name,
                element_type,
                expected: "scalar",
            });
        }
        if !element_type.accepts_literal(literal) {
            return Err(TensorError::UnrepresentableScalar {
                name,
                element_type,
                value: literal,
            });
        }

        #[allow(clippy::cast_possible_truncation)]
        let value = match element_type {
            ElementType::Int32 => ScalarValue::Int32(literal as i32),
            ElementType::Float32 => ScalarValue::Float32(literal as f32),
            _ => ScalarValue::Bool(literal != 0.0),
        };
        Ok(Self {
            name,
            element_type,
            value,
        })
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn element_type(&self) -> ElementType {
        self.element_type
    }

    #[must_use]
    pub fn value(&self) -> ScalarValue {
        self.value
    }
}
