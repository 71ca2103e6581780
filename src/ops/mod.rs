//! # Operator Descriptors
//!
//! An [`Operator`] is an immutable tagged variant: the operator kind plus its
//! kind-specific parameters, validated when constructed. Descriptors carry no
//! behaviour of their own; backends look them up by [`OpKind`] in their
//! dispatch tables.
//!
//! ## Families
//!
//! - elementwise unary ([`UnaryOp`]) and broadcasting binary ([`BinaryOp`])
//! - [`Pad`] with the `constant`, `reflect` and `edge` boundary policies
//! - data movement: `Transpose`, `Reshape`, [`Slice`], `Concat`
//! - `MatMul`, 2-D [`Conv`] and [`Pool`]
//! - reductions ([`Reduce`]) and `ArgMax`
//!
//! ## Example
//! ```rust
//! use briny_texel::ops::{Attributes, OpKind, Operator};
//!
//! let attrs = Attributes::new()
//!     .with_string("mode", "reflect")
//!     .with_ints("pads", &[2, 2]);
//! let op = Operator::from_node("Pad", &attrs).unwrap();
//! assert_eq!(op.kind(), OpKind::Pad);
//! assert!(Operator::from_node("Pad", &attrs.with_string("mode", "wrap")).is_err());
//! ```

pub mod attributes;
mod infer;

use core::fmt;
use core::str::FromStr;

pub use self::attributes::{Attribute, Attributes};
use crate::error::{Error, Result};
use crate::shape::AutoPad;

/// Hashable operator tag; [`OpKind::name`] is the ONNX op type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum OpKind {
    Abs,
    Neg,
    Relu,
    LeakyRelu,
    Sigmoid,
    Tanh,
    Exp,
    Log,
    Sqrt,
    Sin,
    Cos,
    Floor,
    Ceil,
    Clip,
    Identity,
    Add,
    Sub,
    Mul,
    Div,
    Pow,
    Max,
    Min,
    Pad,
    Transpose,
    Reshape,
    Slice,
    Concat,
    MatMul,
    Conv,
    MaxPool,
    AveragePool,
    ReduceSum,
    ReduceMean,
    ReduceMax,
    ReduceMin,
    ArgMax,
}

impl OpKind {
    /// Every kind, in declaration order.
    pub const ALL: [Self; 36] = [
        Self::Abs,
        Self::Neg,
        Self::Relu,
        Self::LeakyRelu,
        Self::Sigmoid,
        Self::Tanh,
        Self::Exp,
        Self::Log,
        Self::Sqrt,
        Self::Sin,
        Self::Cos,
        Self::Floor,
        Self::Ceil,
        Self::Clip,
        Self::Identity,
        Self::Add,
        Self::Sub,
        Self::Mul,
        Self::Div,
        Self::Pow,
        Self::Max,
        Self::Min,
        Self::Pad,
        Self::Transpose,
        Self::Reshape,
        Self::Slice,
        Self::Concat,
        Self::MatMul,
        Self::Conv,
        Self::MaxPool,
        Self::AveragePool,
        Self::ReduceSum,
        Self::ReduceMean,
        Self::ReduceMax,
        Self::ReduceMin,
        Self::ArgMax,
    ];

    /// ONNX op type name.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Abs => "Abs",
            Self::Neg => "Neg",
            Self::Relu => "Relu",
            Self::LeakyRelu => "LeakyRelu",
            Self::Sigmoid => "Sigmoid",
            Self::Tanh => "Tanh",
            Self::Exp => "Exp",
            Self::Log => "Log",
            Self::Sqrt => "Sqrt",
            Self::Sin => "Sin",
            Self::Cos => "Cos",
            Self::Floor => "Floor",
            Self::Ceil => "Ceil",
            Self::Clip => "Clip",
            Self::Identity => "Identity",
            Self::Add => "Add",
            Self::Sub => "Sub",
            Self::Mul => "Mul",
            Self::Div => "Div",
            Self::Pow => "Pow",
            Self::Max => "Max",
            Self::Min => "Min",
            Self::Pad => "Pad",
            Self::Transpose => "Transpose",
            Self::Reshape => "Reshape",
            Self::Slice => "Slice",
            Self::Concat => "Concat",
            Self::MatMul => "MatMul",
            Self::Conv => "Conv",
            Self::MaxPool => "MaxPool",
            Self::AveragePool => "AveragePool",
            Self::ReduceSum => "ReduceSum",
            Self::ReduceMean => "ReduceMean",
            Self::ReduceMax => "ReduceMax",
            Self::ReduceMin => "ReduceMin",
            Self::ArgMax => "ArgMax",
        }
    }

    /// Looks up a kind by ONNX op type.
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.name() == name)
    }
}

impl fmt::Display for OpKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Elementwise unary functions.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum UnaryOp {
    Abs,
    Neg,
    Relu,
    /// `x` for `x >= 0`, `alpha * x` otherwise.
    LeakyRelu { alpha: f32 },
    Sigmoid,
    Tanh,
    Exp,
    Log,
    Sqrt,
    Sin,
    Cos,
    Floor,
    Ceil,
    Clip { min: f32, max: f32 },
    Identity,
}

impl UnaryOp {
    #[must_use]
    pub const fn kind(self) -> OpKind {
        match self {
            Self::Abs => OpKind::Abs,
            Self::Neg => OpKind::Neg,
            Self::Relu => OpKind::Relu,
            Self::LeakyRelu { .. } => OpKind::LeakyRelu,
            Self::Sigmoid => OpKind::Sigmoid,
            Self::Tanh => OpKind::Tanh,
            Self::Exp => OpKind::Exp,
            Self::Log => OpKind::Log,
            Self::Sqrt => OpKind::Sqrt,
            Self::Sin => OpKind::Sin,
            Self::Cos => OpKind::Cos,
            Self::Floor => OpKind::Floor,
            Self::Ceil => OpKind::Ceil,
            Self::Clip { .. } => OpKind::Clip,
            Self::Identity => OpKind::Identity,
        }
    }

    /// Scalar reference implementation.
    #[must_use]
    pub fn apply(self, x: f32) -> f32 {
        match self {
            Self::Abs => x.abs(),
            Self::Neg => -x,
            Self::Relu => x.max(0.0),
            Self::LeakyRelu { alpha } => {
                if x >= 0.0 {
                    x
                } else {
                    alpha * x
                }
            }
            Self::Sigmoid => 1.0 / (1.0 + (-x).exp()),
            Self::Tanh => x.tanh(),
            Self::Exp => x.exp(),
            Self::Log => x.ln(),
            Self::Sqrt => x.sqrt(),
            Self::Sin => x.sin(),
            Self::Cos => x.cos(),
            Self::Floor => x.floor(),
            Self::Ceil => x.ceil(),
            Self::Clip { min, max } => x.max(min).min(max),
            Self::Identity => x,
        }
    }
}

/// Elementwise binary functions with multidirectional broadcasting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Pow,
    Max,
    Min,
}

impl BinaryOp {
    #[must_use]
    pub const fn kind(self) -> OpKind {
        match self {
            Self::Add => OpKind::Add,
            Self::Sub => OpKind::Sub,
            Self::Mul => OpKind::Mul,
            Self::Div => OpKind::Div,
            Self::Pow => OpKind::Pow,
            Self::Max => OpKind::Max,
            Self::Min => OpKind::Min,
        }
    }

    #[must_use]
    pub fn apply(self, a: f32, b: f32) -> f32 {
        match self {
            Self::Add => a + b,
            Self::Sub => a - b,
            Self::Mul => a * b,
            Self::Div => a / b,
            Self::Pow => a.powf(b),
            Self::Max => a.max(b),
            Self::Min => a.min(b),
        }
    }
}

/// Boundary policy of [`Pad`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum PadMode {
    /// Out-of-range elements take the fill value.
    #[default]
    Constant,
    /// Mirror around the edge without repeating it, period `2 * (extent - 1)`.
    Reflect,
    /// Replicate the nearest edge element.
    Edge,
}

impl FromStr for PadMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "constant" => Ok(Self::Constant),
            "reflect" => Ok(Self::Reflect),
            "edge" => Ok(Self::Edge),
            other => Err(Error::attribute(
                "Pad",
                "mode",
                format!("unknown mode `{other}`, expected constant, reflect or edge"),
            )),
        }
    }
}

impl fmt::Display for PadMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Constant => "constant",
            Self::Reflect => "reflect",
            Self::Edge => "edge",
        })
    }
}

/// Pad parameters. `pads` uses the ONNX layout
/// `[x1_begin, .., xn_begin, x1_end, .., xn_end]`; negative entries crop.
#[derive(Debug, Clone, PartialEq)]
pub struct Pad {
    pub mode: PadMode,
    pub pads: Vec<isize>,
    pub value: f32,
}

impl Pad {
    /// Parses `mode` and builds the descriptor.
    ///
    /// # Errors
    /// Returns [`Error::InvalidAttribute`] for an unknown mode, an odd
    /// number of pads or a pad outside the 32-bit range shaders index with.
    pub fn new(mode: &str, pads: Vec<isize>, value: f32) -> Result<Self> {
        let mode = mode.parse()?;
        if pads.len() % 2 != 0 {
            return Err(Error::attribute("Pad", "pads", format!("{} values is not an even count", pads.len())));
        }
        if let Some(p) = pads.iter().find(|&&p| i32::try_from(p).is_err()) {
            return Err(Error::attribute("Pad", "pads", format!("{p} does not fit in i32")));
        }
        Ok(Self { mode, pads, value })
    }

    /// `(begin, end)` halves of `pads`.
    #[must_use]
    pub fn halves(&self) -> (&[isize], &[isize]) {
        self.pads.split_at(self.pads.len() / 2)
    }
}

/// Slice parameters, resolved against the input shape by
/// [`crate::shape::resolve_slice`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Slice {
    pub starts: Vec<i64>,
    pub ends: Vec<i64>,
    pub axes: Option<Vec<isize>>,
    pub steps: Option<Vec<i64>>,
}

/// 2-D convolution over NCHW input with OIHW weights.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Conv {
    /// Taken from the weight shape when absent.
    pub kernel_shape: Option<Vec<usize>>,
    /// Empty means 1 on every spatial axis.
    pub strides: Vec<usize>,
    /// `[h_begin, w_begin, h_end, w_end]`; empty means no padding.
    pub pads: Vec<usize>,
    /// Empty means 1 on every spatial axis.
    pub dilations: Vec<usize>,
    pub group: usize,
    pub auto_pad: AutoPad,
}

impl Default for Conv {
    fn default() -> Self {
        Self {
            kernel_shape: None,
            strides: Vec::new(),
            pads: Vec::new(),
            dilations: Vec::new(),
            group: 1,
            auto_pad: AutoPad::NotSet,
        }
    }
}

/// Pooling reduction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PoolKind {
    Max,
    Average,
}

/// 2-D pooling over NCHW input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pool {
    pub kind: PoolKind,
    pub kernel_shape: Vec<usize>,
    pub strides: Vec<usize>,
    pub pads: Vec<usize>,
    pub auto_pad: AutoPad,
    /// Average pooling divides by the full window instead of the valid part.
    pub count_include_pad: bool,
}

/// Reduction function.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReduceOp {
    Sum,
    Mean,
    Max,
    Min,
}

/// Reduction over `axes` (all axes when empty).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reduce {
    pub op: ReduceOp,
    pub axes: Vec<isize>,
    pub keep_dims: bool,
}

/// An operator descriptor.
#[derive(Debug, Clone, PartialEq)]
pub enum Operator {
    Unary(UnaryOp),
    Binary(BinaryOp),
    Pad(Pad),
    /// `None` reverses the axes.
    Transpose { perm: Option<Vec<usize>> },
    /// ONNX target shape: `0` copies an input extent, one `-1` is inferred.
    Reshape { shape: Vec<i64> },
    Slice(Slice),
    Concat { axis: isize },
    MatMul,
    Conv(Conv),
    Pool(Pool),
    Reduce(Reduce),
    /// Index of the largest element along `axis`; produces `Int32`.
    ArgMax { axis: isize, keep_dims: bool },
}

impl Operator {
    #[must_use]
    pub const fn kind(&self) -> OpKind {
        match self {
            Self::Unary(op) => op.kind(),
            Self::Binary(op) => op.kind(),
            Self::Pad(_) => OpKind::Pad,
            Self::Transpose { .. } => OpKind::Transpose,
            Self::Reshape { .. } => OpKind::Reshape,
            Self::Slice(_) => OpKind::Slice,
            Self::Concat { .. } => OpKind::Concat,
            Self::MatMul => OpKind::MatMul,
            Self::Conv(_) => OpKind::Conv,
            Self::Pool(p) => match p.kind {
                PoolKind::Max => OpKind::MaxPool,
                PoolKind::Average => OpKind::AveragePool,
            },
            Self::Reduce(r) => match r.op {
                ReduceOp::Sum => OpKind::ReduceSum,
                ReduceOp::Mean => OpKind::ReduceMean,
                ReduceOp::Max => OpKind::ReduceMax,
                ReduceOp::Min => OpKind::ReduceMin,
            },
            Self::ArgMax { .. } => OpKind::ArgMax,
        }
    }

    #[must_use]
    pub const fn name(&self) -> &'static str {
        self.kind().name()
    }

    /// Checks the number of inputs the operator receives.
    ///
    /// # Errors
    /// Returns [`Error::InputCount`].
    pub fn check_inputs(&self, actual: usize) -> Result<()> {
        let (min, max) = match self {
            Self::Binary(_) | Self::MatMul => (2, 2),
            Self::Conv(_) => (2, 3),
            Self::Concat { .. } => (1, usize::MAX),
            _ => (1, 1),
        };
        if actual < min || actual > max {
            let expected = match (min, max) {
                (a, b) if a == b => a.to_string(),
                (a, usize::MAX) => format!("at least {a}"),
                (a, b) => format!("{a} to {b}"),
            };
            return Err(Error::inputs(self.name(), expected, actual));
        }
        Ok(())
    }

    /// Builds a descriptor from a graph node.
    ///
    /// # Errors
    /// Returns [`Error::UnsupportedOperator`] for unknown op types and
    /// [`Error::InvalidAttribute`] for missing or malformed attributes.
    pub fn from_node(op_type: &str, attrs: &Attributes) -> Result<Self> {
        let kind = OpKind::from_name(op_type).ok_or_else(|| Error::UnsupportedOperator {
            op: op_type.to_owned(),
            backend: "any".to_owned(),
        })?;
        let op = kind.name();
        let required = |name: &'static str| {
            attrs
                .ints(op, name)?
                .ok_or_else(|| Error::attribute(op, name, "required attribute is missing"))
        };
        Ok(match kind {
            OpKind::Abs => Self::Unary(UnaryOp::Abs),
            OpKind::Neg => Self::Unary(UnaryOp::Neg),
            OpKind::Relu => Self::Unary(UnaryOp::Relu),
            OpKind::LeakyRelu => Self::Unary(UnaryOp::LeakyRelu {
                alpha: attrs.float(op, "alpha", 0.01)?,
            }),
            OpKind::Sigmoid => Self::Unary(UnaryOp::Sigmoid),
            OpKind::Tanh => Self::Unary(UnaryOp::Tanh),
            OpKind::Exp => Self::Unary(UnaryOp::Exp),
            OpKind::Log => Self::Unary(UnaryOp::Log),
            OpKind::Sqrt => Self::Unary(UnaryOp::Sqrt),
            OpKind::Sin => Self::Unary(UnaryOp::Sin),
            OpKind::Cos => Self::Unary(UnaryOp::Cos),
            OpKind::Floor => Self::Unary(UnaryOp::Floor),
            OpKind::Ceil => Self::Unary(UnaryOp::Ceil),
            OpKind::Clip => {
                let min = attrs.float(op, "min", f32::NEG_INFINITY)?;
                let max = attrs.float(op, "max", f32::INFINITY)?;
                if min > max {
                    return Err(Error::attribute(op, "min", format!("{min} exceeds max {max}")));
                }
                Self::Unary(UnaryOp::Clip { min, max })
            }
            OpKind::Identity => Self::Unary(UnaryOp::Identity),
            OpKind::Add => Self::Binary(BinaryOp::Add),
            OpKind::Sub => Self::Binary(BinaryOp::Sub),
            OpKind::Mul => Self::Binary(BinaryOp::Mul),
            OpKind::Div => Self::Binary(BinaryOp::Div),
            OpKind::Pow => Self::Binary(BinaryOp::Pow),
            OpKind::Max => Self::Binary(BinaryOp::Max),
            OpKind::Min => Self::Binary(BinaryOp::Min),
            OpKind::Pad => Self::Pad(Pad::new(
                attrs.string(op, "mode", "constant")?,
                attrs
                    .offsets(op, "pads")?
                    .ok_or_else(|| Error::attribute(op, "pads", "required attribute is missing"))?,
                attrs.float(op, "value", 0.0)?,
            )?),
            OpKind::Transpose => Self::Transpose {
                perm: attrs.extents(op, "perm")?,
            },
            OpKind::Reshape => Self::Reshape {
                shape: required("shape")?,
            },
            OpKind::Slice => Self::Slice(Slice {
                starts: required("starts")?,
                ends: required("ends")?,
                axes: attrs.offsets(op, "axes")?,
                steps: attrs.ints(op, "steps")?,
            }),
            OpKind::Concat => Self::Concat {
                axis: attrs
                    .get("axis")
                    .ok_or_else(|| Error::attribute(op, "axis", "required attribute is missing"))
                    .and_then(|_| attrs.int(op, "axis", 0))? as isize,
            },
            OpKind::MatMul => Self::MatMul,
            OpKind::Conv => {
                let group = attrs.int(op, "group", 1)?;
                if group < 1 {
                    return Err(Error::attribute(op, "group", format!("{group} is not positive")));
                }
                Self::Conv(Conv {
                    kernel_shape: attrs.extents(op, "kernel_shape")?,
                    strides: attrs.extents(op, "strides")?.unwrap_or_default(),
                    pads: attrs.extents(op, "pads")?.unwrap_or_default(),
                    dilations: attrs.extents(op, "dilations")?.unwrap_or_default(),
                    group: group as usize,
                    auto_pad: attrs.string(op, "auto_pad", "NOTSET")?.parse()?,
                })
            }
            OpKind::MaxPool | OpKind::AveragePool => Self::Pool(Pool {
                kind: if kind == OpKind::MaxPool {
                    PoolKind::Max
                } else {
                    PoolKind::Average
                },
                kernel_shape: attrs
                    .extents(op, "kernel_shape")?
                    .ok_or_else(|| Error::attribute(op, "kernel_shape", "required attribute is missing"))?,
                strides: attrs.extents(op, "strides")?.unwrap_or_default(),
                pads: attrs.extents(op, "pads")?.unwrap_or_default(),
                auto_pad: attrs.string(op, "auto_pad", "NOTSET")?.parse()?,
                count_include_pad: attrs.int(op, "count_include_pad", 0)? != 0,
            }),
            OpKind::ReduceSum | OpKind::ReduceMean | OpKind::ReduceMax | OpKind::ReduceMin => {
                Self::Reduce(Reduce {
                    op: match kind {
                        OpKind::ReduceSum => ReduceOp::Sum,
                        OpKind::ReduceMean => ReduceOp::Mean,
                        OpKind::ReduceMax => ReduceOp::Max,
                        _ => ReduceOp::Min,
                    },
                    axes: attrs.offsets(op, "axes")?.unwrap_or_default(),
                    keep_dims: attrs.int(op, "keepdims", 1)? != 0,
                })
            }
            OpKind::ArgMax => Self::ArgMax {
                axis: attrs.int(op, "axis", 0)? as isize,
                keep_dims: attrs.int(op, "keepdims", 1)? != 0,
            },
        })
    }
}
