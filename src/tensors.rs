//! Core tensor data structures.
//!
//! # Tensor Boundary
//!
//! Tensors are the values exchanged with the external graph executor. They are
//! immutable once built: a dense, row-major buffer plus its `dims` and a
//! [`DataType`] tag. GPU-side copies (textures) are derived from tensors and
//! never authoritative.
//!
//! ## Design Highlights
//! - Every tensor carries a process-unique [`TensorId`]; clones share the id
//!   because they share the (immutable) data. Texture caches key on it.
//! - Data arriving from the graph boundary is checked with `briny`'s
//!   [`Validate`] / [`TrustedData`] before a tensor is built.
//! - The `tensor!` macro supports ergonomic float tensor literals.
//!
//! ## Example
//!
//! ```rust
//! use briny_texel::tensors::Tensor;
//! let t = Tensor::new(vec![2, 3], vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
//! assert_eq!(t.dims(), &[2, 3]);
//! ```

use briny::prelude::{TrustedData, Validate, ValidationError};
use core::fmt;
use core::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::shape;

static NEXT_TENSOR_ID: AtomicU64 = AtomicU64::new(1);

/// Element type tag of a tensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DataType {
    /// 32-bit IEEE float.
    Float32,
    /// 32-bit signed integer.
    Int32,
    /// Boolean.
    Bool,
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Float32 => write!(f, "float32"),
            Self::Int32 => write!(f, "int32"),
            Self::Bool => write!(f, "bool"),
        }
    }
}

/// Flat backing buffer of a tensor.
#[derive(Debug, Clone, PartialEq)]
pub enum TensorData {
    Float32(Vec<f32>),
    Int32(Vec<i32>),
    Bool(Vec<bool>),
}

impl TensorData {
    /// Number of stored elements.
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Self::Float32(v) => v.len(),
            Self::Int32(v) => v.len(),
            Self::Bool(v) => v.len(),
        }
    }

    /// Returns `true` when no elements are stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Type tag of the buffer.
    #[must_use]
    pub const fn data_type(&self) -> DataType {
        match self {
            Self::Float32(_) => DataType::Float32,
            Self::Int32(_) => DataType::Int32,
            Self::Bool(_) => DataType::Bool,
        }
    }

    /// Converts to the f32 representation stored in textures.
    ///
    /// Integers are exact up to 2^24; booleans become 0 or 1.
    #[must_use]
    pub fn to_f32(&self) -> Vec<f32> {
        match self {
            Self::Float32(v) => v.clone(),
            Self::Int32(v) => v.iter().map(|&x| x as f32).collect(),
            Self::Bool(v) => v.iter().map(|&b| if b { 1.0 } else { 0.0 }).collect(),
        }
    }

    /// Rebuilds a buffer of `data_type` from texture values.
    #[must_use]
    pub fn from_f32(data_type: DataType, values: Vec<f32>) -> Self {
        match data_type {
            DataType::Float32 => Self::Float32(values),
            DataType::Int32 => Self::Int32(values.iter().map(|x| x.round() as i32).collect()),
            DataType::Bool => Self::Bool(values.iter().map(|&x| x != 0.0).collect()),
        }
    }
}

/// Process-unique identity of a tensor's data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TensorId(u64);

impl TensorId {
    /// Raw integer value of the id.
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

/// Represents an N-dimensional tensor with positive dims and flat row-major data.
#[derive(Debug, Clone)]
pub struct Tensor {
    id: TensorId,
    dims: Vec<usize>,
    data: Arc<TensorData>,
}

impl PartialEq for Tensor {
    fn eq(&self, other: &Self) -> bool {
        self.dims == other.dims && self.data == other.data
    }
}

/// Unchecked tensor parts as received from the graph boundary.
struct PackedTensor {
    dims: Vec<usize>,
    data: TensorData,
}

impl Validate for PackedTensor {
    fn validate(&self) -> core::result::Result<(), ValidationError> {
        if self.dims.contains(&0) {
            return Err(ValidationError);
        }
        if shape::size(&self.dims) != self.data.len() {
            return Err(ValidationError);
        }
        Ok(())
    }
}

impl Tensor {
    /// Creates a new float tensor with the given dims and flat data.
    ///
    /// # Panics
    /// Panics if the number of elements does not match the dims product or a
    /// dimension is zero. Use [`Tensor::from_data`] for untrusted input.
    pub fn new(dims: impl Into<Vec<usize>>, data: Vec<f32>) -> Self {
        let dims = dims.into();
        assert!(!dims.contains(&0), "dims {dims:?} contain a zero extent");
        assert_eq!(
            shape::size(&dims),
            data.len(),
            "dims {:?} are incompatible with {} data elements",
            dims,
            data.len()
        );
        Self::from_parts(dims, TensorData::Float32(data))
    }

    /// Creates a tensor from untrusted dims and data.
    ///
    /// # Errors
    /// Returns [`Error::InvalidTensor`] when a dimension is zero or the buffer
    /// length differs from the dims product.
    pub fn from_data(dims: impl Into<Vec<usize>>, data: TensorData) -> Result<Self> {
        let dims = dims.into();
        let len = data.len();
        let trusted = TrustedData::new(PackedTensor { dims, data }).map_err(|_| {
            Error::InvalidTensor(format!("{len} elements do not form a tensor of positive dims"))
        })?;
        let PackedTensor { dims, data } = trusted.into_inner();
        shape::validate_dims(&dims)?;
        Ok(Self::from_parts(dims, data))
    }

    fn from_parts(dims: Vec<usize>, data: TensorData) -> Self {
        Self {
            id: TensorId(NEXT_TENSOR_ID.fetch_add(1, Ordering::Relaxed)),
            dims,
            data: Arc::new(data),
        }
    }

    /// Identity used to cache derived device copies.
    #[must_use]
    pub const fn id(&self) -> TensorId {
        self.id
    }

    /// The ordered dimension sizes.
    #[must_use]
    pub fn dims(&self) -> &[usize] {
        &self.dims
    }

    /// Number of axes.
    #[must_use]
    pub fn rank(&self) -> usize {
        self.dims.len()
    }

    /// Number of elements.
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Tensors always hold at least one element.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Element type tag.
    #[must_use]
    pub fn data_type(&self) -> DataType {
        self.data.data_type()
    }

    /// The backing buffer.
    #[must_use]
    pub fn data(&self) -> &TensorData {
        &self.data
    }

    /// Float view of the data, if this is a float tensor.
    #[must_use]
    pub fn as_f32(&self) -> Option<&[f32]> {
        match &*self.data {
            TensorData::Float32(v) => Some(v),
            _ => None,
        }
    }

    /// Values as f32, converting integer and boolean data.
    #[must_use]
    pub fn to_f32_vec(&self) -> Vec<f32> {
        self.data.to_f32()
    }
}

/// Defines a float tensor from nested literal arrays.
///
/// Supports arbitrary dimensionality as long as sublists are uniform in shape.
///
/// # Example
/// ```
/// use briny_texel::tensor;
/// let t = tensor!([[1.0, 2.0], [3.0, 4.0]]);
/// assert_eq!(t.dims(), &[2, 2]);
/// ```
#[macro_export]
macro_rules! tensor {
    ($lit:literal) => {
        $crate::tensors::Tensor::new(Vec::<usize>::new(), vec![$lit as f32])
    };

    ([ $( $inner:tt ),+ $(,)? ]) => {{
        let children = vec![ $( $crate::tensor!($inner) ),+ ];
        let first = children[0].dims().to_vec();
        assert!(children.iter().all(|c| c.dims() == first.as_slice()),
            "ragged tensor literal (rows have mismatched shapes)");
        let mut dims = vec![children.len()];
        dims.extend_from_slice(&first);
        let mut data = Vec::with_capacity(children.len() * children[0].len());
        for c in &children { data.extend(c.to_f32_vec()); }
        $crate::tensors::Tensor::new(dims, data)
    }};
}
