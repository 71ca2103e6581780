//! Error taxonomy of the execution core.
//!
//! Every failure the core can report is one [`Error`] variant, and every
//! variant belongs to exactly one [`ErrorCategory`]:
//!
//! - **Configuration**: invalid operator parameters or shapes, caught while
//!   building program info and before any device resource is touched.
//! - **Resource**: texture/program allocation failures and device limits,
//!   raised while creating run data or dispatching.
//! - **Unsupported**: no backend can execute the requested operator.
//! - **Internal**: a generated program failed validation or compilation. This
//!   is always a generator defect and is never retried or degraded.
//!
//! Errors propagate synchronously to the immediate caller; nothing in the
//! core retries on its own.

use core::fmt;

/// Convenience alias used throughout the crate.
pub type Result<T> = core::result::Result<T, Error>;

/// Coarse classification of an [`Error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Invalid parameters, shapes or configuration.
    Configuration,
    /// Device allocation or size-limit failure.
    Resource,
    /// No implementation available for the requested operator.
    Unsupported,
    /// Generator or printer defect.
    Internal,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Configuration => write!(f, "configuration"),
            Self::Resource => write!(f, "resource"),
            Self::Unsupported => write!(f, "unsupported"),
            Self::Internal => write!(f, "internal"),
        }
    }
}

/// All errors reported by `briny_texel`.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// An operator attribute is missing or has an invalid value.
    #[error("invalid attribute `{name}` for {op}: {reason}")]
    InvalidAttribute {
        op: &'static str,
        name: &'static str,
        reason: String,
    },

    /// A shape is not acceptable for the requested computation.
    #[error("invalid shape {dims:?}: {reason}")]
    InvalidShape { dims: Vec<usize>, reason: String },

    /// An operator received the wrong number of inputs.
    #[error("{op} expects {expected} input(s), got {actual}")]
    InputCount {
        op: &'static str,
        expected: String,
        actual: usize,
    },

    /// Tensor data does not agree with its declared shape or type.
    #[error("invalid tensor: {0}")]
    InvalidTensor(String),

    /// Environment or backend options are invalid.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// A texture would exceed the device's maximum 2D extent.
    #[error("texture of {width}x{height} texels exceeds the device limit of {limit}")]
    TextureTooLarge {
        width: usize,
        height: usize,
        limit: usize,
    },

    /// The device failed to allocate, upload, read or dispatch.
    #[error("device error: {0}")]
    Device(String),

    /// A texture or program handle no longer refers to a live resource.
    #[error("stale {kind} handle {index}")]
    StaleHandle { kind: &'static str, index: u32 },

    /// No backend implements the operator and fallback is unavailable.
    #[error("operator {op} is not supported by the {backend} backend")]
    UnsupportedOperator { op: String, backend: String },

    /// None of the hinted backends could be initialised.
    #[error("no backend available for hints {hints:?}")]
    NoBackend { hints: Vec<String> },

    /// A generated program is malformed.
    #[error("generated program `{program}` is invalid: {reason}")]
    ShaderValidation { program: String, reason: String },

    /// Any other broken internal invariant.
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Returns the category this error belongs to.
    #[must_use]
    pub const fn category(&self) -> ErrorCategory {
        match self {
            Self::InvalidAttribute { .. }
            | Self::InvalidShape { .. }
            | Self::InputCount { .. }
            | Self::InvalidTensor(_)
            | Self::InvalidConfig(_) => ErrorCategory::Configuration,
            Self::TextureTooLarge { .. } | Self::Device(_) | Self::StaleHandle { .. } => {
                ErrorCategory::Resource
            }
            Self::UnsupportedOperator { .. } | Self::NoBackend { .. } => {
                ErrorCategory::Unsupported
            }
            Self::ShaderValidation { .. } | Self::Internal(_) => ErrorCategory::Internal,
        }
    }

    pub(crate) fn attribute(op: &'static str, name: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidAttribute {
            op,
            name,
            reason: reason.into(),
        }
    }

    pub(crate) fn shape(dims: &[usize], reason: impl Into<String>) -> Self {
        Self::InvalidShape {
            dims: dims.to_vec(),
            reason: reason.into(),
        }
    }

    pub(crate) fn inputs(op: &'static str, expected: impl Into<String>, actual: usize) -> Self {
        Self::InputCount {
            op,
            expected: expected.into(),
            actual,
        }
    }
}
