//! Backend selection module.
//!
//! Defines the execution targets an operator can run on and the registry
//! that picks one per operator.
//!
//! # Supported Backends
//!
//! - `Cpu` (`cpu`): host kernels parallelised with `rayon`; implements every
//!   operator the other backends may lack and serves as the fallback.
//! - `Texture` (`webgl`): generated shader programs over texture-encoded
//!   tensors, see [`crate::texture`].
//! - `Native` (`wasm`): a fixed-size worker pool running the hot host
//!   kernels.
//!
//! Backends are values owned by a [`BackendRegistry`], built from an
//! explicit [`crate::config::Environment`]. There is no process-wide
//! "current backend".

pub mod cpu;
pub mod native;
pub mod registry;

use core::fmt;
use core::str::FromStr;

use crate::error::{Error, Result};
use crate::ops::{OpKind, Operator};
use crate::tensors::Tensor;

pub use self::cpu::CpuBackend;
pub use self::native::NativeBackend;
pub use self::registry::{BackendRegistry, Resolution};

/// Enumeration of the computation backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackendKind {
    /// Host kernels.
    Cpu,
    /// Texture-backed shader programs.
    Texture,
    /// Worker-pool host kernels.
    Native,
}

impl BackendKind {
    /// The canonical hint name.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Cpu => "cpu",
            Self::Texture => "webgl",
            Self::Native => "wasm",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for BackendKind {
    type Err = Error;

    /// Case-insensitive; accepts the aliases `gpu`/`texture` and `native`.
    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "cpu" => Ok(Self::Cpu),
            "webgl" | "gpu" | "texture" => Ok(Self::Texture),
            "wasm" | "native" => Ok(Self::Native),
            other => Err(Error::InvalidConfig(format!("unknown backend `{other}`"))),
        }
    }
}

/// An execution target for operators.
pub trait Backend {
    fn kind(&self) -> BackendKind;

    /// Whether this backend implements `kind`.
    fn supports(&self, kind: OpKind) -> bool;

    /// Executes `op` over `inputs`.
    ///
    /// # Errors
    /// Configuration errors for invalid inputs, resource errors from the
    /// device, and [`Error::UnsupportedOperator`] for unimplemented kinds.
    fn run(&mut self, op: &Operator, inputs: &[Tensor]) -> Result<Vec<Tensor>>;

    /// Marks the end of an inference run.
    ///
    /// # Errors
    /// Resource errors while releasing run-scoped state.
    fn end_run(&mut self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hint_names_parse_case_insensitively() {
        assert_eq!("WebGL".parse::<BackendKind>().unwrap(), BackendKind::Texture);
        assert_eq!("gpu".parse::<BackendKind>().unwrap(), BackendKind::Texture);
        assert_eq!("native".parse::<BackendKind>().unwrap(), BackendKind::Native);
        assert_eq!(" cpu ".parse::<BackendKind>().unwrap(), BackendKind::Cpu);
        assert!("cuda".parse::<BackendKind>().is_err());
        assert_eq!(BackendKind::Native.to_string(), "wasm");
    }
}
