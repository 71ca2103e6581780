//! Backend registry.
//!
//! Built from an [`Environment`]: backends are initialised in hint order,
//! skipping unknown names and backends whose initialisation fails. The first
//! one that comes up is the session backend. Operators it lacks go to the
//! CPU backend when the session backend's `cpu_fallback` option allows it,
//! and are reported as unsupported otherwise. Resolution happens before any
//! computation starts.

use log::{debug, info, warn};

use crate::config::Environment;
use crate::error::{Error, Result};
use crate::ops::{OpKind, Operator};
use crate::tensors::Tensor;
use crate::texture::TextureBackend;

use super::{Backend, BackendKind, CpuBackend, NativeBackend};

/// Where an operator runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Resolution {
    pub backend: BackendKind,
    /// `true` when the session backend lacked the operator.
    pub fallback: bool,
}

/// Owns the initialised backends of one execution context.
pub struct BackendRegistry {
    backends: Vec<Box<dyn Backend>>,
    cpu_fallback: bool,
}

fn init_backend(kind: BackendKind, env: &Environment) -> Result<Box<dyn Backend>> {
    Ok(match kind {
        BackendKind::Cpu => Box::new(CpuBackend::new()),
        BackendKind::Texture => Box::new(TextureBackend::new(&env.backend.webgl, env.debug)?),
        BackendKind::Native => Box::new(NativeBackend::new(&env.backend.wasm)?),
    })
}

/// The `cpu_fallback` option governing `kind` as session backend.
const fn fallback_option(kind: BackendKind, env: &Environment) -> bool {
    match kind {
        BackendKind::Cpu => false,
        BackendKind::Texture => env.backend.webgl.cpu_fallback,
        BackendKind::Native => env.backend.wasm.cpu_fallback,
    }
}

impl BackendRegistry {
    /// Initialises the hinted backends of `env`.
    ///
    /// # Errors
    /// [`Error::InvalidConfig`] for an invalid environment and
    /// [`Error::NoBackend`] when no hinted backend initialises.
    pub fn with_defaults(env: &Environment) -> Result<Self> {
        env.validate()?;
        let mut backends: Vec<Box<dyn Backend>> = Vec::new();
        for hint in &env.backend.hint {
            let kind = match hint.parse::<BackendKind>() {
                Ok(kind) => kind,
                Err(_) => {
                    warn!("skipping unknown backend hint `{hint}`");
                    continue;
                }
            };
            if backends.iter().any(|b| b.kind() == kind) {
                continue;
            }
            match init_backend(kind, env) {
                Ok(backend) => {
                    info!("backend `{kind}` initialised");
                    backends.push(backend);
                }
                Err(e) => warn!("backend `{kind}` failed to initialise: {e}"),
            }
        }
        let Some(session) = backends.first().map(|b| b.kind()) else {
            return Err(Error::NoBackend {
                hints: env.backend.hint.clone(),
            });
        };
        let cpu_fallback = fallback_option(session, env);
        if cpu_fallback && !backends.iter().any(|b| b.kind() == BackendKind::Cpu) {
            backends.push(Box::new(CpuBackend::new()));
        }
        Ok(Self {
            backends,
            cpu_fallback,
        })
    }

    /// A registry over explicit backends; the first is the session backend.
    ///
    /// # Errors
    /// [`Error::NoBackend`] when `backends` is empty.
    pub fn with_backends(backends: Vec<Box<dyn Backend>>, cpu_fallback: bool) -> Result<Self> {
        if backends.is_empty() {
            return Err(Error::NoBackend { hints: Vec::new() });
        }
        Ok(Self {
            backends,
            cpu_fallback,
        })
    }

    /// Kind of the session backend.
    #[must_use]
    pub fn session_kind(&self) -> BackendKind {
        self.backends[0].kind()
    }

    /// Kinds of every initialised backend, session backend first.
    #[must_use]
    pub fn kinds(&self) -> Vec<BackendKind> {
        self.backends.iter().map(|b| b.kind()).collect()
    }

    fn position(&self, kind: BackendKind) -> Option<usize> {
        self.backends.iter().position(|b| b.kind() == kind)
    }

    /// Picks the backend for `kind`.
    ///
    /// # Errors
    /// [`Error::UnsupportedOperator`] naming the session backend when it
    /// lacks `kind` and fallback is disabled or unavailable.
    pub fn resolve(&self, kind: OpKind) -> Result<Resolution> {
        let session = &self.backends[0];
        if session.supports(kind) {
            return Ok(Resolution {
                backend: session.kind(),
                fallback: false,
            });
        }
        let cpu = self
            .position(BackendKind::Cpu)
            .filter(|&i| self.backends[i].supports(kind));
        if self.cpu_fallback && cpu.is_some() {
            warn!("{kind} falls back from `{}` to `cpu`", session.kind());
            return Ok(Resolution {
                backend: BackendKind::Cpu,
                fallback: true,
            });
        }
        Err(Error::UnsupportedOperator {
            op: kind.name().to_owned(),
            backend: session.kind().name().to_owned(),
        })
    }

    /// Resolves and executes `op`.
    ///
    /// # Errors
    /// Resolution errors and any error of the chosen backend.
    pub fn run(&mut self, op: &Operator, inputs: &[Tensor]) -> Result<Vec<Tensor>> {
        let resolution = self.resolve(op.kind())?;
        debug!("{} runs on `{}`", op.name(), resolution.backend);
        let i = self
            .position(resolution.backend)
            .ok_or_else(|| Error::Internal(format!("resolved backend `{}` is missing", resolution.backend)))?;
        self.backends[i].run(op, inputs)
    }

    /// Marks the run boundary on every backend.
    ///
    /// # Errors
    /// The first error any backend reports; all backends are still visited.
    pub fn end_run(&mut self) -> Result<()> {
        let mut failure = None;
        for backend in &mut self.backends {
            if let Err(e) = backend.end_run() {
                failure.get_or_insert(e);
            }
        }
        failure.map_or(Ok(()), Err)
    }
}

impl core::fmt::Debug for BackendRegistry {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("BackendRegistry")
            .field("backends", &self.kinds())
            .field("cpu_fallback", &self.cpu_fallback)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GpuOptions;

    fn env(hints: &[&str]) -> Environment {
        let mut env = Environment::default();
        env.backend.hint = hints.iter().map(|h| (*h).to_owned()).collect();
        env.backend.webgl = GpuOptions {
            prefer_gpu_device: false,
            ..GpuOptions::default()
        };
        env
    }

    #[test]
    fn first_hint_is_session_backend() {
        let registry = BackendRegistry::with_defaults(&env(&["wasm", "webgl"])).unwrap();
        assert_eq!(registry.session_kind(), BackendKind::Native);
        assert_eq!(
            registry.kinds(),
            vec![BackendKind::Native, BackendKind::Texture, BackendKind::Cpu]
        );
    }

    #[test]
    fn unknown_hints_are_skipped() {
        let registry = BackendRegistry::with_defaults(&env(&["cuda", "cpu"])).unwrap();
        assert_eq!(registry.kinds(), vec![BackendKind::Cpu]);
        let err = BackendRegistry::with_defaults(&env(&["cuda"])).unwrap_err();
        assert!(matches!(err, Error::NoBackend { .. }));
    }

    #[test]
    fn resolution_follows_session_fallback_option() {
        let registry = BackendRegistry::with_defaults(&env(&["webgl"])).unwrap();
        assert_eq!(
            registry.resolve(OpKind::ArgMax).unwrap(),
            Resolution { backend: BackendKind::Cpu, fallback: true }
        );
        assert_eq!(
            registry.resolve(OpKind::Pad).unwrap(),
            Resolution { backend: BackendKind::Texture, fallback: false }
        );

        let mut strict = env(&["webgl"]);
        strict.backend.webgl.cpu_fallback = false;
        let registry = BackendRegistry::with_defaults(&strict).unwrap();
        assert!(matches!(
            registry.resolve(OpKind::ArgMax),
            Err(Error::UnsupportedOperator { ref backend, .. }) if backend == "webgl"
        ));
    }
}
