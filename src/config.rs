//! Execution environment configuration.
//!
//! An [`Environment`] is built once, validated, and handed to
//! [`crate::backend::BackendRegistry::with_defaults`]. Nothing reads
//! configuration from global state afterwards; two registries with different
//! environments coexist in one process.
//!
//! # Option Surface
//!
//! - `backend.hint`: ordered backend names to try (`webgl`, `wasm`, `cpu`)
//! - `backend.cpu`: no options
//! - `backend.wasm`: `worker` pool size and `cpu_fallback`
//! - `backend.webgl`: texture backend knobs (limits, packing, caches)
//! - `debug`: logs every generated program's source at `info`
//!
//! # Environment Variables
//!
//! [`Environment::from_env`] overlays these on top of the defaults:
//!
//! | variable                   | field                                    |
//! |----------------------------|------------------------------------------|
//! | `BRINY_TEXEL_BACKEND`      | `backend.hint` (comma separated)         |
//! | `BRINY_TEXEL_WORKERS`      | `backend.wasm.worker`                    |
//! | `BRINY_TEXEL_CPU_FALLBACK` | `cpu_fallback` of `wasm` and `webgl`     |
//! | `BRINY_TEXEL_MAX_TEXTURE`  | `backend.webgl.max_texture_size`         |
//! | `BRINY_TEXEL_DEBUG`        | `debug`                                  |

use crate::error::{Error, Result};
use crate::layout::Packing;

/// Default backend preference order.
pub const DEFAULT_HINTS: [&str; 3] = ["webgl", "wasm", "cpu"];

/// Default maximum texture extent, per axis.
pub const DEFAULT_MAX_TEXTURE_SIZE: usize = 8192;

/// Default number of compiled programs kept per texture backend.
pub const DEFAULT_PROGRAM_CACHE_CAPACITY: usize = 256;

/// How long uploaded and produced textures stay cached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CacheScope {
    /// Evicted at every run boundary.
    #[default]
    Run,
    /// Kept until explicitly released with
    /// [`crate::texture::InferenceHandler::release`]. Nothing is evicted
    /// automatically: every tensor uploaded or produced stays on the device,
    /// so long-lived sessions must release what they no longer need.
    Process,
}

/// Options of the CPU backend (none).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CpuOptions {}

/// Options of the worker-pool backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WasmOptions {
    /// Worker threads; `0` runs on a single thread.
    pub worker: usize,
    /// Route operators this backend lacks to the CPU backend.
    pub cpu_fallback: bool,
}

impl Default for WasmOptions {
    fn default() -> Self {
        Self {
            worker: 0,
            cpu_fallback: true,
        }
    }
}

/// Options of the texture backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GpuOptions {
    /// Upper bound on texture width and height; the device limit applies
    /// when lower.
    pub max_texture_size: usize,
    /// Packing of uploaded inputs. Outputs are always unpacked.
    pub packing: Packing,
    pub program_cache_capacity: usize,
    /// Route operators without a texture program to the CPU backend.
    pub cpu_fallback: bool,
    pub texture_cache: CacheScope,
    /// Use a hardware device when one is compiled in and available.
    pub prefer_gpu_device: bool,
}

impl Default for GpuOptions {
    fn default() -> Self {
        Self {
            max_texture_size: DEFAULT_MAX_TEXTURE_SIZE,
            packing: Packing::Unpacked,
            program_cache_capacity: DEFAULT_PROGRAM_CACHE_CAPACITY,
            cpu_fallback: true,
            texture_cache: CacheScope::Run,
            prefer_gpu_device: true,
        }
    }
}

/// Per-backend options plus the preference order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendOptions {
    pub hint: Vec<String>,
    pub cpu: CpuOptions,
    pub webgl: GpuOptions,
    pub wasm: WasmOptions,
}

impl Default for BackendOptions {
    fn default() -> Self {
        Self {
            hint: DEFAULT_HINTS.iter().map(|h| (*h).to_owned()).collect(),
            cpu: CpuOptions::default(),
            webgl: GpuOptions::default(),
            wasm: WasmOptions::default(),
        }
    }
}

/// Immutable configuration of one execution context.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Environment {
    pub backend: BackendOptions,
    pub debug: bool,
}

fn parse_bool(name: &str, value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(Error::InvalidConfig(format!("{name}: `{other}` is not a boolean"))),
    }
}

fn parse_count(name: &str, value: &str) -> Result<usize> {
    value
        .trim()
        .parse()
        .map_err(|_| Error::InvalidConfig(format!("{name}: `{value}` is not a non-negative integer")))
}

impl Environment {
    /// Defaults overlaid with the `BRINY_TEXEL_*` process variables.
    ///
    /// # Errors
    /// Returns [`Error::InvalidConfig`] for unparsable values.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Defaults overlaid with variables supplied by `lookup`.
    ///
    /// # Errors
    /// Returns [`Error::InvalidConfig`] for unparsable values.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut env = Self::default();
        if let Some(hints) = lookup("BRINY_TEXEL_BACKEND") {
            env.backend.hint = hints
                .split(',')
                .map(str::trim)
                .filter(|h| !h.is_empty())
                .map(str::to_owned)
                .collect();
        }
        if let Some(workers) = lookup("BRINY_TEXEL_WORKERS") {
            env.backend.wasm.worker = parse_count("BRINY_TEXEL_WORKERS", &workers)?;
        }
        if let Some(fallback) = lookup("BRINY_TEXEL_CPU_FALLBACK") {
            let fallback = parse_bool("BRINY_TEXEL_CPU_FALLBACK", &fallback)?;
            env.backend.wasm.cpu_fallback = fallback;
            env.backend.webgl.cpu_fallback = fallback;
        }
        if let Some(size) = lookup("BRINY_TEXEL_MAX_TEXTURE") {
            env.backend.webgl.max_texture_size = parse_count("BRINY_TEXEL_MAX_TEXTURE", &size)?;
        }
        if let Some(debug) = lookup("BRINY_TEXEL_DEBUG") {
            env.debug = parse_bool("BRINY_TEXEL_DEBUG", &debug)?;
        }
        env.validate()?;
        Ok(env)
    }

    /// Rejects option combinations no backend can honour.
    ///
    /// # Errors
    /// Returns [`Error::InvalidConfig`].
    pub fn validate(&self) -> Result<()> {
        let gpu = &self.backend.webgl;
        if gpu.max_texture_size == 0 {
            return Err(Error::InvalidConfig("max_texture_size must be positive".into()));
        }
        if gpu.program_cache_capacity == 0 {
            return Err(Error::InvalidConfig("program_cache_capacity must be positive".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
            .collect();
        move |name| vars.get(name).cloned()
    }

    #[test]
    fn defaults_prefer_texture_backend() {
        let env = Environment::default();
        assert_eq!(env.backend.hint, vec!["webgl", "wasm", "cpu"]);
        assert_eq!(env.backend.wasm, WasmOptions { worker: 0, cpu_fallback: true });
        assert!(!env.debug);
    }

    #[test]
    fn variables_overlay_defaults() {
        let env = Environment::from_lookup(lookup(&[
            ("BRINY_TEXEL_BACKEND", "wasm, cpu"),
            ("BRINY_TEXEL_WORKERS", "4"),
            ("BRINY_TEXEL_CPU_FALLBACK", "off"),
            ("BRINY_TEXEL_DEBUG", "1"),
        ]))
        .unwrap();
        assert_eq!(env.backend.hint, vec!["wasm", "cpu"]);
        assert_eq!(env.backend.wasm.worker, 4);
        assert!(!env.backend.wasm.cpu_fallback && !env.backend.webgl.cpu_fallback);
        assert!(env.debug);
    }

    #[test]
    fn invalid_values_are_configuration_errors() {
        assert!(Environment::from_lookup(lookup(&[("BRINY_TEXEL_WORKERS", "-1")])).is_err());
        assert!(Environment::from_lookup(lookup(&[("BRINY_TEXEL_MAX_TEXTURE", "0")])).is_err());
        assert!(Environment::from_lookup(lookup(&[("BRINY_TEXEL_DEBUG", "maybe")])).is_err());
    }
}
