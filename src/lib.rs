//! briny_texel: a texture-addressed execution core for neural network inference.
//!
//! Tensors are encoded into 2D textures and operators run as shader programs
//! generated at runtime from shape and parameter metadata. Operators the
//! texture backend lacks fall back to host kernels.
//!
//! # Features
//!
//! - Reversible, closed-form tensor ↔ texture layouts with optional RGBA packing.
//! - A typed shader IR with a WGSL printer and a host evaluator sharing one semantics.
//! - A three-phase operator contract (program info, run data, run) with
//!   cached program compilation.
//! - CPU, worker-pool and texture backends resolved through hints and `cpu_fallback`.
//!
//! # Modules
//!
//! - [`tensors`]: the immutable tensor boundary type.
//! - [`shape`]: shape arithmetic shared by every backend.
//! - [`layout`]: the Texture Layout Encoder.
//! - [`shader`]: IR, printer, evaluator and per-operator generators.
//! - [`ops`]: operator descriptors and graph-attribute parsing.
//! - [`texture`]: devices, program manager, inference handler and the
//!   texture backend.
//! - [`backend`]: backend trait, CPU and worker-pool backends, registry.
//! - [`config`]: the explicit execution environment.
//! - [`approx`]: tolerance-based float comparison.
//!
//! # Non-goals
//!
//! Training, autodiff and model file parsing live outside this crate; it
//! executes forward-pass operators handed to it by a graph executor.
//!
//! # Example
//!
//! ```rust
//! use briny_texel::backend::BackendRegistry;
//! use briny_texel::config::Environment;
//! use briny_texel::ops::{Attributes, Operator};
//! use briny_texel::tensor;
//!
//! let mut env = Environment::default();
//! env.backend.webgl.prefer_gpu_device = false;
//! let mut registry = BackendRegistry::with_defaults(&env).unwrap();
//!
//! let attrs = Attributes::new()
//!     .with_string("mode", "edge")
//!     .with_ints("pads", &[2, 2]);
//! let pad = Operator::from_node("Pad", &attrs).unwrap();
//! let out = registry.run(&pad, &[tensor!([1.0, 2.0, 3.0])]).unwrap();
//! assert_eq!(out[0].as_f32().unwrap(), &[1.0, 1.0, 1.0, 2.0, 3.0, 3.0, 3.0]);
//! registry.end_run().unwrap();
//! ```

pub mod approx;
pub mod backend;
pub mod config;
pub mod error;
pub mod layout;
pub mod ops;
pub mod shader;
pub mod shape;
pub mod tensors;
pub mod texture;

pub use error::{Error, ErrorCategory, Result};
pub use tensors::Tensor;
