//! Worker-pool backend (`wasm` hint).
//!
//! Owns a fixed-size `rayon` pool and runs the hot host kernels (unary,
//! binary, MatMul) inside it. Each call is independent: kernels share no
//! state beyond their own input and output buffers. Everything else is left
//! to the CPU fallback.

use log::info;
use rayon::{ThreadPool, ThreadPoolBuilder};

use crate::config::WasmOptions;
use crate::error::{Error, Result};
use crate::ops::{OpKind, Operator};
use crate::tensors::Tensor;

use super::{Backend, BackendKind, cpu};

/// Host kernels on a dedicated thread pool.
pub struct NativeBackend {
    pool: ThreadPool,
}

impl NativeBackend {
    /// Builds a pool of `options.worker` threads; `0` means one.
    ///
    /// # Errors
    /// [`Error::Device`] when the threads cannot be spawned.
    pub fn new(options: &WasmOptions) -> Result<Self> {
        let threads = options.worker.max(1);
        let pool = ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(|i| format!("briny-texel-worker-{i}"))
            .build()
            .map_err(|e| Error::Device(format!("worker pool: {e}")))?;
        info!("native backend with {threads} worker(s)");
        Ok(Self { pool })
    }

    /// Threads in the pool.
    #[must_use]
    pub fn workers(&self) -> usize {
        self.pool.current_num_threads()
    }
}

impl core::fmt::Debug for NativeBackend {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("NativeBackend")
            .field("workers", &self.workers())
            .finish()
    }
}

impl Backend for NativeBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Native
    }

    fn supports(&self, kind: OpKind) -> bool {
        matches!(
            kind,
            OpKind::Abs
                | OpKind::Neg
                | OpKind::Relu
                | OpKind::LeakyRelu
                | OpKind::Sigmoid
                | OpKind::Tanh
                | OpKind::Exp
                | OpKind::Log
                | OpKind::Sqrt
                | OpKind::Sin
                | OpKind::Cos
                | OpKind::Floor
                | OpKind::Ceil
                | OpKind::Clip
                | OpKind::Identity
                | OpKind::Add
                | OpKind::Sub
                | OpKind::Mul
                | OpKind::Div
                | OpKind::Pow
                | OpKind::Max
                | OpKind::Min
                | OpKind::MatMul
        )
    }

    fn run(&mut self, op: &Operator, inputs: &[Tensor]) -> Result<Vec<Tensor>> {
        if !self.supports(op.kind()) {
            return Err(Error::UnsupportedOperator {
                op: op.name().to_owned(),
                backend: BackendKind::Native.name().to_owned(),
            });
        }
        self.pool.install(|| cpu::execute(op, inputs))
    }
}
