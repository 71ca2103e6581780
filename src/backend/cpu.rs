//! Parallel CPU backend.
//!
//! Host implementations of the operators the registry may need to fall back
//! to, and the reference every texture program is tested against.
//!
//! ## Implemented Ops
//!
//! - unary elementwise math (all [`UnaryOp`]s)
//! - binary elementwise math with multidirectional broadcasting
//! - `Pad` (constant, edge, reflect)
//! - `Reshape`, `Transpose`
//! - `MatMul` (batched)
//! - `ArgMax` (int32 output, first index on ties)
//!
//! Kernels run data-parallel with [`rayon`](https://docs.rs/rayon) on
//! whichever pool is current, which lets the worker-pool backend reuse them
//! inside its own pool.

use rayon::prelude::*;

use crate::error::{Error, Result};
use crate::ops::{BinaryOp, OpKind, Operator, Pad, PadMode, UnaryOp};
use crate::shape;
use crate::tensors::{Tensor, TensorData};

use super::{Backend, BackendKind};

/// N-dimensional index of `offset` under row-major `strides`.
fn unravel(mut offset: usize, strides: &[usize], out: &mut [usize]) {
    for (i, &s) in out.iter_mut().zip(strides) {
        *i = offset / s;
        offset %= s;
    }
}

fn float_tensor(dims: Vec<usize>, data: Vec<f32>) -> Result<Tensor> {
    Tensor::from_data(dims, TensorData::Float32(data))
}

/// Applies `op` to every element.
///
/// # Errors
/// Never in practice; tensor construction is checked.
pub fn unary(op: UnaryOp, x: &Tensor) -> Result<Tensor> {
    let data: Vec<f32> = x.to_f32_vec().par_iter().map(|&v| op.apply(v)).collect();
    float_tensor(x.dims().to_vec(), data)
}

/// Applies `op` pairwise under multidirectional broadcasting.
///
/// # Errors
/// [`Error::InvalidShape`] for incompatible shapes.
pub fn binary(op: BinaryOp, a: &Tensor, b: &Tensor) -> Result<Tensor> {
    let dims = shape::broadcast_shape(a.dims(), b.dims())?;
    let out_strides = shape::strides(&dims);
    let (av, bv) = (a.to_f32_vec(), b.to_f32_vec());
    let source = |src: &[usize], index: &[usize]| -> usize {
        let lead = index.len() - src.len();
        let strides = shape::strides(src);
        src.iter()
            .zip(&strides)
            .enumerate()
            .filter(|&(_, (&extent, _))| extent != 1)
            .map(|(axis, (_, &stride))| index[axis + lead] * stride)
            .sum()
    };
    let mut data = vec![0.0f32; shape::size(&dims)];
    data.par_iter_mut().enumerate().for_each(|(offset, slot)| {
        let mut index = vec![0; dims.len()];
        unravel(offset, &out_strides, &mut index);
        *slot = op.apply(av[source(a.dims(), &index)], bv[source(b.dims(), &index)]);
    });
    float_tensor(dims, data)
}

/// Batched matrix product over equal batch dims.
///
/// # Errors
/// [`Error::InvalidShape`] for incompatible operands.
pub fn matmul(a: &Tensor, b: &Tensor) -> Result<Tensor> {
    let dims = shape::matmul_shape(a.dims(), b.dims())?;
    let rank = dims.len();
    let (k, n) = (a.dims()[rank - 1], dims[rank - 1]);
    let m = dims[rank - 2];
    let (av, bv) = (a.to_f32_vec(), b.to_f32_vec());
    let mut data = vec![0.0f32; shape::size(&dims)];
    data.par_chunks_mut(n).enumerate().for_each(|(r, row)| {
        let a_row = &av[r * k..(r + 1) * k];
        let b_mat = &bv[(r / m) * k * n..];
        for (j, out) in row.iter_mut().enumerate() {
            *out = a_row
                .iter()
                .enumerate()
                .map(|(l, &x)| x * b_mat[l * n + j])
                .sum();
        }
    });
    float_tensor(dims, data)
}

/// Source index along one axis, or `None` for the constant fill.
fn pad_source(mode: PadMode, k: isize, n: isize) -> Option<isize> {
    match mode {
        PadMode::Constant => (0..n).contains(&k).then_some(k),
        PadMode::Edge => Some(k.clamp(0, n - 1)),
        PadMode::Reflect => {
            let period = 2 * (n - 1);
            let k = k.abs() % period.max(1);
            Some(if k >= n { period - k } else { k })
        }
    }
}

/// Pads `x` with the constant, edge or reflect boundary.
///
/// # Errors
/// Configuration errors for malformed pads, and reflect padding on an
/// extent-1 axis.
pub fn pad(params: &Pad, x: &Tensor) -> Result<Tensor> {
    let dims = shape::pad_shape(x.dims(), &params.pads)?;
    let (begins, ends) = params.halves();
    if params.mode == PadMode::Reflect {
        for (axis, &extent) in x.dims().iter().enumerate() {
            if extent == 1 && (begins[axis] != 0 || ends[axis] != 0) {
                return Err(Error::attribute(
                    "Pad",
                    "mode",
                    format!("reflect padding needs axis {axis} to have at least 2 elements"),
                ));
            }
        }
    }
    let in_strides = shape::strides(x.dims());
    let out_strides = shape::strides(&dims);
    let xv = x.to_f32_vec();
    let mut data = vec![0.0f32; shape::size(&dims)];
    data.par_iter_mut().enumerate().for_each(|(offset, slot)| {
        let mut index = vec![0; dims.len()];
        unravel(offset, &out_strides, &mut index);
        let mut source = 0;
        for axis in (0..index.len()).rev() {
            let k = index[axis] as isize - begins[axis];
            match pad_source(params.mode, k, x.dims()[axis] as isize) {
                Some(k) => source += k as usize * in_strides[axis],
                None => {
                    *slot = params.value;
                    return;
                }
            }
        }
        *slot = xv[source];
    });
    Tensor::from_data(dims, TensorData::from_f32(x.data_type(), data))
}

/// Permutes axes; `perm` defaults to reversal.
///
/// # Errors
/// [`Error::InvalidAttribute`] for an invalid permutation.
pub fn transpose(perm: Option<&[usize]>, x: &Tensor) -> Result<Tensor> {
    let perm = shape::transpose_perm(x.dims(), perm)?;
    let dims: Vec<usize> = perm.iter().map(|&p| x.dims()[p]).collect();
    let in_strides = shape::strides(x.dims());
    let out_strides = shape::strides(&dims);
    let xv = x.to_f32_vec();
    let mut data = vec![0.0f32; xv.len()];
    data.par_iter_mut().enumerate().for_each(|(offset, slot)| {
        let mut index = vec![0; dims.len()];
        unravel(offset, &out_strides, &mut index);
        let source: usize = perm.iter().zip(&index).map(|(&p, &i)| i * in_strides[p]).sum();
        *slot = xv[source];
    });
    Tensor::from_data(dims, TensorData::from_f32(x.data_type(), data))
}

/// Same data under new dims (ONNX `0` copy and `-1` infer).
///
/// # Errors
/// [`Error::InvalidShape`] when the element counts differ.
pub fn reshape(target: &[i64], x: &Tensor) -> Result<Tensor> {
    let dims = shape::reshape_shape(x.dims(), target)?;
    Tensor::from_data(dims, x.data().clone())
}

/// Index of the first maximum along `axis`.
///
/// # Errors
/// [`Error::InvalidAttribute`] for an out-of-range axis.
pub fn argmax(axis: isize, keep_dims: bool, x: &Tensor) -> Result<Tensor> {
    let axis = shape::normalize_axis("ArgMax", axis, x.rank())?;
    let (dims, _) = shape::reduce_shape("ArgMax", x.dims(), &[axis as isize], keep_dims)?;
    let n = x.dims()[axis];
    let inner: usize = x.dims()[axis + 1..].iter().product();
    let xv = x.to_f32_vec();
    let mut data = vec![0i32; shape::size(&dims)];
    data.par_iter_mut().enumerate().for_each(|(o, slot)| {
        let base = (o / inner) * n * inner + o % inner;
        let mut best = 0;
        for j in 1..n {
            if xv[base + j * inner] > xv[base + best * inner] {
                best = j;
            }
        }
        *slot = best as i32;
    });
    Tensor::from_data(dims, TensorData::Int32(data))
}

/// The CPU backend (`cpu` hint).
#[derive(Debug, Default)]
pub struct CpuBackend;

impl CpuBackend {
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

/// Kinds implemented by [`CpuBackend`].
#[must_use]
pub fn supports(kind: OpKind) -> bool {
    !matches!(
        kind,
        OpKind::Slice
            | OpKind::Concat
            | OpKind::Conv
            | OpKind::MaxPool
            | OpKind::AveragePool
            | OpKind::ReduceSum
            | OpKind::ReduceMean
            | OpKind::ReduceMax
            | OpKind::ReduceMin
    )
}

/// Runs `op` with the host kernels on the current rayon pool.
///
/// # Errors
/// Kernel errors, or [`Error::UnsupportedOperator`].
pub fn execute(op: &Operator, inputs: &[Tensor]) -> Result<Vec<Tensor>> {
    op.check_inputs(inputs.len())?;
    let out = match op {
        Operator::Unary(u) => unary(*u, &inputs[0])?,
        Operator::Binary(b) => binary(*b, &inputs[0], &inputs[1])?,
        Operator::Pad(p) => pad(p, &inputs[0])?,
        Operator::Transpose { perm } => transpose(perm.as_deref(), &inputs[0])?,
        Operator::Reshape { shape } => reshape(shape, &inputs[0])?,
        Operator::MatMul => matmul(&inputs[0], &inputs[1])?,
        Operator::ArgMax { axis, keep_dims } => argmax(*axis, *keep_dims, &inputs[0])?,
        _ => {
            return Err(Error::UnsupportedOperator {
                op: op.name().to_owned(),
                backend: BackendKind::Cpu.name().to_owned(),
            });
        }
    };
    Ok(vec![out])
}

impl Backend for CpuBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Cpu
    }

    fn supports(&self, kind: OpKind) -> bool {
        supports(kind)
    }

    fn run(&mut self, op: &Operator, inputs: &[Tensor]) -> Result<Vec<Tensor>> {
        execute(op, inputs)
    }
}
