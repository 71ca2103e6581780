//! Per-operator shader generators.
//!
//! Every generator is a pure function of the operator parameters and the
//! input/output layouts, so identical shapes and parameters produce identical
//! modules (and therefore identical source). Invalid parameters are rejected
//! here, before any device resource exists.
//!
//! [`program`] dispatches a descriptor to its family; [`uniform_values`]
//! supplies the values for the uniforms a module declares.

pub mod conv;
pub mod elementwise;
pub mod matmul;
pub mod pad;
pub mod reduce;
pub mod transform;

use super::ShaderModule;
use super::ir::{Expr, index, int};
use crate::error::{Error, Result};
use crate::layout::TextureLayout;
use crate::ops::Operator;

/// Builds the module computing `op` over `inputs` into `output`.
///
/// # Errors
/// Configuration errors for invalid parameters or shapes, and
/// [`Error::UnsupportedOperator`] for kinds without a texture program.
pub fn program(op: &Operator, inputs: &[TextureLayout], output: &TextureLayout) -> Result<ShaderModule> {
    op.check_inputs(inputs.len())?;
    match op {
        Operator::Unary(u) => Ok(elementwise::unary(*u, &inputs[0], output)),
        Operator::Binary(b) => elementwise::binary(*b, &inputs[0], &inputs[1], output),
        Operator::Pad(p) => pad::pad(p, &inputs[0], output),
        Operator::Transpose { perm } => transform::transpose(perm.as_deref(), &inputs[0], output),
        Operator::Reshape { .. } => transform::reshape(&inputs[0], output),
        Operator::Slice(s) => transform::slice(s, &inputs[0], output),
        Operator::Concat { axis } => transform::concat(*axis, inputs, output),
        Operator::MatMul => matmul::matmul(&inputs[0], &inputs[1], output),
        Operator::Conv(c) => conv::conv(c, inputs, output),
        Operator::Pool(p) => conv::pool(p, &inputs[0], output),
        Operator::Reduce(r) => reduce::reduce(r, &inputs[0], output),
        Operator::ArgMax { .. } => Err(Error::UnsupportedOperator {
            op: op.name().to_owned(),
            backend: "texture".to_owned(),
        }),
    }
}

/// Values of the uniforms [`program`] declares for `op`, in declaration
/// order.
#[must_use]
pub fn uniform_values(op: &Operator) -> Vec<f32> {
    match op {
        Operator::Unary(u) => elementwise::uniform_values(*u),
        Operator::Pad(p) => pad::uniform_values(p),
        _ => Vec::new(),
    }
}

/// `Σ axis_i * stride_i`, omitting unit factors.
pub(crate) fn dot(terms: impl IntoIterator<Item = (Expr, usize)>) -> Expr {
    terms
        .into_iter()
        .map(|(e, stride)| if stride == 1 { e } else { e * int(stride) })
        .reduce(|acc, term| acc + term)
        .unwrap_or_else(|| int(0))
}

/// Offset into `layout` of the output index `m`, for same-shaped tensors.
pub(crate) fn linear_offset(layout: &TextureLayout) -> Expr {
    dot(layout
        .strides()
        .iter()
        .enumerate()
        .map(|(axis, &stride)| (index(axis), stride)))
}

/// Offset into `input` of the output index `m` under multidirectional
/// broadcasting: axes are right-aligned and extent-1 axes read index 0.
pub(crate) fn broadcast_offset(input: &TextureLayout, output_rank: usize) -> Expr {
    let lead = output_rank - input.rank();
    dot(input
        .shape()
        .iter()
        .zip(input.strides())
        .enumerate()
        .filter(|&(_, (&extent, _))| extent != 1)
        .map(|(axis, (_, &stride))| (index(axis + lead), stride)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::Packing;

    #[test]
    fn dot_skips_unit_strides() {
        assert_eq!(dot([(index(0), 3), (index(1), 1)]), index(0) * int(3) + index(1));
        assert_eq!(dot(Vec::new()), int(0));
    }

    #[test]
    fn broadcast_ignores_unit_axes() {
        let input = TextureLayout::new(&[3, 1], Packing::Unpacked, 64).unwrap();
        assert_eq!(broadcast_offset(&input, 3), index(1));
    }
}
