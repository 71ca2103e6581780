//! Batched matrix product.

use crate::error::{Error, Result};
use crate::layout::TextureLayout;
use crate::shader::ShaderModule;
use crate::shader::ir::{Stmt, float, index, int, sample, var};

use super::dot;

/// `out[.., i, j] = Σ_k a[.., i, k] * b[.., k, j]` over identical batch axes.
///
/// # Errors
/// Returns [`Error::InvalidShape`] for incompatible operands.
pub fn matmul(a: &TextureLayout, b: &TextureLayout, output: &TextureLayout) -> Result<ShaderModule> {
    let dims = crate::shape::matmul_shape(a.shape(), b.shape())?;
    if dims != output.shape() {
        return Err(Error::shape(output.shape(), format!("MatMul produces {dims:?}")));
    }
    let rank = dims.len();
    let inner = a.shape()[rank - 1];
    let columns = b.shape()[rank - 1];
    let batch = |layout: &TextureLayout| {
        dot((0..rank - 2).map(|axis| (index(axis), layout.strides()[axis])))
    };
    let body = vec![
        Stmt::let_int("row", batch(a) + index(rank - 2) * int(inner)),
        Stmt::let_int("column", batch(b) + index(rank - 1)),
        Stmt::let_float("acc", float(0.0)),
        Stmt::for_range(
            "k",
            int(0),
            int(inner),
            vec![Stmt::assign(
                "acc",
                var("acc")
                    + sample(0, var("row") + var("k")) * sample(1, var("column") + var("k") * int(columns)),
            )],
        ),
        Stmt::Return(var("acc")),
    ];
    Ok(ShaderModule::indexed(
        "MatMul",
        vec![a.clone(), b.clone()],
        output.clone(),
        body,
    ))
}
