//! Elementwise unary and broadcasting binary generators.

use crate::error::{Error, Result};
use crate::layout::TextureLayout;
use crate::ops::{BinaryOp, UnaryOp};
use crate::shader::ShaderModule;
use crate::shader::ir::{Expr, Stmt, UnOp, float, sample, uniform, var};

use super::{broadcast_offset, linear_offset};

fn unary_expr(op: UnaryOp, x: Expr) -> Expr {
    match op {
        UnaryOp::Abs => x.abs(),
        UnaryOp::Neg => -x,
        UnaryOp::Relu => x.max(float(0.0)),
        UnaryOp::LeakyRelu { .. } => x.clone().ge(float(0.0)).select(x.clone(), uniform("alpha") * x),
        UnaryOp::Sigmoid => float(1.0) / (float(1.0) + (-x).apply(UnOp::Exp)),
        UnaryOp::Tanh => x.apply(UnOp::Tanh),
        UnaryOp::Exp => x.apply(UnOp::Exp),
        UnaryOp::Log => x.apply(UnOp::Log),
        UnaryOp::Sqrt => x.apply(UnOp::Sqrt),
        UnaryOp::Sin => x.apply(UnOp::Sin),
        UnaryOp::Cos => x.apply(UnOp::Cos),
        UnaryOp::Floor => x.apply(UnOp::Floor),
        UnaryOp::Ceil => x.apply(UnOp::Ceil),
        UnaryOp::Clip { .. } => x.max(uniform("min")).min(uniform("max")),
        UnaryOp::Identity => x,
    }
}

fn uniform_names(op: UnaryOp) -> &'static [&'static str] {
    match op {
        UnaryOp::LeakyRelu { .. } => &["alpha"],
        UnaryOp::Clip { .. } => &["min", "max"],
        _ => &[],
    }
}

/// Uniform values for [`unary`], matching its declared uniforms.
#[must_use]
pub fn uniform_values(op: UnaryOp) -> Vec<f32> {
    match op {
        UnaryOp::LeakyRelu { alpha } => vec![alpha],
        UnaryOp::Clip { min, max } => vec![min, max],
        _ => Vec::new(),
    }
}

/// `out[m] = f(in[m])`. Scalar parameters travel as uniforms so that one
/// program serves every parameter value.
#[must_use]
pub fn unary(op: UnaryOp, input: &TextureLayout, output: &TextureLayout) -> ShaderModule {
    let body = vec![
        Stmt::let_float("x", sample(0, linear_offset(input))),
        Stmt::Return(unary_expr(op, var("x"))),
    ];
    uniform_names(op).iter().fold(
        ShaderModule::indexed(op.kind().name(), vec![input.clone()], output.clone(), body),
        |module, name| module.with_uniform(name),
    )
}

/// `out[m] = a[m] ∘ b[m]` with both operands broadcast to the output shape.
///
/// # Errors
/// Returns [`Error::InvalidShape`] when `output` is not the broadcast shape.
pub fn binary(op: BinaryOp, a: &TextureLayout, b: &TextureLayout, output: &TextureLayout) -> Result<ShaderModule> {
    let expected = crate::shape::broadcast_shape(a.shape(), b.shape())?;
    if expected != output.shape() {
        return Err(Error::shape(output.shape(), format!("{} broadcasts to {expected:?}", op.kind())));
    }
    let rank = output.rank();
    let (x, y) = (var("a"), var("b"));
    let value = match op {
        BinaryOp::Add => x + y,
        BinaryOp::Sub => x - y,
        BinaryOp::Mul => x * y,
        BinaryOp::Div => x / y,
        BinaryOp::Pow => x.pow(y),
        BinaryOp::Max => x.max(y),
        BinaryOp::Min => x.min(y),
    };
    let body = vec![
        Stmt::let_float("a", sample(0, broadcast_offset(a, rank))),
        Stmt::let_float("b", sample(1, broadcast_offset(b, rank))),
        Stmt::Return(value),
    ];
    Ok(ShaderModule::indexed(
        op.kind().name(),
        vec![a.clone(), b.clone()],
        output.clone(),
        body,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::approx::approx_eq;
    use crate::layout::Packing;
    use crate::shader::eval::evaluate;

    fn layout(shape: &[usize]) -> TextureLayout {
        TextureLayout::new(shape, Packing::Unpacked, 8192).unwrap()
    }

    #[test]
    fn unary_matches_reference() {
        let data = [-2.0, -0.5, 0.0, 1.5];
        for op in [
            UnaryOp::Relu,
            UnaryOp::Sigmoid,
            UnaryOp::LeakyRelu { alpha: 0.1 },
            UnaryOp::Clip { min: -1.0, max: 1.0 },
            UnaryOp::Abs,
        ] {
            let module = unary(op, &layout(&[4]), &layout(&[4]));
            module.validate().unwrap();
            let out = evaluate(&module, &[&data], &uniform_values(op)).unwrap();
            let expected: Vec<f32> = data.iter().map(|&x| op.apply(x)).collect();
            assert!(approx_eq(&out, &expected), "{op:?}: {out:?} vs {expected:?}");
        }
    }

    #[test]
    fn binary_broadcasts_rows_and_columns() {
        let module = binary(BinaryOp::Add, &layout(&[2, 1]), &layout(&[3]), &layout(&[2, 3])).unwrap();
        module.validate().unwrap();
        let out = evaluate(&module, &[&[10.0, 20.0], &[1.0, 2.0, 3.0]], &[]).unwrap();
        assert_eq!(out, vec![11.0, 12.0, 13.0, 21.0, 22.0, 23.0]);
    }

    #[test]
    fn binary_rejects_wrong_output() {
        assert!(binary(BinaryOp::Mul, &layout(&[2]), &layout(&[2]), &layout(&[3])).is_err());
    }
}
