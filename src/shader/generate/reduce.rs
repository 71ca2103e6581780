//! Reductions over a set of axes.
//!
//! Kept axes read their index from the output; each reduced axis gets a loop
//! variable `r{axis}`, nested outermost-first.

use crate::error::{Error, Result};
use crate::layout::TextureLayout;
use crate::ops::{Reduce, ReduceOp};
use crate::shader::ShaderModule;
use crate::shader::ir::{Stmt, float, index, int, sample, var};

use super::dot;

/// Generates the reduction program.
///
/// # Errors
/// Returns [`Error::InvalidAttribute`] for out-of-range axes and
/// [`Error::InvalidShape`] when `output` has the wrong shape.
pub fn reduce(params: &Reduce, input: &TextureLayout, output: &TextureLayout) -> Result<ShaderModule> {
    let label = match params.op {
        ReduceOp::Sum => "ReduceSum",
        ReduceOp::Mean => "ReduceMean",
        ReduceOp::Max => "ReduceMax",
        ReduceOp::Min => "ReduceMin",
    };
    let (dims, reduced) = crate::shape::reduce_shape(label, input.shape(), &params.axes, params.keep_dims)?;
    if dims != output.shape() {
        return Err(Error::shape(output.shape(), format!("{label} produces {dims:?}")));
    }

    let mut kept = 0;
    let terms: Vec<_> = input
        .strides()
        .iter()
        .enumerate()
        .map(|(axis, &stride)| {
            if reduced.contains(&axis) {
                if params.keep_dims {
                    kept += 1;
                }
                (var(&format!("r{axis}")), stride)
            } else {
                let term = (index(kept), stride);
                kept += 1;
                term
            }
        })
        .collect();
    let value = sample(0, dot(terms));
    let count: usize = reduced.iter().map(|&a| input.shape()[a]).product();

    // max and min start from the first element read, tracked by `seen`
    let first = var("seen").equals(int(0));
    let combine = match params.op {
        ReduceOp::Sum | ReduceOp::Mean => var("acc") + value,
        ReduceOp::Max => first.select(value.clone(), var("acc").max(value)),
        ReduceOp::Min => first.select(value.clone(), var("acc").min(value)),
    };
    let mut inner = vec![Stmt::assign("acc", combine), Stmt::assign("seen", int(1))];
    for &axis in reduced.iter().rev() {
        inner = vec![Stmt::for_range(
            &format!("r{axis}"),
            int(0),
            int(input.shape()[axis]),
            inner,
        )];
    }
    let result = if params.op == ReduceOp::Mean {
        var("acc") / float(count as f32)
    } else {
        var("acc")
    };
    let mut body = vec![Stmt::let_float("acc", float(0.0)), Stmt::let_int("seen", int(0))];
    body.extend(inner);
    body.push(Stmt::Return(result));
    Ok(ShaderModule::indexed(label, vec![input.clone()], output.clone(), body))
}
