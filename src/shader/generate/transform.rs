//! Data movement: transpose, reshape, slice and concat.
//!
//! None of these compute anything; each only maps an output index to the
//! source offset it copies from.

use crate::error::{Error, Result};
use crate::layout::TextureLayout;
use crate::ops::Slice;
use crate::shader::ShaderModule;
use crate::shader::ir::{Expr, Stmt, index, int, sample, sint, var};
use crate::shape;

use super::dot;

fn expect_shape(op: &str, output: &TextureLayout, expected: &[usize]) -> Result<()> {
    if output.shape() != expected {
        return Err(Error::shape(output.shape(), format!("{op} produces {expected:?}")));
    }
    Ok(())
}

/// Output axis `i` reads input axis `perm[i]`.
///
/// # Errors
/// Returns [`Error::InvalidAttribute`] for an invalid permutation.
pub fn transpose(perm: Option<&[usize]>, input: &TextureLayout, output: &TextureLayout) -> Result<ShaderModule> {
    let perm = shape::transpose_perm(input.shape(), perm)?;
    let dims: Vec<usize> = perm.iter().map(|&p| input.shape()[p]).collect();
    expect_shape("Transpose", output, &dims)?;
    let offset = dot(perm.iter().enumerate().map(|(axis, &p)| (index(axis), input.strides()[p])));
    Ok(ShaderModule::indexed(
        "Transpose",
        vec![input.clone()],
        output.clone(),
        vec![Stmt::Return(sample(0, offset))],
    ))
}

/// Reshape keeps row-major element order, so output offset `o` reads input
/// offset `o`. The program works on flat offsets and skips index decoding.
///
/// # Errors
/// Returns [`Error::InvalidShape`] when the element counts differ.
pub fn reshape(input: &TextureLayout, output: &TextureLayout) -> Result<ShaderModule> {
    if input.size() != output.size() {
        return Err(Error::shape(
            output.shape(),
            format!("cannot reshape {:?} into it", input.shape()),
        ));
    }
    Ok(ShaderModule::texel(
        "Reshape",
        vec![input.clone()],
        output.clone(),
        vec![Stmt::Return(sample(0, Expr::Offset))],
    ))
}

/// Output element `j` on axis `i` reads `start[i] + j * step[i]`.
///
/// # Errors
/// Returns configuration errors from [`shape::resolve_slice`].
pub fn slice(params: &Slice, input: &TextureLayout, output: &TextureLayout) -> Result<ShaderModule> {
    let axes = shape::resolve_slice(
        input.shape(),
        &params.starts,
        &params.ends,
        params.axes.as_deref(),
        params.steps.as_deref(),
    )?;
    let dims: Vec<usize> = axes.iter().map(|a| a.extent).collect();
    expect_shape("Slice", output, &dims)?;
    let offset = axes
        .iter()
        .zip(input.strides())
        .enumerate()
        .map(|(axis, (a, &stride))| {
            let mut source = index(axis);
            // a single output position never reads the step
            if a.step != 1 && a.extent > 1 {
                source = source * sint(a.step);
            }
            if a.start != 0 {
                source = source + sint(a.start);
            }
            (source, stride)
        });
    Ok(ShaderModule::indexed(
        "Slice",
        vec![input.clone()],
        output.clone(),
        vec![Stmt::Return(sample(0, dot(offset)))],
    ))
}

/// Input `k` occupies `[begin_k, begin_k + extent_k)` of the concat axis;
/// each element reads from the first input whose range contains it.
///
/// # Errors
/// Returns configuration errors for an invalid axis or mismatched shapes.
pub fn concat(axis: isize, inputs: &[TextureLayout], output: &TextureLayout) -> Result<ShaderModule> {
    let first = inputs.first().ok_or_else(|| Error::inputs("Concat", "at least 1", 0))?;
    let axis = shape::normalize_axis("Concat", axis, first.rank())?;
    let shapes: Vec<&[usize]> = inputs.iter().map(TextureLayout::shape).collect();
    let dims = shape::concat_shape(&shapes, axis)?;
    expect_shape("Concat", output, &dims)?;

    let source = |k: usize, begin: usize| {
        let layout = &inputs[k];
        dot(layout.strides().iter().enumerate().map(|(i, &stride)| {
            let e = if i != axis {
                index(i)
            } else if begin == 0 {
                var("a")
            } else {
                var("a") - int(begin)
            };
            (e, stride)
        }))
    };
    let mut body = vec![Stmt::let_int("a", index(axis))];
    let mut begin = 0;
    for (k, layout) in inputs.iter().enumerate() {
        let end = begin + layout.shape()[axis];
        if k + 1 == inputs.len() {
            body.push(Stmt::Return(sample(k, source(k, begin))));
        } else {
            body.push(Stmt::when(
                var("a").lt(int(end)),
                vec![Stmt::Return(sample(k, source(k, begin)))],
            ));
        }
        begin = end;
    }
    Ok(ShaderModule::indexed("Concat", inputs.to_vec(), output.clone(), body))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::Packing;
    use crate::shader::eval::evaluate;

    fn layout(shape: &[usize]) -> TextureLayout {
        TextureLayout::new(shape, Packing::Unpacked, 8192).unwrap()
    }

    #[test]
    fn transpose_swaps_axes() {
        let module = transpose(None, &layout(&[2, 3]), &layout(&[3, 2])).unwrap();
        module.validate().unwrap();
        let out = evaluate(&module, &[&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]], &[]).unwrap();
        assert_eq!(out, vec![1.0, 4.0, 2.0, 5.0, 3.0, 6.0]);
    }

    #[test]
    fn reshape_is_texel_level() {
        let module = reshape(&layout(&[2, 3]), &layout(&[3, 2])).unwrap();
        assert!(module.has_main());
        module.validate().unwrap();
        assert!(module.to_wgsl().contains("value_at(offset)"));
    }

    #[test]
    fn slice_with_negative_step() {
        let params = Slice {
            starts: vec![-1],
            ends: vec![i64::MIN],
            axes: None,
            steps: Some(vec![-2]),
        };
        let module = slice(&params, &layout(&[5]), &layout(&[3])).unwrap();
        module.validate().unwrap();
        let out = evaluate(&module, &[&[0.0, 1.0, 2.0, 3.0, 4.0]], &[]).unwrap();
        assert_eq!(out, vec![4.0, 2.0, 0.0]);
    }

    #[test]
    fn concat_along_inner_axis() {
        let module = concat(-1, &[layout(&[2, 1]), layout(&[2, 2])], &layout(&[2, 3])).unwrap();
        module.validate().unwrap();
        let out = evaluate(&module, &[&[1.0, 2.0], &[10.0, 11.0, 20.0, 21.0]], &[]).unwrap();
        assert_eq!(out, vec![1.0, 10.0, 11.0, 2.0, 20.0, 21.0]);
    }
}
