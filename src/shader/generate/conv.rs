//! 2-D convolution and pooling over NCHW tensors.
//!
//! Window positions falling into the padding are skipped rather than read,
//! which keeps every sample inside the input.

use crate::error::{Error, Result};
use crate::layout::TextureLayout;
use crate::ops::{Conv, Pool, PoolKind};
use crate::shader::ShaderModule;
use crate::shader::ir::{Expr, Stmt, float, index, int, sample, var};
use crate::shape::WindowAxis;

use super::dot;

/// `iy = oy * stride - pad_begin + ky * dilation`, declared as `name`.
fn window_index(name: &str, out_axis: usize, kernel_var: &str, axis: &WindowAxis) -> Stmt {
    Stmt::let_int(
        name,
        index(out_axis) * int(axis.stride) - int(axis.pad_begin) + var(kernel_var) * int(axis.dilation),
    )
}

fn in_range(name: &str, extent: usize) -> Expr {
    var(name).ge(int(0)).and(var(name).lt(int(extent)))
}

fn expect_output(op: &str, output: &TextureLayout, dims: &[usize]) -> Result<()> {
    if output.shape() != dims {
        return Err(Error::shape(output.shape(), format!("{op} produces {dims:?}")));
    }
    Ok(())
}

/// Convolution of `inputs[0]` (NCHW) with `inputs[1]` (OIHW), plus
/// `inputs[2]` (O) when present.
///
/// # Errors
/// Returns configuration errors for inconsistent shapes or attributes.
pub fn conv(params: &Conv, inputs: &[TextureLayout], output: &TextureLayout) -> Result<ShaderModule> {
    let (input, weight) = match inputs {
        [input, weight] | [input, weight, _] => (input, weight),
        _ => return Err(Error::inputs("Conv", "2 to 3", inputs.len())),
    };
    let shapes: Vec<&[usize]> = inputs.iter().map(TextureLayout::shape).collect();
    let dims = crate::ops::Operator::Conv(params.clone()).output_shape(&shapes)?;
    expect_output("Conv", output, &dims)?;
    let axes = params.geometry(input.shape(), weight.shape())?;
    let (y, x) = (&axes[0], &axes[1]);
    let out_channels = weight.shape()[0];
    let group_channels = weight.shape()[1];
    let per_group = out_channels / params.group;
    let s = input.strides();
    let w = weight.strides();

    let input_offset = dot([
        (index(0), s[0]),
        (var("channel_base") + var("c"), s[1]),
        (var("iy"), s[2]),
        (var("ix"), s[3]),
    ]);
    let weight_offset = dot([
        (index(1), w[0]),
        (var("c"), w[1]),
        (var("ky"), w[2]),
        (var("kx"), w[3]),
    ]);
    let init = if inputs.len() == 3 { sample(2, index(1)) } else { float(0.0) };
    let body = vec![
        Stmt::let_int("channel_base", index(1) / int(per_group) * int(group_channels)),
        Stmt::let_float("acc", init),
        Stmt::for_range(
            "c",
            int(0),
            int(group_channels),
            vec![Stmt::for_range(
                "ky",
                int(0),
                int(y.kernel),
                vec![
                    window_index("iy", 2, "ky", y),
                    Stmt::when(
                        in_range("iy", y.input),
                        vec![Stmt::for_range(
                            "kx",
                            int(0),
                            int(x.kernel),
                            vec![
                                window_index("ix", 3, "kx", x),
                                Stmt::when(
                                    in_range("ix", x.input),
                                    vec![Stmt::assign(
                                        "acc",
                                        var("acc") + sample(0, input_offset) * sample(1, weight_offset),
                                    )],
                                ),
                            ],
                        )],
                    ),
                ],
            )],
        ),
        Stmt::Return(var("acc")),
    ];
    Ok(ShaderModule::indexed("Conv", inputs.to_vec(), output.clone(), body))
}

/// Max or average pooling of `input` (NCHW).
///
/// # Errors
/// Returns configuration errors for inconsistent shapes or attributes.
pub fn pool(params: &Pool, input: &TextureLayout, output: &TextureLayout) -> Result<ShaderModule> {
    let axes = params.geometry(input.shape())?;
    let dims = [input.shape()[0], input.shape()[1], axes[0].output, axes[1].output];
    let label = match params.kind {
        PoolKind::Max => "MaxPool",
        PoolKind::Average => "AveragePool",
    };
    expect_output(label, output, &dims)?;
    let (y, x) = (&axes[0], &axes[1]);
    let s = input.strides();
    let value = sample(
        0,
        dot([(index(0), s[0]), (index(1), s[1]), (var("iy"), s[2]), (var("ix"), s[3])]),
    );
    // max pooling starts from the first in-window element
    let combine = match params.kind {
        PoolKind::Max => var("count").equals(int(0)).select(value.clone(), var("acc").max(value)),
        PoolKind::Average => var("acc") + value,
    };
    let result = match params.kind {
        PoolKind::Max => var("acc"),
        PoolKind::Average if params.count_include_pad => var("acc") / float((y.kernel * x.kernel) as f32),
        PoolKind::Average => var("acc") / var("count").to_float(),
    };
    let body = vec![
        Stmt::let_float("acc", float(0.0)),
        Stmt::let_int("count", int(0)),
        Stmt::for_range(
            "ky",
            int(0),
            int(y.kernel),
            vec![
                window_index("iy", 2, "ky", y),
                Stmt::when(
                    in_range("iy", y.input),
                    vec![Stmt::for_range(
                        "kx",
                        int(0),
                        int(x.kernel),
                        vec![
                            window_index("ix", 3, "kx", x),
                            Stmt::when(
                                in_range("ix", x.input),
                                vec![
                                    Stmt::assign("acc", combine),
                                    Stmt::assign("count", var("count") + int(1)),
                                ],
                            ),
                        ],
                    )],
                ),
            ],
        ),
        Stmt::Return(result),
    ];
    Ok(ShaderModule::indexed(label, vec![input.clone()], output.clone(), body))
}
