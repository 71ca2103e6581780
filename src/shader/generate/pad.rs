//! Pad generator.
//!
//! Each axis is resolved independently, innermost first, and its source
//! index `k = m[i] - begin[i]` contributes `k * stride[i]` to one flat source
//! offset:
//!
//! - `constant`: `k` outside `[0, extent)` returns the fill value at once.
//! - `edge`: `k` is clamped to `[0, extent - 1]`.
//! - `reflect`: `k = |k| mod 2(extent - 1)`, mirrored to `2(extent - 1) - k`
//!   when it still exceeds `extent - 1`.
//!
//! Reflect is undefined on an axis of extent 1 (the period is zero). Such an
//! axis is rejected when it is actually padded; an unpadded one copies
//! through.

use crate::error::{Error, Result};
use crate::layout::TextureLayout;
use crate::ops::{Pad, PadMode};
use crate::shader::ShaderModule;
use crate::shader::ir::{Stmt, float, index, int, sample, sint, uniform, var};

/// Generates the pad program.
///
/// # Errors
/// Returns [`Error::InvalidAttribute`] for pads that do not match the input
/// rank or a padded extent-1 reflect axis, and [`Error::InvalidShape`] when
/// `output` does not follow the pad shape law.
pub fn pad(pad: &Pad, input: &TextureLayout, output: &TextureLayout) -> Result<ShaderModule> {
    let shape = input.shape();
    let rank = shape.len();
    let expected = crate::shape::pad_shape(shape, &pad.pads)?;
    if expected != output.shape() {
        return Err(Error::shape(
            output.shape(),
            format!("pad of {shape:?} by {:?} produces {expected:?}", pad.pads),
        ));
    }
    let (begin, end) = pad.halves();
    if pad.mode == PadMode::Reflect {
        if let Some(axis) = (0..rank).find(|&i| shape[i] == 1 && (begin[i] != 0 || end[i] != 0)) {
            return Err(Error::attribute(
                "Pad",
                "mode",
                format!("reflect is undefined on axis {axis} of extent 1"),
            ));
        }
    }

    // WGSL has no non-finite literals, so such a fill value travels as a uniform
    let fill = if pad.value.is_finite() {
        float(pad.value)
    } else {
        uniform("value")
    };
    let mut body = vec![Stmt::let_int("offset", int(0)), Stmt::let_int("k", int(0))];
    for axis in (0..rank).rev() {
        let extent = shape[axis];
        body.push(Stmt::assign("k", index(axis) - sint(begin[axis])));
        match pad.mode {
            PadMode::Constant => body.push(Stmt::when(
                var("k").lt(int(0)).or(var("k").ge(int(extent))),
                vec![Stmt::Return(fill.clone())],
            )),
            PadMode::Edge => {
                body.push(Stmt::assign("k", var("k").max(int(0))));
                body.push(Stmt::assign("k", var("k").min(int(extent - 1))));
            }
            PadMode::Reflect if extent == 1 => {}
            PadMode::Reflect => {
                let period = 2 * (extent - 1);
                body.push(Stmt::assign("k", var("k").abs()));
                body.push(Stmt::assign("k", var("k") % int(period)));
                body.push(Stmt::when(
                    var("k").ge(int(extent)),
                    vec![Stmt::assign("k", int(period) - var("k"))],
                ));
            }
        }
        let stride = input.strides()[axis];
        let term = if stride == 1 { var("k") } else { var("k") * int(stride) };
        body.push(Stmt::assign("offset", var("offset") + term));
    }
    body.push(Stmt::Return(sample(0, var("offset"))));

    let module = ShaderModule::indexed(&format!("Pad({})", pad.mode), vec![input.clone()], output.clone(), body);
    Ok(if uniform_values(pad).is_empty() {
        module
    } else {
        module.with_uniform("value")
    })
}

/// Values of the uniforms [`pad`] declares: the fill value when it is not
/// finite, nothing otherwise.
#[must_use]
pub fn uniform_values(pad: &Pad) -> Vec<f32> {
    if pad.mode == PadMode::Constant && !pad.value.is_finite() {
        vec![pad.value]
    } else {
        Vec::new()
    }
}
