//! Shape arithmetic shared by operators, layouts and kernels.
//!
//! All shapes are row-major `&[usize]` with positive extents. A rank-0 shape
//! (`[]`) describes a scalar holding exactly one element.

use crate::error::{Error, Result};

/// Number of elements described by `dims`.
#[must_use]
pub fn size(dims: &[usize]) -> usize {
    dims.iter().product()
}

/// Row-major strides of `dims`.
#[must_use]
pub fn strides(dims: &[usize]) -> Vec<usize> {
    let mut strides = vec![1; dims.len()];
    for i in (0..dims.len().saturating_sub(1)).rev() {
        strides[i] = strides[i + 1] * dims[i + 1];
    }
    strides
}

/// Rejects non-positive extents and element counts that generated programs
/// cannot address with 32-bit signed integers.
///
/// # Errors
/// Returns [`Error::InvalidShape`].
pub fn validate_dims(dims: &[usize]) -> Result<()> {
    if let Some(axis) = dims.iter().position(|&d| d == 0) {
        return Err(Error::shape(dims, format!("axis {axis} has a non-positive extent")));
    }
    let total = dims
        .iter()
        .try_fold(1usize, |acc, &d| acc.checked_mul(d))
        .ok_or_else(|| Error::shape(dims, "element count overflows"))?;
    if total > i32::MAX as usize {
        return Err(Error::shape(dims, "element count exceeds the 32-bit index range"));
    }
    Ok(())
}

/// Splits ONNX-style pads `[x1_begin, .., xn_begin, x1_end, .., xn_end]`
/// into `(begin, end)` halves.
///
/// # Errors
/// Returns [`Error::InvalidAttribute`] when `pads.len() != 2 * rank`.
pub fn split_pads<'a>(op: &'static str, pads: &'a [isize], rank: usize) -> Result<(&'a [isize], &'a [isize])> {
    if pads.len() != 2 * rank {
        return Err(Error::attribute(
            op,
            "pads",
            format!("expected {} values for rank {rank}, got {}", 2 * rank, pads.len()),
        ));
    }
    Ok(pads.split_at(rank))
}

/// Output shape of padding: `output[i] = input[i] + begin[i] + end[i]`.
///
/// Negative pads crop. Any axis whose output extent would be zero or
/// negative is rejected.
///
/// # Errors
/// Returns [`Error::InvalidAttribute`] for a pads/rank mismatch, a pad outside
/// the `i32` range or an overflowing extent, and [`Error::InvalidShape`] for
/// non-positive input or output extents.
pub fn pad_shape(dims: &[usize], pads: &[isize]) -> Result<Vec<usize>> {
    validate_dims(dims)?;
    let (begin, end) = split_pads("Pad", pads, dims.len())?;
    if let Some(p) = pads.iter().find(|&&p| i32::try_from(p).is_err()) {
        return Err(Error::attribute("Pad", "pads", format!("{p} does not fit in i32")));
    }
    let mut out = Vec::with_capacity(dims.len());
    for (axis, &d) in dims.iter().enumerate() {
        let extent = (d as isize)
            .checked_add(begin[axis])
            .and_then(|e| e.checked_add(end[axis]))
            .ok_or_else(|| Error::attribute("Pad", "pads", format!("extent of axis {axis} overflows")))?;
        if extent <= 0 {
            return Err(Error::shape(
                dims,
                format!("padding {}/{} leaves axis {axis} with extent {extent}", begin[axis], end[axis]),
            ));
        }
        out.push(extent as usize);
    }
    validate_dims(&out)?;
    Ok(out)
}

/// Maps a possibly negative axis into `0..rank`.
///
/// # Errors
/// Returns [`Error::InvalidAttribute`] when the axis is out of range.
pub fn normalize_axis(op: &'static str, axis: isize, rank: usize) -> Result<usize> {
    let r = rank as isize;
    let resolved = if axis < 0 { axis + r } else { axis };
    if resolved < 0 || resolved >= r {
        return Err(Error::attribute(op, "axis", format!("axis {axis} is out of range for rank {rank}")));
    }
    Ok(resolved as usize)
}

/// Multidirectional (numpy-style) broadcast of two shapes.
///
/// # Errors
/// Returns [`Error::InvalidShape`] when an axis pair is incompatible.
pub fn broadcast_shape(a: &[usize], b: &[usize]) -> Result<Vec<usize>> {
    let rank = a.len().max(b.len());
    let mut out = vec![0; rank];
    for i in 0..rank {
        let da = if i < rank - a.len() { 1 } else { a[i - (rank - a.len())] };
        let db = if i < rank - b.len() { 1 } else { b[i - (rank - b.len())] };
        out[i] = match (da, db) {
            (x, y) if x == y => x,
            (1, y) => y,
            (x, 1) => x,
            _ => {
                return Err(Error::shape(
                    a,
                    format!("cannot broadcast with {b:?} on axis {i}"),
                ));
            }
        };
    }
    Ok(out)
}

/// Output shape of a transpose; `perm` defaults to reversing the axes.
///
/// # Errors
/// Returns [`Error::InvalidAttribute`] when `perm` is not a permutation.
pub fn transpose_perm(dims: &[usize], perm: Option<&[usize]>) -> Result<Vec<usize>> {
    let rank = dims.len();
    let perm = match perm {
        Some(p) => p.to_vec(),
        None => (0..rank).rev().collect(),
    };
    let mut seen = vec![false; rank];
    if perm.len() != rank {
        return Err(Error::attribute("Transpose", "perm", format!("{perm:?} does not match rank {rank}")));
    }
    for &p in &perm {
        if p >= rank || seen[p] {
            return Err(Error::attribute("Transpose", "perm", format!("{perm:?} is not a permutation")));
        }
        seen[p] = true;
    }
    Ok(perm)
}

/// Resolves an ONNX reshape target (`0` copies the input extent, one `-1`
/// is inferred).
///
/// # Errors
/// Returns [`Error::InvalidAttribute`] for malformed targets and
/// [`Error::InvalidShape`] when the element counts differ.
pub fn reshape_shape(dims: &[usize], target: &[i64]) -> Result<Vec<usize>> {
    let mut out = Vec::with_capacity(target.len());
    let mut infer = None;
    for (i, &t) in target.iter().enumerate() {
        match t {
            -1 if infer.is_none() => {
                infer = Some(i);
                out.push(1);
            }
            -1 => return Err(Error::attribute("Reshape", "shape", "more than one -1 entry")),
            0 => {
                let copied = dims.get(i).copied().ok_or_else(|| {
                    Error::attribute("Reshape", "shape", format!("entry {i} copies a missing input axis"))
                })?;
                out.push(copied);
            }
            t if t > 0 => out.push(t as usize),
            t => return Err(Error::attribute("Reshape", "shape", format!("invalid extent {t}"))),
        }
    }
    let total = size(dims);
    if let Some(i) = infer {
        let known = size(&out);
        if known == 0 || total % known != 0 {
            return Err(Error::shape(dims, format!("cannot infer reshape target {target:?}")));
        }
        out[i] = total / known;
    }
    if size(&out) != total {
        return Err(Error::shape(dims, format!("cannot reshape into {out:?}")));
    }
    validate_dims(&out)?;
    Ok(out)
}

/// One resolved axis of a slice: output element `j` reads `start + j * step`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SliceAxis {
    pub start: isize,
    pub step: isize,
    pub extent: usize,
}

/// Resolves ONNX slice parameters against `dims`, clamping like ONNX does.
///
/// # Errors
/// Returns [`Error::InvalidAttribute`] for inconsistent parameters and
/// [`Error::InvalidShape`] when a sliced axis would be empty.
pub fn resolve_slice(
    dims: &[usize],
    starts: &[i64],
    ends: &[i64],
    axes: Option<&[isize]>,
    steps: Option<&[i64]>,
) -> Result<Vec<SliceAxis>> {
    let rank = dims.len();
    if starts.len() != ends.len() {
        return Err(Error::attribute("Slice", "ends", "starts and ends differ in length"));
    }
    let axes: Vec<usize> = match axes {
        Some(a) if a.len() != starts.len() => {
            return Err(Error::attribute("Slice", "axes", "axes and starts differ in length"));
        }
        Some(a) => a
            .iter()
            .map(|&ax| normalize_axis("Slice", ax, rank))
            .collect::<Result<_>>()?,
        None => (0..starts.len()).collect(),
    };
    let mut out: Vec<SliceAxis> = dims
        .iter()
        .map(|&d| SliceAxis {
            start: 0,
            step: 1,
            extent: d,
        })
        .collect();
    let mut touched = vec![false; rank];
    for (i, &axis) in axes.iter().enumerate() {
        if axis >= rank || touched[axis] {
            return Err(Error::attribute("Slice", "axes", format!("axis {axis} is repeated or out of range")));
        }
        touched[axis] = true;
        let step = steps.map_or(1, |s| s.get(i).copied().unwrap_or(1));
        if step == 0 {
            return Err(Error::attribute("Slice", "steps", "step must be non-zero"));
        }
        let d = dims[axis] as i64;
        // any larger stride selects the same single element
        let step = step.clamp(-d.max(1), d.max(1));
        let mut start = if starts[i] < 0 { starts[i] + d } else { starts[i] };
        let mut end = if ends[i] < 0 { ends[i] + d } else { ends[i] };
        let extent = if step > 0 {
            start = start.clamp(0, d);
            end = end.clamp(0, d);
            (end - start + step - 1).div_euclid(step).max(0)
        } else {
            start = start.clamp(0, d - 1);
            end = end.clamp(-1, d - 1);
            (start - end - step - 1).div_euclid(-step).max(0)
        };
        if extent == 0 {
            return Err(Error::shape(dims, format!("slice leaves axis {axis} empty")));
        }
        out[axis] = SliceAxis {
            start: start as isize,
            step: step as isize,
            extent: extent as usize,
        };
    }
    Ok(out)
}

/// Output shape of concatenating `shapes` along `axis`.
///
/// # Errors
/// Returns [`Error::InvalidShape`] when non-concatenated axes differ.
pub fn concat_shape(shapes: &[&[usize]], axis: usize) -> Result<Vec<usize>> {
    let first = shapes
        .first()
        .ok_or_else(|| Error::inputs("Concat", "at least 1", 0))?;
    let mut out = first.to_vec();
    if axis >= out.len() {
        return Err(Error::attribute("Concat", "axis", format!("axis {axis} is out of range")));
    }
    for s in &shapes[1..] {
        if s.len() != out.len() || s.iter().enumerate().any(|(i, &d)| i != axis && d != out[i]) {
            return Err(Error::shape(s, format!("cannot concatenate with {first:?} on axis {axis}")));
        }
        out[axis] += s[axis];
    }
    validate_dims(&out)?;
    Ok(out)
}

/// Output shape of a batched matrix product with identical batch axes.
///
/// # Errors
/// Returns [`Error::InvalidShape`] for ranks below 2 or mismatched axes.
pub fn matmul_shape(a: &[usize], b: &[usize]) -> Result<Vec<usize>> {
    if a.len() < 2 || a.len() != b.len() {
        return Err(Error::shape(a, format!("MatMul needs equal ranks of at least 2, got {b:?}")));
    }
    let r = a.len();
    if a[..r - 2] != b[..r - 2] || a[r - 1] != b[r - 2] {
        return Err(Error::shape(a, format!("MatMul is incompatible with {b:?}")));
    }
    let mut out = a[..r - 2].to_vec();
    out.push(a[r - 2]);
    out.push(b[r - 1]);
    Ok(out)
}

/// Output shape of a reduction plus the sorted, de-duplicated reduced axes.
/// Empty `axes` reduces every axis.
///
/// # Errors
/// Returns [`Error::InvalidAttribute`] for out-of-range axes.
pub fn reduce_shape(op: &'static str, dims: &[usize], axes: &[isize], keep_dims: bool) -> Result<(Vec<usize>, Vec<usize>)> {
    let mut reduced: Vec<usize> = if axes.is_empty() {
        (0..dims.len()).collect()
    } else {
        axes.iter()
            .map(|&a| normalize_axis(op, a, dims.len()))
            .collect::<Result<_>>()?
    };
    reduced.sort_unstable();
    reduced.dedup();
    let out = dims
        .iter()
        .enumerate()
        .filter_map(|(i, &d)| match (reduced.contains(&i), keep_dims) {
            (true, true) => Some(1),
            (true, false) => None,
            (false, _) => Some(d),
        })
        .collect();
    Ok((out, reduced))
}

/// ONNX `auto_pad` policy for windowed operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AutoPad {
    /// Use the explicit `pads` attribute.
    #[default]
    NotSet,
    /// No padding.
    Valid,
    /// Pad so that `output = ceil(input / stride)`, extra padding at the end.
    SameUpper,
    /// Same as `SameUpper` with the extra padding at the beginning.
    SameLower,
}

impl core::str::FromStr for AutoPad {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "NOTSET" | "" => Ok(Self::NotSet),
            "VALID" => Ok(Self::Valid),
            "SAME_UPPER" => Ok(Self::SameUpper),
            "SAME_LOWER" => Ok(Self::SameLower),
            other => Err(Error::attribute("Conv", "auto_pad", format!("unknown policy `{other}`"))),
        }
    }
}

/// Resolved geometry of one spatial axis of a windowed operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowAxis {
    pub input: usize,
    pub kernel: usize,
    pub stride: usize,
    pub dilation: usize,
    pub pad_begin: usize,
    pub pad_end: usize,
    pub output: usize,
}

/// Resolves padding and output extents of each spatial axis.
///
/// # Errors
/// Returns [`Error::InvalidAttribute`] for zero strides/dilations, values
/// beyond the `i32` range or a window larger than the padded input.
pub fn window_axes(
    op: &'static str,
    input: &[usize],
    kernel: &[usize],
    strides: &[usize],
    dilations: &[usize],
    pads: &[usize],
    auto_pad: AutoPad,
) -> Result<Vec<WindowAxis>> {
    let n = input.len();
    if kernel.len() != n || strides.len() != n || dilations.len() != n {
        return Err(Error::attribute(op, "kernel_shape", format!("expected {n} spatial values")));
    }
    if auto_pad == AutoPad::NotSet && pads.len() != 2 * n {
        return Err(Error::attribute(op, "pads", format!("expected {} values", 2 * n)));
    }
    let wide = |values: &[usize]| values.iter().any(|&v| i32::try_from(v).is_err());
    if wide(kernel) || wide(strides) || wide(dilations) || wide(pads) {
        return Err(Error::attribute(op, "kernel_shape", "window parameters must fit in i32"));
    }
    let mut axes = Vec::with_capacity(n);
    for i in 0..n {
        if strides[i] == 0 || dilations[i] == 0 || kernel[i] == 0 {
            return Err(Error::attribute(op, "strides", "strides, dilations and kernel must be positive"));
        }
        let effective = dilations[i] * (kernel[i] - 1) + 1;
        let (pad_begin, pad_end) = match auto_pad {
            AutoPad::NotSet => (pads[i], pads[i + n]),
            AutoPad::Valid => (0, 0),
            AutoPad::SameUpper | AutoPad::SameLower => {
                let out = input[i].div_ceil(strides[i]);
                let total = ((out - 1) * strides[i] + effective).saturating_sub(input[i]);
                if auto_pad == AutoPad::SameUpper {
                    (total / 2, total - total / 2)
                } else {
                    (total - total / 2, total / 2)
                }
            }
        };
        let padded = input[i] + pad_begin + pad_end;
        if padded < effective {
            return Err(Error::attribute(
                op,
                "kernel_shape",
                format!("window {effective} exceeds padded extent {padded} on spatial axis {i}"),
            ));
        }
        axes.push(WindowAxis {
            input: input[i],
            kernel: kernel[i],
            stride: strides[i],
            dilation: dilations[i],
            pad_begin,
            pad_end,
            output: (padded - effective) / strides[i] + 1,
        });
    }
    Ok(axes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strides_are_row_major() {
        assert_eq!(strides(&[2, 3, 4]), vec![12, 4, 1]);
        assert!(strides(&[]).is_empty());
        assert_eq!(size(&[]), 1);
    }

    #[test]
    fn pad_shape_adds_both_sides() {
        assert_eq!(pad_shape(&[1, 1], &[1, 1, 1, 1]).unwrap(), vec![3, 3]);
        assert_eq!(pad_shape(&[3], &[2, 2]).unwrap(), vec![7]);
        assert_eq!(pad_shape(&[4, 5], &[0, -1, 1, 0]).unwrap(), vec![5, 4]);
    }

    #[test]
    fn pad_shape_rejects_empty_output() {
        assert!(pad_shape(&[2], &[-1, -1]).is_err());
        assert!(pad_shape(&[2], &[1]).is_err());
        assert!(pad_shape(&[0], &[1, 1]).is_err());
    }

    #[test]
    fn pad_shape_rejects_overflowing_pads() {
        for pads in [[isize::MAX, 1], [1, isize::MAX], [isize::MIN, 0]] {
            let err = pad_shape(&[3], &pads).unwrap_err();
            assert!(matches!(err, Error::InvalidAttribute { op: "Pad", name: "pads", .. }), "{pads:?}");
        }
        // in range individually, too large together
        assert!(matches!(
            pad_shape(&[3], &[i32::MAX as isize, i32::MAX as isize]),
            Err(Error::InvalidShape { .. })
        ));
    }

    #[test]
    fn broadcast_follows_numpy() {
        assert_eq!(broadcast_shape(&[2, 1, 3], &[4, 1]).unwrap(), vec![2, 4, 3]);
        assert_eq!(broadcast_shape(&[], &[5]).unwrap(), vec![5]);
        assert!(broadcast_shape(&[2, 3], &[4]).is_err());
    }

    #[test]
    fn reshape_infers_and_copies() {
        assert_eq!(reshape_shape(&[2, 3, 4], &[0, -1]).unwrap(), vec![2, 12]);
        assert!(reshape_shape(&[2, 3], &[-1, -1]).is_err());
        assert!(reshape_shape(&[2, 3], &[4, 2]).is_err());
    }

    #[test]
    fn slice_clamps_and_steps() {
        let axes = resolve_slice(&[10], &[-3], &[100], None, None).unwrap();
        assert_eq!(axes[0], SliceAxis { start: 7, step: 1, extent: 3 });
        let axes = resolve_slice(&[5], &[4], &[-100], None, Some(&[-2])).unwrap();
        assert_eq!(axes[0], SliceAxis { start: 4, step: -2, extent: 3 });
        assert!(resolve_slice(&[5], &[3], &[3], None, None).is_err());
    }

    #[test]
    fn slice_with_extreme_steps() {
        let axes = resolve_slice(&[5], &[1], &[5], None, Some(&[i64::MAX])).unwrap();
        assert_eq!((axes[0].start, axes[0].extent), (1, 1));
        let axes = resolve_slice(&[5], &[-1], &[i64::MIN], None, Some(&[i64::MIN])).unwrap();
        assert_eq!((axes[0].start, axes[0].extent), (4, 1));
    }

    #[test]
    fn normalize_axis_handles_negatives() {
        assert_eq!(normalize_axis("Concat", -1, 3).unwrap(), 2);
        assert!(normalize_axis("Concat", 3, 3).is_err());
        assert!(normalize_axis("Concat", -4, 3).is_err());
    }

    #[test]
    fn same_upper_keeps_extent() {
        let axes = window_axes("Conv", &[5], &[3], &[1], &[1], &[], AutoPad::SameUpper).unwrap();
        assert_eq!(axes[0].output, 5);
        assert_eq!((axes[0].pad_begin, axes[0].pad_end), (1, 1));
    }

    #[test]
    fn window_parameters_stay_in_i32() {
        let huge = 1usize << 40;
        let err = window_axes("MaxPool", &[5], &[2], &[huge], &[1], &[0, 0], AutoPad::NotSet).unwrap_err();
        assert!(matches!(err, Error::InvalidAttribute { op: "MaxPool", .. }));
        assert!(window_axes("Conv", &[5], &[3], &[1], &[1], &[huge, 0], AutoPad::NotSet).is_err());
    }

    #[test]
    fn reduce_shape_keeps_or_drops() {
        assert_eq!(reduce_shape("ReduceSum", &[2, 3, 4], &[1], true).unwrap().0, vec![2, 1, 4]);
        assert_eq!(reduce_shape("ReduceSum", &[2, 3, 4], &[-1, 0], false).unwrap(), (vec![3], vec![0, 2]));
    }
}
