//! Output shape inference.
//!
//! Shared by every backend so that texture programs, CPU kernels and the
//! worker pool agree on result shapes and reject the same inputs.

use super::{Conv, Operator, Pool};
use crate::error::{Error, Result};
use crate::shape::{self, AutoPad, WindowAxis};

fn or_ones(values: &[usize], n: usize) -> Vec<usize> {
    if values.is_empty() { vec![1; n] } else { values.to_vec() }
}

fn spatial_pads(values: &[usize], n: usize, auto_pad: AutoPad) -> Vec<usize> {
    if values.is_empty() && auto_pad == AutoPad::NotSet {
        vec![0; 2 * n]
    } else {
        values.to_vec()
    }
}

fn require_nchw(op: &'static str, dims: &[usize]) -> Result<()> {
    if dims.len() != 4 {
        return Err(Error::shape(dims, format!("{op} supports 2-D NCHW input only")));
    }
    Ok(())
}

impl Conv {
    /// Resolves the spatial geometry for `input` (NCHW) and `weight` (OIHW).
    ///
    /// # Errors
    /// Returns [`Error::InvalidShape`] for mismatched channels or ranks and
    /// [`Error::InvalidAttribute`] for inconsistent window parameters.
    pub fn geometry(&self, input: &[usize], weight: &[usize]) -> Result<Vec<WindowAxis>> {
        require_nchw("Conv", input)?;
        require_nchw("Conv", weight)?;
        let group = self.group;
        if group == 0 || input[1] != weight[1] * group || weight[0] % group != 0 {
            return Err(Error::shape(
                input,
                format!("weight {weight:?} does not match {} channel(s) in {group} group(s)", input[1]),
            ));
        }
        if let Some(kernel) = &self.kernel_shape {
            if kernel.as_slice() != &weight[2..] {
                return Err(Error::attribute(
                    "Conv",
                    "kernel_shape",
                    format!("{kernel:?} disagrees with weight {weight:?}"),
                ));
            }
        }
        shape::window_axes(
            "Conv",
            &input[2..],
            &weight[2..],
            &or_ones(&self.strides, 2),
            &or_ones(&self.dilations, 2),
            &spatial_pads(&self.pads, 2, self.auto_pad),
            self.auto_pad,
        )
    }
}

impl Pool {
    /// Resolves the spatial geometry for `input` (NCHW).
    ///
    /// # Errors
    /// Returns [`Error::InvalidShape`] for non-4-D input and
    /// [`Error::InvalidAttribute`] for inconsistent window parameters.
    pub fn geometry(&self, input: &[usize]) -> Result<Vec<WindowAxis>> {
        let op = match self.kind {
            super::PoolKind::Max => "MaxPool",
            super::PoolKind::Average => "AveragePool",
        };
        require_nchw(op, input)?;
        shape::window_axes(
            op,
            &input[2..],
            &self.kernel_shape,
            &or_ones(&self.strides, 2),
            &[1, 1],
            &spatial_pads(&self.pads, 2, self.auto_pad),
            self.auto_pad,
        )
    }
}

impl Operator {
    /// Infers the output shape from the input shapes.
    ///
    /// # Errors
    /// Returns [`Error::InputCount`], [`Error::InvalidShape`] or
    /// [`Error::InvalidAttribute`] when the inputs do not fit the operator.
    pub fn output_shape(&self, inputs: &[&[usize]]) -> Result<Vec<usize>> {
        self.check_inputs(inputs.len())?;
        for dims in inputs {
            shape::validate_dims(dims)?;
        }
        let first = inputs[0];
        match self {
            Self::Unary(_) => Ok(first.to_vec()),
            Self::Binary(_) => shape::broadcast_shape(first, inputs[1]),
            Self::Pad(pad) => shape::pad_shape(first, &pad.pads),
            Self::Transpose { perm } => {
                let perm = shape::transpose_perm(first, perm.as_deref())?;
                Ok(perm.iter().map(|&p| first[p]).collect())
            }
            Self::Reshape { shape } => shape::reshape_shape(first, shape),
            Self::Slice(slice) => Ok(shape::resolve_slice(
                first,
                &slice.starts,
                &slice.ends,
                slice.axes.as_deref(),
                slice.steps.as_deref(),
            )?
            .iter()
            .map(|a| a.extent)
            .collect()),
            Self::Concat { axis } => {
                let axis = shape::normalize_axis("Concat", *axis, first.len())?;
                shape::concat_shape(inputs, axis)
            }
            Self::MatMul => shape::matmul_shape(first, inputs[1]),
            Self::Conv(conv) => {
                let weight = inputs[1];
                let axes = conv.geometry(first, weight)?;
                if let Some(bias) = inputs.get(2) {
                    if *bias != [weight[0]] {
                        return Err(Error::shape(bias, format!("bias must have shape [{}]", weight[0])));
                    }
                }
                Ok(vec![first[0], weight[0], axes[0].output, axes[1].output])
            }
            Self::Pool(pool) => {
                let axes = pool.geometry(first)?;
                Ok(vec![first[0], first[1], axes[0].output, axes[1].output])
            }
            Self::Reduce(reduce) => {
                Ok(shape::reduce_shape(self.name(), first, &reduce.axes, reduce.keep_dims)?.0)
            }
            Self::ArgMax { axis, keep_dims } => {
                let axis = shape::normalize_axis("ArgMax", *axis, first.len())?;
                Ok(shape::reduce_shape("ArgMax", first, &[axis as isize], *keep_dims)?.0)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ops::{BinaryOp, Pad, PoolKind};

    #[test]
    fn pad_follows_shape_law() {
        let op = Operator::Pad(Pad::new("constant", vec![1, 0, 2, 3], 0.0).unwrap());
        assert_eq!(op.output_shape(&[&[2, 2]]).unwrap(), vec![5, 5]);
    }

    #[test]
    fn conv_output_shape() {
        let op = Operator::Conv(Conv {
            pads: vec![1, 1, 1, 1],
            ..Conv::default()
        });
        assert_eq!(
            op.output_shape(&[&[1, 2, 5, 5], &[4, 2, 3, 3], &[4]]).unwrap(),
            vec![1, 4, 5, 5]
        );
        assert!(op.output_shape(&[&[1, 3, 5, 5], &[4, 2, 3, 3]]).is_err());
    }

    #[test]
    fn pool_output_shape() {
        let op = Operator::Pool(Pool {
            kind: PoolKind::Max,
            kernel_shape: vec![2, 2],
            strides: vec![2, 2],
            pads: vec![],
            auto_pad: AutoPad::NotSet,
            count_include_pad: false,
        });
        assert_eq!(op.output_shape(&[&[1, 3, 4, 6]]).unwrap(), vec![1, 3, 2, 3]);
    }

    #[test]
    fn binary_broadcasts() {
        let op = Operator::Binary(BinaryOp::Add);
        assert_eq!(op.output_shape(&[&[2, 1], &[3]]).unwrap(), vec![2, 3]);
        assert!(op.output_shape(&[&[2, 1]]).is_err());
    }
}
