//! The three-phase operator contract of the texture backend.
//!
//! Every operator kind the texture backend runs implements
//! [`TextureOperator`]:
//!
//! 1. `create_program_info`: shapes, layouts and the generated program. Pure
//!    with respect to device state; identical inputs give identical source.
//! 2. `create_run_data`: resolves input textures through the handler,
//!    allocates the output and fills uniform values.
//! 3. `run`: drives (1) and (2) through the program manager. The shared
//!    default is enough for every kind implemented here.
//!
//! Kinds map to implementations through a `lazy_static` table
//! ([`texture_operator`]) rather than a type hierarchy. Kinds missing from
//! the table (`ArgMax`) are left to the registry's CPU fallback.

use std::collections::HashMap;

use crate::error::{Error, Result};
use crate::layout::TextureLayout;
use crate::ops::{OpKind, Operator, Pad, UnaryOp};
use crate::shader::generate;
use crate::tensors::{DataType, Tensor};

use super::handler::InferenceHandler;
use super::program::{ProgramInfo, RunData};

/// Capability interface of one operator kind on the texture backend.
pub trait TextureOperator {
    /// Builds the program description for `inputs`.
    ///
    /// # Errors
    /// Configuration errors; no device resource has been touched when they
    /// are returned.
    fn create_program_info(&self, handler: &InferenceHandler, inputs: &[Tensor]) -> Result<ProgramInfo>;

    /// Resolves input textures and allocates the output.
    ///
    /// # Errors
    /// Resource errors from allocation or upload.
    fn create_run_data(&self, handler: &mut InferenceHandler, info: &ProgramInfo, inputs: &[Tensor]) -> Result<RunData>;

    /// Executes the operator and returns its output tensors.
    ///
    /// The output texture stays cached under the returned tensor's id. It is
    /// freed again if the dispatch fails.
    ///
    /// # Errors
    /// Any error of the three phases.
    fn run(&self, handler: &mut InferenceHandler, inputs: &[Tensor]) -> Result<Vec<Tensor>> {
        let info = self.create_program_info(handler, inputs)?;
        let run = self.create_run_data(handler, &info, inputs)?;
        if let Err(e) = handler.run_program(&info, &run) {
            handler.release_texture_data(&run.output)?;
            return Err(e);
        }
        Ok(vec![handler.materialize(run.output)?])
    }
}

/// Data movement keeps the element type; arithmetic produces floats.
fn output_type(op: &Operator, inputs: &[Tensor]) -> DataType {
    match op {
        Operator::Pad(_)
        | Operator::Transpose { .. }
        | Operator::Reshape { .. }
        | Operator::Slice(_)
        | Operator::Concat { .. } => inputs.first().map_or(DataType::Float32, Tensor::data_type),
        _ => DataType::Float32,
    }
}

fn input_layouts(handler: &InferenceHandler, inputs: &[Tensor]) -> Result<Vec<TextureLayout>> {
    inputs.iter().map(|t| handler.get_or_create_texture_layout(t)).collect()
}

/// Run data shared by every kind: one texture per input in binding order,
/// a fresh unpacked output, and the uniforms zipped with their names.
fn default_run_data(
    handler: &mut InferenceHandler,
    info: &ProgramInfo,
    inputs: &[Tensor],
    data_type: DataType,
    values: Vec<f32>,
) -> Result<RunData> {
    if values.len() != info.module.uniforms.len() {
        return Err(Error::Internal(format!(
            "`{}` declares {} uniforms, {} supplied",
            info.label,
            info.module.uniforms.len(),
            values.len()
        )));
    }
    let textures = inputs
        .iter()
        .zip(&info.input_layouts)
        .map(|(tensor, layout)| handler.get_or_create_texture_data(tensor, layout))
        .collect::<Result<Vec<_>>>()?;
    let output = handler.create_texture_data_from_layout(&info.output_layout, data_type)?;
    Ok(RunData {
        inputs: textures,
        output,
        uniforms: info.module.uniforms.iter().cloned().zip(values).collect(),
    })
}

/// Pad with a constant, edge or reflect boundary.
pub struct TexturePad<'a> {
    pub params: &'a Pad,
}

impl TextureOperator for TexturePad<'_> {
    fn create_program_info(&self, handler: &InferenceHandler, inputs: &[Tensor]) -> Result<ProgramInfo> {
        let [input] = inputs else {
            return Err(Error::inputs("Pad", "1", inputs.len()));
        };
        let layout = handler.get_or_create_texture_layout(input)?;
        let dims = crate::shape::pad_shape(input.dims(), &self.params.pads)?;
        let output = handler.create_basic_texture_layout(&dims)?;
        ProgramInfo::new(generate::pad::pad(self.params, &layout, &output)?)
    }

    fn create_run_data(&self, handler: &mut InferenceHandler, info: &ProgramInfo, inputs: &[Tensor]) -> Result<RunData> {
        let data_type = inputs.first().map_or(DataType::Float32, Tensor::data_type);
        default_run_data(handler, info, inputs, data_type, generate::pad::uniform_values(self.params))
    }
}

/// Elementwise unary math; `LeakyRelu` and `Clip` take their scalars as
/// uniforms so one program serves every parameter value.
pub struct TextureUnary {
    pub op: UnaryOp,
}

impl TextureOperator for TextureUnary {
    fn create_program_info(&self, handler: &InferenceHandler, inputs: &[Tensor]) -> Result<ProgramInfo> {
        let [input] = inputs else {
            return Err(Error::inputs(self.op.kind().name(), "1", inputs.len()));
        };
        let layout = handler.get_or_create_texture_layout(input)?;
        let output = handler.create_basic_texture_layout(input.dims())?;
        ProgramInfo::new(generate::elementwise::unary(self.op, &layout, &output))
    }

    fn create_run_data(&self, handler: &mut InferenceHandler, info: &ProgramInfo, inputs: &[Tensor]) -> Result<RunData> {
        let values = generate::elementwise::uniform_values(self.op);
        default_run_data(handler, info, inputs, DataType::Float32, values)
    }
}

/// Every other kind: output shape from the descriptor, program from the
/// family generator.
pub struct TextureGeneric<'a> {
    pub op: &'a Operator,
}

impl TextureOperator for TextureGeneric<'_> {
    fn create_program_info(&self, handler: &InferenceHandler, inputs: &[Tensor]) -> Result<ProgramInfo> {
        self.op.check_inputs(inputs.len())?;
        let layouts = input_layouts(handler, inputs)?;
        let shapes: Vec<&[usize]> = inputs.iter().map(Tensor::dims).collect();
        let dims = self.op.output_shape(&shapes)?;
        let output = handler.create_basic_texture_layout(&dims)?;
        ProgramInfo::new(generate::program(self.op, &layouts, &output)?)
    }

    fn create_run_data(&self, handler: &mut InferenceHandler, info: &ProgramInfo, inputs: &[Tensor]) -> Result<RunData> {
        let data_type = output_type(self.op, inputs);
        default_run_data(handler, info, inputs, data_type, generate::uniform_values(self.op))
    }
}

type Factory = for<'a> fn(&'a Operator) -> Option<Box<dyn TextureOperator + 'a>>;

fn pad_operator(op: &Operator) -> Option<Box<dyn TextureOperator + '_>> {
    match op {
        Operator::Pad(params) => Some(Box::new(TexturePad { params })),
        _ => None,
    }
}

fn unary_operator(op: &Operator) -> Option<Box<dyn TextureOperator + '_>> {
    match op {
        Operator::Unary(u) => Some(Box::new(TextureUnary { op: *u })),
        _ => None,
    }
}

fn generic_operator(op: &Operator) -> Option<Box<dyn TextureOperator + '_>> {
    Some(Box::new(TextureGeneric { op }))
}

lazy_static::lazy_static! {
    static ref TEXTURE_OPERATORS: HashMap<OpKind, Factory> = {
        let mut table: HashMap<OpKind, Factory> = HashMap::new();
        for kind in OpKind::ALL {
            let factory: Factory = match kind {
                OpKind::ArgMax => continue,
                OpKind::Pad => pad_operator,
                OpKind::Abs
                | OpKind::Neg
                | OpKind::Relu
                | OpKind::LeakyRelu
                | OpKind::Sigmoid
                | OpKind::Tanh
                | OpKind::Exp
                | OpKind::Log
                | OpKind::Sqrt
                | OpKind::Sin
                | OpKind::Cos
                | OpKind::Floor
                | OpKind::Ceil
                | OpKind::Clip
                | OpKind::Identity => unary_operator,
                _ => generic_operator,
            };
            table.insert(kind, factory);
        }
        table
    };
}

/// Whether the texture backend has an implementation for `kind`.
#[must_use]
pub fn supports(kind: OpKind) -> bool {
    TEXTURE_OPERATORS.contains_key(&kind)
}

/// The implementation of `op`, or `None` when the kind has none.
#[must_use]
pub fn texture_operator(op: &Operator) -> Option<Box<dyn TextureOperator + '_>> {
    TEXTURE_OPERATORS.get(&op.kind()).and_then(|factory| factory(op))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GpuOptions;
    use crate::layout::Packing;
    use crate::texture::host::HostDevice;

    fn handler(packing: Packing) -> InferenceHandler {
        let options = GpuOptions {
            packing,
            ..GpuOptions::default()
        };
        InferenceHandler::new(Box::new(HostDevice::new(8192)), options, false)
    }

    #[test]
    fn argmax_has_no_texture_program() {
        assert!(!supports(OpKind::ArgMax));
        assert!(supports(OpKind::Pad) && supports(OpKind::Conv));
        let op = Operator::ArgMax { axis: 0, keep_dims: true };
        assert!(texture_operator(&op).is_none());
    }

    #[test]
    fn program_info_is_deterministic_and_device_free() {
        let h = handler(Packing::Unpacked);
        let op = Operator::Pad(Pad::new("reflect", vec![2, 2], 0.0).unwrap());
        let t = Tensor::new(vec![3], vec![1.0, 2.0, 3.0]);
        let imp = texture_operator(&op).unwrap();
        let a = imp.create_program_info(&h, &[t.clone()]).unwrap();
        let b = imp.create_program_info(&h, &[t]).unwrap();
        assert_eq!(a.shader_source, b.shader_source);
        assert_eq!(a.output_layout.shape(), &[7]);
        assert!(!a.has_main);
        assert_eq!(h.live_textures(), 0);
    }

    #[test]
    fn run_pads_packed_input() {
        let mut h = handler(Packing::Rgba);
        let op = Operator::Pad(Pad::new("edge", vec![2, 2], 0.0).unwrap());
        let t = Tensor::new(vec![3], vec![1.0, 2.0, 3.0]);
        let out = texture_operator(&op).unwrap().run(&mut h, &[t]).unwrap();
        assert_eq!(out[0].as_f32().unwrap(), &[1.0, 1.0, 1.0, 2.0, 3.0, 3.0, 3.0]);
    }

    #[test]
    fn chained_operators_reuse_output_textures() {
        let mut h = handler(Packing::Unpacked);
        let relu = Operator::Unary(UnaryOp::Relu);
        let neg = Operator::Unary(UnaryOp::Neg);
        let t = Tensor::new(vec![4], vec![-1.0, 2.0, -3.0, 4.0]);
        let first = texture_operator(&relu).unwrap().run(&mut h, &[t]).unwrap();
        assert_eq!(h.live_textures(), 2);
        let second = texture_operator(&neg).unwrap().run(&mut h, &first).unwrap();
        // relu's output texture is bound directly, only neg's output is new
        assert_eq!(h.live_textures(), 3);
        assert_eq!(second[0].as_f32().unwrap(), &[-0.0, -2.0, -0.0, -4.0]);
    }

    #[test]
    fn unary_uniforms_reach_the_program() {
        let mut h = handler(Packing::Unpacked);
        let op = Operator::Unary(UnaryOp::Clip { min: -1.0, max: 1.0 });
        let t = Tensor::new(vec![3], vec![-5.0, 0.5, 5.0]);
        let out = texture_operator(&op).unwrap().run(&mut h, &[t]).unwrap();
        assert_eq!(out[0].as_f32().unwrap(), &[-1.0, 0.5, 1.0]);
    }

    #[test]
    fn reshape_keeps_integer_type() {
        let mut h = handler(Packing::Unpacked);
        let op = Operator::Reshape { shape: vec![2, -1] };
        let t = Tensor::from_data(vec![4], crate::tensors::TensorData::Int32(vec![1, 2, 3, 4])).unwrap();
        let out = texture_operator(&op).unwrap().run(&mut h, &[t]).unwrap();
        assert_eq!(out[0].dims(), &[2, 2]);
        assert_eq!(out[0].data_type(), DataType::Int32);
    }
}
