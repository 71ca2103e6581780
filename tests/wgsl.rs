use briny_texel::config::GpuOptions;
use briny_texel::layout::Packing;
use briny_texel::ops::{Attributes, BinaryOp, Operator, Pad, UnaryOp};
use briny_texel::tensors::Tensor;
use briny_texel::texture::TextureBackend;
use briny_texel::texture::operators::texture_operator;
use naga::valid::{Capabilities, ValidationFlags, Validator};

fn backend(packing: Packing) -> TextureBackend {
    let options = GpuOptions {
        packing,
        prefer_gpu_device: false,
        ..GpuOptions::default()
    };
    TextureBackend::new(&options, false).unwrap()
}

fn ramp(dims: &[usize]) -> Tensor {
    let len: usize = dims.iter().product();
    Tensor::new(dims.to_vec(), (0..len).map(|v| v as f32 - 3.0).collect())
}

fn node(op_type: &str, attrs: Attributes) -> Operator {
    Operator::from_node(op_type, &attrs).unwrap()
}

/// One operator of every generator family with inputs it accepts.
fn programs() -> Vec<(Operator, Vec<Tensor>)> {
    let mut cases = Vec::new();
    for mode in ["constant", "edge", "reflect"] {
        let pad = Pad::new(mode, vec![1, -1, 2, 3], 2.5).unwrap();
        cases.push((Operator::Pad(pad), vec![ramp(&[3, 4])]));
    }
    for value in [f32::NEG_INFINITY, f32::INFINITY, f32::NAN] {
        let pad = Pad::new("constant", vec![2, 1], value).unwrap();
        cases.push((Operator::Pad(pad), vec![ramp(&[3])]));
    }
    for op in [
        UnaryOp::Abs,
        UnaryOp::Neg,
        UnaryOp::Relu,
        UnaryOp::LeakyRelu { alpha: 0.1 },
        UnaryOp::Sigmoid,
        UnaryOp::Tanh,
        UnaryOp::Exp,
        UnaryOp::Log,
        UnaryOp::Sqrt,
        UnaryOp::Sin,
        UnaryOp::Cos,
        UnaryOp::Floor,
        UnaryOp::Ceil,
        UnaryOp::Clip { min: -1.0, max: 1.0 },
        UnaryOp::Identity,
    ] {
        cases.push((Operator::Unary(op), vec![ramp(&[2, 5])]));
    }
    for op in [
        BinaryOp::Add,
        BinaryOp::Sub,
        BinaryOp::Mul,
        BinaryOp::Div,
        BinaryOp::Pow,
        BinaryOp::Max,
        BinaryOp::Min,
    ] {
        cases.push((Operator::Binary(op), vec![ramp(&[2, 3, 4]), ramp(&[3, 1])]));
    }
    cases.push((Operator::Transpose { perm: Some(vec![2, 0, 1]) }, vec![ramp(&[2, 3, 4])]));
    cases.push((Operator::Reshape { shape: vec![4, -1] }, vec![ramp(&[2, 3, 4])]));
    cases.push((
        node(
            "Slice",
            Attributes::new()
                .with_ints("starts", &[-1, 1])
                .with_ints("ends", &[-4, 4])
                .with_ints("axes", &[0, 1])
                .with_ints("steps", &[-1, 2]),
        ),
        vec![ramp(&[3, 4])],
    ));
    cases.push((
        node("Concat", Attributes::new().with_int("axis", 1)),
        vec![ramp(&[2, 1]), ramp(&[2, 3]), ramp(&[2, 2])],
    ));
    cases.push((Operator::MatMul, vec![ramp(&[2, 3, 4]), ramp(&[2, 4, 5])]));
    cases.push((
        node(
            "Conv",
            Attributes::new()
                .with_ints("pads", &[1, 1, 1, 1])
                .with_ints("strides", &[2, 2]),
        ),
        vec![ramp(&[1, 1, 4, 4]), ramp(&[2, 1, 2, 2]), ramp(&[2])],
    ));
    cases.push((
        node("Conv", Attributes::new().with_int("group", 2)),
        vec![ramp(&[1, 2, 4, 4]), ramp(&[2, 1, 3, 3])],
    ));
    for (op_type, include_pad) in [("MaxPool", 0), ("AveragePool", 0), ("AveragePool", 1)] {
        let attrs = Attributes::new()
            .with_ints("kernel_shape", &[2, 2])
            .with_ints("pads", &[1, 1, 1, 1])
            .with_int("count_include_pad", include_pad);
        cases.push((node(op_type, attrs), vec![ramp(&[1, 2, 3, 3])]));
    }
    for op_type in ["ReduceSum", "ReduceMean", "ReduceMax", "ReduceMin"] {
        let attrs = Attributes::new().with_ints("axes", &[0, 2]).with_int("keepdims", 0);
        cases.push((node(op_type, attrs), vec![ramp(&[2, 3, 4])]));
    }
    cases
}

#[test]
fn test_every_generated_program_is_valid_wgsl() {
    for packing in [Packing::Unpacked, Packing::Rgba] {
        let gpu = backend(packing);
        for (op, inputs) in programs() {
            let imp = texture_operator(&op).unwrap();
            let info = imp.create_program_info(gpu.handler(), &inputs).unwrap();
            let source = &info.shader_source;
            assert!(!source.contains("bitcast"), "{op:?}:\n{source}");

            let module = naga::front::wgsl::parse_str(source)
                .unwrap_or_else(|err| panic!("{op:?} ({packing:?}): {}\n{source}", err.emit_to_string(source)));
            Validator::new(ValidationFlags::all(), Capabilities::all())
                .validate(&module)
                .unwrap_or_else(|err| panic!("{op:?} ({packing:?}): {err:?}\n{source}"));
        }
    }
}

#[test]
fn test_non_finite_pad_value_is_bound_as_a_uniform() {
    let gpu = backend(Packing::Unpacked);
    let op = Operator::Pad(Pad::new("constant", vec![1, 0], f32::NEG_INFINITY).unwrap());
    let info = texture_operator(&op)
        .unwrap()
        .create_program_info(gpu.handler(), &[ramp(&[2])])
        .unwrap();
    assert_eq!(info.module.uniforms, vec!["value".to_owned()]);
    assert!(info.shader_source.contains("var<uniform> u: Uniforms;"));
    assert!(!info.shader_source.contains("inf"));
}
