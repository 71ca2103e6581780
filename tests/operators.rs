use briny_texel::approx::approx_eq;
use briny_texel::backend::{Backend, cpu};
use briny_texel::config::{CacheScope, GpuOptions};
use briny_texel::layout::Packing;
use briny_texel::ops::{Attributes, BinaryOp, Operator, UnaryOp};
use briny_texel::tensor;
use briny_texel::tensors::Tensor;
use briny_texel::texture::TextureBackend;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

fn backend(packing: Packing) -> TextureBackend {
    let options = GpuOptions {
        packing,
        prefer_gpu_device: false,
        ..GpuOptions::default()
    };
    TextureBackend::new(&options, false).unwrap()
}

fn random(rng: &mut StdRng, dims: &[usize]) -> Tensor {
    let len: usize = dims.iter().product();
    Tensor::new(dims.to_vec(), (0..len).map(|_| rng.random_range(0.5..2.0)).collect())
}

fn assert_matches_cpu(gpu: &mut TextureBackend, op: &Operator, inputs: &[Tensor]) {
    let expected = cpu::execute(op, inputs).unwrap();
    let actual = gpu.run(op, inputs).unwrap();
    assert_eq!(actual[0].dims(), expected[0].dims(), "{op:?}");
    assert!(
        approx_eq(actual[0].as_f32().unwrap(), expected[0].as_f32().unwrap()),
        "{op:?}: {:?} vs {:?}",
        actual[0].as_f32(),
        expected[0].as_f32()
    );
}

fn node(op_type: &str, attrs: Attributes) -> Operator {
    Operator::from_node(op_type, &attrs).unwrap()
}

const UNARY: [UnaryOp; 15] = [
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
    UnaryOp::Clip { min: 0.8, max: 1.5 },
    UnaryOp::Identity,
];

const BINARY: [BinaryOp; 7] = [
    BinaryOp::Add,
    BinaryOp::Sub,
    BinaryOp::Mul,
    BinaryOp::Div,
    BinaryOp::Pow,
    BinaryOp::Max,
    BinaryOp::Min,
];

#[test]
fn test_unary_matches_cpu() {
    let mut rng = StdRng::seed_from_u64(1);
    for packing in [Packing::Unpacked, Packing::Rgba] {
        let mut gpu = backend(packing);
        let x = random(&mut rng, &[3, 5]);
        for op in UNARY {
            assert_matches_cpu(&mut gpu, &Operator::Unary(op), &[x.clone()]);
        }
    }
}

#[test]
fn test_binary_broadcast_matches_cpu() {
    let mut rng = StdRng::seed_from_u64(2);
    let shapes: [(&[usize], &[usize]); 4] = [
        (&[2, 3, 4], &[2, 3, 4]),
        (&[2, 3, 4], &[3, 1]),
        (&[4], &[2, 3, 4]),
        (&[1], &[5]),
    ];
    for packing in [Packing::Unpacked, Packing::Rgba] {
        let mut gpu = backend(packing);
        for (a, b) in shapes {
            let (a, b) = (random(&mut rng, a), random(&mut rng, b));
            for op in BINARY {
                assert_matches_cpu(&mut gpu, &Operator::Binary(op), &[a.clone(), b.clone()]);
            }
        }
    }
}

#[test]
fn test_matmul_matches_cpu() {
    let mut rng = StdRng::seed_from_u64(3);
    for packing in [Packing::Unpacked, Packing::Rgba] {
        let mut gpu = backend(packing);
        let a = random(&mut rng, &[3, 4]);
        let b = random(&mut rng, &[4, 2]);
        assert_matches_cpu(&mut gpu, &Operator::MatMul, &[a, b]);
        let a = random(&mut rng, &[2, 3, 4]);
        let b = random(&mut rng, &[2, 4, 5]);
        assert_matches_cpu(&mut gpu, &Operator::MatMul, &[a, b]);
    }
}

#[test]
fn test_transpose_and_reshape_match_cpu() {
    let mut rng = StdRng::seed_from_u64(4);
    let mut gpu = backend(Packing::Rgba);
    let x = random(&mut rng, &[2, 3, 4]);
    assert_matches_cpu(&mut gpu, &Operator::Transpose { perm: None }, &[x.clone()]);
    assert_matches_cpu(&mut gpu, &Operator::Transpose { perm: Some(vec![1, 0, 2]) }, &[x.clone()]);
    assert_matches_cpu(&mut gpu, &Operator::Reshape { shape: vec![0, -1] }, &[x.clone()]);
    assert_matches_cpu(&mut gpu, &Operator::Reshape { shape: vec![4, 6] }, &[x]);
}

#[test]
fn test_conv_sums_windows() {
    let mut gpu = backend(Packing::Unpacked);
    let x = Tensor::new(vec![1, 1, 3, 3], (1..=9).map(|v| v as f32).collect());
    let w = Tensor::new(vec![1, 1, 2, 2], vec![1.0; 4]);
    let out = gpu.run(&node("Conv", Attributes::new()), &[x, w]).unwrap();
    assert_eq!(out[0].dims(), &[1, 1, 2, 2]);
    assert!(approx_eq(out[0].as_f32().unwrap(), &[12.0, 16.0, 24.0, 28.0][..]));
}

#[test]
fn test_pooling_windows() {
    let mut gpu = backend(Packing::Rgba);
    let x = Tensor::new(vec![1, 1, 3, 3], (1..=9).map(|v| v as f32).collect());
    let attrs = || Attributes::new().with_ints("kernel_shape", &[2, 2]);

    let out = gpu.run(&node("MaxPool", attrs()), &[x.clone()]).unwrap();
    assert_eq!(out[0].dims(), &[1, 1, 2, 2]);
    assert_eq!(out[0].as_f32().unwrap(), &[5.0, 6.0, 8.0, 9.0]);

    let out = gpu.run(&node("AveragePool", attrs()), &[x]).unwrap();
    assert!(approx_eq(out[0].as_f32().unwrap(), &[3.0, 4.0, 6.0, 7.0][..]));
}

#[test]
fn test_reductions() {
    let mut gpu = backend(Packing::Unpacked);
    let x = tensor!([[1.0, 2.0, 3.0], [4.0, 5.0, 6.0]]);

    let sum = node(
        "ReduceSum",
        Attributes::new().with_ints("axes", &[1]).with_int("keepdims", 0),
    );
    let out = gpu.run(&sum, &[x.clone()]).unwrap();
    assert_eq!(out[0].dims(), &[2]);
    assert!(approx_eq(out[0].as_f32().unwrap(), &[6.0, 15.0][..]));

    let out = gpu.run(&node("ReduceMean", Attributes::new()), &[x.clone()]).unwrap();
    assert_eq!(out[0].dims(), &[1, 1]);
    assert!(approx_eq(out[0].as_f32().unwrap(), &[3.5][..]));

    let max = node("ReduceMax", Attributes::new().with_ints("axes", &[0]));
    let out = gpu.run(&max, &[x]).unwrap();
    assert_eq!(out[0].as_f32().unwrap(), &[4.0, 5.0, 6.0]);
}

#[test]
fn test_slice_and_concat() {
    let mut gpu = backend(Packing::Rgba);
    let x = tensor!([[1.0, 2.0, 3.0], [4.0, 5.0, 6.0]]);

    let slice = node(
        "Slice",
        Attributes::new()
            .with_ints("starts", &[1])
            .with_ints("ends", &[3])
            .with_ints("axes", &[1]),
    );
    let out = gpu.run(&slice, &[x]).unwrap();
    assert_eq!(out[0].dims(), &[2, 2]);
    assert_eq!(out[0].as_f32().unwrap(), &[2.0, 3.0, 5.0, 6.0]);

    let concat = node("Concat", Attributes::new().with_int("axis", 0));
    let out = gpu
        .run(&concat, &[tensor!([[1.0, 2.0]]), tensor!([[3.0, 4.0]]), tensor!([[5.0, 6.0]])])
        .unwrap();
    assert_eq!(out[0].dims(), &[3, 2]);
    assert_eq!(out[0].as_f32().unwrap(), &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
}

#[test]
fn test_end_run_releases_run_scoped_textures() {
    let mut gpu = backend(Packing::Unpacked);
    let x = tensor!([1.0, -2.0, 3.0]);
    let y = gpu.run(&Operator::Unary(UnaryOp::Relu), &[x]).unwrap();
    gpu.run(&Operator::Unary(UnaryOp::Neg), &[y[0].clone()]).unwrap();
    assert!(gpu.handler().cached_textures() > 0);
    gpu.end_run().unwrap();
    assert_eq!(gpu.handler().cached_textures(), 0);
    assert_eq!(gpu.handler().live_textures(), 0);
}

#[test]
fn test_process_scoped_textures_live_until_released() {
    let options = GpuOptions {
        texture_cache: CacheScope::Process,
        prefer_gpu_device: false,
        ..GpuOptions::default()
    };
    let mut gpu = TextureBackend::new(&options, false).unwrap();
    let x = tensor!([1.0, -2.0, 3.0]);
    let y = gpu.run(&Operator::Unary(UnaryOp::Relu), &[x.clone()]).unwrap();
    gpu.end_run().unwrap();
    // the input and the output survive the run boundary
    assert_eq!(gpu.handler().cached_textures(), 2);

    gpu.handler_mut().release(x.id()).unwrap();
    gpu.handler_mut().release(y[0].id()).unwrap();
    assert_eq!(gpu.handler().cached_textures(), 0);
    assert_eq!(gpu.handler().live_textures(), 0);
}
