use briny_texel::backend::{Backend, cpu};
use briny_texel::config::GpuOptions;
use briny_texel::error::{Error, ErrorCategory};
use briny_texel::layout::Packing;
use briny_texel::ops::{Attributes, Operator, Pad};
use briny_texel::tensor;
use briny_texel::tensors::Tensor;
use briny_texel::texture::TextureBackend;
use briny_texel::texture::operators::texture_operator;
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

fn pad(mode: &str, pads: Vec<isize>, value: f32) -> Operator {
    Operator::Pad(Pad::new(mode, pads, value).unwrap())
}

#[test]
fn test_constant_mode_surrounds_center() {
    let mut gpu = backend(Packing::Unpacked);
    let out = gpu.run(&pad("constant", vec![1, 1, 1, 1], 0.0), &[tensor!([[5.0]])]).unwrap();
    assert_eq!(out[0].dims(), &[3, 3]);
    assert_eq!(
        out[0].as_f32().unwrap(),
        &[0.0, 0.0, 0.0, 0.0, 5.0, 0.0, 0.0, 0.0, 0.0]
    );
}

#[test]
fn test_edge_and_reflect_on_a_vector() {
    for packing in [Packing::Unpacked, Packing::Rgba] {
        let mut gpu = backend(packing);
        let x = tensor!([1.0, 2.0, 3.0]);
        let edge = gpu.run(&pad("edge", vec![2, 2], 0.0), &[x.clone()]).unwrap();
        assert_eq!(edge[0].as_f32().unwrap(), &[1.0, 1.0, 1.0, 2.0, 3.0, 3.0, 3.0]);
        let reflect = gpu.run(&pad("reflect", vec![2, 2], 0.0), &[x]).unwrap();
        assert_eq!(reflect[0].as_f32().unwrap(), &[3.0, 2.0, 1.0, 2.0, 3.0, 2.0, 1.0]);
    }
}

#[test]
fn test_infinite_fill_matches_cpu() {
    for packing in [Packing::Unpacked, Packing::Rgba] {
        let mut gpu = backend(packing);
        let params = Pad::new("constant", vec![1, 0, 0, 2], f32::NEG_INFINITY).unwrap();
        let x = Tensor::new(vec![2, 2], vec![1.0, 2.0, 3.0, 4.0]);
        let out = gpu.run(&Operator::Pad(params.clone()), &[x.clone()]).unwrap();
        assert_eq!(out[0].dims(), &[3, 4]);
        assert_eq!(out[0], cpu::pad(&params, &x).unwrap());
        assert_eq!(out[0].as_f32().unwrap()[..4], [f32::NEG_INFINITY; 4]);
    }
}

#[test]
fn test_pads_beyond_i32_are_rejected() {
    let wide = (1isize << 32) + 1;
    let err = Pad::new("constant", vec![wide, -(1isize << 32)], 9.0).unwrap_err();
    assert!(matches!(err, Error::InvalidAttribute { op: "Pad", name: "pads", .. }));
    assert_eq!(err.category(), ErrorCategory::Configuration);
}

#[test]
fn test_unknown_mode_fails_before_generation() {
    let attrs = Attributes::new()
        .with_string("mode", "wrap")
        .with_ints("pads", &[1, 1]);
    let err = Operator::from_node("Pad", &attrs).unwrap_err();
    assert!(matches!(err, Error::InvalidAttribute { op: "Pad", name: "mode", .. }));
    assert_eq!(err.category(), ErrorCategory::Configuration);
}

#[test]
fn test_repeated_invocation_hits_program_cache() {
    let mut gpu = backend(Packing::Unpacked);
    let op = pad("reflect", vec![1, 2, 1, 2], 0.0);
    let x = Tensor::new(vec![2, 3], vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
    let y = Tensor::new(vec![2, 3], vec![6.0, 5.0, 4.0, 3.0, 2.0, 1.0]);

    let imp = texture_operator(&op).unwrap();
    let a = imp.create_program_info(gpu.handler(), &[x.clone()]).unwrap();
    let b = imp.create_program_info(gpu.handler(), &[y.clone()]).unwrap();
    assert_eq!(a.shader_source, b.shader_source);

    gpu.run(&op, &[x]).unwrap();
    gpu.run(&op, &[y]).unwrap();
    let stats = gpu.handler().program_stats();
    assert_eq!((stats.compiled, stats.hits), (1, 1));
}

#[test]
fn test_reflect_on_unit_axis_is_a_configuration_error() {
    let mut gpu = backend(Packing::Unpacked);
    let err = gpu
        .run(&pad("reflect", vec![1, 1, 1, 1], 0.0), &[tensor!([[5.0]])])
        .unwrap_err();
    assert_eq!(err.category(), ErrorCategory::Configuration);
    assert_eq!(gpu.handler().live_textures(), 0);

    // no padding on the unit axis: a plain copy along it
    let out = gpu
        .run(&pad("reflect", vec![0, 1, 0, 1], 0.0), &[tensor!([[1.0, 2.0]])])
        .unwrap();
    assert_eq!(out[0].as_f32().unwrap(), &[2.0, 1.0, 2.0, 1.0]);
}

#[test]
fn test_shape_law_and_cpu_agreement_on_random_pads() {
    let mut rng = StdRng::seed_from_u64(2024);
    let mut gpu = backend(Packing::Rgba);
    for _ in 0..40 {
        let rank = rng.random_range(1..=3);
        let dims: Vec<usize> = (0..rank).map(|_| rng.random_range(3..=4)).collect();
        let data: Vec<f32> = (0..dims.iter().product::<usize>()).map(|v| v as f32).collect();
        let x = Tensor::new(dims.clone(), data);
        let pads: Vec<isize> = (0..2 * rank).map(|_| rng.random_range(-1i64..=4) as isize).collect();
        let mode = ["constant", "edge", "reflect"][rng.random_range(0..3)];
        let params = Pad::new(mode, pads.clone(), -1.0).unwrap();

        let out = gpu.run(&Operator::Pad(params.clone()), &[x.clone()]).unwrap();
        for (axis, &d) in dims.iter().enumerate() {
            let expected = d as isize + pads[axis] + pads[axis + rank];
            assert_eq!(out[0].dims()[axis] as isize, expected);
        }
        let oracle = cpu::pad(&params, &x).unwrap();
        assert_eq!(out[0], oracle, "{mode} {pads:?} on {dims:?}");
        gpu.end_run().unwrap();
    }
}
