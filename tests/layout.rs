use briny_texel::error::Error;
use briny_texel::layout::{Packing, TexelCoord, TextureLayout};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

fn random_shape(rng: &mut StdRng) -> Vec<usize> {
    let rank = rng.random_range(0..=4);
    (0..rank).map(|_| rng.random_range(1..=6)).collect()
}

#[test]
fn test_mapping_is_bijective_on_random_shapes() {
    let mut rng = StdRng::seed_from_u64(0x7e7e1);
    for _ in 0..200 {
        let shape = random_shape(&mut rng);
        let packing = if rng.random_bool(0.5) { Packing::Rgba } else { Packing::Unpacked };
        let max = rng.random_range(1..=32);
        let layout = TextureLayout::new(&shape, packing, max).unwrap();
        let channels = packing.channels();

        assert!(layout.width() <= max);
        assert!(layout.texels() * channels >= layout.size());

        let mut seen = vec![false; layout.size()];
        for y in 0..layout.height() {
            for x in 0..layout.width() {
                for channel in 0..channels {
                    if let Some(offset) = layout.offset_of_coord(TexelCoord { x, y, channel }) {
                        assert!(!seen[offset], "offset {offset} decoded twice for {shape:?}");
                        seen[offset] = true;
                        assert_eq!(layout.coord_of(offset), Some(TexelCoord { x, y, channel }));
                    }
                }
            }
        }
        assert!(seen.iter().all(|&s| s), "unreached offsets for {shape:?}");

        for offset in 0..layout.size() {
            let indices = layout.indices_of(offset).unwrap();
            assert_eq!(layout.offset_of(&indices), Some(offset));
        }
    }
}

#[test]
fn test_waste_is_below_one_texel_per_row() {
    let mut rng = StdRng::seed_from_u64(42);
    for _ in 0..100 {
        let shape = random_shape(&mut rng);
        let layout = TextureLayout::new(&shape, Packing::Unpacked, rng.random_range(1..=16)).unwrap();
        assert!(layout.texels() - layout.size() < layout.height());
    }
}

#[test]
fn test_encode_decode_preserve_elements() {
    let layout = TextureLayout::new(&[3, 3], Packing::Rgba, 2).unwrap();
    let data: Vec<f32> = (0..9).map(|v| v as f32).collect();
    let texels = layout.encode(&data).unwrap();
    assert_eq!(texels.len(), layout.texels() * 4);
    assert!(texels[9..].iter().all(|&v| v == 0.0));
    assert_eq!(layout.decode(&texels).unwrap(), data);
}

#[test]
fn test_invalid_shapes_are_rejected() {
    assert!(matches!(
        TextureLayout::new(&[2, 0, 3], Packing::Unpacked, 8192),
        Err(Error::InvalidShape { .. })
    ));
    let tall = TextureLayout::new(&[100], Packing::Unpacked, 8).unwrap();
    assert!(matches!(tall.check_fits(8), Err(Error::TextureTooLarge { height: 13, .. })));
}
