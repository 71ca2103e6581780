//! Texture Layout Encoder.
//!
//! Maps an N-dimensional tensor onto a 2D texture. A layout fixes the
//! row-major `strides` of the tensor shape, the number of channels stored per
//! texel ([`Packing`]) and a `width × height` texture extent. Element `offset`
//! (the row-major linear index) lives at
//!
//! ```text
//! texel   = offset / channels
//! channel = offset % channels
//! x       = texel % width
//! y       = texel / width
//! ```
//!
//! which is closed form and therefore reproducible inside generated shader
//! code without lookup tables. Texels past the last element are padding.
//!
//! The texel count `T = ceil(size / channels)` is split as
//! `height = ceil(T / max)` and `width = ceil(T / height)`, which keeps
//! `width ≤ max` and wastes less than one row of texels.

use crate::error::{Error, Result};
use crate::shape;

/// How many tensor elements a texel stores.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Packing {
    /// One element per texel (single red channel).
    #[default]
    Unpacked,
    /// Four consecutive elements per RGBA texel.
    Rgba,
}

impl Packing {
    /// Number of channels used per texel.
    #[must_use]
    pub const fn channels(self) -> usize {
        match self {
            Self::Unpacked => 1,
            Self::Rgba => 4,
        }
    }
}

/// A texel address plus the channel holding an element.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TexelCoord {
    pub x: usize,
    pub y: usize,
    pub channel: usize,
}

/// Key identifying interchangeable layouts in texture caches.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LayoutKey {
    shape: Vec<usize>,
    packing: Packing,
    width: usize,
}

/// The encoding of one tensor shape into texture memory.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TextureLayout {
    shape: Vec<usize>,
    strides: Vec<usize>,
    width: usize,
    height: usize,
    packing: Packing,
}

impl TextureLayout {
    /// Computes the layout of `shape` for textures at most `max_size` wide.
    ///
    /// The height is not clamped; allocation compares it against the device
    /// limit with [`TextureLayout::check_fits`].
    ///
    /// # Errors
    /// Returns [`Error::InvalidShape`] for non-positive extents and
    /// [`Error::InvalidConfig`] when `max_size` is zero.
    pub fn new(shape: &[usize], packing: Packing, max_size: usize) -> Result<Self> {
        shape::validate_dims(shape)?;
        if max_size == 0 {
            return Err(Error::InvalidConfig("maximum texture size must be positive".into()));
        }
        let texels = shape::size(shape).div_ceil(packing.channels());
        let height = texels.div_ceil(max_size);
        let width = texels.div_ceil(height);
        Ok(Self {
            shape: shape.to_vec(),
            strides: shape::strides(shape),
            width,
            height,
            packing,
        })
    }

    /// The tensor shape this layout encodes.
    #[must_use]
    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    /// Row-major strides over [`TextureLayout::shape`].
    #[must_use]
    pub fn strides(&self) -> &[usize] {
        &self.strides
    }

    #[must_use]
    pub const fn width(&self) -> usize {
        self.width
    }

    #[must_use]
    pub const fn height(&self) -> usize {
        self.height
    }

    #[must_use]
    pub const fn packing(&self) -> Packing {
        self.packing
    }

    #[must_use]
    pub fn rank(&self) -> usize {
        self.shape.len()
    }

    /// Number of tensor elements.
    #[must_use]
    pub fn size(&self) -> usize {
        shape::size(&self.shape)
    }

    /// Number of texels in the texture.
    #[must_use]
    pub const fn texels(&self) -> usize {
        self.width * self.height
    }

    /// Cache key of this layout.
    #[must_use]
    pub fn key(&self) -> LayoutKey {
        LayoutKey {
            shape: self.shape.clone(),
            packing: self.packing,
            width: self.width,
        }
    }

    /// Verifies the texture extent against a device limit.
    ///
    /// # Errors
    /// Returns [`Error::TextureTooLarge`] with the requested extent.
    pub fn check_fits(&self, limit: usize) -> Result<()> {
        if self.width > limit || self.height > limit {
            return Err(Error::TextureTooLarge {
                width: self.width,
                height: self.height,
                limit,
            });
        }
        Ok(())
    }

    /// Linear offset of an N-dimensional index, or `None` if out of range.
    #[must_use]
    pub fn offset_of(&self, indices: &[usize]) -> Option<usize> {
        if indices.len() != self.shape.len() {
            return None;
        }
        let mut offset = 0;
        for ((&i, &d), &s) in indices.iter().zip(&self.shape).zip(&self.strides) {
            if i >= d {
                return None;
            }
            offset += i * s;
        }
        Some(offset)
    }

    /// N-dimensional index of a linear offset.
    #[must_use]
    pub fn indices_of(&self, offset: usize) -> Option<Vec<usize>> {
        if offset >= self.size() {
            return None;
        }
        let mut rest = offset;
        Some(
            self.strides
                .iter()
                .map(|&s| {
                    let i = rest / s;
                    rest %= s;
                    i
                })
                .collect(),
        )
    }

    /// Texel coordinate holding the element at `offset`.
    #[must_use]
    pub fn coord_of(&self, offset: usize) -> Option<TexelCoord> {
        if offset >= self.size() {
            return None;
        }
        let channels = self.packing.channels();
        let texel = offset / channels;
        Some(TexelCoord {
            x: texel % self.width,
            y: texel / self.width,
            channel: offset % channels,
        })
    }

    /// Inverse of [`TextureLayout::coord_of`]; `None` marks unused texels or
    /// channels.
    #[must_use]
    pub fn offset_of_coord(&self, coord: TexelCoord) -> Option<usize> {
        let channels = self.packing.channels();
        if coord.x >= self.width || coord.y >= self.height || coord.channel >= channels {
            return None;
        }
        let offset = (coord.y * self.width + coord.x) * channels + coord.channel;
        (offset < self.size()).then_some(offset)
    }

    /// Rearranges row-major element data into texel-channel order.
    ///
    /// # Errors
    /// Returns [`Error::InvalidTensor`] when `data` has the wrong length.
    pub fn encode(&self, data: &[f32]) -> Result<Vec<f32>> {
        if data.len() != self.size() {
            return Err(Error::InvalidTensor(format!(
                "{} values cannot fill a layout of {:?}",
                data.len(),
                self.shape
            )));
        }
        // texel-channel order coincides with element order, padding is zero
        let mut texels = vec![0.0; self.texels() * self.packing.channels()];
        texels[..data.len()].copy_from_slice(data);
        Ok(texels)
    }

    /// Extracts row-major element data from texel-channel order.
    ///
    /// # Errors
    /// Returns [`Error::Internal`] when `texels` is shorter than the layout.
    pub fn decode(&self, texels: &[f32]) -> Result<Vec<f32>> {
        let needed = self.texels() * self.packing.channels();
        if texels.len() < needed {
            return Err(Error::Internal(format!(
                "texture holds {} values, layout {:?} needs {needed}",
                texels.len(),
                self.shape
            )));
        }
        Ok(texels[..self.size()].to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn small_shapes_fit_in_one_row() {
        let layout = TextureLayout::new(&[2, 3], Packing::Unpacked, 8192).unwrap();
        assert_eq!((layout.width(), layout.height()), (6, 1));
        assert_eq!(layout.strides(), &[3, 1]);
    }

    #[test]
    fn large_shapes_wrap_rows() {
        let layout = TextureLayout::new(&[10, 10], Packing::Unpacked, 16).unwrap();
        assert_eq!(layout.height(), 7);
        assert_eq!(layout.width(), 15);
        assert!(layout.texels() >= 100);
        assert!(layout.texels() - 100 < layout.width());
    }

    #[test]
    fn rgba_packs_four_per_texel() {
        let layout = TextureLayout::new(&[9], Packing::Rgba, 8192).unwrap();
        assert_eq!(layout.texels(), 3);
        assert_eq!(
            layout.coord_of(5),
            Some(TexelCoord { x: 1, y: 0, channel: 1 })
        );
        assert_eq!(layout.offset_of_coord(TexelCoord { x: 2, y: 0, channel: 1 }), None);
    }

    #[test]
    fn scalar_layout_has_one_texel() {
        let layout = TextureLayout::new(&[], Packing::Unpacked, 4).unwrap();
        assert_eq!((layout.width(), layout.height()), (1, 1));
        assert_eq!(layout.offset_of(&[]), Some(0));
        assert_eq!(layout.indices_of(0), Some(vec![]));
    }

    #[test]
    fn rejects_zero_extent() {
        assert!(TextureLayout::new(&[3, 0], Packing::Unpacked, 16).is_err());
    }

    #[test]
    fn oversized_layout_fails_allocation_check() {
        let layout = TextureLayout::new(&[100], Packing::Unpacked, 4).unwrap();
        let err = layout.check_fits(4).unwrap_err();
        assert!(matches!(err, Error::TextureTooLarge { width: 4, height: 25, limit: 4 }));
    }

    #[test]
    fn encode_decode_round_trip() {
        let layout = TextureLayout::new(&[7], Packing::Rgba, 2).unwrap();
        let data: Vec<f32> = (0..7).map(|x| x as f32).collect();
        let texels = layout.encode(&data).unwrap();
        assert_eq!(texels.len(), layout.texels() * 4);
        assert_eq!(layout.decode(&texels).unwrap(), data);
    }
}
