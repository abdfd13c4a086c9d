use crate::error::{ClassifierError, Result};
use image::{DynamicImage, RgbImage};
use ndarray::{Array3, Array4, Axis};

/// A decoded RGB bitmap, as handed over by the UI layer.
///
/// Grayscale and alpha sources are flattened to three 8-bit channels on
/// construction. A new selection replaces the whole value.
#[derive(Debug, Clone, PartialEq)]
pub struct RawImage {
    pixels: RgbImage,
}

impl RawImage {
    /// Wrap interleaved RGB bytes (`width * height * 3`).
    pub fn from_rgb8(width: u32, height: u32, data: Vec<u8>) -> Result<Self> {
        let expected = width as usize * height as usize * 3;
        let len = data.len();
        RgbImage::from_raw(width, height, data)
            .map(|pixels| Self { pixels })
            .ok_or_else(|| ClassifierError::InvalidImage {
                width,
                height,
                reason: format!("expected {} RGB bytes, got {}", expected, len),
            })
    }

    /// Wrap interleaved RGBA bytes (`width * height * 4`). Alpha is dropped.
    pub fn from_rgba8(width: u32, height: u32, data: Vec<u8>) -> Result<Self> {
        let expected = width as usize * height as usize * 4;
        let len = data.len();
        image::RgbaImage::from_raw(width, height, data)
            .map(|rgba| DynamicImage::ImageRgba8(rgba).into())
            .ok_or_else(|| ClassifierError::InvalidImage {
                width,
                height,
                reason: format!("expected {} RGBA bytes, got {}", expected, len),
            })
    }

    pub fn width(&self) -> u32 {
        self.pixels.width()
    }

    pub fn height(&self) -> u32 {
        self.pixels.height()
    }

    pub fn dimensions(&self) -> (u32, u32) {
        self.pixels.dimensions()
    }

    pub fn as_rgb(&self) -> &RgbImage {
        &self.pixels
    }
}

impl From<DynamicImage> for RawImage {
    fn from(img: DynamicImage) -> Self {
        Self {
            pixels: img.to_rgb8(),
        }
    }
}

impl From<RgbImage> for RawImage {
    fn from(pixels: RgbImage) -> Self {
        Self { pixels }
    }
}

/// Normalized CHW model input, `(3, size, size)`.
#[derive(Debug, Clone, PartialEq)]
pub struct InputTensor(Array3<f32>);

impl InputTensor {
    pub(crate) fn new(data: Array3<f32>) -> Self {
        Self(data)
    }

    pub fn shape(&self) -> &[usize] {
        self.0.shape()
    }

    pub fn as_array(&self) -> &Array3<f32> {
        &self.0
    }

    /// Adds the leading batch axis the ONNX graph expects: `(1, 3, size, size)`.
    pub fn into_batched(self) -> Array4<f32> {
        self.0.insert_axis(Axis(0))
    }
}

/// Raw per-class logits, in class-table order.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoreVector(Vec<f32>);

impl ScoreVector {
    pub fn as_slice(&self) -> &[f32] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<Vec<f32>> for ScoreVector {
    fn from(scores: Vec<f32>) -> Self {
        Self(scores)
    }
}
