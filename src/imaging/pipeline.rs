//! Deterministic pre- and post-processing around the style network.
//!
//! ```text
//! raw bytes ──decode──▶ RGB8 ──[center square crop → max_side]──▶ ImageTensor (0‥255)
//! ImageTensor ──clamp 0‥255──▶ RGB8 ──encode──▶ JPEG bytes
//! ```
//!
//! The fit step only runs when the longer side exceeds `max_side`.  It cuts
//! the centred square whose edge is the shorter side out of the source and
//! scales that square to `max_side × max_side`, so extreme aspect ratios lose
//! their edges instead of being padded.  Cropping first keeps every
//! intermediate buffer no larger than the source or the output.

use std::io::Cursor;

use image::codecs::jpeg::JpegEncoder;
use image::imageops::{self, FilterType};
use image::{DynamicImage, ImageReader, RgbImage};

use super::{ImageTensor, PipelineError};
use crate::config::ImageConfig;

// ---------------------------------------------------------------------------
// Geometry
// ---------------------------------------------------------------------------

/// Crop-then-resize plan for an oversized photo.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Geometry {
    /// Top-left corner of the centred square inside the source image.
    pub crop_origin: (u32, u32),
    /// Edge of that square in source pixels: the shorter source side.
    pub crop_side: u32,
    /// Edge of the output square.
    pub side: u32,
}

impl Geometry {
    /// Plan the transform for a `width × height` photo, or `None` when the
    /// photo already fits.
    ///
    /// The crop is centred on the longer axis.  When the leftover is odd the
    /// half-pixel offset rounds to the even neighbour.
    ///
    /// ```
    /// use neural_style::imaging::Geometry;
    ///
    /// let g = Geometry::plan(3000, 2000, 1500).unwrap();
    /// assert_eq!(g.crop_origin, (500, 0));
    /// assert_eq!(g.crop_side, 2000);
    /// assert_eq!(g.side, 1500);
    ///
    /// assert!(Geometry::plan(1500, 900, 1500).is_none());
    /// ```
    pub fn plan(width: u32, height: u32, max_side: u32) -> Option<Self> {
        if width.max(height) <= max_side || max_side == 0 || width.min(height) == 0 {
            return None;
        }

        let crop_side = width.min(height);
        Some(Self {
            crop_origin: (
                centre_offset(width - crop_side),
                centre_offset(height - crop_side),
            ),
            crop_side,
            side: max_side,
        })
    }
}

/// Half of `leftover`, rounding an exact `.5` to the even neighbour.
fn centre_offset(leftover: u32) -> u32 {
    let half = leftover / 2;
    if leftover % 2 == 1 && half % 2 == 1 {
        half + 1
    } else {
        half
    }
}

// ---------------------------------------------------------------------------
// StylizedImage
// ---------------------------------------------------------------------------

/// Encoded output of one stylization.
#[derive(Debug, Clone, PartialEq)]
pub struct StylizedImage {
    pub width: u32,
    pub height: u32,
    /// JPEG bytes.
    pub jpeg: Vec<u8>,
}

// ---------------------------------------------------------------------------
// ImagePipeline
// ---------------------------------------------------------------------------

/// Stateless pre/post-processing stages, configured once.
#[derive(Debug, Clone)]
pub struct ImagePipeline {
    max_side: u32,
    jpeg_quality: u8,
}

impl ImagePipeline {
    pub fn new(config: &ImageConfig) -> Self {
        Self {
            max_side: config.max_side,
            jpeg_quality: config.jpeg_quality.clamp(1, 100),
        }
    }

    pub fn max_side(&self) -> u32 {
        self.max_side
    }

    /// Read only the image header and return its dimensions.
    ///
    /// Cheap enough to run on the session task; used to reject uploads that
    /// are not images before a job is queued.
    pub fn probe(&self, bytes: &[u8]) -> Result<(u32, u32), PipelineError> {
        let reader = ImageReader::new(Cursor::new(bytes))
            .with_guessed_format()
            .map_err(|e| PipelineError::Decode(e.to_string()))?;
        let (width, height) = reader
            .into_dimensions()
            .map_err(|e| PipelineError::Decode(e.to_string()))?;
        if width == 0 || height == 0 {
            return Err(PipelineError::Decode("image has no pixels".into()));
        }
        Ok((width, height))
    }

    /// Decode, fit and convert a photo into the network's input layout.
    pub fn preprocess(&self, bytes: &[u8]) -> Result<ImageTensor, PipelineError> {
        let decoded =
            image::load_from_memory(bytes).map_err(|e| PipelineError::Decode(e.to_string()))?;
        let rgb = decoded.to_rgb8();
        drop(decoded);

        let fitted = match Geometry::plan(rgb.width(), rgb.height(), self.max_side) {
            Some(g) => {
                let square = imageops::crop_imm(
                    &rgb,
                    g.crop_origin.0,
                    g.crop_origin.1,
                    g.crop_side,
                    g.crop_side,
                )
                .to_image();
                drop(rgb);
                if g.crop_side == g.side {
                    square
                } else {
                    imageops::resize(&square, g.side, g.side, FilterType::Triangle)
                }
            }
            None => rgb,
        };

        to_planar(&fitted)
    }

    /// Clamp, quantise and JPEG-encode a network output.
    ///
    /// NaN maps to 0; everything else is clamped into `0 ..= 255` and
    /// truncated to 8 bits.
    pub fn postprocess(&self, tensor: &ImageTensor) -> Result<StylizedImage, PipelineError> {
        let (width, height) = (tensor.width(), tensor.height());
        let plane = width as usize * height as usize;
        let data = tensor.data();

        let mut raw = Vec::with_capacity(plane * ImageTensor::CHANNELS);
        for i in 0..plane {
            for c in 0..ImageTensor::CHANNELS {
                raw.push(quantise(data[c * plane + i]));
            }
        }

        let rgb = RgbImage::from_raw(width, height, raw).ok_or(PipelineError::Shape {
            width,
            height,
            len: data.len(),
        })?;

        let mut jpeg = Vec::new();
        JpegEncoder::new_with_quality(&mut jpeg, self.jpeg_quality)
            .encode_image(&DynamicImage::ImageRgb8(rgb))
            .map_err(|e| PipelineError::Encode(e.to_string()))?;

        Ok(StylizedImage {
            width,
            height,
            jpeg,
        })
    }
}

fn quantise(v: f32) -> u8 {
    if v.is_nan() {
        0
    } else {
        v.clamp(0.0, 255.0) as u8
    }
}

fn to_planar(rgb: &RgbImage) -> Result<ImageTensor, PipelineError> {
    let plane = rgb.width() as usize * rgb.height() as usize;
    let mut data = vec![0.0f32; plane * ImageTensor::CHANNELS];
    for (i, px) in rgb.as_raw().chunks_exact(ImageTensor::CHANNELS).enumerate() {
        for (c, &v) in px.iter().enumerate() {
            data[c * plane + i] = v as f32;
        }
    }
    ImageTensor::new(rgb.width(), rgb.height(), data)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
