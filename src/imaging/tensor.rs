//! Planar RGB float buffer exchanged between the pipeline and the network.

use super::PipelineError;

/// A 3-channel image in planar `C × H × W` layout (all red values, then all
/// green, then all blue), values nominally in `0.0 ..= 255.0`.
///
/// Immutable once built; every stage produces a fresh tensor.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageTensor {
    width: u32,
    height: u32,
    data: Vec<f32>,
}

impl ImageTensor {
    pub const CHANNELS: usize = 3;

    /// Wrap planar data, checking that its length matches the dimensions.
    pub fn new(width: u32, height: u32, data: Vec<f32>) -> Result<Self, PipelineError> {
        let expected = Self::CHANNELS * width as usize * height as usize;
        if data.len() != expected || expected == 0 {
            return Err(PipelineError::Shape {
                width,
                height,
                len: data.len(),
            });
        }
        Ok(Self {
            width,
            height,
            data,
        })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn data(&self) -> &[f32] {
        &self.data
    }

    pub fn into_data(self) -> Vec<f32> {
        self.data
    }

    /// One colour plane.
    pub fn channel(&self, c: usize) -> &[f32] {
        let plane = self.width as usize * self.height as usize;
        &self.data[c * plane..(c + 1) * plane]
    }
}
