//! Image pre/post-processing for the style network.
//!
//! * [`ImagePipeline`]: decode → fit → planar float tensor, and back to JPEG.
//! * [`ImageTensor`]: the planar RGB buffer the network consumes and emits.
//! * [`Geometry`]: the crop-and-resize plan for oversized photos.
//! * [`PipelineError`]: decode / encode / shape failures.

pub mod pipeline;
pub mod tensor;

use thiserror::Error;

pub use pipeline::{Geometry, ImagePipeline, StylizedImage};
pub use tensor::ImageTensor;

/// Failures of the image stages.
#[derive(Debug, Clone, Error)]
pub enum PipelineError {
    /// The bytes are not an image in a supported format.
    #[error("unsupported or corrupt image: {0}")]
    Decode(String),

    /// The JPEG encoder rejected the output.
    #[error("could not encode output image: {0}")]
    Encode(String),

    /// Buffer length does not match `3 × width × height`.
    #[error("tensor shape mismatch: {width}x{height} with {len} values")]
    Shape { width: u32, height: u32, len: usize },
}
