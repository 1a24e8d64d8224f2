//! Style network trait and the candle-backed feed-forward implementation.
//!
//! # Overview
//!
//! [`StyleNetwork`] is the interface used by the inference executor.  It is
//! object-safe and `Send + Sync` so one loaded model can sit behind an
//! `Arc<dyn StyleNetwork>` and serve several jobs at once.
//!
//! [`TransformerNet`] is the production network: the classic fast
//! style-transfer generator (reflection-padded convolutions, affine
//! instance norm, five residual blocks, nearest-neighbour upsampling).
//! [`TransformerNetLoader`] builds it from a safetensors artifact whose
//! tensor names follow the usual `conv1.conv2d.weight`, `in1.weight`,
//! `res1.conv1.conv2d.weight` … layout.  Extra tensors in the artifact are
//! ignored.
//!
//! Weights are plain tensors, never variables, so the forward pass records
//! no gradients and keeps no intermediate buffers once it returns.

use std::sync::Arc;

use candle_core::{DType, Device, Module, Tensor};
use candle_nn::{Conv2d, Conv2dConfig, Init, VarBuilder};
use thiserror::Error;

use crate::imaging::ImageTensor;
use crate::style::catalog::{StyleDescriptor, StyleId};

// ---------------------------------------------------------------------------
// ModelError
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Error)]
pub enum ModelError {
    /// The artifact for this style is missing, unreadable or malformed.
    #[error("could not load model for style {style}: {reason}")]
    LoadFailed { style: StyleId, reason: String },

    /// The forward pass itself failed.
    #[error("inference failed: {0}")]
    Inference(String),
}

// ---------------------------------------------------------------------------
// Traits
// ---------------------------------------------------------------------------

/// A loaded, read-only style model.
pub trait StyleNetwork: Send + Sync {
    /// Stylize a `0‥255` planar RGB image.  The output uses the same layout
    /// and value convention but is not clamped.
    fn stylize(&self, input: &ImageTensor) -> Result<ImageTensor, ModelError>;
}

/// Turns artifact bytes into a ready-to-run [`StyleNetwork`].
pub trait NetworkLoader: Send + Sync {
    fn load(
        &self,
        style: &StyleDescriptor,
        weights: &[u8],
    ) -> Result<Arc<dyn StyleNetwork>, ModelError>;
}

// Compile-time assertion: both traits must be usable as trait objects.
const _: fn() = || {
    fn _assert_object_safe(_: Box<dyn StyleNetwork>, _: Box<dyn NetworkLoader>) {}
};

// ---------------------------------------------------------------------------
// Layers
// ---------------------------------------------------------------------------

const INSTANCE_NORM_EPS: f64 = 1e-5;

/// Source indices for reflection padding of a dimension of length `len`.
fn reflect_indices(len: usize, pad: usize) -> Vec<u32> {
    let last = len as isize - 1;
    (0..len + 2 * pad)
        .map(|i| {
            let i = i as isize - pad as isize;
            let r = if i < 0 {
                -i
            } else if i > last {
                2 * last - i
            } else {
                i
            };
            r as u32
        })
        .collect()
}

fn reflection_pad2d(x: &Tensor, pad: usize) -> candle_core::Result<Tensor> {
    if pad == 0 {
        return Ok(x.clone());
    }
    let (_, _, h, w) = x.dims4()?;
    if pad >= h || pad >= w {
        candle_core::bail!("reflection padding {pad} needs an input larger than {h}x{w}");
    }
    let rows = Tensor::new(reflect_indices(h, pad).as_slice(), x.device())?;
    let cols = Tensor::new(reflect_indices(w, pad).as_slice(), x.device())?;
    x.index_select(&rows, 2)?.index_select(&cols, 3)
}

/// Reflection pad → (optional nearest upsample first) → conv.
struct ConvLayer {
    conv: Conv2d,
    pad: usize,
    upsample: Option<usize>,
}

impl ConvLayer {
    fn new(
        vb: VarBuilder,
        in_channels: usize,
        out_channels: usize,
        kernel: usize,
        stride: usize,
        upsample: Option<usize>,
    ) -> candle_core::Result<Self> {
        let cfg = Conv2dConfig {
            stride,
            ..Default::default()
        };
        let conv = candle_nn::conv2d(in_channels, out_channels, kernel, cfg, vb.pp("conv2d"))?;
        Ok(Self {
            conv,
            pad: kernel / 2,
            upsample,
        })
    }
}

impl Module for ConvLayer {
    fn forward(&self, x: &Tensor) -> candle_core::Result<Tensor> {
        let x = match self.upsample {
            Some(factor) => {
                let (_, _, h, w) = x.dims4()?;
                x.upsample_nearest2d(h * factor, w * factor)?
            }
            None => x.clone(),
        };
        self.conv.forward(&reflection_pad2d(&x, self.pad)?)
    }
}

/// Per-sample, per-channel normalisation with a learned affine transform.
struct InstanceNorm {
    weight: Tensor,
    bias: Tensor,
}

impl InstanceNorm {
    fn new(vb: VarBuilder, channels: usize) -> candle_core::Result<Self> {
        Ok(Self {
            weight: vb.get_with_hints(channels, "weight", Init::Const(1.0))?,
            bias: vb.get_with_hints(channels, "bias", Init::Const(0.0))?,
        })
    }
}

impl Module for InstanceNorm {
    fn forward(&self, x: &Tensor) -> candle_core::Result<Tensor> {
        let (b, c, h, w) = x.dims4()?;
        let flat = x.reshape((b, c, h * w))?;
        let mean = flat.mean_keepdim(2)?;
        let centered = flat.broadcast_sub(&mean)?;
        let var = centered.sqr()?.mean_keepdim(2)?;
        let normed = centered.broadcast_div(&var.affine(1.0, INSTANCE_NORM_EPS)?.sqrt()?)?;
        normed
            .broadcast_mul(&self.weight.reshape((1, c, 1))?)?
            .broadcast_add(&self.bias.reshape((1, c, 1))?)?
            .reshape((b, c, h, w))
    }
}

struct ResidualBlock {
    conv1: ConvLayer,
    in1: InstanceNorm,
    conv2: ConvLayer,
    in2: InstanceNorm,
}

impl ResidualBlock {
    fn new(vb: VarBuilder, channels: usize) -> candle_core::Result<Self> {
        Ok(Self {
            conv1: ConvLayer::new(vb.pp("conv1"), channels, channels, 3, 1, None)?,
            in1: InstanceNorm::new(vb.pp("in1"), channels)?,
            conv2: ConvLayer::new(vb.pp("conv2"), channels, channels, 3, 1, None)?,
            in2: InstanceNorm::new(vb.pp("in2"), channels)?,
        })
    }
}

impl Module for ResidualBlock {
    fn forward(&self, x: &Tensor) -> candle_core::Result<Tensor> {
        let y = self.in1.forward(&self.conv1.forward(x)?)?.relu()?;
        let y = self.in2.forward(&self.conv2.forward(&y)?)?;
        y + x
    }
}

// ---------------------------------------------------------------------------
// TransformerNet
// ---------------------------------------------------------------------------

/// Feed-forward style-transfer generator.
pub struct TransformerNet {
    down: Vec<(ConvLayer, InstanceNorm)>,
    residuals: Vec<ResidualBlock>,
    up: Vec<(ConvLayer, InstanceNorm)>,
    head: ConvLayer,
    device: Device,
}

impl std::fmt::Debug for TransformerNet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransformerNet")
            .field("residual_blocks", &self.residuals.len())
            .field("device", &self.device)
            .finish_non_exhaustive()
    }
}

impl TransformerNet {
    pub const RESIDUAL_BLOCKS: usize = 5;

    pub fn new(vb: VarBuilder, device: Device) -> candle_core::Result<Self> {
        let down = vec![
            (
                ConvLayer::new(vb.pp("conv1"), 3, 32, 9, 1, None)?,
                InstanceNorm::new(vb.pp("in1"), 32)?,
            ),
            (
                ConvLayer::new(vb.pp("conv2"), 32, 64, 3, 2, None)?,
                InstanceNorm::new(vb.pp("in2"), 64)?,
            ),
            (
                ConvLayer::new(vb.pp("conv3"), 64, 128, 3, 2, None)?,
                InstanceNorm::new(vb.pp("in3"), 128)?,
            ),
        ];

        let residuals = (1..=Self::RESIDUAL_BLOCKS)
            .map(|i| ResidualBlock::new(vb.pp(format!("res{i}")), 128))
            .collect::<candle_core::Result<Vec<_>>>()?;

        let up = vec![
            (
                ConvLayer::new(vb.pp("deconv1"), 128, 64, 3, 1, Some(2))?,
                InstanceNorm::new(vb.pp("in4"), 64)?,
            ),
            (
                ConvLayer::new(vb.pp("deconv2"), 64, 32, 3, 1, Some(2))?,
                InstanceNorm::new(vb.pp("in5"), 32)?,
            ),
        ];

        let head = ConvLayer::new(vb.pp("deconv3"), 32, 3, 9, 1, None)?;

        Ok(Self {
            down,
            residuals,
            up,
            head,
            device,
        })
    }

    fn run(&self, input: &ImageTensor) -> candle_core::Result<ImageTensor> {
        let (w, h) = (input.width() as usize, input.height() as usize);
        let mut x = Tensor::from_vec(input.data().to_vec(), (1, 3, h, w), &self.device)?;

        for (conv, norm) in &self.down {
            x = norm.forward(&conv.forward(&x)?)?.relu()?;
        }
        for block in &self.residuals {
            x = block.forward(&x)?;
        }
        for (conv, norm) in &self.up {
            x = norm.forward(&conv.forward(&x)?)?.relu()?;
        }
        let y = self
            .head
            .forward(&x)?
            .squeeze(0)?
            .to_device(&Device::Cpu)?
            .to_dtype(DType::F32)?;

        let (_, out_h, out_w) = y.dims3()?;
        let data = y.flatten_all()?.to_vec1::<f32>()?;
        ImageTensor::new(out_w as u32, out_h as u32, data)
            .map_err(|e| candle_core::Error::Msg(e.to_string()))
    }
}

impl StyleNetwork for TransformerNet {
    fn stylize(&self, input: &ImageTensor) -> Result<ImageTensor, ModelError> {
        self.run(input)
            .map_err(|e| ModelError::Inference(e.to_string()))
    }
}

// ---------------------------------------------------------------------------
// TransformerNetLoader
// ---------------------------------------------------------------------------

/// Loads safetensors artifacts into [`TransformerNet`]s on a fixed device.
#[derive(Debug, Clone)]
pub struct TransformerNetLoader {
    device: Device,
}

impl TransformerNetLoader {
    /// Use the first CUDA device when `use_gpu` is set and one is present,
    /// the CPU otherwise.
    pub fn new(use_gpu: bool) -> Self {
        let device = if use_gpu {
            Device::cuda_if_available(0).unwrap_or_else(|e| {
                log::warn!("network: CUDA unavailable ({e}); running on CPU");
                Device::Cpu
            })
        } else {
            Device::Cpu
        };
        Self { device }
    }

    pub fn device(&self) -> &Device {
        &self.device
    }
}

impl NetworkLoader for TransformerNetLoader {
    fn load(
        &self,
        style: &StyleDescriptor,
        weights: &[u8],
    ) -> Result<Arc<dyn StyleNetwork>, ModelError> {
        let failed = |e: candle_core::Error| ModelError::LoadFailed {
            style: style.id,
            reason: e.to_string(),
        };
        let tensors = candle_core::safetensors::load_buffer(weights, &self.device).map_err(failed)?;
        let vb = VarBuilder::from_tensors(tensors, DType::F32, &self.device);
        let net = TransformerNet::new(vb, self.device.clone()).map_err(failed)?;
        Ok(Arc::new(net))
    }
}

// ---------------------------------------------------------------------------
// Test doubles
// ---------------------------------------------------------------------------

/// Network that adds a constant to every value, or fails on demand.
#[cfg(test)]
pub struct MockNetwork {
    offset: f32,
    behaviour: MockBehaviour,
}

#[cfg(test)]
enum MockBehaviour {
    Ok,
    Fail,
    Panic,
}

#[cfg(test)]
impl MockNetwork {
    pub fn offset(offset: f32) -> Self {
        Self {
            offset,
            behaviour: MockBehaviour::Ok,
        }
    }

    pub fn failing() -> Self {
        Self {
            offset: 0.0,
            behaviour: MockBehaviour::Fail,
        }
    }

    pub fn panicking() -> Self {
        Self {
            offset: 0.0,
            behaviour: MockBehaviour::Panic,
        }
    }
}

#[cfg(test)]
impl StyleNetwork for MockNetwork {
    fn stylize(&self, input: &ImageTensor) -> Result<ImageTensor, ModelError> {
        match self.behaviour {
            MockBehaviour::Ok => {}
            MockBehaviour::Fail => return Err(ModelError::Inference("mock failure".into())),
            MockBehaviour::Panic => panic!("mock network panicked"),
        }
        let data = input.data().iter().map(|v| v + self.offset).collect();
        ImageTensor::new(input.width(), input.height(), data)
            .map_err(|e| ModelError::Inference(e.to_string()))
    }
}

/// Loader that counts loads per artifact and can be told to be slow or to
/// refuse / break specific artifacts.
#[cfg(test)]
pub struct MockLoader {
    loads: std::sync::Mutex<std::collections::HashMap<String, usize>>,
    delay: std::time::Duration,
    broken: Vec<String>,
    failing_networks: Vec<String>,
    panicking_networks: Vec<String>,
}

#[cfg(test)]
impl MockLoader {
    pub fn new() -> Self {
        Self {
            loads: std::sync::Mutex::new(std::collections::HashMap::new()),
            delay: std::time::Duration::ZERO,
            broken: Vec::new(),
            failing_networks: Vec::new(),
            panicking_networks: Vec::new(),
        }
    }

    pub fn with_delay(mut self, delay: std::time::Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Loading this artifact fails.
    pub fn broken(mut self, artifact: &str) -> Self {
        self.broken.push(artifact.to_string());
        self
    }

    /// This artifact loads, but its network fails every run.
    pub fn failing_network(mut self, artifact: &str) -> Self {
        self.failing_networks.push(artifact.to_string());
        self
    }

    /// This artifact loads, but its network panics every run.
    pub fn panicking_network(mut self, artifact: &str) -> Self {
        self.panicking_networks.push(artifact.to_string());
        self
    }

    pub fn loads_of(&self, artifact: &str) -> usize {
        self.loads.lock().unwrap().get(artifact).copied().unwrap_or(0)
    }

    pub fn total_loads(&self) -> usize {
        self.loads.lock().unwrap().values().sum()
    }
}

#[cfg(test)]
impl NetworkLoader for MockLoader {
    fn load(
        &self,
        style: &StyleDescriptor,
        _weights: &[u8],
    ) -> Result<Arc<dyn StyleNetwork>, ModelError> {
        *self
            .loads
            .lock()
            .unwrap()
            .entry(style.artifact.clone())
            .or_insert(0) += 1;
        if !self.delay.is_zero() {
            std::thread::sleep(self.delay);
        }
        if self.broken.contains(&style.artifact) {
            return Err(ModelError::LoadFailed {
                style: style.id,
                reason: "corrupt artifact".into(),
            });
        }
        if self.failing_networks.contains(&style.artifact) {
            return Ok(Arc::new(MockNetwork::failing()));
        }
        if self.panicking_networks.contains(&style.artifact) {
            return Ok(Arc::new(MockNetwork::panicking()));
        }
        Ok(Arc::new(MockNetwork::offset(style.id.get() as f32)))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
