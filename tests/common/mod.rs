//! Shared fixtures for the integration tests.

#![allow(dead_code)]

use std::sync::Arc;

use candle_core::{DType, Device, Tensor};
use lwan::encoder::SequenceEncoder;
use lwan::{AttentionType, LwanConfig, LabelwiseModel, TokenSequence};

pub const PAD: u32 = 0;

/// Deterministic stand-in for a pretrained encoder.
///
/// Each real token becomes `sin(id * freq_d + phase_d) + 0.01 * position`
/// in every hidden dimension `d`; padded positions are zero. The output of a
/// window depends only on its own real tokens, never on its width.
pub struct MockEncoder {
    device: Device,
    hidden_size: usize,
    max_len: usize,
    fail: bool,
}

impl MockEncoder {
    pub fn new(hidden_size: usize, max_len: usize) -> Self {
        Self {
            device: Device::Cpu,
            hidden_size,
            max_len,
            fail: false,
        }
    }

    /// Encoder whose every call fails.
    pub fn failing(hidden_size: usize, max_len: usize) -> Self {
        Self {
            fail: true,
            ..Self::new(hidden_size, max_len)
        }
    }
}

impl SequenceEncoder for MockEncoder {
    fn encode(&self, input_ids: &Tensor, attention_mask: &Tensor) -> anyhow::Result<Tensor> {
        if self.fail {
            anyhow::bail!("CUDA out of memory");
        }
        let (_, seq_len) = input_ids.dims2()?;
        let h = self.hidden_size;

        let freq: Vec<f32> = (0..h).map(|d| 0.37 + 0.05 * d as f32).collect();
        let phase: Vec<f32> = (0..h).map(|d| 0.11 * d as f32).collect();
        let freq = Tensor::from_vec(freq, (1, 1, h), &self.device)?;
        let phase = Tensor::from_vec(phase, (1, 1, h), &self.device)?;
        let positions = (Tensor::arange(0u32, seq_len as u32, &self.device)?
            .to_dtype(DType::F32)?
            * 0.01)?
            .reshape((1, seq_len, 1))?;

        let ids = input_ids.to_dtype(DType::F32)?.unsqueeze(2)?;
        let mask = attention_mask.to_dtype(DType::F32)?.unsqueeze(2)?;
        let hidden = ids
            .broadcast_mul(&freq)?
            .broadcast_add(&phase)?
            .sin()?
            .broadcast_add(&positions)?
            .broadcast_mul(&mask)?;
        Ok(hidden)
    }

    fn hidden_size(&self) -> usize {
        self.hidden_size
    }

    fn max_sequence_length(&self) -> usize {
        self.max_len
    }

    fn pad_token_id(&self) -> u32 {
        PAD
    }

    fn device(&self) -> &Device {
        &self.device
    }
}

/// Document of `len` real tokens followed by `pad` pad tokens.
pub fn document(len: usize, pad: usize) -> TokenSequence {
    let mut ids: Vec<u32> = (0..len).map(|i| (i % 97) as u32 + 1).collect();
    ids.extend(std::iter::repeat(PAD).take(pad));
    TokenSequence::new(ids, PAD)
}

pub fn config(attention_type: AttentionType, num_classes: usize, lm_window: usize) -> LwanConfig {
    LwanConfig {
        lm_window,
        num_classes,
        attention_type,
        num_heads: 2,
        ..LwanConfig::default()
    }
}

pub fn model(config: LwanConfig, hidden_size: usize) -> LabelwiseModel {
    LabelwiseModel::new(config, Arc::new(MockEncoder::new(hidden_size, 512)))
        .expect("Failed to build model")
}

/// Maximum absolute elementwise difference of two tensors.
pub fn max_abs_diff(a: &Tensor, b: &Tensor) -> f32 {
    (a - b)
        .expect("shape mismatch")
        .abs()
        .expect("abs")
        .flatten_all()
        .expect("flatten")
        .max(0)
        .expect("max")
        .to_scalar::<f32>()
        .expect("scalar")
}
