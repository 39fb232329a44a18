//! Sequence encoder abstraction and the batched window encoder.
//!
//! The pretrained language model is opaque to this crate: anything that maps
//! a `(num_windows, lm_window)` id tensor plus attention mask to per-token
//! hidden states implements [`SequenceEncoder`]. [`BatchEncoder`] runs the
//! whole flat window batch of a forward pass through it in a single call.

pub mod bert;

use std::sync::Arc;

use candle_core::{DType, Device, Tensor};
use tracing::debug;

use crate::windowing::WindowBatch;
use crate::LwanError;

pub use bert::{download_model, select_device, BertEncoder, ModelFiles};

/// Opaque per-token sequence encoder.
pub trait SequenceEncoder: Send + Sync {
    /// Encode a batch of id sequences.
    ///
    /// `input_ids` and `attention_mask` are `(batch, seq_len)` `u32` tensors,
    /// the mask holding 1 for real tokens and 0 for padding. Returns
    /// `(batch, seq_len, hidden_size)` hidden states.
    fn encode(&self, input_ids: &Tensor, attention_mask: &Tensor) -> anyhow::Result<Tensor>;

    /// Width of the returned hidden vectors.
    fn hidden_size(&self) -> usize;

    /// Longest sequence the encoder accepts.
    fn max_sequence_length(&self) -> usize;

    /// Token id used for padding.
    fn pad_token_id(&self) -> u32;

    /// Device the encoder's weights live on.
    fn device(&self) -> &Device;
}

/// Build the `u32` attention mask (`token != pad`) for an id tensor.
pub fn attention_mask(input_ids: &Tensor, pad_token_id: u32) -> Result<Tensor, LwanError> {
    Ok(input_ids.ne(pad_token_id)?.to_dtype(DType::U32)?)
}

/// Runs all windows of a forward pass through the encoder at once.
#[derive(Clone)]
pub struct BatchEncoder {
    encoder: Arc<dyn SequenceEncoder>,
}

impl BatchEncoder {
    pub fn new(encoder: Arc<dyn SequenceEncoder>) -> Self {
        Self { encoder }
    }

    pub fn encoder(&self) -> &Arc<dyn SequenceEncoder> {
        &self.encoder
    }

    pub fn hidden_size(&self) -> usize {
        self.encoder.hidden_size()
    }

    pub fn device(&self) -> &Device {
        self.encoder.device()
    }

    /// Encode every window of the batch.
    ///
    /// Returns hidden states of shape `(num_windows, lm_window, hidden_size)`.
    /// Encoder failures and shape mismatches surface as
    /// [`LwanError::Encoding`]; nothing is retried.
    pub fn encode(&self, batch: &WindowBatch) -> Result<Tensor, LwanError> {
        let input_ids = batch.to_tensor(self.encoder.device())?;
        let mask = attention_mask(&input_ids, batch.pad_token_id())?;

        debug!(
            windows = batch.num_windows(),
            lm_window = batch.lm_window(),
            "Encoding window batch"
        );

        let hidden = self
            .encoder
            .encode(&input_ids, &mask)
            .map_err(|e| LwanError::encoding("Sequence encoder failed", e))?;

        let expected = [batch.num_windows(), batch.lm_window(), self.encoder.hidden_size()];
        if hidden.dims() != expected {
            return Err(LwanError::Encoding {
                message: format!(
                    "encoder returned shape {:?}, expected {:?}",
                    hidden.dims(),
                    expected
                ),
                source: None,
            });
        }

        Ok(hidden)
    }
}
