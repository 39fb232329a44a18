//! Label-wise attention over document token representations.
//!
//! Every label gets its own distribution over the valid token positions of a
//! document and a context vector pooled with it. Two interchangeable
//! strategies are provided, selected by [`AttentionType`]:
//!
//! - [`SingleQueryAttention`]: a learned query per label, dot-product scores.
//! - [`MultiHeadLabelAttention`]: the label queries attend through standard
//!   multi-head scaled dot-product attention.
//!
//! Padded positions are masked to `-inf` before every softmax, so their
//! weights are exactly zero and the valid weights of each label sum to one.

pub mod multi_head;
pub mod single_query;

use candle_core::{DType, Tensor};
use candle_nn::VarBuilder;

use crate::config::{AttentionType, LwanConfig};
use crate::LwanError;

pub use multi_head::MultiHeadLabelAttention;
pub use single_query::SingleQueryAttention;

/// Result of label-wise attention.
#[derive(Debug, Clone)]
pub struct AttentionOutput {
    /// `(batch, num_labels, seq_len)`, zero on padded positions.
    pub weights: Tensor,
    /// `(batch, num_labels, hidden_size)`.
    pub context: Tensor,
}

/// Label-wise attention, one of the two supported strategies.
pub enum LabelwiseAttention {
    SingleQuery(SingleQueryAttention),
    MultiHead(MultiHeadLabelAttention),
}

impl LabelwiseAttention {
    /// Build the strategy named by `config` from parameters under `vb`.
    pub fn new(config: &LwanConfig, hidden_size: usize, vb: VarBuilder) -> Result<Self, LwanError> {
        Ok(match config.attention_type {
            AttentionType::SingleQuery => LabelwiseAttention::SingleQuery(
                SingleQueryAttention::new(config.num_classes, hidden_size, vb)?,
            ),
            AttentionType::MultiHead => LabelwiseAttention::MultiHead(
                MultiHeadLabelAttention::new(
                    config.num_classes,
                    hidden_size,
                    config.num_heads,
                    config.attention_dropout,
                    vb,
                )?,
            ),
        })
    }

    pub fn num_labels(&self) -> usize {
        match self {
            LabelwiseAttention::SingleQuery(a) => a.num_labels(),
            LabelwiseAttention::MultiHead(a) => a.num_labels(),
        }
    }

    /// Attend over `x` `(batch, seq_len, hidden)` with validity `mask`
    /// `(batch, seq_len)`.
    ///
    /// Fails with [`LwanError::Data`] if a document has no valid position.
    pub fn forward(&self, x: &Tensor, mask: &Tensor, train: bool) -> Result<AttentionOutput, LwanError> {
        ensure_valid_positions(mask)?;
        match self {
            LabelwiseAttention::SingleQuery(a) => a.forward(x, mask),
            LabelwiseAttention::MultiHead(a) => a.forward(x, mask, train),
        }
    }
}

/// Reject documents whose mask row has no valid position.
pub fn ensure_valid_positions(mask: &Tensor) -> Result<(), LwanError> {
    let (batch, seq_len) = mask.dims2()?;
    if seq_len == 0 {
        return Err(LwanError::Data(format!(
            "none of the {} documents has a valid token position",
            batch
        )));
    }
    let counts = mask.to_dtype(DType::F32)?.sum(1)?.to_vec1::<f32>()?;
    if let Some(doc) = counts.iter().position(|&c| c == 0.0) {
        return Err(LwanError::Data(format!(
            "document {} has no valid token positions",
            doc
        )));
    }
    Ok(())
}

/// Softmax over the last dimension with invalid positions forced to zero.
///
/// `mask` holds 1 for valid positions and must broadcast to `scores`.
pub fn masked_softmax(scores: &Tensor, mask: &Tensor) -> Result<Tensor, LwanError> {
    let mask = mask.broadcast_as(scores.shape())?.contiguous()?;
    let neg_inf = Tensor::full(f32::NEG_INFINITY, scores.shape(), scores.device())?
        .to_dtype(scores.dtype())?;
    let masked = mask.where_cond(scores, &neg_inf)?;
    Ok(candle_nn::ops::softmax_last_dim(&masked)?)
}
