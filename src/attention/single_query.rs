//! Single learned query per label.

use candle_core::Tensor;
use candle_nn::VarBuilder;

use super::{masked_softmax, AttentionOutput};
use crate::LwanError;

/// Scores every token against one learned query vector per label.
///
/// `score(l, t) = query_l · x_t`, softmaxed over valid positions; the context
/// vector of label `l` is the weighted sum of token representations.
pub struct SingleQueryAttention {
    query: Tensor,
}

impl SingleQueryAttention {
    /// Load the `(num_labels, hidden_size)` query matrix from `vb`.
    pub fn new(num_labels: usize, hidden_size: usize, vb: VarBuilder) -> Result<Self, LwanError> {
        let query = vb.pp("attention").get((num_labels, hidden_size), "query")?;
        Ok(Self { query })
    }

    pub fn from_query(query: Tensor) -> Self {
        Self { query }
    }

    pub fn num_labels(&self) -> usize {
        self.query.dims()[0]
    }

    pub fn forward(&self, x: &Tensor, mask: &Tensor) -> Result<AttentionOutput, LwanError> {
        let x = x.contiguous()?;
        // [batch, seq_len, hidden] x [hidden, labels] -> [batch, labels, seq_len]
        let scores = x
            .broadcast_matmul(&self.query.t()?)?
            .transpose(1, 2)?
            .contiguous()?;
        let weights = masked_softmax(&scores, &mask.unsqueeze(1)?)?;
        // [batch, labels, seq_len] x [batch, seq_len, hidden] -> [batch, labels, hidden]
        let context = weights.matmul(&x)?;
        Ok(AttentionOutput { weights, context })
    }
}
