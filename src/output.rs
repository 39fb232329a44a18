//! Per-label linear output layer.

use candle_core::Tensor;
use candle_nn::VarBuilder;

use crate::LwanError;

/// Turns each label's context vector into one logit.
///
/// `logit_l = sum_h(weight_l * context_l) + bias_l`. No sigmoid is applied;
/// probabilities are the consumer's business.
pub struct OutputProjector {
    weight: Tensor,
    bias: Tensor,
}

impl OutputProjector {
    /// Load `output.weight` `(num_labels, hidden)` and `output.bias` `(num_labels,)`.
    pub fn new(num_labels: usize, hidden_size: usize, vb: VarBuilder) -> Result<Self, LwanError> {
        let vb = vb.pp("output");
        Ok(Self {
            weight: vb.get((num_labels, hidden_size), "weight")?,
            bias: vb.get(num_labels, "bias")?,
        })
    }

    pub fn from_tensors(weight: Tensor, bias: Tensor) -> Self {
        Self { weight, bias }
    }

    pub fn weight(&self) -> &Tensor {
        &self.weight
    }

    pub fn bias(&self) -> &Tensor {
        &self.bias
    }

    /// `(batch, num_labels, hidden)` context vectors -> `(batch, num_labels)` logits.
    pub fn forward(&self, context: &Tensor) -> Result<Tensor, LwanError> {
        let logits = context
            .broadcast_mul(&self.weight)?
            .sum(2)?
            .broadcast_add(&self.bias)?;
        Ok(logits)
    }
}
