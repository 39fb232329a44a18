//! Multi-head attention with one learned query per label.

use candle_core::Tensor;
use candle_nn::{Dropout, Linear, Module, ModuleT, VarBuilder};

use super::{masked_softmax, AttentionOutput};
use crate::LwanError;

/// Label queries attending over the document through multi-head scaled
/// dot-product attention.
///
/// Queries, keys and values pass through learned input projections; keys and
/// values both come from the token representations. Head outputs are
/// concatenated and projected back to `hidden_size`. The reported attention
/// weights are the per-head distributions averaged over heads.
pub struct MultiHeadLabelAttention {
    query: Tensor,
    q_proj: Linear,
    k_proj: Linear,
    v_proj: Linear,
    out_proj: Linear,
    num_heads: usize,
    head_dim: usize,
    dropout: Dropout,
}

fn linear(hidden_size: usize, vb: VarBuilder) -> candle_core::Result<Linear> {
    let weight = vb.get((hidden_size, hidden_size), "weight")?;
    let bias = vb.get(hidden_size, "bias")?;
    Ok(Linear::new(weight, Some(bias)))
}

impl MultiHeadLabelAttention {
    pub fn new(
        num_labels: usize,
        hidden_size: usize,
        num_heads: usize,
        attention_dropout: f32,
        vb: VarBuilder,
    ) -> Result<Self, LwanError> {
        if num_heads == 0 || hidden_size % num_heads != 0 {
            return Err(LwanError::Config(format!(
                "hidden_size {} is not divisible by num_heads {}",
                hidden_size, num_heads
            )));
        }
        let vb = vb.pp("attention");
        Ok(Self {
            query: vb.get((num_labels, hidden_size), "query")?,
            q_proj: linear(hidden_size, vb.pp("q_proj"))?,
            k_proj: linear(hidden_size, vb.pp("k_proj"))?,
            v_proj: linear(hidden_size, vb.pp("v_proj"))?,
            out_proj: linear(hidden_size, vb.pp("out_proj"))?,
            num_heads,
            head_dim: hidden_size / num_heads,
            dropout: Dropout::new(attention_dropout),
        })
    }

    pub fn num_labels(&self) -> usize {
        self.query.dims()[0]
    }

    pub fn num_heads(&self) -> usize {
        self.num_heads
    }

    /// Split the last dimension into heads: `[.., n, hidden] -> [.., heads, n, head_dim]`.
    fn split_heads(&self, t: &Tensor, batch: usize, n: usize) -> candle_core::Result<Tensor> {
        t.reshape((batch, n, self.num_heads, self.head_dim))?
            .transpose(1, 2)?
            .contiguous()
    }

    pub fn forward(&self, x: &Tensor, mask: &Tensor, train: bool) -> Result<AttentionOutput, LwanError> {
        let (batch, seq_len, hidden_size) = x.dims3()?;
        let num_labels = self.num_labels();

        // Label queries are shared across the batch.
        let q = self
            .q_proj
            .forward(&self.query)?
            .unsqueeze(0)?
            .broadcast_as((batch, num_labels, hidden_size))?;
        let q = self.split_heads(&q, batch, num_labels)?;
        let k = self.split_heads(&self.k_proj.forward(x)?, batch, seq_len)?;
        let v = self.split_heads(&self.v_proj.forward(x)?, batch, seq_len)?;

        // [batch, heads, labels, seq_len]
        let scores = (q.matmul(&k.t()?)? / (self.head_dim as f64).sqrt())?;
        let mask = mask.unsqueeze(1)?.unsqueeze(1)?;
        let probs = masked_softmax(&scores, &mask)?;

        let weights = probs.mean(1)?;
        let probs = self.dropout.forward_t(&probs, train)?;

        // [batch, heads, labels, head_dim] -> [batch, labels, hidden]
        let context = probs
            .matmul(&v)?
            .transpose(1, 2)?
            .reshape((batch, num_labels, hidden_size))?;
        let context = self.out_proj.forward(&context)?;

        Ok(AttentionOutput { weights, context })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AttentionType, LwanConfig};
    use crate::init::head_parameters;
    use candle_core::{DType, Device};

    fn attention(num_heads: usize) -> MultiHeadLabelAttention {
        let config = LwanConfig {
            num_classes: 3,
            num_heads,
            attention_type: AttentionType::MultiHead,
            seed: 11,
            ..Default::default()
        };
        let varmap = head_parameters(&config, 8, &Device::Cpu).unwrap();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        MultiHeadLabelAttention::new(3, 8, num_heads, 0.0, vb).unwrap()
    }

    fn input(batch: usize, seq_len: usize) -> Tensor {
        let data: Vec<f32> = (0..batch * seq_len * 8)
            .map(|i| ((i * 37 % 17) as f32 - 8.0) / 8.0)
            .collect();
        Tensor::from_vec(data, (batch, seq_len, 8), &Device::Cpu).unwrap()
    }

    #[test]
    fn test_output_shapes() {
        let attention = attention(4);
        let mask = Tensor::new(&[[1u8, 1, 1, 1, 0], [1, 1, 0, 0, 0]], &Device::Cpu).unwrap();
        let out = attention.forward(&input(2, 5), &mask, false).unwrap();

        assert_eq!(out.weights.dims(), &[2, 3, 5]);
        assert_eq!(out.context.dims(), &[2, 3, 8]);
    }

    #[test]
    fn test_averaged_weights_normalized_and_masked() {
        let attention = attention(2);
        let mask = Tensor::new(&[[1u8, 1, 1, 0, 0]], &Device::Cpu).unwrap();
        let out = attention.forward(&input(1, 5), &mask, false).unwrap();

        for row in &out.weights.to_vec3::<f32>().unwrap()[0] {
            let sum: f32 = row[..3].iter().sum();
            assert!((sum - 1.0).abs() < 1e-5, "sum was {sum}");
            assert_eq!(&row[3..], &[0.0, 0.0]);
        }
    }

    #[test]
    fn test_padding_values_do_not_leak_into_context() {
        let attention = attention(2);
        let mask = Tensor::new(&[[1u8, 1, 0]], &Device::Cpu).unwrap();
        let clean = input(1, 3);
        let noisy = Tensor::cat(
            &[
                clean.narrow(1, 0, 2).unwrap(),
                Tensor::full(1000f32, (1, 1, 8), &Device::Cpu).unwrap(),
            ],
            1,
        )
        .unwrap();

        let a = attention.forward(&clean, &mask, false).unwrap().context;
        let b = attention.forward(&noisy, &mask, false).unwrap().context;
        let diff: f32 = (a - b)
            .unwrap()
            .abs()
            .unwrap()
            .flatten_all()
            .unwrap()
            .max(0)
            .unwrap()
            .to_scalar()
            .unwrap();
        assert!(diff < 1e-5, "padding changed the context by {diff}");
    }

    #[test]
    fn test_indivisible_heads_rejected() {
        let config = LwanConfig {
            num_classes: 3,
            num_heads: 2,
            attention_type: AttentionType::MultiHead,
            ..Default::default()
        };
        let varmap = head_parameters(&config, 8, &Device::Cpu).unwrap();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        assert!(matches!(
            MultiHeadLabelAttention::new(3, 8, 3, 0.0, vb),
            Err(LwanError::Config(_))
        ));
    }
}
