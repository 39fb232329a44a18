//! Seeded initialization of the label-wise head parameters.
//!
//! All learnable tensors of the head live in a [`VarMap`] so a training loop
//! can optimise them and checkpoints can be saved and loaded as safetensors.
//! Initial values come from an explicit seed; no global RNG is touched.

use candle_core::{DType, Device, Tensor, Var};
use candle_nn::VarMap;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::config::{AttentionType, LwanConfig};
use crate::LwanError;

/// Per-label query matrix `(num_classes, hidden)`.
pub const ATTENTION_QUERY: &str = "attention.query";
/// Multi-head input/output projections, each `(hidden, hidden)` plus bias.
pub const ATTENTION_PROJECTIONS: [&str; 4] = [
    "attention.q_proj",
    "attention.k_proj",
    "attention.v_proj",
    "attention.out_proj",
];
/// Per-label output weight `(num_classes, hidden)`.
pub const OUTPUT_WEIGHT: &str = "output.weight";
/// Per-label output bias `(num_classes,)`.
pub const OUTPUT_BIAS: &str = "output.bias";

/// Deterministic tensor initializer.
pub struct ParameterInit {
    rng: StdRng,
    device: Device,
}

impl ParameterInit {
    pub fn new(seed: u64, device: &Device) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            device: device.clone(),
        }
    }

    /// Uniform values in `[-bound, bound)`.
    pub fn uniform(&mut self, shape: &[usize], bound: f32) -> Result<Tensor, LwanError> {
        let count: usize = shape.iter().product();
        let data: Vec<f32> = if bound > 0.0 {
            (0..count)
                .map(|_| self.rng.gen_range(-bound..bound))
                .collect()
        } else {
            vec![0.0; count]
        };
        Ok(Tensor::from_vec(data, shape, &self.device)?)
    }

    /// Xavier (Glorot) uniform for a `(fan_out, fan_in)` weight matrix.
    pub fn xavier_uniform(&mut self, fan_out: usize, fan_in: usize) -> Result<Tensor, LwanError> {
        let bound = (6.0 / (fan_in + fan_out) as f32).sqrt();
        self.uniform(&[fan_out, fan_in], bound)
    }

    pub fn zeros(&self, shape: &[usize]) -> Result<Tensor, LwanError> {
        Ok(Tensor::zeros(shape, DType::F32, &self.device)?)
    }
}

/// Create the head parameters for `config` in a fresh [`VarMap`].
///
/// Weights are Xavier-uniform, multi-head projection biases start at zero and
/// the output bias is uniform in `±1/sqrt(hidden_size)`.
pub fn head_parameters(
    config: &LwanConfig,
    hidden_size: usize,
    device: &Device,
) -> Result<VarMap, LwanError> {
    let mut init = ParameterInit::new(config.seed, device);
    let labels = config.num_classes;
    let mut params: Vec<(String, Tensor)> = Vec::new();

    params.push((
        ATTENTION_QUERY.to_string(),
        init.xavier_uniform(labels, hidden_size)?,
    ));
    if config.attention_type == AttentionType::MultiHead {
        for name in ATTENTION_PROJECTIONS {
            params.push((
                format!("{name}.weight"),
                init.xavier_uniform(hidden_size, hidden_size)?,
            ));
            params.push((format!("{name}.bias"), init.zeros(&[hidden_size])?));
        }
    }
    params.push((
        OUTPUT_WEIGHT.to_string(),
        init.xavier_uniform(labels, hidden_size)?,
    ));
    params.push((
        OUTPUT_BIAS.to_string(),
        init.uniform(&[labels], 1.0 / (hidden_size as f32).sqrt())?,
    ));

    let varmap = VarMap::new();
    {
        let mut data = varmap
            .data()
            .lock()
            .map_err(|e| LwanError::Tensor(format!("VarMap lock poisoned: {}", e)))?;
        for (name, tensor) in params {
            data.insert(name, Var::from_tensor(&tensor)?);
        }
    }
    Ok(varmap)
}
