//! Model configuration.
//!
//! A single immutable [`LwanConfig`] describes the windowing and attention
//! head of the network. It is loaded from a TOML file, the `LWAN_CONFIG`
//! env var (JSON), or defaults, and validated eagerly against the encoder
//! before any forward pass runs.

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::LwanError;

/// Label-wise attention strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttentionType {
    /// One learned query vector per label, dot-product scores.
    #[serde(alias = "caml", alias = "singlehead")]
    SingleQuery,
    /// Per-label queries through multi-head scaled dot-product attention.
    #[serde(alias = "multihead")]
    MultiHead,
}

impl std::fmt::Display for AttentionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AttentionType::SingleQuery => write!(f, "single_query"),
            AttentionType::MultiHead => write!(f, "multi_head"),
        }
    }
}

/// Network configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LwanConfig {
    /// Hugging Face repo id of the pretrained encoder.
    pub lm_weight: String,
    /// Window length fed to the encoder.
    pub lm_window: usize,
    /// Number of labels.
    pub num_classes: usize,
    pub attention_type: AttentionType,
    /// Head count, multi-head attention only.
    pub num_heads: usize,
    /// Dropout on the reassembled token representations.
    pub dropout: f32,
    /// Dropout on the multi-head attention probabilities.
    pub attention_dropout: f32,
    /// Seed for parameter initialization.
    pub seed: u64,
}

impl Default for LwanConfig {
    fn default() -> Self {
        Self {
            lm_weight: "bert-base-uncased".to_string(),
            lm_window: 512,
            num_classes: 1,
            attention_type: AttentionType::MultiHead,
            num_heads: 8,
            dropout: 0.2,
            attention_dropout: 0.0,
            seed: 1337,
        }
    }
}

impl LwanConfig {
    /// Check every construction-time constraint.
    ///
    /// `max_len` is the encoder's maximum supported sequence length and
    /// `hidden_size` its output width.
    pub fn validate(&self, max_len: usize, hidden_size: usize) -> Result<(), LwanError> {
        validate_window(self.lm_window, max_len)?;
        if self.num_classes == 0 {
            return Err(LwanError::Config(
                "num_classes must be greater than 0".to_string(),
            ));
        }
        if hidden_size == 0 {
            return Err(LwanError::Config(
                "hidden_size must be greater than 0".to_string(),
            ));
        }
        for (name, p) in [
            ("dropout", self.dropout),
            ("attention_dropout", self.attention_dropout),
        ] {
            if !(0.0..1.0).contains(&p) {
                return Err(LwanError::Config(format!(
                    "{} must be in [0, 1), got {}",
                    name, p
                )));
            }
        }
        if self.attention_type == AttentionType::MultiHead {
            if self.num_heads == 0 {
                return Err(LwanError::Config(
                    "num_heads must be greater than 0".to_string(),
                ));
            }
            if hidden_size % self.num_heads != 0 {
                return Err(LwanError::Config(format!(
                    "hidden_size {} is not divisible by num_heads {}",
                    hidden_size, self.num_heads
                )));
            }
        }
        Ok(())
    }
}

/// Validate a window length against the encoder's maximum length.
pub fn validate_window(lm_window: usize, max_len: usize) -> Result<(), LwanError> {
    if lm_window == 0 {
        return Err(LwanError::Config(
            "lm_window must be greater than 0".to_string(),
        ));
    }
    if lm_window > max_len {
        return Err(LwanError::Config(format!(
            "lm_window {} exceeds the encoder maximum sequence length {}",
            lm_window, max_len
        )));
    }
    Ok(())
}

/// Load a config with priority:
/// 1. explicit TOML file (errors are returned)
/// 2. `LWAN_CONFIG` env var (JSON, falls back to default on parse failure)
/// 3. Default
pub fn load_config(path: Option<&Path>) -> Result<LwanConfig, LwanError> {
    if let Some(path) = path {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| LwanError::Io(format!("Failed to read {}: {}", path.display(), e)))?;
        let config = toml::from_str::<LwanConfig>(&contents)?;
        info!("Loaded model config from {}", path.display());
        return Ok(config);
    }

    if let Ok(json) = std::env::var("LWAN_CONFIG") {
        match serde_json::from_str::<LwanConfig>(&json) {
            Ok(config) => {
                info!("Loaded model config from LWAN_CONFIG env");
                return Ok(config);
            }
            Err(e) => {
                tracing::warn!("Failed to parse LWAN_CONFIG: {}. Using default.", e);
            }
        }
    }

    Ok(LwanConfig::default())
}
