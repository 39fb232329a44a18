//! Candle-based BERT sequence encoder.
//!
//! Pure-Rust backend for the pretrained language model, with Metal GPU
//! acceleration on macOS and optional CUDA. Provides [`BertEncoder`], which
//! returns the last hidden state of a BERT-family model for every token.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use candle_core::{DType, Device, Tensor};
use candle_nn::{LayerNorm, Module, VarBuilder};
use candle_transformers::models::bert::{BertModel, Config as BertConfig};
use tokenizers::Tokenizer;

use super::SequenceEncoder;

/// Paths to downloaded model files from HuggingFace Hub.
pub struct ModelFiles {
    pub config_path: PathBuf,
    pub tokenizer_path: PathBuf,
    pub weights_path: PathBuf,
}

/// Download model files from HuggingFace Hub.
///
/// Uses `hf_hub::api::sync::Api` which caches at `~/.cache/huggingface/hub/`.
/// Designed to be called from `spawn_blocking` since it performs synchronous I/O.
pub fn download_model(repo_id: &str) -> Result<ModelFiles> {
    let api = hf_hub::api::sync::Api::new().context("Failed to initialize HuggingFace Hub API")?;
    let repo = api.model(repo_id.to_string());

    let config_path = repo
        .get("config.json")
        .context("Failed to download config.json")?;
    let tokenizer_path = repo
        .get("tokenizer.json")
        .context("Failed to download tokenizer.json")?;
    let weights_path = repo
        .get("model.safetensors")
        .context("Failed to download model.safetensors")?;

    Ok(ModelFiles {
        config_path,
        tokenizer_path,
        weights_path,
    })
}

/// Select the best available compute device.
///
/// Tries Metal (macOS) or CUDA (Linux/Windows) if the corresponding feature
/// is enabled. Probes layer-norm support since BERT requires it and falls
/// back to CPU if the GPU backend lacks the kernel.
pub fn select_device() -> Device {
    #[cfg(target_os = "macos")]
    {
        if let Ok(device) = Device::new_metal(0) {
            if probe_layer_norm(&device) {
                tracing::info!("Using Metal GPU for inference");
                return device;
            }
            tracing::warn!("Metal GPU available but layer-norm not supported, falling back to CPU");
        }
    }
    #[cfg(feature = "cuda")]
    {
        if let Ok(device) = Device::new_cuda(0) {
            if probe_layer_norm(&device) {
                tracing::info!("Using CUDA GPU for inference");
                return device;
            }
            tracing::warn!("CUDA GPU available but layer-norm not supported, falling back to CPU");
        }
    }
    tracing::info!("Using CPU for inference");
    Device::Cpu
}

/// Probe whether a device supports layer-norm.
#[allow(dead_code)]
fn probe_layer_norm(device: &Device) -> bool {
    (|| -> candle_core::Result<()> {
        let weight = Tensor::ones(4, DType::F32, device)?;
        let bias = Tensor::zeros(4, DType::F32, device)?;
        let ln = LayerNorm::new(weight, bias, 1e-5);
        let input = Tensor::randn(0f32, 1.0, (1, 4), device)?;
        let _ = ln.forward(&input)?;
        Ok(())
    })()
    .is_ok()
}

/// Load the tokenizer shipped with a model, without padding or truncation.
///
/// Long documents must reach the window splitter whole.
pub fn load_tokenizer(path: &Path) -> Result<Tokenizer> {
    let mut tokenizer = Tokenizer::from_file(path)
        .map_err(|e| anyhow::anyhow!("Failed to load tokenizer: {}", e))?;
    tokenizer.with_padding(None);
    tokenizer
        .with_truncation(None)
        .map_err(|e| anyhow::anyhow!("Failed to disable truncation: {}", e))?;
    Ok(tokenizer)
}

/// BERT encoder returning per-token last hidden states.
pub struct BertEncoder {
    model: BertModel,
    device: Device,
    hidden_size: usize,
    max_position_embeddings: usize,
    pad_token_id: u32,
}

impl BertEncoder {
    /// Load a BERT model from downloaded files.
    pub fn new(files: &ModelFiles, device: Device) -> Result<Self> {
        let config_str =
            std::fs::read_to_string(&files.config_path).context("Failed to read model config")?;
        let config: BertConfig =
            serde_json::from_str(&config_str).context("Failed to parse BERT config")?;

        // SAFETY: mmap'd safetensors file — safe as long as the file is not modified
        // while the model is in use.
        let vb = unsafe {
            VarBuilder::from_mmaped_safetensors(&[&files.weights_path], DType::F32, &device)
                .context("Failed to load model weights")?
        };
        let model = BertModel::load(vb, &config).context("Failed to construct BERT model")?;

        Ok(Self {
            model,
            device,
            hidden_size: config.hidden_size,
            max_position_embeddings: config.max_position_embeddings,
            pad_token_id: config.pad_token_id as u32,
        })
    }

    /// Download (or reuse the cached copy of) a Hub model and load it.
    pub fn from_hub(repo_id: &str) -> Result<(Self, ModelFiles)> {
        let files = download_model(repo_id)?;
        let encoder = Self::new(&files, select_device())?;
        tracing::info!(
            "Loaded encoder {} (hidden size {}, max length {})",
            repo_id,
            encoder.hidden_size,
            encoder.max_position_embeddings
        );
        Ok((encoder, files))
    }
}

impl SequenceEncoder for BertEncoder {
    fn encode(&self, input_ids: &Tensor, attention_mask: &Tensor) -> Result<Tensor> {
        // Single-segment input: token types are all zero.
        let token_type_ids = input_ids.zeros_like()?;

        // Forward pass -> [batch, seq_len, hidden_size]
        let hidden = self
            .model
            .forward(input_ids, &token_type_ids, Some(attention_mask))?;
        Ok(hidden)
    }

    fn hidden_size(&self) -> usize {
        self.hidden_size
    }

    fn max_sequence_length(&self) -> usize {
        self.max_position_embeddings
    }

    fn pad_token_id(&self) -> u32 {
        self.pad_token_id
    }

    fn device(&self) -> &Device {
        &self.device
    }
}
