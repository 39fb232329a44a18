//! The composed forward pass.
//!
//! [`LabelwiseModel`] chains the stages in a fixed order:
//! window splitting, one batched encoder call, reassembly, embedding dropout,
//! label-wise attention and the output projection. Every call builds fresh
//! intermediates and returns fresh outputs; `&self` is never mutated, so one
//! model can serve concurrent callers.

use std::path::Path;
use std::sync::Arc;

use candle_core::{DType, Tensor};
use candle_nn::{Dropout, ModuleT, VarBuilder, VarMap};
use tracing::debug;

use crate::attention::LabelwiseAttention;
use crate::config::LwanConfig;
use crate::encoder::{BatchEncoder, SequenceEncoder};
use crate::init::head_parameters;
use crate::output::OutputProjector;
use crate::reassemble::{DocumentRepresentation, Reassembler};
use crate::windowing::{TokenSequence, WindowSplitter};
use crate::LwanError;

/// Outputs of one forward pass.
#[derive(Debug, Clone)]
pub struct ModelOutput {
    /// `(batch, num_labels)` raw scores.
    pub logits: Tensor,
    /// `(batch, num_labels, seq_len)` label-wise attention weights.
    pub attention: Tensor,
}

/// Windowed language-model encoder with a label-wise attention head.
pub struct LabelwiseModel {
    config: LwanConfig,
    splitter: WindowSplitter,
    encoder: BatchEncoder,
    reassembler: Reassembler,
    embed_dropout: Dropout,
    attention: LabelwiseAttention,
    output: OutputProjector,
    varmap: VarMap,
}

impl LabelwiseModel {
    /// Build a model with freshly initialized head parameters.
    ///
    /// The config is validated against the encoder first; parameters are
    /// drawn from `config.seed`.
    pub fn new(config: LwanConfig, encoder: Arc<dyn SequenceEncoder>) -> Result<Self, LwanError> {
        let hidden_size = encoder.hidden_size();
        config.validate(encoder.max_sequence_length(), hidden_size)?;

        let varmap = head_parameters(&config, hidden_size, encoder.device())?;
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, encoder.device());

        let splitter = WindowSplitter::new(
            config.lm_window,
            encoder.max_sequence_length(),
            encoder.pad_token_id(),
        )?;
        let attention = LabelwiseAttention::new(&config, hidden_size, vb.clone())?;
        let output = OutputProjector::new(config.num_classes, hidden_size, vb)?;

        debug!(
            attention = %config.attention_type,
            labels = config.num_classes,
            lm_window = config.lm_window,
            hidden_size,
            "Built label-wise attention model"
        );

        Ok(Self {
            embed_dropout: Dropout::new(config.dropout),
            config,
            splitter,
            encoder: BatchEncoder::new(encoder),
            reassembler: Reassembler,
            attention,
            output,
            varmap,
        })
    }

    /// Build a model and overwrite its head parameters from a safetensors checkpoint.
    pub fn from_checkpoint(
        config: LwanConfig,
        encoder: Arc<dyn SequenceEncoder>,
        checkpoint: &Path,
    ) -> Result<Self, LwanError> {
        let mut model = Self::new(config, encoder)?;
        model.load_checkpoint(checkpoint)?;
        Ok(model)
    }

    /// Load head parameters in place from a safetensors file.
    pub fn load_checkpoint(&mut self, path: &Path) -> Result<(), LwanError> {
        self.varmap.load(path).map_err(|e| {
            LwanError::Io(format!("Failed to load checkpoint {}: {}", path.display(), e))
        })
    }

    /// Save head parameters to a safetensors file.
    pub fn save_checkpoint(&self, path: &Path) -> Result<(), LwanError> {
        self.varmap.save(path).map_err(|e| {
            LwanError::Io(format!("Failed to save checkpoint {}: {}", path.display(), e))
        })
    }

    /// Trainable head parameters.
    pub fn varmap(&self) -> &VarMap {
        &self.varmap
    }

    pub fn config(&self) -> &LwanConfig {
        &self.config
    }

    pub fn num_classes(&self) -> usize {
        self.config.num_classes
    }

    pub fn hidden_size(&self) -> usize {
        self.encoder.hidden_size()
    }

    pub fn pad_token_id(&self) -> u32 {
        self.splitter.pad_token_id()
    }

    pub fn splitter(&self) -> &WindowSplitter {
        &self.splitter
    }

    /// Windowing, encoding and reassembly: per-token document representations.
    pub fn encode_documents(&self, documents: &[TokenSequence]) -> Result<DocumentRepresentation, LwanError> {
        if documents.is_empty() {
            return Err(LwanError::Data("cannot encode an empty batch".to_string()));
        }
        let windows = self.splitter.split(documents)?;
        let hidden = self.encoder.encode(&windows)?;
        self.reassembler
            .reassemble(&hidden, windows.mapping(), windows.true_lengths())
    }

    /// Full forward pass. Dropout is active only when `train` is set.
    pub fn forward(&self, documents: &[TokenSequence], train: bool) -> Result<ModelOutput, LwanError> {
        let representation = self.encode_documents(documents)?;
        let x = self.embed_dropout.forward_t(&representation.hidden, train)?;

        let attended = self.attention.forward(&x, &representation.mask, train)?;
        let logits = self.output.forward(&attended.context)?;

        debug!(
            documents = documents.len(),
            seq_len = representation.max_len(),
            "Forward pass complete"
        );

        Ok(ModelOutput {
            logits,
            attention: attended.weights,
        })
    }

    /// Forward pass over a padded `(batch, seq_len)` id matrix.
    pub fn forward_ids(&self, input_ids: &Tensor, train: bool) -> Result<ModelOutput, LwanError> {
        let documents = TokenSequence::from_padded_batch(input_ids, self.pad_token_id())?;
        self.forward(&documents, train)
    }
}
