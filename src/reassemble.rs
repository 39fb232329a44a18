//! Reassembling per-document token representations from encoded windows.

use candle_core::{Device, Tensor};
use tracing::debug;

use crate::LwanError;

/// Per-document token representations, right-padded across the batch.
#[derive(Debug, Clone)]
pub struct DocumentRepresentation {
    /// `(batch, max_len, hidden_size)`; rows past a document's length are zero.
    pub hidden: Tensor,
    /// `(batch, max_len)` `u8`, 1 on real positions.
    pub mask: Tensor,
    /// True length of every document.
    pub lengths: Vec<usize>,
}

impl DocumentRepresentation {
    pub fn max_len(&self) -> usize {
        self.lengths.iter().copied().max().unwrap_or(0)
    }
}

/// Build a `(batch, max_len)` validity mask from document lengths.
pub fn length_mask(lengths: &[usize], max_len: usize, device: &Device) -> Result<Tensor, LwanError> {
    let mut mask = vec![0u8; lengths.len() * max_len];
    for (row, &len) in lengths.iter().enumerate() {
        mask[row * max_len..row * max_len + len.min(max_len)].fill(1);
    }
    Ok(Tensor::from_vec(mask, (lengths.len(), max_len), device)?)
}

/// Gathers window hidden states back into documents.
#[derive(Debug, Clone, Copy, Default)]
pub struct Reassembler;

impl Reassembler {
    /// Per document, the `(true_length, hidden_size)` sequence made of its
    /// windows in position order with the pad tail dropped.
    pub fn documents(
        &self,
        hidden: &Tensor,
        mapping: &[Vec<usize>],
        true_lengths: &[usize],
    ) -> Result<Vec<Tensor>, LwanError> {
        if mapping.len() != true_lengths.len() {
            return Err(LwanError::Data(format!(
                "mapping covers {} documents but {} lengths were given",
                mapping.len(),
                true_lengths.len()
            )));
        }
        let (num_windows, lm_window, hidden_size) = hidden.dims3()?;

        mapping
            .iter()
            .zip(true_lengths)
            .enumerate()
            .map(|(doc, (owned, &len))| {
                if let Some(&bad) = owned.iter().find(|&&idx| idx >= num_windows) {
                    return Err(LwanError::Data(format!(
                        "document {} maps to window {} but only {} windows were encoded",
                        doc, bad, num_windows
                    )));
                }
                if owned.len() * lm_window < len {
                    return Err(LwanError::Data(format!(
                        "document {} has {} tokens but owns only {} windows of {}",
                        doc,
                        len,
                        owned.len(),
                        lm_window
                    )));
                }
                if len == 0 {
                    return Ok(Tensor::zeros(
                        (0, hidden_size),
                        hidden.dtype(),
                        hidden.device(),
                    )?);
                }

                let indices: Vec<u32> = owned.iter().map(|&idx| idx as u32).collect();
                let indices = Tensor::from_vec(indices, owned.len(), hidden.device())?;
                let sequence = hidden
                    .index_select(&indices, 0)?
                    .reshape((owned.len() * lm_window, hidden_size))?
                    .narrow(0, 0, len)?;
                Ok(sequence)
            })
            .collect()
    }

    /// Reassemble and zero-pad every document to the batch's longest one.
    pub fn reassemble(
        &self,
        hidden: &Tensor,
        mapping: &[Vec<usize>],
        true_lengths: &[usize],
    ) -> Result<DocumentRepresentation, LwanError> {
        let documents = self.documents(hidden, mapping, true_lengths)?;
        if documents.is_empty() {
            return Err(LwanError::Data("cannot reassemble an empty batch".to_string()));
        }

        let (_, _, hidden_size) = hidden.dims3()?;
        let max_len = true_lengths.iter().copied().max().unwrap_or(0);
        if max_len == 0 {
            return Err(LwanError::Data(format!(
                "none of the {} documents has a valid token position",
                true_lengths.len()
            )));
        }

        let padded = documents
            .into_iter()
            .zip(true_lengths)
            .map(|(sequence, &len)| {
                if len == max_len {
                    Ok(sequence)
                } else if len == 0 {
                    Tensor::zeros((max_len, hidden_size), hidden.dtype(), hidden.device())
                } else {
                    let tail =
                        Tensor::zeros((max_len - len, hidden_size), hidden.dtype(), hidden.device())?;
                    Tensor::cat(&[&sequence, &tail], 0)
                }
            })
            .collect::<candle_core::Result<Vec<_>>>()?;

        let stacked = Tensor::stack(&padded, 0)?;
        let mask = length_mask(true_lengths, max_len, hidden.device())?;

        debug!(
            documents = true_lengths.len(),
            max_len, "Reassembled document representations"
        );

        Ok(DocumentRepresentation {
            hidden: stacked,
            mask,
            lengths: true_lengths.to_vec(),
        })
    }
}
