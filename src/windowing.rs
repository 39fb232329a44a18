//! Splitting tokenized documents into fixed-size encoder windows.
//!
//! Documents whose real tokens fit into `lm_window` become exactly one window.
//! Longer documents are cut into `ceil(true_length / lm_window)` contiguous,
//! non-overlapping windows; the last one is right-padded with the pad token.
//! All windows of a batch are flattened into one [`WindowBatch`] so the
//! encoder runs once per forward pass.

use candle_core::{DType, Device, Tensor};
use serde::Serialize;
use tracing::debug;

use crate::config::validate_window;
use crate::LwanError;

/// Token ids of one document. Pad tokens may only trail the real tokens.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenSequence {
    ids: Vec<u32>,
    pad_token_id: u32,
}

impl TokenSequence {
    pub fn new(ids: Vec<u32>, pad_token_id: u32) -> Self {
        Self { ids, pad_token_id }
    }

    /// Split a padded `(batch, seq_len)` id matrix into one sequence per row.
    pub fn from_padded_batch(ids: &Tensor, pad_token_id: u32) -> Result<Vec<Self>, LwanError> {
        let rows = ids.to_dtype(DType::U32)?.to_vec2::<u32>()?;
        Ok(rows
            .into_iter()
            .map(|row| Self::new(row, pad_token_id))
            .collect())
    }

    pub fn ids(&self) -> &[u32] {
        &self.ids
    }

    pub fn pad_token_id(&self) -> u32 {
        self.pad_token_id
    }

    /// Number of non-pad tokens.
    pub fn true_length(&self) -> usize {
        self.ids.iter().filter(|&&id| id != self.pad_token_id).count()
    }

    /// Offset of the first pad token that is followed by a real token.
    pub fn interior_padding(&self) -> Option<usize> {
        let first_pad = self.ids.iter().position(|&id| id == self.pad_token_id)?;
        self.ids[first_pad..]
            .iter()
            .any(|&id| id != self.pad_token_id)
            .then_some(first_pad)
    }

    /// The real tokens, without trailing padding.
    pub fn real_tokens(&self) -> &[u32] {
        &self.ids[..self.true_length()]
    }
}

/// One encoder window cut from a document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Window {
    /// Index of the owning document in the batch.
    pub document: usize,
    /// Ordinal of this window within its document.
    pub position: usize,
    /// Flat index in the encoder batch.
    pub index: usize,
    /// Exactly `lm_window` ids, pad-filled at the tail.
    pub tokens: Vec<u32>,
}

impl Window {
    /// Number of pad tokens appended to fill the window.
    pub fn padding(&self, pad_token_id: u32) -> usize {
        self.tokens
            .iter()
            .rev()
            .take_while(|&&id| id == pad_token_id)
            .count()
    }
}

/// All windows of one forward pass plus the document -> window mapping.
#[derive(Debug, Clone)]
pub struct WindowBatch {
    windows: Vec<Window>,
    mapping: Vec<Vec<usize>>,
    true_lengths: Vec<usize>,
    lm_window: usize,
    pad_token_id: u32,
}

impl WindowBatch {
    pub fn windows(&self) -> &[Window] {
        &self.windows
    }

    /// Per document, the flat window indices it owns in position order.
    pub fn mapping(&self) -> &[Vec<usize>] {
        &self.mapping
    }

    pub fn true_lengths(&self) -> &[usize] {
        &self.true_lengths
    }

    pub fn num_windows(&self) -> usize {
        self.windows.len()
    }

    pub fn num_documents(&self) -> usize {
        self.mapping.len()
    }

    pub fn lm_window(&self) -> usize {
        self.lm_window
    }

    pub fn pad_token_id(&self) -> u32 {
        self.pad_token_id
    }

    /// Windows of one document in position order.
    pub fn document_windows(&self, document: usize) -> impl Iterator<Item = &Window> {
        self.mapping
            .get(document)
            .into_iter()
            .flatten()
            .map(|&idx| &self.windows[idx])
    }

    /// Flat `(num_windows, lm_window)` id tensor for the encoder.
    pub fn to_tensor(&self, device: &Device) -> Result<Tensor, LwanError> {
        let flat: Vec<u32> = self
            .windows
            .iter()
            .flat_map(|w| w.tokens.iter().copied())
            .collect();
        Ok(Tensor::from_vec(
            flat,
            (self.windows.len(), self.lm_window),
            device,
        )?)
    }
}

/// Cuts documents into `lm_window`-sized windows.
#[derive(Debug, Clone, Copy)]
pub struct WindowSplitter {
    lm_window: usize,
    pad_token_id: u32,
}

impl WindowSplitter {
    /// `max_len` is the longest sequence the encoder accepts.
    pub fn new(lm_window: usize, max_len: usize, pad_token_id: u32) -> Result<Self, LwanError> {
        validate_window(lm_window, max_len)?;
        Ok(Self {
            lm_window,
            pad_token_id,
        })
    }

    pub fn lm_window(&self) -> usize {
        self.lm_window
    }

    pub fn pad_token_id(&self) -> u32 {
        self.pad_token_id
    }

    /// Split a batch of documents into a flat window batch.
    pub fn split(&self, documents: &[TokenSequence]) -> Result<WindowBatch, LwanError> {
        let mut windows = Vec::new();
        let mut mapping = Vec::with_capacity(documents.len());
        let mut true_lengths = Vec::with_capacity(documents.len());

        for (doc_idx, doc) in documents.iter().enumerate() {
            if doc.pad_token_id() != self.pad_token_id {
                return Err(LwanError::Data(format!(
                    "document {} uses pad token {} but the encoder pads with {}",
                    doc_idx,
                    doc.pad_token_id(),
                    self.pad_token_id
                )));
            }
            if let Some(offset) = doc.interior_padding() {
                return Err(LwanError::Data(format!(
                    "document {} has a pad token at offset {} followed by real tokens",
                    doc_idx, offset
                )));
            }

            let real = doc.real_tokens();
            true_lengths.push(real.len());

            // A document always owns at least one window, even when empty.
            let chunks: Vec<&[u32]> = if real.is_empty() {
                vec![real]
            } else {
                real.chunks(self.lm_window).collect()
            };

            let mut owned = Vec::with_capacity(chunks.len());
            for (position, chunk) in chunks.into_iter().enumerate() {
                let mut tokens = Vec::with_capacity(self.lm_window);
                tokens.extend_from_slice(chunk);
                tokens.resize(self.lm_window, self.pad_token_id);

                owned.push(windows.len());
                windows.push(Window {
                    document: doc_idx,
                    position,
                    index: windows.len(),
                    tokens,
                });
            }
            mapping.push(owned);
        }

        debug!(
            documents = documents.len(),
            windows = windows.len(),
            lm_window = self.lm_window,
            "Split documents into windows"
        );

        Ok(WindowBatch {
            windows,
            mapping,
            true_lengths,
            lm_window: self.lm_window,
            pad_token_id: self.pad_token_id,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const PAD: u32 = 0;

    /// Document of `len` real tokens (ids 1..=len) followed by `pad` pads.
    fn doc(len: usize, pad: usize) -> TokenSequence {
        let mut ids: Vec<u32> = (1..=len as u32).collect();
        ids.extend(std::iter::repeat(PAD).take(pad));
        TokenSequence::new(ids, PAD)
    }

    #[test]
    fn test_true_length_ignores_trailing_pads() {
        assert_eq!(doc(5, 3).true_length(), 5);
        assert_eq!(doc(0, 4).true_length(), 0);
        assert_eq!(doc(7, 0).true_length(), 7);
    }

    #[test]
    fn test_600_tokens_make_two_windows() {
        let splitter = WindowSplitter::new(512, 512, PAD).unwrap();
        let batch = splitter.split(&[doc(600, 0)]).unwrap();

        assert_eq!(batch.num_windows(), 2);
        assert_eq!(batch.mapping(), &[vec![0, 1]]);
        assert_eq!(batch.true_lengths(), &[600]);
        assert_eq!(batch.windows()[0].padding(PAD), 0);
        assert_eq!(batch.windows()[1].padding(PAD), 424);
        let expected_tail: Vec<u32> = (513..=600).collect();
        assert_eq!(&batch.windows()[1].tokens[..88], expected_tail.as_slice());
    }

    #[test]
    fn test_400_tokens_make_one_window() {
        let splitter = WindowSplitter::new(512, 512, PAD).unwrap();
        let batch = splitter.split(&[doc(400, 200)]).unwrap();

        assert_eq!(batch.num_windows(), 1);
        assert_eq!(batch.true_lengths(), &[400]);
        assert_eq!(batch.windows()[0].tokens.len(), 512);
        assert_eq!(batch.windows()[0].padding(PAD), 112);
    }

    #[test]
    fn test_exact_multiple_has_no_padding() {
        let splitter = WindowSplitter::new(512, 512, PAD).unwrap();
        let batch = splitter.split(&[doc(1024, 0)]).unwrap();

        assert_eq!(batch.num_windows(), 2);
        assert!(batch.windows().iter().all(|w| w.padding(PAD) == 0));
    }

    #[test]
    fn test_mapping_and_positions_across_documents() {
        let splitter = WindowSplitter::new(4, 8, PAD).unwrap();
        let batch = splitter.split(&[doc(9, 0), doc(2, 7), doc(4, 5)]).unwrap();

        assert_eq!(batch.mapping(), &[vec![0, 1, 2], vec![3], vec![4]]);
        assert_eq!(batch.true_lengths(), &[9, 2, 4]);
        let positions: Vec<(usize, usize, usize)> = batch
            .windows()
            .iter()
            .map(|w| (w.document, w.position, w.index))
            .collect();
        assert_eq!(
            positions,
            vec![(0, 0, 0), (0, 1, 1), (0, 2, 2), (1, 0, 3), (2, 0, 4)]
        );
        assert_eq!(batch.windows()[2].tokens, vec![9, PAD, PAD, PAD]);
    }

    #[test]
    fn test_empty_document_owns_one_pad_window() {
        let splitter = WindowSplitter::new(4, 8, PAD).unwrap();
        let batch = splitter.split(&[doc(0, 6)]).unwrap();

        assert_eq!(batch.num_windows(), 1);
        assert_eq!(batch.true_lengths(), &[0]);
        assert_eq!(batch.windows()[0].tokens, vec![PAD; 4]);
    }

    #[test]
    fn test_interior_padding_rejected() {
        let splitter = WindowSplitter::new(4, 8, PAD).unwrap();
        let bad = TokenSequence::new(vec![5, 6, PAD, 7, PAD], PAD);
        assert_eq!(bad.interior_padding(), Some(2));

        let err = splitter.split(&[doc(3, 0), bad]).unwrap_err();
        match err {
            LwanError::Data(msg) => assert!(msg.contains("document 1"), "got {msg}"),
            other => panic!("expected data error, got {other:?}"),
        }
    }

    #[test]
    fn test_pad_token_mismatch_rejected() {
        let splitter = WindowSplitter::new(4, 8, PAD).unwrap();
        let other_pad = TokenSequence::new(vec![5, 6, 1], 1);
        assert!(matches!(
            splitter.split(&[other_pad]),
            Err(LwanError::Data(_))
        ));
    }

    #[test]
    fn test_invalid_window_sizes_rejected() {
        assert!(matches!(
            WindowSplitter::new(0, 512, PAD),
            Err(LwanError::Config(_))
        ));
        assert!(matches!(
            WindowSplitter::new(513, 512, PAD),
            Err(LwanError::Config(_))
        ));
    }

    #[test]
    fn test_to_tensor_shape_and_contents() {
        let splitter = WindowSplitter::new(3, 8, PAD).unwrap();
        let batch = splitter.split(&[doc(4, 0), doc(1, 2)]).unwrap();
        let tensor = batch.to_tensor(&Device::Cpu).unwrap();

        assert_eq!(tensor.dims(), &[3, 3]);
        assert_eq!(
            tensor.to_vec2::<u32>().unwrap(),
            vec![vec![1, 2, 3], vec![4, PAD, PAD], vec![1, PAD, PAD]]
        );
    }

    #[test]
    fn test_from_padded_batch() {
        let ids = Tensor::new(&[[3u32, 4, 0], [5, 0, 0]], &Device::Cpu).unwrap();
        let docs = TokenSequence::from_padded_batch(&ids, PAD).unwrap();
        assert_eq!(docs.len(), 2);
        assert_eq!(docs[0].true_length(), 2);
        assert_eq!(docs[1].real_tokens(), &[5]);
    }
}
