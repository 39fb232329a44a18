//! Prediction handler for CLI.

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::info;

use crate::cli::output::{output_json, print_header, print_table, OutputMode};
use crate::config::LwanConfig;
use crate::encoder::bert::load_tokenizer;
use crate::encoder::BertEncoder;
use crate::model::LabelwiseModel;
use crate::windowing::TokenSequence;

/// Score of one label for one document.
#[derive(Debug, Clone, Serialize)]
pub struct LabelScore {
    pub label: String,
    pub logit: f32,
    /// Sigmoid of the logit.
    pub score: f32,
    /// Token position with the highest attention weight for this label.
    pub peak_token: usize,
}

/// Top labels of one document.
#[derive(Debug, Clone, Serialize)]
pub struct Prediction {
    pub document: usize,
    pub tokens: usize,
    pub windows: usize,
    pub labels: Vec<LabelScore>,
}

/// Read label names (one per line), or number them when no file is given.
pub fn load_labels(path: Option<&Path>, num_classes: usize) -> Result<Vec<String>> {
    let Some(path) = path else {
        return Ok((0..num_classes).map(|i| format!("label_{}", i)).collect());
    };
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read labels from {}", path.display()))?;
    let labels: Vec<String> = contents
        .lines()
        .map(|l| l.trim().to_string())
        .filter(|l| !l.is_empty())
        .collect();
    if labels.len() != num_classes {
        anyhow::bail!(
            "{} lists {} labels but the model has num_classes = {}",
            path.display(),
            labels.len(),
            num_classes
        );
    }
    Ok(labels)
}

/// Rank labels by logit and keep the best `k`.
///
/// `attention` holds one row of token weights per label.
pub fn top_labels(
    logits: &[f32],
    scores: &[f32],
    attention: &[Vec<f32>],
    labels: &[String],
    k: usize,
) -> Vec<LabelScore> {
    let mut ranked: Vec<LabelScore> = labels
        .iter()
        .enumerate()
        .map(|(i, label)| LabelScore {
            label: label.clone(),
            logit: logits[i],
            score: scores[i],
            peak_token: attention
                .get(i)
                .and_then(|row| {
                    row.iter()
                        .enumerate()
                        .max_by(|(_, a), (_, b)| {
                            a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal)
                        })
                        .map(|(pos, _)| pos)
                })
                .unwrap_or(0),
        })
        .collect();
    ranked.sort_by(|a, b| {
        b.logit
            .partial_cmp(&a.logit)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    ranked.truncate(k);
    ranked
}

fn predict_blocking(
    config: LwanConfig,
    texts: Vec<String>,
    checkpoint: Option<&Path>,
    labels: Option<&Path>,
    top_k: usize,
) -> Result<Vec<Prediction>> {
    let labels = load_labels(labels, config.num_classes)?;
    let (encoder, files) = BertEncoder::from_hub(&config.lm_weight)?;
    let tokenizer = load_tokenizer(&files.tokenizer_path)?;

    let model = match checkpoint {
        Some(path) => LabelwiseModel::from_checkpoint(config, Arc::new(encoder), path)?,
        None => {
            tracing::warn!("No checkpoint given, scoring with freshly initialized head parameters");
            LabelwiseModel::new(config, Arc::new(encoder))?
        }
    };

    let str_refs: Vec<&str> = texts.iter().map(|s| s.as_str()).collect();
    let encodings = tokenizer
        .encode_batch(str_refs, true)
        .map_err(|e| anyhow::anyhow!("Tokenization failed: {}", e))?;
    let documents: Vec<TokenSequence> = encodings
        .iter()
        .map(|e| TokenSequence::new(e.get_ids().to_vec(), model.pad_token_id()))
        .collect();

    let windows = model.splitter().split(&documents)?;
    info!(
        "Scoring {} documents in {} windows",
        documents.len(),
        windows.num_windows()
    );

    let output = model.forward(&documents, false)?;
    let logits = output.logits.to_vec2::<f32>()?;
    let scores = candle_nn::ops::sigmoid(&output.logits)?.to_vec2::<f32>()?;
    let attention = output.attention.to_vec3::<f32>()?;

    Ok(documents
        .iter()
        .enumerate()
        .map(|(doc, sequence)| Prediction {
            document: doc,
            tokens: sequence.true_length(),
            windows: windows.mapping()[doc].len(),
            labels: top_labels(&logits[doc], &scores[doc], &attention[doc], &labels, top_k),
        })
        .collect())
}

pub async fn handle_predict(
    config: LwanConfig,
    input: &Path,
    checkpoint: Option<&Path>,
    labels: Option<&Path>,
    top_k: usize,
    mode: OutputMode,
) -> Result<()> {
    let contents = std::fs::read_to_string(input)
        .with_context(|| format!("Failed to read {}", input.display()))?;
    let texts: Vec<String> = contents
        .lines()
        .filter(|l| !l.trim().is_empty())
        .map(|l| l.to_string())
        .collect();
    if texts.is_empty() {
        anyhow::bail!("{} contains no documents", input.display());
    }

    let checkpoint = checkpoint.map(Path::to_path_buf);
    let labels = labels.map(Path::to_path_buf);

    // Use spawn_blocking since model loading and the forward pass are synchronous and CPU-bound
    let predictions = tokio::task::spawn_blocking(move || {
        predict_blocking(
            config,
            texts,
            checkpoint.as_deref(),
            labels.as_deref(),
            top_k,
        )
    })
    .await??;

    if mode == OutputMode::Json {
        output_json(&predictions);
        return Ok(());
    }

    for prediction in &predictions {
        print_header(&format!(
            "Document {} ({} tokens, {} windows)",
            prediction.document, prediction.tokens, prediction.windows
        ));
        let rows: Vec<Vec<String>> = prediction
            .labels
            .iter()
            .map(|l| {
                vec![
                    l.label.clone(),
                    format!("{:.3}", l.score),
                    format!("{:.3}", l.logit),
                    l.peak_token.to_string(),
                ]
            })
            .collect();
        print_table(&["Label", "Score", "Logit", "Peak token"], rows);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn names(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("l{}", i)).collect()
    }

    #[test]
    fn test_top_labels_sorted_and_truncated() {
        let logits = [0.1, 2.0, -1.0, 0.7];
        let scores = [0.52, 0.88, 0.27, 0.67];
        let attention = vec![
            vec![0.2, 0.8],
            vec![0.9, 0.1],
            vec![0.5, 0.5],
            vec![0.3, 0.7],
        ];
        let top = top_labels(&logits, &scores, &attention, &names(4), 2);

        assert_eq!(top.len(), 2);
        assert_eq!(top[0].label, "l1");
        assert_eq!(top[0].peak_token, 0);
        assert_eq!(top[1].label, "l3");
        assert_eq!(top[1].peak_token, 1);
    }

    #[test]
    fn test_default_label_names() {
        let labels = load_labels(None, 3).unwrap();
        assert_eq!(labels, vec!["label_0", "label_1", "label_2"]);
    }

    #[test]
    fn test_label_file_count_must_match() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "contract\nlabour\n").unwrap();

        assert_eq!(load_labels(Some(file.path()), 2).unwrap(), vec!["contract", "labour"]);
        assert!(load_labels(Some(file.path()), 3).is_err());
    }
}
