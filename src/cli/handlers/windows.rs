//! Window plan handler for CLI.

use std::path::Path;

use anyhow::{Context, Result};
use serde::Serialize;

use crate::cli::output::{output_json, print_table, OutputMode};
use crate::windowing::{TokenSequence, WindowSplitter};

/// Window layout of one document.
#[derive(Debug, Serialize)]
pub struct DocumentWindows {
    pub document: usize,
    pub true_length: usize,
    pub windows: Vec<usize>,
    pub tail_padding: usize,
}

/// Parse one document per line of whitespace-separated token ids.
pub fn parse_id_lines(contents: &str, pad_id: u32) -> Result<Vec<TokenSequence>> {
    contents
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(line_no, line)| {
            let ids = line
                .split_whitespace()
                .map(|tok| {
                    tok.parse::<u32>()
                        .with_context(|| format!("line {}: invalid token id '{}'", line_no + 1, tok))
                })
                .collect::<Result<Vec<u32>>>()?;
            Ok(TokenSequence::new(ids, pad_id))
        })
        .collect()
}

/// Compute the window plan for a set of documents.
pub fn plan_windows(
    documents: &[TokenSequence],
    lm_window: usize,
    pad_id: u32,
    max_len: usize,
) -> Result<Vec<DocumentWindows>> {
    let splitter = WindowSplitter::new(lm_window, max_len, pad_id)?;
    let batch = splitter.split(documents)?;

    Ok(batch
        .mapping()
        .iter()
        .zip(batch.true_lengths())
        .enumerate()
        .map(|(document, (owned, &true_length))| DocumentWindows {
            document,
            true_length,
            windows: owned.clone(),
            tail_padding: batch
                .document_windows(document)
                .last()
                .map(|w| w.padding(pad_id))
                .unwrap_or(0),
        })
        .collect())
}

pub fn handle_windows(
    input: &Path,
    lm_window: usize,
    pad_id: u32,
    max_len: usize,
    mode: OutputMode,
) -> Result<()> {
    let contents = std::fs::read_to_string(input)
        .with_context(|| format!("Failed to read {}", input.display()))?;
    let documents = parse_id_lines(&contents, pad_id)?;
    let plan = plan_windows(&documents, lm_window, pad_id, max_len)?;

    if mode == OutputMode::Json {
        output_json(&plan);
        return Ok(());
    }

    println!(
        "{} documents, window length {}\n",
        plan.len(),
        lm_window
    );

    let rows: Vec<Vec<String>> = plan
        .iter()
        .map(|d| {
            vec![
                d.document.to_string(),
                d.true_length.to_string(),
                d.windows.len().to_string(),
                format!("{:?}", d.windows),
                d.tail_padding.to_string(),
            ]
        })
        .collect();

    print_table(
        &["Doc", "Tokens", "Windows", "Indices", "Tail pad"],
        rows,
    );

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_parse_id_lines_skips_blank_lines() {
        let docs = parse_id_lines("1 2 3 0\n\n4 5\n", 0).unwrap();
        assert_eq!(docs.len(), 2);
        assert_eq!(docs[0].true_length(), 3);
        assert_eq!(docs[1].ids(), &[4, 5]);
    }

    #[test]
    fn test_parse_id_lines_rejects_garbage() {
        let err = parse_id_lines("1 two 3", 0).unwrap_err();
        assert!(err.to_string().contains("line 1"), "got {err}");
    }

    #[test]
    fn test_plan_windows() {
        let docs = parse_id_lines("1 2 3 4 5\n6 0 0\n", 0).unwrap();
        let plan = plan_windows(&docs, 2, 0, 8).unwrap();

        assert_eq!(plan[0].windows, vec![0, 1, 2]);
        assert_eq!(plan[0].tail_padding, 1);
        assert_eq!(plan[1].true_length, 1);
        assert_eq!(plan[1].windows, vec![3]);
        assert_eq!(plan[1].tail_padding, 1);
    }
}
