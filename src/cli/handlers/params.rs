//! Parameter initialization handler for CLI.

use std::path::Path;
use std::sync::Arc;

use anyhow::Result;

use crate::cli::output::{print_kv, print_success, OutputMode};
use crate::config::LwanConfig;
use crate::encoder::BertEncoder;
use crate::model::LabelwiseModel;

pub async fn handle_init(config: LwanConfig, out: &Path, mode: OutputMode) -> Result<()> {
    let out_path = out.to_path_buf();
    let seed = config.seed;

    // Model download and construction are synchronous and CPU-bound.
    let (count, hidden_size) = tokio::task::spawn_blocking(move || {
        let (encoder, _files) = BertEncoder::from_hub(&config.lm_weight)?;
        let model = LabelwiseModel::new(config, Arc::new(encoder))?;
        model.save_checkpoint(&out_path)?;
        Ok::<(usize, usize), anyhow::Error>((model.varmap().all_vars().len(), model.hidden_size()))
    })
    .await??;

    if mode == OutputMode::Json {
        crate::cli::output::output_json(&serde_json::json!({
            "checkpoint": out.display().to_string(),
            "tensors": count,
            "hidden_size": hidden_size,
            "seed": seed,
        }));
        return Ok(());
    }

    print_success(&format!("Wrote {} head tensors to {}", count, out.display()));
    print_kv("hidden size", &hidden_size.to_string());
    print_kv("seed", &seed.to_string());
    Ok(())
}
