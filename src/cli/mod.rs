//! CLI interface for lwan.

pub mod handlers;
pub mod output;

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use output::OutputMode;

/// lwan - long-document multi-label classification with label-wise attention
#[derive(Parser)]
#[command(name = "lwan", version, about, long_about = None)]
pub struct Cli {
    /// Model config (TOML). Falls back to the LWAN_CONFIG env var, then defaults
    #[arg(long, env = "LWAN_CONFIG_PATH", global = true)]
    pub config: Option<PathBuf>,

    /// Output as JSON instead of human-readable format
    #[arg(long, global = true)]
    pub json: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Show how tokenized documents are cut into encoder windows
    Windows {
        /// File with one document per line as whitespace-separated token ids
        input: PathBuf,
        /// Window length (default: lm_window from the config)
        #[arg(long)]
        lm_window: Option<usize>,
        /// Pad token id
        #[arg(long, default_value = "0")]
        pad_id: u32,
        /// Encoder maximum sequence length
        #[arg(long, default_value = "512")]
        max_len: usize,
    },

    /// Write freshly initialized head parameters to a safetensors file
    Init {
        /// Output checkpoint path
        #[arg(long)]
        out: PathBuf,
    },

    /// Score documents (one per line) and show the top labels
    Predict {
        /// Text file, one document per line
        input: PathBuf,
        /// Head checkpoint (safetensors); seeded initialization if omitted
        #[arg(long)]
        checkpoint: Option<PathBuf>,
        /// Label names, one per line, in label index order
        #[arg(long)]
        labels: Option<PathBuf>,
        /// Number of labels shown per document
        #[arg(long, default_value = "5")]
        top_k: usize,
    },
}

/// Execute a CLI command.
pub async fn execute(cli: &Cli) -> anyhow::Result<()> {
    let mode = OutputMode::from_json_flag(cli.json);
    let config = crate::config::load_config(cli.config.as_deref())?;

    match &cli.command {
        Commands::Windows {
            input,
            lm_window,
            pad_id,
            max_len,
        } => {
            let lm_window = lm_window.unwrap_or(config.lm_window);
            handlers::windows::handle_windows(input, lm_window, *pad_id, *max_len, mode)?
        }
        Commands::Init { out } => handlers::params::handle_init(config, out, mode).await?,
        Commands::Predict {
            input,
            checkpoint,
            labels,
            top_k,
        } => {
            handlers::predict::handle_predict(
                config,
                input,
                checkpoint.as_deref(),
                labels.as_deref(),
                *top_k,
                mode,
            )
            .await?
        }
    }

    Ok(())
}
