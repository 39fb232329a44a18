//! lwan - long-document multi-label classification with label-wise attention
//!
//! Usage:
//!   lwan windows ids.txt --lm-window 512     Show the window plan for tokenized documents
//!   lwan init --out head.safetensors         Write seeded head parameters
//!   lwan predict docs.txt --top-k 5          Score documents and show top labels
//!   lwan --help                              Show all commands

use anyhow::Result;
use clap::Parser;

use lwan::cli::Cli;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Tracing to stderr so JSON output on stdout stays clean
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive("lwan=info".parse()?),
        )
        .init();

    lwan::cli::execute(&cli).await
}
