pub mod attention;
pub mod cli;
pub mod config;
pub mod encoder;
pub mod error;
pub mod init;
pub mod model;
pub mod output;
pub mod reassemble;
pub mod windowing;

pub use config::{AttentionType, LwanConfig};
pub use error::LwanError;
pub use model::{LabelwiseModel, ModelOutput};
pub use windowing::{TokenSequence, WindowBatch, WindowSplitter};
