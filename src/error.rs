use thiserror::Error;

/// Error type for windowed encoding and label-wise attention.
#[derive(Debug, Error)]
pub enum LwanError {
    /// Invalid construction parameters (window size, head count, label count).
    #[error("Config error: {0}")]
    Config(String),

    /// The sequence encoder failed or returned an unexpected shape.
    #[error("Encoding error: {message}")]
    Encoding {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Malformed input reached a stage (interior padding, empty documents).
    #[error("Data error: {0}")]
    Data(String),

    /// Tensor backend failure inside one of our own stages.
    #[error("Tensor error: {0}")]
    Tensor(String),

    /// Reading configs, checkpoints or label files failed.
    #[error("I/O error: {0}")]
    Io(String),
}

impl LwanError {
    /// Wrap an encoder failure, keeping the original error as the source.
    pub fn encoding(
        message: impl Into<String>,
        source: impl Into<Box<dyn std::error::Error + Send + Sync>>,
    ) -> Self {
        LwanError::Encoding {
            message: message.into(),
            source: Some(source.into()),
        }
    }
}

impl From<candle_core::Error> for LwanError {
    fn from(err: candle_core::Error) -> Self {
        LwanError::Tensor(err.to_string())
    }
}

impl From<serde_json::Error> for LwanError {
    fn from(err: serde_json::Error) -> Self {
        LwanError::Config(format!("JSON config error: {}", err))
    }
}

impl From<toml::de::Error> for LwanError {
    fn from(err: toml::de::Error) -> Self {
        LwanError::Config(format!("TOML config error: {}", err))
    }
}

impl From<std::io::Error> for LwanError {
    fn from(err: std::io::Error) -> Self {
        LwanError::Io(err.to_string())
    }
}
