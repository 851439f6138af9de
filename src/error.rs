//! Error types for the cygan training harness

use thiserror::Error;

/// Main error type for cygan operations
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Shape or batch-contract violation
    #[error("Shape mismatch: {0}")]
    Shape(String),

    /// Operation not supported by the selected GAN variant
    #[error("Unsupported for this variant: {0}")]
    Unsupported(String),

    /// Data feeder error
    #[error("Data error: {0}")]
    Data(String),

    /// Checkpoint save/restore error
    #[error("Checkpoint error: {0}")]
    Checkpoint(String),

    /// Export artifact error
    #[error("Export error: {0}")]
    Export(String),

    /// Tensor operation error
    #[error("Tensor operation error: {0}")]
    Tensor(#[from] candle_core::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Other errors
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Result type alias for cygan operations
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a shape-contract error
    pub fn shape(msg: impl Into<String>) -> Self {
        Self::Shape(msg.into())
    }

    /// Create an unsupported-variant error
    pub fn unsupported(msg: impl Into<String>) -> Self {
        Self::Unsupported(msg.into())
    }

    /// Create a data error
    pub fn data(msg: impl Into<String>) -> Self {
        Self::Data(msg.into())
    }

    /// Create a checkpoint error
    pub fn checkpoint(msg: impl Into<String>) -> Self {
        Self::Checkpoint(msg.into())
    }

    /// Create an export artifact error
    pub fn export(msg: impl Into<String>) -> Self {
        Self::Export(msg.into())
    }
}
