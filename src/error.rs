use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    // A layer spec that cannot be laid out
    #[error("Invalid layer '{name}': {reason}")]
    InvalidLayer { name: String, reason: String },

    // Weight matrices that do not line up with the layers they connect
    #[error("Shape mismatch: {0}")]
    ShapeMismatch(String),

    // Activation vectors that do not line up with the layers
    #[error("Activation mismatch: {0}")]
    ActivationMismatch(String),

    // Malformed dataset files or dataset configuration
    #[error("Invalid dataset: {0}")]
    InvalidDataset(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
