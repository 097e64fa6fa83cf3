//! Error taxonomy for the EWS core.

/// EWS core errors.
#[derive(Debug, thiserror::Error)]
pub enum EwsError {
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("config parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    InvalidConfig(String),

    #[error("invalid path pattern: {0}")]
    Pattern(#[from] regex::Error),

    #[error("malformed results payload: {0}")]
    MalformedResults(String),

    #[error("invalid change: {0}")]
    InvalidChange(String),

    #[error("collaborator error: {0}")]
    Collaborator(String),

    #[error("digest mismatch: expected {expected}, got {actual}")]
    DigestMismatch { expected: String, actual: String },
}

/// Result type for EWS core operations.
pub type Result<T> = std::result::Result<T, EwsError>;
