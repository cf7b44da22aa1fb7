use thiserror::Error;

/// Result type for throttling operations
pub type Result<T> = std::result::Result<T, ThrottleError>;

/// Errors that can occur when building or loading a throttling policy
#[derive(Error, Debug)]
pub enum ThrottleError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}
