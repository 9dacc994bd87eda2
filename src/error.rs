use std::io;
use thiserror::Error;

/// Result type for engine operations
pub type EngineResult<T> = std::result::Result<T, EngineError>;

/// Errors that can occur while configuring or running the engine
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("capability set is invalid: {0}")]
    InvalidCapabilities(String),

    #[error("unknown built-in module: {0}")]
    UnknownModule(String),

    #[error("configuration error: {0}")]
    ConfigError(String),

    #[error("transport I/O failed: {0}")]
    Transport(#[from] io::Error),
}

// Alias for convenience
pub type Error = EngineError;
pub type Result<T> = EngineResult<T>;
