//! Error types for pyrun

use thiserror::Error;

/// Result type alias using pyrun's Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for pyrun
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Host sandbox error (workspace, process spawning)
    #[error("Sandbox error: {0}")]
    Sandbox(String),

    /// Docker/container error
    #[error("Container error: {0}")]
    Container(String),

    /// The container engine could not be reached
    #[error("Docker engine is not reachable: {0}")]
    EngineUnavailable(String),

    /// The base image is neither present locally nor pullable
    #[error("Image not found: {0}")]
    ImageNotFound(String),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Timeout error
    #[error("Timeout: {0}")]
    Timeout(String),

    /// Generic internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Check if error is a client error (caller's fault)
    pub fn is_client_error(&self) -> bool {
        matches!(self, Error::InvalidInput(_) | Error::Config(_))
    }

    /// Check if error comes from the execution environment rather than the code
    pub fn is_environment_error(&self) -> bool {
        matches!(
            self,
            Error::EngineUnavailable(_) | Error::ImageNotFound(_) | Error::Container(_)
        )
    }
}

impl From<bollard::errors::Error> for Error {
    fn from(err: bollard::errors::Error) -> Self {
        crate::sandbox::engine::translate_error(err)
    }
}

impl From<json5::Error> for Error {
    fn from(err: json5::Error) -> Self {
        Error::Config(err.to_string())
    }
}

impl From<toml::de::Error> for Error {
    fn from(err: toml::de::Error) -> Self {
        Error::Config(err.to_string())
    }
}
