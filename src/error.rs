//! Crate error type.

use thiserror::Error;

/// Errors surfaced by construction, configuration, and persistence.
///
/// Control-step decisions never fail: a degenerate cost head simply never
/// triggers a violation.
#[derive(Error, Debug)]
pub enum Error {
    /// Invalid or unrecognized configuration value.
    #[error("configuration error: {0}")]
    Config(String),

    /// Filesystem failure while reading or writing episodes/checkpoints.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Episode or checkpoint payload could not be (de)serialized.
    #[cfg(feature = "serde")]
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// An environment failed to release its resources.
    #[error("environment teardown failed: {0}")]
    EnvTeardown(String),
}

impl Error {
    /// Creates a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Error::Config(message.into())
    }
}

/// Convenient result alias.
pub type Result<T> = std::result::Result<T, Error>;
