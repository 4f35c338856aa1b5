//! Error types for the latmesh state layer.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Result type alias for state operations.
pub type StateResult<T> = Result<T, StateError>;

/// Errors that can occur while reading or writing mesh artifacts.
#[derive(Debug, Error)]
pub enum StateError {
    #[error("invalid node identity {name:?}: {reason}")]
    InvalidNodeId { name: String, reason: &'static str },

    #[error("i/o error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("serialization error: {0}")]
    Serialize(String),

    #[error("malformed artifact {}: {reason}", path.display())]
    Malformed { path: PathBuf, reason: String },

    #[error("storage operation timed out after {0:?}")]
    Timeout(Duration),

    #[error("storage task failed: {0}")]
    Join(String),
}

impl StateError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}
