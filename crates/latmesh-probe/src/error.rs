//! Probe error types.

use std::time::Duration;

use thiserror::Error;

/// Errors from the membership provider. Any of these skips the cycle.
#[derive(Debug, Error)]
pub enum MembershipError {
    #[error("membership tool not found: {0}")]
    ToolMissing(String),

    #[error("membership query timed out after {0:?}")]
    Timeout(Duration),

    #[error("membership query failed (exit code {code:?}): {stderr}")]
    CommandFailed { code: Option<i32>, stderr: String },

    #[error("malformed membership response: {0}")]
    Malformed(String),

    #[error("membership i/o error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors from a single peer measurement. Each one only marks that peer
/// absent.
#[derive(Debug, Error)]
pub enum MeasureError {
    #[error("measurement tool not found: {0}")]
    ToolMissing(String),

    #[error("measurement timed out after {0:?}")]
    Timeout(Duration),

    #[error("peer unreachable (loss {loss_percent:?}%)")]
    Unreachable { loss_percent: Option<u8> },

    #[error("invalid peer address {0:?}")]
    InvalidAddress(String),

    #[error("bad ping output pattern: {0}")]
    Pattern(#[from] regex::Error),

    #[error("measurement i/o error: {0}")]
    Io(#[from] std::io::Error),
}
