//! Plugin error types.
//!
//! [`PluginError`] is returned by every capability operation, whether the
//! capability is served in-process or by an external plugin. Remote
//! failures keep their classification across the process boundary (see
//! [`protocol`](crate::protocol)).

use thiserror::Error;

/// Errors produced by capability operations.
#[derive(Debug, Error)]
pub enum PluginError {
    /// The requested resource does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// The capability does not support the request.
    #[error("unsupported: {0}")]
    Unsupported(String),

    /// The remote plugin reported a failure that has no local
    /// classification.
    #[error("remote error (code {code}): {message}")]
    Remote {
        /// JSON-RPC error code reported by the plugin.
        code: i32,
        /// Error message reported by the plugin.
        message: String,
    },

    /// The connection to the plugin failed.
    #[error("transport error: {0}")]
    Transport(String),

    /// The caller's context was cancelled.
    #[error("operation cancelled")]
    Cancelled,

    /// The caller's deadline passed.
    #[error("deadline exceeded")]
    DeadlineExceeded,

    /// A plugin descriptor failed validation.
    #[error("invalid plugin descriptor: {0}")]
    InvalidDescriptor(String),

    /// I/O error during a plugin operation.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Convenience alias for results in this crate.
pub type Result<T> = std::result::Result<T, PluginError>;
