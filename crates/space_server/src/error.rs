//! Error types for the space server.
//!
//! Client-facing failures (rejected joins, rejected moves, malformed
//! envelopes) are not errors at this level; they are protocol outcomes handled
//! by the session. `ServerError` covers the infrastructure failures that reach
//! the server owner.

use thiserror::Error;

/// Infrastructure-level failures raised by the server.
#[derive(Error, Debug)]
pub enum ServerError {
    /// Socket creation, binding, handshake or transport failures
    #[error("Network error: {0}")]
    Network(String),

    /// Unexpected internal failures
    #[error("Internal error: {0}")]
    Internal(String),

    /// Invalid or unusable configuration
    #[error("Configuration error: {0}")]
    Config(String),
}
