//! Connection establishment errors.
//!
//! Call-level failures are [`tickwire_core::CallError`]; these cover only
//! opening a session. The supervisor logs them and retries.

use thiserror::Error;

/// Failure to open a session.
#[derive(Debug, Error)]
pub enum ClientError {
    /// The endpoint is not a usable WebSocket URL.
    #[error("invalid endpoint '{endpoint}': {reason}")]
    InvalidEndpoint {
        /// The configured endpoint.
        endpoint: String,
        /// What is wrong with it.
        reason: String,
    },

    /// The WebSocket handshake failed.
    #[error("failed to connect to {endpoint}: {reason}")]
    Connect {
        /// The endpoint that was dialed.
        endpoint: String,
        /// Transport error text.
        reason: String,
    },

    /// The handshake did not complete in time.
    #[error("connecting to {endpoint} timed out after {timeout_ms}ms")]
    ConnectTimeout {
        /// The endpoint that was dialed.
        endpoint: String,
        /// The elapsed handshake window.
        timeout_ms: u64,
    },
}

/// Convenience alias for session-opening results.
pub type Result<T> = std::result::Result<T, ClientError>;
