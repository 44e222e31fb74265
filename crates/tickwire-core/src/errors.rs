//! Error types for correlated calls and frame decoding.
//!
//! - [`CallError`]: every way a call can end other than success. It travels
//!   through the same completion channel as a successful reply.
//! - [`BusinessFault`]: a well-formed reply whose body carries the venue's
//!   error field.
//! - [`CodecError`]: an inbound frame that could not be decoded. These are
//!   logged and dropped by the receive loop, never routed to a call.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::ids::CallId;

/// Result delivered to the issuer of a call.
pub type CallOutcome = Result<Value, CallError>;

/// Failure modes of a correlated call.
#[derive(Debug, Error)]
pub enum CallError {
    /// The session was not open when the call was attempted.
    #[error("not connected")]
    NotConnected,

    /// No reply arrived within the configured window.
    #[error("call {id} timed out after {timeout_ms}ms")]
    Timeout {
        /// The expired call.
        id: CallId,
        /// The window that elapsed.
        timeout_ms: u64,
    },

    /// The session was torn down while the call was pending.
    #[error("connection lost before call {id} was answered")]
    ConnectionLost {
        /// The abandoned call.
        id: CallId,
    },

    /// The venue answered with an application-level error.
    #[error("{0}")]
    BusinessFault(BusinessFault),

    /// The request body is not a JSON object.
    #[error("invalid request body: {0}")]
    InvalidBody(String),

    /// The request could not be serialized.
    #[error("failed to encode request: {0}")]
    Encode(String),

    /// A client invariant was violated (e.g. an identifier handed out twice).
    #[error("internal client error: {0}")]
    Internal(String),
}

impl CallError {
    /// Whether this error came from the transport rather than the venue.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            Self::NotConnected | Self::Timeout { .. } | Self::ConnectionLost { .. }
        )
    }

    /// The business fault, if this is one.
    pub fn as_fault(&self) -> Option<&BusinessFault> {
        match self {
            Self::BusinessFault(fault) => Some(fault),
            _ => None,
        }
    }
}

/// Application-level error returned inside an otherwise well-formed reply.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BusinessFault {
    /// Machine-readable code, when the venue supplies one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    /// Human-readable message.
    pub message: String,
    /// The raw error value as received.
    pub details: Value,
}

impl BusinessFault {
    /// Build a fault from the value found under the error field.
    ///
    /// Objects contribute their `code` and `message` strings; a bare string
    /// becomes the message; anything else is rendered as JSON.
    pub fn from_value(value: Value) -> Self {
        let (code, message) = match &value {
            Value::Object(map) => (
                map.get("code").and_then(Value::as_str).map(str::to_owned),
                map.get("message")
                    .and_then(Value::as_str)
                    .unwrap_or("venue error")
                    .to_owned(),
            ),
            Value::String(s) => (None, s.clone()),
            other => (None, other.to_string()),
        };
        Self {
            code,
            message,
            details: value,
        }
    }
}

impl std::fmt::Display for BusinessFault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.code {
            Some(code) => write!(f, "[{code}] {}", self.message),
            None => f.write_str(&self.message),
        }
    }
}

/// Inbound frame decode failure.
#[derive(Debug, Error)]
pub enum CodecError {
    /// The frame is not valid JSON.
    #[error("malformed frame: {0}")]
    Malformed(#[from] serde_json::Error),

    /// The frame is valid JSON but not an object.
    #[error("frame is not a JSON object (got {kind})")]
    NotAnObject {
        /// JSON kind that was received instead.
        kind: &'static str,
    },

    /// A binary frame did not contain UTF-8 text.
    #[error("binary frame is not UTF-8 text")]
    NotText,
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
