//! Settings type definitions.
//!
//! All types use `#[serde(rename_all = "camelCase", default)]`, so a partial
//! JSON object fills every missing field from [`Default`].

use serde::{Deserialize, Serialize};
use tickwire_core::Routing;
use tickwire_core::constants::{
    DEFAULT_CALL_TIMEOUT_MS, DEFAULT_CONNECT_TIMEOUT_MS, DEFAULT_ENDPOINT, DEFAULT_OUTBOUND_BUFFER,
    DEFAULT_RECONNECT_INTERVAL_MS,
};
use tickwire_core::logging::LogFormat;

use crate::errors::{Result, SettingsError};

/// Root settings type.
///
/// ```json
/// {
///   "connection": { "endpoint": "wss://example.com/ws", "callTimeoutMs": 10000 },
///   "routing": { "idField": "req_id" },
///   "logging": { "level": "debug" }
/// }
/// ```
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TickwireSettings {
    /// Settings schema version.
    pub version: String,
    /// Transport, timeout, and reconnect settings.
    pub connection: ConnectionSettings,
    /// Inbound routing rules.
    pub routing: Routing,
    /// Log output settings.
    pub logging: LoggingSettings,
}

impl Default for TickwireSettings {
    fn default() -> Self {
        Self {
            version: "0.1.0".to_string(),
            connection: ConnectionSettings::default(),
            routing: Routing::default(),
            logging: LoggingSettings::default(),
        }
    }
}

impl TickwireSettings {
    /// Reject values the client cannot run with.
    pub fn validate(&self) -> Result<()> {
        self.connection.validate()?;
        if self.routing.id_field.is_empty() {
            return Err(SettingsError::InvalidValue(
                "routing.idField must not be empty".into(),
            ));
        }
        if self.routing.error_field.is_empty() {
            return Err(SettingsError::InvalidValue(
                "routing.errorField must not be empty".into(),
            ));
        }
        Ok(())
    }
}

/// Venue connection settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ConnectionSettings {
    /// WebSocket endpoint (`ws://` or `wss://`).
    pub endpoint: String,
    /// Handshake timeout in milliseconds.
    pub connect_timeout_ms: u64,
    /// Per-call reply window in milliseconds.
    pub call_timeout_ms: u64,
    /// Fixed delay between reconnect attempts in milliseconds.
    ///
    /// There is no backoff and no attempt cap.
    pub reconnect_interval_ms: u64,
    /// Outbound frame queue capacity per session.
    pub outbound_buffer: usize,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            connect_timeout_ms: DEFAULT_CONNECT_TIMEOUT_MS,
            call_timeout_ms: DEFAULT_CALL_TIMEOUT_MS,
            reconnect_interval_ms: DEFAULT_RECONNECT_INTERVAL_MS,
            outbound_buffer: DEFAULT_OUTBOUND_BUFFER,
        }
    }
}

impl ConnectionSettings {
    fn validate(&self) -> Result<()> {
        let url = url::Url::parse(&self.endpoint).map_err(|e| {
            SettingsError::InvalidValue(format!("connection.endpoint '{}': {e}", self.endpoint))
        })?;
        if !matches!(url.scheme(), "ws" | "wss") {
            return Err(SettingsError::InvalidValue(format!(
                "connection.endpoint must use ws:// or wss://, got {}://",
                url.scheme()
            )));
        }
        for (name, value) in [
            ("connectTimeoutMs", self.connect_timeout_ms),
            ("callTimeoutMs", self.call_timeout_ms),
            ("reconnectIntervalMs", self.reconnect_interval_ms),
        ] {
            if value == 0 {
                return Err(SettingsError::InvalidValue(format!(
                    "connection.{name} must be positive"
                )));
            }
        }
        if self.outbound_buffer == 0 {
            return Err(SettingsError::InvalidValue(
                "connection.outboundBuffer must be positive".into(),
            ));
        }
        Ok(())
    }
}

/// Log output settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Default `EnvFilter` directive when `RUST_LOG` is unset.
    pub level: String,
    /// Output format.
    pub format: LogFormat,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Compact,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
