//! Runtime client configuration derived from settings.

use std::time::Duration;

use tickwire_core::Routing;
use tickwire_settings::TickwireSettings;

/// Resolved configuration shared by the supervisor and every session.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClientConfig {
    /// WebSocket endpoint.
    pub endpoint: String,
    /// Handshake window.
    pub connect_timeout: Duration,
    /// Per-call reply window.
    pub call_timeout: Duration,
    /// Fixed delay between connection attempts.
    pub reconnect_interval: Duration,
    /// Outbound frame queue capacity.
    pub outbound_buffer: usize,
    /// Inbound routing rules.
    pub routing: Routing,
}

impl ClientConfig {
    /// Defaults with a different endpoint.
    pub fn for_endpoint(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            ..Self::default()
        }
    }

    /// Override the per-call reply window.
    #[must_use]
    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    /// Override the reconnect interval.
    #[must_use]
    pub fn with_reconnect_interval(mut self, interval: Duration) -> Self {
        self.reconnect_interval = interval;
        self
    }

    /// Override the handshake window.
    #[must_use]
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self::from(&TickwireSettings::default())
    }
}

impl From<&TickwireSettings> for ClientConfig {
    fn from(settings: &TickwireSettings) -> Self {
        let conn = &settings.connection;
        Self {
            endpoint: conn.endpoint.clone(),
            connect_timeout: Duration::from_millis(conn.connect_timeout_ms),
            call_timeout: Duration::from_millis(conn.call_timeout_ms),
            reconnect_interval: Duration::from_millis(conn.reconnect_interval_ms),
            outbound_buffer: conn.outbound_buffer.max(1),
            routing: settings.routing.clone(),
        }
    }
}
