//! Connectivity states for a single session and for the supervisor.

use serde::Serialize;

/// Lifecycle of one session generation.
///
/// A [`Session`](crate::Session) is constructed only after its handshake, so
/// its own state starts at `Open`. `Connecting` appears in the open log line
/// and, for callers, as [`ConnectionState::Connecting`] on the supervisor.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    /// Handshake in progress.
    Connecting,
    /// Transport established, receive loop running.
    Open,
    /// Loop exited and the correlation table was cleared.
    Closed,
}

/// Connectivity as seen by callers of the supervisor.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    /// No live session.
    #[default]
    Disconnected,
    /// A connection attempt is in flight.
    Connecting,
    /// A session is open.
    Open,
}

impl ConnectionState {
    /// Lowercase name, as used in logs and CLI output.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Open => "open",
        }
    }

    /// Whether calls can be issued.
    pub fn is_open(self) -> bool {
        self == Self::Open
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_is_disconnected() {
        assert_eq!(ConnectionState::default(), ConnectionState::Disconnected);
        assert!(!ConnectionState::default().is_open());
    }

    #[test]
    fn serializes_lowercase() {
        assert_eq!(
            serde_json::to_value(ConnectionState::Connecting).unwrap(),
            "connecting"
        );
        assert_eq!(serde_json::to_value(SessionState::Closed).unwrap(), "closed");
    }

    #[test]
    fn display_matches_as_str() {
        assert_eq!(ConnectionState::Open.to_string(), "open");
    }
}
