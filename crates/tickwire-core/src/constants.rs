//! Package-level constants.

/// Current version of tickwire (sourced from Cargo.toml).
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Package name.
pub const NAME: &str = "tickwire";

/// Default venue endpoint.
pub const DEFAULT_ENDPOINT: &str = "wss://ws.derivws.com/websockets/v3?app_id=1089";

/// Default per-call reply window in milliseconds.
pub const DEFAULT_CALL_TIMEOUT_MS: u64 = 15_000;

/// Default WebSocket handshake timeout in milliseconds.
pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 10_000;

/// Default fixed delay between reconnect attempts in milliseconds.
pub const DEFAULT_RECONNECT_INTERVAL_MS: u64 = 5_000;

/// Default capacity of a session's outbound frame queue.
pub const DEFAULT_OUTBOUND_BUFFER: usize = 64;
