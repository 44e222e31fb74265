//! # tickwire-client
//!
//! Correlated request/response and push-subscription client over a single
//! WebSocket.
//!
//! - [`table`]: pending calls keyed by call id, listeners keyed by topic
//! - [`session`]: one connection generation and its receive loop
//! - [`supervisor`]: connect, detect loss, reconnect on a fixed interval
//! - [`venue`]: request builders for a Deriv-style trading venue
//!
//! ```no_run
//! # async fn demo() {
//! use tickwire_client::{ClientConfig, Supervisor};
//!
//! let supervisor = Supervisor::new(ClientConfig::default());
//! supervisor.start();
//! if supervisor.wait_until_open(std::time::Duration::from_secs(10)).await {
//!     let reply = supervisor.send(serde_json::json!({"ping": 1})).await;
//!     println!("{reply:?}");
//! }
//! supervisor.stop().await;
//! # }
//! ```

#![deny(unsafe_code)]

pub mod config;
pub mod errors;
pub mod session;
pub mod state;
pub mod supervisor;
pub mod table;
pub mod venue;

pub use config::ClientConfig;
pub use errors::ClientError;
pub use session::{PendingReply, Session, SessionContext, SubscribeOutcome};
pub use state::{ConnectionState, SessionState};
pub use supervisor::Supervisor;
pub use table::{ClearReport, CorrelationTable, Listener, TableError};
pub use venue::{ContractParams, VenueClient};

use std::time::Duration;

pub(crate) fn duration_ms(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}
