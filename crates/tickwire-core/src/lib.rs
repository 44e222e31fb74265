//! # tickwire-core
//!
//! Shared vocabulary for the tickwire venue client:
//!
//! - **IDs**: [`CallId`] (numeric request correlation tag) and [`Topic`]
//!   (push subscription key) as newtypes, plus [`CallIdGenerator`]
//! - **Codec**: request framing and inbound frame decoding with configurable
//!   [`Routing`] rules
//! - **Errors**: [`CallError`] delivered to callers, [`CodecError`] for
//!   malformed inbound frames, [`BusinessFault`] for venue-level errors
//! - **Logging**: `tracing` subscriber bootstrap and a capture layer for tests

#![deny(unsafe_code)]

pub mod codec;
pub mod constants;
pub mod errors;
pub mod ids;
pub mod logging;

pub use codec::{InboundFrame, Routing, StreamRoute};
pub use errors::{BusinessFault, CallError, CallOutcome, CodecError};
pub use ids::{CallId, CallIdGenerator, Topic};
