//! # mockpilot-core
//!
//! Shared vocabulary for the MockPilot relay crates:
//!
//! - **Branded IDs**: [`ids::SessionId`], [`ids::EventId`], [`ids::ConnectionId`], [`ids::RequestId`]
//! - **Signal events**: [`events::SignalEvent`] tagged over [`events::EventKind`]
//! - **Generation requests**: [`request::GenerationRequest`] emitted by the trigger engine
//! - **Errors**: [`errors::ParseError`] for the malformed-input path
//! - **Logging**: [`logging::init_subscriber`]
//! - **Backoff**: [`retry::BackoffPolicy`] and delay calculation
//!
//! ## Crate Position
//!
//! Foundation crate. Depended on by every other mockpilot crate.

#![deny(unsafe_code)]

pub mod errors;
pub mod events;
pub mod ids;
pub mod logging;
pub mod request;
pub mod retry;

pub use errors::ParseError;
pub use events::{EventKind, EventPayload, SignalEvent};
pub use ids::{ConnectionId, EventId, RequestId, SessionId};
pub use request::GenerationRequest;
