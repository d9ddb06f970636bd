//! # mockpilot-bus
//!
//! The shared publish/subscribe bus the relay sits on.
//!
//! - [`Bus`]: named-channel publish/subscribe, implemented by [`LocalBus`]
//! - [`run_subscription`]: reconnecting subscription loop with bounded
//!   exponential backoff, observable through [`BusStatus`]
//! - [`BufferedPublisher`]: holds outgoing messages while the bus is down
//!
//! Delivery is at-least-once per subscription lifetime and ordered per
//! channel for a single publisher. Nothing is promised across channels.

#![deny(unsafe_code)]

pub mod errors;
pub mod local;
pub mod publisher;
pub mod supervisor;
pub mod types;

pub use errors::BusError;
pub use local::LocalBus;
pub use publisher::{BufferedPublisher, Delivery};
pub use supervisor::{BusStatus, run_subscription};
pub use types::{Bus, BusMessage, BusStream, SharedBus};
