//! # mockpilot-trigger
//!
//! Decides *when* a component generation request should fire.
//!
//! - [`DebounceEngine`]: per-session sliding windows over transcript and
//!   intent events; `ingest` returns at most one [`GenerationRequest`]
//! - [`TriggerService`]: shards sessions across single-writer workers, feeds
//!   them from the bus, and publishes requests downstream
//!
//! The engine knows nothing about client connections.
//!
//! [`GenerationRequest`]: mockpilot_core::GenerationRequest

#![deny(unsafe_code)]

pub mod engine;
pub mod errors;
pub mod service;

pub use engine::{DebounceEngine, EngineConfig, SweepReport};
pub use errors::TriggerError;
pub use service::{ShardStatus, TRIGGER_PRODUCER, TriggerService, shard_for};
