//! # mockpilot-server
//!
//! Session fan-out hub and the axum gateway in front of it.
//!
//! - **Hub**: [`hub::Hub`] tracks sessions and their connections, routes bus
//!   events to every connection of the target session, and forwards client
//!   frames back onto the bus
//! - **Outbound queues**: [`hub::queue::OutboundQueue`] bounds each
//!   connection and sheds low-priority frames first
//! - **Liveness**: [`hub::liveness::LivenessMonitor`] turns missed producer
//!   heartbeats into `service_down` frames
//! - **Gateway**: [`server::RelayServer`] serves `/v1/ws/{session_id}`,
//!   `/v1/bus/{channel}`, `/health` and `/metrics`
//! - **Shutdown**: [`shutdown::ShutdownCoordinator`] drains connections with
//!   a close code clients can reconnect on
//!
//! ## Crate Position
//!
//! Depends on mockpilot-core, mockpilot-settings and mockpilot-bus.
//! Depended on by the relay binary.

#![deny(unsafe_code)]

pub mod auth;
pub mod errors;
pub mod health;
pub mod hub;
pub mod metrics;
pub mod server;
pub mod shutdown;
pub mod websocket;

pub use auth::{CredentialVerifier, JwtVerifier};
pub use errors::HubError;
pub use hub::{Hub, HubConfig};
pub use server::RelayServer;
pub use shutdown::ShutdownCoordinator;
