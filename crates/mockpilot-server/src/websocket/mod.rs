//! WebSocket session handling and the bus-to-hub bridge.

pub mod bridge;
pub mod session;
