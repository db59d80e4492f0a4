//! Marker hub: live marker sharing over WebSocket.

pub mod api;
pub mod config;
pub mod relay;
pub mod shutdown;
pub mod stats;
pub mod store;
