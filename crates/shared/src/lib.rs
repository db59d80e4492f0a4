//! Shared types for the marker hub and its clients.

mod models;

// Explicit re-exports (avoids rust-analyzer issues with `pub use models::*`)
pub use models::ws_types;
pub use models::{
    encode_marker, parse_inbound, AddMarkerEvent, Envelope, Inbound, InboundError, Marker,
    MAX_LAT, MAX_LON,
};
