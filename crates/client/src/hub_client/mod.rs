mod ws;

pub use ws::{add_marker, dump, watch};
