//! Pipeline - round-robin TCP-level reverse proxy
//!
//! Reads the first HTTP request on each inbound connection, replays it on a
//! fresh connection to the next backend in the pool, then relays raw bytes
//! in both directions until either side closes.

pub mod config;
pub mod error;
pub mod http;
pub mod proxy;
pub mod server;

pub use error::{CaptureError, ProxyError};
