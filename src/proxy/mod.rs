//! Reverse proxy core
//!
//! Round-robin backend selection, backend dialing, the bidirectional byte
//! relay and the per-connection handler that ties them together.

pub mod dialer;
pub mod handler;
pub mod pool;
pub mod relay;

pub use handler::{ExchangeState, ProxyHandler};
pub use pool::UpstreamPool;
pub use relay::{RelayStats, Termination};
