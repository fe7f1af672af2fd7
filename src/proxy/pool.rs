//! Upstream pool
//!
//! The fixed, ordered list of backend addresses and the round-robin cursor
//! that walks it. The list is assembled once at startup; afterwards only the
//! cursor moves, and it moves exactly once per selection.

use std::sync::atomic::{AtomicUsize, Ordering};

use crate::error::ProxyError;

/// Round-robin pool of backend addresses (`host:port`).
///
/// Selection never looks at backend health: a backend that is down still
/// gets its turn and the dial failure is dealt with by that one exchange.
#[derive(Debug, Default)]
pub struct UpstreamPool {
    addresses: Vec<String>,
    /// Always in `[0, len)` once the pool is non-empty.
    cursor: AtomicUsize,
}

impl UpstreamPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a pool from a static address list.
    ///
    /// An empty list is a configuration error, reported here rather than on
    /// the first request.
    pub fn from_addresses<I, A>(addresses: I) -> Result<Self, ProxyError>
    where
        I: IntoIterator<Item = A>,
        A: Into<String>,
    {
        let mut pool = Self::new();
        for address in addresses {
            pool.add(address);
        }

        if pool.is_empty() {
            return Err(ProxyError::Configuration(
                "no backend addresses configured".to_string(),
            ));
        }
        Ok(pool)
    }

    /// Registers a backend. Reachability is not checked.
    pub fn add(&mut self, address: impl Into<String>) {
        self.addresses.push(address.into());
    }

    /// Returns the address under the cursor and advances it, wrapping at the
    /// end of the list.
    ///
    /// Safe to call from many tasks at once: each call claims a distinct
    /// cursor position, so a full cycle of calls hands out every address
    /// exactly once.
    #[allow(clippy::should_implement_trait)]
    pub fn next(&self) -> Result<&str, ProxyError> {
        let len = self.addresses.len();
        if len == 0 {
            return Err(ProxyError::Configuration(
                "upstream pool is empty".to_string(),
            ));
        }

        let index = self
            .cursor
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |c| Some((c + 1) % len))
            .unwrap_or_else(|c| c);

        Ok(&self.addresses[index])
    }

    pub fn len(&self) -> usize {
        self.addresses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.addresses.is_empty()
    }

    /// All registered addresses, in selection order.
    pub fn addresses(&self) -> &[String] {
        &self.addresses
    }
}
