//! Per-connection orchestration
//!
//! Drives one inbound connection through
//! `Received → Captured → Selected → Dialed → Hijacked → Relaying → Closed`.
//! A failure before `Hijacked` is answered with a 500; after it the only
//! thing left to do is close the socket. Every path ends with both the
//! client and the backend connection dropped.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::error::ProxyError;
use crate::http::capture::capture_request;
use crate::http::connection::{Connection, Transport};
use crate::http::request::Request;
use crate::http::response::Response;
use crate::proxy::dialer::{dial, DIAL_TIMEOUT};
use crate::proxy::pool::UpstreamPool;
use crate::proxy::relay::{relay, RelayStats};

static EXCHANGE_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Where an exchange currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExchangeState {
    Received,
    Captured,
    Selected,
    Dialed,
    Hijacked,
    Relaying,
    Closed,
}

impl ExchangeState {
    /// Whether the client connection is still under HTTP framing.
    pub fn can_respond(&self) -> bool {
        matches!(
            self,
            ExchangeState::Received
                | ExchangeState::Captured
                | ExchangeState::Selected
                | ExchangeState::Dialed
        )
    }
}

/// Bookkeeping for one inbound connection's trip through the proxy.
#[derive(Debug)]
pub struct Exchange {
    id: u64,
    state: ExchangeState,
}

impl Exchange {
    fn new() -> Self {
        Self {
            id: EXCHANGE_ID_COUNTER.fetch_add(1, Ordering::Relaxed),
            state: ExchangeState::Received,
        }
    }

    fn advance(&mut self, next: ExchangeState) {
        tracing::trace!(exchange = self.id, from = ?self.state, to = ?next, "Exchange state change");
        self.state = next;
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn state(&self) -> ExchangeState {
        self.state
    }
}

/// Forwards inbound connections to the upstream pool.
///
/// Cheap to clone; clones share the pool and therefore its cursor.
#[derive(Debug, Clone)]
pub struct ProxyHandler {
    pool: Arc<UpstreamPool>,
    dial_timeout: Duration,
}

impl ProxyHandler {
    pub fn new(pool: UpstreamPool) -> Self {
        Self::with_dial_timeout(pool, DIAL_TIMEOUT)
    }

    pub fn with_dial_timeout(pool: UpstreamPool, dial_timeout: Duration) -> Self {
        Self {
            pool: Arc::new(pool),
            dial_timeout,
        }
    }

    pub fn pool(&self) -> &UpstreamPool {
        &self.pool
    }

    /// Serves one inbound connection from first byte to close.
    ///
    /// Returns the relay statistics when the exchange got as far as relaying,
    /// `Ok(None)` when the client went away without sending a request, and
    /// the error that aborted the exchange otherwise.
    pub async fn serve<S: Transport>(&self, mut conn: Connection<S>) -> Result<Option<RelayStats>, ProxyError> {
        let request = match conn.read_request().await {
            Ok(Some(request)) => request,
            Ok(None) => return Ok(None),
            Err(e) => {
                let e = ProxyError::from(e);
                tracing::warn!(error = %e, "Failed to read request");
                reject(&mut conn, &e).await;
                return Err(e);
            }
        };

        self.forward(conn, request).await.map(Some)
    }

    /// Forwards an already-read request and relays the rest of the
    /// connection to the selected backend.
    pub async fn forward<S: Transport>(&self, mut conn: Connection<S>, request: Request) -> Result<RelayStats, ProxyError> {
        let mut exchange = Exchange::new();

        tracing::debug!(
            exchange = exchange.id(),
            method = %request.method,
            path = %request.path,
            "Request received"
        );

        let captured = match capture_request(&request) {
            Ok(bytes) => bytes,
            Err(e) => return abort(&mut conn, &mut exchange, e.into()).await,
        };
        exchange.advance(ExchangeState::Captured);

        let backend = match self.pool.next() {
            Ok(backend) => backend,
            Err(e) => return abort(&mut conn, &mut exchange, e).await,
        };
        exchange.advance(ExchangeState::Selected);

        let upstream = match dial(backend, self.dial_timeout).await {
            Ok(stream) => stream,
            Err(e) => return abort(&mut conn, &mut exchange, e).await,
        };
        exchange.advance(ExchangeState::Dialed);

        let hijacked = match conn.try_hijack() {
            Ok(hijacked) => hijacked,
            Err(mut conn) => {
                return abort(&mut conn, &mut exchange, ProxyError::HijackUnsupported).await;
            }
        };
        exchange.advance(ExchangeState::Hijacked);

        // Request first, then whatever the client pipelined behind it
        let preamble = if hijacked.buffered.is_empty() {
            captured
        } else {
            let mut bytes = Vec::with_capacity(captured.len() + hijacked.buffered.len());
            bytes.extend_from_slice(&captured);
            bytes.extend_from_slice(&hijacked.buffered);
            bytes.into()
        };

        exchange.advance(ExchangeState::Relaying);
        let result = relay(hijacked.stream, upstream, preamble).await;
        exchange.advance(ExchangeState::Closed);

        match &result {
            Ok(stats) => tracing::info!(
                exchange = exchange.id(),
                backend,
                method = %request.method,
                path = %request.path,
                sent = stats.client_to_backend.bytes,
                received = stats.backend_to_client.bytes,
                "Exchange closed"
            ),
            Err(e) => tracing::debug!(
                exchange = exchange.id(),
                backend,
                error = %e,
                "Relay ended with error"
            ),
        }

        result
    }
}

/// Ends an exchange that failed before hijacking.
async fn abort<S: Transport, T>(
    conn: &mut Connection<S>,
    exchange: &mut Exchange,
    error: ProxyError,
) -> Result<T, ProxyError> {
    tracing::warn!(exchange = exchange.id(), state = ?exchange.state(), error = %error, "Exchange aborted");

    if exchange.state().can_respond() {
        reject(conn, &error).await;
    }
    exchange.advance(ExchangeState::Closed);

    Err(error)
}

async fn reject<S: Transport>(conn: &mut Connection<S>, error: &ProxyError) {
    if let Err(e) = conn.respond(&Response::internal_error()).await {
        tracing::debug!(error = %e, cause = %error, "Failed to send error response");
    }
}
