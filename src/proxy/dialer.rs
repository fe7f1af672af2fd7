//! Backend dialer

use std::time::Duration;

use tokio::net::TcpStream;
use tokio::time::timeout;

use crate::error::ProxyError;

/// Connect timeout for every backend dial.
pub const DIAL_TIMEOUT: Duration = Duration::from_secs(5);

/// Opens a fresh TCP connection to `backend`, giving up after `connect_timeout`.
///
/// There is exactly one attempt; a refused or timed-out dial ends the
/// exchange that asked for it.
pub async fn dial(backend: &str, connect_timeout: Duration) -> Result<TcpStream, ProxyError> {
    let stream = timeout(connect_timeout, TcpStream::connect(backend))
        .await
        .map_err(|_| ProxyError::DialTimeout {
            backend: backend.to_string(),
            timeout: connect_timeout,
        })?
        .map_err(|source| ProxyError::Dial {
            backend: backend.to_string(),
            source,
        })?;

    // Relayed chunks are small; don't let Nagle hold them back
    if let Err(e) = stream.set_nodelay(true) {
        tracing::debug!(backend, error = %e, "Failed to set TCP_NODELAY");
    }

    tracing::trace!(backend, "Connected to backend");
    Ok(stream)
}
