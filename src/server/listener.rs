use std::time::Duration;

use anyhow::Context;
use tokio::net::TcpListener;
use tracing::{debug, info, warn};

use crate::http::connection::Connection;
use crate::proxy::ProxyHandler;

const ACCEPT_BACKOFF_MIN: Duration = Duration::from_millis(5);
const ACCEPT_BACKOFF_MAX: Duration = Duration::from_secs(1);

/// Binds `listen_addr` and serves connections forever.
///
/// Failing to bind is the only error that leaves this function.
pub async fn run(listen_addr: &str, handler: ProxyHandler) -> anyhow::Result<()> {
    let listener = TcpListener::bind(listen_addr)
        .await
        .with_context(|| format!("failed to bind {listen_addr}"))?;
    info!(
        backends = ?handler.pool().addresses(),
        "Listening on {}", listen_addr
    );

    serve(listener, handler).await
}

/// Accepts connections on an already bound listener, one task per connection.
pub async fn serve(listener: TcpListener, handler: ProxyHandler) -> anyhow::Result<()> {
    let mut backoff = None;

    loop {
        let (socket, peer) = match listener.accept().await {
            Ok(accepted) => {
                backoff = None;
                accepted
            }
            Err(e) => {
                // e.g. EMFILE; the listener itself is still usable
                let delay = accept_backoff(backoff);
                backoff = Some(delay);
                warn!(error = %e, retry_in = ?delay, "Failed to accept connection");
                tokio::time::sleep(delay).await;
                continue;
            }
        };
        debug!(%peer, "Accepted connection");

        let handler = handler.clone();
        tokio::spawn(async move {
            if let Err(e) = handler.serve(Connection::new(socket)).await {
                debug!(%peer, error = %e, "Connection ended with error");
            }
        });
    }
}

/// Delay before the next accept after a failure, doubling up to a cap.
fn accept_backoff(previous: Option<Duration>) -> Duration {
    previous.map_or(ACCEPT_BACKOFF_MIN, |d| (d * 2).min(ACCEPT_BACKOFF_MAX))
}
