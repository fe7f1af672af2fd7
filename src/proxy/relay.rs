//! Bidirectional relay
//!
//! Once the client socket is hijacked and the backend is connected, the
//! proxy stops looking at HTTP and just moves bytes. Two copy loops run as
//! separate tasks, one per direction:
//!
//! ```text
//!   client ──read──▶ [client → backend] ──write──▶ backend
//!   client ◀─write── [backend → client] ◀──read─── backend
//! ```
//!
//! The loops share nothing except their termination: when one of them stops
//! (EOF, read error or write error) it shuts down the stream it was writing
//! to and signals the other loop, which then stops too. [`relay`] returns
//! only after both loops are done, and both streams are dropped (closed)
//! at that point.
//!
//! There is no idle timeout. A connection on which neither side sends
//! anything stays open until one side closes it.

use std::io;

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::oneshot;

use crate::error::ProxyError;

/// Size of a single read in either direction.
pub const RELAY_CHUNK_SIZE: usize = 1024;

/// Why one direction of the relay stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    /// The source stream reached end-of-file.
    Eof,
    /// Reading the source stream failed.
    ReadError(io::ErrorKind),
    /// Writing to the destination stream failed.
    WriteError(io::ErrorKind),
    /// The opposite direction stopped first.
    PeerClosed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DirectionStats {
    /// Bytes written to the destination stream.
    pub bytes: u64,
    pub termination: Termination,
}

/// Outcome of a finished relay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelayStats {
    pub client_to_backend: DirectionStats,
    pub backend_to_client: DirectionStats,
}

/// Relays bytes between `client` and `backend` until either side is done.
///
/// `preamble` is written to the backend in full before either loop starts;
/// it carries the captured request (plus anything the client pipelined after
/// it). A failure to deliver it ends the relay immediately.
pub async fn relay<C, B>(client: C, mut backend: B, preamble: Bytes) -> Result<RelayStats, ProxyError>
where
    C: AsyncRead + AsyncWrite + Send + 'static,
    B: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    backend.write_all(&preamble).await.map_err(ProxyError::Relay)?;
    backend.flush().await.map_err(ProxyError::Relay)?;

    let (client_rd, client_wr) = tokio::io::split(client);
    let (backend_rd, backend_wr) = tokio::io::split(backend);

    // Each loop holds the sender that tells the other one it has stopped.
    // Dropping it is the signal, so a loop that exits for any reason
    // releases its peer.
    let (up_done_tx, up_done_rx) = oneshot::channel::<()>();
    let (down_done_tx, down_done_rx) = oneshot::channel::<()>();

    let upstream = tokio::spawn(pipe(client_rd, backend_wr, down_done_rx, up_done_tx));
    let downstream = tokio::spawn(pipe(backend_rd, client_wr, up_done_rx, down_done_tx));

    let (upstream, downstream) = tokio::join!(upstream, downstream);

    Ok(RelayStats {
        client_to_backend: upstream.map_err(|e| ProxyError::Relay(io::Error::other(e)))?,
        backend_to_client: downstream.map_err(|e| ProxyError::Relay(io::Error::other(e)))?,
    })
}

async fn pipe<R, W>(
    mut reader: R,
    mut writer: W,
    mut peer_done: oneshot::Receiver<()>,
    _done: oneshot::Sender<()>,
) -> DirectionStats
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buf = [0u8; RELAY_CHUNK_SIZE];
    let mut bytes = 0u64;

    let termination = loop {
        let step = tokio::select! {
            step = copy_chunk(&mut reader, &mut writer, &mut buf) => step,
            _ = &mut peer_done => break Termination::PeerClosed,
        };

        match step {
            Ok(0) => break Termination::Eof,
            Ok(n) => bytes += n as u64,
            Err(termination) => break termination,
        }
    };

    // Closing the write side tells the far end we are done
    let _ = writer.shutdown().await;

    tracing::trace!(bytes, ?termination, "Relay direction finished");
    DirectionStats { bytes, termination }
}

async fn copy_chunk<R, W>(reader: &mut R, writer: &mut W, buf: &mut [u8]) -> Result<usize, Termination>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let n = reader
        .read(buf)
        .await
        .map_err(|e| Termination::ReadError(e.kind()))?;
    if n == 0 {
        return Ok(0);
    }

    writer
        .write_all(&buf[..n])
        .await
        .map_err(|e| Termination::WriteError(e.kind()))?;
    Ok(n)
}
