use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, DuplexStream};
use tokio::net::TcpStream;

use crate::error::CaptureError;
use crate::http::parser::RequestParser;
use crate::http::request::Request;
use crate::http::response::Response;

/// Upper bound for the request line plus headers.
pub const MAX_HEAD_BYTES: usize = 64 * 1024;

/// Upper bound for a whole buffered request, body included.
pub const MAX_REQUEST_BYTES: usize = 16 * 1024 * 1024;

const READ_CHUNK: usize = 4096;

/// A byte stream an inbound connection can run over.
pub trait Transport: AsyncRead + AsyncWrite + Unpin + Send + 'static {
    /// Whether the stream may be handed over raw, outside HTTP framing.
    fn detachable(&self) -> bool {
        true
    }
}

impl Transport for TcpStream {}

impl Transport for DuplexStream {}

/// An inbound client connection still under HTTP framing.
///
/// While the proxy holds a `Connection` it can read a request and answer
/// with a structured response. [`Connection::try_hijack`] consumes it and
/// gives up that ability for good.
#[derive(Debug)]
pub struct Connection<S> {
    stream: S,
    buffer: BytesMut,
    parser: RequestParser,
}

/// A client stream detached from HTTP framing.
#[derive(Debug)]
pub struct Hijacked<S> {
    /// The raw client stream; the holder is now its only owner.
    pub stream: S,
    /// Bytes already read off the socket past the first request.
    pub buffered: Bytes,
}

impl<S: Transport> Connection<S> {
    pub fn new(stream: S) -> Self {
        Self {
            stream,
            buffer: BytesMut::with_capacity(READ_CHUNK),
            parser: RequestParser::default(),
        }
    }

    /// Reads the next complete request off the connection.
    ///
    /// Returns `Ok(None)` if the client closed the connection before sending
    /// anything. Any bytes that arrive after the request stay buffered and
    /// travel with the stream on hijack.
    pub async fn read_request(&mut self) -> Result<Option<Request>, CaptureError> {
        loop {
            // Pick up parsing where the previous read left off
            match self.parser.parse(&self.buffer)? {
                Some((request, consumed)) => {
                    let _ = self.buffer.split_to(consumed);
                    return Ok(Some(request));
                }

                None => {
                    if !self.parser.has_head() && self.buffer.len() > MAX_HEAD_BYTES {
                        return Err(CaptureError::HeadTooLarge(MAX_HEAD_BYTES));
                    }
                    if self.buffer.len() > MAX_REQUEST_BYTES {
                        return Err(CaptureError::TooLarge(MAX_REQUEST_BYTES));
                    }
                }
            }

            self.buffer.reserve(READ_CHUNK);
            let n = self.stream.read_buf(&mut self.buffer).await?;

            if n == 0 {
                return if self.buffer.is_empty() {
                    Ok(None)
                } else {
                    Err(CaptureError::Truncated)
                };
            }
        }
    }

    /// Writes a structured response. Only possible before hijacking.
    pub async fn respond(&mut self, response: &Response) -> std::io::Result<()> {
        self.stream.write_all(&response.to_bytes()).await?;
        self.stream.flush().await
    }

    /// Detaches the underlying stream from HTTP framing.
    ///
    /// Hands the connection back untouched if the transport cannot be
    /// detached, so the caller can still answer with an error response.
    pub fn try_hijack(self) -> Result<Hijacked<S>, Self> {
        if !self.stream.detachable() {
            return Err(self);
        }
        Ok(Hijacked {
            stream: self.stream,
            buffered: self.buffer.freeze(),
        })
    }
}
