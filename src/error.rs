//! Error taxonomy for a single exchange.
//!
//! Every variant except [`ProxyError::Configuration`] is local to one inbound
//! connection. Failures before the client socket is hijacked are turned into
//! a `500` response; failures after that point can only close the socket.

use std::io;
use std::time::Duration;

use thiserror::Error;

use crate::http::parser::ParseError;

/// Errors raised while reading and re-serializing the inbound request.
#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("malformed request: {0}")]
    Malformed(#[from] ParseError),

    #[error("request head exceeds {0} bytes")]
    HeadTooLarge(usize),

    #[error("request exceeds {0} bytes")]
    TooLarge(usize),

    #[error("connection closed before the request was complete")]
    Truncated,

    #[error("failed to read request: {0}")]
    Io(#[from] io::Error),

    #[error("request cannot be serialized: {0}")]
    Unserializable(&'static str),
}

#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error(transparent)]
    Capture(#[from] CaptureError),

    #[error("failed to connect to backend {backend}: {source}")]
    Dial {
        backend: String,
        #[source]
        source: io::Error,
    },

    #[error("connecting to backend {backend} timed out after {timeout:?}")]
    DialTimeout { backend: String, timeout: Duration },

    #[error("transport does not support hijacking")]
    HijackUnsupported,

    #[error("relay failed: {0}")]
    Relay(#[source] io::Error),
}
