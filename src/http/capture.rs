//! Request capture.
//!
//! Turns a parsed [`Request`] back into the bytes a client would have sent,
//! so the proxy can replay it verbatim on a fresh backend connection.
//!
//! Nothing is rewritten on the way: `Host` is left as the client sent it, no
//! `X-Forwarded-For` is added and hop-by-hop headers such as `Connection` are
//! passed through. A parsed request is replayed from the head bytes it arrived
//! with, so whitespace and non-UTF-8 header values survive untouched.

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::CaptureError;
use crate::http::request::{is_token, Request};

/// Serializes `req` into its HTTP/1.x wire form.
///
/// Fails if a field could not be re-parsed on the other side, e.g. a target
/// containing whitespace or a header value with an embedded line break. A
/// request that came out of the parser always captures cleanly.
pub fn capture_request(req: &Request) -> Result<Bytes, CaptureError> {
    validate(req)?;

    if let Some(head) = &req.raw_head {
        let mut buf = BytesMut::with_capacity(head.len() + req.body.len());
        buf.put_slice(head);
        buf.put_slice(&req.body);
        return Ok(buf.freeze());
    }

    let head_len = req.method.as_str().len()
        + req.path.len()
        + req.version.len()
        + req
            .headers
            .iter()
            .map(|(k, v)| k.len() + v.len() + 4)
            .sum::<usize>()
        + 6;
    let mut buf = BytesMut::with_capacity(head_len + req.body.len());

    // Request line
    buf.put_slice(req.method.as_str().as_bytes());
    buf.put_u8(b' ');
    buf.put_slice(req.path.as_bytes());
    buf.put_u8(b' ');
    buf.put_slice(req.version.as_bytes());
    buf.put_slice(b"\r\n");

    for (k, v) in &req.headers {
        buf.put_slice(k.as_bytes());
        buf.put_slice(b": ");
        buf.put_slice(v.as_bytes());
        buf.put_slice(b"\r\n");
    }
    buf.put_slice(b"\r\n");

    buf.put_slice(&req.body);

    Ok(buf.freeze())
}

fn validate(req: &Request) -> Result<(), CaptureError> {
    if req.path.is_empty() || req.path.bytes().any(|b| b.is_ascii_whitespace() || b.is_ascii_control()) {
        return Err(CaptureError::Unserializable("invalid request target"));
    }
    if !req.version.starts_with("HTTP/1.") {
        return Err(CaptureError::Unserializable("unsupported protocol version"));
    }
    for (k, v) in &req.headers {
        if !is_token(k) {
            return Err(CaptureError::Unserializable("invalid header name"));
        }
        if v.bytes().any(|b| b == b'\r' || b == b'\n' || b == 0) {
            return Err(CaptureError::Unserializable("invalid header value"));
        }
    }
    Ok(())
}
