use thiserror::Error;

use crate::http::request::{Method, Request, is_token_bytes};

/// Longest chunk-size line accepted, extensions included.
const MAX_CHUNK_LINE: usize = 4096;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("invalid request line")]
    InvalidRequest,
    #[error("invalid method")]
    InvalidMethod,
    #[error("unsupported protocol version")]
    InvalidVersion,
    #[error("invalid header line")]
    InvalidHeader,
    #[error("invalid Content-Length")]
    InvalidContentLength,
    #[error("both Content-Length and Transfer-Encoding present")]
    ConflictingFraming,
    #[error("unsupported Transfer-Encoding")]
    UnsupportedTransferEncoding,
    #[error("invalid chunk framing")]
    InvalidChunk,
    #[error("incomplete request")]
    Incomplete,
}

#[derive(Debug, Clone, Copy)]
enum BodyFraming {
    None,
    Length(usize),
    Chunked,
}

/// A parsed request head waiting for its body.
#[derive(Debug)]
struct Head {
    method: Method,
    path: String,
    version: String,
    headers: Vec<(String, String)>,
    body_start: usize,
    framing: BodyFraming,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
enum ChunkState {
    #[default]
    Size,
    Data { end: usize },
    Trailer,
}

/// Position inside a chunked body that has only partly arrived.
#[derive(Debug, Default)]
struct ChunkCursor {
    /// Start of the element not yet consumed.
    pos: usize,
    /// How far the current line has been searched for its CRLF.
    scanned: usize,
    state: ChunkState,
}

/// Incremental HTTP/1.x request parser.
///
/// Feed it the same growing buffer on every call. The parser remembers where
/// it stopped, so each byte of the head and of a chunked body is looked at
/// once no matter how many reads it took to arrive. After a request is
/// returned the parser is ready for the bytes that follow it.
#[derive(Debug, Default)]
pub struct RequestParser {
    scanned: usize,
    head: Option<Head>,
    chunks: ChunkCursor,
}

/// Parses one HTTP/1.x request from the front of `buf`.
///
/// On success returns the request and the number of bytes it occupied, so the
/// caller can keep whatever follows (a pipelined request) for later.
/// [`ParseError::Incomplete`] means more bytes are needed.
pub fn parse_http_request(buf: &[u8]) -> Result<(Request, usize), ParseError> {
    RequestParser::default()
        .parse(buf)?
        .ok_or(ParseError::Incomplete)
}

impl RequestParser {
    /// Whether the request head has been seen in full.
    pub fn has_head(&self) -> bool {
        self.head.is_some()
    }

    /// Continues parsing `buf`, which must start with the same bytes as on
    /// the previous call.
    ///
    /// `Ok(None)` means more bytes are needed.
    pub fn parse(&mut self, buf: &[u8]) -> Result<Option<(Request, usize)>, ParseError> {
        let head = match self.head.take() {
            Some(head) => head,
            None => {
                // The terminator may straddle the previous read
                let from = self.scanned.saturating_sub(3).min(buf.len());
                match find_headers_end(&buf[from..]) {
                    Some(i) => parse_head(buf, from + i)?,
                    None => {
                        self.scanned = buf.len();
                        return Ok(None);
                    }
                }
            }
        };

        let body_end = match head.framing {
            BodyFraming::None => Some(head.body_start),
            BodyFraming::Length(n) => {
                let end = head
                    .body_start
                    .checked_add(n)
                    .ok_or(ParseError::InvalidContentLength)?;
                (buf.len() >= end).then_some(end)
            }
            BodyFraming::Chunked => self
                .chunks
                .advance(&buf[head.body_start..])?
                .map(|len| head.body_start + len),
        };

        let Some(body_end) = body_end else {
            self.head = Some(head);
            return Ok(None);
        };

        let request = Request {
            method: head.method,
            path: head.path,
            version: head.version,
            headers: head.headers,
            body: buf[head.body_start..body_end].to_vec(),
            raw_head: Some(buf[..head.body_start].to_vec()),
        };
        *self = Self::default();

        Ok(Some((request, body_end)))
    }
}

fn find_headers_end(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n")
}

/// Parses the request line and headers in `buf[..headers_end]`.
///
/// Only the request line has to be text. Header names must be tokens; header
/// values may carry any byte except CR, LF and NUL and are decoded lossily for
/// lookups. The exact bytes travel in [`Request::raw_head`].
fn parse_head(buf: &[u8], headers_end: usize) -> Result<Head, ParseError> {
    let body_start = headers_end + 4;

    // Every line, the last one included, keeps its CRLF here
    let mut lines = buf[..headers_end + 2].split_inclusive(|&b| b == b'\n');

    // Request line: exactly three fields separated by single spaces
    let request_line = lines
        .next()
        .and_then(|line| line.strip_suffix(b"\r\n"))
        .ok_or(ParseError::InvalidRequest)?;
    let request_line = std::str::from_utf8(request_line).map_err(|_| ParseError::InvalidRequest)?;
    let mut parts = request_line.split(' ');

    let method_str = parts.next().ok_or(ParseError::InvalidRequest)?;
    let path = parts.next().ok_or(ParseError::InvalidRequest)?;
    let version = parts.next().ok_or(ParseError::InvalidRequest)?;
    if parts.next().is_some() || path.is_empty() {
        return Err(ParseError::InvalidRequest);
    }

    let method = Method::from_str(method_str).ok_or(ParseError::InvalidMethod)?;

    if version != "HTTP/1.1" && version != "HTTP/1.0" {
        return Err(ParseError::InvalidVersion);
    }

    // Headers
    let mut headers = Vec::new();

    for line in lines {
        // A bare LF is not a line ending
        let line = line.strip_suffix(b"\r\n").ok_or(ParseError::InvalidHeader)?;

        // obs-fold is not accepted
        if line.first().is_some_and(|&b| b == b' ' || b == b'\t') {
            return Err(ParseError::InvalidHeader);
        }

        let colon = line
            .iter()
            .position(|&b| b == b':')
            .ok_or(ParseError::InvalidHeader)?;
        let (key, value) = (&line[..colon], &line[colon + 1..]);

        if !is_token_bytes(key) || value.iter().any(|&b| b == b'\r' || b == 0) {
            return Err(ParseError::InvalidHeader);
        }

        headers.push((
            String::from_utf8_lossy(key).into_owned(),
            String::from_utf8_lossy(value.trim_ascii()).into_owned(),
        ));
    }

    let framing = body_framing(&headers)?;

    Ok(Head {
        method,
        path: path.to_string(),
        version: version.to_string(),
        headers,
        body_start,
        framing,
    })
}

fn body_framing(headers: &[(String, String)]) -> Result<BodyFraming, ParseError> {
    let mut content_length: Option<usize> = None;
    let mut transfer_encoding: Option<&str> = None;

    for (key, value) in headers {
        if key.eq_ignore_ascii_case("Content-Length") {
            let n = value
                .parse::<usize>()
                .map_err(|_| ParseError::InvalidContentLength)?;
            // Repeated Content-Length is only tolerated when the values agree
            if content_length.is_some_and(|prev| prev != n) {
                return Err(ParseError::InvalidContentLength);
            }
            content_length = Some(n);
        } else if key.eq_ignore_ascii_case("Transfer-Encoding") {
            transfer_encoding = Some(value);
        }
    }

    match (content_length, transfer_encoding) {
        (Some(_), Some(_)) => Err(ParseError::ConflictingFraming),
        (Some(n), None) => Ok(BodyFraming::Length(n)),
        (None, Some(te)) => {
            let last = te.rsplit(',').next().unwrap_or_default().trim();
            if last.eq_ignore_ascii_case("chunked") {
                Ok(BodyFraming::Chunked)
            } else {
                Err(ParseError::UnsupportedTransferEncoding)
            }
        }
        (None, None) => Ok(BodyFraming::None),
    }
}

impl ChunkCursor {
    /// Walks the chunked body in `body` from where the last call stopped.
    ///
    /// Returns the length of the body as it sits on the wire, up to and
    /// including the blank line that closes the trailer section, once it has
    /// fully arrived.
    fn advance(&mut self, body: &[u8]) -> Result<Option<usize>, ParseError> {
        loop {
            match self.state {
                ChunkState::Size | ChunkState::Trailer => {
                    // A CR seen at the end of the last read may pair with a new LF
                    let from = self.scanned.saturating_sub(1).max(self.pos);
                    let Some(line_end) = find_crlf(body, from) else {
                        self.scanned = body.len();
                        if self.state == ChunkState::Size && body.len() - self.pos > MAX_CHUNK_LINE {
                            return Err(ParseError::InvalidChunk);
                        }
                        return Ok(None);
                    };

                    let line = &body[self.pos..line_end];
                    self.pos = line_end + 2;
                    self.scanned = self.pos;

                    if self.state == ChunkState::Trailer {
                        // Trailer fields, terminated by an empty line
                        if line.is_empty() {
                            return Ok(Some(self.pos));
                        }
                        continue;
                    }

                    let size = parse_chunk_size(line)?;
                    self.state = if size == 0 {
                        ChunkState::Trailer
                    } else {
                        let end = self.pos.checked_add(size).ok_or(ParseError::InvalidChunk)?;
                        ChunkState::Data { end }
                    };
                }
                ChunkState::Data { end } => {
                    let chunk_end = end.checked_add(2).ok_or(ParseError::InvalidChunk)?;
                    if body.len() < chunk_end {
                        return Ok(None);
                    }
                    if &body[end..chunk_end] != b"\r\n" {
                        return Err(ParseError::InvalidChunk);
                    }
                    self.pos = chunk_end;
                    self.scanned = chunk_end;
                    self.state = ChunkState::Size;
                }
            }
        }
    }
}

fn parse_chunk_size(line: &[u8]) -> Result<usize, ParseError> {
    let line = std::str::from_utf8(line).map_err(|_| ParseError::InvalidChunk)?;
    // Chunk extensions are carried along untouched
    let size = line.split(';').next().unwrap_or_default().trim_end_matches([' ', '\t']);

    if size.is_empty() || size.len() > 16 {
        return Err(ParseError::InvalidChunk);
    }
    usize::from_str_radix(size, 16).map_err(|_| ParseError::InvalidChunk)
}

fn find_crlf(buf: &[u8], from: usize) -> Option<usize> {
    buf.get(from..)?
        .windows(2)
        .position(|w| w == b"\r\n")
        .map(|i| from + i)
}
