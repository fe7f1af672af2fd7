use std::fmt;

/// HTTP request methods.
///
/// The proxy does not route by method, so any syntactically valid token is
/// accepted. The registered methods get their own variants; everything else
/// is carried verbatim in [`Method::Extension`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Method {
    /// GET - Retrieve a resource
    GET,
    /// POST - Create or submit data
    POST,
    /// PUT - Replace a resource
    PUT,
    /// DELETE - Delete a resource
    DELETE,
    /// HEAD - Like GET but without the response body
    HEAD,
    /// OPTIONS - Describe communication options
    OPTIONS,
    /// PATCH - Partial modification of a resource
    PATCH,
    /// CONNECT - Establish a tunnel
    CONNECT,
    /// TRACE - Message loop-back test
    TRACE,
    /// Any other method token, case preserved
    Extension(String),
}

/// Represents a parsed HTTP request from a client.
///
/// Headers keep their arrival order and the exact spelling of their names so
/// the request can be written back out unchanged. The body holds the raw
/// bytes as framed on the wire; for chunked requests that includes the chunk
/// size lines and trailers.
///
/// Header values are trimmed and decoded lossily, which is enough for
/// lookups. A parsed request also keeps its head exactly as it arrived in
/// `raw_head`, and that is what gets replayed upstream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    /// The HTTP method (GET, POST, etc.)
    pub method: Method,
    /// The request target (e.g., "/index.html?x=1")
    pub path: String,
    /// HTTP version (typically "HTTP/1.1")
    pub version: String,
    /// Request headers in arrival order
    pub headers: Vec<(String, String)>,
    /// Request body, as received
    pub body: Vec<u8>,
    /// Request line and headers as received, final blank line included.
    /// `None` for requests built in code.
    pub raw_head: Option<Vec<u8>>,
}

/// Builder for constructing Request objects.
pub struct RequestBuilder {
    method: Option<Method>,
    path: Option<String>,
    version: Option<String>,
    headers: Vec<(String, String)>,
    body: Vec<u8>,
}

/// Returns `true` for the characters RFC 9110 allows in a token.
pub(crate) fn is_token_char(c: u8) -> bool {
    c.is_ascii_alphanumeric() || b"!#$%&'*+-.^_`|~".contains(&c)
}

pub(crate) fn is_token(s: &str) -> bool {
    is_token_bytes(s.as_bytes())
}

pub(crate) fn is_token_bytes(s: &[u8]) -> bool {
    !s.is_empty() && s.iter().copied().all(is_token_char)
}

impl Method {
    /// Parses an HTTP method from a string.
    ///
    /// Methods are case-sensitive: `"GET"` is [`Method::GET`] while `"get"`
    /// is an extension method.
    ///
    /// # Returns
    ///
    /// `None` if the string is not a valid token.
    ///
    /// # Example
    ///
    /// ```
    /// # use pipeline::http::request::Method;
    /// assert_eq!(Method::from_str("GET"), Some(Method::GET));
    /// assert_eq!(Method::from_str("get"), Some(Method::Extension("get".into())));
    /// assert_eq!(Method::from_str("GE T"), None);
    /// ```
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        let method = match s {
            "GET" => Method::GET,
            "POST" => Method::POST,
            "PUT" => Method::PUT,
            "DELETE" => Method::DELETE,
            "HEAD" => Method::HEAD,
            "OPTIONS" => Method::OPTIONS,
            "PATCH" => Method::PATCH,
            "CONNECT" => Method::CONNECT,
            "TRACE" => Method::TRACE,
            other if is_token(other) => Method::Extension(other.to_string()),
            _ => return None,
        };
        Some(method)
    }

    pub fn as_str(&self) -> &str {
        match self {
            Method::GET => "GET",
            Method::POST => "POST",
            Method::PUT => "PUT",
            Method::DELETE => "DELETE",
            Method::HEAD => "HEAD",
            Method::OPTIONS => "OPTIONS",
            Method::PATCH => "PATCH",
            Method::CONNECT => "CONNECT",
            Method::TRACE => "TRACE",
            Method::Extension(s) => s,
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Default for RequestBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl RequestBuilder {
    pub fn new() -> Self {
        Self {
            method: None,
            path: None,
            version: None,
            headers: Vec::new(),
            body: Vec::new(),
        }
    }

    pub fn method(mut self, method: Method) -> Self {
        self.method = Some(method);
        self
    }

    pub fn path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    pub fn version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }

    /// Appends a header. Repeated names are kept as separate entries.
    pub fn header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((key.into(), value.into()));
        self
    }

    pub fn body(mut self, body: Vec<u8>) -> Self {
        self.body = body;
        self
    }

    pub fn build(self) -> Result<Request, &'static str> {
        Ok(Request {
            method: self.method.ok_or("method missing")?,
            path: self.path.ok_or("path missing")?,
            version: self.version.unwrap_or_else(|| "HTTP/1.1".to_string()),
            headers: self.headers,
            body: self.body,
            raw_head: None,
        })
    }
}

impl Request {
    /// Retrieves the first header value with the given name, ignoring case.
    pub fn header(&self, key: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v.as_str())
    }
}
