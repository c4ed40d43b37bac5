use std::fmt;

use crate::buffer::charset::charset_of;
use crate::uri::SessionSource;

/// HTTP request methods.
///
/// Methods the connector has no special knowledge of are carried verbatim
/// as [`Method::Extension`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Method {
    GET,
    POST,
    PUT,
    DELETE,
    HEAD,
    OPTIONS,
    PATCH,
    Extension(String),
}

impl Method {
    /// Parses a method name. Matching is case-sensitive.
    ///
    /// ```
    /// # use coupler::http::request::Method;
    /// assert_eq!(Method::parse("GET"), Method::GET);
    /// assert_eq!(Method::parse("get"), Method::Extension("get".into()));
    /// ```
    pub fn parse(s: &str) -> Self {
        match s {
            "GET" => Method::GET,
            "POST" => Method::POST,
            "PUT" => Method::PUT,
            "DELETE" => Method::DELETE,
            "HEAD" => Method::HEAD,
            "OPTIONS" => Method::OPTIONS,
            "PATCH" => Method::PATCH,
            other => Method::Extension(other.to_string()),
        }
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
            Method::Extension(s) => s,
        }
    }
}

impl From<&str> for Method {
    fn from(s: &str) -> Self {
        Method::parse(s)
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Everything known about a request when it is handed to the dispatcher.
///
/// Front ends fill the raw fields; [`crate::uri::prepare`] derives the
/// decoded URI and the session fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestContext {
    pub method: Method,
    /// Request path as received, without the query string.
    pub raw_uri: String,
    /// Decoded and normalized path.
    pub uri: String,
    pub query_string: Option<String>,
    pub protocol: String,
    /// Headers in arrival order; names may repeat.
    pub headers: Vec<(String, String)>,
    /// Opaque front-end variables keyed by index.
    pub variables: Vec<(u16, String)>,
    pub session_id: Option<String>,
    pub session_source: SessionSource,
    pub secure: bool,
}

impl Default for RequestContext {
    fn default() -> Self {
        Self {
            method: Method::GET,
            raw_uri: String::new(),
            uri: String::new(),
            query_string: None,
            protocol: "HTTP/1.1".to_string(),
            headers: Vec::new(),
            variables: Vec::new(),
            session_id: None,
            session_source: SessionSource::None,
            secure: false,
        }
    }
}

impl RequestContext {
    /// Returns the first header named `key`, compared case-insensitively.
    pub fn header(&self, key: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v.as_str())
    }

    /// Every value of header `key`, in arrival order.
    pub fn headers_named<'a, 'k>(&'a self, key: &'k str) -> impl Iterator<Item = &'a str> + use<'a, 'k> {
        self.headers
            .iter()
            .filter(move |(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v.as_str())
    }

    pub fn variable(&self, index: u16) -> Option<&str> {
        self.variables
            .iter()
            .find(|(i, _)| *i == index)
            .map(|(_, v)| v.as_str())
    }

    /// Parsed Content-Length, `None` when missing or not a number.
    pub fn content_length(&self) -> Option<u64> {
        self.header("Content-Length").and_then(|v| v.trim().parse().ok())
    }

    /// Encoding declared by the Content-Type charset parameter.
    pub fn character_encoding(&self) -> Option<&str> {
        self.header("Content-Type").and_then(charset_of)
    }

    /// Decoded `name=value` pairs of the query string.
    pub fn query_pairs(&self) -> Vec<(String, String)> {
        match &self.query_string {
            Some(q) => url::form_urlencoded::parse(q.as_bytes()).into_owned().collect(),
            None => Vec::new(),
        }
    }

    /// Whether the connection should stay open after the response.
    ///
    /// HTTP/1.1 defaults to keep-alive, HTTP/1.0 to close.
    pub fn keep_alive(&self) -> bool {
        match self.header("Connection") {
            Some(v) if v.eq_ignore_ascii_case("close") => false,
            Some(v) if v.eq_ignore_ascii_case("keep-alive") => true,
            _ => self.protocol.eq_ignore_ascii_case("HTTP/1.1"),
        }
    }

    pub fn recycle(&mut self) {
        *self = Self::default();
    }
}

/// Builder for constructing [`RequestContext`] objects.
#[derive(Default)]
pub struct RequestBuilder {
    method: Option<Method>,
    uri: Option<String>,
    query: Option<String>,
    protocol: Option<String>,
    headers: Vec<(String, String)>,
    secure: bool,
}

impl RequestBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn method(mut self, method: impl Into<Method>) -> Self {
        self.method = Some(method.into());
        self
    }

    pub fn uri(mut self, uri: impl Into<String>) -> Self {
        self.uri = Some(uri.into());
        self
    }

    pub fn query(mut self, query: impl Into<String>) -> Self {
        self.query = Some(query.into());
        self
    }

    pub fn protocol(mut self, protocol: impl Into<String>) -> Self {
        self.protocol = Some(protocol.into());
        self
    }

    pub fn header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((key.into(), value.into()));
        self
    }

    pub fn secure(mut self, secure: bool) -> Self {
        self.secure = secure;
        self
    }

    pub fn build(self) -> Result<RequestContext, &'static str> {
        Ok(RequestContext {
            method: self.method.ok_or("method missing")?,
            raw_uri: self.uri.ok_or("uri missing")?,
            query_string: self.query,
            protocol: self.protocol.unwrap_or_else(|| "HTTP/1.1".to_string()),
            headers: self.headers,
            secure: self.secure,
            ..RequestContext::default()
        })
    }
}
