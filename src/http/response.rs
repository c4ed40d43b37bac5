use crate::buffer::charset::charset_of;

/// HTTP status codes used by the connector.
///
/// Codes produced by the dispatcher that have no named variant travel as
/// [`StatusCode::Other`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusCode {
    /// 200 OK
    Ok,
    /// 204 No Content
    NoContent,
    /// 400 Bad Request
    BadRequest,
    /// 404 Not Found
    NotFound,
    /// 500 Internal Server Error
    InternalServerError,
    /// Any other code
    Other(u16),
}

impl StatusCode {
    /// Returns the numeric HTTP status code.
    ///
    /// # Example
    ///
    /// ```
    /// # use coupler::http::response::StatusCode;
    /// assert_eq!(StatusCode::Ok.as_u16(), 200);
    /// assert_eq!(StatusCode::Other(302).as_u16(), 302);
    /// ```
    pub fn as_u16(&self) -> u16 {
        match self {
            StatusCode::Ok => 200,
            StatusCode::NoContent => 204,
            StatusCode::BadRequest => 400,
            StatusCode::NotFound => 404,
            StatusCode::InternalServerError => 500,
            StatusCode::Other(code) => *code,
        }
    }

    pub fn from_u16(code: u16) -> Self {
        match code {
            200 => StatusCode::Ok,
            204 => StatusCode::NoContent,
            400 => StatusCode::BadRequest,
            404 => StatusCode::NotFound,
            500 => StatusCode::InternalServerError,
            other => StatusCode::Other(other),
        }
    }

    /// Returns the standard reason phrase, or `"Unknown"`.
    pub fn reason_phrase(&self) -> &'static str {
        match self.as_u16() {
            200 => "OK",
            201 => "Created",
            204 => "No Content",
            301 => "Moved Permanently",
            302 => "Found",
            304 => "Not Modified",
            400 => "Bad Request",
            401 => "Unauthorized",
            403 => "Forbidden",
            404 => "Not Found",
            405 => "Method Not Allowed",
            500 => "Internal Server Error",
            503 => "Service Unavailable",
            _ => "Unknown",
        }
    }
}

/// Status line and headers of a response, committed once before the body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseHead {
    pub protocol: String,
    pub status: StatusCode,
    /// Reason phrase override.
    pub message: Option<String>,
    pub headers: Vec<(String, String)>,
    pub content_length: Option<u64>,
    pub content_type: Option<String>,
    /// Explicitly set encoding; otherwise taken from the content type.
    pub character_encoding: Option<String>,
    pub committed: bool,
}

impl Default for ResponseHead {
    fn default() -> Self {
        Self {
            protocol: "HTTP/1.1".to_string(),
            status: StatusCode::Ok,
            message: None,
            headers: Vec::new(),
            content_length: None,
            content_type: None,
            character_encoding: None,
            committed: false,
        }
    }
}

impl ResponseHead {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn message(&self) -> &str {
        self.message
            .as_deref()
            .unwrap_or_else(|| self.status.reason_phrase())
    }

    /// Appends a header. Content-Type and Content-Length are kept in their
    /// own fields.
    pub fn add_header(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();
        if name.eq_ignore_ascii_case("Content-Type") {
            self.content_type = Some(value);
        } else if name.eq_ignore_ascii_case("Content-Length") {
            self.content_length = value.trim().parse().ok();
        } else {
            self.headers.push((name, value));
        }
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// The encoding used for character output, if any was declared.
    pub fn declared_encoding(&self) -> Option<&str> {
        self.character_encoding
            .as_deref()
            .or_else(|| self.content_type.as_deref().and_then(charset_of))
    }

    /// Every header that goes on the wire, derived fields included.
    pub fn wire_headers(&self) -> Vec<(String, String)> {
        let mut out = self.headers.clone();
        if let Some(ct) = &self.content_type {
            let value = match (&self.character_encoding, charset_of(ct)) {
                (Some(enc), None) => format!("{ct};charset={enc}"),
                _ => ct.clone(),
            };
            out.push(("Content-Type".to_string(), value));
        }
        if let Some(len) = self.content_length {
            out.push(("Content-Length".to_string(), len.to_string()));
        }
        out
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}
