use thiserror::Error;

use crate::http::request::{Method, RequestContext};

/// Largest request head accepted before the request is refused.
pub const MAX_HEAD_SIZE: usize = 64 * 1024;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("malformed request line")]
    InvalidRequest,
    #[error("malformed header line")]
    InvalidHeader,
    #[error("invalid Content-Length")]
    InvalidContentLength,
    #[error("unsupported transfer coding")]
    UnsupportedTransferEncoding,
    #[error("request head too large")]
    HeadTooLarge,
}

/// Parses the request line and headers at the front of `buf`.
///
/// Returns `Ok(None)` while the blank line ending the head has not arrived,
/// otherwise the request and the number of head bytes consumed. The body
/// is left in the buffer.
pub fn parse_request_head(buf: &[u8]) -> Result<Option<(RequestContext, usize)>, ParseError> {
    // Look for header/body separator
    let Some(headers_end) = find_headers_end(buf) else {
        if buf.len() > MAX_HEAD_SIZE {
            return Err(ParseError::HeadTooLarge);
        }
        return Ok(None);
    };
    let header_bytes = &buf[..headers_end];

    let headers_str = std::str::from_utf8(header_bytes).map_err(|_| ParseError::InvalidRequest)?;

    let mut lines = headers_str.split("\r\n");

    // Request line
    let request_line = lines.next().ok_or(ParseError::InvalidRequest)?;
    let mut parts = request_line.split_whitespace();

    let method = parts.next().ok_or(ParseError::InvalidRequest)?;
    let target = parts.next().ok_or(ParseError::InvalidRequest)?;
    let version = parts.next().ok_or(ParseError::InvalidRequest)?;
    if parts.next().is_some() || !version.starts_with("HTTP/") {
        return Err(ParseError::InvalidRequest);
    }

    let (path, query) = match target.split_once('?') {
        Some((p, q)) => (p, Some(q.to_string())),
        None => (target, None),
    };

    // Headers
    let mut headers = Vec::new();
    for line in lines {
        if line.is_empty() {
            continue;
        }
        let (key, value) = line.split_once(':').ok_or(ParseError::InvalidHeader)?;
        if key.is_empty() || key.contains(char::is_whitespace) {
            return Err(ParseError::InvalidHeader);
        }
        headers.push((key.to_string(), value.trim().to_string()));
    }

    let request = RequestContext {
        method: Method::parse(method),
        raw_uri: path.to_string(),
        query_string: query,
        protocol: version.to_string(),
        headers,
        ..RequestContext::default()
    };

    if request.header("Transfer-Encoding").is_some() {
        return Err(ParseError::UnsupportedTransferEncoding);
    }
    if request.header("Content-Length").is_some() && request.content_length().is_none() {
        return Err(ParseError::InvalidContentLength);
    }

    Ok(Some((request, headers_end + 4)))
}

fn find_headers_end(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_simple_get() {
        let req = b"GET /search?q=rust HTTP/1.1\r\nHost: example.com\r\n\r\nBODY";

        let (parsed, consumed) = parse_request_head(req).unwrap().unwrap();

        assert_eq!(parsed.raw_uri, "/search");
        assert_eq!(parsed.query_string.as_deref(), Some("q=rust"));
        assert_eq!(parsed.header("host"), Some("example.com"));
        assert_eq!(&req[consumed..], b"BODY");
    }
}
