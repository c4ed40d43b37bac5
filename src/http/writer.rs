use std::io;

use async_trait::async_trait;
use tokio::io::{AsyncWrite, AsyncWriteExt};

use crate::buffer::BodySink;
use crate::http::response::ResponseHead;

const HTTP_VERSION: &str = "HTTP/1.1";

/// Serializes the status line and headers, blank line included.
///
/// `chunked` adds `Transfer-Encoding: chunked`; `keep_alive == false` adds
/// `Connection: close`.
pub fn serialize_head(head: &ResponseHead, chunked: bool, keep_alive: bool) -> Vec<u8> {
    let mut buf = Vec::new();

    // Status line
    let version = if head.protocol.is_empty() {
        HTTP_VERSION
    } else {
        head.protocol.as_str()
    };
    let status_line = format!("{} {} {}\r\n", version, head.status.as_u16(), head.message());
    buf.extend_from_slice(status_line.as_bytes());

    // Headers
    let mut headers = head.wire_headers();
    if chunked {
        headers.push(("Transfer-Encoding".to_string(), "chunked".to_string()));
    }
    if !keep_alive {
        headers.push(("Connection".to_string(), "close".to_string()));
    }
    for (k, v) in &headers {
        buf.extend_from_slice(k.as_bytes());
        buf.extend_from_slice(b": ");
        buf.extend_from_slice(v.as_bytes());
        buf.extend_from_slice(b"\r\n");
    }

    // Header/body separator
    buf.extend_from_slice(b"\r\n");

    buf
}

/// Writes a response straight to an HTTP/1.x client.
///
/// A response without a known length is sent chunked to HTTP/1.1 clients
/// and close-delimited to older ones.
pub struct HttpSink<'a, W> {
    stream: &'a mut W,
    keep_alive: bool,
    chunked: bool,
}

impl<'a, W: AsyncWrite + Unpin + Send> HttpSink<'a, W> {
    pub fn new(stream: &'a mut W, keep_alive: bool) -> Self {
        Self {
            stream,
            keep_alive,
            chunked: false,
        }
    }
}

#[async_trait]
impl<W: AsyncWrite + Unpin + Send> BodySink for HttpSink<'_, W> {
    async fn commit(&mut self, head: &ResponseHead) -> io::Result<()> {
        let http11 = head.protocol.is_empty() || head.protocol.eq_ignore_ascii_case(HTTP_VERSION);
        self.chunked = head.content_length.is_none() && http11;
        if head.content_length.is_none() && !http11 {
            self.keep_alive = false;
        }
        let buf = serialize_head(head, self.chunked, self.keep_alive);
        self.stream.write_all(&buf).await
    }

    async fn write(&mut self, bytes: &[u8]) -> io::Result<()> {
        if bytes.is_empty() {
            return Ok(());
        }
        if self.chunked {
            self.stream
                .write_all(format!("{:x}\r\n", bytes.len()).as_bytes())
                .await?;
            self.stream.write_all(bytes).await?;
            self.stream.write_all(b"\r\n").await
        } else {
            self.stream.write_all(bytes).await
        }
    }

    async fn finish(&mut self) -> io::Result<()> {
        if self.chunked {
            self.stream.write_all(b"0\r\n\r\n").await?;
        }
        self.stream.flush().await
    }
}
