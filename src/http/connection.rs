use std::io;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::{Buf, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{Instrument, Span, debug, error, info_span, warn};

use crate::buffer::{BodySource, CharsetRegistry, InputBuffer, OutputBuffer};
use crate::config::ConnectorConfig;
use crate::dispatch::{Dispatcher, Exchange, reject_invalid_uri};
use crate::http::parser::{ParseError, parse_request_head};
use crate::http::request::RequestContext;
use crate::http::response::{ResponseHead, StatusCode};
use crate::http::writer::{HttpSink, serialize_head};
use crate::server::pool::{SocketProcessor, drain};
use crate::uri::{self, RequestPolicy};

/// How long a closing connection keeps reading what the client still sends.
const LINGER: Duration = Duration::from_millis(200);

/// Serves HTTP/1.x clients, one keep-alive connection per socket.
pub struct HttpProcessor {
    dispatcher: Arc<dyn Dispatcher>,
    charsets: Arc<CharsetRegistry>,
    policy: RequestPolicy,
    buffer_size: usize,
    span: Span,
}

impl HttpProcessor {
    pub fn new(dispatcher: Arc<dyn Dispatcher>, cfg: &ConnectorConfig, span: Span) -> Self {
        Self {
            dispatcher,
            charsets: Arc::new(CharsetRegistry::new(cfg.default_encoding.clone())),
            policy: cfg.request_policy(),
            buffer_size: cfg.buffer_size,
            span,
        }
    }

    /// Runs the request/response loop over any byte stream until the client
    /// closes or asks to.
    pub async fn serve<S>(&self, stream: S) -> anyhow::Result<()>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send,
    {
        let (mut reader, mut writer) = tokio::io::split(stream);
        let mut buffer = BytesMut::with_capacity(4096);

        loop {
            let request = match read_request(&mut reader, &mut buffer).await {
                Ok(Some(request)) => request,
                Ok(None) => break,
                Err(ReadError::Parse(e)) => {
                    warn!(error = %e, "Malformed request");
                    bad_request(&mut writer).await;
                    break;
                }
                Err(ReadError::Io(e)) => {
                    debug!(error = %e, "Connection read failed");
                    break;
                }
            };

            if !self.exchange(request, &mut reader, &mut writer, &mut buffer).await? {
                break;
            }
        }

        drain(&mut reader, LINGER).await;
        if let Err(e) = writer.shutdown().await {
            debug!(error = %e, "Error shutting down connection");
        }
        Ok(())
    }

    /// Runs one exchange. Returns whether the connection stays open.
    async fn exchange<R, W>(
        &self,
        mut request: RequestContext,
        reader: &mut R,
        writer: &mut W,
        buffer: &mut BytesMut,
    ) -> anyhow::Result<bool>
    where
        R: AsyncRead + Unpin + Send,
        W: AsyncWrite + Unpin + Send,
    {
        let keep_alive = request.keep_alive();
        let length = request.content_length().unwrap_or(0);
        let source = HttpSource {
            reader,
            pending: buffer,
            remaining: length,
        };
        let mut input = InputBuffer::with_size(Box::new(source), Arc::clone(&self.charsets), self.buffer_size);
        let mut output = OutputBuffer::with_size(
            Box::new(HttpSink::new(writer, keep_alive)),
            Arc::clone(&self.charsets),
            self.buffer_size,
        );
        output.head_mut().protocol = request.protocol.clone();

        if let Err(e) = uri::prepare(&mut request, &self.policy) {
            warn!(uri = %request.raw_uri, error = %e, "Rejecting request URI");
            reject_invalid_uri(&mut output).await;
            input.close().await?;
            return Ok(keep_alive && !output.is_failed());
        }

        debug!(method = %request.method, uri = %request.uri, "Dispatching request");
        input.set_encoding(request.character_encoding().map(str::to_owned));
        let mut exchange = Exchange::new(request, input, output);
        if let Err(e) = self.dispatcher.dispatch(&mut exchange).await {
            error!(error = %e, uri = %exchange.request.uri, "Dispatcher failed");
            let out = &mut exchange.output;
            if !out.is_committed() {
                let protocol = out.head().protocol.clone();
                out.recycle();
                out.head_mut().protocol = protocol;
                out.head_mut().status = StatusCode::InternalServerError;
                out.head_mut().add_header("Content-Type", "text/plain");
                out.write_str("500 Internal Server Error").await?;
            }
        }
        exchange.finish().await?;

        let head = exchange.output.head();
        let delimited = head.content_length.is_some() || head.protocol.eq_ignore_ascii_case("HTTP/1.1");
        Ok(keep_alive && delimited && !exchange.output.is_failed())
    }
}

#[async_trait]
impl SocketProcessor for HttpProcessor {
    type Socket = TcpStream;

    async fn process(&self, socket: TcpStream) -> anyhow::Result<()> {
        let peer = socket.peer_addr().map(|a| a.to_string()).unwrap_or_default();
        let span = info_span!(parent: &self.span, "http", %peer);
        self.serve(socket).instrument(span).await
    }
}

enum ReadError {
    Parse(ParseError),
    Io(io::Error),
}

async fn read_request<R: AsyncRead + Unpin>(
    reader: &mut R,
    buffer: &mut BytesMut,
) -> Result<Option<RequestContext>, ReadError> {
    loop {
        // Try parsing whatever we already have
        match parse_request_head(&buffer[..]) {
            Ok(Some((request, consumed))) => {
                buffer.advance(consumed);
                return Ok(Some(request));
            }
            Ok(None) => {}
            Err(e) => return Err(ReadError::Parse(e)),
        }

        let n = reader.read_buf(&mut *buffer).await.map_err(ReadError::Io)?;
        if n == 0 {
            // Client closed connection
            return Ok(None);
        }
    }
}

async fn bad_request<W: AsyncWrite + Unpin>(writer: &mut W) {
    let mut head = ResponseHead::new();
    head.status = StatusCode::BadRequest;
    head.content_length = Some(0);
    if let Err(e) = writer.write_all(&serialize_head(&head, false, false)).await {
        debug!(error = %e, "Failed to answer malformed request");
    }
}

/// Request body read through the connection, bounded by Content-Length.
/// Bytes the client pipelined after the head are taken first.
struct HttpSource<'a, R> {
    reader: &'a mut R,
    pending: &'a mut BytesMut,
    remaining: u64,
}

#[async_trait]
impl<R: AsyncRead + Unpin + Send> BodySource for HttpSource<'_, R> {
    async fn fill(&mut self, dst: &mut BytesMut, max: usize) -> io::Result<usize> {
        let want = max.min(usize::try_from(self.remaining).unwrap_or(usize::MAX));
        if want == 0 {
            return Ok(0);
        }
        if self.pending.is_empty() {
            let n = self.reader.read_buf(&mut *self.pending).await?;
            if n == 0 {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "client closed before end of body",
                ));
            }
        }
        let n = want.min(self.pending.len());
        dst.extend_from_slice(&self.pending.split_to(n));
        self.remaining -= n as u64;
        Ok(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::{Outcome, Pipeline, Stage};

    struct Echo;

    #[async_trait]
    impl Stage for Echo {
        async fn invoke(&self, exchange: &mut Exchange<'_>) -> anyhow::Result<Outcome> {
            let mut body = String::new();
            exchange.input.read_to_string(&mut body).await?;
            exchange.output.head_mut().add_header("Content-Type", "text/plain");
            exchange.output.write_str(&format!("{}:{}", exchange.request.uri, body)).await?;
            Ok(Outcome::Handled)
        }
    }

    fn processor() -> HttpProcessor {
        let pipeline = Pipeline::new().stage(Echo);
        HttpProcessor::new(Arc::new(pipeline), &ConnectorConfig::default(), Span::none())
    }

    async fn round_trip(input: &[u8]) -> String {
        let (mut client, server) = tokio::io::duplex(64 * 1024);
        let p = processor();
        let task = tokio::spawn(async move { p.serve(server).await });
        client.write_all(input).await.unwrap();
        client.shutdown().await.unwrap();
        let mut out = Vec::new();
        client.read_to_end(&mut out).await.unwrap();
        task.await.unwrap().unwrap();
        String::from_utf8(out).unwrap()
    }

    #[tokio::test]
    async fn keep_alive_serves_pipelined_requests() {
        let out = round_trip(
            b"POST /a/./b HTTP/1.1\r\nContent-Length: 3\r\n\r\nxyz\
              GET /c HTTP/1.1\r\nConnection: close\r\n\r\n",
        )
        .await;

        assert_eq!(out.matches("HTTP/1.1 200 OK").count(), 2);
        assert!(out.contains("Content-Length: 8\r\n\r\n/a/b:xyz"));
        assert!(out.contains("Connection: close\r\n"));
        assert!(out.ends_with("/c:"));
    }

    #[tokio::test]
    async fn invalid_uri_is_rejected() {
        let out = round_trip(b"GET /../etc/passwd HTTP/1.1\r\nConnection: close\r\n\r\n").await;

        assert!(out.starts_with("HTTP/1.1 400 Invalid URI\r\n"));
        assert!(out.ends_with("Invalid URI"));
    }

    #[tokio::test]
    async fn malformed_head_is_bad_request() {
        let out = round_trip(b"NONSENSE\r\n\r\n").await;
        assert!(out.starts_with("HTTP/1.1 400 Bad Request\r\n"));
    }
}
