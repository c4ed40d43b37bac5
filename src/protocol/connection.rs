use std::fmt;
use std::io;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::{BufMut, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio::task::JoinSet;
use tracing::{Instrument, Span, debug, info, info_span, warn};

use super::control::{ConnectionHandler, ControlAction, Deployments};
use super::handler;
use super::packet::Packet;
use super::registry::HandlerRegistry;
use super::request::RequestHandler;
use super::{RID_CONNECTION, RID_DISCONNECT, RID_MAX, RID_MIN, types};
use crate::buffer::CharsetRegistry;
use crate::config::ConnectorConfig;
use crate::dispatch::Dispatcher;
use crate::error::{ConnectorError, ProtocolError};
use crate::server::pool::{SocketProcessor, drain};
use crate::uri::RequestPolicy;

type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Shared, serialized write side of a connection.
#[derive(Clone)]
pub struct PacketWriter {
    inner: Arc<Mutex<BoxedWriter>>,
}

impl fmt::Debug for PacketWriter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PacketWriter").finish_non_exhaustive()
    }
}

impl PacketWriter {
    pub fn new<W: AsyncWrite + Send + Unpin + 'static>(writer: W) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Box::new(writer))),
        }
    }

    /// Writes one frame for `rid`. Frames never interleave.
    pub async fn send(&self, rid: u16, packet: &Packet) -> io::Result<()> {
        let mut frame = BytesMut::with_capacity(2 + super::packet::HEADER_LEN + packet.len());
        frame.put_u16(rid);
        packet.encode(&mut frame);
        let mut w = self.inner.lock().await;
        w.write_all(&frame).await?;
        w.flush().await
    }

    pub async fn shutdown(&self) {
        let mut w = self.inner.lock().await;
        if let Err(e) = w.shutdown().await {
            debug!(error = %e, "Error shutting down writer");
        }
    }
}

/// Collaborators shared by every wire connection of a listener.
pub struct WireService {
    pub dispatcher: Arc<dyn Dispatcher>,
    pub charsets: Arc<CharsetRegistry>,
    pub policy: RequestPolicy,
    pub deployments: Deployments,
    pub server_id: i32,
    pub buffer_size: usize,
    pub stop_timeout: Duration,
}

impl WireService {
    pub fn new(dispatcher: Arc<dyn Dispatcher>, cfg: &ConnectorConfig) -> Self {
        Self {
            dispatcher,
            charsets: Arc::new(CharsetRegistry::new(cfg.default_encoding.clone())),
            policy: cfg.request_policy(),
            deployments: Deployments::default(),
            server_id: cfg.server_id,
            buffer_size: cfg.buffer_size,
            stop_timeout: cfg.handler_stop_timeout(),
        }
    }
}

/// One wire-protocol connection.
///
/// A single reader loop decodes frames and routes them: RID 0 to the
/// control handler, inline, and every other RID to its handler worker.
pub struct Connection<R> {
    reader: R,
    writer: PacketWriter,
    registry: Arc<HandlerRegistry>,
    control: ConnectionHandler,
    tasks: JoinSet<()>,
    next_rid: u16,
    service: Arc<WireService>,
    span: Span,
}

impl<R: AsyncRead + Unpin + Send> Connection<R> {
    pub fn new<W>(reader: R, writer: W, service: Arc<WireService>, span: Span) -> Self
    where
        W: AsyncWrite + Send + Unpin + 'static,
    {
        Self {
            reader,
            writer: PacketWriter::new(writer),
            registry: Arc::new(HandlerRegistry::new()),
            control: ConnectionHandler::new(Arc::clone(&service)),
            tasks: JoinSet::new(),
            next_rid: RID_MIN,
            service,
            span,
        }
    }

    pub fn registry(&self) -> &Arc<HandlerRegistry> {
        &self.registry
    }

    /// Serves the connection until the peer disconnects or breaks the
    /// control protocol, then stops every handler.
    ///
    /// A clean close, or a frame on [`RID_DISCONNECT`], is `Ok`. Control
    /// violations come back as [`ConnectorError::Protocol`] after the FATAL
    /// packet went out; socket failures as [`ConnectorError::Transport`].
    pub async fn run(&mut self) -> Result<(), ConnectorError> {
        let span = self.span.clone();
        let res = self.serve().instrument(span.clone()).await;
        self.stop().instrument(span).await;
        res
    }

    /// Gives back the read side, e.g. to drain it before closing.
    pub fn into_reader(self) -> R {
        self.reader
    }

    async fn serve(&mut self) -> Result<(), ConnectorError> {
        let welcome = self.control.welcome().map_err(ProtocolError::from)?;
        self.writer.send(RID_CONNECTION, &welcome).await?;

        loop {
            let (rid, packet) = match self.read_frame().await {
                Ok(Some(frame)) => frame,
                Ok(None) => {
                    debug!("Peer closed connection");
                    return Ok(());
                }
                Err(e) => {
                    warn!(error = %e, "Connection read failed");
                    return Err(e.into());
                }
            };

            match rid {
                RID_CONNECTION => {
                    if let Err(e) = self.control_packet(packet).await {
                        warn!(error = %e, "Fatal protocol error, closing connection");
                        let mut fatal = Packet::new(types::FATAL);
                        if fatal.write_string(&e.to_string()).is_ok() {
                            let _ = self.writer.send(RID_CONNECTION, &fatal).await;
                        }
                        return Err(e.into());
                    }
                    if self.control.is_closed() {
                        return Ok(());
                    }
                }
                RID_DISCONNECT => {
                    info!("Peer requested disconnect");
                    return Ok(());
                }
                rid => match self.registry.get(rid) {
                    Some(handle) => {
                        if handle.deliver(packet).await.is_err() {
                            debug!(rid, "Dropping packet for finished handler");
                        }
                    }
                    None => warn!(rid, typ = packet.typ(), "Packet for unknown request id"),
                },
            }
        }
    }

    async fn control_packet(&mut self, packet: Packet) -> Result<(), ProtocolError> {
        let reply = match self.control.process(packet)? {
            ControlAction::None => return Ok(()),
            ControlAction::Reply(reply) => reply,
            ControlAction::NewRequest => self.start_request()?,
        };
        if let Err(e) = self.writer.send(RID_CONNECTION, &reply).await {
            warn!(error = %e, "Failed to answer control packet");
        }
        Ok(())
    }

    fn start_request(&mut self) -> Result<Packet, ProtocolError> {
        let Some(rid) = self.allocate_rid() else {
            warn!("Request ids exhausted");
            let mut err = Packet::new(types::ERROR);
            err.write_string(&ProtocolError::RidExhausted.to_string())?;
            return Ok(err);
        };
        let handler = RequestHandler::new(Arc::clone(&self.service));
        let span = info_span!(parent: &self.span, "request", rid);
        handler::spawn(
            rid,
            handler,
            &self.registry,
            self.writer.clone(),
            &mut self.tasks,
            span,
        )
        .ok_or(ProtocolError::RidExhausted)?;

        let mut reply = Packet::new(types::REQUEST_RID);
        reply.write_u16(rid)?;
        Ok(reply)
    }

    /// Next free RID after the last one handed out, wrapping inside the
    /// request range.
    fn allocate_rid(&mut self) -> Option<u16> {
        for _ in RID_MIN..=RID_MAX {
            let rid = self.next_rid;
            self.next_rid = if rid >= RID_MAX { RID_MIN } else { rid + 1 };
            if !self.registry.contains(rid) {
                return Some(rid);
            }
        }
        None
    }

    async fn read_frame(&mut self) -> io::Result<Option<(u16, Packet)>> {
        let mut head = [0u8; 5];
        if self.reader.read(&mut head[..1]).await? == 0 {
            return Ok(None);
        }
        self.reader.read_exact(&mut head[1..]).await?;
        let rid = u16::from_be_bytes([head[0], head[1]]);
        let typ = head[2];
        let len = u16::from_be_bytes([head[3], head[4]]) as usize;
        let mut payload = vec![0u8; len];
        self.reader.read_exact(&mut payload).await?;
        let packet = Packet::from_payload(typ, &payload)?;
        Ok(Some((rid, packet)))
    }

    async fn stop(&mut self) {
        // dropping the handles closes every inbox
        drop(self.registry.drain());
        let tasks = &mut self.tasks;
        let drained = tokio::time::timeout(self.service.stop_timeout, async {
            while tasks.join_next().await.is_some() {}
        })
        .await;
        if drained.is_err() {
            warn!(remaining = self.tasks.len(), "Handlers still busy, aborting");
            self.tasks.abort_all();
        }
        self.writer.shutdown().await;
    }
}

/// Serves wire-protocol peers accepted by the listener.
pub struct WireProcessor {
    service: Arc<WireService>,
    span: Span,
}

impl WireProcessor {
    pub fn new(service: Arc<WireService>, span: Span) -> Self {
        Self { service, span }
    }

    pub fn service(&self) -> &Arc<WireService> {
        &self.service
    }
}

#[async_trait]
impl SocketProcessor for WireProcessor {
    type Socket = TcpStream;

    async fn process(&self, socket: TcpStream) -> anyhow::Result<()> {
        let peer = socket.peer_addr().map(|a| a.to_string()).unwrap_or_default();
        let span = info_span!(parent: &self.span, "wire", %peer);
        let (reader, writer) = socket.into_split();
        let mut conn = Connection::new(reader, writer, Arc::clone(&self.service), span);
        let res = conn.run().await;
        let mut reader = conn.into_reader();
        let skipped = drain(&mut reader, Duration::from_millis(200)).await;
        if skipped > 0 {
            debug!(skipped, "Discarded bytes after close");
        }
        Ok(res?)
    }
}
