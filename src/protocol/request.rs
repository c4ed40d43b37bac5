//! Per-request handler.
//!
//! Collects METHOD, URI, QUERY_ARG, PROTOCOL, HEADER and VARIABLE packets
//! into a [`RequestContext`]; RUN acknowledges, dispatches, finishes the
//! response and ends the exchange with END.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, error, warn};

use super::body::{WireSink, WireSource};
use super::connection::WireService;
use super::handler::{Handler, Inbox};
use super::packet::Packet;
use super::{types, variables};
use crate::buffer::{InputBuffer, OutputBuffer};
use crate::dispatch::{Exchange, reject_invalid_uri};
use crate::error::PacketError;
use crate::http::request::{Method, RequestContext};
use crate::http::response::StatusCode;
use crate::uri;

pub struct RequestHandler {
    service: Arc<WireService>,
    ctx: RequestContext,
}

impl RequestHandler {
    pub fn new(service: Arc<WireService>) -> Self {
        Self {
            service,
            ctx: RequestContext::default(),
        }
    }

    fn apply(&mut self, packet: &mut Packet) -> Result<(), PacketError> {
        match packet.typ() {
            types::METHOD => self.ctx.method = Method::parse(&packet.read_string()?),
            types::URI => self.ctx.raw_uri = packet.read_string()?,
            types::QUERY_ARG => self.ctx.query_string = Some(packet.read_string()?),
            types::PROTOCOL => self.ctx.protocol = packet.read_string()?,
            types::HEADER => {
                let name = packet.read_string()?;
                let value = packet.read_string()?;
                self.ctx.headers.push((name, value));
            }
            types::VARIABLE => {
                let index = packet.read_u16()?;
                let value = packet.read_string()?;
                if index == variables::SCHEME {
                    self.ctx.secure = value.eq_ignore_ascii_case("https");
                }
                self.ctx.variables.push((index, value));
            }
            typ => debug!(typ, "Ignoring unknown request packet"),
        }
        Ok(())
    }

    async fn run(&mut self, inbox: &mut Inbox) {
        if let Err(e) = inbox.send(&Packet::new(types::ACK)).await {
            warn!(error = %e, "Failed to acknowledge RUN");
            return;
        }

        let mut ctx = std::mem::take(&mut self.ctx);
        let rid = inbox.rid();
        let writer = inbox.writer().clone();
        let charsets = Arc::clone(&self.service.charsets);
        let size = self.service.buffer_size;
        let output = OutputBuffer::with_size(Box::new(WireSink::new(rid, writer)), charsets.clone(), size);

        match uri::prepare(&mut ctx, &self.service.policy) {
            Ok(()) => {
                debug!(method = %ctx.method, uri = %ctx.uri, "Dispatching request");
                let mut input = InputBuffer::with_size(Box::new(WireSource::new(inbox)), charsets, size);
                input.set_encoding(ctx.character_encoding().map(str::to_owned));
                let mut exchange = Exchange::new(ctx, input, output);
                self.dispatch(&mut exchange).await;
                if let Err(e) = exchange.finish().await {
                    debug!(error = %e, "Failed to finish response");
                }
            }
            Err(e) => {
                warn!(uri = %ctx.raw_uri, error = %e, "Rejecting request URI");
                let mut output = output;
                output.head_mut().protocol = ctx.protocol.clone();
                reject_invalid_uri(&mut output).await;
            }
        }

        let mut end = Packet::new(types::END);
        if end.write_string("done").is_ok() {
            if let Err(e) = inbox.send(&end).await {
                debug!(error = %e, "Failed to send END");
            }
        }
    }

    async fn dispatch(&self, exchange: &mut Exchange<'_>) {
        exchange.output.head_mut().protocol = exchange.request.protocol.clone();
        if let Err(e) = self.service.dispatcher.dispatch(exchange).await {
            error!(error = %e, uri = %exchange.request.uri, "Dispatcher failed");
            let out = &mut exchange.output;
            if !out.is_committed() {
                let protocol = out.head().protocol.clone();
                out.recycle();
                out.head_mut().protocol = protocol;
                out.head_mut().status = StatusCode::InternalServerError;
                out.head_mut().add_header("Content-Type", "text/plain");
                let _ = out.write_str("500 Internal Server Error").await;
            }
        }
    }
}

#[async_trait]
impl Handler for RequestHandler {
    async fn process(&mut self, mut packet: Packet, inbox: &mut Inbox) -> bool {
        if packet.typ() == types::RUN {
            self.run(inbox).await;
            return false;
        }
        if let Err(e) = self.apply(&mut packet) {
            warn!(typ = packet.typ(), error = %e, "Malformed request packet");
        }
        true
    }
}
