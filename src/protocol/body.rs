//! Request and response bodies carried over a handler's RID.

use std::io;

use async_trait::async_trait;
use bytes::BytesMut;
use tracing::debug;

use super::connection::PacketWriter;
use super::handler::Inbox;
use super::packet::{MAX_PAYLOAD, Packet};
use super::types;
use crate::buffer::{BodySink, BodySource};
use crate::http::response::ResponseHead;

/// Sends the response as STATUS, HEADER*, COMMIT, then BODY packets.
pub struct WireSink {
    rid: u16,
    writer: PacketWriter,
}

impl WireSink {
    pub fn new(rid: u16, writer: PacketWriter) -> Self {
        Self { rid, writer }
    }
}

#[async_trait]
impl BodySink for WireSink {
    async fn commit(&mut self, head: &ResponseHead) -> io::Result<()> {
        let mut status = Packet::new(types::STATUS);
        status.write_string(&head.protocol)?;
        status.write_u16(head.status.as_u16())?;
        status.write_string(head.message())?;
        self.writer.send(self.rid, &status).await?;

        let mut header = Packet::new(types::RES_HEADER);
        for (name, value) in head.wire_headers() {
            header.reset(types::RES_HEADER);
            header.write_string(&name)?;
            header.write_string(&value)?;
            self.writer.send(self.rid, &header).await?;
        }

        self.writer.send(self.rid, &Packet::new(types::COMMIT)).await
    }

    async fn write(&mut self, bytes: &[u8]) -> io::Result<()> {
        let mut packet = Packet::new(types::BODY);
        for chunk in bytes.chunks(MAX_PAYLOAD) {
            packet.reset(types::BODY);
            packet.write_bytes(chunk)?;
            self.writer.send(self.rid, &packet).await?;
        }
        Ok(())
    }

    async fn finish(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Pulls the request body from the peer with BODY_READ requests answered
/// by BODY_DATA, until BODY_DONE.
pub struct WireSource<'a> {
    inbox: &'a mut Inbox,
    done: bool,
}

impl<'a> WireSource<'a> {
    pub fn new(inbox: &'a mut Inbox) -> Self {
        Self { inbox, done: false }
    }
}

#[async_trait]
impl BodySource for WireSource<'_> {
    async fn fill(&mut self, dst: &mut BytesMut, max: usize) -> io::Result<usize> {
        if self.done || max == 0 {
            return Ok(0);
        }
        let mut ask = Packet::new(types::BODY_READ);
        ask.write_u16(max.min(u16::MAX as usize) as u16)?;
        self.inbox.send(&ask).await?;

        loop {
            let Some(mut packet) = self.inbox.recv().await else {
                self.done = true;
                return Err(io::Error::new(
                    io::ErrorKind::BrokenPipe,
                    "handler stopped while reading body",
                ));
            };
            match packet.typ() {
                types::BODY_DATA => {
                    let data = packet.read_remaining();
                    if data.is_empty() {
                        self.done = true;
                    }
                    dst.extend_from_slice(data);
                    return Ok(data.len());
                }
                types::BODY_DONE => {
                    self.done = true;
                    return Ok(0);
                }
                typ => debug!(typ, "Ignoring packet while reading body"),
            }
        }
    }
}
