//! Per-RID handler workers.
//!
//! The connection reader hands each packet to the worker owning its RID
//! through a one-slot channel: a second packet for the same RID waits until
//! the worker has taken the first. Dropping the sending side is the stop
//! signal; the worker then unregisters itself and exits.

use std::io;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{Instrument, Span, debug};

use super::connection::PacketWriter;
use super::packet::Packet;
use super::registry::HandlerRegistry;

/// A state machine driven by the packets of one RID.
#[async_trait]
pub trait Handler: Send + 'static {
    /// Handles one packet. Returns `true` to wait for another packet,
    /// `false` once the exchange is complete.
    ///
    /// `inbox` lets the handler pull further packets itself while it is
    /// busy, e.g. request body data during dispatch.
    async fn process(&mut self, packet: Packet, inbox: &mut Inbox) -> bool;
}

/// Receiving end of a handler's packet slot.
pub struct Inbox {
    rid: u16,
    rx: mpsc::Receiver<Packet>,
    writer: PacketWriter,
}

impl Inbox {
    pub fn rid(&self) -> u16 {
        self.rid
    }

    /// Waits for the next packet. `None` once the handler has been stopped.
    pub async fn recv(&mut self) -> Option<Packet> {
        self.rx.recv().await
    }

    /// Sends `packet` back to the peer on this handler's RID.
    pub async fn send(&self, packet: &Packet) -> io::Result<()> {
        self.writer.send(self.rid, packet).await
    }

    pub fn writer(&self) -> &PacketWriter {
        &self.writer
    }
}

/// Sending end of a handler's packet slot, held by the registry.
#[derive(Debug, Clone)]
pub struct HandlerHandle {
    rid: u16,
    tx: mpsc::Sender<Packet>,
}

impl HandlerHandle {
    pub fn rid(&self) -> u16 {
        self.rid
    }

    /// Hands `packet` to the worker, waiting while the previous one is
    /// still pending. Gives the packet back if the worker is gone.
    pub async fn deliver(&self, packet: Packet) -> Result<(), Packet> {
        self.tx.send(packet).await.map_err(|e| e.0)
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Registers `handler` under `rid` and starts its worker on `tasks`.
///
/// Returns `None` without spawning anything if the RID cannot be registered.
pub fn spawn<H: Handler>(
    rid: u16,
    handler: H,
    registry: &Arc<HandlerRegistry>,
    writer: PacketWriter,
    tasks: &mut JoinSet<()>,
    span: Span,
) -> Option<HandlerHandle> {
    let (tx, rx) = mpsc::channel(1);
    let handle = HandlerHandle { rid, tx };
    let token = registry.insert(rid, handle.clone())?;

    let inbox = Inbox { rid, rx, writer };
    let registry = Arc::clone(registry);
    tasks.spawn(run(handler, inbox, registry, token).instrument(span));

    // finished workers only need their results discarded
    while tasks.try_join_next().is_some() {}

    Some(handle)
}

async fn run<H: Handler>(
    mut handler: H,
    mut inbox: Inbox,
    registry: Arc<HandlerRegistry>,
    token: u64,
) {
    let rid = inbox.rid;
    debug!(rid, "handler started");
    loop {
        let Some(packet) = inbox.recv().await else {
            debug!(rid, "handler stopped");
            break;
        };
        if !handler.process(packet, &mut inbox).await {
            break;
        }
    }
    registry.remove_if(rid, token);
    debug!(rid, "handler finished");
}
