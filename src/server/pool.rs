//! Hand-off of accepted sockets to processor workers.
//!
//! Each worker owns a one-slot rendezvous. The acceptor stores a socket in
//! an idle worker's slot and moves on; a second assignment to the same slot
//! waits until the worker has picked up the first. Assigning `None` tells
//! the worker to exit.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{Instrument, Span, debug, info, info_span, warn};

use crate::config::PoolConfig;

/// Serves one accepted socket to completion, including closing it.
#[async_trait]
pub trait SocketProcessor: Send + Sync + 'static {
    type Socket: Send + 'static;

    async fn process(&self, socket: Self::Socket) -> anyhow::Result<()>;
}

/// Sending half of a worker slot.
#[derive(Debug)]
pub struct Assigner<S> {
    tx: mpsc::Sender<Option<S>>,
}

impl<S> Clone for Assigner<S> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
        }
    }
}

/// Receiving half of a worker slot.
#[derive(Debug)]
pub struct Awaiter<S> {
    rx: mpsc::Receiver<Option<S>>,
}

/// Creates a worker slot.
pub fn rendezvous<S>() -> (Assigner<S>, Awaiter<S>) {
    let (tx, rx) = mpsc::channel(1);
    (Assigner { tx }, Awaiter { rx })
}

impl<S> Assigner<S> {
    /// Stores `socket` for the worker, waiting while a previous one is
    /// still pending. `None` is the shutdown sentinel. Gives the value back
    /// if the worker is gone.
    pub async fn assign(&self, socket: Option<S>) -> Result<(), Option<S>> {
        self.tx.send(socket).await.map_err(|e| e.0)
    }
}

impl<S> Awaiter<S> {
    /// Waits for the next socket. `None` on the sentinel or once every
    /// assigner is gone.
    pub async fn take(&mut self) -> Option<S> {
        self.rx.recv().await.flatten()
    }
}

struct Shared<P: SocketProcessor> {
    processor: Arc<P>,
    idle: Mutex<Vec<Assigner<P::Socket>>>,
    stopped: AtomicBool,
}

/// Pool of processor workers fed by an acceptor.
pub struct ProcessorPool<P: SocketProcessor> {
    shared: Arc<Shared<P>>,
    workers: Mutex<JoinSet<()>>,
    created: AtomicUsize,
    max: usize,
    shutdown_timeout: Duration,
    span: Span,
}

impl<P: SocketProcessor> ProcessorPool<P> {
    /// Creates the pool and starts `min_processors` workers.
    pub fn new(processor: Arc<P>, cfg: &PoolConfig, span: Span) -> Self {
        let pool = Self {
            shared: Arc::new(Shared {
                processor,
                idle: Mutex::new(Vec::new()),
                stopped: AtomicBool::new(false),
            }),
            workers: Mutex::new(JoinSet::new()),
            created: AtomicUsize::new(0),
            max: cfg.max_processors.max(1),
            shutdown_timeout: cfg.shutdown_timeout(),
            span,
        };
        for _ in 0..cfg.min_processors.min(pool.max) {
            let slot = pool.spawn_worker();
            pool.shared.idle.lock().push(slot);
        }
        pool
    }

    pub fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }

    pub fn idle(&self) -> usize {
        self.shared.idle.lock().len()
    }

    fn spawn_worker(&self) -> Assigner<P::Socket> {
        let id = self.created.fetch_add(1, Ordering::SeqCst);
        let (assigner, awaiter) = rendezvous();
        let span = info_span!(parent: &self.span, "processor", id);
        let shared = Arc::clone(&self.shared);
        self.workers
            .lock()
            .spawn(worker(shared, assigner.clone(), awaiter).instrument(span));
        assigner
    }

    /// Hands `socket` to an idle worker, starting a new one while under the
    /// limit. Gives the socket back when every worker is busy or the pool
    /// is stopped.
    pub async fn dispatch(&self, socket: P::Socket) -> Result<(), P::Socket> {
        if self.shared.stopped.load(Ordering::SeqCst) {
            return Err(socket);
        }
        let slot = self.shared.idle.lock().pop();
        let slot = match slot {
            Some(slot) => slot,
            None if self.created() < self.max => self.spawn_worker(),
            None => return Err(socket),
        };
        match slot.assign(Some(socket)).await {
            Err(Some(socket)) => {
                warn!("Processor vanished before taking socket");
                Err(socket)
            }
            _ => Ok(()),
        }
    }

    /// Stops every worker, waiting a bounded time for busy ones.
    pub async fn shutdown(&self) {
        let idle: Vec<_> = {
            let mut idle = self.shared.idle.lock();
            self.shared.stopped.store(true, Ordering::SeqCst);
            idle.drain(..).collect()
        };
        for slot in idle {
            let _ = slot.assign(None).await;
        }

        let mut workers = std::mem::take(&mut *self.workers.lock());
        let finished = tokio::time::timeout(self.shutdown_timeout, async {
            while workers.join_next().await.is_some() {}
        })
        .await;
        if finished.is_err() {
            warn!(remaining = workers.len(), "Processors still busy at shutdown, aborting");
            workers.abort_all();
        }
        info!("Processor pool stopped");
    }
}

async fn worker<P: SocketProcessor>(
    shared: Arc<Shared<P>>,
    me: Assigner<P::Socket>,
    mut slot: Awaiter<P::Socket>,
) {
    debug!("Processor started");
    while let Some(socket) = slot.take().await {
        if let Err(e) = shared.processor.process(socket).await {
            debug!(error = %e, "Processing failed");
        }
        let mut idle = shared.idle.lock();
        if shared.stopped.load(Ordering::SeqCst) {
            break;
        }
        idle.push(me.clone());
    }
    debug!("Processor stopped");
}

/// Reads and discards whatever the peer still sends, for at most `limit`.
pub async fn drain<R: AsyncRead + Unpin>(reader: &mut R, limit: Duration) -> u64 {
    let mut skipped = 0u64;
    let mut buf = [0u8; 1024];
    let _ = tokio::time::timeout(limit, async {
        loop {
            match reader.read(&mut buf).await {
                Ok(0) | Err(_) => break,
                Ok(n) => skipped += n as u64,
            }
        }
    })
    .await;
    skipped
}
