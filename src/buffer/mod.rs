//! Byte/character transfer buffers.
//!
//! [`OutputBuffer`] collects response bytes and characters and ships them to
//! a [`BodySink`]; [`InputBuffer`] pulls request bytes from a [`BodySource`]
//! and exposes them as bytes or decoded characters.
//!
//! A buffer is either idle, in byte mode or in character mode. Switching
//! mode first moves the other representation's pending data across, so
//! byte and character operations keep their relative order. Characters are
//! converted only when they have to meet bytes.

use std::io;

use async_trait::async_trait;
use bytes::BytesMut;

use crate::http::response::ResponseHead;

pub mod charset;
pub mod input;
pub mod output;

pub use charset::CharsetRegistry;
pub use input::InputBuffer;
pub use output::OutputBuffer;

/// Default chunk size for both directions.
pub const DEFAULT_BUFFER_SIZE: usize = 8192;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Initial,
    Byte,
    Char,
}

/// Where response bytes go.
#[async_trait]
pub trait BodySink: Send {
    /// Sends the status line and headers. Called once, before any body.
    async fn commit(&mut self, head: &ResponseHead) -> io::Result<()>;

    async fn write(&mut self, bytes: &[u8]) -> io::Result<()>;

    /// Ends the body.
    async fn finish(&mut self) -> io::Result<()>;
}

/// Where request bytes come from.
#[async_trait]
pub trait BodySource: Send {
    /// Appends at most `max` bytes to `dst`. Returns 0 at end of body.
    async fn fill(&mut self, dst: &mut BytesMut, max: usize) -> io::Result<usize>;
}

/// A body already held in memory.
#[derive(Debug, Default)]
pub struct MemorySource {
    data: bytes::Bytes,
}

impl MemorySource {
    pub fn new(data: impl Into<bytes::Bytes>) -> Self {
        Self { data: data.into() }
    }
}

#[async_trait]
impl BodySource for MemorySource {
    async fn fill(&mut self, dst: &mut BytesMut, max: usize) -> io::Result<usize> {
        let n = max.min(self.data.len());
        dst.extend_from_slice(&self.data.split_to(n));
        Ok(n)
    }
}

/// Collects a response in memory.
#[derive(Debug, Default, Clone)]
pub struct MemorySink {
    pub head: Option<ResponseHead>,
    pub body: Vec<u8>,
    /// Size of every `write` call, in order.
    pub writes: Vec<usize>,
    pub finished: bool,
}

#[async_trait]
impl BodySink for MemorySink {
    async fn commit(&mut self, head: &ResponseHead) -> io::Result<()> {
        self.head = Some(head.clone());
        Ok(())
    }

    async fn write(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.writes.push(bytes.len());
        self.body.extend_from_slice(bytes);
        Ok(())
    }

    async fn finish(&mut self) -> io::Result<()> {
        self.finished = true;
        Ok(())
    }
}

#[async_trait]
impl<T: BodySink + ?Sized> BodySink for &mut T {
    async fn commit(&mut self, head: &ResponseHead) -> io::Result<()> {
        (**self).commit(head).await
    }

    async fn write(&mut self, bytes: &[u8]) -> io::Result<()> {
        (**self).write(bytes).await
    }

    async fn finish(&mut self) -> io::Result<()> {
        (**self).finish().await
    }
}
