use std::collections::HashMap;
use std::io;
use std::sync::Arc;

use bytes::BytesMut;
use encoding_rs::{EncoderResult, Encoding};
use tracing::debug;

use super::{BodySink, CharsetRegistry, DEFAULT_BUFFER_SIZE, State};
use crate::http::response::ResponseHead;

/// Response-side transfer buffer.
///
/// Bytes leave for the sink whenever a full chunk has accumulated, and on
/// [`flush`](Self::flush) or [`close`](Self::close). Writes after `close`
/// or while suspended are dropped without error.
pub struct OutputBuffer<'a> {
    sink: Box<dyn BodySink + 'a>,
    charsets: Arc<CharsetRegistry>,
    head: ResponseHead,
    bytes: BytesMut,
    chars: String,
    state: State,
    size: usize,
    encoders: HashMap<String, &'static Encoding>,
    encoder: Option<&'static Encoding>,
    bytes_written: u64,
    chars_written: u64,
    closed: bool,
    suspended: bool,
    failed: bool,
    pin_length: bool,
}

impl<'a> OutputBuffer<'a> {
    pub fn new(sink: Box<dyn BodySink + 'a>, charsets: Arc<CharsetRegistry>) -> Self {
        Self::with_size(sink, charsets, DEFAULT_BUFFER_SIZE)
    }

    pub fn with_size(sink: Box<dyn BodySink + 'a>, charsets: Arc<CharsetRegistry>, size: usize) -> Self {
        Self {
            sink,
            charsets,
            head: ResponseHead::new(),
            bytes: BytesMut::with_capacity(size),
            chars: String::new(),
            state: State::Initial,
            size: size.max(1),
            encoders: HashMap::new(),
            encoder: None,
            bytes_written: 0,
            chars_written: 0,
            closed: false,
            suspended: false,
            failed: false,
            pin_length: true,
        }
    }

    pub fn head(&self) -> &ResponseHead {
        &self.head
    }

    /// Status and headers can change until the response is committed.
    pub fn head_mut(&mut self) -> &mut ResponseHead {
        &mut self.head
    }

    pub fn state(&self) -> State {
        self.state
    }

    pub fn is_committed(&self) -> bool {
        self.head.committed
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Whether the sink has failed; later writes are dropped.
    pub fn is_failed(&self) -> bool {
        self.failed
    }

    pub fn set_suspended(&mut self, suspended: bool) {
        self.suspended = suspended;
    }

    pub fn is_suspended(&self) -> bool {
        self.suspended
    }

    /// Whether `close` on an uncommitted response fixes Content-Length to
    /// the buffered body size. On by default.
    pub fn set_pin_content_length(&mut self, pin: bool) {
        self.pin_length = pin;
    }

    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    pub fn chars_written(&self) -> u64 {
        self.chars_written
    }

    /// Bytes and characters waiting to be sent.
    pub fn buffered(&self) -> usize {
        self.bytes.len() + self.chars.len()
    }

    fn dropping(&self) -> bool {
        self.closed || self.suspended || self.failed
    }

    pub async fn write_bytes(&mut self, data: &[u8]) -> io::Result<()> {
        if self.dropping() {
            return Ok(());
        }
        if self.state == State::Char {
            self.convert_chars()?;
        }
        self.state = State::Byte;
        self.bytes_written += data.len() as u64;

        let mut rest = data;
        while !rest.is_empty() {
            let room = self.size - self.bytes.len();
            let n = room.min(rest.len());
            self.bytes.extend_from_slice(&rest[..n]);
            rest = &rest[n..];
            if self.bytes.len() >= self.size {
                self.flush_bytes().await?;
            }
        }
        Ok(())
    }

    pub async fn write_str(&mut self, s: &str) -> io::Result<()> {
        if self.dropping() {
            return Ok(());
        }
        if self.encoder.is_none() {
            self.setup_encoder()?;
        }
        // pending bytes are already ahead of any new characters
        self.state = State::Char;
        self.chars_written += s.chars().count() as u64;
        self.chars.push_str(s);
        if self.chars.len() >= self.size {
            self.convert_chars()?;
            while self.bytes.len() >= self.size {
                self.flush_bytes().await?;
            }
        }
        Ok(())
    }

    pub async fn write_char(&mut self, c: char) -> io::Result<()> {
        let mut tmp = [0u8; 4];
        self.write_str(c.encode_utf8(&mut tmp)).await
    }

    /// Sends everything buffered, committing the response if needed.
    pub async fn flush(&mut self) -> io::Result<()> {
        if self.failed {
            return Ok(());
        }
        self.convert_chars()?;
        self.flush_bytes().await
    }

    /// Flushes and ends the body. Safe to call more than once.
    pub async fn close(&mut self) -> io::Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        if self.failed {
            return Ok(());
        }
        self.convert_chars()?;
        if self.pin_length && !self.head.committed && self.head.content_length.is_none() {
            self.head.content_length = Some(self.bytes.len() as u64);
        }
        self.flush_bytes().await?;
        let res = self.sink.finish().await;
        self.check(res)
    }

    /// Resets the buffer for the next exchange, keeping the sink.
    pub fn recycle(&mut self) {
        self.head.reset();
        self.bytes.clear();
        self.chars.clear();
        self.state = State::Initial;
        self.encoder = None;
        self.bytes_written = 0;
        self.chars_written = 0;
        self.closed = false;
        self.suspended = false;
        self.failed = false;
        self.pin_length = true;
    }

    /// Recycles and attaches a new sink.
    pub fn reset_sink(&mut self, sink: Box<dyn BodySink + 'a>) {
        self.recycle();
        self.sink = sink;
    }

    fn setup_encoder(&mut self) -> io::Result<()> {
        let name = self
            .head
            .declared_encoding()
            .unwrap_or(self.charsets.default_name())
            .to_ascii_lowercase();
        let enc = match self.encoders.get(&name) {
            Some(enc) => *enc,
            None => {
                let enc = self.charsets.resolve(Some(&name))?;
                self.encoders.insert(name, enc);
                enc
            }
        };
        self.encoder = Some(enc);
        Ok(())
    }

    fn convert_chars(&mut self) -> io::Result<()> {
        if self.chars.is_empty() {
            return Ok(());
        }
        if self.encoder.is_none() {
            self.setup_encoder()?;
        }
        if let Some(enc) = self.encoder {
            encode_into(enc, &self.chars, &mut self.bytes);
        }
        self.chars.clear();
        Ok(())
    }

    async fn flush_bytes(&mut self) -> io::Result<()> {
        if !self.head.committed {
            let res = self.sink.commit(&self.head).await;
            self.check(res)?;
            self.head.committed = true;
        }
        if self.bytes.is_empty() {
            return Ok(());
        }
        let chunk = self.bytes.split();
        let res = self.sink.write(&chunk).await;
        self.check(res)
    }

    fn check(&mut self, res: io::Result<()>) -> io::Result<()> {
        if let Err(e) = &res {
            debug!(error = %e, "Response sink failed, dropping further output");
            self.failed = true;
        }
        res
    }
}

/// Encodes `text` onto `dst`. Characters the charset cannot represent
/// become `?`.
pub(super) fn encode_into(enc: &'static Encoding, text: &str, dst: &mut BytesMut) {
    let mut encoder = enc.new_encoder();
    let mut scratch = [0u8; 1024];
    let mut src = text;
    loop {
        let (result, read, written) = encoder.encode_from_utf8_without_replacement(src, &mut scratch, true);
        dst.extend_from_slice(&scratch[..written]);
        src = &src[read..];
        match result {
            EncoderResult::InputEmpty => break,
            EncoderResult::OutputFull => {}
            EncoderResult::Unmappable(_) => dst.extend_from_slice(b"?"),
        }
    }
}
