use std::collections::HashMap;
use std::io;
use std::sync::Arc;

use bytes::BytesMut;
use encoding_rs::{CoderResult, Decoder, Encoding};

use super::output::encode_into;
use super::{BodySource, CharsetRegistry, DEFAULT_BUFFER_SIZE, State};

#[derive(Debug, Clone, Copy)]
struct Mark {
    pos: usize,
    limit: usize,
}

/// Request-side transfer buffer.
///
/// Bytes are fetched from the source only when a read needs them. Decoded
/// characters that were not consumed before a switch back to byte reads are
/// re-encoded and put back in front of the pending bytes.
pub struct InputBuffer<'a> {
    source: Box<dyn BodySource + 'a>,
    charsets: Arc<CharsetRegistry>,
    bytes: BytesMut,
    byte_pos: usize,
    chars: String,
    char_pos: usize,
    state: State,
    size: usize,
    declared: Option<String>,
    decoders: HashMap<String, &'static Encoding>,
    decoder: Option<Decoder>,
    decoder_done: bool,
    mark: Option<Mark>,
    bytes_read: u64,
    chars_read: u64,
    eof: bool,
    closed: bool,
}

fn mark_not_set() -> io::Error {
    io::Error::new(io::ErrorKind::InvalidInput, "mark not set")
}

impl<'a> InputBuffer<'a> {
    pub fn new(source: Box<dyn BodySource + 'a>, charsets: Arc<CharsetRegistry>) -> Self {
        Self::with_size(source, charsets, DEFAULT_BUFFER_SIZE)
    }

    pub fn with_size(source: Box<dyn BodySource + 'a>, charsets: Arc<CharsetRegistry>, size: usize) -> Self {
        Self {
            source,
            charsets,
            bytes: BytesMut::with_capacity(size),
            byte_pos: 0,
            chars: String::new(),
            char_pos: 0,
            state: State::Initial,
            size: size.max(1),
            declared: None,
            decoders: HashMap::new(),
            decoder: None,
            decoder_done: false,
            mark: None,
            bytes_read: 0,
            chars_read: 0,
            eof: false,
            closed: false,
        }
    }

    /// Declares the request body encoding. Only effective before the first
    /// character read.
    pub fn set_encoding(&mut self, name: Option<String>) {
        self.declared = name;
    }

    pub fn state(&self) -> State {
        self.state
    }

    pub fn bytes_read(&self) -> u64 {
        self.bytes_read
    }

    pub fn chars_read(&self) -> u64 {
        self.chars_read
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Bytes or characters readable without touching the source.
    pub fn available(&self) -> usize {
        match self.state {
            State::Char => self.chars.len() - self.char_pos,
            _ => self.bytes.len() - self.byte_pos,
        }
    }

    async fn fetch(&mut self) -> io::Result<usize> {
        if self.eof {
            return Ok(0);
        }
        if self.mark.is_none() && self.byte_pos > 0 {
            let _ = self.bytes.split_to(self.byte_pos);
            self.byte_pos = 0;
        }
        let n = self.source.fill(&mut self.bytes, self.size).await?;
        if n == 0 {
            self.eof = true;
        }
        Ok(n)
    }

    fn enter_byte(&mut self) {
        if self.state == State::Char {
            let pending = &self.chars[self.char_pos..];
            if !pending.is_empty() {
                let enc = self.decoder.as_ref().map(|d| d.encoding());
                let enc = enc.unwrap_or(encoding_rs::UTF_8);
                let mut joined = BytesMut::with_capacity(pending.len() + self.bytes.len() - self.byte_pos);
                encode_into(enc, pending, &mut joined);
                joined.extend_from_slice(&self.bytes[self.byte_pos..]);
                self.bytes = joined;
                self.byte_pos = 0;
            }
            self.chars.clear();
            self.char_pos = 0;
            self.mark = None;
        }
        self.state = State::Byte;
    }

    fn enter_char(&mut self) -> io::Result<()> {
        if self.decoder.is_none() {
            let name = self
                .declared
                .as_deref()
                .unwrap_or(self.charsets.default_name())
                .to_ascii_lowercase();
            let enc = match self.decoders.get(&name) {
                Some(enc) => *enc,
                None => {
                    let enc = self.charsets.resolve(Some(&name))?;
                    self.decoders.insert(name, enc);
                    enc
                }
            };
            self.decoder = Some(enc.new_decoder_without_bom_handling());
        }
        if self.state == State::Byte {
            self.mark = None;
        }
        self.state = State::Char;
        Ok(())
    }

    /// Reads up to `dst.len()` bytes. Returns 0 at end of body.
    pub async fn read(&mut self, dst: &mut [u8]) -> io::Result<usize> {
        if self.closed || dst.is_empty() {
            return Ok(0);
        }
        self.enter_byte();
        if self.byte_pos == self.bytes.len() && self.fetch().await? == 0 {
            return Ok(0);
        }
        let n = dst.len().min(self.bytes.len() - self.byte_pos);
        dst[..n].copy_from_slice(&self.bytes[self.byte_pos..self.byte_pos + n]);
        self.byte_pos += n;
        self.bytes_read += n as u64;
        self.check_byte_mark();
        Ok(n)
    }

    pub async fn read_byte(&mut self) -> io::Result<Option<u8>> {
        let mut one = [0u8; 1];
        Ok(match self.read(&mut one).await? {
            0 => None,
            _ => Some(one[0]),
        })
    }

    /// Decodes more characters. Returns false at end of body.
    async fn decode_more(&mut self) -> io::Result<bool> {
        if self.mark.is_none() && self.char_pos > 0 {
            self.chars.drain(..self.char_pos);
            self.char_pos = 0;
        }
        loop {
            if self.byte_pos == self.bytes.len() {
                let fetched = self.fetch().await?;
                if fetched == 0 {
                    return Ok(self.finish_decoder());
                }
            }
            let before = self.chars.len();
            let Some(decoder) = self.decoder.as_mut() else {
                return Ok(false);
            };
            let src = &self.bytes[self.byte_pos..];
            let need = decoder.max_utf8_buffer_length(src.len()).unwrap_or(src.len() * 3 + 4);
            self.chars.reserve(need);
            let (result, consumed, _) = decoder.decode_to_string(src, &mut self.chars, false);
            debug_assert!(matches!(result, CoderResult::InputEmpty));
            self.byte_pos += consumed;
            self.bytes_read += consumed as u64;
            if self.chars.len() > before {
                return Ok(true);
            }
        }
    }

    /// Flushes a trailing partial sequence once. A finished decoder must
    /// not be fed again, so later calls report end of body.
    fn finish_decoder(&mut self) -> bool {
        if self.decoder_done {
            return false;
        }
        self.decoder_done = true;
        let before = self.chars.len();
        if let Some(decoder) = self.decoder.as_mut() {
            let need = decoder.max_utf8_buffer_length(0).unwrap_or(16);
            self.chars.reserve(need);
            let _ = decoder.decode_to_string(&[], &mut self.chars, true);
        }
        self.chars.len() > before
    }

    pub async fn read_char(&mut self) -> io::Result<Option<char>> {
        if self.closed {
            return Ok(None);
        }
        self.enter_char()?;
        if self.char_pos == self.chars.len() && !self.decode_more().await? {
            return Ok(None);
        }
        let c = self.chars[self.char_pos..].chars().next();
        if let Some(c) = c {
            self.char_pos += c.len_utf8();
            self.chars_read += 1;
            self.check_char_mark();
        }
        Ok(c)
    }

    /// Appends up to `max` characters to `dst`. Returns the count read.
    pub async fn read_chars(&mut self, dst: &mut String, max: usize) -> io::Result<usize> {
        let mut n = 0;
        while n < max {
            match self.read_char().await? {
                Some(c) => {
                    dst.push(c);
                    n += 1;
                }
                None => break,
            }
        }
        Ok(n)
    }

    /// Reads one line without its terminator. `None` at end of body.
    pub async fn read_line(&mut self) -> io::Result<Option<String>> {
        let mut line = String::new();
        let mut any = false;
        while let Some(c) = self.read_char().await? {
            any = true;
            match c {
                '\n' => break,
                '\r' => {}
                _ => line.push(c),
            }
        }
        Ok(any.then_some(line))
    }

    pub async fn read_to_string(&mut self, dst: &mut String) -> io::Result<usize> {
        self.read_chars(dst, usize::MAX).await
    }

    /// Remembers the current position so [`reset`](Self::reset) can return
    /// to it, as long as no more than `limit` units are read in between.
    pub fn mark(&mut self, limit: usize) {
        let pos = match self.state {
            State::Char => self.char_pos,
            _ => self.byte_pos,
        };
        self.mark = Some(Mark { pos, limit });
    }

    pub fn reset(&mut self) -> io::Result<()> {
        match self.state {
            State::Initial => Ok(()),
            State::Byte => {
                let mark = self.mark.ok_or_else(mark_not_set)?;
                self.bytes_read -= (self.byte_pos - mark.pos) as u64;
                self.byte_pos = mark.pos;
                Ok(())
            }
            State::Char => {
                let mark = self.mark.ok_or_else(mark_not_set)?;
                self.chars_read -= self.chars[mark.pos..self.char_pos].chars().count() as u64;
                self.char_pos = mark.pos;
                Ok(())
            }
        }
    }

    fn check_byte_mark(&mut self) {
        if let Some(mark) = self.mark {
            if self.byte_pos - mark.pos > mark.limit {
                self.mark = None;
            }
        }
    }

    fn check_char_mark(&mut self) {
        if let Some(mark) = self.mark {
            if self.chars[mark.pos..self.char_pos].chars().count() > mark.limit {
                self.mark = None;
            }
        }
    }

    /// Reads and discards the rest of the body. Returns the bytes skipped.
    pub async fn drain(&mut self) -> io::Result<u64> {
        let mut skipped = (self.bytes.len() - self.byte_pos) as u64;
        self.bytes.clear();
        self.byte_pos = 0;
        self.chars.clear();
        self.char_pos = 0;
        self.mark = None;
        while !self.eof {
            skipped += self.fetch().await? as u64;
            self.bytes.clear();
        }
        Ok(skipped)
    }

    /// Drains the body and refuses further reads. Safe to repeat.
    pub async fn close(&mut self) -> io::Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.drain().await.map(|_| ())
    }

    /// Resets the buffer for the next exchange, keeping the source.
    pub fn recycle(&mut self) {
        self.bytes.clear();
        self.byte_pos = 0;
        self.chars.clear();
        self.char_pos = 0;
        self.state = State::Initial;
        self.declared = None;
        self.decoder = None;
        self.decoder_done = false;
        self.mark = None;
        self.bytes_read = 0;
        self.chars_read = 0;
        self.eof = false;
        self.closed = false;
    }

    /// Recycles and attaches a new source.
    pub fn reset_source(&mut self, source: Box<dyn BodySource + 'a>) {
        self.recycle();
        self.source = source;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::MemorySource;

    fn input(data: &'static [u8], size: usize) -> InputBuffer<'static> {
        InputBuffer::with_size(
            Box::new(MemorySource::new(data)),
            Arc::new(CharsetRegistry::default()),
            size,
        )
    }

    #[tokio::test]
    async fn reads_bytes_across_fetches() {
        let mut inp = input(b"abcdefghij", 3);
        let mut out = Vec::new();
        let mut buf = [0u8; 4];
        loop {
            let n = inp.read(&mut buf).await.unwrap();
            if n == 0 {
                break;
            }
            out.extend_from_slice(&buf[..n]);
        }
        assert_eq!(out, b"abcdefghij");
        assert_eq!(inp.bytes_read(), 10);
    }

    #[tokio::test]
    async fn decodes_split_multibyte_sequences() {
        let mut inp = input("h\u{e9}llo \u{20ac}".as_bytes(), 2);
        inp.set_encoding(Some("utf-8".into()));
        let mut s = String::new();
        inp.read_to_string(&mut s).await.unwrap();
        assert_eq!(s, "h\u{e9}llo \u{20ac}");
        assert_eq!(inp.chars_read(), 7);
    }

    #[tokio::test]
    async fn char_mark_and_reset() {
        let mut inp = input(b"abcdef", 2);
        assert_eq!(inp.read_char().await.unwrap(), Some('a'));
        inp.mark(10);
        assert_eq!(inp.read_char().await.unwrap(), Some('b'));
        assert_eq!(inp.read_char().await.unwrap(), Some('c'));
        assert_eq!(inp.read_char().await.unwrap(), Some('d'));
        inp.reset().unwrap();
        let mut s = String::new();
        inp.read_to_string(&mut s).await.unwrap();
        assert_eq!(s, "bcdef");
    }

    #[tokio::test]
    async fn reset_without_mark_fails_in_char_state() {
        let mut inp = input(b"xy", 8);
        inp.read_char().await.unwrap();
        let err = inp.reset().unwrap_err();
        assert_eq!(err.to_string(), "mark not set");
    }

    #[tokio::test]
    async fn mark_expires_past_limit() {
        let mut inp = input(b"abcdef", 8);
        inp.read_char().await.unwrap();
        inp.mark(1);
        inp.read_char().await.unwrap();
        inp.read_char().await.unwrap();
        assert!(inp.reset().is_err());
    }

    #[tokio::test]
    async fn byte_mark_and_reset() {
        let mut inp = input(b"0123456789", 4);
        let mut buf = [0u8; 2];
        inp.read(&mut buf).await.unwrap();
        inp.mark(6);
        inp.read(&mut buf).await.unwrap();
        inp.read(&mut buf).await.unwrap();
        assert_eq!(&buf, b"45");
        inp.reset().unwrap();
        inp.read(&mut buf).await.unwrap();
        assert_eq!(&buf, b"23");
    }

    #[tokio::test]
    async fn switching_to_bytes_keeps_unread_chars() {
        let mut inp = input(b"abcdef", 16);
        assert_eq!(inp.read_char().await.unwrap(), Some('a'));
        let mut buf = [0u8; 16];
        let n = inp.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"bcdef");
    }

    #[tokio::test]
    async fn close_drains_and_stops_reads() {
        let mut inp = input(b"leftover body", 4);
        inp.read_byte().await.unwrap();
        inp.close().await.unwrap();
        inp.close().await.unwrap();
        assert_eq!(inp.read_byte().await.unwrap(), None);
        assert_eq!(inp.read_char().await.unwrap(), None);
    }

    #[tokio::test]
    async fn recycle_then_new_source() {
        let mut inp = input(b"first", 4);
        inp.set_encoding(Some("utf-8".into()));
        inp.read_char().await.unwrap();
        inp.reset_source(Box::new(MemorySource::new(&b"\xe9"[..])));
        assert_eq!(inp.state(), State::Initial);
        assert_eq!(inp.chars_read(), 0);
        // default encoding again after recycle
        assert_eq!(inp.read_char().await.unwrap(), Some('\u{e9}'));
    }

    #[tokio::test]
    async fn read_lines() {
        let mut inp = input(b"one\r\ntwo\nthree", 5);
        assert_eq!(inp.read_line().await.unwrap().as_deref(), Some("one"));
        assert_eq!(inp.read_line().await.unwrap().as_deref(), Some("two"));
        assert_eq!(inp.read_line().await.unwrap().as_deref(), Some("three"));
        assert_eq!(inp.read_line().await.unwrap(), None);
    }

    #[tokio::test]
    async fn reads_after_end_of_body_stay_at_end() {
        let mut inp = input(b"ab", 8);
        let mut s = String::new();
        inp.read_to_string(&mut s).await.unwrap();
        assert_eq!(s, "ab");
        assert_eq!(inp.read_char().await.unwrap(), None);
        assert_eq!(inp.read_char().await.unwrap(), None);
        assert_eq!(inp.read_line().await.unwrap(), None);
    }

    #[tokio::test]
    async fn trailing_partial_sequence_is_replaced_once() {
        let mut inp = input(b"a\xe2\x82", 8);
        inp.set_encoding(Some("utf-8".into()));
        let mut s = String::new();
        inp.read_to_string(&mut s).await.unwrap();
        assert_eq!(s, "a\u{fffd}");
        assert_eq!(inp.read_char().await.unwrap(), None);
    }

    #[tokio::test]
    async fn recycle_allows_decoding_again() {
        let mut inp = input(b"x", 8);
        let mut s = String::new();
        inp.read_to_string(&mut s).await.unwrap();
        inp.reset_source(Box::new(MemorySource::new(&b"yz"[..])));
        s.clear();
        inp.read_to_string(&mut s).await.unwrap();
        assert_eq!(s, "yz");
    }
}
