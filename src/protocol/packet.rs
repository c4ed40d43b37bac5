//! Packet framing.
//!
//! ```text
//! +--------+-----------------+--------------------------+
//! | type   | length (u16 BE) | payload (length bytes)   |
//! +--------+-----------------+--------------------------+
//! ```
//!
//! Payload primitives are big-endian `u16`, big-endian `i32`, and UTF-8
//! strings prefixed by their `u16` byte length.

use bytes::{Buf, BufMut, BytesMut};

use crate::error::PacketError;

/// Largest payload a packet can carry.
pub const MAX_PAYLOAD: usize = u16::MAX as usize;

/// Size of the `type` + `length` header.
pub const HEADER_LEN: usize = 3;

/// A reusable packet buffer.
///
/// Writes append to the payload; reads consume it from a cursor. Call
/// [`reset`](Packet::reset) before reusing the same instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    typ: u8,
    payload: BytesMut,
    pos: usize,
}

impl Packet {
    pub fn new(typ: u8) -> Self {
        Self {
            typ,
            payload: BytesMut::new(),
            pos: 0,
        }
    }

    /// Builds a packet around an already received payload.
    pub fn from_payload(typ: u8, payload: &[u8]) -> Result<Self, PacketError> {
        let mut packet = Self::new(typ);
        packet.write_bytes(payload)?;
        Ok(packet)
    }

    /// Clears the payload and read cursor and sets a new type.
    pub fn reset(&mut self, typ: u8) {
        self.typ = typ;
        self.payload.clear();
        self.pos = 0;
    }

    pub fn typ(&self) -> u8 {
        self.typ
    }

    pub fn len(&self) -> usize {
        self.payload.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Bytes not yet consumed by the read cursor.
    pub fn remaining(&self) -> usize {
        self.payload.len() - self.pos
    }

    fn reserve(&mut self, n: usize) -> Result<(), PacketError> {
        let available = MAX_PAYLOAD - self.payload.len();
        if n > available {
            return Err(PacketError::Overflow {
                needed: n,
                available,
            });
        }
        self.payload.reserve(n);
        Ok(())
    }

    pub fn write_u16(&mut self, v: u16) -> Result<(), PacketError> {
        self.reserve(2)?;
        self.payload.put_u16(v);
        Ok(())
    }

    pub fn write_i32(&mut self, v: i32) -> Result<(), PacketError> {
        self.reserve(4)?;
        self.payload.put_i32(v);
        Ok(())
    }

    pub fn write_string(&mut self, s: &str) -> Result<(), PacketError> {
        let len = u16::try_from(s.len()).map_err(|_| PacketError::Overflow {
            needed: s.len(),
            available: MAX_PAYLOAD,
        })?;
        self.reserve(2 + s.len())?;
        self.payload.put_u16(len);
        self.payload.put_slice(s.as_bytes());
        Ok(())
    }

    /// Appends raw bytes with no length prefix.
    pub fn write_bytes(&mut self, b: &[u8]) -> Result<(), PacketError> {
        self.reserve(b.len())?;
        self.payload.put_slice(b);
        Ok(())
    }

    fn take(&mut self, n: usize) -> Result<&[u8], PacketError> {
        let available = self.remaining();
        if n > available {
            return Err(PacketError::Underflow {
                needed: n,
                available,
            });
        }
        let start = self.pos;
        self.pos += n;
        Ok(&self.payload[start..self.pos])
    }

    pub fn read_u16(&mut self) -> Result<u16, PacketError> {
        let mut b = self.take(2)?;
        Ok(b.get_u16())
    }

    pub fn read_i32(&mut self) -> Result<i32, PacketError> {
        let mut b = self.take(4)?;
        Ok(b.get_i32())
    }

    pub fn read_string(&mut self) -> Result<String, PacketError> {
        let len = self.read_u16()? as usize;
        let raw = self.take(len)?;
        std::str::from_utf8(raw)
            .map(str::to_owned)
            .map_err(|_| PacketError::InvalidUtf8)
    }

    /// Consumes everything left in the payload.
    pub fn read_remaining(&mut self) -> &[u8] {
        let start = self.pos;
        self.pos = self.payload.len();
        &self.payload[start..]
    }

    /// Appends the framed packet to `dst`.
    pub fn encode(&self, dst: &mut BytesMut) {
        dst.reserve(HEADER_LEN + self.payload.len());
        dst.put_u8(self.typ);
        // payload length is capped at MAX_PAYLOAD by every write
        dst.put_u16(self.payload.len() as u16);
        dst.put_slice(&self.payload);
    }

    /// Parses one framed packet from the front of `src`.
    ///
    /// Returns `None` and leaves `src` untouched when the frame is not
    /// complete yet.
    pub fn decode(src: &mut BytesMut) -> Option<Packet> {
        if src.len() < HEADER_LEN {
            return None;
        }
        let len = u16::from_be_bytes([src[1], src[2]]) as usize;
        if src.len() < HEADER_LEN + len {
            return None;
        }
        let typ = src.get_u8();
        src.advance(2);
        let payload = src.split_to(len);
        Some(Packet {
            typ,
            payload,
            pos: 0,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_then_decode_fields() {
        let mut p = Packet::new(0x02);
        p.write_string("localhost").unwrap();
        p.write_u16(8080).unwrap();
        p.write_i32(-7).unwrap();

        let mut wire = BytesMut::new();
        p.encode(&mut wire);
        assert_eq!(&wire[..3], &[0x02, 0x00, 17]);

        let mut back = Packet::decode(&mut wire).unwrap();
        assert!(wire.is_empty());
        assert_eq!(back.typ(), 0x02);
        assert_eq!(back.read_string().unwrap(), "localhost");
        assert_eq!(back.read_u16().unwrap(), 8080);
        assert_eq!(back.read_i32().unwrap(), -7);
        assert_eq!(back.remaining(), 0);
    }

    #[test]
    fn payload_limit_is_exact() {
        let mut p = Packet::new(1);
        p.write_bytes(&vec![0u8; MAX_PAYLOAD]).unwrap();
        assert_eq!(p.len(), MAX_PAYLOAD);

        let mut q = Packet::new(1);
        let err = q.write_bytes(&vec![0u8; MAX_PAYLOAD + 1]).unwrap_err();
        assert!(matches!(err, PacketError::Overflow { .. }));
        assert!(q.is_empty());
    }

    #[test]
    fn max_payload_survives_framing() {
        let mut p = Packet::new(9);
        p.write_bytes(&vec![0xAB; MAX_PAYLOAD]).unwrap();
        let mut wire = BytesMut::new();
        p.encode(&mut wire);
        assert_eq!(&wire[1..3], &[0xFF, 0xFF]);
        let back = Packet::decode(&mut wire).unwrap();
        assert_eq!(back.len(), MAX_PAYLOAD);
    }

    #[test]
    fn partial_frame_waits() {
        let mut p = Packet::new(3);
        p.write_string("abc").unwrap();
        let mut wire = BytesMut::new();
        p.encode(&mut wire);
        let mut partial = wire.split_to(wire.len() - 1);
        assert!(Packet::decode(&mut partial).is_none());
        assert_eq!(partial.len(), 7);
    }

    #[test]
    fn underflow_and_bad_utf8() {
        let mut p = Packet::from_payload(1, &[0x00]).unwrap();
        assert!(matches!(p.read_u16(), Err(PacketError::Underflow { .. })));

        let mut q = Packet::from_payload(1, &[0x00, 0x02, 0xC3, 0x28]).unwrap();
        assert_eq!(q.read_string(), Err(PacketError::InvalidUtf8));
    }

    #[test]
    fn reset_clears_state() {
        let mut p = Packet::new(1);
        p.write_u16(5).unwrap();
        p.read_u16().unwrap();
        p.reset(2);
        assert_eq!(p, Packet::new(2));
    }
}
