//! Error types shared across the connector.
//!
//! Each concern owns a small error enum. The connector reacts to them by
//! category:
//!
//! | Error | Reaction |
//! |-------|----------|
//! | [`ConnectorError::Protocol`] | FATAL packet, connection closed |
//! | [`ConnectorError::Transport`] | handler or connection aborted |
//! | [`ConnectorError::Ancillary`] | logged and skipped |
//! | [`UriError`] | fixed `400 Invalid URI`, no dispatch |
//! | [`EncodingError`] | default charset used instead; surfaces as an I/O error only if that fails too |

use std::io;

use thiserror::Error;

/// Errors raised while building or reading a [`Packet`](crate::protocol::Packet).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PacketError {
    /// Writing would grow the payload past 65535 bytes.
    #[error("packet payload overflow: {needed} bytes needed, {available} available")]
    Overflow { needed: usize, available: usize },

    /// A read ran past the end of the payload.
    #[error("packet payload underflow: {needed} bytes needed, {available} available")]
    Underflow { needed: usize, available: usize },

    /// A string field did not hold valid UTF-8.
    #[error("packet string is not valid UTF-8")]
    InvalidUtf8,
}

/// Reasons a request URI is refused before routing.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum UriError {
    #[error("URI contains a NUL byte")]
    NulByte,

    #[error("URI does not start with '/'")]
    NotAbsolute,

    #[error("URI escapes above the root")]
    RootEscape,

    #[error("URI segment holds three or more dots")]
    DotRun,

    #[error("malformed percent escape in URI")]
    IllegalEscape,

    #[error("encoded path separator in URI")]
    EncodedSeparator,
}

/// Character-set resolution failures.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EncodingError {
    #[error("unsupported character encoding: {0}")]
    Unsupported(String),
}

/// Violations of the connection-control protocol.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("unexpected packet type 0x{typ:02x} on the control channel")]
    UnexpectedControl { typ: u8 },

    #[error("malformed packet: {0}")]
    Malformed(#[from] PacketError),

    #[error("no free request id on this connection")]
    RidExhausted,
}

/// Umbrella error for the connector.
#[derive(Debug, Error)]
pub enum ConnectorError {
    #[error("protocol violation: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("transport failure: {0}")]
    Transport(#[from] io::Error),

    #[error("malformed {what}: {detail}")]
    Ancillary { what: &'static str, detail: String },
}

impl From<EncodingError> for io::Error {
    fn from(e: EncodingError) -> Self {
        io::Error::new(io::ErrorKind::InvalidInput, e)
    }
}

impl From<PacketError> for io::Error {
    fn from(e: PacketError) -> Self {
        io::Error::new(io::ErrorKind::InvalidData, e)
    }
}
