//! Multiplexed wire protocol spoken with the front-end process.
//!
//! Every frame on the socket is a request id followed by a packet:
//!
//! ```text
//! +-------------+--------+-----------------+-----------------+
//! | rid (u16BE) | type   | length (u16 BE) | payload         |
//! +-------------+--------+-----------------+-----------------+
//! ```
//!
//! RID 0 carries the connection-control exchange (welcome, host and
//! application registration, request id allocation). Each allocated RID in
//! `[RID_MIN, RID_MAX]` is served by its own handler task. A frame sent to
//! [`RID_DISCONNECT`] closes the connection.
//!
//! ```text
//! client                               server
//!   |  <------------- WELCOME (rid 0) ---  |
//!   |  --- HOST_REGISTER ------------->    |
//!   |  <------------- HOST_ID -----------  |
//!   |  --- APP_REGISTER -------------->    |
//!   |  <------------- APP_ID ------------  |
//!   |  --- NEW_REQUEST --------------->    |
//!   |  <------------- REQUEST_RID (n) ---  |
//!   |  --- METHOD/URI/HEADER.. (rid n) ->  |
//!   |  --- RUN (rid n) --------------->    |
//!   |  <------------- ACK, STATUS, HEADER, COMMIT, BODY.., END
//! ```

pub mod body;
pub mod connection;
pub mod control;
pub mod handler;
pub mod packet;
pub mod registry;
pub mod request;

pub use connection::{Connection, PacketWriter, WireProcessor, WireService};
pub use handler::{Handler, HandlerHandle, Inbox};
pub use packet::Packet;
pub use registry::HandlerRegistry;

pub const VERSION_MAJOR: u16 = 0;
pub const VERSION_MINOR: u16 = 10;

pub const RID_CONNECTION: u16 = 0x0000;
pub const RID_MIN: u16 = 0x0001;
pub const RID_MAX: u16 = 0xFFFE;
pub const RID_DISCONNECT: u16 = 0xFFFF;

/// Whether `rid` may be assigned to a request handler.
pub fn is_request_rid(rid: u16) -> bool {
    (RID_MIN..=RID_MAX).contains(&rid)
}

/// Packet type codes.
pub mod types {
    pub const ERROR: u8 = 0x00;
    pub const FATAL: u8 = 0xFF;

    // connection control, rid 0
    pub const WELCOME: u8 = 0x01;
    pub const HOST_REGISTER: u8 = 0x02;
    pub const HOST_ID: u8 = 0x03;
    pub const APP_REGISTER: u8 = 0x04;
    pub const APP_ID: u8 = 0x05;
    pub const NEW_REQUEST: u8 = 0x06;
    pub const REQUEST_RID: u8 = 0x07;

    // request setup, client to server
    pub const METHOD: u8 = 0x10;
    pub const URI: u8 = 0x11;
    pub const QUERY_ARG: u8 = 0x12;
    pub const PROTOCOL: u8 = 0x13;
    pub const HEADER: u8 = 0x14;
    pub const VARIABLE: u8 = 0x15;
    pub const RUN: u8 = 0x1E;
    pub const ACK: u8 = 0x1F;

    // response, server to client
    pub const STATUS: u8 = 0x20;
    pub const RES_HEADER: u8 = 0x21;
    pub const COMMIT: u8 = 0x22;
    pub const BODY: u8 = 0x23;
    pub const END: u8 = 0x2F;

    // request body callbacks
    pub const BODY_READ: u8 = 0x30;
    pub const BODY_DATA: u8 = 0x31;
    pub const BODY_DONE: u8 = 0x32;
}

/// Indexes accepted in VARIABLE packets.
pub mod variables {
    pub const AUTH_TYPE: u16 = 0x01;
    pub const REMOTE_USER: u16 = 0x02;
    pub const REMOTE_ADDR: u16 = 0x03;
    pub const REMOTE_HOST: u16 = 0x04;
    pub const SERVER_NAME: u16 = 0x05;
    pub const SERVER_PORT: u16 = 0x06;
    pub const SCHEME: u16 = 0x07;
    pub const APP_ID: u16 = 0x08;
}
