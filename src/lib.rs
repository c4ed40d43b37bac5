//! Coupler - web server connector
//!
//! Carries requests from a front-end web server (over the multiplexed wire
//! protocol) or straight from HTTP/1.1 clients into a request dispatcher,
//! with URI validation, session id extraction and byte/character body
//! buffering on the way.

pub mod buffer;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod http;
pub mod protocol;
pub mod server;
pub mod uri;
