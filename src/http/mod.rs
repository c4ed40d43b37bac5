//! HTTP/1.x front end.
//!
//! Drives the same request preparation and dispatch as the wire connector,
//! but reads requests straight off a client socket.
//!
//! - **`connection`**: the keep-alive loop, see [`HttpProcessor`]
//! - **`parser`**: request line and header parsing
//! - **`request`**: [`RequestContext`], the request state shared by both front ends
//! - **`response`**: [`ResponseHead`] and status codes
//! - **`writer`**: status line serialization and the chunking body sink
//!
//! # Connection loop
//!
//! ```text
//!        ┌─────────────┐
//!        │   Reading   │ ← Wait for a full request head
//!        └──────┬──────┘
//!               │ Head parsed (malformed → 400, close)
//!               ▼
//!        ┌──────────────────┐
//!        │   Preparing      │ ← Decode, session id, normalize (refused → 400)
//!        └──────┬───────────┘
//!               ▼
//!        ┌──────────────────┐
//!        │   Dispatching    │ ← Body streamed in and out through the buffers
//!        └──────┬───────────┘
//!               │ Response finished, unread body drained
//!               ├─ Keep-Alive → Reading (same connection)
//!               └─ Close → Closed
//! ```

pub mod connection;
pub mod parser;
pub mod request;
pub mod response;
pub mod writer;

pub use connection::HttpProcessor;
pub use request::RequestContext;
pub use response::ResponseHead;
