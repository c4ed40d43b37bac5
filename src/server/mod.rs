//! Listening sockets and the processor pool behind them.

pub mod listener;
pub mod pool;

pub use pool::{ProcessorPool, SocketProcessor};
