//! Single-threaded runtime for the echo protocol.
//!
//! Layers, leaves first:
//! - `protocol`: length-prefixed framing, independent of I/O
//! - `buffer`: bounded read buffer and offset-tracked write buffer
//! - `connection`: per-connection state machine and the connection registry
//! - `mio`: the readiness event loop driving every connection

mod buffer;
mod connection;
mod mio;
pub mod protocol;

pub use buffer::{ReadBuffer, WriteBuffer};
pub use connection::{CloseReason, ConnState, Connection, ConnectionRegistry};
pub use self::mio::EventLoop;

use crate::config::Config;

/// Serve connections on `listener` until the poller fails.
///
/// The listener must already be bound and listening; the runtime only
/// switches it to non-blocking mode.
pub fn run(config: &Config, listener: std::net::TcpListener) -> std::io::Result<()> {
    self::mio::run(config, listener)
}
