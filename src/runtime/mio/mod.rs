//! mio-based event loop implementation.
//!
//! Readiness-based I/O using mio (epoll on Linux, kqueue on macOS).

mod event_loop;

pub use event_loop::EventLoop;

use crate::config::Config;

/// Run the server using the mio backend on an already-listening socket.
pub fn run(config: &Config, listener: std::net::TcpListener) -> std::io::Result<()> {
    EventLoop::new(config, listener)?.run()
}
