//! mio event loop implementation.
//!
//! Readiness-based model: poll tells us when sockets are ready,
//! then each connection's state machine performs non-blocking
//! read/write syscalls until the socket would block.
//! Uses epoll on Linux, kqueue on macOS.
//!
//! Interest follows connection state: `Reading` connections are
//! registered for readability, `Writing` connections for writability,
//! never both. A connection that reaches `Closing` is deregistered,
//! removed from the registry and dropped in the same iteration.

use crate::config::Config;
use crate::runtime::{CloseReason, ConnState, Connection, ConnectionRegistry};
use mio::net::{TcpListener, TcpStream};
use mio::{Events, Interest, Poll, Token};
use std::io;
use std::net::SocketAddr;
use std::time::Duration;
use tracing::{debug, error, info, trace, warn};

const LISTENER_TOKEN: Token = Token(usize::MAX);

/// Single-threaded event loop serving every connection.
pub struct EventLoop {
    poll: Poll,
    events: Events,
    listener: TcpListener,
    connections: ConnectionRegistry<TcpStream>,
    max_message_size: usize,
    poll_timeout: Duration,
    /// Set when accepting stopped on an error with connections possibly
    /// still queued. The listener is edge-triggered, so no new event will
    /// arrive for them.
    accept_pending: bool,
}

impl EventLoop {
    /// Create an event loop around an already-listening socket.
    pub fn new(config: &Config, listener: std::net::TcpListener) -> io::Result<Self> {
        listener.set_nonblocking(true)?;
        let mut listener = TcpListener::from_std(listener);

        let poll = Poll::new()?;
        poll.registry()
            .register(&mut listener, LISTENER_TOKEN, Interest::READABLE)?;

        Ok(Self {
            poll,
            events: Events::with_capacity(config.batch_size),
            listener,
            connections: ConnectionRegistry::new(config.max_connections),
            max_message_size: config.max_message_size,
            poll_timeout: config.poll_timeout,
            accept_pending: false,
        })
    }

    /// Address the listener is bound to.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Number of registered connections.
    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Run the loop until polling fails.
    pub fn run(&mut self) -> io::Result<()> {
        info!(
            addr = %self.local_addr()?,
            max_connections = self.connections.capacity(),
            max_message_size = self.max_message_size,
            "Event loop started"
        );

        loop {
            self.poll_once(Some(self.poll_timeout))?;
        }
    }

    /// Run a single iteration: wait for readiness, then service every
    /// ready socket.
    ///
    /// Only a failure of the poller itself is returned. Per-connection
    /// failures close that connection and are logged.
    pub fn poll_once(&mut self, timeout: Option<Duration>) -> io::Result<()> {
        if let Err(e) = self.poll.poll(&mut self.events, timeout) {
            if e.kind() == io::ErrorKind::Interrupted {
                return Ok(());
            }
            return Err(e);
        }

        if self.events.is_empty() {
            trace!(connections = self.connections.len(), "Poll timed out");
        }

        let mut accepted = false;
        for event in self.events.iter() {
            match event.token() {
                LISTENER_TOKEN => {
                    self.accept_pending = accept_connections(
                        &self.listener,
                        &self.poll,
                        &mut self.connections,
                        self.max_message_size,
                    );
                    accepted = true;
                }
                Token(conn_id) => {
                    handle_connection_event(conn_id, &self.poll, &mut self.connections);
                }
            }
        }

        if self.accept_pending && !accepted {
            self.accept_pending = accept_connections(
                &self.listener,
                &self.poll,
                &mut self.connections,
                self.max_message_size,
            );
        }

        Ok(())
    }
}

/// Accept until the listener would block.
///
/// Returns `true` if accepting stopped on an error (e.g. `EMFILE`) and
/// must be retried on a later iteration.
fn accept_connections(
    listener: &TcpListener,
    poll: &Poll,
    connections: &mut ConnectionRegistry<TcpStream>,
    max_message_size: usize,
) -> bool {
    loop {
        match listener.accept() {
            Ok((stream, peer_addr)) => {
                if connections.len() >= connections.capacity() {
                    // Dropping the stream closes it
                    warn!(peer = %peer_addr, "Connection limit reached");
                    continue;
                }

                if let Err(e) = stream.set_nodelay(true) {
                    debug!(peer = %peer_addr, error = %e, "Failed to set TCP_NODELAY");
                }

                let Some(conn_id) = connections.insert(Connection::new(stream, max_message_size))
                else {
                    continue;
                };

                // Re-borrow after insert
                let Some(conn) = connections.get_mut(conn_id) else {
                    continue;
                };
                if let Err(e) = poll.registry().register(
                    conn.stream_mut(),
                    Token(conn_id),
                    Interest::READABLE,
                ) {
                    error!(peer = %peer_addr, error = %e, "Failed to register connection");
                    connections.remove(conn_id);
                    continue;
                }

                debug!(conn_id, peer = %peer_addr, "Accepted connection");
            }
            Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => return false,
            Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => {
                error!(error = %e, "Accept error, retrying on next poll");
                return true;
            }
        }
    }
}

fn handle_connection_event(
    conn_id: usize,
    poll: &Poll,
    connections: &mut ConnectionRegistry<TcpStream>,
) {
    // Stale event for a connection reaped earlier in this batch
    let Some(conn) = connections.get_mut(conn_id) else {
        return;
    };

    let before = conn.state();
    conn.step();

    match conn.state() {
        ConnState::Closing => close_connection(poll, connections, conn_id),
        state if state != before => {
            let interest = match state {
                ConnState::Writing => Interest::WRITABLE,
                _ => Interest::READABLE,
            };
            if let Err(e) = poll
                .registry()
                .reregister(conn.stream_mut(), Token(conn_id), interest)
            {
                warn!(conn_id, error = %e, "Failed to update interest");
                close_connection(poll, connections, conn_id);
            }
        }
        _ => {}
    }
}

fn close_connection(
    poll: &Poll,
    connections: &mut ConnectionRegistry<TcpStream>,
    conn_id: usize,
) {
    let Some(mut conn) = connections.remove(conn_id) else {
        return;
    };
    let _ = poll.registry().deregister(conn.stream_mut());

    match conn.close_reason() {
        Some(CloseReason::Eof) => debug!(conn_id, "Connection closed by peer"),
        Some(reason @ CloseReason::UnexpectedEof { .. }) => {
            warn!(conn_id, %reason, "Unexpected end of stream");
        }
        Some(reason @ CloseReason::Protocol(_)) => {
            warn!(conn_id, %reason, "Protocol violation");
        }
        Some(reason @ CloseReason::Io(_)) => {
            warn!(conn_id, %reason, "Connection error");
        }
        None => debug!(conn_id, "Connection closed"),
    }
    // `conn` drops here, closing the socket
}
