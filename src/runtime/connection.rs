//! Connection state machine for managing client connections.
//!
//! Each connection owns its stream, a bounded read buffer, a write
//! buffer with a send offset, and a state tag. The event loop calls
//! [`Connection::step`] once per readiness notification; the step keeps
//! moving bytes until the stream reports would-block or the connection
//! starts closing.

use crate::runtime::buffer::{ReadBuffer, WriteBuffer};
use crate::runtime::protocol::{self, FrameError, HEADER_SIZE};
use slab::Slab;
use std::io::{self, Read, Write};
use thiserror::Error;
use tracing::trace;

/// Current state of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnState {
    /// Accumulating request bytes. Interested in read readiness.
    Reading,
    /// Sending a reply. Interested in write readiness.
    Writing,
    /// Terminal. The event loop reaps the connection.
    Closing,
}

/// Why a connection entered [`ConnState::Closing`].
///
/// Only used for diagnostics; every reason closes the stream the same way.
#[derive(Debug, Error)]
pub enum CloseReason {
    /// Peer closed the stream between messages.
    #[error("peer closed the connection")]
    Eof,
    /// Peer closed the stream with a partial message buffered.
    #[error("peer closed the connection mid-message ({buffered} bytes buffered)")]
    UnexpectedEof { buffered: usize },
    /// Peer violated the framing protocol.
    #[error("protocol violation: {0}")]
    Protocol(#[from] FrameError),
    /// Read or write failed.
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),
}

/// A single client connection.
#[derive(Debug)]
pub struct Connection<S> {
    stream: S,
    state: ConnState,
    read_buf: ReadBuffer,
    write_buf: WriteBuffer,
    max_message_size: usize,
    close_reason: Option<CloseReason>,
}

impl<S: Read + Write> Connection<S> {
    /// Create a new connection in the initial reading state.
    ///
    /// The read buffer holds exactly one header plus one maximum-size
    /// message.
    pub fn new(stream: S, max_message_size: usize) -> Self {
        let capacity = HEADER_SIZE + max_message_size;
        Self {
            stream,
            state: ConnState::Reading,
            read_buf: ReadBuffer::new(capacity),
            write_buf: WriteBuffer::with_capacity(capacity),
            max_message_size,
            close_reason: None,
        }
    }

    pub fn state(&self) -> ConnState {
        self.state
    }

    pub fn stream(&self) -> &S {
        &self.stream
    }

    pub fn stream_mut(&mut self) -> &mut S {
        &mut self.stream
    }

    /// Reason for closing, once the connection is in `Closing`.
    pub fn close_reason(&self) -> Option<&CloseReason> {
        self.close_reason.as_ref()
    }

    /// Bytes buffered from the peer and not yet consumed.
    pub fn buffered(&self) -> usize {
        self.read_buf.len()
    }

    /// Reply bytes queued but not yet sent.
    pub fn unsent(&self) -> usize {
        self.write_buf.pending().len()
    }

    /// Drive the state machine as far as the stream allows.
    ///
    /// Returns whether any progress was made: bytes read, bytes written,
    /// a reply queued, or a state transition.
    pub fn step(&mut self) -> bool {
        let mut progressed = false;

        loop {
            let advanced = match self.state {
                ConnState::Reading => self.try_reply() || self.fill(),
                ConnState::Writing => self.flush(),
                ConnState::Closing => false,
            };

            if !advanced {
                break;
            }
            progressed = true;
        }

        progressed
    }

    /// Queue an echo for the first complete buffered frame, if any.
    fn try_reply(&mut self) -> bool {
        let consumed = match protocol::try_extract(self.read_buf.data(), self.max_message_size) {
            Ok(Some(frame)) => {
                trace!(len = frame.payload.len(), "Echoing frame");
                protocol::encode(frame.payload, self.write_buf.queue());
                frame.consumed
            }
            Ok(None) => return false,
            Err(e) => {
                self.close(e.into());
                return true;
            }
        };

        self.read_buf.consume(consumed);
        self.state = ConnState::Writing;
        true
    }

    /// Perform one read into the spare region of the read buffer.
    fn fill(&mut self) -> bool {
        // A buffer holding only a partial frame always has spare room.
        debug_assert!(!self.read_buf.is_full());

        loop {
            match self.stream.read(self.read_buf.spare_mut()) {
                Ok(0) => {
                    let reason = if self.read_buf.is_empty() {
                        CloseReason::Eof
                    } else {
                        CloseReason::UnexpectedEof {
                            buffered: self.read_buf.len(),
                        }
                    };
                    self.close(reason);
                    return true;
                }
                Ok(n) => {
                    self.read_buf.commit(n);
                    return true;
                }
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => return false,
                Err(e) => {
                    self.close(e.into());
                    return true;
                }
            }
        }
    }

    /// Perform one write of the unsent tail of the write buffer.
    fn flush(&mut self) -> bool {
        if self.write_buf.is_drained() {
            self.finish_write();
            return true;
        }

        loop {
            match self.stream.write(self.write_buf.pending()) {
                Ok(0) => {
                    let e = io::Error::new(io::ErrorKind::WriteZero, "write returned 0");
                    self.close(e.into());
                    return true;
                }
                Ok(n) => {
                    self.write_buf.advance(n);
                    if self.write_buf.is_drained() {
                        self.finish_write();
                    }
                    return true;
                }
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => return false,
                Err(e) => {
                    self.close(e.into());
                    return true;
                }
            }
        }
    }

    fn finish_write(&mut self) {
        self.write_buf.reset();
        self.state = ConnState::Reading;
    }

    /// Mark connection for closing.
    fn close(&mut self, reason: CloseReason) {
        self.state = ConnState::Closing;
        self.close_reason = Some(reason);
    }
}

/// Registry of active connections using slab allocation.
///
/// The slab key identifies the connection everywhere else, including the
/// poller token. Removing an entry hands back ownership of the connection,
/// and dropping it closes the stream.
pub struct ConnectionRegistry<S> {
    connections: Slab<Connection<S>>,
    max_connections: usize,
}

impl<S> ConnectionRegistry<S> {
    /// Create a new registry with specified maximum capacity.
    pub fn new(max_connections: usize) -> Self {
        Self {
            connections: Slab::with_capacity(max_connections),
            max_connections,
        }
    }

    /// Insert a new connection into the registry.
    ///
    /// Returns `None` if the registry is at capacity.
    pub fn insert(&mut self, conn: Connection<S>) -> Option<usize> {
        if self.connections.len() >= self.max_connections {
            return None;
        }
        Some(self.connections.insert(conn))
    }

    pub fn get(&self, id: usize) -> Option<&Connection<S>> {
        self.connections.get(id)
    }

    pub fn get_mut(&mut self, id: usize) -> Option<&mut Connection<S>> {
        self.connections.get_mut(id)
    }

    /// Remove a connection from the registry.
    pub fn remove(&mut self, id: usize) -> Option<Connection<S>> {
        self.connections.try_remove(id)
    }

    pub fn contains(&self, id: usize) -> bool {
        self.connections.contains(id)
    }

    /// Number of active connections.
    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    /// Maximum number of connections allowed.
    pub fn capacity(&self) -> usize {
        self.max_connections
    }

    pub fn iter(&self) -> impl Iterator<Item = (usize, &Connection<S>)> {
        self.connections.iter()
    }
}
