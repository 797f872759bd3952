//! frame-echo: a poll-driven echo server.
//!
//! Clients send length-prefixed frames (4-byte little-endian length,
//! then payload) and the server echoes each one back in order. A single
//! thread multiplexes every connection over one readiness poller.
//!
//! Features:
//! - Pipelined requests answered in arrival order
//! - Partial reads and short writes resumed across readiness events
//! - Bounded per-connection buffers (one header plus one maximum message)
//! - Configuration via CLI arguments or TOML file

pub mod config;
pub mod runtime;
