//! Crate-wide error taxonomy (spec section 7).
//!
//! I/O syscall errors are not reified here: `WouldBlock` and `Interrupted`
//! are retried at the call site and never escape, matching
//! `original_source/net/Connection.cc`'s direct errno checks.

use std::io;

use crate::endpoint::Endpoint;

/// Errors surfaced by the reactor, its channels, and the timer manager.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    #[error("fd {fd} is at or beyond the open-file-descriptor limit ({limit})")]
    FdLimitExceeded { fd: i32, limit: u64 },

    #[error("channel already registered with a non-zero id")]
    AlreadyRegistered,

    #[error("channel id {0} is not registered with this reactor")]
    UnknownChannel(u64),

    #[error("peer {peer} did not complete the connection within the deadline")]
    ConnectTimeout { peer: Endpoint },

    #[error("connection refused by {peer}")]
    ConnectRefused { peer: Endpoint },

    #[error("message of {len} bytes exceeds the configured maximum of {max}")]
    PacketTooLarge { len: usize, max: usize },

    #[error("buffer overflow: {attempted} bytes would exceed the {limit} byte cap")]
    BufferOverflow { attempted: usize, limit: usize },

    #[error("reactor has already been shut down")]
    ReactorStopped,

    #[error("malformed endpoint: {0}")]
    BadEndpoint(String),
}

pub type CoreResult<T> = Result<T, CoreError>;
