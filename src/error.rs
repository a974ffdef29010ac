//! Custom error types for the acquisition core.
//!
//! This module defines the primary error type, `DaqError`, shared by every part of the
//! crate. Using the `thiserror` crate, it provides one consistent way to report the
//! failures that can occur between the front end, the network daemons and the buffer ring.
//!
//! ## Error Hierarchy
//!
//! `DaqError` consolidates the following categories:
//!
//! - **`Communications`**: Socket creation, binding or host lookup failed while setting up
//!   the front-end link. Wraps a [`CommunicationsError`] that tells the caller *which* of
//!   those happened so it can show a specific remediation message.
//! - **`Protocol`**: A packet or data buffer arrived malformed (missing terminator, bad
//!   length, unknown tag). The offending input is dropped; daemons keep running.
//! - **`RingFull`**: The producer tried to put a buffer into a ring with no free slot.
//!   The ring is untouched; the producer decides whether to drop, retry or back off.
//! - **`IllegalState`**: An operation was attempted before the required setup, such as
//!   sending a command before the sockets are bound.
//! - **`Argument`** / **`Encoding`**: The caller handed in something that cannot be put
//!   on the wire (name too long, non-ASCII text, too many records).
//! - **`Config`** / **`Configuration`**: Loading or validating the configuration failed.
//! - **`Io`**: Any other I/O failure.
//!
//! By using `#[from]`, `DaqError` can be created from the underlying error types with
//! the `?` operator.

use std::net::SocketAddr;
use thiserror::Error;

/// Convenience alias for results using the application error type.
pub type AppResult<T> = std::result::Result<T, DaqError>;

/// Crate-wide error type.
#[derive(Error, Debug)]
pub enum DaqError {
    /// Front-end link setup failed.
    #[error("Communications error: {0}")]
    Communications(#[from] CommunicationsError),

    /// Malformed packet or data buffer.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// No free slot in the buffer ring.
    #[error("Ring buffer full ({capacity} buffers occupied)")]
    RingFull {
        /// Capacity of the ring that rejected the buffer.
        capacity: usize,
    },

    /// Operation attempted before the required binding or setup.
    #[error("Illegal state: {0}")]
    IllegalState(String),

    /// Invalid caller-supplied argument.
    #[error("Invalid argument: {0}")]
    Argument(String),

    /// Value cannot be encoded on the wire.
    #[error("Encoding error: {0}")]
    Encoding(String),

    /// Configuration could not be loaded.
    #[error("Configuration error: {0}")]
    Config(#[from] figment::Error),

    /// Configuration loaded but is semantically invalid.
    #[error("Configuration validation error: {0}")]
    Configuration(String),

    /// Any other I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Reasons the front-end sockets could not be set up.
#[derive(Error, Debug)]
pub enum CommunicationsError {
    /// Host name did not resolve to any address.
    #[error("Unknown host '{host}'")]
    UnknownHost {
        /// The host name as configured.
        host: String,
        /// Resolver failure, when one was reported.
        #[source]
        source: Option<std::io::Error>,
    },

    /// Local port is already bound by another socket.
    #[error("Address {addr} already in use, is another instance running?")]
    AddressInUse {
        /// Local address that could not be bound.
        addr: SocketAddr,
        /// Underlying bind failure.
        #[source]
        source: std::io::Error,
    },

    /// Any other socket creation failure.
    #[error("Could not create socket on {addr}: {source}")]
    Socket {
        /// Local address of the failed socket.
        addr: SocketAddr,
        /// Underlying failure.
        #[source]
        source: std::io::Error,
    },
}

impl CommunicationsError {
    /// Classifies a bind failure for `addr`.
    pub fn from_bind(addr: SocketAddr, source: std::io::Error) -> Self {
        if source.kind() == std::io::ErrorKind::AddrInUse {
            CommunicationsError::AddressInUse { addr, source }
        } else {
            CommunicationsError::Socket { addr, source }
        }
    }
}

impl DaqError {
    /// True for errors that only drop one packet or buffer and leave daemons running.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            DaqError::Protocol(_) | DaqError::RingFull { .. } | DaqError::Encoding(_)
        )
    }
}
