//! # Error Types
//!
//! Error handling for every layer of the crate.
//!
//! One enum covers the whole stack so callers can branch on the failure kind
//! regardless of which component produced it.
//!
//! ## Error Categories
//! - **Framing**: `Malformed`, `Incomplete`, `OversizedPacket`, `ConnectionClosed`
//! - **Negotiation**: `ProtocolMismatch`, `NoCommonProtocol`
//! - **Daemon**: `RemoteError` (text forwarded verbatim), `DaemonError` (local lifecycle)
//! - **Keys**: `Incorrect` (structural DER failure), `Crypto` (primitive failure)
//! - **Ambient**: `Io`, `ConfigError`, `Timeout`, `Custom`
//!
//! ## Example Usage
//! ```rust
//! use p2p_protocol::error::{ProtocolError, Result};
//!
//! fn check(status: u64) -> Result<()> {
//!     if status != 0 {
//!         return Err(ProtocolError::RemoteError("peer not found".into()));
//!     }
//!     Ok(())
//! }
//!
//! assert!(matches!(check(1), Err(ProtocolError::RemoteError(_))));
//! ```

use std::io;
use thiserror::Error;

/// Error message constants to reduce allocations in error paths.
/// Static strings are borrowed, avoiding heap allocations for common error cases.
pub mod constants {
    /// Registry lock errors
    pub const ERR_REGISTRY_WRITE_LOCK: &str = "Failed to acquire write lock on handler registry";
    pub const ERR_REGISTRY_READ_LOCK: &str = "Failed to acquire read lock on handler registry";

    /// Framing errors
    pub const ERR_VARINT_OVERFLOW: &str = "varint exceeds 64 bits";
    pub const ERR_VARINT_TRUNCATED: &str = "stream ended inside varint";
    pub const ERR_FRAME_TRUNCATED: &str = "stream ended inside frame";
    pub const ERR_INVALID_UTF8: &str = "line is not valid UTF-8";

    /// Protobuf errors
    pub const ERR_PB_WIRE_TYPE: &str = "unsupported protobuf wire type";
    pub const ERR_PB_LENGTH: &str = "protobuf length exceeds buffer";
    pub const ERR_PB_FIELD_ZERO: &str = "protobuf field number 0";
    pub const ERR_PB_FIELD_TYPE: &str = "protobuf field has unexpected wire type";

    /// Daemon response errors
    pub const ERR_MISSING_STATUS: &str = "response has no status field";
    pub const ERR_UNKNOWN_STATUS: &str = "daemon returned an error without message";
    pub const ERR_MISSING_FIELD: &str = "response is missing a required field";
    pub const ERR_UNEXPECTED_DHT: &str = "unexpected DHT response type";

    /// Key errors
    pub const ERR_INCORRECT_PRIVATE_KEY: &str = "incorrect private key";
    pub const ERR_INCORRECT_PUBLIC_KEY: &str = "incorrect public key";
    pub const ERR_MODULUS_TOO_SMALL: &str = "modulus is shorter than 512 bits";
    pub const ERR_KEY_SIZE: &str = "key size is below 512 bits";

    /// Connection errors
    pub const ERR_STREAM_CLOSED: &str = "stream already closed";

    /// Daemon lifecycle errors
    pub const ERR_DAEMON_NOT_READY: &str = "daemon control socket did not become ready";
    pub const ERR_DAEMON_EXITED: &str = "daemon process exited during startup";
    pub const ERR_BOOTSTRAP_PEERS: &str = "daemon did not reach the minimum peer count";
}

/// ProtocolError is the primary error type for all operations in this crate
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Bytes on the wire violate the framing or encoding rules.
    #[error("Malformed message: {0}")]
    Malformed(&'static str),

    /// The peer closed the stream in the middle of a message.
    #[error("Incomplete message: {0}")]
    Incomplete(&'static str),

    /// The peer closed the stream cleanly between messages.
    #[error("Connection closed")]
    ConnectionClosed,

    #[error("Packet too large: {0} bytes")]
    OversizedPacket(usize),

    /// The remote side did not answer with the multistream codec.
    #[error("Protocol mismatch: expected {expected}, got {received:?}")]
    ProtocolMismatch { expected: String, received: String },

    #[error("No common protocol")]
    NoCommonProtocol,

    /// Error reported by the daemon, message unmodified.
    #[error("{0}")]
    RemoteError(String),

    /// Key or signature material failed structural validation.
    #[error("{0}")]
    Incorrect(&'static str),

    #[error("Crypto error: {0}")]
    Crypto(String),

    #[error("Daemon error: {0}")]
    DaemonError(String),

    #[error("Timeout occurred")]
    Timeout,

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Custom error: {0}")]
    Custom(String),
}

impl ProtocolError {
    /// Whether the failure came from the remote daemon rather than local parsing
    pub fn is_remote(&self) -> bool {
        matches!(self, ProtocolError::RemoteError(_))
    }
}

/// Type alias for Results using ProtocolError
pub type Result<T> = std::result::Result<T, ProtocolError>;
