//! # Transport Layer
//!
//! Byte-stream plumbing shared by the negotiation engine and the daemon client.
//!
//! ## Components
//! - **Connection**: marker trait for any async bidirectional byte stream
//! - **Local**: Unix domain socket and loopback TCP endpoints for the daemon
//!   control socket and stream handler listeners
//!
//! End of stream surfaces from the framing layer as `ConnectionClosed` at a
//! frame boundary, `Malformed` inside a length prefix and `Incomplete` inside
//! a payload.

pub mod local;

use tokio::io::{AsyncRead, AsyncWrite};

/// Bidirectional byte stream usable by the protocol engines
pub trait Connection: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T> Connection for T where T: AsyncRead + AsyncWrite + Unpin + Send {}

pub use local::{ControlAddr, LocalListener, LocalStream};
