//! # Core Wire Components
//!
//! Low-level framing and encoding shared by every protocol in the crate.
//!
//! ## Components
//! - **Varint**: unsigned LEB128 integers and length-prefixed blocks over async streams
//! - **Codec**: Tokio codec for `Framed` streams of length-prefixed messages
//! - **Protobuf**: minimal protocol-buffers writer and reader
//! - **Peer**: peer ids, multiaddresses and peer records
//!
//! ## Wire Format
//! ```text
//! [Length(varint)] [Payload(N)]
//! ```
//!
//! ## Security
//! - Maximum message size: 64 KiB by default (prevents memory exhaustion)
//! - Length validation before allocation
//! - Varints longer than 10 bytes are rejected

pub mod codec;
pub mod peer;
pub mod protobuf;
pub mod varint;
