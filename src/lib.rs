//! # p2p-protocol
//!
//! Protocol negotiation, daemon control and key handling for a libp2p-style
//! peer-to-peer stack.
//!
//! ## Layers
//! - [`core`]: varint and length-prefixed framing, protobuf subset, peer types
//! - [`protocol`]: multistream-select engine and daemon control messages
//! - [`service`]: [`DaemonApi`] client, DHT and pubsub calls, daemon process
//! - [`crypto`]: RSA keys in ASN.1 DER with PKCS#1 v1.5 signatures
//! - [`transport`]: local sockets used to reach the daemon
//!
//! ## Example
//! ```no_run
//! use p2p_protocol::{config::NetworkConfig, DaemonApi};
//!
//! # async fn run() -> p2p_protocol::Result<()> {
//! let api = DaemonApi::attach(NetworkConfig::default()).await?;
//! let me = api.identity().await?;
//! println!("{} listening on {:?}", me.peer, me.addrs);
//! api.close().await;
//! # Ok(())
//! # }
//! ```

#![warn(clippy::unwrap_used, clippy::expect_used)]

pub mod config;
pub mod core;
pub mod crypto;
pub mod error;
pub mod protocol;
pub mod service;
pub mod transport;
pub mod utils;

pub use crate::core::peer::{Multiaddr, PeerId, PeerInfo};
pub use crate::crypto::rsa::{RsaPrivateKey, RsaPublicKey, RsaSignature};
pub use crate::error::{ProtocolError, Result};
pub use crate::protocol::multistream::MultistreamSelect;
pub use crate::service::client::DaemonApi;
