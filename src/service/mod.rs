//! # Daemon Services
//!
//! Client side of the `p2pd` control protocol.
//!
//! ## Components
//! - **Client**: [`DaemonApi`] session, identity, connections and streams
//! - **DHT**: single-answer and iterating DHT queries
//! - **Pubsub**: topics, publishing and subscription loops
//! - **Handlers**: inbound stream listeners and dispatch
//! - **Process**: optional daemon process owned by the session

pub mod client;
pub mod dht;
pub mod handlers;
pub mod process;
pub mod pubsub;

pub use client::{DaemonApi, P2PStream};
pub use handlers::{HandlerFn, StreamHandler};
pub use process::DaemonProcess;
pub use pubsub::PubsubTicket;
