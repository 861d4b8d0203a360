//! # Protocol Layer
//!
//! Negotiation and daemon message definitions.
//!
//! ## Components
//! - **Multistream**: multistream-select 1.0.0 initiator and responder
//! - **Dispatcher**: ordered handler registry with literal and predicate matchers
//! - **Message**: daemon control protocol requests and response parsing
//!
//! ## Wire Format
//! ```text
//! [Varint length] [Payload(N)]
//! ```
//! Multistream payloads are newline-terminated text lines; daemon payloads are
//! protobuf messages.

pub mod dispatcher;
pub mod message;
pub mod multistream;
