//! Multistream-select 1.0.0 negotiation.
//!
//! Both sides exchange newline-terminated, length-prefixed lines. The
//! initiator sends the codec header and then proposes protocols one at a
//! time; the responder echoes an accepted protocol or answers `na`.
//!
//! ```text
//! initiator                      responder
//!   /multistream/1.0.0\n  ---->
//!                         <----  /multistream/1.0.0\n
//!   /c/1.0\n              ---->
//!                         <----  na\n
//!   /b/1.0\n              ---->
//!                         <----  /b/1.0\n
//!   (application protocol follows)
//! ```
//!
//! The responder never closes the connection on a failed proposal, so an
//! initiator may keep retrying on the same stream.

use crate::config::MAX_MESSAGE_SIZE;
use crate::core::varint::{read_lp, write_lp};
use crate::error::{constants, ProtocolError, Result};
use crate::protocol::dispatcher::{HandlerRegistry, Matcher, ProtocolHandler};
use crate::transport::Connection;
use crate::utils::Metrics;
use std::sync::Arc;
use tracing::{debug, instrument, trace, warn};

/// Handshake codec line
pub const MULTISTREAM_CODEC: &str = "/multistream/1.0.0";

/// Request for the responder's protocol list
pub const LS: &str = "ls";

/// "Not available" reply
pub const NA: &str = "na";

/// Write `line` followed by a newline as one frame
pub async fn write_line<S: Connection + ?Sized>(conn: &mut S, line: &str) -> Result<()> {
    let mut data = Vec::with_capacity(line.len() + 1);
    data.extend_from_slice(line.as_bytes());
    data.push(b'\n');
    write_lp(conn, &data).await
}

/// Read one frame as text with a single trailing newline removed
pub async fn read_line<S: Connection + ?Sized>(conn: &mut S, max_size: usize) -> Result<String> {
    let data = read_lp(conn, max_size).await?;
    let mut line =
        String::from_utf8(data).map_err(|_| ProtocolError::Malformed(constants::ERR_INVALID_UTF8))?;
    if line.ends_with('\n') {
        line.pop();
    }
    Ok(line)
}

/// Negotiation engine holding the local protocol handlers
pub struct MultistreamSelect<S> {
    registry: HandlerRegistry<S>,
    max_message_size: usize,
    metrics: Arc<Metrics>,
}

impl<S> Clone for MultistreamSelect<S> {
    fn clone(&self) -> Self {
        Self {
            registry: self.registry.clone(),
            max_message_size: self.max_message_size,
            metrics: Arc::clone(&self.metrics),
        }
    }
}

impl<S: Connection> Default for MultistreamSelect<S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: Connection> MultistreamSelect<S> {
    pub fn new() -> Self {
        Self::with_max_message_size(MAX_MESSAGE_SIZE)
    }

    pub fn with_max_message_size(max_message_size: usize) -> Self {
        Self {
            registry: HandlerRegistry::new(),
            max_message_size,
            metrics: Arc::new(Metrics::new()),
        }
    }

    pub fn add_handler<H>(&self, protocol: &str, handler: H) -> Result<()>
    where
        H: ProtocolHandler<S> + 'static,
    {
        debug!(protocol, "Registering protocol handler");
        self.registry.register(protocol, handler)
    }

    /// Register a handler that also accepts any line `matcher` approves
    pub fn add_handler_with_matcher<H, F>(&self, protocol: &str, matcher: F, handler: H) -> Result<()>
    where
        H: ProtocolHandler<S> + 'static,
        F: Fn(&str) -> bool + Send + Sync + 'static,
    {
        debug!(protocol, "Registering protocol handler with matcher");
        self.registry
            .register_with_matcher(protocol, Matcher::predicate(matcher), handler)
    }

    pub fn protocols(&self) -> Result<Vec<String>> {
        self.registry.protocols()
    }

    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    async fn handshake(&self, conn: &mut S) -> Result<()> {
        write_line(conn, MULTISTREAM_CODEC).await?;
        let reply = read_line(conn, self.max_message_size).await?;
        if reply != MULTISTREAM_CODEC {
            return Err(ProtocolError::ProtocolMismatch {
                expected: MULTISTREAM_CODEC.to_string(),
                received: reply,
            });
        }
        Ok(())
    }

    /// Initiator role: agree on one of `protocols`, tried in order.
    ///
    /// With an empty list only the codec handshake is performed and the codec
    /// string is returned.
    #[instrument(skip(self, conn, protocols), fields(candidates = protocols.len()))]
    pub async fn select<P: AsRef<str>>(&self, conn: &mut S, protocols: &[P]) -> Result<String> {
        self.metrics.negotiation_attempt();
        if let Err(e) = self.handshake(conn).await {
            self.metrics.negotiation_failed();
            return Err(e);
        }

        if protocols.is_empty() {
            self.metrics.negotiation_success();
            return Ok(MULTISTREAM_CODEC.to_string());
        }

        for protocol in protocols {
            let protocol = protocol.as_ref();
            write_line(conn, protocol).await?;
            let reply = read_line(conn, self.max_message_size).await?;
            if reply == protocol {
                debug!(protocol, "Protocol negotiated");
                self.metrics.negotiation_success();
                return Ok(reply);
            }
            trace!(protocol, reply = %reply, "Protocol rejected");
        }

        self.metrics.negotiation_failed();
        Err(ProtocolError::NoCommonProtocol)
    }

    /// Ask the remote side for its protocol list
    pub async fn list(&self, conn: &mut S) -> Result<Vec<String>> {
        self.handshake(conn).await?;
        write_line(conn, LS).await?;
        let block = read_lp(conn, self.max_message_size).await?;
        let text =
            String::from_utf8(block).map_err(|_| ProtocolError::Malformed(constants::ERR_INVALID_UTF8))?;
        Ok(text
            .split('\n')
            .filter(|p| !p.is_empty())
            .map(str::to_string)
            .collect())
    }

    async fn reply_na(&self, conn: &mut S) -> Result<()> {
        self.metrics.na_reply();
        write_line(conn, NA).await
    }

    /// Responder role: answer proposals until a handler accepts the stream.
    ///
    /// Returns the negotiated protocol once its handler completes, or `None`
    /// if the remote side closes the stream first. A failing handler is
    /// logged and answered with `na`; the loop keeps serving the stream.
    #[instrument(skip(self, conn))]
    pub async fn handle(&self, conn: &mut S) -> Result<Option<String>> {
        self.metrics.negotiation_attempt();
        loop {
            let line = match read_line(conn, self.max_message_size).await {
                Ok(line) => line,
                Err(ProtocolError::ConnectionClosed) => {
                    debug!("Remote closed stream during negotiation");
                    self.metrics.negotiation_failed();
                    return Ok(None);
                }
                Err(e) => {
                    self.metrics.negotiation_failed();
                    return Err(e);
                }
            };

            if line.is_empty() {
                self.reply_na(conn).await?;
                continue;
            }

            if line == MULTISTREAM_CODEC {
                write_line(conn, MULTISTREAM_CODEC).await?;
                continue;
            }

            if line == LS {
                let mut block = String::new();
                for protocol in self.registry.protocols()? {
                    block.push_str(&protocol);
                    block.push('\n');
                }
                write_lp(conn, block.as_bytes()).await?;
                continue;
            }

            if let Some((registered, handler)) = self.registry.find(&line)? {
                // Echo the proposal, not `registered`: for a predicate match they differ
                // and initiators compare the reply against what they sent.
                write_line(conn, &line).await?;
                debug!(protocol = %line, registered = %registered, "Dispatching to handler");
                match handler.handle(conn, &line).await {
                    Ok(()) => {
                        self.metrics.negotiation_success();
                        return Ok(Some(line));
                    }
                    Err(e) => {
                        self.metrics.handler_error();
                        warn!(protocol = %line, error = %e, "Protocol handler failed");
                    }
                }
            }

            self.reply_na(conn).await?;
        }
    }
}
