use crate::error::{constants, ProtocolError, Result};
use async_trait::async_trait;
use std::fmt;
use std::sync::{Arc, RwLock};

/// Application protocol handler invoked once negotiation settles on it.
///
/// The handler borrows the stream; when it returns `Ok` it is considered
/// to have finished with the connection.
#[async_trait]
pub trait ProtocolHandler<S>: Send + Sync {
    async fn handle(&self, stream: &mut S, protocol: &str) -> Result<()>;
}

type PredicateFn = dyn Fn(&str) -> bool + Send + Sync + 'static;

/// How a registered entry decides whether it accepts a requested protocol
#[derive(Clone)]
pub enum Matcher {
    /// Literal comparison with the registered id
    Exact,
    /// Custom predicate, tried before the literal comparison
    Predicate(Arc<PredicateFn>),
}

impl Matcher {
    pub fn predicate<F>(f: F) -> Self
    where
        F: Fn(&str) -> bool + Send + Sync + 'static,
    {
        Matcher::Predicate(Arc::new(f))
    }

    #[inline]
    fn accepts(&self, registered: &str, requested: &str) -> bool {
        match self {
            Matcher::Exact => registered == requested,
            Matcher::Predicate(f) => f(requested) || registered == requested,
        }
    }
}

impl fmt::Debug for Matcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Matcher::Exact => f.write_str("Exact"),
            Matcher::Predicate(_) => f.write_str("Predicate(..)"),
        }
    }
}

struct HandlerEntry<S> {
    protocol: String,
    matcher: Matcher,
    handler: Arc<dyn ProtocolHandler<S>>,
}

/// Ordered protocol registry. Insertion order drives `ls` output and
/// first-match-wins dispatch.
pub struct HandlerRegistry<S> {
    entries: Arc<RwLock<Vec<HandlerEntry<S>>>>,
}

impl<S> Clone for HandlerRegistry<S> {
    fn clone(&self) -> Self {
        Self {
            entries: Arc::clone(&self.entries),
        }
    }
}

impl<S: Send> Default for HandlerRegistry<S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: Send> HandlerRegistry<S> {
    pub fn new() -> Self {
        Self {
            entries: Arc::new(RwLock::new(Vec::new())),
        }
    }

    pub fn register<H>(&self, protocol: &str, handler: H) -> Result<()>
    where
        H: ProtocolHandler<S> + 'static,
    {
        self.register_with_matcher(protocol, Matcher::Exact, handler)
    }

    pub fn register_with_matcher<H>(&self, protocol: &str, matcher: Matcher, handler: H) -> Result<()>
    where
        H: ProtocolHandler<S> + 'static,
    {
        let mut entries = self
            .entries
            .write()
            .map_err(|_| ProtocolError::Custom(constants::ERR_REGISTRY_WRITE_LOCK.to_string()))?;

        entries.push(HandlerEntry {
            protocol: protocol.to_string(),
            matcher,
            handler: Arc::new(handler),
        });
        Ok(())
    }

    /// Registered ids in insertion order
    pub fn protocols(&self) -> Result<Vec<String>> {
        let entries = self
            .entries
            .read()
            .map_err(|_| ProtocolError::Custom(constants::ERR_REGISTRY_READ_LOCK.to_string()))?;
        Ok(entries.iter().map(|e| e.protocol.clone()).collect())
    }

    /// First entry accepting `requested`, as `(registered id, handler)`.
    /// The lock is released before the handler can run.
    pub fn find(&self, requested: &str) -> Result<Option<(String, Arc<dyn ProtocolHandler<S>>)>> {
        let entries = self
            .entries
            .read()
            .map_err(|_| ProtocolError::Custom(constants::ERR_REGISTRY_READ_LOCK.to_string()))?;

        Ok(entries
            .iter()
            .find(|e| e.matcher.accepts(&e.protocol, requested))
            .map(|e| (e.protocol.clone(), Arc::clone(&e.handler))))
    }

    pub fn len(&self) -> usize {
        self.entries.read().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
