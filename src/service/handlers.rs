//! Inbound stream handlers.
//!
//! `add_handler` binds a local listener, tells the daemon to forward streams
//! for the given protocols to it, and runs an accept loop. The daemon writes
//! one framed `StreamInfo` on each inbound connection before the stream data;
//! the connection goes to the handler registered for exactly that protocol or
//! is dropped.

use crate::core::protobuf::ProtoReader;
use crate::core::varint::read_lp;
use crate::error::{constants, ProtocolError, Result};
use crate::protocol::message::{self, StreamInfo};
use crate::service::client::{DaemonApi, P2PStream};
use crate::transport::local::{ControlAddr, LocalListener, LocalStream};
use crate::utils::timeout::{POLL_INTERVAL, SHUTDOWN_TIMEOUT};
use crate::utils::Metrics;
use async_trait::async_trait;
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, RwLock};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

/// Callback for streams opened by remote peers
#[async_trait]
pub trait StreamHandler: Send + Sync {
    async fn handle(&self, stream: P2PStream) -> Result<()>;
}

/// [`StreamHandler`] built from an async closure
pub struct HandlerFn<F>(pub F);

#[async_trait]
impl<F, Fut> StreamHandler for HandlerFn<F>
where
    F: Fn(P2PStream) -> Fut + Send + Sync,
    Fut: Future<Output = Result<()>> + Send,
{
    async fn handle(&self, stream: P2PStream) -> Result<()> {
        (self.0)(stream).await
    }
}

/// Protocol id to handler, shared with accept loops
#[derive(Clone, Default)]
pub(crate) struct HandlerTable {
    inner: Arc<RwLock<HashMap<String, Arc<dyn StreamHandler>>>>,
}

impl HandlerTable {
    fn insert(&self, protocols: &[String], handler: Arc<dyn StreamHandler>) -> Result<()> {
        let mut table = self
            .inner
            .write()
            .map_err(|_| ProtocolError::Custom(constants::ERR_REGISTRY_WRITE_LOCK.to_string()))?;
        for protocol in protocols {
            table.insert(protocol.clone(), Arc::clone(&handler));
        }
        Ok(())
    }

    fn remove(&self, protocols: &[String]) {
        if let Ok(mut table) = self.inner.write() {
            for protocol in protocols {
                table.remove(protocol);
            }
        }
    }

    fn get(&self, protocol: &str) -> Result<Option<Arc<dyn StreamHandler>>> {
        let table = self
            .inner
            .read()
            .map_err(|_| ProtocolError::Custom(constants::ERR_REGISTRY_READ_LOCK.to_string()))?;
        Ok(table.get(protocol).cloned())
    }
}

/// Running accept loop for one handler listener
pub(crate) struct HandlerServer {
    addr: ControlAddr,
    shutdown_tx: mpsc::Sender<()>,
    task: JoinHandle<()>,
}

impl HandlerServer {
    /// Signal the accept loop and wait for it, aborting after a grace period
    pub(crate) async fn stop(self) {
        let _ = self.shutdown_tx.send(()).await;
        let mut task = self.task;
        if tokio::time::timeout(SHUTDOWN_TIMEOUT, &mut task).await.is_err() {
            warn!(addr = %self.addr, "Handler listener did not stop in time, aborting");
            task.abort();
        }
        debug!(addr = %self.addr, "Handler listener stopped");
    }
}

impl DaemonApi {
    /// Endpoint for a new handler listener.
    ///
    /// Unix control sockets get a Unix socket in the handler directory; TCP
    /// control addresses get an ephemeral loopback port.
    fn handler_endpoint(&self) -> Result<ControlAddr> {
        match self.control_addr() {
            #[cfg(unix)]
            ControlAddr::Unix(_) => {
                let name = format!("p2pd-handler-{}-{}.sock", std::process::id(), self.next_socket_id());
                Ok(ControlAddr::Unix(
                    std::path::Path::new(&self.config().client.handler_socket_dir).join(name),
                ))
            }
            ControlAddr::Tcp(_) => Ok(ControlAddr::Tcp(std::net::SocketAddr::from((
                [127, 0, 0, 1],
                0,
            )))),
        }
    }

    /// Route inbound streams for `protocols` to `handler`
    #[instrument(skip(self, protocols, handler), fields(protocols = protocols.len()))]
    pub async fn add_handler<P, H>(&self, protocols: &[P], handler: H) -> Result<()>
    where
        P: AsRef<str>,
        H: StreamHandler + 'static,
    {
        let protocols: Vec<String> = protocols.iter().map(|p| p.as_ref().to_string()).collect();
        let listener = LocalListener::bind(&self.handler_endpoint()?).await?;
        let addr = listener.local_addr()?;

        self.handlers.insert(&protocols, Arc::new(handler))?;
        let request = message::stream_handler_request(&addr.to_multiaddr(), &protocols);
        if let Err(e) = self.transact(&request, |_| Ok(())).await {
            self.handlers.remove(&protocols);
            return Err(e);
        }

        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>(1);
        let task = tokio::spawn(accept_loop(
            listener,
            shutdown_rx,
            self.handlers.clone(),
            Arc::clone(&self.metrics),
            self.max_message_size(),
        ));
        info!(addr = %addr, protocols = ?protocols, "Stream handler registered");

        self.servers.lock().await.push(HandlerServer {
            addr,
            shutdown_tx,
            task,
        });
        Ok(())
    }
}

async fn accept_loop(
    listener: LocalListener,
    mut shutdown_rx: mpsc::Receiver<()>,
    handlers: HandlerTable,
    metrics: Arc<Metrics>,
    max_message_size: usize,
) {
    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => {
                debug!("Handler accept loop shutting down");
                return;
            }
            accepted = listener.accept() => {
                match accepted {
                    Ok(stream) => {
                        let handlers = handlers.clone();
                        let metrics = Arc::clone(&metrics);
                        tokio::spawn(async move {
                            if let Err(e) = dispatch(stream, &handlers, &metrics, max_message_size).await {
                                warn!(error = %e, "Inbound stream failed");
                            }
                        });
                    }
                    Err(e) => {
                        warn!(error = %e, "Accept failed");
                        tokio::time::sleep(POLL_INTERVAL).await;
                    }
                }
            }
        }
    }
}

async fn dispatch(
    mut stream: LocalStream,
    handlers: &HandlerTable,
    metrics: &Metrics,
    max_message_size: usize,
) -> Result<()> {
    let header = read_lp(&mut stream, max_message_size).await?;
    let info = StreamInfo::from_proto(&ProtoReader::new(&header))?;

    let Some(handler) = handlers.get(&info.protocol)? else {
        debug!(protocol = %info.protocol, "No handler for inbound stream, dropping");
        metrics.stream_dropped();
        return Ok(());
    };

    metrics.stream_accepted();
    debug!(protocol = %info.protocol, peer = %info.peer, "Dispatching inbound stream");
    handler.handle(P2PStream::new(info, stream)).await
}
