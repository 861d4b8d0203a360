//! Daemon control client.
//!
//! Every call opens a fresh control connection, writes one framed request and
//! reads one framed response. The connection is dropped on every exit path;
//! successful calls also shut down the write half first.

use crate::config::{DaemonFlags, NetworkConfig};
use crate::core::peer::{Multiaddr, PeerId, PeerInfo};
use crate::core::protobuf::ProtoReader;
use crate::core::varint::{read_lp, write_lp};
use crate::error::{constants, ProtocolError, Result};
use crate::protocol::message::{self, response_tags, ConnManagerRequestType, StreamInfo};
use crate::service::handlers::{HandlerServer, HandlerTable};
use crate::service::process::DaemonProcess;
use crate::transport::local::{self, ControlAddr, LocalStream};
use crate::utils::timeout::{attempts_within, PEER_POLL_INTERVAL};
use crate::utils::Metrics;
use std::io;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, ReadBuf};
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

/// Session with one `p2pd` instance
pub struct DaemonApi {
    control: ControlAddr,
    flags: DaemonFlags,
    config: NetworkConfig,
    pub(crate) handlers: HandlerTable,
    pub(crate) servers: Mutex<Vec<HandlerServer>>,
    socket_counter: AtomicUsize,
    pub(crate) metrics: Arc<Metrics>,
    process: Mutex<Option<DaemonProcess>>,
}

impl DaemonApi {
    fn new(config: NetworkConfig, process: Option<DaemonProcess>) -> Result<Self> {
        let control: ControlAddr = config.client.control_addr.parse()?;
        let flags = config.daemon.flags.clone().normalize();
        Ok(Self {
            control,
            flags,
            config,
            handlers: HandlerTable::default(),
            servers: Mutex::new(Vec::new()),
            socket_counter: AtomicUsize::new(0),
            metrics: Arc::new(Metrics::new()),
            process: Mutex::new(process),
        })
    }

    /// Use a daemon that is already listening on the configured control address
    #[instrument(skip(config), fields(control = %config.client.control_addr))]
    pub async fn attach(config: NetworkConfig) -> Result<Self> {
        config.validate_strict()?;
        let api = Self::new(config, None)?;
        info!(control = %api.control, "Attached to daemon");
        Ok(api)
    }

    /// Start a daemon and wait until it is usable.
    ///
    /// When `daemon.min_peers` is set this also waits for the daemon to report
    /// that many connected peers.
    #[instrument(skip(config), fields(binary = %config.daemon.binary))]
    pub async fn spawn(config: NetworkConfig) -> Result<Self> {
        config.validate_strict()?;
        let control: ControlAddr = config.client.control_addr.parse()?;
        let process = DaemonProcess::spawn(&config.daemon, &control).await?;
        let api = Self::new(config, Some(process))?;

        if let Err(e) = api.wait_for_peers().await {
            api.close().await;
            return Err(e);
        }
        Ok(api)
    }

    async fn wait_for_peers(&self) -> Result<()> {
        let min = self.config.daemon.min_peers;
        if min == 0 {
            return Ok(());
        }
        let attempts = attempts_within(self.config.daemon.bootstrap_timeout, PEER_POLL_INTERVAL);
        for _ in 0..attempts {
            let count = self.list_peers().await?.len();
            if count >= min {
                info!(peers = count, "Daemon reached minimum peer count");
                return Ok(());
            }
            debug!(peers = count, wanted = min, "Waiting for peers");
            tokio::time::sleep(PEER_POLL_INTERVAL).await;
        }
        Err(ProtocolError::DaemonError(constants::ERR_BOOTSTRAP_PEERS.to_string()))
    }

    pub fn control_addr(&self) -> &ControlAddr {
        &self.control
    }

    /// Feature flags after conflicting options were resolved
    pub fn flags(&self) -> &DaemonFlags {
        &self.flags
    }

    pub fn config(&self) -> &NetworkConfig {
        &self.config
    }

    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    pub(crate) fn max_message_size(&self) -> usize {
        self.config.transport.max_message_size
    }

    /// Next per-session socket number for handler listeners
    pub(crate) fn next_socket_id(&self) -> usize {
        self.socket_counter.fetch_add(1, Ordering::Relaxed)
    }

    /// Send `request` on a fresh connection and return it with the checked response.
    ///
    /// Used by calls that keep reading after the first response.
    pub(crate) async fn open_transaction(&self, request: &[u8]) -> Result<(LocalStream, Vec<u8>)> {
        self.metrics.rpc_sent();
        let result = async {
            let mut stream = local::connect(&self.control).await?;
            write_lp(&mut stream, request).await?;
            let response = read_lp(&mut stream, self.max_message_size()).await?;
            message::check_response(&response)?;
            Ok::<_, ProtocolError>((stream, response))
        }
        .await;

        if let Err(ref e) = result {
            if e.is_remote() {
                self.metrics.rpc_remote_error();
            } else {
                self.metrics.rpc_local_error();
            }
        }
        result
    }

    /// One request, one response; `parse` unwraps the payload
    pub(crate) async fn transact<T, F>(&self, request: &[u8], parse: F) -> Result<T>
    where
        F: for<'a> FnOnce(ProtoReader<'a>) -> Result<T>,
    {
        let (mut stream, response) = self.open_transaction(request).await?;
        let parsed = parse(ProtoReader::new(&response));
        if parsed.is_err() {
            self.metrics.rpc_local_error();
        }
        let _ = stream.shutdown().await;
        parsed
    }

    /// Peer id and listen addresses of the daemon
    #[instrument(skip(self))]
    pub async fn identity(&self) -> Result<PeerInfo> {
        self.transact(&message::identify_request(), |reader| {
            let identify = message::required_submessage(&reader, response_tags::IDENTIFY)?;
            PeerInfo::from_proto(&identify)
        })
        .await
    }

    #[instrument(skip(self, addrs), fields(peer = %peer))]
    pub async fn connect(
        &self,
        peer: &PeerId,
        addrs: &[Multiaddr],
        timeout: Option<Duration>,
    ) -> Result<()> {
        self.transact(&message::connect_request(peer, addrs, timeout), |_| Ok(()))
            .await
    }

    #[instrument(skip(self), fields(peer = %peer))]
    pub async fn disconnect(&self, peer: &PeerId) -> Result<()> {
        self.transact(&message::disconnect_request(peer), |_| Ok(()))
            .await
    }

    /// Open a stream to `peer` speaking the first protocol it supports
    #[instrument(skip(self, protocols), fields(peer = %peer))]
    pub async fn open_stream<P: AsRef<str>>(
        &self,
        peer: &PeerId,
        protocols: &[P],
        timeout: Option<Duration>,
    ) -> Result<P2PStream> {
        let request = message::stream_open_request(peer, protocols, timeout);
        let (stream, response) = self.open_transaction(&request).await?;
        let info = message::required_submessage(&ProtoReader::new(&response), response_tags::STREAM_INFO)
            .and_then(|reader| StreamInfo::from_proto(&reader));
        match info {
            Ok(info) => {
                debug!(protocol = %info.protocol, "Stream opened");
                Ok(P2PStream::new(info, stream))
            }
            Err(e) => {
                self.metrics.rpc_local_error();
                Err(e)
            }
        }
    }

    /// Peers the daemon is connected to
    #[instrument(skip(self))]
    pub async fn list_peers(&self) -> Result<Vec<PeerInfo>> {
        self.transact(&message::list_peers_request(), |reader| {
            reader
                .get_repeated_submessages(response_tags::PEERS)?
                .iter()
                .map(PeerInfo::from_proto)
                .collect()
        })
        .await
    }

    #[instrument(skip(self), fields(peer = %peer))]
    pub async fn cm_tag_peer(&self, peer: &PeerId, tag: &str, weight: i64) -> Result<()> {
        let request = message::conn_manager_request(
            ConnManagerRequestType::TagPeer,
            Some(peer),
            Some(tag),
            Some(weight),
        );
        self.transact(&request, |_| Ok(())).await
    }

    #[instrument(skip(self), fields(peer = %peer))]
    pub async fn cm_untag_peer(&self, peer: &PeerId, tag: &str) -> Result<()> {
        let request = message::conn_manager_request(
            ConnManagerRequestType::UntagPeer,
            Some(peer),
            Some(tag),
            None,
        );
        self.transact(&request, |_| Ok(())).await
    }

    /// Ask the connection manager to trim down to its low water mark
    #[instrument(skip(self))]
    pub async fn cm_trim_peers(&self) -> Result<()> {
        let request = message::conn_manager_request(ConnManagerRequestType::Trim, None, None, None);
        self.transact(&request, |_| Ok(())).await
    }

    /// Stop handler listeners and, if this session started it, the daemon
    #[instrument(skip(self))]
    pub async fn close(&self) {
        let servers: Vec<HandlerServer> = self.servers.lock().await.drain(..).collect();
        for server in servers {
            server.stop().await;
        }
        if let Some(process) = self.process.lock().await.take() {
            if let Err(e) = process.shutdown().await {
                warn!(error = %e, "Daemon shutdown failed");
            }
        }
        self.metrics.log_summary();
    }
}

/// Stream to a remote peer relayed through the daemon
#[derive(Debug)]
pub struct P2PStream {
    info: StreamInfo,
    stream: LocalStream,
    closed: bool,
}

impl P2PStream {
    pub(crate) fn new(info: StreamInfo, stream: LocalStream) -> Self {
        Self {
            info,
            stream,
            closed: false,
        }
    }

    pub fn info(&self) -> &StreamInfo {
        &self.info
    }

    pub fn peer(&self) -> &PeerId {
        &self.info.peer
    }

    pub fn protocol(&self) -> &str {
        &self.info.protocol
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Shut down the stream; later writes fail
    pub async fn close(&mut self) -> Result<()> {
        if self.closed {
            return Err(ProtocolError::Custom(constants::ERR_STREAM_CLOSED.to_string()));
        }
        self.closed = true;
        self.stream.shutdown().await?;
        Ok(())
    }

    pub fn into_inner(self) -> (StreamInfo, LocalStream) {
        (self.info, self.stream)
    }
}

fn closed_error() -> io::Error {
    io::Error::new(io::ErrorKind::BrokenPipe, constants::ERR_STREAM_CLOSED)
}

impl AsyncRead for P2PStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().stream).poll_read(cx, buf)
    }
}

impl AsyncWrite for P2PStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        if this.closed {
            return Poll::Ready(Err(closed_error()));
        }
        Pin::new(&mut this.stream).poll_write(cx, buf)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().stream).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        this.closed = true;
        Pin::new(&mut this.stream).poll_shutdown(cx)
    }
}
