//! Local control-socket transport.
//!
//! The daemon listens on a Unix domain socket or a loopback TCP port, and
//! stream handlers bind the same kinds of endpoints for the daemon to dial
//! back into. [`LocalStream`] and [`LocalListener`] hide which one is in use.

use crate::core::peer::{Multiaddr, Protocol};
use crate::error::{ProtocolError, Result};
use std::fmt;
use std::io;
use std::net::SocketAddr;
#[cfg(unix)]
use std::path::PathBuf;
use std::pin::Pin;
use std::str::FromStr;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::{TcpListener, TcpStream};
#[cfg(unix)]
use tokio::net::{UnixListener, UnixStream};
use tracing::{debug, info, instrument, warn};

/// Address of a local endpoint
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ControlAddr {
    #[cfg(unix)]
    Unix(PathBuf),
    Tcp(SocketAddr),
}

impl ControlAddr {
    /// Binary multiaddress understood by the daemon
    pub fn to_multiaddr(&self) -> Multiaddr {
        match self {
            #[cfg(unix)]
            ControlAddr::Unix(path) => Multiaddr::unix(path),
            ControlAddr::Tcp(addr) => Multiaddr::tcp(*addr),
        }
    }

    /// Convert a multiaddress naming a unix path or an ip/tcp pair
    pub fn from_multiaddr(addr: &Multiaddr) -> Result<Self> {
        let bad = || ProtocolError::ConfigError(format!("Unsupported control address: {addr}"));
        match addr.protocols()?.as_slice() {
            #[cfg(unix)]
            [Protocol::Unix(path)] => Ok(ControlAddr::Unix(PathBuf::from(path))),
            [Protocol::Ip4(ip), Protocol::Tcp(port)] => Ok(ControlAddr::Tcp(SocketAddr::new((*ip).into(), *port))),
            [Protocol::Ip6(ip), Protocol::Tcp(port)] => Ok(ControlAddr::Tcp(SocketAddr::new((*ip).into(), *port))),
            _ => Err(bad()),
        }
    }
}

impl fmt::Display for ControlAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_multiaddr())
    }
}

impl FromStr for ControlAddr {
    type Err = ProtocolError;

    /// Accepts multiaddr text, a `host:port` pair, or a filesystem path
    fn from_str(s: &str) -> Result<Self> {
        if s.starts_with("/unix/") || s.starts_with("/ip4/") || s.starts_with("/ip6/") {
            let addr: Multiaddr = s.parse()?;
            return Self::from_multiaddr(&addr);
        }
        if let Ok(addr) = s.parse::<SocketAddr>() {
            return Ok(ControlAddr::Tcp(addr));
        }
        #[cfg(unix)]
        if s.contains('/') {
            return Ok(ControlAddr::Unix(PathBuf::from(s)));
        }
        Err(ProtocolError::ConfigError(format!("Invalid control address: {s}")))
    }
}

/// Connected local stream
#[derive(Debug)]
pub enum LocalStream {
    #[cfg(unix)]
    Unix(UnixStream),
    Tcp(TcpStream),
}

/// Connect to a local endpoint
#[instrument(level = "debug", fields(addr = %addr))]
pub async fn connect(addr: &ControlAddr) -> Result<LocalStream> {
    match addr {
        #[cfg(unix)]
        ControlAddr::Unix(path) => Ok(LocalStream::Unix(UnixStream::connect(path).await?)),
        ControlAddr::Tcp(addr) => {
            let stream = TcpStream::connect(addr).await?;
            stream.set_nodelay(true)?;
            Ok(LocalStream::Tcp(stream))
        }
    }
}

impl AsyncRead for LocalStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.get_mut() {
            #[cfg(unix)]
            LocalStream::Unix(s) => Pin::new(s).poll_read(cx, buf),
            LocalStream::Tcp(s) => Pin::new(s).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for LocalStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.get_mut() {
            #[cfg(unix)]
            LocalStream::Unix(s) => Pin::new(s).poll_write(cx, buf),
            LocalStream::Tcp(s) => Pin::new(s).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            #[cfg(unix)]
            LocalStream::Unix(s) => Pin::new(s).poll_flush(cx),
            LocalStream::Tcp(s) => Pin::new(s).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            #[cfg(unix)]
            LocalStream::Unix(s) => Pin::new(s).poll_shutdown(cx),
            LocalStream::Tcp(s) => Pin::new(s).poll_shutdown(cx),
        }
    }
}

/// Listening local endpoint.
///
/// A Unix listener removes its socket file when dropped.
#[derive(Debug)]
pub enum LocalListener {
    #[cfg(unix)]
    Unix { listener: UnixListener, path: PathBuf },
    Tcp(TcpListener),
}

impl LocalListener {
    /// Bind `addr`. A stale Unix socket file at the same path is replaced.
    #[instrument(level = "debug", fields(addr = %addr))]
    pub async fn bind(addr: &ControlAddr) -> Result<Self> {
        match addr {
            #[cfg(unix)]
            ControlAddr::Unix(path) => {
                if path.exists() {
                    tokio::fs::remove_file(path).await.ok();
                }
                let listener = UnixListener::bind(path)?;
                info!(path = %path.display(), "Listening on unix socket");
                Ok(LocalListener::Unix {
                    listener,
                    path: path.clone(),
                })
            }
            ControlAddr::Tcp(addr) => {
                let listener = TcpListener::bind(addr).await?;
                info!(address = %listener.local_addr()?, "Listening on tcp");
                Ok(LocalListener::Tcp(listener))
            }
        }
    }

    /// The bound address; for TCP this carries the assigned port
    pub fn local_addr(&self) -> Result<ControlAddr> {
        match self {
            #[cfg(unix)]
            LocalListener::Unix { path, .. } => Ok(ControlAddr::Unix(path.clone())),
            LocalListener::Tcp(listener) => Ok(ControlAddr::Tcp(listener.local_addr()?)),
        }
    }

    pub async fn accept(&self) -> Result<LocalStream> {
        match self {
            #[cfg(unix)]
            LocalListener::Unix { listener, .. } => {
                let (stream, _) = listener.accept().await?;
                Ok(LocalStream::Unix(stream))
            }
            LocalListener::Tcp(listener) => {
                let (stream, peer) = listener.accept().await?;
                debug!(peer = %peer, "Accepted tcp connection");
                stream.set_nodelay(true)?;
                Ok(LocalStream::Tcp(stream))
            }
        }
    }
}

#[cfg(unix)]
impl Drop for LocalListener {
    fn drop(&mut self) {
        if let LocalListener::Unix { path, .. } = self {
            if let Err(e) = std::fs::remove_file(&*path) {
                if e.kind() != io::ErrorKind::NotFound {
                    warn!(error = %e, path = %path.display(), "Failed to remove socket file");
                }
            }
        }
    }
}
