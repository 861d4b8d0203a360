//! Peer identifiers, multiaddresses and peer records.
//!
//! These are thin typed wrappers over the byte strings the daemon exchanges.
//! `PeerId` renders as base58btc and `Multiaddr` renders as its textual path
//! (`/ip4/127.0.0.1/tcp/4001`) for the protocols the daemon commonly reports.

use crate::core::protobuf::{ProtoBuffer, ProtoReader};
use crate::core::varint::{decode_varint, encode_varint_into};
use crate::error::{constants, ProtocolError, Result};
use base58::{FromBase58, ToBase58};
use std::fmt;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::path::Path;
use std::str::FromStr;

/// Multihash-encoded peer identity
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PeerId(Vec<u8>);

impl PeerId {
    pub fn from_bytes(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn to_base58(&self) -> String {
        self.0.to_base58()
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_base58())
    }
}

impl fmt::Debug for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PeerId({})", self.to_base58())
    }
}

impl FromStr for PeerId {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self> {
        s.from_base58()
            .map(PeerId)
            .map_err(|_| ProtocolError::Malformed("peer id is not valid base58"))
    }
}

// Multicodec protocol codes
const P_IP4: u64 = 4;
const P_TCP: u64 = 6;
const P_IP6: u64 = 41;
const P_DNS4: u64 = 54;
const P_DNS6: u64 = 55;
const P_UDP: u64 = 273;
const P_UNIX: u64 = 400;
const P_P2P: u64 = 421;
const P_QUIC: u64 = 460;

/// One decoded multiaddress component
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Protocol {
    Ip4(Ipv4Addr),
    Ip6(Ipv6Addr),
    Tcp(u16),
    Udp(u16),
    Dns4(String),
    Dns6(String),
    Unix(String),
    P2p(PeerId),
    Quic,
}

impl Protocol {
    fn write(&self, buf: &mut Vec<u8>) {
        match self {
            Protocol::Ip4(ip) => {
                encode_varint_into(P_IP4, buf);
                buf.extend_from_slice(&ip.octets());
            }
            Protocol::Ip6(ip) => {
                encode_varint_into(P_IP6, buf);
                buf.extend_from_slice(&ip.octets());
            }
            Protocol::Tcp(port) => {
                encode_varint_into(P_TCP, buf);
                buf.extend_from_slice(&port.to_be_bytes());
            }
            Protocol::Udp(port) => {
                encode_varint_into(P_UDP, buf);
                buf.extend_from_slice(&port.to_be_bytes());
            }
            Protocol::Dns4(host) => write_sized(buf, P_DNS4, host.as_bytes()),
            Protocol::Dns6(host) => write_sized(buf, P_DNS6, host.as_bytes()),
            Protocol::Unix(path) => write_sized(buf, P_UNIX, path.as_bytes()),
            Protocol::P2p(peer) => write_sized(buf, P_P2P, peer.as_bytes()),
            Protocol::Quic => {
                encode_varint_into(P_QUIC, buf);
            }
        }
    }
}

fn write_sized(buf: &mut Vec<u8>, code: u64, value: &[u8]) {
    encode_varint_into(code, buf);
    encode_varint_into(value.len() as u64, buf);
    buf.extend_from_slice(value);
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Protocol::Ip4(ip) => write!(f, "/ip4/{ip}"),
            Protocol::Ip6(ip) => write!(f, "/ip6/{ip}"),
            Protocol::Tcp(port) => write!(f, "/tcp/{port}"),
            Protocol::Udp(port) => write!(f, "/udp/{port}"),
            Protocol::Dns4(host) => write!(f, "/dns4/{host}"),
            Protocol::Dns6(host) => write!(f, "/dns6/{host}"),
            // Unix paths carry their own leading slash
            Protocol::Unix(path) => write!(f, "/unix{path}"),
            Protocol::P2p(peer) => write!(f, "/p2p/{peer}"),
            Protocol::Quic => f.write_str("/quic"),
        }
    }
}

/// Binary multiaddress as exchanged with the daemon
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Multiaddr(Vec<u8>);

impl Multiaddr {
    pub fn from_bytes(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn from_protocols(protocols: &[Protocol]) -> Self {
        let mut buf = Vec::new();
        for protocol in protocols {
            protocol.write(&mut buf);
        }
        Self(buf)
    }

    /// `/unix/<path>` for a local socket path
    pub fn unix(path: &Path) -> Self {
        Self::from_protocols(&[Protocol::Unix(path.to_string_lossy().into_owned())])
    }

    /// `/ip4|ip6/<addr>/tcp/<port>` for a socket address
    pub fn tcp(addr: SocketAddr) -> Self {
        let ip = match addr {
            SocketAddr::V4(v4) => Protocol::Ip4(*v4.ip()),
            SocketAddr::V6(v6) => Protocol::Ip6(*v6.ip()),
        };
        Self::from_protocols(&[ip, Protocol::Tcp(addr.port())])
    }

    /// Decode the component list
    pub fn protocols(&self) -> Result<Vec<Protocol>> {
        let data = &self.0;
        let mut pos = 0;
        let mut out = Vec::new();
        while pos < data.len() {
            let (code, len) = decode_varint(&data[pos..]).map_err(|_| malformed())?;
            pos += len;
            let protocol = match code {
                P_IP4 => {
                    let raw: [u8; 4] = take(data, &mut pos, 4)?.try_into().map_err(|_| malformed())?;
                    Protocol::Ip4(Ipv4Addr::from(raw))
                }
                P_IP6 => {
                    let raw: [u8; 16] = take(data, &mut pos, 16)?.try_into().map_err(|_| malformed())?;
                    Protocol::Ip6(Ipv6Addr::from(raw))
                }
                P_TCP | P_UDP => {
                    let raw = take(data, &mut pos, 2)?;
                    let port = u16::from_be_bytes([raw[0], raw[1]]);
                    if code == P_TCP {
                        Protocol::Tcp(port)
                    } else {
                        Protocol::Udp(port)
                    }
                }
                P_DNS4 | P_DNS6 | P_UNIX => {
                    let value = take_sized(data, &mut pos)?;
                    let text = String::from_utf8(value.to_vec())
                        .map_err(|_| ProtocolError::Malformed(constants::ERR_INVALID_UTF8))?;
                    match code {
                        P_DNS4 => Protocol::Dns4(text),
                        P_DNS6 => Protocol::Dns6(text),
                        _ => Protocol::Unix(text),
                    }
                }
                P_P2P => Protocol::P2p(PeerId::from_bytes(take_sized(data, &mut pos)?)),
                P_QUIC => Protocol::Quic,
                _ => return Err(ProtocolError::Malformed("unknown multiaddr protocol")),
            };
            out.push(protocol);
        }
        Ok(out)
    }
}

fn malformed() -> ProtocolError {
    ProtocolError::Malformed("invalid multiaddr")
}

fn take<'a>(data: &'a [u8], pos: &mut usize, len: usize) -> Result<&'a [u8]> {
    let end = pos.checked_add(len).ok_or_else(malformed)?;
    let slice = data.get(*pos..end).ok_or_else(malformed)?;
    *pos = end;
    Ok(slice)
}

fn take_sized<'a>(data: &'a [u8], pos: &mut usize) -> Result<&'a [u8]> {
    let (len, header) = decode_varint(&data[*pos..]).map_err(|_| malformed())?;
    *pos += header;
    take(data, pos, usize::try_from(len).map_err(|_| malformed())?)
}

impl fmt::Display for Multiaddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.protocols() {
            Ok(protocols) => {
                for protocol in protocols {
                    write!(f, "{protocol}")?;
                }
                Ok(())
            }
            Err(_) => {
                for byte in &self.0 {
                    write!(f, "{byte:02x}")?;
                }
                Ok(())
            }
        }
    }
}

impl fmt::Debug for Multiaddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Multiaddr({self})")
    }
}

impl FromStr for Multiaddr {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self> {
        let bad = || ProtocolError::Malformed("invalid multiaddr text");
        let rest = s.strip_prefix('/').ok_or_else(bad)?;
        let mut parts = rest.split('/');
        let mut protocols = Vec::new();
        while let Some(name) = parts.next() {
            let protocol = match name {
                "ip4" => Protocol::Ip4(parts.next().and_then(|v| v.parse().ok()).ok_or_else(bad)?),
                "ip6" => Protocol::Ip6(parts.next().and_then(|v| v.parse().ok()).ok_or_else(bad)?),
                "tcp" => Protocol::Tcp(parts.next().and_then(|v| v.parse().ok()).ok_or_else(bad)?),
                "udp" => Protocol::Udp(parts.next().and_then(|v| v.parse().ok()).ok_or_else(bad)?),
                "dns4" => Protocol::Dns4(parts.next().ok_or_else(bad)?.to_string()),
                "dns6" => Protocol::Dns6(parts.next().ok_or_else(bad)?.to_string()),
                "p2p" | "ipfs" => Protocol::P2p(parts.next().ok_or_else(bad)?.parse()?),
                "quic" => Protocol::Quic,
                "unix" => {
                    // A unix path swallows the remainder of the address
                    let path: Vec<&str> = parts.by_ref().collect();
                    if path.is_empty() {
                        return Err(bad());
                    }
                    Protocol::Unix(format!("/{}", path.join("/")))
                }
                _ => return Err(bad()),
            };
            protocols.push(protocol);
        }
        Ok(Multiaddr::from_protocols(&protocols))
    }
}

/// A peer and the addresses it is known by
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerInfo {
    pub peer: PeerId,
    pub addrs: Vec<Multiaddr>,
}

impl PeerInfo {
    pub fn from_proto(reader: &ProtoReader<'_>) -> Result<Self> {
        let id = reader
            .get_bytes(1)?
            .ok_or(ProtocolError::Malformed(constants::ERR_MISSING_FIELD))?;
        let addrs = reader
            .get_repeated_bytes(2)?
            .into_iter()
            .map(Multiaddr::from_bytes)
            .collect();
        Ok(Self {
            peer: PeerId::from_bytes(id),
            addrs,
        })
    }

    pub fn to_proto(&self) -> ProtoBuffer {
        let mut pb = ProtoBuffer::new();
        pb.write_bytes(1, self.peer.as_bytes());
        for addr in &self.addrs {
            pb.write_bytes(2, addr.as_bytes());
        }
        pb
    }
}
