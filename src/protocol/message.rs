//! Daemon control protocol messages.
//!
//! Requests are built as protobuf envelopes: field 1 holds the request type and
//! one nested field carries the type-specific body. Responses carry a status
//! varint in field 1 and at most one nested payload.

use crate::core::peer::{Multiaddr, PeerId, PeerInfo};
use crate::core::protobuf::{ProtoBuffer, ProtoReader};
use crate::error::{constants, ProtocolError, Result};
use std::time::Duration;

/// Request envelope discriminant (field 1)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u64)]
pub enum RequestType {
    Identify = 0,
    Connect = 1,
    StreamOpen = 2,
    StreamHandler = 3,
    Dht = 4,
    ListPeers = 5,
    ConnManager = 6,
    Disconnect = 7,
    Pubsub = 8,
}

impl RequestType {
    /// Field number of the nested request body, if the kind has one
    pub fn body_tag(self) -> Option<u32> {
        match self {
            RequestType::Identify | RequestType::ListPeers => None,
            RequestType::Connect => Some(2),
            RequestType::StreamOpen => Some(3),
            RequestType::StreamHandler => Some(4),
            RequestType::Dht => Some(5),
            RequestType::ConnManager => Some(6),
            RequestType::Disconnect => Some(7),
            RequestType::Pubsub => Some(8),
        }
    }
}

/// Response envelope field numbers
pub mod response_tags {
    pub const STATUS: u32 = 1;
    pub const ERROR: u32 = 2;
    pub const STREAM_INFO: u32 = 3;
    pub const IDENTIFY: u32 = 4;
    pub const DHT: u32 = 5;
    pub const PEERS: u32 = 6;
    pub const PUBSUB: u32 = 7;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u64)]
pub enum DhtRequestType {
    FindPeer = 0,
    FindPeersConnectedToPeer = 1,
    FindProviders = 2,
    GetClosestPeers = 3,
    GetPublicKey = 4,
    GetValue = 5,
    SearchValue = 6,
    PutValue = 7,
    Provide = 8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u64)]
pub enum DhtResponseType {
    Begin = 0,
    Value = 1,
    End = 2,
}

impl DhtResponseType {
    fn from_u64(value: u64) -> Result<Self> {
        match value {
            0 => Ok(DhtResponseType::Begin),
            1 => Ok(DhtResponseType::Value),
            2 => Ok(DhtResponseType::End),
            _ => Err(ProtocolError::Malformed(constants::ERR_UNEXPECTED_DHT)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u64)]
pub enum ConnManagerRequestType {
    TagPeer = 0,
    UntagPeer = 1,
    Trim = 2,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u64)]
pub enum PubsubRequestType {
    GetTopics = 0,
    ListPeers = 1,
    Publish = 2,
    Subscribe = 3,
}

fn envelope(kind: RequestType, body: Option<&ProtoBuffer>) -> Vec<u8> {
    let mut pb = ProtoBuffer::new();
    pb.write_varint(1, kind as u64);
    if let (Some(tag), Some(body)) = (kind.body_tag(), body) {
        pb.write_message(tag, body);
    }
    pb.finish()
}

fn timeout_secs(timeout: Duration) -> i64 {
    i64::try_from(timeout.as_secs()).unwrap_or(i64::MAX)
}

pub fn identify_request() -> Vec<u8> {
    envelope(RequestType::Identify, None)
}

pub fn list_peers_request() -> Vec<u8> {
    envelope(RequestType::ListPeers, None)
}

pub fn connect_request(peer: &PeerId, addrs: &[Multiaddr], timeout: Option<Duration>) -> Vec<u8> {
    let mut body = ProtoBuffer::new();
    body.write_bytes(1, peer.as_bytes());
    for addr in addrs {
        body.write_bytes(2, addr.as_bytes());
    }
    if let Some(t) = timeout {
        body.write_int64(3, timeout_secs(t));
    }
    envelope(RequestType::Connect, Some(&body))
}

pub fn disconnect_request(peer: &PeerId) -> Vec<u8> {
    let mut body = ProtoBuffer::new();
    body.write_bytes(1, peer.as_bytes());
    envelope(RequestType::Disconnect, Some(&body))
}

pub fn stream_open_request<P: AsRef<str>>(
    peer: &PeerId,
    protocols: &[P],
    timeout: Option<Duration>,
) -> Vec<u8> {
    let mut body = ProtoBuffer::new();
    body.write_bytes(1, peer.as_bytes());
    for proto in protocols {
        body.write_string(2, proto.as_ref());
    }
    if let Some(t) = timeout {
        body.write_int64(3, timeout_secs(t));
    }
    envelope(RequestType::StreamOpen, Some(&body))
}

pub fn stream_handler_request<P: AsRef<str>>(addr: &Multiaddr, protocols: &[P]) -> Vec<u8> {
    let mut body = ProtoBuffer::new();
    body.write_bytes(1, addr.as_bytes());
    for proto in protocols {
        body.write_string(2, proto.as_ref());
    }
    envelope(RequestType::StreamHandler, Some(&body))
}

pub fn conn_manager_request(
    kind: ConnManagerRequestType,
    peer: Option<&PeerId>,
    tag: Option<&str>,
    weight: Option<i64>,
) -> Vec<u8> {
    let mut body = ProtoBuffer::new();
    body.write_varint(1, kind as u64);
    if let Some(peer) = peer {
        body.write_bytes(2, peer.as_bytes());
    }
    if let Some(tag) = tag {
        body.write_string(3, tag);
    }
    if let Some(weight) = weight {
        body.write_int64(4, weight);
    }
    envelope(RequestType::ConnManager, Some(&body))
}

pub fn pubsub_request(kind: PubsubRequestType, topic: Option<&str>, data: Option<&[u8]>) -> Vec<u8> {
    let mut body = ProtoBuffer::new();
    body.write_varint(1, kind as u64);
    if let Some(topic) = topic {
        body.write_string(2, topic);
    }
    if let Some(data) = data {
        body.write_bytes(3, data);
    }
    envelope(RequestType::Pubsub, Some(&body))
}

/// DHT request body; unset fields are omitted from the wire
#[derive(Debug, Clone)]
pub struct DhtRequest<'a> {
    pub kind: DhtRequestType,
    pub peer: Option<&'a PeerId>,
    pub cid: Option<&'a [u8]>,
    pub key: Option<&'a [u8]>,
    pub value: Option<&'a [u8]>,
    pub count: Option<u32>,
    pub timeout: Option<Duration>,
}

impl<'a> DhtRequest<'a> {
    pub fn new(kind: DhtRequestType) -> Self {
        Self {
            kind,
            peer: None,
            cid: None,
            key: None,
            value: None,
            count: None,
            timeout: None,
        }
    }

    pub fn peer(mut self, peer: &'a PeerId) -> Self {
        self.peer = Some(peer);
        self
    }

    pub fn cid(mut self, cid: &'a [u8]) -> Self {
        self.cid = Some(cid);
        self
    }

    pub fn key(mut self, key: &'a [u8]) -> Self {
        self.key = Some(key);
        self
    }

    pub fn value(mut self, value: &'a [u8]) -> Self {
        self.value = Some(value);
        self
    }

    pub fn count(mut self, count: u32) -> Self {
        self.count = Some(count);
        self
    }

    pub fn timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut body = ProtoBuffer::new();
        body.write_varint(1, self.kind as u64);
        if let Some(peer) = self.peer {
            body.write_bytes(2, peer.as_bytes());
        }
        if let Some(cid) = self.cid {
            body.write_bytes(3, cid);
        }
        if let Some(key) = self.key {
            body.write_bytes(4, key);
        }
        if let Some(value) = self.value {
            body.write_bytes(5, value);
        }
        if let Some(count) = self.count {
            body.write_varint(6, u64::from(count));
        }
        if let Some(t) = self.timeout {
            body.write_int64(7, timeout_secs(t));
        }
        envelope(RequestType::Dht, Some(&body))
    }
}

/// Outcome class of a response envelope
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseKind {
    Malformed,
    Error,
    Success,
}

/// Classify a response by its status field
pub fn response_kind(reader: &ProtoReader<'_>) -> ResponseKind {
    match reader.get_varint(response_tags::STATUS) {
        Ok(Some(0)) => ResponseKind::Success,
        Ok(Some(_)) => ResponseKind::Error,
        Ok(None) | Err(_) => ResponseKind::Malformed,
    }
}

/// Message text of the nested error, if present
pub fn get_error_message(reader: &ProtoReader<'_>) -> Option<String> {
    reader
        .enter_submessage(response_tags::ERROR)
        .ok()
        .flatten()
        .and_then(|err| err.get_string(1).ok().flatten())
}

/// Parse a response frame, turning daemon errors into `RemoteError`
pub fn check_response(data: &[u8]) -> Result<ProtoReader<'_>> {
    let reader = ProtoReader::new(data);
    match response_kind(&reader) {
        ResponseKind::Success => Ok(reader),
        ResponseKind::Error => Err(ProtocolError::RemoteError(
            get_error_message(&reader).unwrap_or_else(|| constants::ERR_UNKNOWN_STATUS.to_string()),
        )),
        ResponseKind::Malformed => Err(ProtocolError::Malformed(constants::ERR_MISSING_STATUS)),
    }
}

/// Required nested payload of a successful response
pub fn required_submessage<'a>(reader: &ProtoReader<'a>, tag: u32) -> Result<ProtoReader<'a>> {
    reader
        .enter_submessage(tag)?
        .ok_or(ProtocolError::Malformed(constants::ERR_MISSING_FIELD))
}

/// Envelope with status OK, ready for a payload
pub fn success_response() -> ProtoBuffer {
    let mut pb = ProtoBuffer::new();
    pb.write_varint(response_tags::STATUS, 0);
    pb
}

pub fn error_response(message: &str) -> Vec<u8> {
    let mut err = ProtoBuffer::new();
    err.write_string(1, message);
    let mut pb = ProtoBuffer::new();
    pb.write_varint(response_tags::STATUS, 1)
        .write_message(response_tags::ERROR, &err);
    pb.finish()
}

/// Stream metadata sent by the daemon ahead of stream data
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamInfo {
    pub peer: PeerId,
    pub addr: Multiaddr,
    pub protocol: String,
}

impl StreamInfo {
    pub fn from_proto(reader: &ProtoReader<'_>) -> Result<Self> {
        let missing = || ProtocolError::Malformed(constants::ERR_MISSING_FIELD);
        Ok(Self {
            peer: PeerId::from_bytes(reader.get_bytes(1)?.ok_or_else(missing)?),
            addr: Multiaddr::from_bytes(reader.get_bytes(2)?.ok_or_else(missing)?),
            protocol: reader.get_string(3)?.ok_or_else(missing)?,
        })
    }

    pub fn to_proto(&self) -> ProtoBuffer {
        let mut pb = ProtoBuffer::new();
        pb.write_bytes(1, self.peer.as_bytes())
            .write_bytes(2, self.addr.as_bytes())
            .write_string(3, &self.protocol);
        pb
    }
}

/// One DHT response body, either nested in the first reply or framed alone
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DhtResponse {
    pub kind: DhtResponseType,
    pub peer: Option<PeerInfo>,
    pub value: Option<Vec<u8>>,
}

impl DhtResponse {
    pub fn from_proto(reader: &ProtoReader<'_>) -> Result<Self> {
        let kind = reader
            .get_varint(1)?
            .ok_or(ProtocolError::Malformed(constants::ERR_MISSING_FIELD))?;
        let peer = match reader.enter_submessage(2)? {
            Some(sub) => Some(PeerInfo::from_proto(&sub)?),
            None => None,
        };
        Ok(Self {
            kind: DhtResponseType::from_u64(kind)?,
            peer,
            value: reader.get_bytes(3)?.map(<[u8]>::to_vec),
        })
    }

    pub fn to_proto(&self) -> ProtoBuffer {
        let mut pb = ProtoBuffer::new();
        pb.write_varint(1, self.kind as u64);
        if let Some(ref peer) = self.peer {
            pb.write_message(2, &peer.to_proto());
        }
        if let Some(ref value) = self.value {
            pb.write_bytes(3, value);
        }
        pb
    }

    pub fn into_peer(self) -> Result<PeerInfo> {
        self.peer
            .ok_or(ProtocolError::Malformed(constants::ERR_MISSING_FIELD))
    }

    pub fn into_value(self) -> Result<Vec<u8>> {
        self.value
            .ok_or(ProtocolError::Malformed(constants::ERR_MISSING_FIELD))
    }
}

/// Message delivered to a pubsub subscription
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PubsubMessage {
    pub from: Option<PeerId>,
    pub data: Vec<u8>,
    pub seqno: Vec<u8>,
    pub topics: Vec<String>,
    pub signature: Option<Vec<u8>>,
    pub key: Option<Vec<u8>>,
}

impl PubsubMessage {
    pub fn from_proto(reader: &ProtoReader<'_>) -> Result<Self> {
        Ok(Self {
            from: reader.get_bytes(1)?.map(PeerId::from_bytes),
            data: reader.get_bytes(2)?.map(<[u8]>::to_vec).unwrap_or_default(),
            seqno: reader.get_bytes(3)?.map(<[u8]>::to_vec).unwrap_or_default(),
            topics: reader.get_repeated_strings(4)?,
            signature: reader.get_bytes(5)?.map(<[u8]>::to_vec),
            key: reader.get_bytes(6)?.map(<[u8]>::to_vec),
        })
    }

    pub fn to_proto(&self) -> ProtoBuffer {
        let mut pb = ProtoBuffer::new();
        if let Some(ref from) = self.from {
            pb.write_bytes(1, from.as_bytes());
        }
        pb.write_bytes(2, &self.data).write_bytes(3, &self.seqno);
        for topic in &self.topics {
            pb.write_string(4, topic);
        }
        if let Some(ref sig) = self.signature {
            pb.write_bytes(5, sig);
        }
        if let Some(ref key) = self.key {
            pb.write_bytes(6, key);
        }
        pb
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_status_classification() {
        let ok = success_response().finish();
        assert_eq!(response_kind(&ProtoReader::new(&ok)), ResponseKind::Success);

        let mut other = ProtoBuffer::new();
        other.write_varint(1, 7);
        let other = other.finish();
        assert_eq!(response_kind(&ProtoReader::new(&other)), ResponseKind::Error);

        let mut missing = ProtoBuffer::new();
        missing.write_string(2, "no status");
        let missing = missing.finish();
        assert_eq!(response_kind(&ProtoReader::new(&missing)), ResponseKind::Malformed);
        assert!(matches!(check_response(&missing), Err(ProtocolError::Malformed(_))));
    }

    #[test]
    fn test_error_message_is_verbatim() {
        let data = error_response("dial backoff");
        let reader = ProtoReader::new(&data);
        assert_eq!(response_kind(&reader), ResponseKind::Error);
        assert_eq!(get_error_message(&reader).as_deref(), Some("dial backoff"));
        match check_response(&data) {
            Err(ProtocolError::RemoteError(msg)) => assert_eq!(msg, "dial backoff"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_request_body_tags() {
        let peer = PeerId::from_bytes(vec![1, 2, 3]);
        let data = disconnect_request(&peer);
        let reader = ProtoReader::new(&data);
        assert_eq!(reader.get_varint(1).unwrap(), Some(RequestType::Disconnect as u64));
        let body = reader.enter_submessage(7).unwrap().unwrap();
        assert_eq!(body.get_bytes(1).unwrap(), Some(&[1u8, 2, 3][..]));

        let data = pubsub_request(PubsubRequestType::Publish, Some("news"), Some(b"hi"));
        let body = ProtoReader::new(&data).enter_submessage(8).unwrap().unwrap();
        assert_eq!(body.get_varint(1).unwrap(), Some(2));
        assert_eq!(body.get_string(2).unwrap().as_deref(), Some("news"));
        assert_eq!(body.get_bytes(3).unwrap(), Some(&b"hi"[..]));
    }

    #[test]
    fn test_dht_request_fields() {
        let data = DhtRequest::new(DhtRequestType::FindProviders)
            .cid(b"cid")
            .count(5)
            .timeout(Some(Duration::from_secs(30)))
            .encode();
        let body = ProtoReader::new(&data).enter_submessage(5).unwrap().unwrap();
        assert_eq!(body.get_varint(1).unwrap(), Some(2));
        assert_eq!(body.get_bytes(3).unwrap(), Some(&b"cid"[..]));
        assert_eq!(body.get_varint(6).unwrap(), Some(5));
        assert_eq!(body.get_int64(7).unwrap(), Some(30));
        assert_eq!(body.get_bytes(2).unwrap(), None);
    }

    #[test]
    fn test_stream_info_requires_protocol() {
        let mut pb = ProtoBuffer::new();
        pb.write_bytes(1, b"peer").write_bytes(2, b"addr");
        let data = pb.finish();
        assert!(StreamInfo::from_proto(&ProtoReader::new(&data)).is_err());
    }

    #[test]
    fn test_pubsub_message_fields() {
        let msg = PubsubMessage {
            from: Some(PeerId::from_bytes(vec![9])),
            data: b"payload".to_vec(),
            seqno: vec![0, 1],
            topics: vec!["a".into(), "b".into()],
            signature: None,
            key: None,
        };
        let data = msg.to_proto().finish();
        assert_eq!(PubsubMessage::from_proto(&ProtoReader::new(&data)).unwrap(), msg);
    }
}
