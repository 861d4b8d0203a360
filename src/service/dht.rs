//! DHT calls.
//!
//! Single-answer queries return one nested `DHTResponse`. Iterating queries
//! answer with a `BEGIN` marker and then stream bare `DHTResponse` frames on
//! the same connection until an `END` frame or a clean close.

use crate::core::codec::LengthPrefixedCodec;
use crate::core::peer::{PeerId, PeerInfo};
use crate::core::protobuf::ProtoReader;
use crate::error::{constants, ProtocolError, Result};
use crate::protocol::message::{self, response_tags, DhtRequest, DhtRequestType, DhtResponse, DhtResponseType};
use crate::service::client::DaemonApi;
use futures::StreamExt;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio_util::codec::Framed;
use tracing::{debug, instrument, trace};

impl DaemonApi {
    async fn dht_single(&self, request: DhtRequest<'_>) -> Result<DhtResponse> {
        self.transact(&request.encode(), |reader| {
            let dht = message::required_submessage(&reader, response_tags::DHT)?;
            DhtResponse::from_proto(&dht)
        })
        .await
    }

    /// Run an iterating query and collect every `VALUE` in arrival order
    async fn dht_stream(&self, request: DhtRequest<'_>) -> Result<Vec<DhtResponse>> {
        let (stream, response) = self.open_transaction(&request.encode()).await?;
        let first = message::required_submessage(&ProtoReader::new(&response), response_tags::DHT)
            .and_then(|dht| DhtResponse::from_proto(&dht));
        match first {
            Ok(DhtResponse {
                kind: DhtResponseType::Begin,
                ..
            }) => {}
            Ok(_) => {
                self.metrics.rpc_local_error();
                return Err(ProtocolError::Malformed(constants::ERR_UNEXPECTED_DHT));
            }
            Err(e) => {
                self.metrics.rpc_local_error();
                return Err(e);
            }
        }

        let mut framed = Framed::new(stream, LengthPrefixedCodec::new(self.max_message_size()));
        let mut values = Vec::new();
        let result = loop {
            let frame = match framed.next().await {
                Some(Ok(frame)) => frame,
                Some(Err(e)) => break Err(e),
                None => {
                    debug!(values = values.len(), "DHT stream closed without END");
                    break Ok(());
                }
            };
            let response = match DhtResponse::from_proto(&ProtoReader::new(&frame)) {
                Ok(response) => response,
                Err(e) => break Err(e),
            };
            match response.kind {
                DhtResponseType::Value => {
                    trace!(index = values.len(), "DHT value");
                    values.push(response);
                }
                DhtResponseType::End => break Ok(()),
                DhtResponseType::Begin => {
                    break Err(ProtocolError::Malformed(constants::ERR_UNEXPECTED_DHT))
                }
            }
        };

        let _ = framed.into_inner().shutdown().await;
        if result.is_err() {
            self.metrics.rpc_local_error();
        }
        result.map(|()| values)
    }

    /// Addresses of `peer`
    #[instrument(skip(self), fields(peer = %peer))]
    pub async fn dht_find_peer(&self, peer: &PeerId, timeout: Option<Duration>) -> Result<PeerInfo> {
        self.dht_single(DhtRequest::new(DhtRequestType::FindPeer).peer(peer).timeout(timeout))
            .await?
            .into_peer()
    }

    /// Public key of `peer` as the daemon serializes it
    #[instrument(skip(self), fields(peer = %peer))]
    pub async fn dht_get_public_key(&self, peer: &PeerId, timeout: Option<Duration>) -> Result<Vec<u8>> {
        self.dht_single(DhtRequest::new(DhtRequestType::GetPublicKey).peer(peer).timeout(timeout))
            .await?
            .into_value()
    }

    #[instrument(skip(self, key))]
    pub async fn dht_get_value(&self, key: &[u8], timeout: Option<Duration>) -> Result<Vec<u8>> {
        self.dht_single(DhtRequest::new(DhtRequestType::GetValue).key(key).timeout(timeout))
            .await?
            .into_value()
    }

    #[instrument(skip(self, key, value), fields(len = value.len()))]
    pub async fn dht_put_value(&self, key: &[u8], value: &[u8], timeout: Option<Duration>) -> Result<()> {
        let request = DhtRequest::new(DhtRequestType::PutValue)
            .key(key)
            .value(value)
            .timeout(timeout);
        self.transact(&request.encode(), |_| Ok(())).await
    }

    /// Announce that this node provides `cid`
    #[instrument(skip(self, cid))]
    pub async fn dht_provide(&self, cid: &[u8], timeout: Option<Duration>) -> Result<()> {
        let request = DhtRequest::new(DhtRequestType::Provide).cid(cid).timeout(timeout);
        self.transact(&request.encode(), |_| Ok(())).await
    }

    #[instrument(skip(self), fields(peer = %peer))]
    pub async fn dht_find_peers_connected_to_peer(
        &self,
        peer: &PeerId,
        timeout: Option<Duration>,
    ) -> Result<Vec<PeerInfo>> {
        let request = DhtRequest::new(DhtRequestType::FindPeersConnectedToPeer)
            .peer(peer)
            .timeout(timeout);
        self.dht_stream(request)
            .await?
            .into_iter()
            .map(DhtResponse::into_peer)
            .collect()
    }

    /// Peers closest to `key`; each value is a raw peer id
    #[instrument(skip(self, key))]
    pub async fn dht_get_closest_peers(&self, key: &[u8], timeout: Option<Duration>) -> Result<Vec<PeerId>> {
        let request = DhtRequest::new(DhtRequestType::GetClosestPeers)
            .key(key)
            .timeout(timeout);
        self.dht_stream(request)
            .await?
            .into_iter()
            .map(|r| r.into_value().map(PeerId::from_bytes))
            .collect()
    }

    /// Up to `count` providers of `cid`
    #[instrument(skip(self, cid))]
    pub async fn dht_find_providers(
        &self,
        cid: &[u8],
        count: u32,
        timeout: Option<Duration>,
    ) -> Result<Vec<PeerInfo>> {
        let request = DhtRequest::new(DhtRequestType::FindProviders)
            .cid(cid)
            .count(count)
            .timeout(timeout);
        self.dht_stream(request)
            .await?
            .into_iter()
            .map(DhtResponse::into_peer)
            .collect()
    }

    /// Every value found for `key` while searching
    #[instrument(skip(self, key))]
    pub async fn dht_search_value(&self, key: &[u8], timeout: Option<Duration>) -> Result<Vec<Vec<u8>>> {
        let request = DhtRequest::new(DhtRequestType::SearchValue)
            .key(key)
            .timeout(timeout);
        self.dht_stream(request)
            .await?
            .into_iter()
            .map(DhtResponse::into_value)
            .collect()
    }
}
