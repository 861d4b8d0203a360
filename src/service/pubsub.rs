//! Pubsub calls and subscriptions.

use crate::core::codec::LengthPrefixedCodec;
use crate::core::peer::PeerId;
use crate::core::protobuf::ProtoReader;
use crate::error::Result;
use crate::protocol::message::{self, response_tags, PubsubMessage, PubsubRequestType};
use crate::service::client::DaemonApi;
use crate::transport::local::LocalStream;
use crate::utils::Metrics;
use futures::StreamExt;
use std::future::Future;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::task::JoinHandle;
use tokio_util::codec::Framed;
use tracing::{debug, info, instrument, warn};

/// Handle to a running subscription
#[derive(Debug)]
pub struct PubsubTicket {
    topic: String,
    task: JoinHandle<()>,
}

impl PubsubTicket {
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Stop receiving; the subscription stream is dropped with the task
    pub fn cancel(&self) {
        self.task.abort();
    }

    /// True once the callback asked to stop or the stream closed
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Wait for the receive loop to end on its own
    pub async fn join(self) {
        let _ = self.task.await;
    }
}

impl DaemonApi {
    /// Topics this node is subscribed to
    #[instrument(skip(self))]
    pub async fn pubsub_get_topics(&self) -> Result<Vec<String>> {
        let request = message::pubsub_request(PubsubRequestType::GetTopics, None, None);
        self.transact(&request, |reader| {
            match reader.enter_submessage(response_tags::PUBSUB)? {
                Some(pubsub) => pubsub.get_repeated_strings(1),
                None => Ok(Vec::new()),
            }
        })
        .await
    }

    /// Peers known to be subscribed to `topic`
    #[instrument(skip(self))]
    pub async fn pubsub_list_peers(&self, topic: &str) -> Result<Vec<PeerId>> {
        let request = message::pubsub_request(PubsubRequestType::ListPeers, Some(topic), None);
        self.transact(&request, |reader| {
            let Some(pubsub) = reader.enter_submessage(response_tags::PUBSUB)? else {
                return Ok(Vec::new());
            };
            Ok(pubsub
                .get_repeated_bytes(2)?
                .into_iter()
                .map(PeerId::from_bytes)
                .collect())
        })
        .await
    }

    #[instrument(skip(self, data), fields(len = data.len()))]
    pub async fn pubsub_publish(&self, topic: &str, data: &[u8]) -> Result<()> {
        let request = message::pubsub_request(PubsubRequestType::Publish, Some(topic), Some(data));
        self.transact(&request, |_| Ok(())).await
    }

    /// Subscribe to `topic` and feed each message to `callback` on a spawned task.
    ///
    /// The loop ends when `callback` returns `false` or the daemon closes the
    /// stream.
    #[instrument(skip(self, callback))]
    pub async fn pubsub_subscribe<F, Fut>(&self, topic: &str, callback: F) -> Result<PubsubTicket>
    where
        F: FnMut(PubsubMessage) -> Fut + Send + 'static,
        Fut: Future<Output = bool> + Send + 'static,
    {
        let request = message::pubsub_request(PubsubRequestType::Subscribe, Some(topic), None);
        let (stream, _) = self.open_transaction(&request).await?;
        info!(topic, "Subscribed");

        let task = tokio::spawn(receive_loop(
            topic.to_string(),
            stream,
            callback,
            Arc::clone(&self.metrics),
            self.max_message_size(),
        ));
        Ok(PubsubTicket {
            topic: topic.to_string(),
            task,
        })
    }
}

async fn receive_loop<F, Fut>(
    topic: String,
    stream: LocalStream,
    mut callback: F,
    metrics: Arc<Metrics>,
    max_message_size: usize,
) where
    F: FnMut(PubsubMessage) -> Fut + Send,
    Fut: Future<Output = bool> + Send,
{
    let mut framed = Framed::new(stream, LengthPrefixedCodec::new(max_message_size));
    while let Some(frame) = framed.next().await {
        let frame = match frame {
            Ok(frame) => frame,
            Err(e) => {
                warn!(topic = %topic, error = %e, "Subscription stream failed");
                break;
            }
        };
        let message = match PubsubMessage::from_proto(&ProtoReader::new(&frame)) {
            Ok(message) => message,
            Err(e) => {
                warn!(topic = %topic, error = %e, "Malformed pubsub message");
                break;
            }
        };
        metrics.pubsub_message();
        if !callback(message).await {
            debug!(topic = %topic, "Subscription callback asked to stop");
            break;
        }
    }
    let _ = framed.into_inner().shutdown().await;
    debug!(topic = %topic, "Subscription closed");
}
