//! NATS JetStream work queue.
//!
//! One stream with work-queue retention and file storage holds the pending
//! records. All workers share one durable pull consumer with explicit acks;
//! each worker pulls a single message at a time. A message that is not acked
//! within `ack_wait` is redelivered by the server.

use std::time::Duration;

use async_nats::jetstream::{self, AckKind, consumer::pull, stream};
use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use namex_shared::{DomainRecord, NamexError, QueueConfig, Result};
use tracing::{debug, info, instrument};

use super::{WorkConsumer, WorkDelivery, WorkPublisher, encode_record};

/// How long one pull request waits for a message before it is re-issued.
const PULL_EXPIRY: Duration = Duration::from_secs(30);

/// Connected JetStream context plus the resolved queue settings.
#[derive(Clone)]
pub struct NatsQueue {
    context: jetstream::Context,
    config: QueueConfig,
}

impl NatsQueue {
    /// Connect to the server and make sure the stream exists.
    #[instrument(skip_all, fields(url = %config.url, stream = %config.stream))]
    pub async fn connect(config: &QueueConfig) -> Result<Self> {
        let client = async_nats::connect(config.url.as_str())
            .await
            .map_err(|e| NamexError::Queue(format!("connect to {}: {e}", config.url)))?;
        let context = jetstream::new(client);

        context
            .get_or_create_stream(stream::Config {
                name: config.stream.clone(),
                subjects: vec![config.subject.clone()],
                retention: stream::RetentionPolicy::WorkQueue,
                storage: stream::StorageType::File,
                ..Default::default()
            })
            .await
            .map_err(|e| NamexError::Queue(format!("stream {}: {e}", config.stream)))?;

        info!("jetstream queue ready");

        Ok(Self {
            context,
            config: config.clone(),
        })
    }

    /// Bind to the shared durable consumer, creating it on first use.
    pub async fn consumer(&self) -> Result<NatsConsumer> {
        let stream = self
            .context
            .get_stream(&self.config.stream)
            .await
            .map_err(|e| NamexError::Queue(format!("stream {}: {e}", self.config.stream)))?;

        let consumer = stream
            .get_or_create_consumer(
                &self.config.consumer,
                pull::Config {
                    durable_name: Some(self.config.consumer.clone()),
                    ack_policy: jetstream::consumer::AckPolicy::Explicit,
                    ack_wait: self.config.ack_wait,
                    filter_subject: self.config.subject.clone(),
                    ..Default::default()
                },
            )
            .await
            .map_err(|e| NamexError::Queue(format!("consumer {}: {e}", self.config.consumer)))?;

        debug!(consumer = %self.config.consumer, "bound durable consumer");
        Ok(NatsConsumer { consumer })
    }
}

#[async_trait]
impl WorkPublisher for NatsQueue {
    async fn publish(&self, record: &DomainRecord) -> Result<()> {
        let payload = Bytes::from(encode_record(record)?);
        self.context
            .publish(self.config.subject.clone(), payload)
            .await
            .map_err(|e| NamexError::Queue(format!("publish {}: {e}", record.id)))?
            .await
            .map_err(|e| NamexError::Queue(format!("publish ack {}: {e}", record.id)))?;
        Ok(())
    }
}

/// Pull consumer handing out one message per request.
pub struct NatsConsumer {
    consumer: jetstream::consumer::Consumer<pull::Config>,
}

#[async_trait]
impl WorkConsumer for NatsConsumer {
    async fn next(&mut self) -> Result<Option<Box<dyn WorkDelivery>>> {
        loop {
            let mut batch = self
                .consumer
                .batch()
                .max_messages(1)
                .expires(PULL_EXPIRY)
                .messages()
                .await
                .map_err(|e| NamexError::Queue(format!("pull: {e}")))?;

            match batch.next().await {
                Some(Ok(message)) => return Ok(Some(Box::new(NatsDelivery { message }))),
                Some(Err(e)) => return Err(NamexError::Queue(format!("pull: {e}"))),
                // Pull expired empty; ask again.
                None => continue,
            }
        }
    }
}

struct NatsDelivery {
    message: jetstream::Message,
}

#[async_trait]
impl WorkDelivery for NatsDelivery {
    fn payload(&self) -> &[u8] {
        &self.message.payload
    }

    fn attempt(&self) -> u64 {
        self.message
            .info()
            .map(|info| info.delivered.max(1) as u64)
            .unwrap_or(1)
    }

    async fn ack(self: Box<Self>) -> Result<()> {
        self.message
            .ack()
            .await
            .map_err(|e| NamexError::Queue(format!("ack: {e}")))
    }

    async fn nak(self: Box<Self>) -> Result<()> {
        self.message
            .ack_with(AckKind::Nak(None))
            .await
            .map_err(|e| NamexError::Queue(format!("nak: {e}")))
    }
}
