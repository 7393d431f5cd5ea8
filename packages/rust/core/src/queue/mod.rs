//! Distributed mode: producer and workers decoupled by a durable work queue.
//!
//! The producer publishes one `{"id", "domain"}` message per pending record.
//! Each worker holds at most one unacknowledged delivery, enriches and
//! persists it, then acks. A delivery dropped without an ack (worker crash,
//! lost connection) goes back to the queue, so every record is processed at
//! least once.
//!
//! Two brokers implement the traits: [`nats::NatsQueue`] (JetStream) and
//! [`memory::MemoryBroker`] (single process, same semantics).

pub mod memory;
pub mod nats;

use async_trait::async_trait;
use namex_shared::{DomainRecord, NamexError, Result};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::dispatcher::Dispatcher;
use crate::enrichment::Enricher;
use crate::sink::ResultSink;

pub use memory::{MemoryBroker, MemoryConsumer};
pub use nats::{NatsConsumer, NatsQueue};

// ---------------------------------------------------------------------------
// Broker seams
// ---------------------------------------------------------------------------

/// Publishes work items; returns once the broker has confirmed storage.
#[async_trait]
pub trait WorkPublisher: Send + Sync {
    async fn publish(&self, record: &DomainRecord) -> Result<()>;
}

/// Pulls deliveries one at a time.
#[async_trait]
pub trait WorkConsumer: Send {
    /// Wait for the next delivery. `None` means the queue is closed for good.
    ///
    /// A consumer hands out a new delivery only after the previous one was
    /// settled or dropped.
    async fn next(&mut self) -> Result<Option<Box<dyn WorkDelivery>>>;
}

/// One delivered message. Dropping it unsettled makes it eligible for redelivery.
#[async_trait]
pub trait WorkDelivery: Send {
    fn payload(&self) -> &[u8];
    /// 1 on first delivery.
    fn attempt(&self) -> u64;
    /// Remove the message from the queue.
    async fn ack(self: Box<Self>) -> Result<()>;
    /// Ask for prompt redelivery.
    async fn nak(self: Box<Self>) -> Result<()>;
}

/// Encode a record as a queue message body.
pub fn encode_record(record: &DomainRecord) -> Result<Vec<u8>> {
    serde_json::to_vec(record).map_err(|e| NamexError::parse(format!("encode work item: {e}")))
}

// ---------------------------------------------------------------------------
// WorkItem
// ---------------------------------------------------------------------------

/// Lifecycle of a queued record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryState {
    Published,
    Delivered,
    Processing,
    Acked,
}

/// A record decoded from a delivery, with its attempt number and state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkItem {
    pub record: DomainRecord,
    pub attempt: u64,
    pub state: DeliveryState,
}

impl WorkItem {
    /// Decode a delivered payload; the item starts out `Delivered`.
    pub fn decode(payload: &[u8], attempt: u64) -> Result<Self> {
        let record = serde_json::from_slice(payload)
            .map_err(|e| NamexError::parse(format!("undecodable work item: {e}")))?;
        Ok(Self {
            record,
            attempt,
            state: DeliveryState::Delivered,
        })
    }

    /// Move to `next`, rejecting transitions the lifecycle does not allow.
    ///
    /// `Processing → Delivered` is the redelivery edge (crash or nak before ack).
    pub fn transition(&mut self, next: DeliveryState) -> Result<()> {
        use DeliveryState::*;
        let allowed = matches!(
            (self.state, next),
            (Published, Delivered)
                | (Delivered, Processing)
                | (Processing, Acked)
                | (Processing, Delivered)
        );
        if !allowed {
            return Err(NamexError::validation(format!(
                "work item {}: illegal transition {:?} -> {next:?}",
                self.record.id, self.state
            )));
        }
        self.state = next;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Producer
// ---------------------------------------------------------------------------

/// Publish every pending record. Returns the number of confirmed publishes.
///
/// A publish failure stops the run and is returned.
#[instrument(skip_all)]
pub async fn run_producer(
    dispatcher: &Dispatcher,
    publisher: &dyn WorkPublisher,
    buffer: usize,
    shutdown: CancellationToken,
) -> Result<u64> {
    let (tx, mut rx) = mpsc::channel::<DomainRecord>(buffer.max(1));

    let publishing = async move {
        let mut published = 0u64;
        while let Some(record) = rx.recv().await {
            publisher.publish(&record).await?;
            published += 1;
            debug!(id = record.id, domain = %record.domain, "published");
        }
        Ok::<u64, NamexError>(published)
    };

    let (dispatched, published) = tokio::join!(dispatcher.run(tx, shutdown), publishing);
    let published = published?;
    let dispatched = dispatched?;

    info!(dispatched, published, "producer finished");
    Ok(published)
}

// ---------------------------------------------------------------------------
// Worker
// ---------------------------------------------------------------------------

/// Totals of one queue worker run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorkerStats {
    /// Deliveries enriched and persisted, then acked.
    pub acked: u64,
    /// Of those, degraded results.
    pub degraded: u64,
    /// Persistence failures sent back for redelivery.
    pub retried: u64,
    /// Persistence failures on the final attempt, acked and dropped.
    pub dropped: u64,
    /// Undecodable payloads, acked and dropped.
    pub poisoned: u64,
}

/// Consume deliveries until the queue closes or `shutdown` fires.
///
/// Shutdown is checked between deliveries only: an in-flight delivery is
/// always enriched, persisted, and settled before this returns.
///
/// Settlement policy: success → ack; persistence failure → nak while
/// `attempt < max_deliveries`, ack on the final attempt; undecodable
/// payload → ack. Broker errors while waiting for a delivery are returned.
#[instrument(skip_all, fields(max_deliveries = max_deliveries))]
pub async fn run_worker<C>(
    consumer: &mut C,
    enricher: &dyn Enricher,
    sink: &dyn ResultSink,
    max_deliveries: u64,
    shutdown: CancellationToken,
) -> Result<WorkerStats>
where
    C: WorkConsumer + ?Sized,
{
    let mut stats = WorkerStats::default();
    info!("queue worker started");

    loop {
        let delivery = tokio::select! {
            biased;
            _ = shutdown.cancelled() => {
                info!("shutdown requested, worker stopping");
                break;
            }
            next = consumer.next() => match next? {
                Some(delivery) => delivery,
                None => {
                    info!("queue closed, worker stopping");
                    break;
                }
            },
        };

        process_delivery(delivery, enricher, sink, max_deliveries, &mut stats).await;
    }

    info!(
        acked = stats.acked,
        degraded = stats.degraded,
        retried = stats.retried,
        dropped = stats.dropped,
        poisoned = stats.poisoned,
        "queue worker finished"
    );
    Ok(stats)
}

async fn process_delivery(
    delivery: Box<dyn WorkDelivery>,
    enricher: &dyn Enricher,
    sink: &dyn ResultSink,
    max_deliveries: u64,
    stats: &mut WorkerStats,
) {
    let attempt = delivery.attempt();
    let mut item = match WorkItem::decode(delivery.payload(), attempt) {
        Ok(item) => item,
        Err(e) => {
            error!(
                attempt,
                error = %e,
                payload = %String::from_utf8_lossy(delivery.payload()),
                "dropping undecodable message"
            );
            stats.poisoned += 1;
            settle(delivery.ack().await, "ack");
            return;
        }
    };

    advance(&mut item, DeliveryState::Processing);
    debug!(id = item.record.id, domain = %item.record.domain, attempt, "processing");

    let result = enricher.enrich(&item.record).await;
    let degraded = result.status.is_degraded();

    match sink.persist(&result).await {
        Ok(()) => {
            settle(delivery.ack().await, "ack");
            advance(&mut item, DeliveryState::Acked);
            stats.acked += 1;
            if degraded {
                stats.degraded += 1;
            }
        }
        Err(e) if attempt < max_deliveries => {
            warn!(
                id = item.record.id,
                attempt,
                max_deliveries,
                error = %e,
                "persist failed, requesting redelivery"
            );
            settle(delivery.nak().await, "nak");
            advance(&mut item, DeliveryState::Delivered);
            stats.retried += 1;
        }
        Err(e) => {
            error!(
                id = item.record.id,
                domain = %item.record.domain,
                attempt,
                error = %e,
                "persist failed on final attempt, dropping message"
            );
            settle(delivery.ack().await, "ack");
            advance(&mut item, DeliveryState::Acked);
            stats.dropped += 1;
        }
    }
}

/// Step the item's lifecycle and log the new state.
fn advance(item: &mut WorkItem, next: DeliveryState) {
    match item.transition(next) {
        Ok(()) => debug!(
            id = item.record.id,
            attempt = item.attempt,
            state = ?item.state,
            "work item advanced"
        ),
        Err(e) => {
            error!(error = %e, "work item lifecycle violated");
            debug_assert!(false, "{e}");
        }
    }
}

/// A failed ack/nak leaves the message with the broker, which redelivers it.
fn settle(outcome: Result<()>, action: &'static str) {
    if let Err(e) = outcome {
        warn!(action, error = %e, "could not settle delivery, broker will redeliver");
    }
}
