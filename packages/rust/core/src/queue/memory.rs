//! In-process broker with the same delivery semantics as the JetStream queue.
//!
//! Each consumer holds at most one unacknowledged delivery. A delivery that is
//! dropped without being acked goes back to the front of the queue with its
//! attempt counter kept, so the next pull redelivers it.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use bytes::Bytes;
use namex_shared::{DomainRecord, NamexError, Result};
use tokio::sync::{Notify, OwnedSemaphorePermit, Semaphore};

use super::{WorkConsumer, WorkDelivery, WorkPublisher, encode_record};

#[derive(Debug, Clone)]
struct StoredMessage {
    payload: Bytes,
    /// Times this message has been handed out.
    deliveries: u64,
}

#[derive(Default)]
struct QueueState {
    ready: VecDeque<StoredMessage>,
    unacked: usize,
}

#[derive(Default)]
struct BrokerInner {
    state: Mutex<QueueState>,
    changed: Notify,
    closed: AtomicBool,
}

impl BrokerInner {
    fn state(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn push(&self, payload: Bytes) {
        self.state().ready.push_back(StoredMessage {
            payload,
            deliveries: 0,
        });
        self.changed.notify_waiters();
    }

    fn settle(&self, requeue: Option<StoredMessage>) {
        {
            let mut state = self.state();
            state.unacked = state.unacked.saturating_sub(1);
            if let Some(message) = requeue {
                state.ready.push_front(message);
            }
        }
        self.changed.notify_waiters();
    }
}

/// Shared handle to an in-memory work queue. Cheap to clone.
#[derive(Clone, Default)]
pub struct MemoryBroker {
    inner: Arc<BrokerInner>,
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn publisher(&self) -> MemoryPublisher {
        MemoryPublisher {
            inner: self.inner.clone(),
        }
    }

    /// A new consumer with its own single in-flight slot.
    pub fn consumer(&self) -> MemoryConsumer {
        MemoryConsumer {
            inner: self.inner.clone(),
            slot: Arc::new(Semaphore::new(1)),
        }
    }

    /// Enqueue an arbitrary payload.
    pub fn publish_raw(&self, payload: impl Into<Bytes>) {
        self.inner.push(payload.into());
    }

    /// Close the queue. Publishing fails from now on; consumers get `None`
    /// once the queue is empty and nothing is in flight.
    pub fn close(&self) {
        self.inner.closed.store(true, Ordering::SeqCst);
        self.inner.changed.notify_waiters();
    }

    /// Messages waiting for a consumer.
    pub fn ready(&self) -> usize {
        self.inner.state().ready.len()
    }

    /// Messages delivered but not yet settled.
    pub fn unacked(&self) -> usize {
        self.inner.state().unacked
    }
}

/// Publishing side of a [`MemoryBroker`].
#[derive(Clone)]
pub struct MemoryPublisher {
    inner: Arc<BrokerInner>,
}

#[async_trait]
impl WorkPublisher for MemoryPublisher {
    async fn publish(&self, record: &DomainRecord) -> Result<()> {
        if self.inner.closed.load(Ordering::SeqCst) {
            return Err(NamexError::Queue("broker is closed".into()));
        }
        self.inner.push(Bytes::from(encode_record(record)?));
        Ok(())
    }
}

/// Consuming side of a [`MemoryBroker`], prefetch 1.
pub struct MemoryConsumer {
    inner: Arc<BrokerInner>,
    slot: Arc<Semaphore>,
}

#[async_trait]
impl WorkConsumer for MemoryConsumer {
    async fn next(&mut self) -> Result<Option<Box<dyn WorkDelivery>>> {
        // Held by the delivery until it is settled or dropped.
        let permit = self
            .slot
            .clone()
            .acquire_owned()
            .await
            .map_err(|e| NamexError::Queue(e.to_string()))?;

        loop {
            let changed = self.inner.changed.notified();
            {
                let mut state = self.inner.state();
                if let Some(mut message) = state.ready.pop_front() {
                    message.deliveries += 1;
                    state.unacked += 1;
                    return Ok(Some(Box::new(MemoryDelivery {
                        message,
                        inner: self.inner.clone(),
                        settled: false,
                        _permit: permit,
                    })));
                }
                if self.inner.closed.load(Ordering::SeqCst) && state.unacked == 0 {
                    return Ok(None);
                }
            }
            changed.await;
        }
    }
}

/// A message handed out by a [`MemoryConsumer`].
struct MemoryDelivery {
    message: StoredMessage,
    inner: Arc<BrokerInner>,
    settled: bool,
    _permit: OwnedSemaphorePermit,
}

#[async_trait]
impl WorkDelivery for MemoryDelivery {
    fn payload(&self) -> &[u8] {
        &self.message.payload
    }

    fn attempt(&self) -> u64 {
        self.message.deliveries
    }

    async fn ack(self: Box<Self>) -> Result<()> {
        let mut this = self;
        this.settled = true;
        this.inner.settle(None);
        Ok(())
    }

    async fn nak(self: Box<Self>) -> Result<()> {
        let mut this = self;
        this.settled = true;
        this.inner.settle(Some(this.message.clone()));
        Ok(())
    }
}

impl Drop for MemoryDelivery {
    fn drop(&mut self) {
        if !self.settled {
            tracing::debug!(
                attempt = self.message.deliveries,
                "delivery dropped without ack, requeueing"
            );
            self.inner.settle(Some(self.message.clone()));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    async fn publish(broker: &MemoryBroker, id: i64) {
        broker
            .publisher()
            .publish(&DomainRecord::new(id, format!("d{id}.com")))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn prefetch_is_one_per_consumer() {
        let broker = MemoryBroker::new();
        publish(&broker, 1).await;
        publish(&broker, 2).await;

        let mut consumer = broker.consumer();
        let first = consumer.next().await.unwrap().unwrap();

        // Second pull waits while the first delivery is outstanding.
        let blocked = tokio::time::timeout(Duration::from_millis(100), consumer.next()).await;
        assert!(blocked.is_err());
        assert_eq!(broker.ready(), 1);

        first.ack().await.unwrap();
        let second = consumer.next().await.unwrap().unwrap();
        assert_eq!(second.attempt(), 1);
        second.ack().await.unwrap();
        assert_eq!(broker.unacked(), 0);
    }

    #[tokio::test]
    async fn dropped_delivery_is_redelivered() {
        let broker = MemoryBroker::new();
        publish(&broker, 1).await;

        let mut dying = broker.consumer();
        let delivery = dying.next().await.unwrap().unwrap();
        assert_eq!(delivery.attempt(), 1);
        drop(delivery);
        drop(dying);

        let mut live = broker.consumer();
        let redelivered = live.next().await.unwrap().unwrap();
        assert_eq!(redelivered.attempt(), 2);
        assert_eq!(
            redelivered.payload(),
            br#"{"id":1,"domain":"d1.com"}"#.as_slice()
        );
        redelivered.ack().await.unwrap();
    }

    #[tokio::test]
    async fn nak_requeues_at_front() {
        let broker = MemoryBroker::new();
        publish(&broker, 1).await;
        publish(&broker, 2).await;

        let mut consumer = broker.consumer();
        consumer.next().await.unwrap().unwrap().nak().await.unwrap();

        let again = consumer.next().await.unwrap().unwrap();
        assert_eq!(again.payload(), br#"{"id":1,"domain":"d1.com"}"#.as_slice());
        assert_eq!(again.attempt(), 2);
    }

    #[tokio::test]
    async fn closed_queue_waits_for_in_flight() {
        let broker = MemoryBroker::new();
        publish(&broker, 1).await;
        broker.close();

        let mut holder = broker.consumer();
        let delivery = holder.next().await.unwrap().unwrap();

        // Another consumer must not see the end while a message could come back.
        let mut other = broker.consumer();
        let waiter = tokio::spawn(async move { other.next().await.map(|d| d.map(|d| d.attempt())) });
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!waiter.is_finished());

        drop(delivery);
        assert_eq!(waiter.await.unwrap().unwrap(), Some(2));
    }

    #[tokio::test]
    async fn closed_rejects_publish() {
        let broker = MemoryBroker::new();
        broker.close();
        let err = broker
            .publisher()
            .publish(&DomainRecord::new(1, "a.com"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "queue");

        let mut consumer = broker.consumer();
        assert!(consumer.next().await.unwrap().is_none());
    }
}
