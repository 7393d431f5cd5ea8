//! Streams pending domain records out of the store.

use std::sync::Arc;

use namex_shared::{DomainRecord, Result};
use namex_storage::Storage;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Reads records awaiting enrichment and feeds them into a channel.
#[derive(Clone)]
pub struct Dispatcher {
    storage: Arc<Storage>,
    refresh_expired: bool,
}

impl Dispatcher {
    pub fn new(storage: Arc<Storage>, refresh_expired: bool) -> Self {
        Self {
            storage,
            refresh_expired,
        }
    }

    /// Number of records a run would emit right now.
    pub async fn count(&self) -> Result<u64> {
        self.storage.count_pending(self.refresh_expired).await
    }

    /// Emit every pending record into `tx`, in store order, and return how many were sent.
    ///
    /// Dropping `tx` on return closes the channel. Stops early when `shutdown`
    /// is cancelled or the receiver goes away. A store read error ends the run
    /// with that error.
    #[instrument(skip_all, fields(refresh_expired = self.refresh_expired))]
    pub async fn run(
        &self,
        tx: mpsc::Sender<DomainRecord>,
        shutdown: CancellationToken,
    ) -> Result<u64> {
        let mut pending = self.storage.pending(self.refresh_expired).await?;
        let mut sent = 0u64;

        loop {
            let record = tokio::select! {
                biased;
                _ = shutdown.cancelled() => {
                    info!(sent, "shutdown requested, dispatcher stopping");
                    break;
                }
                next = pending.next() => match next? {
                    Some(record) => record,
                    None => break,
                },
            };

            debug!(id = record.id, domain = %record.domain, "dispatching");

            tokio::select! {
                biased;
                _ = shutdown.cancelled() => {
                    info!(sent, "shutdown requested, dispatcher stopping");
                    break;
                }
                sent_ok = tx.send(record) => {
                    if sent_ok.is_err() {
                        warn!(sent, "downstream closed, dispatcher stopping");
                        break;
                    }
                    sent += 1;
                }
            }
        }

        info!(sent, "dispatch finished");
        Ok(sent)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::seeded_storage;

    #[tokio::test]
    async fn emits_all_pending_then_closes() {
        let (storage, ids) = seeded_storage(&["a.com", "b.com", "c.com"]).await;
        let dispatcher = Dispatcher::new(storage, false);
        assert_eq!(dispatcher.count().await.unwrap(), 3);

        let (tx, mut rx) = mpsc::channel(8);
        let sent = dispatcher.run(tx, CancellationToken::new()).await.unwrap();
        assert_eq!(sent, 3);

        let mut received = Vec::new();
        while let Some(record) = rx.recv().await {
            received.push(record.id);
        }
        assert_eq!(received, ids);
    }

    #[tokio::test]
    async fn cancelled_before_start_emits_nothing() {
        let (storage, _) = seeded_storage(&["a.com", "b.com"]).await;
        let dispatcher = Dispatcher::new(storage, false);
        let shutdown = CancellationToken::new();
        shutdown.cancel();

        let (tx, mut rx) = mpsc::channel(8);
        let sent = dispatcher.run(tx, shutdown).await.unwrap();
        assert_eq!(sent, 0);
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn stops_when_receiver_dropped() {
        let (storage, _) = seeded_storage(&["a.com", "b.com"]).await;
        let dispatcher = Dispatcher::new(storage, false);

        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        let sent = dispatcher.run(tx, CancellationToken::new()).await.unwrap();
        assert_eq!(sent, 0);
    }
}
