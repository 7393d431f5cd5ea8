//! In-process pipeline: dispatcher → enrichment pool → sink pool.
//!
//! Stages are connected by bounded channels, so a slow sink stalls the
//! workers and a slow worker pool stalls the dispatcher. Each pool has a
//! fixed number of tasks sharing one receiver.

use std::sync::Arc;
use std::time::{Duration, Instant};

use namex_shared::{DomainRecord, EnrichmentResult, PipelineConfig, Result};
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::dispatcher::Dispatcher;
use crate::enrichment::Enricher;
use crate::sink::ResultSink;

/// Totals of one pipeline run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PipelineStats {
    /// Records read from the store and handed to the workers.
    pub dispatched: u64,
    /// Results produced by the workers.
    pub enriched: u64,
    /// Of those, results with at least one failed step.
    pub degraded: u64,
    /// Results written to the store.
    pub persisted: u64,
    /// Results the sink rejected.
    pub failed: u64,
    pub elapsed: Duration,
}

/// Progress callback for reporting pipeline status.
pub trait ProgressReporter: Send + Sync {
    /// Called once, before the first record, with the pending count.
    fn started(&self, pending: u64);
    /// Called after the sink handled a result.
    fn record_done(&self, result: &EnrichmentResult, persisted: bool);
    /// Called when the run completes.
    fn finished(&self, stats: &PipelineStats);
}

/// No-op progress reporter for headless/test usage.
pub struct SilentProgress;

impl ProgressReporter for SilentProgress {
    fn started(&self, _pending: u64) {}
    fn record_done(&self, _result: &EnrichmentResult, _persisted: bool) {}
    fn finished(&self, _stats: &PipelineStats) {}
}

/// Run the pipeline until the dispatcher is exhausted or `shutdown` fires.
///
/// On shutdown the dispatcher stops emitting; records already buffered or in
/// flight still pass through enrichment and the sink before this returns.
/// A store read error in the dispatcher is returned after the pools drain.
#[instrument(skip_all, fields(workers = config.workers, sink_workers = config.sink_workers))]
pub async fn run_pipeline(
    dispatcher: Dispatcher,
    enricher: Arc<dyn Enricher>,
    sink: Arc<dyn ResultSink>,
    config: &PipelineConfig,
    progress: Arc<dyn ProgressReporter>,
    shutdown: CancellationToken,
) -> Result<PipelineStats> {
    let start = Instant::now();

    progress.started(dispatcher.count().await?);
    info!(buffer = config.buffer, "starting pipeline");

    let (record_tx, record_rx) = mpsc::channel::<DomainRecord>(config.buffer.max(1));
    let (result_tx, result_rx) = mpsc::channel::<EnrichmentResult>(config.buffer.max(1));

    // --- Enrichment pool ---
    let record_rx = Arc::new(Mutex::new(record_rx));
    let mut workers = JoinSet::new();
    for worker_id in 0..config.workers.max(1) {
        let rx = record_rx.clone();
        let tx = result_tx.clone();
        let enricher = enricher.clone();
        workers.spawn(async move {
            let (mut enriched, mut degraded) = (0u64, 0u64);
            loop {
                let next = rx.lock().await.recv().await;
                let Some(record) = next else { break };

                let result = enricher.enrich(&record).await;
                enriched += 1;
                if result.status.is_degraded() {
                    degraded += 1;
                }
                if tx.send(result).await.is_err() {
                    warn!(worker_id, "sink channel closed, worker stopping");
                    break;
                }
            }
            debug!(worker_id, enriched, "enrichment worker finished");
            (enriched, degraded)
        });
    }
    drop(result_tx);

    // --- Sink pool ---
    let result_rx = Arc::new(Mutex::new(result_rx));
    let mut sinks = JoinSet::new();
    for sink_id in 0..config.sink_workers.max(1) {
        let rx = result_rx.clone();
        let sink = sink.clone();
        let progress = progress.clone();
        sinks.spawn(async move {
            let (mut persisted, mut failed) = (0u64, 0u64);
            loop {
                let next = rx.lock().await.recv().await;
                let Some(result) = next else { break };

                match sink.persist(&result).await {
                    Ok(()) => {
                        persisted += 1;
                        progress.record_done(&result, true);
                    }
                    Err(e) => {
                        failed += 1;
                        warn!(domain_id = result.domain_id, error = %e, "failed to persist result");
                        progress.record_done(&result, false);
                    }
                }
            }
            debug!(sink_id, persisted, "sink task finished");
            (persisted, failed)
        });
    }

    // --- Dispatcher (runs here; dropping its sender drains the pools) ---
    let dispatched = dispatcher.run(record_tx, shutdown).await;

    let mut stats = PipelineStats::default();
    while let Some(joined) = workers.join_next().await {
        match joined {
            Ok((enriched, degraded)) => {
                stats.enriched += enriched;
                stats.degraded += degraded;
            }
            Err(e) => error!(error = %e, "enrichment task panicked"),
        }
    }
    while let Some(joined) = sinks.join_next().await {
        match joined {
            Ok((persisted, failed)) => {
                stats.persisted += persisted;
                stats.failed += failed;
            }
            Err(e) => error!(error = %e, "sink task panicked"),
        }
    }

    stats.dispatched = match dispatched {
        Ok(sent) => sent,
        Err(e) => {
            error!(error = %e, "dispatcher failed, run aborted");
            return Err(e);
        }
    };
    stats.elapsed = start.elapsed();

    info!(
        dispatched = stats.dispatched,
        enriched = stats.enriched,
        degraded = stats.degraded,
        persisted = stats.persisted,
        failed = stats.failed,
        elapsed_ms = stats.elapsed.as_millis(),
        "pipeline completed"
    );
    progress.finished(&stats);

    Ok(stats)
}
