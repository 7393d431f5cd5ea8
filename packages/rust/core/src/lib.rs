//! Enrichment core for namex.
//!
//! This crate ties the page fetcher, the WHOIS resolver, and the record
//! store together into two schedulers sharing one [`enrichment::Enricher`]:
//! the in-process [`pipeline::run_pipeline`] and the queue-backed
//! [`queue::run_producer`] / [`queue::run_worker`] pair.

pub mod dispatcher;
pub mod enrichment;
pub mod pipeline;
pub mod queue;
pub mod sink;

#[cfg(test)]
mod testing;

pub use dispatcher::Dispatcher;
pub use enrichment::{Enricher, EnrichmentWorker};
pub use pipeline::{PipelineStats, ProgressReporter, SilentProgress, run_pipeline};
pub use sink::{ResultSink, StorageSink, split_keywords};
