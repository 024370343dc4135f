//! altsync - bulk image alt-text updater for a VTEX catalog.
//!
//! ## Architecture
//!
//! - **Label Normalizer**: raw SKU name → alt-text label (pure)
//! - **Rate Limiter**: one global minimum spacing between requests
//! - **Resilient Transport**: bounded retry with backoff and `Retry-After`
//! - **Checkpoint Store**: per-SKU outcome, persisted atomically after each item
//! - **Item Worker**: fetch → normalize → compare → write → checkpoint
//! - **Coordinator**: bounded pool, run-wide cancellation, summary
//!
//! ## Failure model
//!
//! - Transient API failures are retried inside the transport
//! - Anything left over fails only that item
//! - A rejected credential or an unreadable checkpoint ends the run

pub mod checkpoint;
pub mod client;
pub mod label;
pub mod models;
pub mod pipeline;
pub mod pool;
pub mod report;

#[cfg(test)]
mod testing;

// Re-exports for convenience
pub use checkpoint::{CheckpointState, CheckpointStore};
pub use client::{CatalogClient, RateLimiter, ReqwestBackend, ResilientTransport};
pub use label::LabelNormalizer;
pub use models::{AltSyncError, Config, ItemId, Outcome, Result, RunDisposition, RunSummary};
pub use pipeline::{BulkUpdatePipeline, PipelineOptions};
pub use pool::ItemWorker;
pub use report::CheckpointReport;
