//! Bulk alt-text update pipeline.
//!
//! Pipeline flow:
//! Identifier list → checkpoint filter → bounded worker pool → checkpoint → summary
//!
//! The coordinator is the only writer of `RunStats`; workers report back
//! through the join set and never touch the counters.

use crate::checkpoint::CheckpointStore;
use crate::client::{BackoffPolicy, CatalogClient, HttpBackend, RateLimiter, ResilientTransport};
use crate::label::LabelNormalizer;
use crate::models::{Config, ItemId, Outcome, Result, RunDisposition, RunStats, RunSummary};
use crate::pool::{ItemResult, ItemWorker, WorkerError};
use indicatif::{ProgressBar, ProgressStyle};
use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use std::time::Instant;
use tokio::task::{JoinError, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Run-level knobs for the coordinator.
#[derive(Debug, Clone, Copy)]
pub struct PipelineOptions {
    /// Maximum items in flight
    pub max_workers: usize,
    /// Reprocess items whose checkpoint outcome is `failed`
    pub retry_failed: bool,
    pub show_progress: bool,
}

impl PipelineOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            max_workers: config.workers.size,
            retry_failed: config.checkpoint.retry_failed,
            show_progress: true,
        }
    }
}

/// Coordinator for one bulk update run.
pub struct BulkUpdatePipeline {
    worker: Arc<ItemWorker>,
    catalog: Arc<CatalogClient>,
    checkpoint: Arc<CheckpointStore>,
    options: PipelineOptions,
    cancel: CancellationToken,
}

impl BulkUpdatePipeline {
    pub fn new(
        worker: Arc<ItemWorker>,
        catalog: Arc<CatalogClient>,
        checkpoint: Arc<CheckpointStore>,
        options: PipelineOptions,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            worker,
            catalog,
            checkpoint,
            options,
            cancel,
        }
    }

    /// Wire limiter, transport, catalog client and worker from configuration.
    pub fn from_config(
        config: &Config,
        backend: Arc<dyn HttpBackend>,
        checkpoint: Arc<CheckpointStore>,
        options: PipelineOptions,
        cancel: CancellationToken,
    ) -> Result<Self> {
        let limiter = Arc::new(RateLimiter::new(config.workers.rate_limit_delay()));
        let transport = ResilientTransport::new(
            backend,
            limiter,
            BackoffPolicy::from(&config.retry),
            cancel.clone(),
        );
        let catalog = Arc::new(CatalogClient::new(
            Arc::new(transport),
            config.catalog.resolved_base_url(),
        ));
        let normalizer = LabelNormalizer::new(&config.labels)?;

        let worker = ItemWorker::new(
            Arc::clone(&catalog),
            Arc::clone(&checkpoint),
            Arc::new(normalizer),
            config.labels.policy,
            options.retry_failed,
            cancel.clone(),
        );

        Ok(Self::new(
            Arc::new(worker),
            catalog,
            checkpoint,
            options,
            cancel,
        ))
    }

    pub fn catalog(&self) -> &Arc<CatalogClient> {
        &self.catalog
    }

    /// Process every pending identifier and report how the run ended.
    ///
    /// Per-item failures never end the run early; a rejected credential,
    /// a checkpoint write failure or cancellation does.
    pub async fn run(&self, ids: Vec<ItemId>) -> RunSummary {
        let start = Instant::now();
        let ids = unique_ids(ids);
        let snapshot = self.checkpoint.snapshot().await;
        let mut queue: VecDeque<ItemId> = snapshot
            .pending(&ids, self.options.retry_failed)
            .into_iter()
            .cloned()
            .collect();

        let mut stats = RunStats {
            total_items: ids.len(),
            already_done: ids.len() - queue.len(),
            ..Default::default()
        };
        let mut failures = Vec::new();
        let mut disposition = RunDisposition::Completed;

        if queue.is_empty() {
            info!(total = ids.len(), "All items already processed, nothing to do");
        } else {
            info!(
                total = ids.len(),
                pending = queue.len(),
                already_done = stats.already_done,
                workers = self.options.max_workers,
                "Starting bulk update"
            );
        }

        let pb = self.progress_bar(ids.len(), stats.already_done);
        let max_workers = self.options.max_workers.max(1);
        let mut join_set: JoinSet<(ItemId, std::result::Result<ItemResult, WorkerError>)> =
            JoinSet::new();

        loop {
            while join_set.len() < max_workers && !self.cancel.is_cancelled() {
                let Some(id) = queue.pop_front() else {
                    break;
                };
                stats.attempted += 1;
                let worker = Arc::clone(&self.worker);
                join_set.spawn(async move {
                    let result = worker.process(&id).await;
                    (id, result)
                });
            }

            let Some(joined) = join_set.join_next().await else {
                break;
            };

            match self.absorb(joined, &mut stats, &mut failures) {
                Ok(()) => {}
                Err(abort) => {
                    if !disposition.is_aborted() {
                        disposition = abort;
                    }
                    self.cancel.cancel();
                }
            }
            pb.set_position((stats.already_done + stats.finished()) as u64);
            pb.set_message(format!(
                "ok: {}, skipped: {}, failed: {}",
                stats.completed, stats.skipped, stats.failed
            ));
        }

        stats.not_started = queue.len();
        let unfinished = stats.attempted - stats.finished();
        if self.cancel.is_cancelled()
            && !disposition.is_aborted()
            && (stats.not_started > 0 || unfinished > 0)
        {
            disposition = RunDisposition::AbortedOther {
                reason: "interrupted".to_string(),
            };
        }

        stats.runtime_secs = start.elapsed().as_secs_f64();
        stats.finalize();
        pb.finish_with_message(format!("{disposition}"));

        let (requests, retries) = self.catalog.transport().stats();
        let limiter = self.catalog.transport().limiter().stats();
        info!(
            disposition = %disposition,
            completed = stats.completed,
            skipped = stats.skipped,
            failed = stats.failed,
            not_started = stats.not_started,
            labels_written = stats.labels_written,
            requests,
            retries,
            rate_limit_pauses = limiter.total_pauses,
            throughput = format!("{:.0}/hr", stats.throughput_per_hour),
            "Bulk update finished"
        );

        RunSummary {
            disposition,
            stats,
            failures,
        }
    }

    /// Fold one finished task into the counters.
    ///
    /// Returns the disposition to abort with when the task hit a run-fatal
    /// condition.
    fn absorb(
        &self,
        joined: std::result::Result<(ItemId, std::result::Result<ItemResult, WorkerError>), JoinError>,
        stats: &mut RunStats,
        failures: &mut Vec<(ItemId, String)>,
    ) -> std::result::Result<(), RunDisposition> {
        let (id, result) = match joined {
            Ok(pair) => pair,
            Err(e) => {
                error!(error = %e, "Worker task failed");
                return Err(RunDisposition::AbortedOther {
                    reason: format!("worker task failed: {e}"),
                });
            }
        };

        match result {
            Ok(ItemResult::Done(report)) => {
                stats.record(&report);
                if report.outcome == Outcome::Failed {
                    let detail = report.detail.clone().unwrap_or_default();
                    failures.push((id, detail));
                }
                Ok(())
            }
            Ok(ItemResult::AlreadyTerminal(outcome)) => {
                // Another path recorded it between snapshot and dispatch
                debug!(sku = %id, %outcome, "Item already final");
                stats.attempted -= 1;
                stats.already_done += 1;
                Ok(())
            }
            Err(WorkerError::Unauthorized) => {
                error!(sku = %id, "Credential rejected, stopping dispatch");
                Err(RunDisposition::AbortedUnauthorized)
            }
            Err(WorkerError::Cancelled) => {
                debug!(sku = %id, "Item cancelled before completion");
                Ok(())
            }
            Err(WorkerError::Checkpoint(e)) => {
                error!(sku = %id, error = %e, "Checkpoint write failed, stopping dispatch");
                Err(RunDisposition::AbortedOther {
                    reason: format!("checkpoint write failed: {e}"),
                })
            }
        }
    }

    fn progress_bar(&self, total: usize, done: usize) -> ProgressBar {
        if !self.options.show_progress {
            return ProgressBar::hidden();
        }
        let pb = ProgressBar::new(total as u64);
        match ProgressStyle::with_template(
            "[{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} ({percent}%) {msg}",
        ) {
            Ok(style) => pb.set_style(style.progress_chars("##-")),
            Err(e) => warn!(error = %e, "Invalid progress template, using default"),
        }
        pb.set_position(done as u64);
        pb
    }
}

/// Drop repeated identifiers, keeping first positions.
fn unique_ids(ids: Vec<ItemId>) -> Vec<ItemId> {
    let before = ids.len();
    let mut seen = HashSet::with_capacity(before);
    let ids: Vec<ItemId> = ids.into_iter().filter(|id| seen.insert(id.clone())).collect();
    if ids.len() < before {
        warn!(duplicates = before - ids.len(), "Dropped duplicate SKU ids");
    }
    ids
}
