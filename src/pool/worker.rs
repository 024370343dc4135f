//! Item worker: one identifier from fetch to checkpoint.
//!
//! Flow per item:
//! - skip if the checkpoint already has a final entry
//! - fetch the SKU name and its images
//! - normalize the name into the desired label
//! - write each image whose label needs changing
//! - persist the outcome before reporting it to the coordinator

use crate::checkpoint::CheckpointStore;
use crate::client::CatalogClient;
use crate::label::LabelNormalizer;
use crate::models::{AltSyncError, ImageFile, ItemId, ItemReport, LabelPolicy, Outcome, TransportError};
use std::sync::Arc;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Result of handing one identifier to a worker.
#[derive(Debug, Clone)]
pub enum ItemResult {
    /// The item was processed and its outcome persisted
    Done(ItemReport),
    /// The checkpoint already had a final entry; nothing was sent
    AlreadyTerminal(Outcome),
}

/// Conditions that stop a worker without a checkpoint entry.
#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("credential rejected by the catalog API")]
    Unauthorized,

    #[error("run cancelled")]
    Cancelled,

    #[error("checkpoint could not be saved: {0}")]
    Checkpoint(#[from] AltSyncError),
}

/// Processes single identifiers. Cheap to share across tasks.
pub struct ItemWorker {
    catalog: Arc<CatalogClient>,
    checkpoint: Arc<CheckpointStore>,
    normalizer: Arc<LabelNormalizer>,
    policy: LabelPolicy,
    retry_failed: bool,
    cancel: CancellationToken,
}

impl ItemWorker {
    pub fn new(
        catalog: Arc<CatalogClient>,
        checkpoint: Arc<CheckpointStore>,
        normalizer: Arc<LabelNormalizer>,
        policy: LabelPolicy,
        retry_failed: bool,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            catalog,
            checkpoint,
            normalizer,
            policy,
            retry_failed,
            cancel,
        }
    }

    /// Process one identifier.
    ///
    /// Per-item API failures become a `failed` outcome. Only a rejected
    /// credential, cancellation or a checkpoint write failure are errors.
    pub async fn process(&self, id: &ItemId) -> Result<ItemResult, WorkerError> {
        if let Some(previous) = self.checkpoint.outcome_of(id).await {
            if previous.is_terminal(self.retry_failed) {
                debug!(sku = %id, outcome = %previous, "Already in checkpoint, skipping");
                return Ok(ItemResult::AlreadyTerminal(previous));
            }
        }

        if self.cancel.is_cancelled() {
            return Err(WorkerError::Cancelled);
        }

        let record = match self.catalog.fetch_item(id).await {
            Ok(record) => record,
            Err(e) => return self.fail(id, None, e, 0).await,
        };

        let desired = self.normalizer.normalize(record.raw_name.as_deref());
        let targets: Vec<&ImageFile> = record
            .images
            .iter()
            .filter(|image| self.needs_update(image, &desired))
            .collect();

        if targets.is_empty() {
            debug!(
                sku = %id,
                ref_id = record.ref_id.as_deref().unwrap_or("-"),
                images = record.images.len(),
                label = %desired,
                "Labels already optimal"
            );
            return self.finish(id, Outcome::SkippedAlreadyOptimal, 0).await;
        }

        let mut writes = 0;
        for image in targets {
            if let Err(e) = self.catalog.update_image_label(id, image, &desired).await {
                return self.fail(id, Some(image.id), e, writes).await;
            }
            writes += 1;
            debug!(sku = %id, file_id = image.id, label = %desired, "Image label written");
        }

        info!(
            sku = %id,
            ref_id = record.ref_id.as_deref().unwrap_or("-"),
            writes,
            label = %desired,
            "Item updated"
        );
        self.finish(id, Outcome::Completed, writes).await
    }

    fn needs_update(&self, image: &ImageFile, desired: &str) -> bool {
        match self.policy {
            LabelPolicy::Replace => image.current_label() != Some(desired),
            LabelPolicy::FillMissing => image.current_label().is_none(),
        }
    }

    async fn finish(
        &self,
        id: &ItemId,
        outcome: Outcome,
        writes: usize,
    ) -> Result<ItemResult, WorkerError> {
        self.checkpoint.record(id, outcome, None).await?;
        Ok(ItemResult::Done(ItemReport {
            id: id.clone(),
            outcome,
            detail: None,
            writes,
        }))
    }

    async fn fail(
        &self,
        id: &ItemId,
        file_id: Option<u64>,
        error: TransportError,
        writes: usize,
    ) -> Result<ItemResult, WorkerError> {
        match error {
            TransportError::Unauthorized => return Err(WorkerError::Unauthorized),
            TransportError::Cancelled => return Err(WorkerError::Cancelled),
            _ => {}
        }

        let detail = match file_id {
            Some(file_id) => format!("image {file_id}: {error}"),
            None => error.to_string(),
        };
        warn!(sku = %id, kind = %error.kind(), writes, error = %detail, "Item failed");

        self.checkpoint
            .record(id, Outcome::Failed, Some(&error))
            .await?;
        Ok(ItemResult::Done(ItemReport {
            id: id.clone(),
            outcome: Outcome::Failed,
            detail: Some(detail),
            writes,
        }))
    }
}
