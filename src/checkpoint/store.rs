//! Durable checkpoint store shared by all workers.
//!
//! Every `record` rewrites the whole document through a temp file and an
//! atomic rename, so the file on disk is always either the previous or the
//! new complete mapping.

use super::{CheckpointState, FailureDetail};
use crate::models::{AltSyncError, ItemId, Outcome, Result, TransportError};
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Checkpoint file plus its in-memory mapping.
///
/// The mapping in memory is only updated after the new document is on disk.
pub struct CheckpointStore {
    path: PathBuf,
    state: Mutex<CheckpointState>,
}

impl CheckpointStore {
    /// Open the checkpoint at `path`, starting empty if the file is absent.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let state = Self::load(&path)?;
        if !state.entries.is_empty() {
            let counts = state.counts();
            info!(
                path = %path.display(),
                completed = counts.completed,
                skipped = counts.skipped,
                failed = counts.failed,
                "Resuming from checkpoint"
            );
        }
        Ok(Self::with_state(path, state))
    }

    pub(crate) fn with_state(path: PathBuf, state: CheckpointState) -> Self {
        Self {
            path,
            state: Mutex::new(state),
        }
    }

    /// Read a checkpoint file without opening a store.
    ///
    /// A missing file is an empty mapping; an unreadable one is an error,
    /// never silently treated as empty.
    pub fn load(path: &Path) -> Result<CheckpointState> {
        let content = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(CheckpointState::new()),
            Err(e) => return Err(AltSyncError::io("reading checkpoint", e)),
        };
        CheckpointState::from_json(&content).map_err(|reason| AltSyncError::corrupt(path, reason))
    }

    /// Move an existing checkpoint aside so the next run starts fresh.
    ///
    /// Returns the backup path, or `None` when there was nothing to move.
    pub fn reset(path: &Path) -> Result<Option<PathBuf>> {
        if !path.exists() {
            return Ok(None);
        }
        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("checkpoint.json");
        let backup = path.with_file_name(format!(
            "{file_name}.{}.bak",
            chrono::Utc::now().format("%Y%m%dT%H%M%S")
        ));
        fs::rename(path, &backup).map_err(|e| AltSyncError::io("moving checkpoint aside", e))?;
        info!(backup = %backup.display(), "Previous checkpoint moved aside");
        Ok(Some(backup))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Copy of the current mapping.
    pub async fn snapshot(&self) -> CheckpointState {
        self.state.lock().await.clone()
    }

    /// Recorded outcome for `id`, if any.
    pub async fn outcome_of(&self, id: &ItemId) -> Option<Outcome> {
        self.state.lock().await.get(id).map(|e| e.outcome)
    }

    /// Record `outcome` for `id` and persist before returning.
    ///
    /// An already completed or skipped entry is left as is. Returns whether
    /// the entry was written.
    pub async fn record(
        &self,
        id: &ItemId,
        outcome: Outcome,
        error: Option<&TransportError>,
    ) -> Result<bool> {
        let mut guard = self.state.lock().await;

        let mut next = guard.clone();
        let failure = error.map(|e| FailureDetail {
            kind: e.kind(),
            message: e.to_string(),
        });
        if !next.apply(id, outcome, failure) {
            warn!(sku = %id, %outcome, "Checkpoint already final for item, not overwriting");
            return Ok(false);
        }

        let bytes = serde_json::to_vec_pretty(&next)
            .map_err(|e| AltSyncError::Internal(format!("Serializing checkpoint: {e}")))?;
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || write_atomic(&path, &bytes))
            .await
            .map_err(|e| AltSyncError::Internal(format!("Checkpoint writer panicked: {e}")))?
            .map_err(|e| AltSyncError::io("writing checkpoint", e))?;

        *guard = next;
        debug!(sku = %id, %outcome, "Checkpoint saved");
        Ok(true)
    }
}

/// Replace `path` with `data` so readers never observe a partial file.
///
/// Writes a uniquely named sibling, syncs it, then renames it over `path`.
pub fn write_atomic(path: &Path, data: &[u8]) -> io::Result<()> {
    let staged = stage(path, data)?;
    if let Err(e) = fs::rename(&staged, path) {
        let _ = fs::remove_file(&staged);
        return Err(e);
    }

    #[cfg(unix)]
    {
        let dir = match path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };
        // Best effort: some filesystems refuse fsync on directories
        if let Ok(dir) = File::open(dir) {
            let _ = dir.sync_all();
        }
    }

    Ok(())
}

/// Write `data` to a temp file next to `path` and sync it.
fn stage(path: &Path, data: &[u8]) -> io::Result<PathBuf> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }

    let temp_name = format!(
        ".{}.{}.tmp",
        path.file_name().and_then(|n| n.to_str()).unwrap_or("file"),
        uuid::Uuid::new_v4()
    );
    let temp_path = path.with_file_name(temp_name);

    let mut file = File::create(&temp_path)?;
    file.write_all(data)?;
    file.sync_all()?;
    Ok(temp_path)
}
