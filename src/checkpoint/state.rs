//! Checkpoint state: which identifiers have been handled and how.
//!
//! Invariants:
//! - An identifier has at most one entry
//! - `completed` and `skipped_already_optimal` entries are never replaced
//! - Entries are never removed within a run
//! - A `failed` entry may be replaced by a later attempt's outcome

use crate::models::{FailureKind, ItemId, Outcome};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const CHECKPOINT_VERSION: u32 = 1;

/// Outcome of one identifier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointEntry {
    pub outcome: Outcome,

    /// Error detail for failed entries
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<FailureKind>,

    /// Runs that recorded an outcome for this identifier
    #[serde(default = "default_attempts")]
    pub attempts: u32,

    pub recorded_at: DateTime<Utc>,
}

fn default_attempts() -> u32 {
    1
}

/// Details of a failed item, as stored in the checkpoint.
#[derive(Debug, Clone, PartialEq)]
pub struct FailureDetail {
    pub kind: FailureKind,
    pub message: String,
}

/// Entry counts per outcome.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct OutcomeCounts {
    pub completed: usize,
    pub skipped: usize,
    pub failed: usize,
}

impl OutcomeCounts {
    pub fn total(&self) -> usize {
        self.completed + self.skipped + self.failed
    }
}

/// Persisted checkpoint document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointState {
    #[serde(default = "default_version")]
    pub version: u32,

    pub entries: BTreeMap<ItemId, CheckpointEntry>,

    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,

    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
}

fn default_version() -> u32 {
    CHECKPOINT_VERSION
}

impl Default for CheckpointState {
    fn default() -> Self {
        Self::new()
    }
}

impl CheckpointState {
    pub fn new() -> Self {
        let now = Utc::now();
        Self {
            version: CHECKPOINT_VERSION,
            entries: BTreeMap::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Parse a checkpoint document.
    ///
    /// Also accepts the older `{"processed_skus": [...]}` layout, whose
    /// identifiers are taken as completed.
    pub fn from_json(content: &str) -> Result<Self, String> {
        let value: serde_json::Value =
            serde_json::from_str(content).map_err(|e| format!("invalid JSON: {e}"))?;

        if let Some(processed) = value.get("processed_skus") {
            return Self::from_legacy(processed);
        }

        let state: Self =
            serde_json::from_value(value).map_err(|e| format!("unexpected layout: {e}"))?;
        if state.version > CHECKPOINT_VERSION {
            return Err(format!(
                "written by a newer version (format {}, supported {})",
                state.version, CHECKPOINT_VERSION
            ));
        }
        Ok(state)
    }

    fn from_legacy(processed: &serde_json::Value) -> Result<Self, String> {
        let ids = processed
            .as_array()
            .ok_or_else(|| "processed_skus is not a list".to_string())?;

        let mut state = Self::new();
        for raw in ids {
            let token = match raw {
                serde_json::Value::String(s) => s.clone(),
                serde_json::Value::Number(n) => n.to_string(),
                other => return Err(format!("unexpected SKU id {other}")),
            };
            let id = ItemId::parse(&token).ok_or_else(|| format!("invalid SKU id {token:?}"))?;
            state.entries.insert(
                id,
                CheckpointEntry {
                    outcome: Outcome::Completed,
                    error: None,
                    error_kind: None,
                    attempts: 1,
                    recorded_at: state.created_at,
                },
            );
        }
        Ok(state)
    }

    pub fn get(&self, id: &ItemId) -> Option<&CheckpointEntry> {
        self.entries.get(id)
    }

    /// Whether `id` needs no further processing.
    pub fn is_terminal(&self, id: &ItemId, retry_failed: bool) -> bool {
        self.entries
            .get(id)
            .is_some_and(|e| e.outcome.is_terminal(retry_failed))
    }

    /// Record an outcome for `id`.
    ///
    /// Returns false, leaving the state untouched, when `id` already has a
    /// completed or skipped entry.
    pub fn apply(&mut self, id: &ItemId, outcome: Outcome, failure: Option<FailureDetail>) -> bool {
        let now = Utc::now();
        let attempts = match self.entries.get(id) {
            Some(existing) if existing.outcome.is_terminal(true) => return false,
            Some(existing) => existing.attempts + 1,
            None => 1,
        };

        let (error, error_kind) = match failure {
            Some(f) => (Some(f.message), Some(f.kind)),
            None => (None, None),
        };

        self.entries.insert(
            id.clone(),
            CheckpointEntry {
                outcome,
                error,
                error_kind,
                attempts,
                recorded_at: now,
            },
        );
        self.updated_at = now;
        true
    }

    /// Identifiers from `ids` that still need processing, in input order.
    pub fn pending<'a>(&self, ids: &'a [ItemId], retry_failed: bool) -> Vec<&'a ItemId> {
        ids.iter()
            .filter(|id| !self.is_terminal(id, retry_failed))
            .collect()
    }

    pub fn counts(&self) -> OutcomeCounts {
        let mut counts = OutcomeCounts::default();
        for entry in self.entries.values() {
            match entry.outcome {
                Outcome::Completed => counts.completed += 1,
                Outcome::SkippedAlreadyOptimal => counts.skipped += 1,
                Outcome::Failed => counts.failed += 1,
            }
        }
        counts
    }

    pub fn failed_entries(&self) -> impl Iterator<Item = (&ItemId, &CheckpointEntry)> {
        self.entries
            .iter()
            .filter(|(_, e)| e.outcome == Outcome::Failed)
    }
}
