//! Offline checkpoint report.
//!
//! Summarizes a checkpoint file without touching the catalog API: totals per
//! outcome, success rate, failures grouped by kind and, given the input list,
//! how much is left to do.

use crate::checkpoint::{CheckpointState, OutcomeCounts};
use crate::models::{FailureKind, ItemId};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;

/// Failed identifiers sharing one failure kind.
#[derive(Debug, Clone, Serialize)]
pub struct FailureGroup {
    pub count: usize,
    pub items: Vec<ItemId>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CheckpointReport {
    pub counts: OutcomeCounts,

    /// Share of recorded items that ended completed or skipped
    pub success_rate: f64,

    /// Failed items by kind; `None` for entries written without one
    pub failures: BTreeMap<String, FailureGroup>,

    /// Identifiers from the input list still to be processed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pending: Option<usize>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_total: Option<usize>,

    pub updated_at: DateTime<Utc>,
}

impl CheckpointReport {
    /// Build a report from checkpoint state and, optionally, the input list.
    ///
    /// Pending counts treat `failed` as still to do.
    pub fn build(state: &CheckpointState, input: Option<&[ItemId]>) -> Self {
        let counts = state.counts();
        let total = counts.total();
        let success_rate = if total > 0 {
            (counts.completed + counts.skipped) as f64 / total as f64
        } else {
            0.0
        };

        let mut failures: BTreeMap<String, FailureGroup> = BTreeMap::new();
        for (id, entry) in state.failed_entries() {
            let key = entry
                .error_kind
                .map_or_else(|| "unknown".to_string(), |k: FailureKind| k.to_string());
            let group = failures.entry(key).or_insert_with(|| FailureGroup {
                count: 0,
                items: Vec::new(),
            });
            group.count += 1;
            group.items.push(id.clone());
        }

        Self {
            counts,
            success_rate,
            failures,
            pending: input.map(|ids| state.pending(ids, true).len()),
            input_total: input.map(<[ItemId]>::len),
            updated_at: state.updated_at,
        }
    }
}

impl fmt::Display for CheckpointReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Checkpoint last updated {}", self.updated_at.format("%Y-%m-%d %H:%M:%S UTC"))?;
        writeln!(f, "  completed:               {}", self.counts.completed)?;
        writeln!(f, "  skipped-already-optimal: {}", self.counts.skipped)?;
        writeln!(f, "  failed:                  {}", self.counts.failed)?;
        writeln!(f, "  success rate:            {:.1}%", self.success_rate * 100.0)?;

        if let (Some(pending), Some(total)) = (self.pending, self.input_total) {
            writeln!(f, "  pending:                 {pending} of {total} in input")?;
        }

        if !self.failures.is_empty() {
            writeln!(f, "Failures by kind:")?;
            for (kind, group) in &self.failures {
                let ids: Vec<&str> = group.items.iter().map(ItemId::as_str).collect();
                writeln!(f, "  {kind} ({}): {}", group.count, ids.join(", "))?;
            }
        }
        Ok(())
    }
}
