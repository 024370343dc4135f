//! Item, outcome and run-level types.
//!
//! These types carry one identifier from the input list through fetch,
//! comparison and write-back, and summarize the run at the end.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque catalog item identifier (a VTEX SKU id).
///
/// Unique within a run; never modified once read from the input list.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ItemId(String);

impl ItemId {
    /// Parse one token from the input list.
    ///
    /// Rejects tokens that cannot be placed in a URL path segment as-is.
    pub fn parse(token: &str) -> Option<Self> {
        let token = token.trim();
        if token.is_empty()
            || token
                .chars()
                .any(|c| c.is_whitespace() || c.is_control() || matches!(c, '/' | '?' | '#' | '%'))
        {
            return None;
        }
        Some(Self(token.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<u64> for ItemId {
    fn from(value: u64) -> Self {
        Self(value.to_string())
    }
}

/// One image attached to an item.
///
/// Fields other than id/label/text are kept verbatim so a write-back sends
/// the same payload the API returned, with only the label changed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageFile {
    #[serde(rename = "Id")]
    pub id: u64,

    #[serde(rename = "Label", default)]
    pub label: Option<String>,

    #[serde(rename = "Text", default)]
    pub text: Option<String>,

    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl ImageFile {
    /// Current label, with whitespace-only labels treated as absent.
    pub fn current_label(&self) -> Option<&str> {
        self.label.as_deref().filter(|l| !l.trim().is_empty())
    }

    /// Copy of this image with both alt-text fields set to `label`.
    pub fn relabeled(&self, label: &str) -> Self {
        Self {
            label: Some(label.to_string()),
            text: Some(label.to_string()),
            ..self.clone()
        }
    }
}

/// Current remote state of one item, owned by the worker processing it.
#[derive(Debug, Clone)]
pub struct ItemRecord {
    pub id: ItemId,
    /// Merchant reference, for logging only
    pub ref_id: Option<String>,
    /// Raw name the desired label is derived from
    pub raw_name: Option<String>,
    pub images: Vec<ImageFile>,
}

/// Final outcome of processing one identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    /// At least one label was written and every write succeeded
    Completed,
    /// Every label already matched; nothing was written
    SkippedAlreadyOptimal,
    /// A fetch or write failed permanently or exhausted its retries
    Failed,
}

impl Outcome {
    /// Whether an item with this outcome is done for good.
    ///
    /// `Failed` is terminal only when the operator opted out of retrying.
    pub fn is_terminal(self, retry_failed: bool) -> bool {
        match self {
            Self::Completed | Self::SkippedAlreadyOptimal => true,
            Self::Failed => !retry_failed,
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Completed => "completed",
            Self::SkippedAlreadyOptimal => "skipped-already-optimal",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// What a worker reports back to the coordinator for one item.
#[derive(Debug, Clone)]
pub struct ItemReport {
    pub id: ItemId,
    pub outcome: Outcome,
    /// Error detail for failed items
    pub detail: Option<String>,
    /// Labels written during this attempt
    pub writes: usize,
}

/// How the run ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "disposition", rename_all = "snake_case")]
pub enum RunDisposition {
    Completed,
    AbortedUnauthorized,
    AbortedOther { reason: String },
}

impl RunDisposition {
    pub fn is_aborted(&self) -> bool {
        !matches!(self, Self::Completed)
    }
}

impl fmt::Display for RunDisposition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Completed => f.write_str("completed"),
            Self::AbortedUnauthorized => f.write_str("aborted-unauthorized"),
            Self::AbortedOther { reason } => write!(f, "aborted-other ({reason})"),
        }
    }
}

/// Counters for one run, updated only by the coordinator.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunStats {
    /// Identifiers in the input list after deduplication
    pub total_items: usize,

    /// Identifiers skipped because the checkpoint already had them
    pub already_done: usize,

    /// Items handed to a worker
    pub attempted: usize,

    pub completed: usize,

    pub skipped: usize,

    pub failed: usize,

    /// Pending items never started because the run was aborted
    pub not_started: usize,

    /// Labels written across all items
    pub labels_written: usize,

    pub runtime_secs: f64,

    /// Finished items per hour
    pub throughput_per_hour: f64,
}

impl RunStats {
    /// Items that reached a recorded outcome in this run.
    pub fn finished(&self) -> usize {
        self.completed + self.skipped + self.failed
    }

    /// Fold one worker report into the counters.
    pub fn record(&mut self, report: &ItemReport) {
        match report.outcome {
            Outcome::Completed => self.completed += 1,
            Outcome::SkippedAlreadyOptimal => self.skipped += 1,
            Outcome::Failed => self.failed += 1,
        }
        self.labels_written += report.writes;
    }

    /// Calculate derived stats.
    pub fn finalize(&mut self) {
        if self.runtime_secs > 0.0 {
            self.throughput_per_hour = self.finished() as f64 / self.runtime_secs * 3600.0;
        }
    }
}

/// End-of-run report produced by the coordinator.
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub disposition: RunDisposition,
    pub stats: RunStats,
    /// Items that failed in this run, with their error detail
    pub failures: Vec<(ItemId, String)>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_item_id_parse() {
        assert_eq!(ItemId::parse("  12345 ").unwrap().as_str(), "12345");
        assert!(ItemId::parse("").is_none());
        assert!(ItemId::parse("12 34").is_none());
        assert!(ItemId::parse("12/34").is_none());
        assert!(ItemId::parse("12?x=1").is_none());
    }

    #[test]
    fn test_image_roundtrip_preserves_unknown_fields() {
        let raw = r#"{"Id": 7, "Label": null, "Name": "front", "IsMain": true, "Url": "https://x/y.jpg"}"#;
        let image: ImageFile = serde_json::from_str(raw).unwrap();
        assert_eq!(image.id, 7);
        assert_eq!(image.current_label(), None);

        let relabeled = serde_json::to_value(image.relabeled("dipirona 500mg")).unwrap();
        assert_eq!(relabeled["Label"], "dipirona 500mg");
        assert_eq!(relabeled["Text"], "dipirona 500mg");
        assert_eq!(relabeled["Name"], "front");
        assert_eq!(relabeled["IsMain"], true);
    }

    #[test]
    fn test_blank_label_counts_as_missing() {
        let image: ImageFile = serde_json::from_str(r#"{"Id": 1, "Label": "   "}"#).unwrap();
        assert_eq!(image.current_label(), None);
    }

    #[test]
    fn test_failed_terminality_follows_retry_flag() {
        assert!(Outcome::Completed.is_terminal(true));
        assert!(Outcome::SkippedAlreadyOptimal.is_terminal(true));
        assert!(!Outcome::Failed.is_terminal(true));
        assert!(Outcome::Failed.is_terminal(false));
    }

    #[test]
    fn test_outcome_serializes_snake_case() {
        assert_eq!(
            serde_json::to_string(&Outcome::SkippedAlreadyOptimal).unwrap(),
            r#""skipped_already_optimal""#
        );
    }

    #[test]
    fn test_run_stats_record_and_finalize() {
        let mut stats = RunStats::default();
        let id = ItemId::from(1);
        stats.record(&ItemReport {
            id: id.clone(),
            outcome: Outcome::Completed,
            detail: None,
            writes: 3,
        });
        stats.record(&ItemReport {
            id,
            outcome: Outcome::Failed,
            detail: Some("boom".into()),
            writes: 0,
        });
        stats.runtime_secs = 3600.0;
        stats.finalize();

        assert_eq!(stats.finished(), 2);
        assert_eq!(stats.labels_written, 3);
        assert!((stats.throughput_per_hour - 2.0).abs() < f64::EPSILON);
    }
}
