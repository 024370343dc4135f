//! Identifier list I/O.

use crate::checkpoint::{CheckpointState, write_atomic};
use crate::models::{AltSyncError, ItemId, Result};
use std::collections::HashSet;
use std::fs;
use std::path::Path;
use tracing::{info, warn};

/// Classification of one input line.
enum Line {
    Ignored,
    Item(ItemId),
    Invalid,
}

fn classify(line: &str) -> Line {
    let trimmed = line.trim();
    if trimmed.is_empty() || trimmed.starts_with('#') {
        return Line::Ignored;
    }
    match ItemId::parse(trimmed) {
        Some(id) => Line::Item(id),
        None => Line::Invalid,
    }
}

/// Parse a line-delimited identifier list.
///
/// Blank lines and `#` comments are ignored, invalid lines are skipped with
/// a warning, and duplicates keep their first position.
pub fn parse_item_ids(content: &str) -> Vec<ItemId> {
    let mut seen = HashSet::new();
    let mut ids = Vec::new();
    let mut duplicates = 0usize;

    for (line_num, line) in content.lines().enumerate() {
        match classify(line) {
            Line::Ignored => {}
            Line::Invalid => {
                warn!(line = line_num + 1, content = line.trim(), "Skipping invalid SKU id");
            }
            Line::Item(id) => {
                if seen.insert(id.clone()) {
                    ids.push(id);
                } else {
                    duplicates += 1;
                }
            }
        }
    }

    if duplicates > 0 {
        warn!(duplicates, "Dropped duplicate SKU ids");
    }
    ids
}

/// Load the identifier list from `path`.
pub fn load_item_ids(path: &Path) -> Result<Vec<ItemId>> {
    let content = fs::read_to_string(path).map_err(|e| AltSyncError::io("reading SKU list", e))?;
    let ids = parse_item_ids(&content);
    info!(path = %path.display(), count = ids.len(), "Loaded SKU list");
    Ok(ids)
}

/// Rewrite the identifier list without the items the checkpoint marks final.
///
/// Comments, blank lines and unparseable lines are kept. Returns how many
/// lines were dropped.
pub fn prune_input_file(path: &Path, state: &CheckpointState, retry_failed: bool) -> Result<usize> {
    let content = fs::read_to_string(path).map_err(|e| AltSyncError::io("reading SKU list", e))?;

    let mut kept = String::with_capacity(content.len());
    let mut dropped = 0usize;
    for line in content.lines() {
        if let Line::Item(id) = classify(line) {
            if state.is_terminal(&id, retry_failed) {
                dropped += 1;
                continue;
            }
        }
        kept.push_str(line);
        kept.push('\n');
    }

    if dropped > 0 {
        write_atomic(path, kept.as_bytes()).map_err(|e| AltSyncError::io("rewriting SKU list", e))?;
    }
    info!(path = %path.display(), dropped, "Pruned SKU list");
    Ok(dropped)
}
