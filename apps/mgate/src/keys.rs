use std::path::Path;

use mgate_core::caller::CallerEntry;

/// Reads the caller directory from a JSON array of entries:
/// `[{"id": "...", "api_key": "...", "usage": {...}, "policy": {...}}]`.
pub(crate) fn load_caller_entries(path: &Path) -> anyhow::Result<Vec<CallerEntry>> {
    let raw = std::fs::read(path)?;
    let entries: Vec<CallerEntry> = serde_json::from_slice(&raw)?;
    Ok(entries)
}
