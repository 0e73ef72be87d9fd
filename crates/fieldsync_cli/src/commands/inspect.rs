//! Inspect command implementation.

use super::OpenedStore;
use fieldsync_events::{EventScopeType, Timestamp};
use fieldsync_store::{
    DownSyncOperationRepository, EventFilter, StoreResult, SyncProgressCache,
};
use serde::Serialize;
use std::path::Path;

/// Store inspection result.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InspectResult {
    /// Store path.
    pub path: String,
    /// Scope counts per type.
    pub scopes: Vec<ScopeStats>,
    /// Number of stored events.
    pub event_count: usize,
    /// Number of down-sync cursors.
    pub down_sync_operations: usize,
    /// End of the last successful sync.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_sync_time: Option<Timestamp>,
}

/// Scope counts for one scope type.
#[derive(Debug, Serialize)]
pub struct ScopeStats {
    /// Scope type.
    #[serde(rename = "type")]
    pub scope_type: EventScopeType,
    /// All scopes of the type.
    pub total: usize,
    /// Closed scopes, waiting for upload.
    pub closed: usize,
}

/// Gathers statistics of an opened store.
pub fn collect(path: &Path, store: &OpenedStore) -> StoreResult<InspectResult> {
    let source = store.repo.source();
    let mut scopes = Vec::with_capacity(EventScopeType::UPLOAD_ORDER.len());
    for scope_type in EventScopeType::UPLOAD_ORDER {
        scopes.push(ScopeStats {
            scope_type,
            total: source.count_scopes(scope_type)?,
            closed: source.count_closed_scopes(scope_type)?,
        });
    }
    Ok(InspectResult {
        path: path.display().to_string(),
        scopes,
        event_count: store.repo.local_count(&EventFilter::all())?,
        down_sync_operations: DownSyncOperationRepository::new(store.kv.clone())
            .load_all()?
            .len(),
        last_sync_time: SyncProgressCache::new(store.kv.clone())
            .read_last_successful_sync_time()?,
    })
}

/// Runs the inspect command.
pub fn run(path: &Path, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    let store = super::open(path)?;
    let result = collect(path, &store)?;

    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        _ => print_text_output(&result),
    }

    Ok(())
}

fn print_text_output(result: &InspectResult) {
    println!("FieldSync Store: {}", result.path);
    println!();
    println!("Scopes:");
    for stats in &result.scopes {
        println!(
            "  {:<10} {:>6} total, {:>6} closed",
            stats.scope_type.as_str(),
            stats.total,
            stats.closed
        );
    }
    println!();
    println!("Events:              {}", result.event_count);
    println!("Down-sync cursors:   {}", result.down_sync_operations);
    match result.last_sync_time {
        Some(time) => println!("Last sync:           {} ms", time.0),
        None => println!("Last sync:           never"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::test_support::seed;

    #[test]
    fn counts_open_and_closed_sessions() {
        let dir = tempfile::tempdir().unwrap();
        seed(dir.path());

        let store = crate::commands::open(dir.path()).unwrap();
        let result = collect(dir.path(), &store).unwrap();
        let sessions = &result.scopes[0];
        assert_eq!(sessions.scope_type, EventScopeType::Session);
        assert_eq!(sessions.total, 2);
        assert_eq!(sessions.closed, 1);
        assert_eq!(result.event_count, 2);
        assert_eq!(result.down_sync_operations, 0);
        assert!(result.last_sync_time.is_none());
    }

    #[test]
    fn missing_directory_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(crate::commands::open(&dir.path().join("absent")).is_err());
    }
}
