//! Progress command implementation.

use super::OpenedStore;
use fieldsync_events::{DownSyncOperation, Timestamp, UpSyncOperation};
use fieldsync_store::{
    DownSyncOperationRepository, StoreResult, SyncProgressCache, UpSyncOperationRepository,
};
use serde::Serialize;
use std::path::Path;

/// Durable sync state of a store.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressReport {
    /// Down-sync cursors, one per partition.
    pub down_sync: Vec<DownSyncOperation>,
    /// Up-sync state, one per project.
    pub up_sync: Vec<UpSyncOperation>,
    /// End of the last successful sync.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_sync_time: Option<Timestamp>,
}

/// Reads the sync state of an opened store.
pub fn collect(store: &OpenedStore) -> StoreResult<ProgressReport> {
    Ok(ProgressReport {
        down_sync: DownSyncOperationRepository::new(store.kv.clone()).load_all()?,
        up_sync: UpSyncOperationRepository::new(store.kv.clone()).load_all()?,
        last_sync_time: SyncProgressCache::new(store.kv.clone())
            .read_last_successful_sync_time()?,
    })
}

/// Runs the progress command.
pub fn run(path: &Path, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    let store = super::open(path)?;
    let report = collect(&store)?;

    match format {
        "json" => println!("{}", serde_json::to_string_pretty(&report)?),
        _ => print_text_output(&report),
    }
    Ok(())
}

fn print_text_output(report: &ProgressReport) {
    println!("Down-sync cursors:");
    if report.down_sync.is_empty() {
        println!("  (none)");
    }
    for op in &report.down_sync {
        println!(
            "  {:<40} {:?} last event {}",
            op.partition.storage_key(),
            op.state,
            op.last_event_id.as_deref().unwrap_or("-")
        );
    }
    println!();
    println!("Up-sync:");
    if report.up_sync.is_empty() {
        println!("  (none)");
    }
    for op in &report.up_sync {
        println!(
            "  {:<40} {}",
            op.project_id,
            op.last_state
                .map_or_else(|| "never run".to_string(), |s| format!("{s:?}"))
        );
    }
    println!();
    match report.last_sync_time {
        Some(time) => println!("Last sync: {} ms", time.0),
        None => println!("Last sync: never"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fieldsync_events::{DownSyncPartition, Modality, SyncOperationState};

    #[test]
    fn reports_stored_cursors() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = crate::commands::open_or_create(dir.path()).unwrap();
            let mut op =
                DownSyncOperation::new(DownSyncPartition::project("p1", vec![Modality::Face]));
            op.last_event_id = Some("r9".into());
            op.state = SyncOperationState::Complete;
            DownSyncOperationRepository::new(store.kv.clone())
                .save(&op)
                .unwrap();
            SyncProgressCache::new(store.kv.clone())
                .store_last_successful_sync_time(Timestamp(42))
                .unwrap();
        }

        let store = crate::commands::open(dir.path()).unwrap();
        let report = collect(&store).unwrap();
        assert_eq!(report.down_sync.len(), 1);
        assert_eq!(report.down_sync[0].last_event_id.as_deref(), Some("r9"));
        assert!(report.up_sync.is_empty());
        assert_eq!(report.last_sync_time, Some(Timestamp(42)));
    }
}
