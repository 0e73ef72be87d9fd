//! Compact command implementation.

use std::path::Path;
use tracing::info;

/// Runs the compact command.
pub fn run(path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    info!("Compacting store at {:?}", path);
    let store = super::open(path)?;
    store.events.compact()?;
    println!("Compaction complete");
    Ok(())
}

#[cfg(test)]
mod tests {
    use crate::commands::test_support::seed;
    use fieldsync_events::EventScopeType;

    #[test]
    fn compaction_keeps_live_scopes() {
        let dir = tempfile::tempdir().unwrap();
        let (closed, open) = seed(dir.path());
        {
            let store = crate::commands::open(dir.path()).unwrap();
            store.repo.delete_event_scope(&closed).unwrap();
        }

        super::run(dir.path()).unwrap();

        let store = crate::commands::open(dir.path()).unwrap();
        assert!(store.repo.get_event_scope(&closed).unwrap().is_none());
        assert!(store.repo.get_event_scope(&open).unwrap().is_some());
        assert_eq!(
            store
                .repo
                .source()
                .count_scopes(EventScopeType::Session)
                .unwrap(),
            1
        );
    }
}
