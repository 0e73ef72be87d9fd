//! Dump-scope command implementation.

use super::OpenedStore;
use std::path::Path;

/// Returns the scope JSON followed by the raw JSON of each event.
///
/// Events are returned undecoded, so scopes that fail to upload can still
/// be examined.
pub fn collect(
    store: &OpenedStore,
    scope_id: &str,
) -> Result<Vec<String>, Box<dyn std::error::Error>> {
    let scope = store
        .repo
        .get_event_scope(scope_id)?
        .ok_or_else(|| format!("Scope {scope_id} not found"))?;
    let mut lines = vec![scope.to_json()?];
    lines.extend(store.repo.get_events_json_from_scope(scope_id)?);
    Ok(lines)
}

/// Runs the dump-scope command.
pub fn run(path: &Path, scope_id: &str) -> Result<(), Box<dyn std::error::Error>> {
    let store = super::open(path)?;
    for line in collect(&store, scope_id)? {
        println!("{line}");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::test_support::seed;

    #[test]
    fn dumps_scope_then_events() {
        let dir = tempfile::tempdir().unwrap();
        let (closed, _) = seed(dir.path());
        let store = crate::commands::open(dir.path()).unwrap();

        let lines = collect(&store, &closed).unwrap();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].contains(&closed));
        assert!(lines[1].contains("CONSENT"));
    }

    #[test]
    fn unknown_scope_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        seed(dir.path());
        let store = crate::commands::open(dir.path()).unwrap();
        assert!(collect(&store, "nope").is_err());
    }
}
