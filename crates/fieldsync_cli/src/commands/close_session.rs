//! Close-session command implementation.

use super::OpenedStore;
use fieldsync_events::{ArtificialTerminationReason, EventScopeType};
use fieldsync_store::StoreResult;
use std::path::Path;
use tracing::info;

/// Closes every open session. Returns the ids of the closed sessions.
pub fn close(store: &OpenedStore, timed_out: bool) -> StoreResult<Vec<String>> {
    let open: Vec<String> = store
        .repo
        .source()
        .load_open_scopes(EventScopeType::Session)?
        .into_iter()
        .map(|scope| scope.id)
        .collect();
    let reason = timed_out.then_some(ArtificialTerminationReason::TimedOut);
    store.repo.close_current_session(reason)?;
    Ok(open)
}

/// Runs the close-session command.
pub fn run(path: &Path, timed_out: bool) -> Result<(), Box<dyn std::error::Error>> {
    info!("Closing open sessions in {:?}", path);
    let store = super::open(path)?;
    let closed = close(&store, timed_out)?;
    if closed.is_empty() {
        println!("No open session");
    }
    for id in closed {
        println!("Closed session {id}");
    }
    Ok(())
}
