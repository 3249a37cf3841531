//! State command implementations.

use crate::workspace::Workspace;
use docmirror_core::DocumentStore;
use docmirror_engine::{ConcurrentPassPolicy, SyncConfig, SyncEngine};
use serde::Serialize;

/// One persisted pair state.
#[derive(Debug, Serialize)]
pub struct StateEntry {
    /// Store identity.
    pub store_id: String,
    /// Target identity.
    pub target_id: String,
    /// Watermark of the last successful pass.
    pub watermark: u64,
    /// Predicate text of the last successful pass.
    pub predicate: String,
}

/// Prints every persisted pair state.
pub fn show(workspace: &Workspace, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    let entries: Vec<StateEntry> = workspace
        .state_store()?
        .entries()?
        .into_iter()
        .map(|(key, state)| StateEntry {
            store_id: key.store_id,
            target_id: key.target_id,
            watermark: state.watermark.as_u64(),
            predicate: state.fingerprint.as_str().to_string(),
        })
        .collect();

    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&entries)?);
        }
        _ => {
            if entries.is_empty() {
                println!("No sync state at {}", workspace.state_path().display());
            }
            for entry in &entries {
                println!("{} -> {}", entry.store_id, entry.target_id);
                println!("  Watermark: {}", entry.watermark);
                println!("  Predicate: {}", entry.predicate);
            }
        }
    }
    Ok(())
}

/// Forgets the state of the pair (workspace store, `table`). Refuses while
/// a pass for the pair is running in another process.
pub fn reset(workspace: &Workspace, table: &str) -> Result<(), Box<dyn std::error::Error>> {
    let store = workspace.load_store()?;
    let config = SyncConfig::new().with_concurrent_pass(ConcurrentPassPolicy::Reject);
    let engine = SyncEngine::new(config, workspace.state_store()?)?;
    engine.reset(store.store_id(), table)?;
    println!(
        "Reset {} -> {table}; the next pass will reconcile fully",
        store.store_id()
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use docmirror_core::{PairKey, Predicate, SyncState, SyncStateStore, Watermark};
    use tempfile::TempDir;

    #[test]
    fn reset_refuses_while_the_pair_is_leased() {
        let dir = TempDir::new().unwrap();
        let ws = Workspace::open(dir.path()).unwrap();
        let store = ws.load_or_create_store("names").unwrap();
        ws.save_store(&store).unwrap();

        let key = PairKey::new("names", "people");
        let states = ws.state_store().unwrap();
        let saved = SyncState {
            watermark: Watermark::new(3),
            fingerprint: Predicate::new("@All").fingerprint(),
        };
        states.save(&key, &saved).unwrap();

        let lease = states.try_lease(&key).unwrap().unwrap();
        let err = reset(&ws, "people").unwrap_err();
        assert!(err.to_string().contains("in progress"), "{err}");
        assert_eq!(states.load(&key).unwrap(), Some(saved));

        drop(lease);
        reset(&ws, "people").unwrap();
        assert!(states.load(&key).unwrap().is_none());
    }
}
