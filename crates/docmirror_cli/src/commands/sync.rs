//! Sync command implementation.

use crate::workspace::Workspace;
use docmirror_core::{FieldSet, Predicate};
use docmirror_engine::{SyncConfig, SyncEngine, SyncError, SyncResult};
use std::time::Duration;

/// Arguments of one `sync` invocation.
#[derive(Debug, Clone)]
pub struct SyncArgs {
    /// Selection formula.
    pub predicate: String,
    /// Target table name.
    pub table: String,
    /// Projected fields; empty means all.
    pub fields: Vec<String>,
    /// Pass timeout.
    pub timeout_ms: Option<u64>,
    /// Advance the watermark despite failed operations.
    pub advance_on_failure: bool,
}

impl SyncArgs {
    fn projection(&self) -> FieldSet {
        if self.fields.is_empty() {
            FieldSet::All
        } else {
            FieldSet::named(self.fields.iter().map(|f| f.trim().to_string()))
        }
    }

    fn config(&self) -> SyncConfig {
        let config = SyncConfig::new().with_advance_on_partial_failure(self.advance_on_failure);
        match self.timeout_ms {
            Some(ms) => config.with_timeout(Duration::from_millis(ms)),
            None => config,
        }
    }
}

/// Runs one sync pass from the workspace store into a target table.
pub fn run(
    workspace: &Workspace,
    args: &SyncArgs,
    format: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let store = workspace.load_store()?;
    let target = workspace.open_target(&args.table, args.projection())?;
    let engine = SyncEngine::new(args.config(), workspace.state_store()?)?;

    match engine.sync(&store, &Predicate::new(&args.predicate), &target) {
        Ok(result) => {
            print_result(&result, format)?;
            if !result.state_advanced {
                return Err(format!(
                    "{} operations failed; sync state not advanced",
                    result.failures.len()
                )
                .into());
            }
            Ok(())
        }
        Err(SyncError::StateNotAdvanced { result, source }) => {
            print_result(&result, format)?;
            Err(format!("target updated but sync state not saved: {source}").into())
        }
        Err(err) => Err(err.into()),
    }
}

fn print_result(result: &SyncResult, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(result)?);
        }
        _ => {
            println!("Sync pass ({})", result.mode);
            println!("  Added:      {}", result.added);
            println!("  Updated:    {}", result.updated);
            println!("  Removed:    {}", result.removed);
            println!();
            println!("  Scan matched:   {}", result.matched_scan);
            println!("  Scan unmatched: {}", result.unmatched_scan);
            println!("  Scan deleted:   {}", result.deleted_scan);
            println!();
            match result.previous_watermark {
                Some(prev) => println!("  Watermark: {prev} -> {}", result.next_watermark),
                None => println!("  Watermark: (none) -> {}", result.next_watermark),
            }
            println!("  Duration:  {:?}", result.duration);
            if !result.failures.is_empty() {
                println!();
                println!("Failed operations:");
                for failure in &result.failures {
                    println!("  ✗ {} {}: {}", failure.operation, failure.id, failure.message);
                }
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use docmirror_core::{DocumentStore, PairKey, SyncStateStore, SyncTarget, Value};
    use tempfile::TempDir;

    fn args(predicate: &str) -> SyncArgs {
        SyncArgs {
            predicate: predicate.to_string(),
            table: "people".to_string(),
            fields: vec!["Lastname".to_string(), " City ".to_string()],
            timeout_ms: None,
            advance_on_failure: false,
        }
    }

    #[test]
    fn projection_trims_names() {
        let projection = args("@All").projection();
        assert!(projection.contains("City"));
        assert!(!projection.contains("Form"));
    }

    #[test]
    fn passes_resume_across_invocations() {
        let dir = TempDir::new().unwrap();
        let ws = Workspace::open(dir.path()).unwrap();
        let store = ws.load_or_create_store("names").unwrap();
        let id = store.create(
            [
                ("Form".to_string(), Value::text("Person")),
                ("Lastname".to_string(), Value::text("Lovelace")),
            ]
            .into(),
        );
        ws.save_store(&store).unwrap();

        let args = args(r#"Form = "Person""#);
        run(&ws, &args, "json").unwrap();
        run(&ws, &args, "json").unwrap();

        let target = ws.open_target("people", args.projection()).unwrap();
        assert!(target.existing_ids().unwrap().contains(&id));

        let states = ws.state_store().unwrap().entries().unwrap();
        assert_eq!(states.len(), 1);
        assert_eq!(states[0].1.watermark, store.current_watermark().unwrap());
    }

    #[test]
    fn waits_out_a_pass_held_by_another_process() {
        let dir = TempDir::new().unwrap();
        let ws = Workspace::open(dir.path()).unwrap();
        let store = ws.load_or_create_store("names").unwrap();
        store.create([("Form".to_string(), Value::text("Person"))].into());
        ws.save_store(&store).unwrap();

        // Another invocation holds the pair through the shared state file.
        let other = ws.state_store().unwrap();
        let lease = other.try_lease(&PairKey::new("names", "people")).unwrap().unwrap();

        let mut timed = args("@All");
        timed.timeout_ms = Some(80);
        let err = run(&ws, &timed, "json").unwrap_err();
        assert!(err.to_string().contains("timed out"), "{err}");
        assert!(ws.state_store().unwrap().entries().unwrap().is_empty());

        drop(lease);
        run(&ws, &timed, "json").unwrap();
        assert_eq!(ws.state_store().unwrap().entries().unwrap().len(), 1);
    }
}
