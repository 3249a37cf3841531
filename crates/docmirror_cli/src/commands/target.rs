//! Target command implementations.

use crate::workspace::Workspace;
use docmirror_core::{DocumentStore, FieldSet, PairKey, SyncStateStore};
use serde::Serialize;

/// Target table statistics.
#[derive(Debug, Serialize)]
pub struct TargetStats {
    /// Database path.
    pub path: String,
    /// Table name.
    pub table: String,
    /// Rows in the table.
    pub rows: u64,
    /// Watermark of the last successful pass into this table, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub watermark: Option<u64>,
    /// Live documents in the workspace store.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub store_documents: Option<usize>,
}

/// Prints row counts and sync position for one table.
pub fn stats(
    workspace: &Workspace,
    table: &str,
    format: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let target = workspace.open_target(table, FieldSet::All)?;
    let mut stats = TargetStats {
        path: workspace.target_path().display().to_string(),
        table: table.to_string(),
        rows: target.count()?,
        watermark: None,
        store_documents: None,
    };

    if workspace.has_store() {
        let store = workspace.load_store()?;
        let key = PairKey::new(store.store_id(), table);
        stats.watermark = workspace
            .state_store()?
            .load(&key)?
            .map(|s| s.watermark.as_u64());
        stats.store_documents = Some(store.len());
    }

    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&stats)?);
        }
        _ => {
            println!("Target Statistics");
            println!("=================");
            println!("Database:  {}", stats.path);
            println!("Table:     {}", stats.table);
            println!("Rows:      {}", stats.rows);
            if let Some(docs) = stats.store_documents {
                println!("Store:     {docs} live documents");
            }
            match stats.watermark {
                Some(wm) => println!("Watermark: {wm}"),
                None => println!("Watermark: (never synced)"),
            }
        }
    }
    Ok(())
}
