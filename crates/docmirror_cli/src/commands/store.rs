//! Store command implementations.

use crate::workspace::Workspace;
use docmirror_core::{DocumentId, DocumentStore, Predicate, Value};
use serde::Serialize;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

/// One listed document.
#[derive(Debug, Serialize)]
pub struct DocumentListing {
    /// Document ID.
    pub id: String,
    /// Current version.
    pub version: String,
    /// Field values.
    pub fields: docmirror_core::Fields,
}

/// Imports a JSON array of documents into the store.
pub fn import(
    workspace: &Workspace,
    file: &Path,
    store_id: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let store = workspace.load_or_create_store(store_id)?;
    let reader = BufReader::new(File::open(file)?);
    let ids = store.import_json(reader)?;
    workspace.save_store(&store)?;

    println!(
        "Imported {} documents into store {:?} ({} total)",
        ids.len(),
        store.store_id(),
        store.len()
    );
    Ok(())
}

/// Sets fields on one document.
pub fn update(
    workspace: &Workspace,
    id: &str,
    assignments: &[String],
) -> Result<(), Box<dyn std::error::Error>> {
    let id = parse_id(id)?;
    let parsed = assignments
        .iter()
        .map(|a| parse_assignment(a))
        .collect::<Result<Vec<_>, _>>()?;

    let store = workspace.load_store()?;
    let version = store.update(id, |fields| {
        for (name, value) in parsed {
            if value == Value::Null {
                fields.remove(&name);
            } else {
                fields.insert(name, value);
            }
        }
    })?;
    workspace.save_store(&store)?;

    println!("Updated {id} to {version}");
    Ok(())
}

/// Deletes documents, leaving tombstones.
pub fn delete(workspace: &Workspace, ids: &[String]) -> Result<(), Box<dyn std::error::Error>> {
    let ids = ids
        .iter()
        .map(|raw| parse_id(raw))
        .collect::<Result<Vec<_>, _>>()?;

    let store = workspace.load_store()?;
    for id in &ids {
        store.delete(*id)?;
    }
    workspace.save_store(&store)?;

    println!("Deleted {} documents", ids.len());
    Ok(())
}

/// Lists documents, optionally filtered by a formula.
pub fn list(
    workspace: &Workspace,
    predicate: Option<&str>,
    limit: Option<usize>,
    format: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let store = workspace.load_store()?;
    let mut ids = match predicate {
        Some(text) => store
            .evaluate_all(&Predicate::new(text))?
            .into_iter()
            .collect(),
        None => store.ids(),
    };
    ids.sort();

    let listings: Vec<DocumentListing> = ids
        .into_iter()
        .take(limit.unwrap_or(usize::MAX))
        .filter_map(|id| store.get(id).map(|doc| (id, doc)))
        .map(|(id, doc)| DocumentListing {
            id: id.to_string(),
            version: doc.version.to_string(),
            fields: doc.fields,
        })
        .collect();

    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&listings)?);
        }
        _ => {
            for doc in &listings {
                let fields: Vec<String> = doc
                    .fields
                    .iter()
                    .map(|(name, value)| format!("{name}={value}"))
                    .collect();
                println!("{} {:<16} {}", doc.id, doc.version, fields.join(" "));
            }
            println!();
            println!(
                "{} listed, {} live, {} tombstones",
                listings.len(),
                store.len(),
                store.tombstone_count()
            );
        }
    }
    Ok(())
}

/// Drops every tombstone up to the current watermark.
///
/// Pairs whose watermark predates the purge fall back to full
/// reconciliation on their next pass.
pub fn purge(workspace: &Workspace) -> Result<(), Box<dyn std::error::Error>> {
    let store = workspace.load_store()?;
    let horizon = store.current_watermark()?;
    let purged = store.purge_tombstones(horizon);
    workspace.save_store(&store)?;

    println!("Purged {purged} tombstones up to {horizon}");
    Ok(())
}

fn parse_id(raw: &str) -> Result<DocumentId, String> {
    raw.parse()
        .map_err(|e| format!("invalid document ID {raw:?}: {e}"))
}

/// Parses `Name=value`. The value is read as JSON if it parses, as text
/// otherwise; `Name=null` removes the field.
fn parse_assignment(raw: &str) -> Result<(String, Value), String> {
    let (name, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected Name=value, got {raw:?}"))?;
    let name = name.trim();
    if name.is_empty() {
        return Err(format!("empty field name in {raw:?}"));
    }
    let value = serde_json::from_str::<Value>(value).unwrap_or_else(|_| Value::text(value));
    Ok((name.to_string(), value))
}
