//! Snapshot persistence and JSON import for the in-memory store.

use crate::memory::{MemoryDocumentStore, StoreState};
use docmirror_core::{CoreError, CoreResult, DocumentId, Fields};
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;
use tracing::info;

/// Snapshot file magic.
const SNAPSHOT_MAGIC: &str = "docmirror-store";

/// Current snapshot format version.
const SNAPSHOT_FORMAT: u16 = 1;

/// Key under which JSON imports may carry an explicit document ID.
pub const ID_KEY: &str = "$id";

#[derive(Serialize)]
struct SnapshotRef<'a> {
    magic: &'a str,
    format: u16,
    store_id: &'a str,
    state: &'a StoreState,
}

#[derive(Deserialize)]
struct Snapshot {
    magic: String,
    format: u16,
    store_id: String,
    state: StoreState,
}

impl MemoryDocumentStore {
    /// Writes the whole store, including tombstones and counters, to a CBOR file.
    ///
    /// The file is written next to `path` and renamed into place.
    pub fn save_snapshot(&self, path: &Path) -> CoreResult<()> {
        use docmirror_core::DocumentStore;

        let tmp = path.with_extension("tmp");
        {
            let state = self.state.read();
            let file = File::create(&tmp)?;
            let mut writer = BufWriter::new(file);
            let snapshot = SnapshotRef {
                magic: SNAPSHOT_MAGIC,
                format: SNAPSHOT_FORMAT,
                store_id: self.store_id(),
                state: &*state,
            };
            ciborium::into_writer(&snapshot, &mut writer)
                .map_err(|e| CoreError::codec(e.to_string()))?;
            writer.flush()?;
            writer.get_ref().sync_all()?;
        }
        fs::rename(&tmp, path)?;
        Ok(())
    }

    /// Loads a store from a snapshot written by `save_snapshot`.
    pub fn load_snapshot(path: &Path) -> CoreResult<Self> {
        let reader = BufReader::new(File::open(path)?);
        let snapshot: Snapshot =
            ciborium::from_reader(reader).map_err(|e| CoreError::codec(e.to_string()))?;

        if snapshot.magic != SNAPSHOT_MAGIC {
            return Err(CoreError::codec(format!(
                "{} is not a store snapshot",
                path.display()
            )));
        }
        if snapshot.format != SNAPSHOT_FORMAT {
            return Err(CoreError::codec(format!(
                "unsupported snapshot format {}",
                snapshot.format
            )));
        }

        info!(
            store = %snapshot.store_id,
            documents = snapshot.state.documents.len(),
            "loaded store snapshot"
        );
        Ok(Self::with_state(snapshot.store_id, snapshot.state))
    }

    /// Imports a JSON array of documents.
    ///
    /// Each element is an object of fields. An optional `"$id"` string
    /// (UUID) selects the document to create or replace; without it a new
    /// document is created. Returns the written IDs in input order.
    pub fn import_json<R: Read>(&self, reader: R) -> CoreResult<Vec<DocumentId>> {
        let docs: Vec<serde_json::Map<String, serde_json::Value>> =
            serde_json::from_reader(reader).map_err(|e| CoreError::codec(e.to_string()))?;

        let mut ids = Vec::with_capacity(docs.len());
        for mut object in docs {
            let id = match object.remove(ID_KEY) {
                Some(serde_json::Value::String(raw)) => raw
                    .parse::<DocumentId>()
                    .map_err(|e| CoreError::codec(format!("invalid {ID_KEY} {raw:?}: {e}")))?,
                Some(other) => {
                    return Err(CoreError::codec(format!(
                        "{ID_KEY} must be a string, got {other}"
                    )))
                }
                None => DocumentId::new(),
            };
            let fields: Fields = serde_json::from_value(serde_json::Value::Object(object))
                .map_err(|e| CoreError::codec(e.to_string()))?;
            self.put(id, fields);
            ids.push(id);
        }
        Ok(ids)
    }
}
