//! Workspace directory layout.

use docmirror_core::{CoreError, FieldSet};
use docmirror_engine::FileStateStore;
use docmirror_store::MemoryDocumentStore;
use docmirror_targets::{SqliteTarget, SqliteTargetConfig};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

const STORE_FILE: &str = "store.cbor";
const TARGET_FILE: &str = "target.db";
const STATE_FILE: &str = "state.cbor";

/// Errors opening workspace files.
#[derive(Debug, Error)]
pub enum WorkspaceError {
    /// The workspace has no store snapshot yet.
    #[error("no store at {0}; run `docmirror store import` first")]
    NoStore(PathBuf),

    /// A store, target or state file could not be opened or written.
    #[error(transparent)]
    Core(#[from] CoreError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// A directory holding a store snapshot, a SQLite target database and
/// the sync state file.
#[derive(Debug)]
pub struct Workspace {
    root: PathBuf,
}

impl Workspace {
    /// Opens a workspace, creating the directory if needed.
    pub fn open(root: &Path) -> Result<Self, WorkspaceError> {
        std::fs::create_dir_all(root)?;
        debug!(path = %root.display(), "opened workspace");
        Ok(Self {
            root: root.to_path_buf(),
        })
    }

    /// Path of the store snapshot.
    pub fn store_path(&self) -> PathBuf {
        self.root.join(STORE_FILE)
    }

    /// Path of the SQLite target database.
    pub fn target_path(&self) -> PathBuf {
        self.root.join(TARGET_FILE)
    }

    /// Path of the sync state file.
    pub fn state_path(&self) -> PathBuf {
        self.root.join(STATE_FILE)
    }

    /// Returns true if a store snapshot exists.
    pub fn has_store(&self) -> bool {
        self.store_path().exists()
    }

    /// Loads the store snapshot.
    pub fn load_store(&self) -> Result<MemoryDocumentStore, WorkspaceError> {
        let path = self.store_path();
        if !path.exists() {
            return Err(WorkspaceError::NoStore(path));
        }
        Ok(MemoryDocumentStore::load_snapshot(&path)?)
    }

    /// Loads the store snapshot, or creates an empty store named `store_id`.
    pub fn load_or_create_store(
        &self,
        store_id: &str,
    ) -> Result<MemoryDocumentStore, WorkspaceError> {
        if self.has_store() {
            self.load_store()
        } else {
            Ok(MemoryDocumentStore::new(store_id))
        }
    }

    /// Writes the store snapshot.
    pub fn save_store(&self, store: &MemoryDocumentStore) -> Result<(), WorkspaceError> {
        store.save_snapshot(&self.store_path())?;
        Ok(())
    }

    /// Opens the sync state file.
    pub fn state_store(&self) -> Result<FileStateStore, WorkspaceError> {
        Ok(FileStateStore::open(self.state_path())?)
    }

    /// Opens (creating if needed) the target table `table`.
    pub fn open_target(
        &self,
        table: &str,
        projection: FieldSet,
    ) -> Result<SqliteTarget, WorkspaceError> {
        let config =
            SqliteTargetConfig::new(self.target_path(), table).with_projection(projection);
        Ok(SqliteTarget::open(config)?)
    }
}
