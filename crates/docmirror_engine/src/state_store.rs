//! Watermark stores.
//!
//! ```text
//! <state file>        # CBOR: format version + every pair's SyncState
//! <state file>.lock   # advisory lock shared by every process using the file
//! <state file>.tmp    # written, synced, then renamed over the state file
//! <state file>.pairs/ # one lock file per pair, held for a whole pass
//! ```

use docmirror_core::{CoreError, CoreResult, PairKey, PairLease, SyncState, SyncStateStore};
use fs2::FileExt;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::{BufReader, BufWriter, ErrorKind, Write};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Current state file format version.
const STATE_FORMAT: u16 = 1;

/// Keeps sync state in memory. Lost when dropped.
#[derive(Debug, Default)]
pub struct MemoryStateStore {
    states: RwLock<BTreeMap<PairKey, SyncState>>,
}

impl MemoryStateStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns every stored pair, ordered by key.
    pub fn entries(&self) -> Vec<(PairKey, SyncState)> {
        self.states
            .read()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }
}

impl SyncStateStore for MemoryStateStore {
    fn load(&self, key: &PairKey) -> CoreResult<Option<SyncState>> {
        Ok(self.states.read().get(key).cloned())
    }

    fn save(&self, key: &PairKey, state: &SyncState) -> CoreResult<()> {
        self.states.write().insert(key.clone(), state.clone());
        Ok(())
    }

    fn clear(&self, key: &PairKey) -> CoreResult<()> {
        self.states.write().remove(key);
        Ok(())
    }
}

#[derive(Serialize, Deserialize)]
struct StateFile {
    format: u16,
    pairs: Vec<StateRecord>,
}

#[derive(Serialize, Deserialize)]
struct StateRecord {
    pair: PairKey,
    state: SyncState,
}

/// Keeps every pair's sync state in one CBOR file.
///
/// Each call re-reads the file under an advisory lock, so several
/// processes may share one state file. Writes replace the file atomically.
/// Pair leases are advisory locks on per-pair files, so a pass in one
/// process excludes a pass on the same pair in any other.
#[derive(Debug)]
pub struct FileStateStore {
    path: PathBuf,
    lock_path: PathBuf,
    pairs_dir: PathBuf,
    /// Serializes read-modify-write cycles within this process.
    write: Mutex<()>,
}

impl FileStateStore {
    /// Opens a state file, creating its directory if needed. The file
    /// itself is created on the first save.
    pub fn open(path: impl Into<PathBuf>) -> CoreResult<Self> {
        let path = path.into();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let lock_path = sidecar(&path, "lock");
        let pairs_dir = sidecar(&path, "pairs");
        Ok(Self {
            path,
            lock_path,
            pairs_dir,
            write: Mutex::new(()),
        })
    }

    /// Returns the state file path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns every stored pair, ordered by key.
    pub fn entries(&self) -> CoreResult<Vec<(PairKey, SyncState)>> {
        let lock = self.lock_file()?;
        lock.lock_shared()?;
        let states = self.read_all();
        FileExt::unlock(&lock)?;
        Ok(states?.into_iter().collect())
    }

    fn lock_file(&self) -> CoreResult<File> {
        Ok(OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&self.lock_path)?)
    }

    fn read_all(&self) -> CoreResult<BTreeMap<PairKey, SyncState>> {
        let file = match File::open(&self.path) {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(BTreeMap::new()),
            Err(e) => return Err(e.into()),
        };
        let contents: StateFile = ciborium::from_reader(BufReader::new(file)).map_err(|e| {
            CoreError::state_store(format!("corrupt state file {}: {e}", self.path.display()))
        })?;
        if contents.format != STATE_FORMAT {
            return Err(CoreError::state_store(format!(
                "unsupported state file format {}",
                contents.format
            )));
        }
        Ok(contents
            .pairs
            .into_iter()
            .map(|record| (record.pair, record.state))
            .collect())
    }

    fn write_all(&self, states: BTreeMap<PairKey, SyncState>) -> CoreResult<()> {
        let contents = StateFile {
            format: STATE_FORMAT,
            pairs: states
                .into_iter()
                .map(|(pair, state)| StateRecord { pair, state })
                .collect(),
        };
        let tmp = sidecar(&self.path, "tmp");
        {
            let mut writer = BufWriter::new(File::create(&tmp)?);
            ciborium::into_writer(&contents, &mut writer)
                .map_err(|e| CoreError::codec(e.to_string()))?;
            writer.flush()?;
            writer.get_ref().sync_all()?;
        }
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    fn modify(&self, f: impl FnOnce(&mut BTreeMap<PairKey, SyncState>)) -> CoreResult<()> {
        let _serial = self.write.lock();
        let lock = self.lock_file()?;
        lock.lock_exclusive()?;
        let result = self.read_all().and_then(|mut states| {
            f(&mut states);
            self.write_all(states)
        });
        FileExt::unlock(&lock)?;
        result
    }
}

impl SyncStateStore for FileStateStore {
    fn load(&self, key: &PairKey) -> CoreResult<Option<SyncState>> {
        let lock = self.lock_file()?;
        lock.lock_shared()?;
        let states = self.read_all();
        FileExt::unlock(&lock)?;
        Ok(states?.remove(key))
    }

    fn save(&self, key: &PairKey, state: &SyncState) -> CoreResult<()> {
        self.modify(|states| {
            states.insert(key.clone(), state.clone());
        })?;
        debug!(pair = %key, watermark = %state.watermark, "sync state saved");
        Ok(())
    }

    fn clear(&self, key: &PairKey) -> CoreResult<()> {
        self.modify(|states| {
            states.remove(key);
        })
    }

    fn try_lease(&self, key: &PairKey) -> CoreResult<Option<PairLease>> {
        fs::create_dir_all(&self.pairs_dir)?;
        let path = self.pairs_dir.join(pair_lock_name(key));
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)?;
        match file.try_lock_exclusive() {
            Ok(()) => {
                debug!(pair = %key, "pair lease taken");
                Ok(Some(PairLease::holding(PairLock { file })))
            }
            Err(e) if e.raw_os_error() == fs2::lock_contended_error().raw_os_error() => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

/// Locked pair file; unlocked when dropped.
struct PairLock {
    file: File,
}

impl Drop for PairLock {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
    }
}

/// File name for a pair's lock. Bytes outside `[A-Za-z0-9.-]` are escaped
/// as `_xx`, so distinct pairs never share a file.
fn pair_lock_name(key: &PairKey) -> String {
    fn escape(out: &mut String, part: &str) {
        for byte in part.bytes() {
            if byte.is_ascii_alphanumeric() || byte == b'-' || byte == b'.' {
                out.push(char::from(byte));
            } else {
                out.push_str(&format!("_{byte:02x}"));
            }
        }
    }
    let mut name = String::new();
    escape(&mut name, &key.store_id);
    name.push('@');
    escape(&mut name, &key.target_id);
    name.push_str(".lock");
    name
}

/// `state.cbor` -> `state.cbor.<suffix>`
fn sidecar(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".");
    name.push(suffix);
    PathBuf::from(name)
}
