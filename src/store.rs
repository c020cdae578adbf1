// File-backed record store: one JSON array file per collection

use crate::jsonfile::{self, LoadOutcome};
use crate::record::{self, Fields, Record};
use fs2::FileExt;
use serde::Deserialize;
use std::fs::{self, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Errors surfaced by store operations
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("record {0} not found")]
    NotFound(u64),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("collection file {} is corrupt: {reason}", path.display())]
    Corrupt { path: PathBuf, reason: String },

    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to serialize collection: {0}")]
    Json(#[from] serde_json::Error),

    #[error("store task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

impl StoreError {
    pub(crate) fn io(path: &Path, source: io::Error) -> Self {
        StoreError::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// What to do when a collection file exists but cannot be parsed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum CorruptPolicy {
    /// Treat the collection as empty; the first write backs up the bad file
    #[default]
    Recover,
    /// Fail every operation until the file is repaired by hand
    Refuse,
}

/// Records loaded under the lock, plus whether they came from a bad file
struct Snapshot {
    records: Vec<Record>,
    recovered: bool,
}

/// Durable CRUD over one JSON-array file
///
/// Every operation is a full load, mutate, save cycle against the file. The
/// cycle runs under an in-process mutex and an exclusive advisory lock on
/// `<file>.lock`, so concurrent writers in this or another process never
/// lose updates.
pub struct Store {
    path: PathBuf,
    lock_path: PathBuf,
    policy: CorruptPolicy,
    guard: Mutex<()>,
}

impl Store {
    /// Open a collection file, creating it as `[]` if absent
    pub fn open<P: AsRef<Path>>(path: P, policy: CorruptPolicy) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| StoreError::io(parent, e))?;
        }

        let store = Self {
            lock_path: jsonfile::sibling(&path, "lock"),
            path,
            policy,
            guard: Mutex::new(()),
        };

        store.with_lock(|| {
            if !store.path.exists() {
                jsonfile::write_records(&store.path, &[])?;
                info!(file = ?store.path, "Created empty collection file");
            }
            Ok(())
        })?;

        Ok(store)
    }

    /// Path of the collection file
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn policy(&self) -> CorruptPolicy {
        self.policy
    }

    /// Read the whole collection
    ///
    /// A missing file is an empty collection. A malformed file is an empty
    /// collection under `CorruptPolicy::Recover` and an error under `Refuse`.
    pub fn load(&self) -> Result<Vec<Record>> {
        self.with_lock(|| Ok(self.load_locked()?.records))
    }

    /// Overwrite the collection file with `records`
    pub fn save(&self, records: &[Record]) -> Result<()> {
        self.with_lock(|| jsonfile::write_records(&self.path, records))
    }

    // ========================================================================
    // CRUD API
    // ========================================================================

    /// Append a new record, assigning it the next id
    pub fn create(&self, fields: Fields) -> Result<Record> {
        self.with_lock(|| {
            let mut snapshot = self.load_locked()?;

            let id = record::next_id(&snapshot.records)
                .ok_or_else(|| StoreError::InvalidInput("id space exhausted".to_string()))?;
            let record = Record::new(id, fields);
            snapshot.records.push(record.clone());
            self.save_locked(&snapshot)?;

            debug!(file = ?self.path, id = record.id, "Created record");
            Ok(record)
        })
    }

    /// Every record, in insertion order
    pub fn read_all(&self) -> Result<Vec<Record>> {
        self.load()
    }

    /// First record with the given id
    pub fn get(&self, id: u64) -> Result<Record> {
        self.load()?
            .into_iter()
            .find(|r| r.id == id)
            .ok_or(StoreError::NotFound(id))
    }

    /// Overwrite the supplied fields of the first record with the given id
    ///
    /// An empty `partial` still rewrites the file and returns the record as-is.
    pub fn update(&self, id: u64, partial: &Fields) -> Result<Record> {
        self.with_lock(|| {
            let mut snapshot = self.load_locked()?;

            let record = snapshot
                .records
                .iter_mut()
                .find(|r| r.id == id)
                .ok_or(StoreError::NotFound(id))?;
            record.apply(partial);
            let updated = record.clone();

            self.save_locked(&snapshot)?;

            debug!(file = ?self.path, id, field_count = partial.len(), "Updated record");
            Ok(updated)
        })
    }

    /// Remove every record with the given id
    ///
    /// The file is only rewritten when something was removed.
    pub fn delete(&self, id: u64) -> Result<()> {
        self.with_lock(|| {
            let mut snapshot = self.load_locked()?;

            let before = snapshot.records.len();
            snapshot.records.retain(|r| r.id != id);
            if snapshot.records.len() == before {
                return Err(StoreError::NotFound(id));
            }

            self.save_locked(&snapshot)?;

            debug!(file = ?self.path, id, removed = before - snapshot.records.len(), "Deleted record");
            Ok(())
        })
    }

    // ========================================================================
    // Async wrappers (spawn_blocking)
    // ========================================================================
    // Every operation may wait on another process's file lock, so async
    // callers run it on the blocking pool.

    pub async fn read_all_async(self: Arc<Self>) -> Result<Vec<Record>> {
        self.blocking(|store| store.read_all()).await
    }

    pub async fn get_async(self: Arc<Self>, id: u64) -> Result<Record> {
        self.blocking(move |store| store.get(id)).await
    }

    pub async fn create_async(self: Arc<Self>, fields: Fields) -> Result<Record> {
        self.blocking(move |store| store.create(fields)).await
    }

    pub async fn update_async(self: Arc<Self>, id: u64, partial: Fields) -> Result<Record> {
        self.blocking(move |store| store.update(id, &partial)).await
    }

    pub async fn delete_async(self: Arc<Self>, id: u64) -> Result<()> {
        self.blocking(move |store| store.delete(id)).await
    }

    async fn blocking<R, F>(self: Arc<Self>, op: F) -> Result<R>
    where
        R: Send + 'static,
        F: FnOnce(&Store) -> Result<R> + Send + 'static,
    {
        tokio::task::spawn_blocking(move || op(&*self)).await?
    }

    // ========================================================================
    // Helper methods
    // ========================================================================

    fn with_lock<R>(&self, op: impl FnOnce() -> Result<R>) -> Result<R> {
        // The mutex guards no data, so a panicked holder leaves nothing to repair
        let _guard = self.guard.lock().unwrap_or_else(PoisonError::into_inner);

        let lock_file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&self.lock_path)
            .map_err(|e| StoreError::io(&self.lock_path, e))?;

        // Acquire exclusive lock before touching the collection
        lock_file
            .lock_exclusive()
            .map_err(|e| StoreError::io(&self.lock_path, e))?;

        // Lock is released when lock_file is dropped
        op()
    }

    fn load_locked(&self) -> Result<Snapshot> {
        match jsonfile::read_records(&self.path)? {
            LoadOutcome::Missing => Ok(Snapshot {
                records: Vec::new(),
                recovered: false,
            }),
            LoadOutcome::Loaded(records) => Ok(Snapshot {
                records,
                recovered: false,
            }),
            LoadOutcome::Malformed(e) => match self.policy {
                CorruptPolicy::Recover => {
                    warn!(file = ?self.path, error = %e, "Malformed collection file, treating as empty");
                    Ok(Snapshot {
                        records: Vec::new(),
                        recovered: true,
                    })
                }
                CorruptPolicy::Refuse => Err(StoreError::Corrupt {
                    path: self.path.clone(),
                    reason: e.to_string(),
                }),
            },
        }
    }

    fn save_locked(&self, snapshot: &Snapshot) -> Result<()> {
        if snapshot.recovered {
            self.backup_corrupt()?;
        }
        jsonfile::write_records(&self.path, &snapshot.records)
    }

    /// Copy a malformed collection aside before it gets overwritten
    fn backup_corrupt(&self) -> Result<PathBuf> {
        let stamp = chrono::Utc::now().format("%Y%m%dT%H%M%S%.3fZ").to_string();
        let backup = jsonfile::sibling(&self.path, &format!("corrupt-{}", stamp));

        fs::copy(&self.path, &backup).map_err(|e| StoreError::io(&backup, e))?;
        warn!(file = ?self.path, backup = ?backup, "Backed up malformed collection file before overwrite");
        Ok(backup)
    }
}
