//! Store snapshot persistence with file locking.
//!
//! The in-memory store is kept between CLI invocations as a JSON snapshot.
//! Whole load-modify-save cycles are serialized across processes with an
//! exclusive lock on a sibling `.lock` file, and snapshots are replaced
//! atomically.

use crate::store::{MemoryStore, StoreSnapshot};
use crate::{Error, Result};
use fs2::FileExt;
use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

impl StoreSnapshot {
    /// Load a snapshot with shared locking
    ///
    /// Returns an empty snapshot if the file doesn't exist. A file that
    /// exists but cannot be parsed is an error; medication records are never
    /// silently discarded.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::info!("No snapshot found at {:?}, starting empty", path);
            return Ok(Self::default());
        }

        let file = File::open(path)?;
        file.lock_shared()?;

        let mut contents = String::new();
        let read = std::io::BufReader::new(&file).read_to_string(&mut contents);
        file.unlock()?;
        read?;

        // A damaged snapshot is a storage failure, not a bad request
        let snapshot: StoreSnapshot = serde_json::from_str(&contents).map_err(|e| {
            tracing::warn!("Failed to parse snapshot {:?}: {}", path, e);
            Error::Store(format!("corrupt snapshot {}: {}", path.display(), e))
        })?;

        tracing::debug!(
            "Loaded snapshot from {:?}: {} users, {} prescriptions, {} regimens",
            path,
            snapshot.users.len(),
            snapshot.prescriptions.len(),
            snapshot.regimens.len()
        );
        Ok(snapshot)
    }

    /// Save a snapshot with exclusive locking
    ///
    /// Atomically writes state by:
    /// 1. Writing to a temp file
    /// 2. Syncing to disk
    /// 3. Renaming over the original
    pub fn save(&self, path: &Path) -> Result<()> {
        let parent = path.parent().ok_or_else(|| {
            Error::Io(std::io::Error::new(
                std::io::ErrorKind::Other,
                "snapshot path missing parent",
            ))
        })?;
        std::fs::create_dir_all(parent)?;

        // Temp file in the same directory so the rename stays atomic
        let temp = NamedTempFile::new_in(parent)?;
        temp.as_file().lock_exclusive()?;

        {
            let mut writer = std::io::BufWriter::new(temp.as_file());
            serde_json::to_writer(&mut writer, self)?;
            writer.flush()?;
        }

        temp.as_file().sync_all()?;
        temp.as_file().unlock()?;

        temp.persist(path).map_err(|e| Error::Io(e.error))?;

        tracing::debug!("Saved snapshot to {:?}", path);
        Ok(())
    }
}

/// A snapshot file and the lock file guarding it
#[derive(Clone, Debug)]
pub struct SnapshotFile {
    path: PathBuf,
    lock_path: PathBuf,
}

impl SnapshotFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let lock_path = path.with_extension("lock");
        Self { path, lock_path }
    }

    /// Snapshot location inside a data directory
    pub fn in_dir(data_dir: &Path) -> Self {
        Self::new(data_dir.join("pillbox.json"))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn open_lock(&self) -> Result<File> {
        if let Some(parent) = self.lock_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        Ok(OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(&self.lock_path)?)
    }

    /// Run `f` against the stored data and persist the result
    ///
    /// The cycle holds an exclusive lock for its whole duration. Nothing is
    /// written back when `f` fails.
    pub fn update<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&MemoryStore) -> Result<T>,
    {
        let lock = self.open_lock()?;
        lock.lock_exclusive()?;

        let result = StoreSnapshot::load(&self.path).and_then(|snapshot| {
            let store = MemoryStore::from_snapshot(snapshot);
            let value = f(&store)?;
            store.snapshot()?.save(&self.path)?;
            Ok(value)
        });

        lock.unlock()?;
        result
    }

    /// Run `f` against the stored data without writing anything back
    pub fn read<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&MemoryStore) -> Result<T>,
    {
        let lock = self.open_lock()?;
        lock.lock_shared()?;

        let result = StoreSnapshot::load(&self.path)
            .and_then(|snapshot| f(&MemoryStore::from_snapshot(snapshot)));

        lock.unlock()?;
        result
    }
}
