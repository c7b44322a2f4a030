//! Snapshot persistence.
//!
//! The snapshot is one JSON array holding every persistable task, replaced
//! wholesale on each flush. There is no log and no schema version.
//!
//! # Stores
//! - **FileStore**: whole-file overwrite at a path (`Options::with_persist_path`)
//! - **FnStore**: a load/save closure pair, for callers that keep the bytes
//!   somewhere else (a database row, a settings table, ...)

mod flusher;

pub(crate) use flusher::Flusher;

use std::fmt;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use crate::error::EngineError;

/// Where snapshot bytes live.
///
/// Implementations are called from the flusher task and from
/// `Manager::new` (recovery), never concurrently with themselves for the
/// same manager.
pub trait SnapshotStore: Send + Sync {
    /// Previously saved bytes, or `None` when nothing was saved yet.
    fn load(&self) -> Result<Option<Vec<u8>>, EngineError>;

    /// Replace the snapshot with `data`.
    fn save(&self, data: &[u8]) -> Result<(), EngineError>;
}

/// Snapshot kept in a single file.
#[derive(Debug, Clone)]
pub struct FileStore {
    path: PathBuf,
}

impl FileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl SnapshotStore for FileStore {
    fn load(&self) -> Result<Option<Vec<u8>>, EngineError> {
        match std::fs::read(&self.path) {
            Ok(data) => Ok(Some(data)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn save(&self, data: &[u8]) -> Result<(), EngineError> {
        std::fs::write(&self.path, data)?;
        Ok(())
    }
}

type LoadFn = Box<dyn Fn() -> Result<Option<Vec<u8>>, EngineError> + Send + Sync>;
type SaveFn = Box<dyn Fn(&[u8]) -> Result<(), EngineError> + Send + Sync>;

/// Snapshot kept wherever a pair of closures puts it.
pub struct FnStore {
    load: LoadFn,
    save: SaveFn,
}

impl FnStore {
    pub fn new<L, S>(load: L, save: S) -> Self
    where
        L: Fn() -> Result<Option<Vec<u8>>, EngineError> + Send + Sync + 'static,
        S: Fn(&[u8]) -> Result<(), EngineError> + Send + Sync + 'static,
    {
        Self {
            load: Box::new(load),
            save: Box::new(save),
        }
    }
}

impl SnapshotStore for FnStore {
    fn load(&self) -> Result<Option<Vec<u8>>, EngineError> {
        (self.load)()
    }

    fn save(&self, data: &[u8]) -> Result<(), EngineError> {
        (self.save)(data)
    }
}

impl fmt::Debug for FnStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnStore").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::Arc;

    #[test]
    fn file_store_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path().join("tasks.json"));
        assert!(store.load().unwrap().is_none());
    }

    #[test]
    fn file_store_overwrites_wholesale() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path().join("tasks.json"));

        store.save(b"[1,2,3]").unwrap();
        store.save(b"[]").unwrap();

        assert_eq!(store.load().unwrap().unwrap(), b"[]");
    }

    #[test]
    fn file_store_reports_io_errors() {
        let dir = tempfile::tempdir().unwrap();
        // a directory cannot be written as a file
        let store = FileStore::new(dir.path());
        assert!(matches!(store.save(b"[]"), Err(EngineError::Io(_))));
    }

    #[test]
    fn fn_store_delegates() {
        let cell: Arc<Mutex<Option<Vec<u8>>>> = Arc::default();
        let read = Arc::clone(&cell);
        let write = Arc::clone(&cell);
        let store = FnStore::new(
            move || Ok(read.lock().clone()),
            move |data| {
                *write.lock() = Some(data.to_vec());
                Ok(())
            },
        );

        assert!(store.load().unwrap().is_none());
        store.save(b"[]").unwrap();
        assert_eq!(store.load().unwrap().unwrap(), b"[]");
    }
}
