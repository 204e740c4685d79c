//! Durable key/value storage behind the configuration layer.
//!
//! The core only ever needs two operations, `get` and `set`, so the
//! storage engine stays swappable: the embedding shell can hand in its own
//! implementation, the default is a small TOML file rewritten atomically on
//! every write, and tests use the in-memory variant.

use crate::error::{Result, TellerError};
use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{error, warn};

/// String key/value persistence seam.
///
/// Implementations must be durable across process restarts (except
/// [`MemoryStore`], which exists for tests and ephemeral embedding).
pub trait KeyValueStore: Send + Sync {
    /// Returns the stored value for `key`, or `None` if absent.
    fn get(&self, key: &str) -> Result<Option<String>>;

    /// Stores `value` under `key`, replacing any previous value.
    fn set(&self, key: &str, value: &str) -> Result<()>;
}

/// In-memory store for tests and ephemeral embedding.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<BTreeMap<String, String>>,
}

impl MemoryStore {
    /// Creates an empty in-memory store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let entries = self
            .entries
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        Ok(entries.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        let mut entries = self
            .entries
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        entries.insert(key.to_owned(), value.to_owned());
        Ok(())
    }
}

/// File-backed store: one TOML table of string pairs.
///
/// The whole table is held in memory and rewritten atomically (temp file,
/// fsync, rename) on every `set`, so a crash mid-write can never leave a
/// half-written store on disk.
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    entries: Mutex<BTreeMap<String, String>>,
}

impl FileStore {
    /// Opens the store at `path`, loading any existing entries.
    ///
    /// A missing file yields an empty store. An unreadable or unparseable
    /// file is preserved as `<path>.corrupt` and the store starts empty;
    /// a damaged settings file must never lock the assistant out.
    ///
    /// # Errors
    ///
    /// Returns [`TellerError::Store`] when the file exists but cannot be
    /// read at the filesystem level.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let entries = match std::fs::read_to_string(&path) {
            Ok(text) => match toml::from_str::<BTreeMap<String, String>>(&text) {
                Ok(map) => map,
                Err(e) => {
                    error!(path = %path.display(), error = %e, "store file is corrupt; starting empty");
                    preserve_corrupt(&path);
                    BTreeMap::new()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => {
                return Err(TellerError::Store(format!(
                    "failed to read store file {}: {e}",
                    path.display()
                )));
            }
        };
        Ok(Self {
            path,
            entries: Mutex::new(entries),
        })
    }

    /// Opens the store at the default location ([`crate::paths::store_file`]).
    ///
    /// # Errors
    ///
    /// Returns [`TellerError::Store`] when the file exists but cannot be read.
    pub fn open_default() -> Result<Self> {
        Self::open(crate::paths::store_file())
    }

    /// Path of the backing file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn persist(&self, entries: &BTreeMap<String, String>) -> Result<()> {
        let text = toml::to_string_pretty(entries)
            .map_err(|e| TellerError::Store(format!("failed to serialize store: {e}")))?;
        write_text_atomic(&self.path, &text)
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let entries = self
            .entries
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        Ok(entries.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        let mut entries = self
            .entries
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        entries.insert(key.to_owned(), value.to_owned());
        self.persist(&entries)
    }
}

/// Move a corrupt store file aside so its contents survive for inspection.
fn preserve_corrupt(path: &Path) {
    let backup = path.with_extension("toml.corrupt");
    if let Err(e) = std::fs::rename(path, &backup) {
        warn!(
            path = %path.display(),
            error = %e,
            "failed to preserve corrupt store file"
        );
    }
}

/// Write `text` to `path` atomically: temp file, fsync, rename.
///
/// Parent directories are created as needed.
fn write_text_atomic(path: &Path, text: &str) -> Result<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent).map_err(|e| {
            TellerError::Store(format!(
                "failed to create store directory {}: {e}",
                parent.display()
            ))
        })?;
    }

    let tmp = path.with_extension("toml.tmp");
    {
        let mut file = std::fs::File::create(&tmp).map_err(|e| {
            TellerError::Store(format!("failed to create temp file {}: {e}", tmp.display()))
        })?;
        file.write_all(text.as_bytes())
            .map_err(|e| TellerError::Store(format!("failed to write store: {e}")))?;
        file.sync_all()
            .map_err(|e| TellerError::Store(format!("failed to sync store: {e}")))?;
    }
    std::fs::rename(&tmp, path).map_err(|e| {
        TellerError::Store(format!(
            "failed to move store into place at {}: {e}",
            path.display()
        ))
    })?;
    Ok(())
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;
    use std::sync::Arc;

    // ── MemoryStore ──────────────────────────────────────────────────────

    #[test]
    fn memory_get_missing_returns_none() {
        let store = MemoryStore::new();
        assert_eq!(store.get("absent").unwrap(), None);
    }

    #[test]
    fn memory_set_then_get() {
        let store = MemoryStore::new();
        store.set("k", "v").unwrap();
        assert_eq!(store.get("k").unwrap().as_deref(), Some("v"));
    }

    #[test]
    fn memory_set_overwrites() {
        let store = MemoryStore::new();
        store.set("k", "first").unwrap();
        store.set("k", "second").unwrap();
        assert_eq!(store.get("k").unwrap().as_deref(), Some("second"));
    }

    #[test]
    fn store_usable_as_trait_object() {
        let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
        store.set("k", "v").unwrap();
        assert_eq!(store.get("k").unwrap().as_deref(), Some("v"));
    }

    // ── FileStore ────────────────────────────────────────────────────────

    #[test]
    fn file_open_missing_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path().join("store.toml")).unwrap();
        assert_eq!(store.get("anything").unwrap(), None);
    }

    #[test]
    fn file_set_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.toml");

        let store = FileStore::open(&path).unwrap();
        store.set("endpoint", "http://localhost:11434").unwrap();
        drop(store);

        let reopened = FileStore::open(&path).unwrap();
        assert_eq!(
            reopened.get("endpoint").unwrap().as_deref(),
            Some("http://localhost:11434")
        );
    }

    #[test]
    fn file_set_creates_parent_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("deeper").join("store.toml");

        let store = FileStore::open(&path).unwrap();
        store.set("k", "v").unwrap();
        assert!(path.exists());
    }

    #[test]
    fn file_no_temp_file_left_behind() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.toml");

        let store = FileStore::open(&path).unwrap();
        store.set("k", "v").unwrap();
        assert!(!path.with_extension("toml.tmp").exists());
    }

    #[test]
    fn file_corrupt_is_preserved_and_store_starts_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.toml");
        std::fs::write(&path, "not = [valid toml").unwrap();

        let store = FileStore::open(&path).unwrap();
        assert_eq!(store.get("k").unwrap(), None);
        assert!(path.with_extension("toml.corrupt").exists());
    }

    #[test]
    fn file_values_round_trip_json_payloads() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.toml");

        let payload = r#"{"endpoint_url":"http://localhost:11434","timeout_ms":60000}"#;
        let store = FileStore::open(&path).unwrap();
        store.set("local_ai_config", payload).unwrap();
        drop(store);

        let reopened = FileStore::open(&path).unwrap();
        assert_eq!(
            reopened.get("local_ai_config").unwrap().as_deref(),
            Some(payload)
        );
    }
}
