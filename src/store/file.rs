use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use tracing::debug;

use super::{KeyValueStore, PrefValue, StoreError};

type Values = BTreeMap<String, PrefValue>;

/// Store persisted as a single JSON object, rewritten on every mutation
pub struct JsonFileStore {
    path: PathBuf,
    values: Mutex<Values>,
}

impl JsonFileStore {
    /// Open a store, loading existing contents if the file exists
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let values = match std::fs::read_to_string(&path) {
            Ok(raw) if raw.trim().is_empty() => Values::new(),
            Ok(raw) => serde_json::from_str(&raw)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Values::new(),
            Err(e) => return Err(e.into()),
        };

        debug!(path = %path.display(), entries = values.len(), "opened store");
        Ok(Self {
            path,
            values: Mutex::new(values),
        })
    }

    /// Default location under the user's data directory
    pub fn default_path() -> PathBuf {
        dirs::data_dir()
            .unwrap_or_default()
            .join("appstate")
            .join("state.json")
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lock(&self) -> MutexGuard<'_, Values> {
        self.values.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Apply `change` to a copy, write it out, and only then make it the
    /// in-memory state
    fn update<R>(&self, change: impl FnOnce(&mut Values) -> R) -> Result<R, StoreError> {
        let mut values = self.lock();
        let mut next = values.clone();
        let out = change(&mut next);
        self.persist(&next)?;
        *values = next;
        Ok(out)
    }

    /// Write to a sibling temp file and rename it over the store, so a crash
    /// mid-write never leaves a truncated file behind
    fn persist(&self, values: &Values) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let json = serde_json::to_string_pretty(values)?;
        let staging = self.staging_path();
        std::fs::write(&staging, json)?;
        std::fs::rename(&staging, &self.path)?;
        Ok(())
    }

    fn staging_path(&self) -> PathBuf {
        let mut name = self.path.as_os_str().to_owned();
        name.push(".tmp");
        PathBuf::from(name)
    }
}

impl KeyValueStore for JsonFileStore {
    fn get(&self, key: &str) -> Result<Option<PrefValue>, StoreError> {
        Ok(self.lock().get(key).cloned())
    }

    fn set(&self, key: &str, value: PrefValue) -> Result<(), StoreError> {
        self.update(|values| {
            values.insert(key.to_string(), value);
        })
    }

    fn remove(&self, key: &str) -> Result<Option<PrefValue>, StoreError> {
        if self.lock().get(key).is_none() {
            return Ok(None);
        }
        self.update(|values| values.remove(key))
    }

    fn clear(&self) -> Result<(), StoreError> {
        self.update(|values| values.clear())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::AppState;
    use crate::store::{last_known_state, APP_STATE_KEY};

    #[test]
    fn test_values_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("state.json");

        let store = JsonFileStore::open(&path).unwrap();
        store.set("count", PrefValue::Int(9)).unwrap();
        store
            .set(APP_STATE_KEY, PrefValue::Str("Foreground".into()))
            .unwrap();
        drop(store);

        let reopened = JsonFileStore::open(&path).unwrap();
        assert_eq!(reopened.get_int("count", 0).unwrap(), 9);
        assert_eq!(last_known_state(&reopened), AppState::Foreground);
    }

    #[test]
    fn test_clear_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");

        let store = JsonFileStore::open(&path).unwrap();
        store.set("on", PrefValue::Bool(true)).unwrap();
        store.clear().unwrap();

        let reopened = JsonFileStore::open(&path).unwrap();
        assert_eq!(reopened.get("on").unwrap(), None);
    }

    #[test]
    fn test_corrupt_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        std::fs::write(&path, "{not json").unwrap();

        assert!(matches!(JsonFileStore::open(&path), Err(StoreError::Json(_))));
    }

    #[test]
    fn test_missing_file_opens_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::open(dir.path().join("absent.json")).unwrap();
        assert_eq!(store.get("anything").unwrap(), None);
        assert!(!store.path().exists());
    }

    #[test]
    fn test_failed_write_leaves_memory_unchanged() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");

        let store = JsonFileStore::open(&path).unwrap();
        store.set("count", PrefValue::Int(1)).unwrap();

        // A directory squatting on the staging path makes the write fail
        std::fs::create_dir(dir.path().join("state.json.tmp")).unwrap();

        assert!(matches!(store.set("count", PrefValue::Int(2)), Err(StoreError::Io(_))));
        assert!(store.clear().is_err());
        assert_eq!(store.get_int("count", 0).unwrap(), 1);

        let on_disk = JsonFileStore::open(&path).unwrap();
        assert_eq!(on_disk.get_int("count", 0).unwrap(), 1);
    }

    #[test]
    fn test_no_staging_file_left_behind() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::open(dir.path().join("state.json")).unwrap();
        store.set("on", PrefValue::Bool(true)).unwrap();

        let names: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|entry| entry.unwrap().file_name())
            .collect();
        assert_eq!(names, vec![std::ffi::OsString::from("state.json")]);
    }
}
