//! Key-value store used to cache the last known app state.

mod file;

pub use file::JsonFileStore;

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use thiserror::Error;

use crate::observer::AppStateChangeListener;
use crate::state::AppState;

/// Key under which the last delivered state is stored
pub const APP_STATE_KEY: &str = "app_state";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store I/O failed")]
    Io(#[from] std::io::Error),

    #[error("store file is not valid JSON")]
    Json(#[from] serde_json::Error),

    #[error("value for {key:?} is not a {expected}")]
    TypeMismatch { key: String, expected: &'static str },
}

/// A typed stored value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum PrefValue {
    Str(String),
    Int(i32),
    Long(i64),
    Float(f32),
    Bool(bool),
}

macro_rules! typed_getter {
    ($name:ident, $variant:ident, $ty:ty, $kind:literal) => {
        /// Read a value, falling back to `default` when the key is missing
        fn $name(&self, key: &str, default: $ty) -> Result<$ty, StoreError> {
            match self.get(key)? {
                None => Ok(default),
                Some(PrefValue::$variant(v)) => Ok(v),
                Some(_) => Err(StoreError::TypeMismatch {
                    key: key.to_string(),
                    expected: $kind,
                }),
            }
        }
    };
}

/// Persistent key-value store
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<PrefValue>, StoreError>;

    fn set(&self, key: &str, value: PrefValue) -> Result<(), StoreError>;

    /// Returns the removed value, if any
    fn remove(&self, key: &str) -> Result<Option<PrefValue>, StoreError>;

    fn clear(&self) -> Result<(), StoreError>;

    typed_getter!(get_string, Str, String, "string");
    typed_getter!(get_int, Int, i32, "int");
    typed_getter!(get_long, Long, i64, "long");
    typed_getter!(get_float, Float, f32, "float");
    typed_getter!(get_bool, Bool, bool, "bool");
}

impl<S: KeyValueStore + ?Sized> KeyValueStore for Arc<S> {
    fn get(&self, key: &str) -> Result<Option<PrefValue>, StoreError> {
        (**self).get(key)
    }

    fn set(&self, key: &str, value: PrefValue) -> Result<(), StoreError> {
        (**self).set(key, value)
    }

    fn remove(&self, key: &str) -> Result<Option<PrefValue>, StoreError> {
        (**self).remove(key)
    }

    fn clear(&self) -> Result<(), StoreError> {
        (**self).clear()
    }
}

/// In-memory store
#[derive(Debug, Default)]
pub struct MemoryStore {
    values: Mutex<BTreeMap<String, PrefValue>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn values(&self) -> std::sync::MutexGuard<'_, BTreeMap<String, PrefValue>> {
        self.values.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<PrefValue>, StoreError> {
        Ok(self.values().get(key).cloned())
    }

    fn set(&self, key: &str, value: PrefValue) -> Result<(), StoreError> {
        self.values().insert(key.to_string(), value);
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<Option<PrefValue>, StoreError> {
        Ok(self.values().remove(key))
    }

    fn clear(&self) -> Result<(), StoreError> {
        self.values().clear();
        Ok(())
    }
}

/// Listener that persists every delivered state under [`APP_STATE_KEY`]
pub struct LastKnownStateRecorder<S> {
    store: S,
}

impl<S: KeyValueStore> LastKnownStateRecorder<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// Last recorded state; missing or unreadable values read as `Terminated`
    pub fn last_known(&self) -> AppState {
        last_known_state(&self.store)
    }
}

/// Read the cached state from any store
pub fn last_known_state<S: KeyValueStore + ?Sized>(store: &S) -> AppState {
    match store.get_string(APP_STATE_KEY, String::new()) {
        Ok(tag) => AppState::from_tag(&tag),
        Err(e) => {
            tracing::warn!(error = %e, "cached app state unreadable");
            AppState::Terminated
        }
    }
}

impl<S: KeyValueStore> AppStateChangeListener for LastKnownStateRecorder<S> {
    fn on_app_state_change(&self, state: AppState) -> anyhow::Result<()> {
        self.store
            .set(APP_STATE_KEY, PrefValue::Str(state.as_str().to_string()))?;
        Ok(())
    }
}
