//! Persistent variables
//!
//! [`JsonVariableStore`] keeps the loaded tool and the infinity-spool state
//! in a JSON object on disk. Every write rewrites the whole file through a
//! temporary file so a crash never leaves it half written.

use crate::config::config_dir;
use crate::error::{SettingsError, SettingsResult};
use acelink_core::VariableStore;
use parking_lot::RwLock;
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};

/// Default variables file path
pub fn default_variables_path() -> PathBuf {
    config_dir().join("variables.json")
}

/// File-backed variable store
#[derive(Debug)]
pub struct JsonVariableStore {
    path: PathBuf,
    values: RwLock<Map<String, Value>>,
}

impl JsonVariableStore {
    /// Open a store, reading existing values if the file exists
    pub fn open(path: impl Into<PathBuf>) -> SettingsResult<Self> {
        let path = path.into();
        let values = if path.exists() {
            let content = std::fs::read_to_string(&path)?;
            if content.trim().is_empty() {
                Map::new()
            } else {
                match serde_json::from_str::<Value>(&content)? {
                    Value::Object(map) => map,
                    _ => {
                        return Err(SettingsError::LoadError(format!(
                            "{} does not hold a JSON object",
                            path.display()
                        )))
                    }
                }
            }
        } else {
            Map::new()
        };

        tracing::debug!("Opened variable store {} ({} values)", path.display(), values.len());
        Ok(Self {
            path,
            values: RwLock::new(values),
        })
    }

    /// Open the store at the default location
    pub fn open_default() -> SettingsResult<Self> {
        Self::open(default_variables_path())
    }

    /// Backing file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Copy of every stored value
    pub fn snapshot(&self) -> Map<String, Value> {
        self.values.read().clone()
    }

    fn flush(&self, values: &Map<String, Value>) -> SettingsResult<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_string_pretty(values)?;
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, content)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

impl VariableStore for JsonVariableStore {
    fn get(&self, key: &str) -> Option<Value> {
        self.values.read().get(key).cloned()
    }

    fn set(&self, key: &str, value: Value) -> acelink_core::Result<()> {
        let mut values = self.values.write();
        let mut updated = values.clone();
        updated.insert(key.to_string(), value);
        // Memory only changes once the file does
        if let Err(e) = self.flush(&updated) {
            tracing::error!("Failed to save variable {}: {}", key, e);
            return Err(e.into());
        }
        *values = updated;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use acelink_core::{VAR_CURRENT_INDEX, VAR_INFINITY_ORDER};

    #[test]
    fn test_values_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vars.json");

        let store = JsonVariableStore::open(&path).unwrap();
        assert!(store.get(VAR_CURRENT_INDEX).is_none());
        store.set(VAR_CURRENT_INDEX, Value::from(2)).unwrap();
        store
            .set(VAR_INFINITY_ORDER, Value::from("0,1,none,3"))
            .unwrap();

        let reopened = JsonVariableStore::open(&path).unwrap();
        assert_eq!(reopened.get_i64(VAR_CURRENT_INDEX), Some(2));
        assert_eq!(
            reopened.get_string(VAR_INFINITY_ORDER).as_deref(),
            Some("0,1,none,3")
        );
        assert_eq!(reopened.snapshot().len(), 2);
    }

    #[test]
    fn test_creates_missing_directories() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("vars.json");

        let store = JsonVariableStore::open(&path).unwrap();
        store.set(VAR_CURRENT_INDEX, Value::from(-1)).unwrap();
        assert!(path.exists());
        assert!(!path.with_extension("json.tmp").exists());
    }

    #[test]
    fn test_failed_write_leaves_value_unchanged() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("blocker");
        std::fs::write(&blocker, "not a directory").unwrap();

        let store = JsonVariableStore::open(blocker.join("vars.json")).unwrap();
        assert!(store.set(VAR_CURRENT_INDEX, Value::from(1)).is_err());
        assert!(store.get(VAR_CURRENT_INDEX).is_none());
        assert!(store.snapshot().is_empty());
    }

    #[test]
    fn test_rejects_non_object_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vars.json");
        std::fs::write(&path, "[1, 2, 3]").unwrap();

        assert!(matches!(
            JsonVariableStore::open(&path),
            Err(SettingsError::LoadError(_))
        ));
    }

    #[test]
    fn test_empty_file_is_empty_store() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vars.json");
        std::fs::write(&path, "").unwrap();

        let store = JsonVariableStore::open(&path).unwrap();
        assert!(store.snapshot().is_empty());
    }
}
