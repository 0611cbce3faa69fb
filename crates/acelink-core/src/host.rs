//! Host collaborator interfaces
//!
//! The engine never talks to the motion system or to persistent storage
//! directly. Hosts plug in through [`HostHooks`] and [`VariableStore`].

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;

/// Variable holding the currently loaded slot (`-1` when unloaded).
pub const VAR_CURRENT_INDEX: &str = "ace_current_index";
/// Variable holding the infinity-spool order string.
pub const VAR_INFINITY_ORDER: &str = "ace_infsp_order";
/// Variable holding the infinity-spool cursor.
pub const VAR_INFINITY_POSITION: &str = "ace_infsp_position";

/// Hooks the engine calls outward during sequences
///
/// Every hook may suspend the calling sequence. Defaults do nothing so
/// hosts only implement what they need.
#[async_trait]
pub trait HostHooks: Send + Sync {
    /// Called before a tool change starts moving filament
    async fn pre_toolchange(&self, _from: Option<u8>, _to: Option<u8>) -> anyhow::Result<()> {
        Ok(())
    }

    /// Called once the new tool is parked
    async fn post_toolchange(&self, _from: Option<u8>, _to: Option<u8>) -> anyhow::Result<()> {
        Ok(())
    }

    /// Called before an infinity-spool failover
    async fn pre_infinity_spool(&self) -> anyhow::Result<()> {
        Ok(())
    }

    /// Called once an infinity-spool failover has parked the new slot
    async fn post_infinity_spool(&self) -> anyhow::Result<()> {
        Ok(())
    }

    /// Wait until all queued motion has completed
    async fn wait_moves(&self) {}

    /// Suspend the calling context
    async fn dwell(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Hooks that do nothing
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopHooks;

#[async_trait]
impl HostHooks for NoopHooks {}

/// Persistent key=value storage for variables that survive restarts
pub trait VariableStore: Send + Sync {
    /// Read a variable
    fn get(&self, key: &str) -> Option<Value>;

    /// Write a variable
    fn set(&self, key: &str, value: Value) -> crate::Result<()>;

    /// Read an integer variable
    fn get_i64(&self, key: &str) -> Option<i64> {
        self.get(key).and_then(|v| v.as_i64())
    }

    /// Read a string variable
    fn get_string(&self, key: &str) -> Option<String> {
        self.get(key).and_then(|v| v.as_str().map(str::to_string))
    }
}

/// In-memory variable store
///
/// Used when no persistent backend is configured; values are lost on exit.
#[derive(Debug, Default)]
pub struct MemoryVariableStore {
    values: Mutex<HashMap<String, Value>>,
}

impl MemoryVariableStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }
}

impl VariableStore for MemoryVariableStore {
    fn get(&self, key: &str) -> Option<Value> {
        self.values.lock().get(key).cloned()
    }

    fn set(&self, key: &str, value: Value) -> crate::Result<()> {
        self.values.lock().insert(key.to_string(), value);
        Ok(())
    }
}

/// Encode a tool for storage, `-1` meaning unloaded
pub fn tool_to_value(tool: Option<u8>) -> Value {
    match tool {
        Some(slot) => Value::from(slot),
        None => Value::from(-1),
    }
}

/// Decode a stored tool; negative values mean unloaded
pub fn tool_from_value(value: Option<i64>) -> Option<u8> {
    value.and_then(|v| u8::try_from(v).ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_store_roundtrip() {
        let store = MemoryVariableStore::new();
        assert!(store.get(VAR_CURRENT_INDEX).is_none());
        store.set(VAR_CURRENT_INDEX, tool_to_value(Some(2))).unwrap();
        assert_eq!(store.get_i64(VAR_CURRENT_INDEX), Some(2));
        store
            .set(VAR_INFINITY_ORDER, Value::from("0,1,none,3"))
            .unwrap();
        assert_eq!(
            store.get_string(VAR_INFINITY_ORDER).as_deref(),
            Some("0,1,none,3")
        );
    }

    #[test]
    fn test_tool_encoding() {
        assert_eq!(tool_to_value(None), Value::from(-1));
        assert_eq!(tool_from_value(Some(-1)), None);
        assert_eq!(tool_from_value(Some(3)), Some(3));
        assert_eq!(tool_from_value(None), None);
    }
}
