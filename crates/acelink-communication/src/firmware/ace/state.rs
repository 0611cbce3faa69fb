//! Device state store

use acelink_core::{DeviceStatus, DeviceTelemetry, TelemetryUpdate};
use serde_json::Value;
use tokio::time::Instant;

/// Last-known telemetry plus bookkeeping about when it changed
#[derive(Debug, Default)]
pub struct TelemetryStore {
    telemetry: DeviceTelemetry,
    updates: u64,
    last_update: Option<Instant>,
}

impl TelemetryStore {
    /// Store holding power-on defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge a reply's `result` payload
    ///
    /// Returns false when the payload was not an object.
    pub fn apply(&mut self, result: &Value, now: Instant) -> bool {
        match TelemetryUpdate::from_result(result) {
            Some(update) => {
                self.telemetry.apply(update);
                self.updates += 1;
                self.last_update = Some(now);
                true
            }
            None => {
                tracing::debug!("Ignoring non-object result: {}", result);
                false
            }
        }
    }

    /// Override the device status
    pub fn set_status(&mut self, status: DeviceStatus) {
        self.telemetry.status = status;
    }

    /// Current telemetry
    pub fn telemetry(&self) -> &DeviceTelemetry {
        &self.telemetry
    }

    /// Owned copy of the current telemetry
    pub fn snapshot(&self) -> DeviceTelemetry {
        self.telemetry.clone()
    }

    /// Number of merged payloads
    pub fn update_count(&self) -> u64 {
        self.updates
    }

    /// When the last payload was merged
    pub fn last_update(&self) -> Option<Instant> {
        self.last_update
    }
}
