//! Device telemetry model
//!
//! Last-known state of the filament changer as reported by `get_status` and
//! `get_info` replies. The device only ever reports a subset of keys per
//! reply, so updates are carried as [`TelemetryUpdate`] values whose fields
//! are all optional and merged key by key into [`DeviceTelemetry`].

mod order;

pub use order::{InfinityOrder, ORDER_LEN};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Number of filament slots on the device.
pub const SLOT_COUNT: usize = 4;

/// Overall device status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceStatus {
    /// Idle and accepting commands
    Ready,
    /// Executing a command
    Busy,
    /// No link to the device
    #[default]
    Disconnected,
    /// Any status string this driver does not know
    #[serde(other)]
    Unknown,
}

impl std::fmt::Display for DeviceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeviceStatus::Ready => write!(f, "ready"),
            DeviceStatus::Busy => write!(f, "busy"),
            DeviceStatus::Disconnected => write!(f, "disconnected"),
            DeviceStatus::Unknown => write!(f, "unknown"),
        }
    }
}

/// Status of a single filament slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SlotStatus {
    /// No spool loaded
    #[default]
    Empty,
    /// Filament loaded and idle
    Ready,
    /// Filament is being fed or retracted
    Busy,
    /// Filament is being preloaded into the slot
    Preload,
    /// Slot is moving between positions
    Shifting,
    /// Any status string this driver does not know
    #[serde(other)]
    Unknown,
}

impl std::fmt::Display for SlotStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SlotStatus::Empty => write!(f, "empty"),
            SlotStatus::Ready => write!(f, "ready"),
            SlotStatus::Busy => write!(f, "busy"),
            SlotStatus::Preload => write!(f, "preload"),
            SlotStatus::Shifting => write!(f, "shifting"),
            SlotStatus::Unknown => write!(f, "unknown"),
        }
    }
}

/// Dryer status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DryerStatus {
    /// Heater off
    #[default]
    Stop,
    /// Drying cycle running
    Drying,
    /// Any status string this driver does not know
    #[serde(other)]
    Unknown,
}

/// Dryer state block
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DryerState {
    /// Heater status
    pub status: DryerStatus,
    /// Target temperature in °C
    pub target_temp: f64,
    /// Programmed duration in minutes
    pub duration: f64,
    /// Remaining time in seconds
    pub remain_time: f64,
}

impl DryerState {
    /// Remaining drying time in minutes (the device reports seconds)
    pub fn remaining_minutes(&self) -> f64 {
        if self.remain_time > 0.0 {
            self.remain_time / 60.0
        } else {
            0.0
        }
    }
}

/// One filament slot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Slot {
    /// Slot position, 0-based
    pub index: u8,
    /// Slot status
    pub status: SlotStatus,
    /// Spool SKU read from RFID
    pub sku: String,
    /// Material name, e.g. "PLA"
    #[serde(rename = "type")]
    pub material_type: String,
    /// Spool colour as RGB
    pub color: Vec<u8>,
    /// RFID state: 0 not found, 1 failed, 2 identified, 3 identifying
    pub rfid: u8,
}

impl Slot {
    /// Create an empty slot at the given position
    pub fn empty(index: u8) -> Self {
        Self {
            index,
            status: SlotStatus::Empty,
            sku: String::new(),
            material_type: String::new(),
            color: vec![0, 0, 0],
            rfid: 0,
        }
    }

    /// Whether filament is loaded and idle
    pub fn is_ready(&self) -> bool {
        self.status == SlotStatus::Ready
    }
}

impl Default for Slot {
    fn default() -> Self {
        Self::empty(0)
    }
}

/// Last-known device telemetry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceTelemetry {
    /// Device status
    pub status: DeviceStatus,
    /// Model name
    pub model: String,
    /// Application firmware version
    pub firmware: String,
    /// Bootloader firmware version
    pub boot_firmware: String,
    /// Dryer chamber temperature in °C
    #[serde(rename = "temp")]
    pub temperature: f64,
    /// Dryer fan speed in RPM
    pub fan_speed: u32,
    /// Whether RFID reading is enabled
    pub enable_rfid: u8,
    /// Feed-assist progress counter
    pub feed_assist_count: i64,
    /// Continuous assist time in milliseconds
    pub cont_assist_time: f64,
    /// Dryer block
    pub dryer: DryerState,
    /// Filament slots
    pub slots: Vec<Slot>,
}

impl Default for DeviceTelemetry {
    fn default() -> Self {
        Self {
            status: DeviceStatus::Disconnected,
            model: "Unknown".to_string(),
            firmware: "Unknown".to_string(),
            boot_firmware: "Unknown".to_string(),
            temperature: 0.0,
            fan_speed: 7000,
            enable_rfid: 1,
            feed_assist_count: 0,
            cont_assist_time: 0.0,
            dryer: DryerState::default(),
            slots: (0..SLOT_COUNT as u8).map(Slot::empty).collect(),
        }
    }
}

impl DeviceTelemetry {
    /// Slot at the given position, if the device reported one
    pub fn slot(&self, index: u8) -> Option<&Slot> {
        self.slots.get(index as usize)
    }

    /// Status of the slot at the given position, `Unknown` if missing
    pub fn slot_status(&self, index: u8) -> SlotStatus {
        self.slot(index)
            .map(|s| s.status)
            .unwrap_or(SlotStatus::Unknown)
    }

    /// Merge an update; keys absent from the update are left untouched
    pub fn apply(&mut self, update: TelemetryUpdate) {
        let TelemetryUpdate {
            status,
            model,
            firmware,
            boot_firmware,
            temperature,
            fan_speed,
            enable_rfid,
            feed_assist_count,
            cont_assist_time,
            dryer,
            slots,
        } = update;

        if let Some(v) = status {
            self.status = v;
        }
        if let Some(v) = model {
            self.model = v;
        }
        if let Some(v) = firmware {
            self.firmware = v;
        }
        if let Some(v) = boot_firmware {
            self.boot_firmware = v;
        }
        if let Some(v) = temperature {
            self.temperature = v;
        }
        if let Some(v) = fan_speed {
            self.fan_speed = v;
        }
        if let Some(v) = enable_rfid {
            self.enable_rfid = v;
        }
        if let Some(v) = feed_assist_count {
            self.feed_assist_count = v;
        }
        if let Some(v) = cont_assist_time {
            self.cont_assist_time = v;
        }
        if let Some(v) = dryer {
            self.dryer = v;
        }
        if let Some(v) = slots {
            self.slots = v;
        }
    }
}

/// A partial telemetry report
///
/// Each field is `Some` only when the reply carried that key and its value
/// could be decoded.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct TelemetryUpdate {
    /// Device status
    pub status: Option<DeviceStatus>,
    /// Model name
    pub model: Option<String>,
    /// Application firmware version
    pub firmware: Option<String>,
    /// Bootloader firmware version
    pub boot_firmware: Option<String>,
    /// Dryer chamber temperature
    pub temperature: Option<f64>,
    /// Dryer fan speed
    pub fan_speed: Option<u32>,
    /// RFID enable flag
    pub enable_rfid: Option<u8>,
    /// Feed-assist progress counter
    pub feed_assist_count: Option<i64>,
    /// Continuous assist time
    pub cont_assist_time: Option<f64>,
    /// Dryer block, from either `dryer` or `dryer_status`
    pub dryer: Option<DryerState>,
    /// Filament slots
    pub slots: Option<Vec<Slot>>,
}

impl TelemetryUpdate {
    /// Build an update from a reply's `result` value
    ///
    /// Returns `None` when the result is not an object. Some firmware reports
    /// the dryer block as `dryer_status`; it takes precedence over `dryer`.
    pub fn from_result(result: &Value) -> Option<Self> {
        let map = result.as_object()?;
        Some(Self {
            status: field(map, "status"),
            model: field(map, "model"),
            firmware: field(map, "firmware"),
            boot_firmware: field(map, "boot_firmware"),
            temperature: field(map, "temp"),
            fan_speed: field(map, "fan_speed"),
            enable_rfid: field(map, "enable_rfid"),
            feed_assist_count: field(map, "feed_assist_count"),
            cont_assist_time: field(map, "cont_assist_time"),
            dryer: field(map, "dryer_status").or_else(|| field(map, "dryer")),
            slots: field(map, "slots"),
        })
    }

    /// True when no known key was present
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

fn field<T: DeserializeOwned>(map: &Map<String, Value>, key: &str) -> Option<T> {
    let value = map.get(key)?;
    match serde_json::from_value(value.clone()) {
        Ok(v) => Some(v),
        Err(e) => {
            tracing::warn!("Ignoring telemetry key '{}': {}", key, e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_default_telemetry_has_four_empty_slots() {
        let t = DeviceTelemetry::default();
        assert_eq!(t.slots.len(), SLOT_COUNT);
        assert!(t.slots.iter().all(|s| s.status == SlotStatus::Empty));
        assert_eq!(t.status, DeviceStatus::Disconnected);
    }

    #[test]
    fn test_merge_leaves_absent_keys() {
        let mut t = DeviceTelemetry::default();
        t.model = "ACE".to_string();

        let update = TelemetryUpdate::from_result(&json!({
            "status": "busy",
            "feed_assist_count": 12
        }))
        .unwrap();
        t.apply(update);

        assert_eq!(t.status, DeviceStatus::Busy);
        assert_eq!(t.feed_assist_count, 12);
        assert_eq!(t.model, "ACE");
    }

    #[test]
    fn test_dryer_status_alias_wins() {
        let update = TelemetryUpdate::from_result(&json!({
            "dryer": {"status": "stop"},
            "dryer_status": {"status": "drying", "target_temp": 50, "duration": 240, "remain_time": 600}
        }))
        .unwrap();
        let dryer = update.dryer.unwrap();
        assert_eq!(dryer.status, DryerStatus::Drying);
        assert_eq!(dryer.target_temp, 50.0);
        assert_eq!(dryer.remaining_minutes(), 10.0);
    }

    #[test]
    fn test_slots_parse_with_unknown_status() {
        let update = TelemetryUpdate::from_result(&json!({
            "slots": [
                {"index": 0, "status": "ready", "type": "PLA", "color": [255, 0, 0]},
                {"index": 1, "status": "feeding"},
                {"index": 2, "status": "empty"},
                {"index": 3, "status": "ready", "sku": "AHPLBK-101"}
            ]
        }))
        .unwrap();
        let slots = update.slots.unwrap();
        assert_eq!(slots[0].material_type, "PLA");
        assert_eq!(slots[1].status, SlotStatus::Unknown);
        assert_eq!(slots[3].sku, "AHPLBK-101");
        assert!(slots[3].is_ready());
    }

    #[test]
    fn test_bad_key_is_skipped_not_fatal() {
        let update = TelemetryUpdate::from_result(&json!({
            "fan_speed": "fast",
            "temp": 31.5
        }))
        .unwrap();
        assert_eq!(update.fan_speed, None);
        assert_eq!(update.temperature, Some(31.5));
    }

    #[test]
    fn test_non_object_result() {
        assert!(TelemetryUpdate::from_result(&json!([1, 2])).is_none());
        assert!(TelemetryUpdate::from_result(&json!({})).unwrap().is_empty());
    }
}
