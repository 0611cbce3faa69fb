//! ACE device methods

use crate::communication::Request;
use serde_json::{json, Value};

/// Dryer fan speed sent with every drying request, in RPM
pub const DRYER_FAN_SPEED: u32 = 7000;

/// A method the device understands, with its parameters
#[derive(Debug, Clone, PartialEq)]
pub enum AceCommand {
    /// Full telemetry report
    GetStatus,
    /// Model and firmware versions
    GetInfo,
    /// Start the dryer
    Drying {
        /// Target temperature in °C
        temp: u32,
        /// Duration in minutes
        duration: u32,
    },
    /// Stop the dryer
    DryingStop,
    /// Keep pushing filament from a slot towards the toolhead
    StartFeedAssist {
        /// Slot index
        index: u8,
    },
    /// Stop feed assist on a slot
    StopFeedAssist {
        /// Slot index
        index: u8,
    },
    /// Feed a fixed length
    FeedFilament {
        /// Slot index
        index: u8,
        /// Length in mm
        length: u32,
        /// Speed in mm/s
        speed: u32,
    },
    /// Change the speed of a running feed
    UpdateFeedingSpeed {
        /// Slot index
        index: u8,
        /// Speed in mm/s
        speed: u32,
    },
    /// Abort a running feed
    StopFeedFilament {
        /// Slot index
        index: u8,
    },
    /// Retract a fixed length
    UnwindFilament {
        /// Slot index
        index: u8,
        /// Length in mm
        length: u32,
        /// Speed in mm/s
        speed: u32,
        /// 0 normal, 1 enhanced
        mode: u8,
    },
    /// Change the speed of a running retract
    UpdateUnwindingSpeed {
        /// Slot index
        index: u8,
        /// Speed in mm/s
        speed: u32,
    },
    /// Abort a running retract
    StopUnwindFilament {
        /// Slot index
        index: u8,
    },
    /// RFID data for the spool in a slot
    GetFilamentInfo {
        /// Slot index
        index: u8,
    },
    /// Any other method
    Raw {
        /// Method name
        method: String,
        /// Parameters, sent only when present
        params: Option<Value>,
    },
}

impl AceCommand {
    /// Wire method name
    pub fn method(&self) -> &str {
        match self {
            AceCommand::GetStatus => "get_status",
            AceCommand::GetInfo => "get_info",
            AceCommand::Drying { .. } => "drying",
            AceCommand::DryingStop => "drying_stop",
            AceCommand::StartFeedAssist { .. } => "start_feed_assist",
            AceCommand::StopFeedAssist { .. } => "stop_feed_assist",
            AceCommand::FeedFilament { .. } => "feed_filament",
            AceCommand::UpdateFeedingSpeed { .. } => "update_feeding_speed",
            AceCommand::StopFeedFilament { .. } => "stop_feed_filament",
            AceCommand::UnwindFilament { .. } => "unwind_filament",
            AceCommand::UpdateUnwindingSpeed { .. } => "update_unwinding_speed",
            AceCommand::StopUnwindFilament { .. } => "stop_unwind_filament",
            AceCommand::GetFilamentInfo { .. } => "get_filament_info",
            AceCommand::Raw { method, .. } => method,
        }
    }

    /// Wire parameters
    pub fn params(&self) -> Option<Value> {
        match self {
            AceCommand::GetStatus | AceCommand::GetInfo | AceCommand::DryingStop => None,
            AceCommand::Drying { temp, duration } => Some(json!({
                "temp": temp,
                "fan_speed": DRYER_FAN_SPEED,
                "duration": duration,
            })),
            AceCommand::StartFeedAssist { index }
            | AceCommand::StopFeedAssist { index }
            | AceCommand::StopFeedFilament { index }
            | AceCommand::StopUnwindFilament { index }
            | AceCommand::GetFilamentInfo { index } => Some(json!({ "index": index })),
            AceCommand::FeedFilament {
                index,
                length,
                speed,
            } => Some(json!({ "index": index, "length": length, "speed": speed })),
            AceCommand::UpdateFeedingSpeed { index, speed }
            | AceCommand::UpdateUnwindingSpeed { index, speed } => {
                Some(json!({ "index": index, "speed": speed }))
            }
            AceCommand::UnwindFilament {
                index,
                length,
                speed,
                mode,
            } => Some(json!({
                "index": index,
                "length": length,
                "speed": speed,
                "mode": mode,
            })),
            AceCommand::Raw { params, .. } => params.clone(),
        }
    }

    /// Build the request envelope; the id is assigned on submission
    pub fn to_request(&self) -> Request {
        let request = Request::new(self.method());
        match self.params() {
            Some(params) => request.with_params(params),
            None => request,
        }
    }
}

impl From<AceCommand> for Request {
    fn from(command: AceCommand) -> Self {
        command.to_request()
    }
}
