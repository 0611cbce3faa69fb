//! Device configuration
//!
//! Options recognised by the driver. Durations are stored in seconds so the
//! file format matches the option names operators already use.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Lowest dryer temperature the device accepts, in °C
pub const MIN_DRYER_TEMPERATURE: u32 = 20;

/// Driver configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AceConfig {
    /// Serial device path
    pub serial: String,
    /// Baud rate
    pub baud: u32,
    /// Seconds to wait for a reply before a pending request is discarded
    pub response_timeout: f64,
    /// Serial read timeout in seconds
    pub read_timeout: f64,
    /// Serial write timeout in seconds
    pub write_timeout: f64,
    /// Outbound queue capacity
    pub max_queue_size: usize,
    /// Default feed speed in mm/s
    pub feed_speed: u32,
    /// Default retract speed in mm/s
    pub retract_speed: u32,
    /// Default retract mode (0 normal, 1 enhanced)
    pub retract_mode: u8,
    /// Retract length used when leaving a tool, in mm
    pub toolchange_retract_length: u32,
    /// Unchanged feed-assist polls that end a parking session
    pub park_hit_count: u32,
    /// Upper bound accepted for the dryer temperature, in °C
    pub max_dryer_temperature: u32,
    /// Clear the active feed-assist slot once parking completes
    pub disable_assist_after_toolchange: bool,
    /// Enable infinity-spool failover
    pub infinity_spool_mode: bool,
}

impl Default for AceConfig {
    fn default() -> Self {
        Self {
            serial: "/dev/ttyACM0".to_string(),
            baud: 115200,
            response_timeout: 2.0,
            read_timeout: 0.1,
            write_timeout: 0.5,
            max_queue_size: 20,
            feed_speed: 50,
            retract_speed: 50,
            retract_mode: 0,
            toolchange_retract_length: 100,
            park_hit_count: 5,
            max_dryer_temperature: 55,
            disable_assist_after_toolchange: true,
            infinity_spool_mode: false,
        }
    }
}

impl AceConfig {
    /// Response timeout as a `Duration`
    pub fn response_timeout_duration(&self) -> Duration {
        secs(self.response_timeout)
    }

    /// Read timeout as a `Duration`
    pub fn read_timeout_duration(&self) -> Duration {
        secs(self.read_timeout)
    }

    /// Write timeout as a `Duration`
    pub fn write_timeout_duration(&self) -> Duration {
        secs(self.write_timeout)
    }

    /// Time the device needs to retract `length` mm at `speed` mm/s, plus a
    /// one second settle margin
    pub fn retract_settle_time(&self, length: u32, speed: u32) -> Duration {
        secs(length as f64 / speed.max(1) as f64 + 1.0)
    }
}

fn secs(value: f64) -> Duration {
    Duration::try_from_secs_f64(value).unwrap_or(Duration::ZERO)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = AceConfig::default();
        assert_eq!(config.max_queue_size, 20);
        assert_eq!(config.park_hit_count, 5);
        assert_eq!(config.response_timeout_duration(), Duration::from_secs(2));
        assert!(config.disable_assist_after_toolchange);
        assert!(!config.infinity_spool_mode);
    }

    #[test]
    fn test_retract_settle_time() {
        let config = AceConfig::default();
        assert_eq!(
            config.retract_settle_time(100, 50),
            Duration::from_secs(3)
        );
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: AceConfig =
            serde_json::from_str(r#"{"serial": "/dev/ttyUSB1", "park_hit_count": 7}"#).unwrap();
        assert_eq!(config.serial, "/dev/ttyUSB1");
        assert_eq!(config.park_hit_count, 7);
        assert_eq!(config.baud, 115200);
    }

    #[test]
    fn test_negative_timeout_clamps_to_zero() {
        let config = AceConfig {
            read_timeout: -1.0,
            ..Default::default()
        };
        assert_eq!(config.read_timeout_duration(), Duration::ZERO);
    }
}
