//! Direct device operations
//!
//! Each operation queues one request and waits for its reply. Replies with a
//! non-zero code surface as [`RequestError::Device`](acelink_core::RequestError).

use super::commands::AceCommand;
use super::controller::AceController;
use crate::communication::Response;
use acelink_core::{
    DeviceTelemetry, OperationError, Result, SlotStatus, MIN_DRYER_TEMPERATURE,
};
use serde_json::Value;
use std::time::Duration;
use tokio::time::Instant;

/// Drying duration used when none is given, in minutes
pub const DEFAULT_DRYING_DURATION: u32 = 240;

/// Pause after toggling feed assist
const FEED_ASSIST_SETTLE: Duration = Duration::from_millis(300);

/// Extra margin added to the feed and retract dwell
const MOVE_MARGIN: f64 = 0.1;

fn invalid(param: &str, reason: impl Into<String>) -> OperationError {
    OperationError::InvalidParameter {
        param: param.to_string(),
        reason: reason.into(),
    }
}

fn positive(param: &str, value: u32) -> std::result::Result<u32, OperationError> {
    if value == 0 {
        Err(invalid(param, "must be at least 1"))
    } else {
        Ok(value)
    }
}

fn move_time(length: u32, speed: u32) -> Duration {
    Duration::try_from_secs_f64(f64::from(length) / f64::from(speed.max(1)) + MOVE_MARGIN)
        .unwrap_or(Duration::ZERO)
}

impl AceController {
    /// Poll status and return the merged telemetry
    pub async fn request_status(&self) -> Result<DeviceTelemetry> {
        self.request(AceCommand::GetStatus).await?;
        Ok(self.telemetry())
    }

    /// Model and firmware information
    pub async fn device_info(&self) -> Result<Value> {
        let response = self.request(AceCommand::GetInfo).await?;
        Ok(response.result.unwrap_or_default())
    }

    /// Start the dryer
    pub async fn start_drying(&self, temp: u32, duration: u32) -> Result<()> {
        let max = self.config().max_dryer_temperature;
        if !(MIN_DRYER_TEMPERATURE..=max).contains(&temp) {
            return Err(invalid(
                "temp",
                format!("must be between {} and {}", MIN_DRYER_TEMPERATURE, max),
            )
            .into());
        }
        let duration = positive("duration", duration)?;

        self.request(AceCommand::Drying { temp, duration }).await?;
        tracing::info!("Drying started at {}°C for {} minutes", temp, duration);
        Ok(())
    }

    /// Stop the dryer
    pub async fn stop_drying(&self) -> Result<()> {
        self.request(AceCommand::DryingStop).await?;
        tracing::info!("Drying stopped");
        Ok(())
    }

    /// Enable feed assist on a slot
    pub async fn enable_feed_assist(&self, index: u8) -> Result<()> {
        let index = Self::check_slot(index)?;
        self.request(AceCommand::StartFeedAssist { index }).await?;
        self.inner.engine.lock().set_feed_assist_slot(Some(index));
        tracing::info!("Feed assist enabled for slot {}", index);
        self.inner.hooks.dwell(FEED_ASSIST_SETTLE).await;
        Ok(())
    }

    /// Disable feed assist; defaults to the slot it was last enabled on
    pub async fn disable_feed_assist(&self, index: Option<u8>) -> Result<()> {
        let index = match index.or_else(|| self.feed_assist_slot()) {
            Some(index) => Self::check_slot(index)?,
            None => return Err(invalid("index", "no slot has feed assist enabled").into()),
        };

        self.request(AceCommand::StopFeedAssist { index }).await?;
        self.inner.engine.lock().set_feed_assist_slot(None);
        tracing::info!("Feed assist disabled for slot {}", index);
        self.inner.hooks.dwell(FEED_ASSIST_SETTLE).await;
        Ok(())
    }

    /// Start parking a slot without waiting for it to finish
    ///
    /// Refused while a tool change or infinity-spool sequence runs, since
    /// the sequence waits on the parking supervisor's outcome.
    pub fn park_to_toolhead(&self, index: u8) -> Result<()> {
        let index = Self::check_slot(index)?;
        let Ok(_sequence) = self.inner.sequence.try_lock() else {
            return Err(OperationError::SequenceRunning.into());
        };
        let mut engine = self.inner.engine.lock();

        if let Some(session) = engine.parking().session() {
            return Err(OperationError::Busy { slot: session.slot }.into());
        }
        let status = engine.telemetry().slot_status(index);
        if status != SlotStatus::Ready {
            return Err(OperationError::SlotNotReady {
                slot: index,
                status: status.to_string(),
            }
            .into());
        }

        engine.start_parking(index, Instant::now())?;
        Ok(())
    }

    /// Feed filament; speed defaults to `feed_speed`
    pub async fn feed(&self, index: u8, length: u32, speed: Option<u32>) -> Result<()> {
        let index = Self::check_slot(index)?;
        let length = positive("length", length)?;
        let speed = positive("speed", speed.unwrap_or(self.config().feed_speed))?;

        self.request(AceCommand::FeedFilament {
            index,
            length,
            speed,
        })
        .await?;
        self.inner.hooks.dwell(move_time(length, speed)).await;
        Ok(())
    }

    /// Change the speed of a running feed
    pub async fn update_feeding_speed(&self, index: u8, speed: u32) -> Result<()> {
        let index = Self::check_slot(index)?;
        let speed = positive("speed", speed)?;
        self.request(AceCommand::UpdateFeedingSpeed { index, speed })
            .await?;
        Ok(())
    }

    /// Abort a running feed
    pub async fn stop_feed(&self, index: u8) -> Result<()> {
        let index = Self::check_slot(index)?;
        self.request(AceCommand::StopFeedFilament { index }).await?;
        tracing::info!("Feed stopped for slot {}", index);
        Ok(())
    }

    /// Retract filament; speed and mode default to configuration
    pub async fn retract(
        &self,
        index: u8,
        length: u32,
        speed: Option<u32>,
        mode: Option<u8>,
    ) -> Result<()> {
        let index = Self::check_slot(index)?;
        let length = positive("length", length)?;
        let speed = positive("speed", speed.unwrap_or(self.config().retract_speed))?;
        let mode = mode.unwrap_or(self.config().retract_mode);
        if mode > 1 {
            return Err(invalid("mode", "must be 0 (normal) or 1 (enhanced)").into());
        }

        self.request(AceCommand::UnwindFilament {
            index,
            length,
            speed,
            mode,
        })
        .await?;
        self.inner.hooks.dwell(move_time(length, speed)).await;
        Ok(())
    }

    /// Change the speed of a running retract
    pub async fn update_retract_speed(&self, index: u8, speed: u32) -> Result<()> {
        let index = Self::check_slot(index)?;
        let speed = positive("speed", speed)?;
        self.request(AceCommand::UpdateUnwindingSpeed { index, speed })
            .await?;
        Ok(())
    }

    /// Abort a running retract
    pub async fn stop_retract(&self, index: u8) -> Result<()> {
        let index = Self::check_slot(index)?;
        self.request(AceCommand::StopUnwindFilament { index })
            .await?;
        tracing::info!("Retract stopped for slot {}", index);
        Ok(())
    }

    /// RFID information for the spool in a slot
    pub async fn filament_info(&self, index: u8) -> Result<Value> {
        let index = Self::check_slot(index)?;
        let response = self.request(AceCommand::GetFilamentInfo { index }).await?;
        Ok(response.result.unwrap_or_default())
    }

    /// Send any method and return the reply as is, whatever its code
    pub async fn raw_request(&self, method: &str, params: Option<Value>) -> Result<Response> {
        if method.trim().is_empty() {
            return Err(invalid("method", "must not be empty").into());
        }
        self.exchange(AceCommand::Raw {
            method: method.to_string(),
            params,
        })
        .await
    }
}
