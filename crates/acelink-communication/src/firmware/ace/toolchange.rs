//! Tool-change orchestration
//!
//! A tool change retracts the loaded slot, waits for the device to report
//! it ready again, then parks the new slot at the toolhead. Host hooks run
//! before and after so the motion system can move the toolhead out of the
//! way. Any failure aborts the sequence where it stands; nothing is rolled
//! back.

use super::commands::AceCommand;
use super::controller::AceController;
use acelink_core::{
    tool_to_value, AceEvent, OperationError, RequestError, Result, SlotStatus, ToolChangeEvent,
    VAR_CURRENT_INDEX,
};
use serde::Serialize;
use std::future::Future;
use std::time::Duration;
use tokio::sync::oneshot::error::TryRecvError;
use tokio::time::Instant;

/// How long a retracted slot may take to report ready
pub const SLOT_READY_TIMEOUT: Duration = Duration::from_secs(10);

/// How long parking may take
pub const PARKING_TIMEOUT: Duration = Duration::from_secs(30);

/// Interval between state checks while waiting
pub const WAIT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// What a finished tool change did
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ToolChangeReport {
    /// Tool before the change
    pub from: Option<u8>,
    /// Tool after the change
    pub to: Option<u8>,
    /// False when the requested tool was already loaded
    pub changed: bool,
}

pub(super) fn tool_label(tool: Option<u8>) -> String {
    tool.map(|t| t.to_string()).unwrap_or_else(|| "-1".to_string())
}

impl AceController {
    /// Switch to `target`, or unload everything with `None`
    pub async fn change_tool(&self, target: Option<u8>) -> Result<ToolChangeReport> {
        if let Some(slot) = target {
            Self::check_slot(slot)?;
        }
        let _sequence = self.inner.sequence.lock().await;

        let from = self.current_tool();
        if from == target {
            tracing::info!("Tool {} already loaded", tool_label(target));
            return Ok(ToolChangeReport {
                from,
                to: target,
                changed: false,
            });
        }
        if let Some(slot) = target {
            self.ensure_slot_ready(slot)?;
        }

        tracing::info!("Tool change {} -> {}", tool_label(from), tool_label(target));
        let hooks = self.inner.hooks.clone();
        run_hook("pre_toolchange", hooks.pre_toolchange(from, target)).await?;
        hooks.wait_moves().await;
        self.set_current_tool(target)?;

        if let Some(previous) = from {
            self.retract_slot(previous).await?;
        }
        if let Some(next) = target {
            self.park_and_wait(next).await?;
        }

        hooks.wait_moves().await;
        run_hook("post_toolchange", hooks.post_toolchange(from, target)).await?;
        hooks.wait_moves().await;

        tracing::info!("Tool changed from {} to {}", tool_label(from), tool_label(target));
        self.inner
            .events
            .publish(AceEvent::ToolChange(ToolChangeEvent::Changed { from, to: target }));
        Ok(ToolChangeReport {
            from,
            to: target,
            changed: true,
        })
    }

    pub(super) fn ensure_slot_ready(&self, slot: u8) -> Result<()> {
        let status = self.inner.engine.lock().telemetry().slot_status(slot);
        if status == SlotStatus::Ready {
            Ok(())
        } else {
            Err(OperationError::SlotNotReady {
                slot,
                status: status.to_string(),
            }
            .into())
        }
    }

    pub(super) fn set_current_tool(&self, tool: Option<u8>) -> Result<()> {
        self.inner
            .variables
            .set(VAR_CURRENT_INDEX, tool_to_value(tool))
    }

    /// Retract the leaving slot and wait until the device reports it ready
    async fn retract_slot(&self, slot: u8) -> Result<()> {
        let config = self.config();
        let length = config.toolchange_retract_length;
        let speed = config.retract_speed;

        let (_, mut ack) = self.inner.engine.lock().submit(AceCommand::UnwindFilament {
            index: slot,
            length,
            speed,
            mode: config.retract_mode,
        });
        self.inner
            .hooks
            .dwell(config.retract_settle_time(length, speed))
            .await;

        match ack.try_recv() {
            Ok(Ok(response)) if !response.is_ok() => {
                return Err(RequestError::Device {
                    code: response.code,
                    message: response.error_message(),
                }
                .into());
            }
            Ok(Err(e)) => tracing::warn!("Retract of slot {} not acknowledged: {}", slot, e),
            Err(TryRecvError::Empty) => {
                tracing::debug!("Retract of slot {} still unacknowledged", slot)
            }
            _ => {}
        }

        let started = Instant::now();
        loop {
            let status = self.inner.engine.lock().telemetry().slot_status(slot);
            if status == SlotStatus::Ready {
                return Ok(());
            }
            let waited = started.elapsed();
            if waited >= SLOT_READY_TIMEOUT {
                tracing::error!("Timeout waiting for slot {} to be ready ({})", slot, status);
                return Err(OperationError::Timeout {
                    stage: format!("slot {} to be ready", slot),
                    waited_ms: waited.as_millis() as u64,
                }
                .into());
            }
            self.inner.hooks.dwell(WAIT_POLL_INTERVAL).await;
        }
    }

    /// Park `slot` and wait for the session to end
    pub(super) async fn park_and_wait(&self, slot: u8) -> Result<()> {
        self.inner
            .engine
            .lock()
            .start_parking(slot, Instant::now())?;

        let started = Instant::now();
        loop {
            let (active, failed) = {
                let engine = self.inner.engine.lock();
                (engine.parking().is_active(), engine.parking().failed())
            };
            if !active {
                if failed {
                    return Err(OperationError::ParkingFailed { slot }.into());
                }
                return Ok(());
            }

            let waited = started.elapsed();
            if waited >= PARKING_TIMEOUT {
                tracing::error!("Timeout waiting for slot {} to park", slot);
                self.inner.engine.lock().abort_parking();
                return Err(OperationError::Timeout {
                    stage: format!("slot {} to park", slot),
                    waited_ms: waited.as_millis() as u64,
                }
                .into());
            }
            self.inner.hooks.dwell(WAIT_POLL_INTERVAL).await;
        }
    }
}

/// Await a host hook, mapping its error
pub(super) async fn run_hook<F>(name: &str, hook: F) -> Result<()>
where
    F: Future<Output = anyhow::Result<()>>,
{
    hook.await.map_err(|e| {
        tracing::error!("Hook {} failed: {:#}", name, e);
        OperationError::Hook {
            hook: name.to_string(),
            reason: format!("{:#}", e),
        }
        .into()
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tool_label() {
        assert_eq!(tool_label(None), "-1");
        assert_eq!(tool_label(Some(2)), "2");
    }

    #[tokio::test]
    async fn test_run_hook_maps_errors() {
        let err = run_hook("pre_toolchange", async { Err::<(), _>(anyhow::anyhow!("nozzle cold")) })
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            acelink_core::Error::Operation(OperationError::Hook { ref hook, ref reason })
                if hook == "pre_toolchange" && reason == "nozzle cold"
        ));
    }
}
