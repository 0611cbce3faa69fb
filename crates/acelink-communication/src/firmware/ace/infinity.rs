//! Infinity spool
//!
//! When the loaded spool runs out, the host asks for the next slot in an
//! operator-defined order. The order has four positions; `none` positions
//! are skipped and the first slot reporting ready wins.

use super::controller::AceController;
use super::toolchange::{run_hook, tool_label};
use acelink_core::{
    AceEvent, DeviceTelemetry, InfinityOrder, OperationError, Result, SlotStatus,
    ToolChangeEvent, VAR_INFINITY_ORDER, VAR_INFINITY_POSITION,
};
use serde::Serialize;
use serde_json::Value;

/// Slot chosen by the selector and the order position it came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Selection {
    /// Slot to load
    pub slot: u8,
    /// Order position holding that slot
    pub position: usize,
}

/// Pick the next ready slot after the current one
///
/// The saved cursor is trusted only when its entry still names the current
/// tool; otherwise the current tool is looked up in the order. A tool that
/// is not in the order starts the scan from the first position.
pub fn select_next(
    order: &InfinityOrder,
    cursor: Option<usize>,
    current: u8,
    telemetry: &DeviceTelemetry,
) -> std::result::Result<Selection, OperationError> {
    let len = order.len();
    let start = match cursor {
        Some(pos) if order.get(pos) == Some(current) => Some(pos),
        _ => order.position_of(current),
    };
    let first = start.map_or(0, |pos| pos + 1);

    (0..len)
        .map(|i| (first + i) % len)
        .filter_map(|pos| order.get(pos).map(|slot| (pos, slot)))
        .find(|&(_, slot)| telemetry.slot_status(slot) == SlotStatus::Ready)
        .map(|(position, slot)| Selection { slot, position })
        .ok_or(OperationError::OrderExhausted)
}

impl AceController {
    /// Fail over from the current tool to the next ready slot in the order
    pub async fn infinity_spool(&self) -> Result<Selection> {
        let _sequence = self.inner.sequence.lock().await;

        if !self.config().infinity_spool_mode {
            return Err(OperationError::InfinitySpoolDisabled.into());
        }
        let current = self.current_tool().ok_or(OperationError::NoCurrentTool)?;
        let order = self.infinity_order()?.ok_or(OperationError::OrderNotSet)?;
        let cursor = self
            .inner
            .variables
            .get_i64(VAR_INFINITY_POSITION)
            .and_then(|v| usize::try_from(v).ok());

        let selection = select_next(&order, cursor, current, &self.telemetry())?;
        tracing::info!(
            "Infinity spool: slot {} -> {} (order position {})",
            current,
            selection.slot,
            selection.position + 1
        );

        let hooks = self.inner.hooks.clone();
        run_hook("pre_infinity_spool", hooks.pre_infinity_spool()).await?;
        hooks.wait_moves().await;

        self.park_and_wait(selection.slot).await?;

        hooks.wait_moves().await;
        run_hook("post_infinity_spool", hooks.post_infinity_spool()).await?;
        hooks.wait_moves().await;

        self.set_current_tool(Some(selection.slot))?;
        self.inner
            .variables
            .set(VAR_INFINITY_POSITION, Value::from(selection.position))?;

        tracing::info!(
            "Infinity spool finished, tool {} -> {}",
            current,
            tool_label(Some(selection.slot))
        );
        self.inner
            .events
            .publish(AceEvent::ToolChange(ToolChangeEvent::InfinitySpool {
                from: Some(current),
                to: selection.slot,
            }));
        Ok(selection)
    }

    /// Validate and store a failover order, resetting the cursor
    pub fn set_infinity_order(&self, order: &str) -> Result<InfinityOrder> {
        let order: InfinityOrder = order.parse()?;
        self.inner
            .variables
            .set(VAR_INFINITY_ORDER, Value::from(order.to_string()))?;
        self.inner
            .variables
            .set(VAR_INFINITY_POSITION, Value::from(0))?;
        tracing::info!("Infinity spool order set to {}", order);
        Ok(order)
    }

    /// Stored failover order, if any
    pub fn infinity_order(&self) -> Result<Option<InfinityOrder>> {
        match self.inner.variables.get_string(VAR_INFINITY_ORDER) {
            Some(raw) if !raw.trim().is_empty() => Ok(Some(raw.parse()?)),
            _ => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use acelink_core::TelemetryUpdate;
    use serde_json::json;

    fn telemetry(statuses: [&str; 4]) -> DeviceTelemetry {
        let slots: Vec<Value> = statuses
            .iter()
            .enumerate()
            .map(|(index, status)| json!({"index": index, "status": status}))
            .collect();
        let mut telemetry = DeviceTelemetry::default();
        if let Some(update) = TelemetryUpdate::from_result(&json!({"slots": slots})) {
            telemetry.apply(update);
        }
        telemetry
    }

    #[test]
    fn test_skips_none_entries() {
        let order: InfinityOrder = "0,none,2,none".parse().unwrap();
        let telemetry = telemetry(["ready", "ready", "ready", "ready"]);
        let selection = select_next(&order, Some(0), 0, &telemetry).unwrap();
        assert_eq!(selection, Selection { slot: 2, position: 2 });
    }

    #[test]
    fn test_wraps_around() {
        let order: InfinityOrder = "0,1,2,3".parse().unwrap();
        let telemetry = telemetry(["ready", "empty", "empty", "ready"]);
        let selection = select_next(&order, Some(3), 3, &telemetry).unwrap();
        assert_eq!(selection, Selection { slot: 0, position: 0 });
    }

    #[test]
    fn test_stale_cursor_falls_back_to_search() {
        let order: InfinityOrder = "3,2,1,0".parse().unwrap();
        let telemetry = telemetry(["ready", "ready", "ready", "ready"]);
        // Cursor points at slot 3 but tool 1 is loaded
        let selection = select_next(&order, Some(0), 1, &telemetry).unwrap();
        assert_eq!(selection, Selection { slot: 0, position: 3 });
    }

    #[test]
    fn test_tool_outside_order_starts_at_first_position() {
        let order: InfinityOrder = "none,1,2,none".parse().unwrap();
        let telemetry = telemetry(["ready", "ready", "ready", "ready"]);
        let selection = select_next(&order, None, 3, &telemetry).unwrap();
        assert_eq!(selection, Selection { slot: 1, position: 1 });
    }

    #[test]
    fn test_exhausted() {
        let order: InfinityOrder = "0,1,none,none".parse().unwrap();
        let telemetry = telemetry(["empty", "empty", "ready", "ready"]);
        assert_eq!(
            select_next(&order, Some(0), 0, &telemetry),
            Err(OperationError::OrderExhausted)
        );
    }
}
