//! # acelink Core
//!
//! Core types, errors and collaborator interfaces for acelink.
//! Provides the device telemetry model, driver configuration, the event bus
//! and the hook traits hosts implement.

pub mod config;
pub mod data;
pub mod error;
pub mod event_bus;
pub mod host;

pub use config::{AceConfig, MIN_DRYER_TEMPERATURE};

pub use data::{
    DeviceStatus, DeviceTelemetry, DryerState, DryerStatus, InfinityOrder, Slot, SlotStatus,
    TelemetryUpdate, ORDER_LEN, SLOT_COUNT,
};

pub use error::{ConnectionError, Error, FrameError, OperationError, RequestError, Result};

pub use event_bus::{
    AceEvent, ConnectionEvent, EventBus, EventCategory, EventFilter, ParkingEvent, QueueEvent,
    SubscriptionId, ToolChangeEvent,
};

pub use host::{
    tool_from_value, tool_to_value, HostHooks, MemoryVariableStore, NoopHooks, VariableStore,
    VAR_CURRENT_INDEX, VAR_INFINITY_ORDER, VAR_INFINITY_POSITION,
};
