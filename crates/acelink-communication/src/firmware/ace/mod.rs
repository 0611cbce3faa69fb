//! ACE filament changer
//!
//! - `commands`: typed device methods
//! - `state`: telemetry store
//! - `parking`: feed-assist parking supervisor
//! - `engine`: synchronous core driven by the link timers
//! - `controller`: async front end, connection supervision
//! - `operations`, `toolchange`, `infinity`: caller-facing sequences

pub mod commands;
pub mod controller;
pub mod engine;
pub mod infinity;
pub mod operations;
pub mod parking;
pub mod state;
pub mod toolchange;

pub use commands::{AceCommand, DRYER_FAN_SPEED};
pub use controller::{AceController, AceStatus};
pub use engine::{AceEngine, IDLE_POLL_INTERVAL, PARKING_POLL_INTERVAL};
pub use infinity::{select_next, Selection};
pub use operations::DEFAULT_DRYING_DURATION;
pub use parking::{
    ParkingFailure, ParkingOutcome, ParkingPhase, ParkingSession, ParkingSupervisor,
    NO_PROGRESS_TIMEOUT, RECHECK_DELAY,
};
pub use state::TelemetryStore;
pub use toolchange::{ToolChangeReport, PARKING_TIMEOUT, SLOT_READY_TIMEOUT, WAIT_POLL_INTERVAL};
