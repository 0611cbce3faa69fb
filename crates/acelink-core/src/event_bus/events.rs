//! Event type definitions for the event bus.

use serde::{Deserialize, Serialize};

/// Root event enum for all driver events
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AceEvent {
    /// Link lifecycle
    Connection(ConnectionEvent),
    /// Feed-assist parking sessions
    Parking(ParkingEvent),
    /// Tool changes and infinity-spool failovers
    ToolChange(ToolChangeEvent),
    /// Request queue
    Queue(QueueEvent),
}

impl AceEvent {
    /// Get the category of this event
    pub fn category(&self) -> EventCategory {
        match self {
            AceEvent::Connection(_) => EventCategory::Connection,
            AceEvent::Parking(_) => EventCategory::Parking,
            AceEvent::ToolChange(_) => EventCategory::ToolChange,
            AceEvent::Queue(_) => EventCategory::Queue,
        }
    }
}

impl std::fmt::Display for AceEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AceEvent::Connection(ConnectionEvent::Connected { port }) => {
                write!(f, "Connected to {}", port)
            }
            AceEvent::Connection(ConnectionEvent::Disconnected { reason }) => {
                write!(f, "Disconnected: {}", reason)
            }
            AceEvent::Connection(ConnectionEvent::AttemptsExhausted { attempts }) => {
                write!(f, "Connection failed after {} attempts", attempts)
            }
            AceEvent::Parking(ParkingEvent::Started { slot }) => {
                write!(f, "Parking slot {}", slot)
            }
            AceEvent::Parking(ParkingEvent::Completed { slot }) => {
                write!(f, "Parking completed for slot {}", slot)
            }
            AceEvent::Parking(ParkingEvent::Failed { slot, reason }) => {
                write!(f, "Parking failed for slot {}: {}", slot, reason)
            }
            AceEvent::ToolChange(ToolChangeEvent::Changed { from, to }) => {
                write!(f, "Tool changed from {} to {}", tool_label(*from), tool_label(*to))
            }
            AceEvent::ToolChange(ToolChangeEvent::InfinitySpool { from, to }) => {
                write!(f, "Infinity spool from {} to {}", tool_label(*from), to)
            }
            AceEvent::Queue(QueueEvent::Overflow { dropped }) => {
                write!(f, "Request queue overflow, {} dropped", dropped)
            }
        }
    }
}

fn tool_label(tool: Option<u8>) -> String {
    tool.map(|t| t.to_string()).unwrap_or_else(|| "-1".to_string())
}

/// Event category for filtering
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventCategory {
    /// Link lifecycle events.
    Connection,
    /// Parking session events.
    Parking,
    /// Tool change events.
    ToolChange,
    /// Request queue events.
    Queue,
}

/// Connection-related events
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ConnectionEvent {
    /// Link opened.
    Connected {
        /// Serial port path.
        port: String,
    },
    /// Link closed.
    Disconnected {
        /// Why the link went down.
        reason: String,
    },
    /// A startup connection burst gave up.
    AttemptsExhausted {
        /// Attempts made.
        attempts: u32,
    },
}

/// Parking session events
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ParkingEvent {
    /// Feed assist requested for a slot.
    Started {
        /// Slot being parked.
        slot: u8,
    },
    /// Filament reached the toolhead.
    Completed {
        /// Slot that was parked.
        slot: u8,
    },
    /// Parking gave up.
    Failed {
        /// Slot that was being parked.
        slot: u8,
        /// Why the session failed.
        reason: String,
    },
}

/// Tool change events
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ToolChangeEvent {
    /// A tool change finished.
    Changed {
        /// Previous tool, `None` when nothing was loaded.
        from: Option<u8>,
        /// New tool, `None` when unloading.
        to: Option<u8>,
    },
    /// An infinity-spool failover finished.
    InfinitySpool {
        /// Exhausted slot.
        from: Option<u8>,
        /// Slot now feeding.
        to: u8,
    },
}

/// Request queue events
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum QueueEvent {
    /// The outbound queue was shed.
    Overflow {
        /// Requests that received an overflow error.
        dropped: usize,
    },
}
