//! # Event Bus Module
//!
//! Publish/subscribe of driver events: connection lifecycle, parking
//! sessions, tool changes and queue overflow.
//!
//! ```rust,ignore
//! use acelink_core::event_bus::{AceEvent, EventBus, EventCategory, EventFilter};
//!
//! let bus = EventBus::new();
//! let id = bus.subscribe(
//!     EventFilter::Categories(vec![EventCategory::Parking]),
//!     |event| println!("{}", event),
//! );
//! bus.unsubscribe(id);
//! ```

mod bus;
mod events;

pub use bus::*;
pub use events::*;
