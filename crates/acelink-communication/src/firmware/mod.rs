//! Device implementations
//!
//! Supported devices:
//! - ACE: four-slot filament changer with dryer and feed assist

pub mod ace;

pub use ace::{AceCommand, AceController, AceEngine, AceStatus, ToolChangeReport};
