//! # acelink
//!
//! Host-side driver for ACE multi-slot filament changers attached over a
//! serial link:
//! - Framed JSON request/response protocol with checksum validation
//! - Request queueing, correlation and timeouts
//! - Connection supervision with automatic reconnection
//! - Feed-assist parking, tool changes and infinity-spool failover
//!
//! ## Architecture
//!
//! acelink is organized as a workspace with multiple crates:
//!
//! 1. **acelink-core** - Configuration, telemetry model, errors, events, host hooks
//! 2. **acelink-communication** - Wire protocol, dispatcher, serial link, device engine
//! 3. **acelink-settings** - Configuration files and persistent variables
//! 4. **acelink** - Binary that wires a controller to a real serial port

pub use acelink_communication::{communication, firmware};

pub use acelink_core::{
    AceConfig, AceEvent, ConnectionError, DeviceTelemetry, Error, EventBus, FrameError,
    HostHooks, NoopHooks, OperationError, RequestError, Result, SlotStatus, VariableStore,
};

pub use acelink_communication::{
    list_ports, AceController, AceStatus, LinkState, SerialConnector, SerialPortInfo,
    ToolChangeReport,
};

pub use acelink_settings::{JsonVariableStore, SettingsError};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Build date (set at compile time)
pub const BUILD_DATE: &str = env!("BUILD_DATE");

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// Human-readable multi-line output
    #[default]
    Pretty,
    /// One JSON object per line
    Json,
}

/// Initialize logging with the default configuration
///
/// Sets up structured logging with:
/// - Console output with pretty formatting
/// - RUST_LOG environment variable support
pub fn init_logging() -> anyhow::Result<()> {
    init_logging_with(LogFormat::Pretty)
}

/// Initialize logging in the given format
pub fn init_logging_with(format: LogFormat) -> anyhow::Result<()> {
    use tracing_subscriber::fmt;
    use tracing_subscriber::prelude::*;
    use tracing_subscriber::EnvFilter;

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    match format {
        LogFormat::Pretty => {
            let fmt_layer = fmt::layer()
                .with_writer(std::io::stdout)
                .with_target(true)
                .with_level(true)
                .with_thread_names(true)
                .with_line_number(true)
                .pretty();
            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt_layer)
                .try_init()?;
        }
        LogFormat::Json => {
            let fmt_layer = fmt::layer()
                .with_writer(std::io::stdout)
                .with_target(true)
                .json();
            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt_layer)
                .try_init()?;
        }
    }

    Ok(())
}
