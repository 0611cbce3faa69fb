//! acelink Settings Crate
//!
//! Handles driver configuration files and the persistent variable store.

pub mod config;
pub mod error;
pub mod persistence;

pub use config::{
    config_dir, default_config_path, ensure_config_dir, load_config, load_or_default,
    parse_config, save_config, validate_config, ConfigFormat,
};
pub use error::{SettingsError, SettingsResult};
pub use persistence::{default_variables_path, JsonVariableStore};
