//! Configuration files
//!
//! Loads and saves [`AceConfig`] as JSON or TOML, chosen by file extension.
//! Missing options take their defaults; every load and save is validated.

use crate::error::{SettingsError, SettingsResult};
use acelink_core::{AceConfig, MIN_DRYER_TEMPERATURE};
use std::path::{Path, PathBuf};

/// Application directory name under the platform config directory
pub const APP_DIR: &str = "acelink";

/// Supported file formats
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    /// `.json`
    Json,
    /// `.toml`
    Toml,
}

impl ConfigFormat {
    /// Pick the format from a path's extension
    pub fn from_path(path: &Path) -> SettingsResult<Self> {
        match path.extension().and_then(|ext| ext.to_str()) {
            Some("json") => Ok(Self::Json),
            Some("toml") => Ok(Self::Toml),
            other => Err(SettingsError::UnsupportedFormat(
                other.unwrap_or("<none>").to_string(),
            )),
        }
    }
}

/// Platform config directory for acelink
pub fn config_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_DIR)
}

/// Default configuration file path
pub fn default_config_path() -> PathBuf {
    config_dir().join("config.toml")
}

/// Create the config directory if needed
pub fn ensure_config_dir() -> SettingsResult<PathBuf> {
    let dir = config_dir();
    std::fs::create_dir_all(&dir)
        .map_err(|e| SettingsError::ConfigDirectory(format!("{}: {}", dir.display(), e)))?;
    Ok(dir)
}

/// Parse configuration text
pub fn parse_config(content: &str, format: ConfigFormat) -> SettingsResult<AceConfig> {
    let config: AceConfig = match format {
        ConfigFormat::Json => serde_json::from_str(content)?,
        ConfigFormat::Toml => toml::from_str(content)?,
    };
    validate_config(&config)?;
    Ok(config)
}

/// Load config from file (JSON or TOML)
pub fn load_config(path: &Path) -> SettingsResult<AceConfig> {
    let format = ConfigFormat::from_path(path)?;
    let content = std::fs::read_to_string(path)
        .map_err(|e| SettingsError::LoadError(format!("{}: {}", path.display(), e)))?;
    let config = parse_config(&content, format)?;
    tracing::info!("Loaded configuration from {}", path.display());
    Ok(config)
}

/// Load config if the file exists, defaults otherwise
pub fn load_or_default(path: &Path) -> SettingsResult<AceConfig> {
    if path.exists() {
        load_config(path)
    } else {
        tracing::info!("No configuration at {}, using defaults", path.display());
        Ok(AceConfig::default())
    }
}

/// Save config to file (JSON or TOML)
pub fn save_config(config: &AceConfig, path: &Path) -> SettingsResult<()> {
    validate_config(config)?;

    let content = match ConfigFormat::from_path(path)? {
        ConfigFormat::Json => serde_json::to_string_pretty(config)?,
        ConfigFormat::Toml => toml::to_string_pretty(config)?,
    };

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, content)
        .map_err(|e| SettingsError::SaveError(format!("{}: {}", path.display(), e)))?;
    Ok(())
}

/// Validate configuration
pub fn validate_config(config: &AceConfig) -> SettingsResult<()> {
    if config.serial.trim().is_empty() {
        return Err(SettingsError::invalid("serial", "must not be empty"));
    }
    if config.baud == 0 {
        return Err(SettingsError::invalid("baud", "must be > 0"));
    }

    for (key, value) in [
        ("response_timeout", config.response_timeout),
        ("read_timeout", config.read_timeout),
        ("write_timeout", config.write_timeout),
    ] {
        if !value.is_finite() || value <= 0.0 {
            return Err(SettingsError::invalid(key, "must be a positive number of seconds"));
        }
    }

    if config.max_queue_size == 0 {
        return Err(SettingsError::invalid("max_queue_size", "must be > 0"));
    }
    if config.feed_speed == 0 {
        return Err(SettingsError::invalid("feed_speed", "must be > 0"));
    }
    if config.retract_speed == 0 {
        return Err(SettingsError::invalid("retract_speed", "must be > 0"));
    }
    if config.retract_mode > 1 {
        return Err(SettingsError::invalid(
            "retract_mode",
            "must be 0 (normal) or 1 (enhanced)",
        ));
    }
    if config.toolchange_retract_length == 0 {
        return Err(SettingsError::invalid("toolchange_retract_length", "must be > 0"));
    }
    if config.park_hit_count == 0 {
        return Err(SettingsError::invalid("park_hit_count", "must be > 0"));
    }
    if config.max_dryer_temperature < MIN_DRYER_TEMPERATURE {
        return Err(SettingsError::invalid(
            "max_dryer_temperature",
            format!("must be at least {}", MIN_DRYER_TEMPERATURE),
        ));
    }

    Ok(())
}
