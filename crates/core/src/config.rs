use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::cabinet::CombinePolicy;

/// Runtime settings of the cabinet core.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Settings {
    /// Flush cadence towards the output sink.
    pub flush_hz: u32,
    /// Upper bound for a single sink write before it counts as failed.
    pub sink_timeout_ms: u64,
    pub combine_policy: CombinePolicy,
    /// Run the flush loop on its own thread. When off, the host calls
    /// `Pinball::flush` itself.
    pub auto_flush: bool,
    /// Directory holding topology files. Defaults to the platform config dir.
    pub config_dir: Option<PathBuf>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            flush_hz: 60,
            sink_timeout_ms: 50,
            combine_policy: CombinePolicy::LastWrite,
            auto_flush: true,
            config_dir: None,
        }
    }
}

impl Settings {
    pub fn sink_timeout(&self) -> Duration {
        Duration::from_millis(self.sink_timeout_ms)
    }

    pub fn flush_interval(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.flush_hz.max(1) as f64)
    }

    pub fn config_dir(&self) -> PathBuf {
        self.config_dir.clone().unwrap_or_else(default_config_dir)
    }
}

/// `<platform config dir>/tilt`, or `./tilt` when the platform has none.
pub fn default_config_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("tilt")
}

/// Configuration manager for tilt settings.
/// Separates the schema (valid options) from the persisted values, which live
/// in `config.json` inside the config directory by default.
pub struct ConfigManager {
    config_path: PathBuf,
    settings: Settings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigSchema {
    pub general: GeneralConfigSchema,
    pub output: OutputConfigSchema,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralConfigSchema {
    pub auto_flush: ConfigOption<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputConfigSchema {
    pub flush_hz: ConfigOption<u32>,
    pub sink_timeout_ms: ConfigOption<u64>,
    pub combine_policy: ConfigOption<CombinePolicy>,
}

/// Configuration option with validation and available choices
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigOption<T> {
    pub default: T,
    pub valid_range: Option<(T, T)>,
    pub valid_choices: Option<Vec<T>>,
    pub description: String,
    pub requires_restart: bool,
}

/// Persisted configuration file format
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigFile {
    pub version: String,
    pub settings: Settings,
    pub created_at: String,
    pub modified_at: String,
}

impl ConfigManager {
    /// Create a new configuration manager.
    /// Without a path, uses `config.json` in [`default_config_dir`].
    pub fn new(config_path: Option<PathBuf>) -> Self {
        let config_path = config_path.unwrap_or_else(|| default_config_dir().join("config.json"));

        Self {
            config_path,
            settings: Settings::default(),
        }
    }

    /// Load settings from the configuration file.
    /// Writes a default file first if none exists.
    pub fn load(&mut self) -> Result<Settings, ConfigError> {
        if !self.config_path.exists() {
            self.save()?;
            return Ok(self.settings.clone());
        }

        let content = fs::read_to_string(&self.config_path)
            .map_err(|e| ConfigError::ReadError(e.to_string()))?;

        let config_file: ConfigFile =
            serde_json::from_str(&content).map_err(|e| ConfigError::ParseError(e.to_string()))?;

        if config_file.version != env!("CARGO_PKG_VERSION") {
            log::warn!(
                "Config file version {} doesn't match application version {}. Using defaults for new settings.",
                config_file.version,
                env!("CARGO_PKG_VERSION")
            );
        }

        Self::validate_settings(&config_file.settings).map_err(ConfigError::ValidationError)?;

        self.settings = config_file.settings;
        Ok(self.settings.clone())
    }

    /// Save current settings to the configuration file
    pub fn save(&self) -> Result<(), ConfigError> {
        if let Some(parent) = self.config_path.parent() {
            if parent != Path::new("") && parent != Path::new(".") {
                fs::create_dir_all(parent).map_err(|e| ConfigError::WriteError(e.to_string()))?;
            }
        }

        let now = chrono::Utc::now().to_rfc3339();
        let config_file = ConfigFile {
            version: env!("CARGO_PKG_VERSION").to_string(),
            settings: self.settings.clone(),
            created_at: now.clone(),
            modified_at: now,
        };

        let content = serde_json::to_string_pretty(&config_file)
            .map_err(|e| ConfigError::SerializeError(e.to_string()))?;

        fs::write(&self.config_path, content)
            .map_err(|e| ConfigError::WriteError(e.to_string()))?;

        Ok(())
    }

    /// Update settings and save to file
    pub fn update_settings(&mut self, settings: Settings) -> Result<(), ConfigError> {
        Self::validate_settings(&settings).map_err(ConfigError::ValidationError)?;
        self.settings = settings;
        self.save()
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    /// Configuration schema with available options
    pub fn schema() -> ConfigSchema {
        ConfigSchema {
            general: GeneralConfigSchema {
                auto_flush: ConfigOption {
                    default: true,
                    valid_range: None,
                    valid_choices: None,
                    description: "Flush outputs on a dedicated thread".to_string(),
                    requires_restart: true,
                },
            },
            output: OutputConfigSchema {
                flush_hz: ConfigOption {
                    default: 60,
                    valid_range: Some((1, 1000)),
                    valid_choices: None,
                    description: "Output flush rate in Hz".to_string(),
                    requires_restart: true,
                },
                sink_timeout_ms: ConfigOption {
                    default: 50,
                    valid_range: Some((1, 5000)),
                    valid_choices: None,
                    description: "Timeout for a single hardware write in milliseconds"
                        .to_string(),
                    requires_restart: false,
                },
                combine_policy: ConfigOption {
                    default: CombinePolicy::LastWrite,
                    valid_range: None,
                    valid_choices: Some(vec![CombinePolicy::LastWrite, CombinePolicy::Max]),
                    description: "How concurrent writes to one output within a tick combine"
                        .to_string(),
                    requires_restart: true,
                },
            },
        }
    }

    /// Validate settings against schema
    pub fn validate_settings(settings: &Settings) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();
        let schema = Self::schema();

        if let Some((min, max)) = schema.output.flush_hz.valid_range {
            if settings.flush_hz < min || settings.flush_hz > max {
                errors.push(format!("flush_hz must be between {} and {}", min, max));
            }
        }

        if let Some((min, max)) = schema.output.sink_timeout_ms.valid_range {
            if settings.sink_timeout_ms < min || settings.sink_timeout_ms > max {
                errors.push(format!("sink_timeout_ms must be between {} and {}", min, max));
            }
        }

        if let Some(choices) = &schema.output.combine_policy.valid_choices {
            if !choices.contains(&settings.combine_policy) {
                errors.push(format!("combine_policy must be one of: {:?}", choices));
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    /// Reset settings to defaults
    pub fn reset_to_defaults(&mut self) -> Result<(), ConfigError> {
        self.settings = Settings::default();
        self.save()
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(String),
    #[error("Failed to write config file: {0}")]
    WriteError(String),
    #[error("Failed to parse config file: {0}")]
    ParseError(String),
    #[error("Failed to serialize config: {0}")]
    SerializeError(String),
    #[error("Config validation errors: {}", .0.join(", "))]
    ValidationError(Vec<String>),
}
