// ============================================================================
// CONFIGURATION SYSTEM
// ============================================================================
// TOML file parsing with environment variable overrides (VIGIL_ prefix,
// `__` as section separator), validation, and defaults.
// ============================================================================

use std::path::{Path, PathBuf};
use std::time::Duration;

use figment::providers::{Env, Format, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::{DEFAULT_SAMPLING_RATE, MIN_SYNC_INTERVAL};

// ----------------------------------------------------------------------------
// Main Configuration Structure
// ----------------------------------------------------------------------------

/// Root configuration for the Vigil engine
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Identity of the observed service
    #[serde(default)]
    pub service: ServiceConfig,

    /// Periodic collection and retention
    #[serde(default)]
    pub collection: CollectionConfig,

    /// Sampling profiler
    #[serde(default)]
    pub profiler: ProfilerConfig,

    /// Resource thresholds reported alongside service info
    #[serde(default)]
    pub thresholds: ThresholdsConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl EngineConfig {
    /// Load configuration from file with environment overrides
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();

        if !path.exists() {
            return Err(ConfigError::FileNotFound {
                path: path.to_path_buf(),
            });
        }

        let figment = Figment::new()
            .merge(Toml::file(path))
            .merge(Env::prefixed("VIGIL_").split("__"));

        let config: Self = figment.extract().map_err(|e| ConfigError::ParseError {
            message: e.to_string(),
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Load from string (for testing)
    pub fn from_str(toml_str: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(toml_str).map_err(|e| ConfigError::ParseError {
            message: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.service.name.trim().is_empty() {
            return Err(ConfigError::missing_field("service.name"));
        }

        if self.collection.sync_interval < MIN_SYNC_INTERVAL {
            return Err(ConfigError::invalid_value(
                "collection.sync_interval",
                format!(
                    "Sync interval must be at least {}",
                    humantime::format_duration(MIN_SYNC_INTERVAL)
                ),
            ));
        }

        if self.collection.retention.is_zero() {
            return Err(ConfigError::invalid_value(
                "collection.retention",
                "Retention must be greater than zero",
            ));
        }

        for (field, value) in [
            ("thresholds.max_cpu_usage", self.thresholds.max_cpu_usage),
            ("thresholds.max_memory_usage", self.thresholds.max_memory_usage),
        ] {
            if !(0.0..=100.0).contains(&value) {
                return Err(ConfigError::invalid_value(field, "Must be a percentage in [0, 100]"));
            }
        }

        Ok(())
    }

    /// Create a default config file
    pub fn generate_default_config() -> String {
        let config = Self::default();
        toml::to_string_pretty(&config).unwrap_or_default()
    }

    /// Directory profile artifacts are written to
    pub fn profile_dir(&self) -> PathBuf {
        self.profiler
            .profile_dir
            .clone()
            .unwrap_or_else(|| self.service.data_dir.join("profiles"))
    }

    /// Sampling rate with the minimum of 1 applied
    pub fn effective_sampling_rate(&self) -> u64 {
        self.profiler.sampling_rate.max(1)
    }
}

// ----------------------------------------------------------------------------
// Service Configuration
// ----------------------------------------------------------------------------

/// Identity of the observed service
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Service name, also the key of the start-time cache
    #[serde(default = "default_service_name")]
    pub name: String,

    /// Value of the `host` label; detected when unset
    #[serde(default)]
    pub hostname: Option<String>,

    /// Base directory for profiles and the start-time cache
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: default_service_name(),
            hostname: None,
            data_dir: default_data_dir(),
        }
    }
}

fn default_service_name() -> String {
    "vigil-service".into()
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("./vigil-data")
}

// ----------------------------------------------------------------------------
// Collection Configuration
// ----------------------------------------------------------------------------

/// Periodic collection and retention settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectionConfig {
    /// How often a snapshot is collected and stored
    #[serde(default = "default_sync_interval", with = "humantime_serde")]
    pub sync_interval: Duration,

    /// How long stored points are kept
    #[serde(default = "default_retention", with = "humantime_serde")]
    pub retention: Duration,

    /// Collections slower than this are logged as warnings
    #[serde(default = "default_slow_collection_ms")]
    pub slow_collection_ms: u64,
}

impl Default for CollectionConfig {
    fn default() -> Self {
        Self {
            sync_interval: default_sync_interval(),
            retention: default_retention(),
            slow_collection_ms: default_slow_collection_ms(),
        }
    }
}

fn default_sync_interval() -> Duration {
    Duration::from_secs(5 * 60)
}

fn default_retention() -> Duration {
    Duration::from_secs(7 * 24 * 60 * 60)
}

fn default_slow_collection_ms() -> u64 {
    500
}

// ----------------------------------------------------------------------------
// Profiler Configuration
// ----------------------------------------------------------------------------

/// Sampling profiler settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProfilerConfig {
    /// Profile one call in every `sampling_rate` calls per function
    #[serde(default = "default_sampling_rate")]
    pub sampling_rate: u64,

    /// Where profile artifacts go; `<data_dir>/profiles` when unset
    #[serde(default)]
    pub profile_dir: Option<PathBuf>,

    /// Program (and leading arguments) used to render profiles. Empty means
    /// the built-in renderer for the default backend's artifacts.
    #[serde(default = "default_render_tool")]
    pub render_tool: Vec<String>,
}

impl Default for ProfilerConfig {
    fn default() -> Self {
        Self {
            sampling_rate: default_sampling_rate(),
            profile_dir: None,
            render_tool: default_render_tool(),
        }
    }
}

fn default_sampling_rate() -> u64 {
    DEFAULT_SAMPLING_RATE
}

fn default_render_tool() -> Vec<String> {
    Vec::new()
}

// ----------------------------------------------------------------------------
// Thresholds Configuration
// ----------------------------------------------------------------------------

/// Resource ceilings the service is expected to stay under
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThresholdsConfig {
    #[serde(default = "default_max_usage")]
    pub max_cpu_usage: f64,

    #[serde(default = "default_max_usage")]
    pub max_memory_usage: f64,

    #[serde(default = "default_max_threads")]
    pub max_threads: u64,
}

impl Default for ThresholdsConfig {
    fn default() -> Self {
        Self {
            max_cpu_usage: default_max_usage(),
            max_memory_usage: default_max_usage(),
            max_threads: default_max_threads(),
        }
    }
}

fn default_max_usage() -> f64 {
    95.0
}

fn default_max_threads() -> u64 {
    100
}

// ----------------------------------------------------------------------------
// Logging Configuration
// ----------------------------------------------------------------------------

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Output format (json, pretty, compact)
    #[serde(default = "default_log_format")]
    pub format: String,

    /// Also log to a daily-rolling file at this path
    #[serde(default)]
    pub file: Option<PathBuf>,

    /// Enable ANSI colors
    #[serde(default = "default_true")]
    pub colors: bool,

    /// Include source location
    #[serde(default)]
    pub source_location: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
            file: None,
            colors: true,
            source_location: false,
        }
    }
}

fn default_log_level() -> String {
    "info".into()
}

fn default_log_format() -> String {
    "compact".into()
}

fn default_true() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_config_defaults() {
        let config = EngineConfig::default();

        assert_eq!(config.collection.sync_interval, Duration::from_secs(300));
        assert_eq!(config.collection.retention, Duration::from_secs(7 * 86_400));
        assert_eq!(config.profiler.sampling_rate, 100);
        assert_eq!(config.thresholds.max_threads, 100);
        assert_eq!(config.profile_dir(), PathBuf::from("./vigil-data/profiles"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_str_with_humantime_durations() {
        let config = EngineConfig::from_str(
            r#"
            [service]
            name = "checkout"
            data_dir = "/var/lib/vigil"

            [collection]
            sync_interval = "30s"
            retention = "2days"

            [profiler]
            sampling_rate = 0
            "#,
        )
        .unwrap();

        assert_eq!(config.service.name, "checkout");
        assert_eq!(config.collection.sync_interval, Duration::from_secs(30));
        assert_eq!(config.collection.retention, Duration::from_secs(2 * 86_400));
        assert_eq!(config.effective_sampling_rate(), 1);
        assert_eq!(config.profile_dir(), PathBuf::from("/var/lib/vigil/profiles"));
    }

    #[test]
    fn test_validation_rejects_empty_service_name() {
        let err = EngineConfig::from_str("[service]\nname = \"  \"\n").unwrap_err();
        assert!(matches!(err, ConfigError::MissingField { .. }));
    }

    #[test]
    fn test_validation_rejects_short_interval() {
        let err = EngineConfig::from_str("[collection]\nsync_interval = \"10ms\"\n").unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));
    }

    #[test]
    fn test_load_missing_file() {
        let err = EngineConfig::load("/definitely/not/here.toml").unwrap_err();
        assert!(matches!(err, ConfigError::FileNotFound { .. }));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vigil.toml");
        std::fs::write(&path, "[service]\nname = \"orders\"\n").unwrap();

        let config = EngineConfig::load(&path).unwrap();
        assert_eq!(config.service.name, "orders");
    }

    #[test]
    fn test_generated_config_parses() {
        let text = EngineConfig::generate_default_config();
        let config = EngineConfig::from_str(&text).unwrap();
        assert!(config.profiler.render_tool.is_empty());
    }
}
