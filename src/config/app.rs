//! Application configuration structures.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::collector::{PostgresConfig, Schedule};
use crate::storage::{ClickHouseConfig, MismatchPolicy, ViewMode};

use super::validation::{ConfigError, expand_env_vars, validate_http_url};

// =============================================================================
// Constants
// =============================================================================

/// Default collection interval (60 seconds).
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(60);

/// Default metric definitions directory.
pub const DEFAULT_METRICS_PATH: &str = "metrics";

fn default_metrics_path() -> PathBuf {
    PathBuf::from(DEFAULT_METRICS_PATH)
}

// =============================================================================
// Storage Configuration
// =============================================================================

/// How values are written.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Handling of values that do not fit their column (default: reject).
    pub on_type_mismatch: MismatchPolicy,
}

/// How derived views are maintained.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ViewsConfig {
    /// `create_if_absent` (default) or `refresh`.
    pub mode: ViewMode,
}

// =============================================================================
// Schedule Configuration
// =============================================================================

/// When cycles run. At most one of `interval` and `cron` may be set.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ScheduleConfig {
    /// Fixed interval between cycles (default: 60s).
    #[serde(with = "humantime_serde")]
    pub interval: Option<Duration>,

    /// 6-field cron expression.
    pub cron: Option<String>,
}

impl ScheduleConfig {
    /// Resolve into a [`Schedule`].
    pub fn to_schedule(&self) -> Result<Schedule, ConfigError> {
        match (&self.interval, &self.cron) {
            (Some(_), Some(_)) => Err(ConfigError::invalid(
                "schedule",
                "'interval' and 'cron' are mutually exclusive",
            )),
            (_, Some(expr)) => {
                Schedule::cron(expr).map_err(|e| ConfigError::invalid("schedule.cron", e.to_string()))
            }
            (Some(interval), None) if interval.is_zero() => Err(ConfigError::invalid(
                "schedule.interval",
                "interval must be positive",
            )),
            (Some(interval), None) => Ok(Schedule::interval(*interval)),
            (None, None) => Ok(Schedule::interval(DEFAULT_INTERVAL)),
        }
    }
}

// =============================================================================
// Application Configuration
// =============================================================================

/// Top-level application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// ClickHouse connection.
    #[serde(default)]
    pub sink: ClickHouseConfig,

    /// Value handling.
    #[serde(default)]
    pub storage: StorageConfig,

    /// View maintenance.
    #[serde(default)]
    pub views: ViewsConfig,

    /// Cycle schedule.
    #[serde(default)]
    pub schedule: ScheduleConfig,

    /// Directory of metric definitions (default: metrics).
    #[serde(default = "default_metrics_path")]
    pub metrics_path: PathBuf,

    /// Add the source-side database id to every table.
    #[serde(default)]
    pub collect_database_id: bool,

    /// Monitored databases.
    #[serde(default)]
    pub sources: Vec<PostgresConfig>,
}

impl AppConfig {
    /// Load configuration from a YAML file.
    ///
    /// `${VAR}` and `${VAR:-default}` references are expanded before parsing.
    ///
    /// # Errors
    /// Returns `ConfigError` if the file cannot be read, parsed, or validated.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml(&content)
    }

    /// Parse and validate configuration text.
    pub fn from_yaml(content: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_yaml::from_str(&expand_env_vars(content))?;
        config.validate()?;
        Ok(config)
    }

    /// Enabled sources only.
    pub fn enabled_sources(&self) -> impl Iterator<Item = &PostgresConfig> {
        self.sources.iter().filter(|s| s.enabled)
    }

    /// Validate configuration values.
    ///
    /// # Errors
    /// Returns `ConfigError::Invalid` naming the first offending field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_http_url("sink.url", &self.sink.url)?;

        if !crate::collector::is_identifier(&self.sink.database) {
            return Err(ConfigError::invalid(
                "sink.database",
                format!("'{}' is not a valid identifier", self.sink.database),
            ));
        }

        self.schedule.to_schedule()?;

        let mut names = HashSet::new();
        for (i, source) in self.sources.iter().enumerate() {
            if source.name.trim().is_empty() {
                return Err(ConfigError::invalid(
                    format!("sources[{i}].name"),
                    "must not be empty",
                ));
            }
            if !names.insert(source.name.as_str()) {
                return Err(ConfigError::invalid(
                    format!("sources[{i}].name"),
                    format!("duplicate source name '{}'", source.name),
                ));
            }
            if source.port == 0 {
                return Err(ConfigError::invalid(
                    format!("sources[{i}].port"),
                    "port must be non-zero",
                ));
            }
            if source.dbname.trim().is_empty() {
                return Err(ConfigError::invalid(
                    format!("sources[{i}].dbname"),
                    "must not be empty",
                ));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FULL: &str = r#"
sink:
  url: http://clickhouse:8123
  database: telemetry
  user: writer
  password: ${PGTELEMETRY_APP_TEST_UNSET:-from-default}
  timeout: 3s
storage:
  on_type_mismatch: substitute
views:
  mode: refresh
schedule:
  interval: 30s
metrics_path: /etc/pgtelemetry/metrics
collect_database_id: true
sources:
  - name: primary
    host: db1
    dbname: app
  - name: replica
    host: db2
    port: 6432
    dbname: app
    enabled: false
"#;

    #[test]
    fn test_full_config() {
        let config = AppConfig::from_yaml(FULL).unwrap();
        assert_eq!(config.sink.database, "telemetry");
        assert_eq!(config.sink.password.as_deref(), Some("from-default"));
        assert_eq!(config.sink.timeout, Duration::from_secs(3));
        assert_eq!(config.storage.on_type_mismatch, MismatchPolicy::Substitute);
        assert_eq!(config.views.mode, ViewMode::Refresh);
        assert_eq!(
            config.schedule.to_schedule().unwrap(),
            Schedule::Interval(Duration::from_secs(30))
        );
        assert_eq!(config.metrics_path, PathBuf::from("/etc/pgtelemetry/metrics"));
        assert!(config.collect_database_id);
        assert_eq!(config.sources.len(), 2);
        assert_eq!(config.sources[0].port, 5432);
        let enabled: Vec<_> = config.enabled_sources().map(|s| s.name.as_str()).collect();
        assert_eq!(enabled, ["primary"]);
    }

    #[test]
    fn test_minimal_config_defaults() {
        let config = AppConfig::from_yaml("sources: []\n").unwrap();
        assert_eq!(config.sink.url, "http://localhost:8123");
        assert_eq!(config.storage.on_type_mismatch, MismatchPolicy::Reject);
        assert_eq!(config.views.mode, ViewMode::CreateIfAbsent);
        assert_eq!(
            config.schedule.to_schedule().unwrap(),
            Schedule::Interval(DEFAULT_INTERVAL)
        );
        assert_eq!(config.metrics_path, PathBuf::from(DEFAULT_METRICS_PATH));
    }

    #[test]
    fn test_schedule_conflict() {
        let yaml = "schedule:\n  interval: 10s\n  cron: \"0 * * * * *\"\n";
        let err = AppConfig::from_yaml(yaml).unwrap_err();
        assert!(err.to_string().contains("mutually exclusive"));
    }

    #[test]
    fn test_schedule_cron() {
        let config = AppConfig::from_yaml("schedule:\n  cron: \"0 */5 * * * *\"\n").unwrap();
        assert!(matches!(
            config.schedule.to_schedule().unwrap(),
            Schedule::Cron(_)
        ));
        assert!(AppConfig::from_yaml("schedule:\n  cron: \"every tuesday\"\n").is_err());
    }

    #[test]
    fn test_zero_interval_rejected() {
        let err = AppConfig::from_yaml("schedule:\n  interval: 0s\n").unwrap_err();
        assert!(err.to_string().contains("positive"));
    }

    #[test]
    fn test_duplicate_source_names() {
        let yaml = "sources:\n  - {name: a, dbname: x}\n  - {name: a, dbname: y}\n";
        let err = AppConfig::from_yaml(yaml).unwrap_err();
        assert!(err.to_string().contains("duplicate source name"));
    }

    #[test]
    fn test_invalid_port_and_url() {
        let yaml = "sources:\n  - {name: a, dbname: x, port: 0}\n";
        assert!(AppConfig::from_yaml(yaml).is_err());
        let yaml = "sink:\n  url: ftp://clickhouse\n";
        assert!(AppConfig::from_yaml(yaml).is_err());
        let yaml = "sink:\n  database: \"bad-name\"\n";
        assert!(AppConfig::from_yaml(yaml).is_err());
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        std::fs::write(&path, FULL).unwrap();
        let config = AppConfig::load(&path).unwrap();
        assert_eq!(config.sources[1].name, "replica");

        let err = AppConfig::load(dir.path().join("missing.yaml")).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }
}
