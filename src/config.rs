//! Configuration module.
//!
//! Provides YAML-based configuration loading and validation for:
//! - Sink settings (ClickHouse url, database, credentials, timeout)
//! - Storage and view policies
//! - Cycle schedule (interval or cron)
//! - Metric definitions directory and monitored sources

mod app;
mod validation;

pub use app::{
    AppConfig, DEFAULT_INTERVAL, DEFAULT_METRICS_PATH, ScheduleConfig, StorageConfig, ViewsConfig,
};
pub use validation::{ConfigError, expand_env_vars, parse_duration, validate_http_url};
