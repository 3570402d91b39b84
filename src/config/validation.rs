//! Configuration errors and value checks.

use std::path::PathBuf;
use std::sync::OnceLock;
use std::time::Duration;

use regex::{Captures, Regex};
use thiserror::Error;

/// Configuration error types.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse YAML config: {0}")]
    Parse(#[from] serde_yaml::Error),

    /// A field holds a value the collector cannot run with.
    #[error("invalid config field '{field}': {reason}")]
    Invalid { field: String, reason: String },
}

impl ConfigError {
    pub(crate) fn invalid(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Invalid {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

/// Parse a human-readable duration such as `30s`, `5m` or `1h30m`.
///
/// # Examples
///
/// ```
/// use pgtelemetry::config::parse_duration;
///
/// assert_eq!(parse_duration("30s").unwrap().as_secs(), 30);
/// assert_eq!(parse_duration("1h30m").unwrap().as_secs(), 5400);
/// ```
pub fn parse_duration(s: &str) -> Result<Duration, String> {
    match s.trim() {
        "" => Err("duration string is empty".to_string()),
        trimmed => humantime::parse_duration(trimmed).map_err(|e| format!("'{trimmed}': {e}")),
    }
}

/// Substitute `${VAR}` and `${VAR:-default}` with environment values.
///
/// Unset variables without a default expand to the empty string.
pub fn expand_env_vars(input: &str) -> String {
    static REFERENCE: OnceLock<Regex> = OnceLock::new();

    let reference = REFERENCE.get_or_init(|| {
        Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)(?::-([^}]*))?\}")
            .expect("failed to compile env var regex")
    });

    reference
        .replace_all(input, |caps: &Captures| match std::env::var(&caps[1]) {
            Ok(value) => value,
            Err(_) => caps.get(2).map_or_else(String::new, |m| m.as_str().to_owned()),
        })
        .into_owned()
}

/// Check that `url` is an absolute http(s) URL.
pub fn validate_http_url(field: &str, url: &str) -> Result<(), ConfigError> {
    let parsed =
        url::Url::parse(url).map_err(|e| ConfigError::invalid(field, format!("'{url}': {e}")))?;
    match parsed.scheme() {
        "http" | "https" => Ok(()),
        other => Err(ConfigError::invalid(
            field,
            format!("unsupported scheme '{other}'"),
        )),
    }
}
