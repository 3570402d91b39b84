//! PostgreSQL source.
//!
//! Connections are opened lazily, so building a source never touches the
//! network; the first query surfaces connectivity problems.

use std::time::Duration;

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::postgres::{PgConnectOptions, PgPool, PgPoolOptions, PgRow};
use sqlx::{Column, Row, TypeInfo};

use crate::collector::source::{Source, SourceError};
use crate::collector::value::RawValue;

/// Default connection acquire timeout (5 seconds).
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Connections kept per monitored database.
const MAX_CONNECTIONS: u32 = 2;

fn default_enabled() -> bool {
    true
}

fn default_host() -> String {
    "localhost".to_string()
}

fn default_port() -> u16 {
    5432
}

fn default_user() -> String {
    "postgres".to_string()
}

fn default_timeout() -> Duration {
    DEFAULT_TIMEOUT
}

/// Connection settings for one monitored database.
#[derive(Clone, Serialize, Deserialize)]
pub struct PostgresConfig {
    /// Unique name for this source.
    pub name: String,
    /// Database host (default: localhost).
    #[serde(default = "default_host")]
    pub host: String,
    /// Database port (default: 5432).
    #[serde(default = "default_port")]
    pub port: u16,
    /// Database to connect to and report as `dbname`.
    pub dbname: String,
    /// Login role (default: postgres).
    #[serde(default = "default_user")]
    pub user: String,
    /// Login password.
    #[serde(default)]
    pub password: Option<String>,
    /// Poll this source (default: true).
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Connection acquire timeout (default: 5s).
    #[serde(default = "default_timeout", with = "humantime_serde")]
    pub timeout: Duration,
}

impl std::fmt::Debug for PostgresConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PostgresConfig")
            .field("name", &self.name)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("dbname", &self.dbname)
            .field("user", &self.user)
            .finish_non_exhaustive()
    }
}

impl PostgresConfig {
    /// Create a configuration with default host, port and user.
    pub fn new(name: impl Into<String>, dbname: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            host: default_host(),
            port: default_port(),
            dbname: dbname.into(),
            user: default_user(),
            password: None,
            enabled: true,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Set host and port.
    pub fn with_address(mut self, host: impl Into<String>, port: u16) -> Self {
        self.host = host.into();
        self.port = port;
        self
    }

    /// Set login credentials.
    pub fn with_credentials(mut self, user: impl Into<String>, password: Option<String>) -> Self {
        self.user = user.into();
        self.password = password;
        self
    }

    /// Set the acquire timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set enabled.
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    fn connect_options(&self) -> PgConnectOptions {
        let options = PgConnectOptions::new()
            .host(&self.host)
            .port(self.port)
            .database(&self.dbname)
            .username(&self.user)
            .application_name("pgtelemetry");
        match &self.password {
            Some(password) => options.password(password),
            None => options,
        }
    }
}

/// PostgreSQL-backed [`Source`].
#[derive(Clone)]
pub struct PostgresSource {
    name: String,
    pool: PgPool,
}

impl PostgresSource {
    /// Build a source with a lazily connecting pool.
    pub fn new(config: &PostgresConfig) -> Self {
        let pool = PgPoolOptions::new()
            .max_connections(MAX_CONNECTIONS)
            .acquire_timeout(config.timeout)
            .connect_lazy_with(config.connect_options());

        Self {
            name: config.name.clone(),
            pool,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Close the pool, waiting for checked-out connections.
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

impl std::fmt::Debug for PostgresSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PostgresSource")
            .field("name", &self.name)
            .field("pool_size", &self.pool.size())
            .finish_non_exhaustive()
    }
}

#[async_trait::async_trait]
impl Source for PostgresSource {
    async fn fetch_scalar(
        &self,
        query: &str,
        params: &[String],
    ) -> Result<Option<RawValue>, SourceError> {
        if self.pool.is_closed() {
            return Err(SourceError::Unavailable(format!(
                "pool for '{}' is closed",
                self.name
            )));
        }

        let mut statement = sqlx::query(query);
        for param in params {
            statement = statement.bind(param);
        }

        let row = statement.fetch_optional(&self.pool).await?;
        row.as_ref().map(decode_first_column).transpose()
    }
}

/// Decode column 0 according to its Postgres type name.
fn decode_first_column(row: &PgRow) -> Result<RawValue, SourceError> {
    let type_name = row.try_column(0)?.type_info().name().to_owned();

    let value: RawValue = match type_name.as_str() {
        "BOOL" => row.try_get::<Option<bool>, _>(0)?.into(),
        "INT2" => row.try_get::<Option<i16>, _>(0)?.map(i64::from).into(),
        "INT4" => row.try_get::<Option<i32>, _>(0)?.map(i64::from).into(),
        "INT8" => row.try_get::<Option<i64>, _>(0)?.into(),
        "OID" => row
            .try_get::<Option<sqlx::postgres::types::Oid>, _>(0)?
            .map(|oid| i64::from(oid.0))
            .into(),
        "FLOAT4" => row.try_get::<Option<f32>, _>(0)?.map(f64::from).into(),
        "FLOAT8" => row.try_get::<Option<f64>, _>(0)?.into(),
        "NUMERIC" => row.try_get::<Option<Decimal>, _>(0)?.into(),
        "DATE" => row.try_get::<Option<NaiveDate>, _>(0)?.into(),
        "TIMESTAMP" => row.try_get::<Option<NaiveDateTime>, _>(0)?.into(),
        "TIMESTAMPTZ" => row
            .try_get::<Option<DateTime<Utc>>, _>(0)?
            .map(|ts| ts.naive_utc())
            .into(),
        "TEXT" | "VARCHAR" | "BPCHAR" | "NAME" | "CHAR" => {
            row.try_get::<Option<String>, _>(0)?.into()
        }
        other => return Err(SourceError::UnsupportedType(other.to_owned())),
    };

    Ok(value)
}
