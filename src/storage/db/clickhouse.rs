//! ClickHouse sink over the HTTP interface.
//!
//! Statements are POSTed as the request body. Listing queries bind their
//! arguments as query parameters (`param_<name>`) and read `JSONEachRow`.

use std::collections::HashSet;
use std::time::Duration;

use reqwest::Client;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::storage::db::{Sink, SinkError};
use crate::storage::schema::Ddl;
use crate::storage::types::RowInsert;

/// Default database for metric tables and views.
pub const DEFAULT_DATABASE: &str = "pg_telemetry";

/// Default request timeout (10 seconds).
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

const EXCEPTION_CODE_HEADER: &str = "X-ClickHouse-Exception-Code";
const USER_HEADER: &str = "X-ClickHouse-User";
const KEY_HEADER: &str = "X-ClickHouse-Key";

const DUPLICATE_COLUMN: u32 = 15;
/// Also raised for bad view queries; only a duplicate when adding a column.
const ILLEGAL_COLUMN: u32 = 44;
const TABLE_ALREADY_EXISTS: u32 = 57;
const DATABASE_ALREADY_EXISTS: u32 = 82;

fn default_url() -> String {
    "http://localhost:8123".to_string()
}

fn default_database() -> String {
    DEFAULT_DATABASE.to_string()
}

fn default_user() -> String {
    "default".to_string()
}

fn default_timeout() -> Duration {
    DEFAULT_TIMEOUT
}

/// ClickHouse connection settings.
#[derive(Clone, Serialize, Deserialize)]
pub struct ClickHouseConfig {
    /// HTTP endpoint (default: http://localhost:8123).
    #[serde(default = "default_url")]
    pub url: String,
    /// Database for metric tables (default: pg_telemetry).
    #[serde(default = "default_database")]
    pub database: String,
    /// User (default: default).
    #[serde(default = "default_user")]
    pub user: String,
    /// Password.
    #[serde(default)]
    pub password: Option<String>,
    /// Per-request timeout (default: 10s).
    #[serde(default = "default_timeout", with = "humantime_serde")]
    pub timeout: Duration,
}

impl Default for ClickHouseConfig {
    fn default() -> Self {
        Self {
            url: default_url(),
            database: default_database(),
            user: default_user(),
            password: None,
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

impl std::fmt::Debug for ClickHouseConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClickHouseConfig")
            .field("url", &self.url)
            .field("database", &self.database)
            .field("user", &self.user)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

/// ClickHouse-backed [`Sink`].
#[derive(Clone)]
pub struct ClickHouseSink {
    client: Client,
    endpoint: Url,
    database: String,
    user: String,
    password: Option<String>,
}

impl std::fmt::Debug for ClickHouseSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClickHouseSink")
            .field("endpoint", &self.endpoint.as_str())
            .field("database", &self.database)
            .finish_non_exhaustive()
    }
}

#[derive(Deserialize)]
struct NameRow {
    name: String,
}

impl ClickHouseSink {
    /// Build a sink. No request is made until the first statement.
    pub fn new(config: &ClickHouseConfig) -> Result<Self, SinkError> {
        let endpoint = Url::parse(&config.url)?;
        let client = Client::builder().timeout(config.timeout).build()?;

        Ok(Self {
            client,
            endpoint,
            database: config.database.clone(),
            user: config.user.clone(),
            password: config.password.clone(),
        })
    }

    /// Run one statement and return the response body.
    ///
    /// `ddl` is the schema statement being run, if any, and decides how an
    /// exception code is read.
    async fn execute(
        &self,
        sql: String,
        params: &[(&str, &str)],
        ddl: Option<&Ddl>,
    ) -> Result<String, SinkError> {
        let mut url = self.endpoint.clone();
        if !params.is_empty() {
            let mut query = url.query_pairs_mut();
            for (name, value) in params {
                query.append_pair(&format!("param_{name}"), value);
            }
        }

        let mut request = self
            .client
            .post(url)
            .header(USER_HEADER, &self.user)
            .body(sql);
        if let Some(password) = &self.password {
            request = request.header(KEY_HEADER, password);
        }

        let response = request.send().await?;
        let status = response.status();
        let header_code = response
            .headers()
            .get(EXCEPTION_CODE_HEADER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u32>().ok());
        let body = response.text().await?;

        if status.is_success() {
            return Ok(body);
        }
        Err(classify(ddl, header_code.or_else(|| exception_code(&body)), body))
    }

    /// Run a `SELECT` and decode its rows. `FORMAT JSONEachRow` is appended.
    pub async fn query_rows(&self, select: &str) -> Result<Vec<serde_json::Value>, SinkError> {
        let body = self
            .execute(format!("{select} FORMAT JSONEachRow"), &[], None)
            .await?;
        body.lines()
            .filter(|line| !line.trim().is_empty())
            .map(|line| serde_json::from_str(line).map_err(|e| SinkError::Decode(e.to_string())))
            .collect()
    }

    async fn list_names(&self, sql: &str, params: &[(&str, &str)]) -> Result<HashSet<String>, SinkError> {
        let body = self.execute(sql.to_owned(), params, None).await?;
        parse_names(&body)
    }
}

#[async_trait::async_trait]
impl Sink for ClickHouseSink {
    fn database(&self) -> &str {
        &self.database
    }

    async fn apply(&self, ddl: &Ddl) -> Result<(), SinkError> {
        let sql = ddl.to_sql(&self.database);
        tracing::debug!(object = %ddl.object(), sql = %sql, "Applying DDL");
        self.execute(sql, &[], Some(ddl)).await.map(drop)
    }

    async fn list_tables(&self) -> Result<HashSet<String>, SinkError> {
        self.list_names(
            "SELECT name FROM system.tables WHERE database = {db:String} FORMAT JSONEachRow",
            &[("db", self.database.as_str())],
        )
        .await
    }

    async fn list_columns(&self, table: &str) -> Result<HashSet<String>, SinkError> {
        self.list_names(
            "SELECT name FROM system.columns \
             WHERE database = {db:String} AND table = {table:String} FORMAT JSONEachRow",
            &[("db", self.database.as_str()), ("table", table)],
        )
        .await
    }

    async fn insert(&self, row: &RowInsert) -> Result<(), SinkError> {
        self.execute(row.to_sql(&self.database), &[], None)
            .await
            .map(drop)
    }
}

/// Map an exception raised by `ddl` (or by a non-schema statement) to a
/// [`SinkError`].
fn classify(ddl: Option<&Ddl>, code: Option<u32>, body: String) -> SinkError {
    let message = body.trim().to_owned();
    let adding_column = matches!(ddl, Some(Ddl::AddColumn { .. }));
    let exists = match code {
        Some(TABLE_ALREADY_EXISTS | DATABASE_ALREADY_EXISTS) => ddl.is_some(),
        Some(DUPLICATE_COLUMN) => adding_column,
        Some(ILLEGAL_COLUMN) => adding_column && message.contains("already exists"),
        _ => false,
    };
    if exists {
        SinkError::AlreadyExists(message)
    } else {
        SinkError::Rejected { code, message }
    }
}

/// Extract `Code: N` from an exception body.
fn exception_code(body: &str) -> Option<u32> {
    static CODE_REGEX: std::sync::OnceLock<regex::Regex> = std::sync::OnceLock::new();

    let regex = CODE_REGEX.get_or_init(|| {
        regex::Regex::new(r"Code: (\d+)").expect("failed to compile exception code regex")
    });
    regex
        .captures(body)
        .and_then(|caps| caps[1].parse().ok())
}

fn parse_names(body: &str) -> Result<HashSet<String>, SinkError> {
    body.lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| {
            serde_json::from_str::<NameRow>(line)
                .map(|row| row.name)
                .map_err(|e| SinkError::Decode(e.to_string()))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config: ClickHouseConfig = serde_yaml::from_str("{}").unwrap();
        assert_eq!(config.url, "http://localhost:8123");
        assert_eq!(config.database, "pg_telemetry");
        assert_eq!(config.user, "default");
        assert_eq!(config.timeout, Duration::from_secs(10));
    }

    #[test]
    fn test_config_timeout_humantime() {
        let config: ClickHouseConfig =
            serde_yaml::from_str("url: http://ch:8123\ntimeout: 2s\n").unwrap();
        assert_eq!(config.timeout, Duration::from_secs(2));
    }

    #[test]
    fn test_invalid_url() {
        let config = ClickHouseConfig {
            url: "not a url".into(),
            ..Default::default()
        };
        assert!(matches!(
            ClickHouseSink::new(&config),
            Err(SinkError::InvalidUrl(_))
        ));
    }

    fn add_column() -> Ddl {
        Ddl::AddColumn {
            table: "pg_stat_statements".into(),
            column: "calls".into(),
            stored_type: crate::collector::StoredType::UInt64,
        }
    }

    #[test]
    fn test_classify_already_exists() {
        let create_table = Ddl::CreateTable(crate::storage::schema::TableSpec::metric_table("t"));
        assert!(classify(Some(&create_table), Some(57), "exists".into()).is_already_exists());
        assert!(classify(Some(&Ddl::CreateDatabase), Some(82), "exists".into()).is_already_exists());
        assert!(classify(Some(&add_column()), Some(15), "duplicate".into()).is_already_exists());

        let err = classify(None, Some(60), "Code: 60. DB::Exception: Table doesn't exist".into());
        assert!(matches!(err, SinkError::Rejected { code: Some(60), .. }));
        assert!(err.to_string().contains("code 60"));
    }

    #[test]
    fn test_illegal_column_is_duplicate_only_for_add_column() {
        let duplicate = "Code: 44. DB::Exception: Cannot add column calls: column with this name already exists. (ILLEGAL_COLUMN)";
        assert!(classify(Some(&add_column()), Some(44), duplicate.into()).is_already_exists());

        let bad_view = Ddl::CreateView {
            name: "tps".into(),
            query: "SELECT 1".into(),
        };
        let broken = "Code: 44. DB::Exception: Cannot create column with type Nothing. (ILLEGAL_COLUMN)";
        let err = classify(Some(&bad_view), Some(44), broken.into());
        assert!(matches!(err, SinkError::Rejected { code: Some(44), .. }));

        let other = "Code: 44. DB::Exception: Sorting key cannot contain nullable columns. (ILLEGAL_COLUMN)";
        assert!(!classify(Some(&add_column()), Some(44), other.into()).is_already_exists());
        assert!(!classify(None, Some(44), duplicate.into()).is_already_exists());
    }

    #[test]
    fn test_exception_code_from_body() {
        let body = "Code: 44. DB::Exception: Cannot add column calls: column with this name already exists. (ILLEGAL_COLUMN)";
        assert_eq!(exception_code(body), Some(44));
        assert_eq!(exception_code("no code here"), None);
    }

    #[test]
    fn test_parse_names() {
        let body = "{\"name\":\"pg_stat_database\"}\n{\"name\":\"tps\"}\n";
        let names = parse_names(body).unwrap();
        assert_eq!(names.len(), 2);
        assert!(names.contains("tps"));
        assert!(parse_names("").unwrap().is_empty());
        assert!(matches!(parse_names("garbage"), Err(SinkError::Decode(_))));
    }
}
