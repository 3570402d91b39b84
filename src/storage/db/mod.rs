//! Sink backends.
//!
//! The storage layer talks to the analytical store only through [`Sink`]:
//! apply a DDL statement, list tables and columns, insert one row.
//!
//! - [`ClickHouseSink`]: ClickHouse over its HTTP interface
//! - [`MemorySink`]: in-process sink for dry runs and tests

mod clickhouse;
mod memory;

pub use clickhouse::{ClickHouseConfig, ClickHouseSink};
pub use memory::MemorySink;

use std::collections::HashSet;

use thiserror::Error;

use crate::storage::schema::Ddl;
use crate::storage::types::RowInsert;

/// Errors returned by a sink.
#[derive(Debug, Error)]
pub enum SinkError {
    /// The object the statement creates is already there.
    #[error("already exists: {0}")]
    AlreadyExists(String),

    /// The sink rejected the statement.
    #[error("sink rejected statement{}: {message}", code_suffix(.code))]
    Rejected { code: Option<u32>, message: String },

    /// Transport failure.
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// The sink answered with something unparseable.
    #[error("decode error: {0}")]
    Decode(String),

    /// The sink URL is malformed.
    #[error("invalid url: {0}")]
    InvalidUrl(#[from] url::ParseError),
}

fn code_suffix(code: &Option<u32>) -> String {
    code.map(|c| format!(" (code {c})")).unwrap_or_default()
}

impl SinkError {
    /// True when the sink reported that the object already exists.
    pub fn is_already_exists(&self) -> bool {
        matches!(self, Self::AlreadyExists(_))
    }
}

/// The analytical store, reduced to what the storage layer needs.
#[async_trait::async_trait]
pub trait Sink: Send + Sync {
    /// Database that holds metric tables and views.
    fn database(&self) -> &str;

    /// Apply one schema statement.
    async fn apply(&self, ddl: &Ddl) -> Result<(), SinkError>;

    /// Names of all tables and views in [`Sink::database`].
    async fn list_tables(&self) -> Result<HashSet<String>, SinkError>;

    /// Column names of `table`; empty when the table does not exist.
    async fn list_columns(&self, table: &str) -> Result<HashSet<String>, SinkError>;

    /// Insert one row.
    async fn insert(&self, row: &RowInsert) -> Result<(), SinkError>;
}
