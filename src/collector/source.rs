//! Source capability: executes single-value queries against a monitored database.
//!
//! - [`Source`]: the capability the collectors depend on
//! - [`PostgresSource`]: sqlx-backed implementation for PostgreSQL

mod postgres;

pub use postgres::{PostgresConfig, PostgresSource};

use thiserror::Error;

use super::value::RawValue;

/// Errors raised by a source.
#[derive(Debug, Error)]
pub enum SourceError {
    /// Driver or connection failure.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// The result column has a type the source cannot decode.
    #[error("unsupported column type: {0}")]
    UnsupportedType(String),

    /// The source cannot serve queries at all.
    #[error("source unavailable: {0}")]
    Unavailable(String),
}

/// A database that answers scalar queries.
#[async_trait::async_trait]
pub trait Source: Send + Sync {
    /// Run `query` with positional `params` and return the first column of the
    /// first row.
    ///
    /// Returns `Ok(None)` when the query yields no rows and
    /// `Ok(Some(RawValue::Null))` when the value itself is SQL `NULL`.
    async fn fetch_scalar(
        &self,
        query: &str,
        params: &[String],
    ) -> Result<Option<RawValue>, SourceError>;
}
