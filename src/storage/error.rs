//! Storage-specific error types.
//!
//! [`StoreError`] covers schema sync, coercion and insert failures and always
//! names the table or metric involved. [`ViewError`] is reported per view and
//! never fails a cycle.

use thiserror::Error;

use crate::collector::StoredType;
use crate::storage::db::SinkError;

/// Errors that can occur while storing a batch.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Creating the table or adding a column failed.
    #[error("schema sync failed for {table}{}: {source}", column_suffix(.column))]
    SchemaSync {
        table: String,
        column: Option<String>,
        #[source]
        source: SinkError,
    },

    /// A value cannot be represented in its declared type.
    #[error("metric '{name}': value '{value}' is not representable as {stored_type}")]
    TypeMismatch {
        name: String,
        stored_type: StoredType,
        value: String,
    },

    /// The row insert was rejected.
    #[error("insert into {table} failed: {source}")]
    Insert {
        table: String,
        #[source]
        source: SinkError,
    },

    /// The sink could not be queried for its catalog.
    #[error("catalog query failed for {table}: {source}")]
    Catalog {
        table: String,
        #[source]
        source: SinkError,
    },

    /// A table or column name is not a plain identifier.
    #[error("invalid identifier '{0}'")]
    InvalidIdentifier(String),
}

fn column_suffix(column: &Option<String>) -> String {
    column
        .as_deref()
        .map(|c| format!(" (column {c})"))
        .unwrap_or_default()
}

/// Errors that can occur while materializing a view.
#[derive(Debug, Error)]
pub enum ViewError {
    /// Listing existing objects failed.
    #[error("view '{view}': catalog query failed: {source}")]
    Catalog {
        view: String,
        #[source]
        source: SinkError,
    },

    /// The create (or drop) statement was rejected.
    #[error("view '{view}': create failed: {source}")]
    CreateFailed {
        view: String,
        #[source]
        source: SinkError,
    },
}

impl ViewError {
    pub fn view(&self) -> &str {
        match self {
            Self::Catalog { view, .. } | Self::CreateFailed { view, .. } => view,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schema_sync_message_names_column() {
        let err = StoreError::SchemaSync {
            table: "pg_stat_database".into(),
            column: Some("xact_commit".into()),
            source: SinkError::Decode("bad".into()),
        };
        let msg = err.to_string();
        assert!(msg.contains("pg_stat_database"));
        assert!(msg.contains("column xact_commit"));

        let err = StoreError::SchemaSync {
            table: "t".into(),
            column: None,
            source: SinkError::Decode("bad".into()),
        };
        assert!(!err.to_string().contains("column"));
    }

    #[test]
    fn test_type_mismatch_message() {
        let err = StoreError::TypeMismatch {
            name: "calls".into(),
            stored_type: StoredType::UInt32,
            value: "12.7".into(),
        };
        assert_eq!(
            err.to_string(),
            "metric 'calls': value '12.7' is not representable as UInt32"
        );
    }
}
