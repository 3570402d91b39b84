//! Read-through view of the sink's tables and columns.
//!
//! Nothing is cached: every call queries the sink, so a snapshot taken before
//! any DDL must be considered stale afterwards.

use std::collections::HashSet;
use std::sync::Arc;

use crate::storage::db::{Sink, SinkError};

/// Lists existing tables and columns.
#[derive(Clone)]
pub struct SchemaCatalog {
    sink: Arc<dyn Sink>,
}

impl SchemaCatalog {
    pub fn new(sink: Arc<dyn Sink>) -> Self {
        Self { sink }
    }

    /// Tables and views in the sink's database.
    pub async fn list_tables(&self) -> Result<HashSet<String>, SinkError> {
        self.sink.list_tables().await
    }

    /// Columns of `table`; empty if the table is absent.
    pub async fn list_columns(&self, table: &str) -> Result<HashSet<String>, SinkError> {
        self.sink.list_columns(table).await
    }

    pub async fn table_exists(&self, table: &str) -> Result<bool, SinkError> {
        Ok(self.list_tables().await?.contains(table))
    }
}

impl std::fmt::Debug for SchemaCatalog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SchemaCatalog")
            .field("database", &self.sink.database())
            .finish_non_exhaustive()
    }
}
