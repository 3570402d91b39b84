//! Batch storage with additive schema evolution.
//!
//! [`Store::insert`] coerces every value, makes sure the destination table
//! has a column for every value, then writes exactly one row. Tables only
//! ever gain columns. Work on one table is serialized by a per-table async
//! lock; races with other processes are absorbed by treating "already
//! exists" from the sink as success.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use crate::collector::{Batch, is_identifier};
use crate::storage::catalog::SchemaCatalog;
use crate::storage::coerce::{MismatchPolicy, coerce_with_policy};
use crate::storage::db::{Sink, SinkError};
use crate::storage::error::StoreError;
use crate::storage::schema::{Ddl, TableSpec};
use crate::storage::types::{NativeValue, RowInsert};

/// Outcome of one schema sync.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SchemaSync {
    /// The table was created by this sync.
    pub created_table: bool,
    /// Columns added by this sync, in batch order.
    pub added_columns: Vec<String>,
}

impl SchemaSync {
    /// True when no DDL was issued.
    pub fn is_unchanged(&self) -> bool {
        !self.created_table && self.added_columns.is_empty()
    }
}

/// Writes batches into per-group tables.
pub struct Store {
    sink: Arc<dyn Sink>,
    catalog: SchemaCatalog,
    policy: MismatchPolicy,
    table_locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store")
            .field("database", &self.sink.database())
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

impl Store {
    pub fn new(sink: Arc<dyn Sink>) -> Self {
        Self {
            catalog: SchemaCatalog::new(Arc::clone(&sink)),
            sink,
            policy: MismatchPolicy::default(),
            table_locks: Mutex::new(HashMap::new()),
        }
    }

    /// Set the type-mismatch policy.
    pub fn with_policy(mut self, policy: MismatchPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn sink(&self) -> &Arc<dyn Sink> {
        &self.sink
    }

    pub fn catalog(&self) -> &SchemaCatalog {
        &self.catalog
    }

    pub fn policy(&self) -> MismatchPolicy {
        self.policy
    }

    /// Create the sink database if it does not exist.
    pub async fn prepare_database(&self) -> Result<(), StoreError> {
        match self.sink.apply(&Ddl::CreateDatabase).await {
            Ok(()) => {
                tracing::info!(database = %self.sink.database(), "Database ready");
                Ok(())
            }
            Err(e) if e.is_already_exists() => Ok(()),
            Err(source) => Err(StoreError::SchemaSync {
                table: self.sink.database().to_owned(),
                column: None,
                source,
            }),
        }
    }

    /// Make sure `table` exists with a column for every value in `batch`.
    ///
    /// A second call for the same table and column set issues no DDL.
    pub async fn ensure_schema(&self, table: &str, batch: &Batch) -> Result<SchemaSync, StoreError> {
        let lock = self.table_lock(table);
        let _guard = lock.lock().await;
        self.sync_schema(table, batch).await
    }

    /// Coerce every value in `batch` under the configured policy.
    pub fn coerce_batch(&self, batch: &Batch) -> Result<Vec<NativeValue>, StoreError> {
        batch
            .values()
            .iter()
            .map(|value| coerce_with_policy(value, self.policy))
            .collect()
    }

    /// Sync the schema and insert `batch` as one row.
    ///
    /// Values are coerced before any DDL, so a rejected batch leaves the
    /// table untouched.
    pub async fn insert(&self, table: &str, batch: &Batch) -> Result<SchemaSync, StoreError> {
        let values = self.coerce_batch(batch)?;

        let lock = self.table_lock(table);
        let _guard = lock.lock().await;
        let sync = self.sync_schema(table, batch).await?;

        let mut row = RowInsert::new(table);
        for (value, native) in batch.values().iter().zip(values) {
            row.push(value.name.clone(), native);
        }

        self.sink
            .insert(&row)
            .await
            .map_err(|source| StoreError::Insert {
                table: table.to_owned(),
                source,
            })?;

        tracing::debug!(table = %table, columns = row.columns.len(), "Row inserted");
        Ok(sync)
    }

    // --- Private helpers ---

    fn table_lock(&self, table: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self
            .table_locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        Arc::clone(locks.entry(table.to_owned()).or_default())
    }

    async fn sync_schema(&self, table: &str, batch: &Batch) -> Result<SchemaSync, StoreError> {
        if !is_identifier(table) {
            return Err(StoreError::InvalidIdentifier(table.to_owned()));
        }
        if let Some(bad) = batch.names().find(|name| !is_identifier(name)) {
            return Err(StoreError::InvalidIdentifier(bad.to_owned()));
        }

        let catalog_err = |source| StoreError::Catalog {
            table: table.to_owned(),
            source,
        };
        let mut sync = SchemaSync::default();

        let tables = self.catalog.list_tables().await.map_err(catalog_err)?;
        if !tables.contains(table) {
            let ddl = Ddl::CreateTable(TableSpec::metric_table(table));
            sync.created_table = self.apply_tolerant(&ddl, table, None).await?;
        }

        let existing = self
            .catalog
            .list_columns(table)
            .await
            .map_err(catalog_err)?;
        for value in batch.values() {
            if existing.contains(&value.name) {
                continue;
            }
            let ddl = Ddl::AddColumn {
                table: table.to_owned(),
                column: value.name.clone(),
                stored_type: value.stored_type,
            };
            if self.apply_tolerant(&ddl, table, Some(&value.name)).await? {
                sync.added_columns.push(value.name.clone());
            }
        }

        Ok(sync)
    }

    /// Apply `ddl`; returns false when the sink reported the object exists.
    async fn apply_tolerant(
        &self,
        ddl: &Ddl,
        table: &str,
        column: Option<&str>,
    ) -> Result<bool, StoreError> {
        match self.sink.apply(ddl).await {
            Ok(()) => {
                tracing::info!(table = %table, ddl = %ddl, "Schema updated");
                Ok(true)
            }
            Err(SinkError::AlreadyExists(message)) => {
                tracing::debug!(table = %table, ddl = %ddl, message = %message, "Schema object already exists");
                Ok(false)
            }
            Err(source) => Err(StoreError::SchemaSync {
                table: table.to_owned(),
                column: column.map(str::to_owned),
                source,
            }),
        }
    }
}
