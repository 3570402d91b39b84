//! In-process sink.
//!
//! Keeps tables, views and rows in memory and records every DDL statement it
//! receives. Behaves like the real store where the storage layer can observe
//! it: `ADD COLUMN` on an existing column and `CREATE VIEW` on an existing
//! name report "already exists", and new columns read back as the type's zero
//! value for rows inserted earlier.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::collector::StoredType;
use crate::storage::db::{Sink, SinkError};
use crate::storage::schema::Ddl;
use crate::storage::types::{NativeValue, RowInsert};

const UNKNOWN_TABLE: u32 = 60;
const NO_SUCH_COLUMN: u32 = 16;
const TYPE_MISMATCH: u32 = 53;

#[derive(Debug, Default)]
struct MemoryTable {
    columns: Vec<(String, StoredType)>,
    rows: Vec<Vec<NativeValue>>,
}

impl MemoryTable {
    fn position(&self, column: &str) -> Option<usize> {
        self.columns.iter().position(|(name, _)| name == column)
    }
}

#[derive(Debug, Default)]
struct MemoryState {
    database_created: bool,
    tables: BTreeMap<String, MemoryTable>,
    views: BTreeMap<String, String>,
    ddl_log: Vec<Ddl>,
    inserts: usize,
}

/// In-memory [`Sink`].
#[derive(Debug)]
pub struct MemorySink {
    database: String,
    state: Mutex<MemoryState>,
}

impl MemorySink {
    pub fn new(database: impl Into<String>) -> Self {
        Self {
            database: database.into(),
            state: Mutex::new(MemoryState::default()),
        }
    }

    fn state(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Every DDL statement received, in order, including rejected ones.
    pub fn ddl_log(&self) -> Vec<Ddl> {
        self.state().ddl_log.clone()
    }

    /// Number of successful row inserts.
    pub fn insert_count(&self) -> usize {
        self.state().inserts
    }

    pub fn database_created(&self) -> bool {
        self.state().database_created
    }

    /// Column names of `table` in creation order.
    pub fn columns(&self, table: &str) -> Vec<String> {
        self.state()
            .tables
            .get(table)
            .map(|t| t.columns.iter().map(|(name, _)| name.clone()).collect())
            .unwrap_or_default()
    }

    /// Declared type of `table.column`.
    pub fn column_type(&self, table: &str, column: &str) -> Option<StoredType> {
        let state = self.state();
        let t = state.tables.get(table)?;
        t.position(column).map(|i| t.columns[i].1)
    }

    /// Rows of `table` keyed by column name.
    pub fn rows(&self, table: &str) -> Vec<HashMap<String, NativeValue>> {
        let state = self.state();
        let Some(t) = state.tables.get(table) else {
            return Vec::new();
        };
        t.rows
            .iter()
            .map(|row| {
                t.columns
                    .iter()
                    .map(|(name, _)| name.clone())
                    .zip(row.iter().cloned())
                    .collect()
            })
            .collect()
    }

    pub fn view_names(&self) -> Vec<String> {
        self.state().views.keys().cloned().collect()
    }

    pub fn view_query(&self, name: &str) -> Option<String> {
        self.state().views.get(name).cloned()
    }
}

impl Default for MemorySink {
    fn default() -> Self {
        Self::new(super::clickhouse::DEFAULT_DATABASE)
    }
}

fn rejected(code: u32, message: String) -> SinkError {
    SinkError::Rejected {
        code: Some(code),
        message,
    }
}

#[async_trait::async_trait]
impl Sink for MemorySink {
    fn database(&self) -> &str {
        &self.database
    }

    async fn apply(&self, ddl: &Ddl) -> Result<(), SinkError> {
        let mut state = self.state();
        state.ddl_log.push(ddl.clone());

        match ddl {
            Ddl::CreateDatabase => {
                state.database_created = true;
            }
            Ddl::CreateTable(spec) => {
                if !state.tables.contains_key(&spec.name) && !state.views.contains_key(&spec.name)
                {
                    state.tables.insert(
                        spec.name.clone(),
                        MemoryTable {
                            columns: spec.columns.clone(),
                            rows: Vec::new(),
                        },
                    );
                }
            }
            Ddl::AddColumn {
                table,
                column,
                stored_type,
            } => {
                let t = state.tables.get_mut(table).ok_or_else(|| {
                    rejected(UNKNOWN_TABLE, format!("Table {} doesn't exist", table))
                })?;
                if t.position(column).is_some() {
                    return Err(SinkError::AlreadyExists(format!(
                        "column {column} already exists in {table}"
                    )));
                }
                t.columns.push((column.clone(), *stored_type));
                for row in &mut t.rows {
                    row.push(NativeValue::zero(*stored_type));
                }
            }
            Ddl::CreateView { name, query } => {
                if state.views.contains_key(name) || state.tables.contains_key(name) {
                    return Err(SinkError::AlreadyExists(format!("view {name} already exists")));
                }
                state.views.insert(name.clone(), query.clone());
            }
            Ddl::DropView { name } => {
                state.views.remove(name);
            }
        }
        Ok(())
    }

    async fn list_tables(&self) -> Result<HashSet<String>, SinkError> {
        let state = self.state();
        Ok(state
            .tables
            .keys()
            .chain(state.views.keys())
            .cloned()
            .collect())
    }

    async fn list_columns(&self, table: &str) -> Result<HashSet<String>, SinkError> {
        Ok(self.columns(table).into_iter().collect())
    }

    async fn insert(&self, row: &RowInsert) -> Result<(), SinkError> {
        let mut state = self.state();
        let t = state.tables.get_mut(&row.table).ok_or_else(|| {
            rejected(UNKNOWN_TABLE, format!("Table {} doesn't exist", row.table))
        })?;

        let mut stored: Vec<NativeValue> = t
            .columns
            .iter()
            .map(|(_, kind)| NativeValue::zero(*kind))
            .collect();
        for (column, value) in row.columns.iter().zip(&row.values) {
            let i = t.position(column).ok_or_else(|| {
                rejected(
                    NO_SUCH_COLUMN,
                    format!("No such column {column} in table {}", row.table),
                )
            })?;
            let declared = t.columns[i].1;
            if value.stored_type() != declared {
                return Err(rejected(
                    TYPE_MISMATCH,
                    format!(
                        "Type mismatch for column {column}: expected {declared}, got {}",
                        value.stored_type()
                    ),
                ));
            }
            stored[i] = value.clone();
        }

        t.rows.push(stored);
        state.inserts += 1;
        Ok(())
    }
}
