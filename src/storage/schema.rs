//! Table layout and DDL statements.
//!
//! Every metric table starts with the meta columns and is partitioned by
//! month of `dt`. Columns are only ever added.

use std::fmt;

use crate::collector::{META_COLUMNS, StoredType};

/// Table engine for metric tables.
pub const TABLE_ENGINE: &str = "MergeTree()";

/// Partition expression for metric tables.
pub const PARTITION_BY: &str = "toYYYYMM(dt)";

/// Sorting key for metric tables.
pub const ORDER_BY: &str = "(ts, dbname, dbhost, dbport)";

/// Column set and layout of a table to create.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableSpec {
    pub name: String,
    pub columns: Vec<(String, StoredType)>,
    pub engine: String,
    pub partition_by: String,
    pub order_by: String,
}

impl TableSpec {
    /// A metric table holding only the meta columns.
    pub fn metric_table(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            columns: META_COLUMNS
                .iter()
                .map(|(column, kind)| ((*column).to_owned(), *kind))
                .collect(),
            engine: TABLE_ENGINE.to_owned(),
            partition_by: PARTITION_BY.to_owned(),
            order_by: ORDER_BY.to_owned(),
        }
    }
}

/// A schema change issued against the sink.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Ddl {
    CreateDatabase,
    CreateTable(TableSpec),
    AddColumn {
        table: String,
        column: String,
        stored_type: StoredType,
    },
    CreateView {
        name: String,
        query: String,
    },
    DropView {
        name: String,
    },
}

impl Ddl {
    /// SQL text of this statement against `database`.
    ///
    /// `AddColumn` and `CreateView` carry no `IF NOT EXISTS` so that the sink
    /// reports races explicitly.
    pub fn to_sql(&self, database: &str) -> String {
        match self {
            Self::CreateDatabase => format!("CREATE DATABASE IF NOT EXISTS {database}"),
            Self::CreateTable(spec) => {
                let columns = spec
                    .columns
                    .iter()
                    .map(|(name, kind)| format!("{name} {}", kind.sink_type()))
                    .collect::<Vec<_>>()
                    .join(", ");
                format!(
                    "CREATE TABLE IF NOT EXISTS {database}.{} ({columns}) ENGINE = {} PARTITION BY {} ORDER BY {}",
                    spec.name, spec.engine, spec.partition_by, spec.order_by
                )
            }
            Self::AddColumn {
                table,
                column,
                stored_type,
            } => format!(
                "ALTER TABLE {database}.{table} ADD COLUMN {column} {}",
                stored_type.sink_type()
            ),
            Self::CreateView { name, query } => {
                format!("CREATE VIEW {database}.{name} AS {query}")
            }
            Self::DropView { name } => format!("DROP VIEW IF EXISTS {database}.{name}"),
        }
    }

    /// Name of the object the statement targets (empty for the database).
    pub fn object(&self) -> &str {
        match self {
            Self::CreateDatabase => "",
            Self::CreateTable(spec) => &spec.name,
            Self::AddColumn { table, .. } => table,
            Self::CreateView { name, .. } | Self::DropView { name } => name,
        }
    }
}

impl fmt::Display for Ddl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CreateDatabase => f.write_str("CREATE DATABASE"),
            Self::CreateTable(spec) => write!(f, "CREATE TABLE {}", spec.name),
            Self::AddColumn { table, column, stored_type } => {
                write!(f, "ADD COLUMN {table}.{column} {stored_type}")
            }
            Self::CreateView { name, .. } => write!(f, "CREATE VIEW {name}"),
            Self::DropView { name } => write!(f, "DROP VIEW {name}"),
        }
    }
}
