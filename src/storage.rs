//! Storage Layer
//!
//! Persists batches into a columnar sink with an additive schema and keeps
//! the derived views in place.
//!
//! # Components
//!
//! - [`Store`]: schema sync, coercion and single-row inserts
//! - [`SchemaCatalog`]: read-through listing of tables and columns
//! - [`ViewRegistry`]: idempotent creation of derived views
//! - [`Sink`]: the sink capability, with [`ClickHouseSink`] and [`MemorySink`]

mod catalog;
pub mod coerce;
pub mod db;
mod error;
pub mod schema;
mod store;
mod types;
pub mod views;

pub use catalog::SchemaCatalog;
pub use coerce::{MismatchPolicy, coerce, coerce_with_policy};
pub use db::{ClickHouseConfig, ClickHouseSink, MemorySink, Sink, SinkError};
pub use error::{StoreError, ViewError};
pub use schema::{Ddl, TableSpec};
pub use store::{SchemaSync, Store};
pub use types::{NativeValue, RowInsert};
pub use views::{BUILTIN_VIEWS, ViewDefinition, ViewMode, ViewOutcome, ViewRegistry, ViewReport};
