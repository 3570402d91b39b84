//! pgtelemetry - PostgreSQL Statistics Library
//!
//! Periodically runs scalar SQL queries against PostgreSQL databases and
//! appends the results as time-series rows to ClickHouse, one table per
//! metric group. Tables grow new columns as metric definitions are added,
//! and a set of derived views (rates, ratios) is kept on top of them.
//!
//! The crate can be used as a library, or run with the `pgtelemetry` binary.
//!
//! # Architecture
//!
//! - **Collector**: metric definitions, value producers, batches and scheduling
//! - **Storage**: additive schema sync, value coercion, inserts and views
//! - **Pipeline**: one collection cycle per monitored database
//! - **Config**: YAML configuration with environment variable expansion
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use pgtelemetry::{
//!     ClickHouseConfig, ClickHouseSink, MetricGroup, Pipeline, PostgresConfig, PostgresSource,
//!     SourceTarget, Store, ViewRegistry,
//! };
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let sink = Arc::new(ClickHouseSink::new(&ClickHouseConfig::default())?);
//! let store = Arc::new(Store::new(sink.clone()));
//! store.prepare_database().await?;
//!
//! let pipeline = Pipeline::new(
//!     store,
//!     Arc::new(ViewRegistry::new(sink)),
//!     MetricGroup::load_dir("metrics")?,
//! );
//!
//! let config = PostgresConfig::new("main", "app");
//! let report = pipeline
//!     .run_cycle(&SourceTarget::from(&config), &PostgresSource::new(&config))
//!     .await;
//! println!("inserted into {:?}", report.inserted);
//! # Ok(())
//! # }
//! ```

pub mod collector;
pub mod config;
pub mod pipeline;
pub mod storage;

pub use collector::{
    Batch, CollectionContext, CollectionError, Collector, CollectorRegistry, CollectorSet,
    MetricDefinition, MetricGroup, MetricValue, PostgresConfig, PostgresSource, RawValue,
    Schedule, Source, SourceWorker, StoredType,
};
pub use config::{AppConfig, ConfigError};
pub use pipeline::{CycleReport, Pipeline, PipelineError, SourceTarget};
pub use storage::{
    ClickHouseConfig, ClickHouseSink, MemorySink, MismatchPolicy, NativeValue, Sink, SinkError,
    Store, StoreError, ViewMode, ViewRegistry,
};
