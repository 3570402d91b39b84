//! Collector Layer
//!
//! Produces one batch per source per cycle. Each metric is a [`Collector`]
//! yielding exactly one named, typed value; a [`CollectorSet`] runs them in
//! order and assembles a [`Batch`].
//!
//! # Architecture
//!
//! - [`Collector`]: closed set of value producers (timestamp, date, static, query)
//! - [`Source`]: scalar-query capability, implemented by [`PostgresSource`]
//! - [`MetricGroup`]: definitions loaded from `.sql` files, one group per table
//! - [`CollectorRegistry`]: schedules one [`SourceWorker`] per monitored database
//!
//! # Example
//!
//! ```rust,no_run
//! use pgtelemetry::collector::{CollectionContext, Collector, CollectorSet, PostgresConfig, PostgresSource};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let source = PostgresSource::new(&PostgresConfig::new("main", "app"));
//! let set = CollectorSet::new(vec![
//!     Collector::date(),
//!     Collector::timestamp(),
//!     Collector::fixed("dbname", "app"),
//!     Collector::fixed("dbhost", "db1"),
//!     Collector::typed("dbport", 5432_u16, pgtelemetry::collector::StoredType::UInt16),
//! ])?;
//! let batch = set.collect(&CollectionContext::now(), &source).await?;
//! # Ok(())
//! # }
//! ```

mod batch;
pub mod definition;
mod registry;
pub mod resolver;
pub mod source;
mod traits;
mod value;
mod variants;

pub use batch::{Batch, CollectorSet, MetricSlot};
pub use definition::{DefinitionError, MetricDefinition, MetricGroup};
pub use registry::{CollectorRegistry, DEFAULT_SHUTDOWN_TIMEOUT, JobInfo, SourceWorker};
pub use resolver::{FixedResolver, HostResolver, RoutableAddressResolver, normalize_host};
pub use source::{PostgresConfig, PostgresSource, Source, SourceError};
pub use traits::{CollectionContext, CollectionError, MIN_INTERVAL, Schedule, SchedulerError};
pub use value::{
    DBHOST_COLUMN, DBNAME_COLUMN, DBPORT_COLUMN, DT_COLUMN, META_COLUMNS, MetricValue, RawValue,
    StoredType, TS_COLUMN, is_identifier, is_meta_column,
};
pub use variants::{Collector, QueryCollector};
