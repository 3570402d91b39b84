//! The closed set of collectors.
//!
//! Every collector produces exactly one [`MetricValue`] per cycle. The storage
//! type is chosen at construction and attached to the output unchanged.

use super::definition::MetricDefinition;
use super::resolver::{HostResolver, normalize_host};
use super::source::Source;
use super::traits::{CollectionContext, CollectionError};
use super::value::{DT_COLUMN, MetricValue, RawValue, StoredType, TS_COLUMN};

/// A parameterized single-value query.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryCollector {
    pub name: String,
    pub query: String,
    pub params: Vec<String>,
    pub stored_type: StoredType,
}

/// Producer of one named, typed value.
#[derive(Debug, Clone, PartialEq)]
pub enum Collector {
    /// The cycle's observation instant.
    Timestamp { name: String },
    /// The date of the cycle's observation instant.
    Date { name: String },
    /// A value fixed at construction.
    Static {
        name: String,
        value: RawValue,
        stored_type: StoredType,
    },
    /// First column of the first row of a source query.
    Query(QueryCollector),
}

impl Collector {
    /// `ts` collector.
    pub fn timestamp() -> Self {
        Self::Timestamp {
            name: TS_COLUMN.to_owned(),
        }
    }

    /// `dt` collector.
    pub fn date() -> Self {
        Self::Date {
            name: DT_COLUMN.to_owned(),
        }
    }

    /// Static string value.
    pub fn fixed(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self::typed(name, RawValue::Text(value.into()), StoredType::String)
    }

    /// Static value with an explicit storage type.
    pub fn typed(name: impl Into<String>, value: impl Into<RawValue>, stored_type: StoredType) -> Self {
        Self::Static {
            name: name.into(),
            value: value.into(),
            stored_type,
        }
    }

    /// Static host value; `localhost` is replaced by the routable address.
    pub fn host(name: impl Into<String>, host: &str, resolver: &dyn HostResolver) -> Self {
        Self::fixed(name, normalize_host(host, resolver))
    }

    /// Query collector for a metric definition against `dbname`.
    pub fn query(definition: &MetricDefinition, dbname: &str) -> Self {
        Self::Query(QueryCollector {
            name: definition.name.clone(),
            query: definition.query.clone(),
            params: definition.parameters_for(dbname),
            stored_type: definition.stored_type,
        })
    }

    pub fn name(&self) -> &str {
        match self {
            Self::Timestamp { name } | Self::Date { name } | Self::Static { name, .. } => name,
            Self::Query(q) => &q.name,
        }
    }

    pub fn stored_type(&self) -> StoredType {
        match self {
            Self::Timestamp { .. } => StoredType::DateTime,
            Self::Date { .. } => StoredType::Date,
            Self::Static { stored_type, .. } => *stored_type,
            Self::Query(q) => q.stored_type,
        }
    }

    /// Produce this cycle's value. Query collectors issue exactly one query.
    pub async fn produce(
        &self,
        ctx: &CollectionContext,
        source: &dyn Source,
    ) -> Result<MetricValue, CollectionError> {
        let raw = match self {
            Self::Timestamp { .. } => RawValue::DateTime(ctx.timestamp()),
            Self::Date { .. } => RawValue::Date(ctx.date()),
            Self::Static { value, .. } => value.clone(),
            Self::Query(q) => source
                .fetch_scalar(&q.query, &q.params)
                .await
                .map_err(|source| CollectionError::SourceUnavailable {
                    name: q.name.clone(),
                    source,
                })?
                .ok_or_else(|| CollectionError::QueryFailed {
                    name: q.name.clone(),
                })?,
        };

        Ok(MetricValue::new(self.name(), self.stored_type(), raw))
    }
}
