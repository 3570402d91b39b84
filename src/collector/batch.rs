//! Batch assembly.
//!
//! A [`CollectorSet`] runs each collector once per cycle and turns the results
//! into a [`Batch`]: one observation of one source at one instant.

use std::collections::HashSet;

use super::source::Source;
use super::traits::{CollectionContext, CollectionError};
use super::value::{META_COLUMNS, MetricValue};
use super::variants::Collector;

/// A collector and its value for the current cycle.
///
/// The value starts unset and is computed at most once; later reads return
/// the stored value.
#[derive(Debug)]
pub struct MetricSlot {
    collector: Collector,
    computed: Option<MetricValue>,
}

impl MetricSlot {
    pub fn new(collector: Collector) -> Self {
        Self {
            collector,
            computed: None,
        }
    }

    pub fn collector(&self) -> &Collector {
        &self.collector
    }

    pub fn is_computed(&self) -> bool {
        self.computed.is_some()
    }

    /// The value, producing it on first access.
    pub async fn value(
        &mut self,
        ctx: &CollectionContext,
        source: &dyn Source,
    ) -> Result<&MetricValue, CollectionError> {
        let value = match self.computed.take() {
            Some(value) => value,
            None => self.collector.produce(ctx, source).await?,
        };
        Ok(&*self.computed.insert(value))
    }

    /// Consume the slot, producing the value if still unset.
    pub async fn into_value(
        mut self,
        ctx: &CollectionContext,
        source: &dyn Source,
    ) -> Result<MetricValue, CollectionError> {
        match self.computed.take() {
            Some(value) => Ok(value),
            None => self.collector.produce(ctx, source).await,
        }
    }
}

/// Ordered collectors with unique names.
#[derive(Debug)]
pub struct CollectorSet {
    slots: Vec<MetricSlot>,
}

impl CollectorSet {
    /// Build a set, rejecting duplicate names.
    pub fn new(collectors: Vec<Collector>) -> Result<Self, CollectionError> {
        let mut seen = HashSet::new();
        for collector in &collectors {
            if !seen.insert(collector.name().to_owned()) {
                return Err(CollectionError::DuplicateName(collector.name().to_owned()));
            }
        }
        Ok(Self {
            slots: collectors.into_iter().map(MetricSlot::new).collect(),
        })
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.slots.iter().map(|s| s.collector().name())
    }

    /// Produce every value in order and assemble the batch.
    ///
    /// The first failing collector aborts the whole batch.
    pub async fn collect(
        self,
        ctx: &CollectionContext,
        source: &dyn Source,
    ) -> Result<Batch, CollectionError> {
        let mut values = Vec::with_capacity(self.slots.len());
        for slot in self.slots {
            values.push(slot.into_value(ctx, source).await?);
        }
        Batch::new(values)
    }
}

/// One observation: meta columns plus metric columns, names unique.
#[derive(Debug, Clone, PartialEq)]
pub struct Batch {
    values: Vec<MetricValue>,
}

impl Batch {
    /// Validate and wrap `values`.
    ///
    /// # Errors
    /// `DuplicateName` when two values share a name, `MissingMeta` when a
    /// meta column is absent.
    pub fn new(values: Vec<MetricValue>) -> Result<Self, CollectionError> {
        let mut seen = HashSet::with_capacity(values.len());
        for value in &values {
            if !seen.insert(value.name.as_str()) {
                return Err(CollectionError::DuplicateName(value.name.clone()));
            }
        }
        if let Some((missing, _)) = META_COLUMNS.iter().find(|(meta, _)| !seen.contains(meta)) {
            return Err(CollectionError::MissingMeta((*missing).to_owned()));
        }
        Ok(Self { values })
    }

    pub fn values(&self) -> &[MetricValue] {
        &self.values
    }

    pub fn get(&self, name: &str) -> Option<&MetricValue> {
        self.values.iter().find(|v| v.name == name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.values.iter().map(|v| v.name.as_str())
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}
