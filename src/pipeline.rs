//! One collection cycle for one monitored database.
//!
//! For every metric group: build the collectors, assemble a batch, store it.
//! Then make sure the derived views exist. A failing group is reported and
//! does not stop the other groups.

use std::sync::Arc;
use std::time::{Duration, Instant};

use thiserror::Error;

use crate::collector::{
    Batch, CollectionContext, CollectionError, Collector, CollectorSet, DBHOST_COLUMN,
    DBNAME_COLUMN, DBPORT_COLUMN, HostResolver, MetricDefinition, MetricGroup, PostgresConfig,
    RoutableAddressResolver, Source, StoredType,
};
use crate::storage::{SchemaSync, Store, StoreError, ViewRegistry, ViewReport};

/// Errors from one group within a cycle.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("collection failed: {0}")]
    Collection(#[from] CollectionError),

    #[error("store failed: {0}")]
    Store(#[from] StoreError),
}

/// Identity of a monitored database as written to the meta columns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceTarget {
    pub name: String,
    pub dbname: String,
    pub host: String,
    pub port: u16,
}

impl SourceTarget {
    pub fn new(
        name: impl Into<String>,
        dbname: impl Into<String>,
        host: impl Into<String>,
        port: u16,
    ) -> Self {
        Self {
            name: name.into(),
            dbname: dbname.into(),
            host: host.into(),
            port,
        }
    }
}

impl From<&PostgresConfig> for SourceTarget {
    fn from(config: &PostgresConfig) -> Self {
        Self::new(&config.name, &config.dbname, &config.host, config.port)
    }
}

/// What one cycle did.
#[derive(Debug)]
pub struct CycleReport {
    pub source: String,
    /// Tables that received a row.
    pub inserted: Vec<String>,
    /// Groups that failed, with the reason.
    pub failed: Vec<(String, PipelineError)>,
    pub views: ViewReport,
    pub duration: Duration,
}

impl CycleReport {
    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Collects, stores and maintains views for any number of sources.
pub struct Pipeline {
    store: Arc<Store>,
    views: Arc<ViewRegistry>,
    groups: Vec<MetricGroup>,
    resolver: Arc<dyn HostResolver>,
    database_id: bool,
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("groups", &self.groups.iter().map(MetricGroup::table).collect::<Vec<_>>())
            .field("database_id", &self.database_id)
            .finish_non_exhaustive()
    }
}

impl Pipeline {
    pub fn new(store: Arc<Store>, views: Arc<ViewRegistry>, groups: Vec<MetricGroup>) -> Self {
        Self {
            store,
            views,
            groups,
            resolver: Arc::new(RoutableAddressResolver::default()),
            database_id: false,
        }
    }

    /// Use `resolver` for `localhost` sources.
    pub fn with_resolver(mut self, resolver: Arc<dyn HostResolver>) -> Self {
        self.resolver = resolver;
        self
    }

    /// Add a `dbid` column to every group.
    pub fn with_database_id(mut self, enabled: bool) -> Self {
        self.database_id = enabled;
        self
    }

    pub fn groups(&self) -> &[MetricGroup] {
        &self.groups
    }

    pub fn store(&self) -> &Arc<Store> {
        &self.store
    }

    /// Collectors for one group: meta columns first, then metrics by name.
    pub fn collectors_for(&self, target: &SourceTarget, group: &MetricGroup) -> Vec<Collector> {
        let mut collectors = vec![
            Collector::date(),
            Collector::timestamp(),
            Collector::fixed(DBNAME_COLUMN, &target.dbname),
            Collector::host(DBHOST_COLUMN, &target.host, self.resolver.as_ref()),
            Collector::typed(DBPORT_COLUMN, target.port, StoredType::UInt16),
        ];
        if self.database_id {
            collectors.push(Collector::query(
                &MetricDefinition::database_id(),
                &target.dbname,
            ));
        }
        collectors.extend(
            group
                .definitions()
                .iter()
                .map(|def| Collector::query(def, &target.dbname)),
        );
        collectors
    }

    /// Assemble the batch for one group.
    pub async fn collect_batch(
        &self,
        target: &SourceTarget,
        group: &MetricGroup,
        ctx: &CollectionContext,
        source: &dyn Source,
    ) -> Result<Batch, CollectionError> {
        CollectorSet::new(self.collectors_for(target, group))?
            .collect(ctx, source)
            .await
    }

    /// Collect and store one group.
    pub async fn run_group(
        &self,
        target: &SourceTarget,
        group: &MetricGroup,
        ctx: &CollectionContext,
        source: &dyn Source,
    ) -> Result<SchemaSync, PipelineError> {
        let batch = self.collect_batch(target, group, ctx, source).await?;
        Ok(self.store.insert(group.table(), &batch).await?)
    }

    /// Run every group for `target`, then ensure views.
    pub async fn run_cycle(&self, target: &SourceTarget, source: &dyn Source) -> CycleReport {
        let start = Instant::now();
        let ctx = CollectionContext::now();
        let mut inserted = Vec::new();
        let mut failed = Vec::new();

        for group in &self.groups {
            match self.run_group(target, group, &ctx, source).await {
                Ok(sync) => {
                    if !sync.is_unchanged() {
                        tracing::info!(
                            source = %target.name,
                            table = %group.table(),
                            created = sync.created_table,
                            added = ?sync.added_columns,
                            "Schema synced"
                        );
                    }
                    inserted.push(group.table().to_owned());
                }
                Err(e) => {
                    tracing::warn!(source = %target.name, table = %group.table(), error = %e, "Group failed");
                    failed.push((group.table().to_owned(), e));
                }
            }
        }

        let views = self.views.ensure_all().await;

        CycleReport {
            source: target.name.clone(),
            inserted,
            failed,
            views,
            duration: start.elapsed(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::{FixedResolver, RawValue, SourceError};
    use crate::storage::MemorySink;
    use std::net::{IpAddr, Ipv4Addr};

    struct ConstSource;

    #[async_trait::async_trait]
    impl Source for ConstSource {
        async fn fetch_scalar(
            &self,
            query: &str,
            _params: &[String],
        ) -> Result<Option<RawValue>, SourceError> {
            if query.contains("datid") {
                return Ok(Some(RawValue::Int(16384)));
            }
            Ok(Some(RawValue::Int(7)))
        }
    }

    fn pipeline(sink: Arc<MemorySink>, groups: Vec<MetricGroup>) -> Pipeline {
        let store = Arc::new(Store::new(sink.clone()));
        let views = Arc::new(ViewRegistry::new(sink));
        Pipeline::new(store, views, groups)
            .with_resolver(Arc::new(FixedResolver(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 5)))))
    }

    fn group() -> MetricGroup {
        MetricGroup::new(
            "pg_stat_database",
            vec![
                MetricDefinition::new("xact_commit", "SELECT 1", StoredType::UInt64).unwrap(),
                MetricDefinition::new("xact_rollback", "SELECT 2", StoredType::UInt64).unwrap(),
            ],
        )
        .unwrap()
    }

    #[test]
    fn test_collectors_for_orders_meta_first() {
        let sink = Arc::new(MemorySink::default());
        let p = pipeline(sink, vec![group()]).with_database_id(true);
        let target = SourceTarget::new("main", "app", "localhost", 5432);
        let collectors = p.collectors_for(&target, &p.groups()[0]);
        let names: Vec<_> = collectors.iter().map(Collector::name).collect();
        assert_eq!(
            names,
            ["dt", "ts", "dbname", "dbhost", "dbport", "dbid", "xact_commit", "xact_rollback"]
        );
    }

    #[tokio::test]
    async fn test_run_cycle_inserts_and_creates_views() {
        let sink = Arc::new(MemorySink::default());
        let p = pipeline(sink.clone(), vec![group()]);
        let target = SourceTarget::new("main", "app", "localhost", 5432);

        let report = p.run_cycle(&target, &ConstSource).await;
        assert!(report.is_success());
        assert_eq!(report.inserted, vec!["pg_stat_database".to_string()]);

        let rows = sink.rows("pg_stat_database");
        assert_eq!(rows.len(), 1);
        assert_eq!(
            rows[0]["dbhost"],
            crate::storage::NativeValue::String("10.0.0.5".into())
        );
        assert_eq!(rows[0]["xact_commit"], crate::storage::NativeValue::UInt64(7));

        // Views over pg_stat_database exist; pg_stat_statements views are skipped.
        let views = sink.view_names();
        assert!(views.contains(&"tps".to_string()));
        assert!(!views.contains(&"qps".to_string()));
    }

    #[test]
    fn test_target_from_config() {
        let config = PostgresConfig::new("main", "app").with_address("db1", 6432);
        let target = SourceTarget::from(&config);
        assert_eq!(target, SourceTarget::new("main", "app", "db1", 6432));
    }
}
