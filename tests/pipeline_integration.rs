//! Pipeline Integration Tests
//!
//! Drive collection, schema sync, inserts and views end to end against the
//! in-memory sink and a scripted source.

use std::collections::{HashMap, HashSet};
use std::net::{IpAddr, Ipv4Addr};
use std::sync::{Arc, Mutex};

use chrono::NaiveDate;
use pgtelemetry::collector::{
    Batch, CollectionError, FixedResolver, MetricDefinition, MetricGroup, MetricValue, RawValue,
    Source, SourceError, StoredType,
};
use pgtelemetry::pipeline::{Pipeline, PipelineError, SourceTarget};
use pgtelemetry::storage::{
    Ddl, MemorySink, MismatchPolicy, NativeValue, RowInsert, Sink, SinkError, Store, StoreError,
    ViewError, ViewMode, ViewOutcome, ViewRegistry, coerce,
};

// =============================================================================
// Test Helpers
// =============================================================================

/// Answers queries from a table of canned responses.
#[derive(Default)]
struct ScriptedSource {
    answers: Mutex<HashMap<String, Result<Option<RawValue>, String>>>,
    calls: Mutex<Vec<(String, Vec<String>)>>,
}

impl ScriptedSource {
    fn answer(self, query: &str, value: impl Into<RawValue>) -> Self {
        self.set(query, Ok(Some(value.into())));
        self
    }

    fn no_rows(self, query: &str) -> Self {
        self.set(query, Ok(None));
        self
    }

    fn failing(self, query: &str) -> Self {
        self.set(query, Err("connection refused".to_owned()));
        self
    }

    fn set(&self, query: &str, response: Result<Option<RawValue>, String>) {
        self.answers
            .lock()
            .unwrap()
            .insert(query.to_owned(), response);
    }

    fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait::async_trait]
impl Source for ScriptedSource {
    async fn fetch_scalar(
        &self,
        query: &str,
        params: &[String],
    ) -> Result<Option<RawValue>, SourceError> {
        self.calls
            .lock()
            .unwrap()
            .push((query.to_owned(), params.to_vec()));
        match self.answers.lock().unwrap().get(query) {
            Some(Ok(value)) => Ok(value.clone()),
            Some(Err(message)) => Err(SourceError::Unavailable(message.clone())),
            None => Err(SourceError::Unavailable(format!("unscripted query: {query}"))),
        }
    }
}

/// Lists nothing, so every sync believes the schema is missing.
struct StaleCatalogSink {
    inner: Arc<MemorySink>,
}

#[async_trait::async_trait]
impl Sink for StaleCatalogSink {
    fn database(&self) -> &str {
        self.inner.database()
    }

    async fn apply(&self, ddl: &Ddl) -> Result<(), SinkError> {
        self.inner.apply(ddl).await
    }

    async fn list_tables(&self) -> Result<HashSet<String>, SinkError> {
        Ok(HashSet::new())
    }

    async fn list_columns(&self, _table: &str) -> Result<HashSet<String>, SinkError> {
        Ok(HashSet::new())
    }

    async fn insert(&self, row: &RowInsert) -> Result<(), SinkError> {
        self.inner.insert(row).await
    }
}

/// Rejects every `ADD COLUMN` or every `CREATE VIEW` with a non-duplicate
/// exception; everything else reaches the memory sink.
struct RejectingSink {
    inner: Arc<MemorySink>,
    reject_columns: bool,
    reject_views: bool,
}

impl RejectingSink {
    fn columns(inner: Arc<MemorySink>) -> Self {
        Self {
            inner,
            reject_columns: true,
            reject_views: false,
        }
    }

    fn views(inner: Arc<MemorySink>) -> Self {
        Self {
            inner,
            reject_columns: false,
            reject_views: true,
        }
    }
}

#[async_trait::async_trait]
impl Sink for RejectingSink {
    fn database(&self) -> &str {
        self.inner.database()
    }

    async fn apply(&self, ddl: &Ddl) -> Result<(), SinkError> {
        let rejected = match ddl {
            Ddl::AddColumn { .. } => self.reject_columns,
            Ddl::CreateView { .. } => self.reject_views,
            _ => false,
        };
        if rejected {
            return Err(SinkError::Rejected {
                code: Some(44),
                message: "Code: 44. DB::Exception: Illegal column. (ILLEGAL_COLUMN)".into(),
            });
        }
        self.inner.apply(ddl).await
    }

    async fn list_tables(&self) -> Result<HashSet<String>, SinkError> {
        self.inner.list_tables().await
    }

    async fn list_columns(&self, table: &str) -> Result<HashSet<String>, SinkError> {
        self.inner.list_columns(table).await
    }

    async fn insert(&self, row: &RowInsert) -> Result<(), SinkError> {
        self.inner.insert(row).await
    }
}

fn definition(name: &str, query: &str, stored_type: StoredType) -> MetricDefinition {
    MetricDefinition::new(name, query, stored_type).unwrap()
}

fn database_group() -> MetricGroup {
    MetricGroup::new(
        "pg_stat_database",
        vec![
            definition("xact_commit", "SELECT xact_commit FROM s WHERE datname = $1", StoredType::UInt64),
            definition("xact_rollback", "SELECT xact_rollback FROM s WHERE datname = $1", StoredType::UInt64),
        ],
    )
    .unwrap()
}

fn statements_group() -> MetricGroup {
    MetricGroup::new(
        "pg_stat_statements",
        vec![definition("calls", "SELECT sum(calls)", StoredType::UInt64)],
    )
    .unwrap()
}

fn database_source() -> ScriptedSource {
    ScriptedSource::default()
        .answer("SELECT xact_commit FROM s WHERE datname = $1", 120_i64)
        .answer("SELECT xact_rollback FROM s WHERE datname = $1", 3_i64)
        .answer("SELECT sum(calls)", 42_i64)
}

fn pipeline(sink: Arc<dyn Sink>, groups: Vec<MetricGroup>) -> Pipeline {
    Pipeline::new(
        Arc::new(Store::new(Arc::clone(&sink))),
        Arc::new(ViewRegistry::new(sink)),
        groups,
    )
    .with_resolver(Arc::new(FixedResolver(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 7)))))
}

fn target() -> SourceTarget {
    SourceTarget::new("primary", "app", "db1", 5432)
}

fn meta(day: u32, hour: u32) -> Vec<MetricValue> {
    let date = NaiveDate::from_ymd_opt(2024, 3, day).unwrap();
    vec![
        MetricValue::new("dt", StoredType::Date, date),
        MetricValue::new("ts", StoredType::DateTime, date.and_hms_opt(hour, 0, 0).unwrap()),
        MetricValue::new("dbname", StoredType::String, "x"),
        MetricValue::new("dbhost", StoredType::String, "h"),
        MetricValue::new("dbport", StoredType::UInt16, 5432_u16),
    ]
}

fn batch_with(day: u32, hour: u32, extra: MetricValue) -> Batch {
    let mut values = meta(day, hour);
    values.push(extra);
    Batch::new(values).unwrap()
}

fn view_creates(sink: &MemorySink, view: &str) -> usize {
    sink.ddl_log()
        .iter()
        .filter(|ddl| matches!(ddl, Ddl::CreateView { name, .. } if name == view))
        .count()
}

// =============================================================================
// Schema Evolution
// =============================================================================

#[tokio::test]
async fn test_new_metric_adds_column_and_backfills_zero() {
    let sink = Arc::new(MemorySink::default());
    let store = Store::new(sink.clone());

    store
        .insert("t", &batch_with(1, 10, MetricValue::new("calls", StoredType::UInt64, 10_i64)))
        .await
        .unwrap();
    let sync = store
        .insert("t", &batch_with(1, 11, MetricValue::new("rows", StoredType::UInt64, 100_i64)))
        .await
        .unwrap();
    assert_eq!(sync.added_columns, vec!["rows".to_string()]);

    assert_eq!(
        sink.columns("t"),
        ["dt", "ts", "dbname", "dbhost", "dbport", "calls", "rows"]
    );

    let rows = sink.rows("t");
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0]["calls"], NativeValue::UInt64(10));
    assert_eq!(rows[0]["rows"], NativeValue::UInt64(0));
    assert_eq!(rows[1]["calls"], NativeValue::UInt64(0));
    assert_eq!(rows[1]["rows"], NativeValue::UInt64(100));
}

#[tokio::test]
async fn test_schema_sync_is_idempotent() {
    let sink = Arc::new(MemorySink::default());
    let p = pipeline(sink.clone(), vec![database_group(), statements_group()]);
    let source = database_source();

    let first = p.run_cycle(&target(), &source).await;
    assert!(first.is_success(), "{:?}", first.failed);
    let ddl_after_first = sink.ddl_log().len();

    let second = p.run_cycle(&target(), &source).await;
    assert!(second.is_success());
    assert_eq!(sink.ddl_log().len(), ddl_after_first);
    assert_eq!(second.views.count(ViewOutcome::Present), 5);
    assert_eq!(sink.rows("pg_stat_database").len(), 2);
}

#[tokio::test]
async fn test_column_set_is_union_of_definitions() {
    let sink = Arc::new(MemorySink::default());
    let source = database_source()
        .answer("SELECT blks_hit", 900_i64)
        .answer("SELECT blks_read", 100_i64);

    let v1 = pipeline(sink.clone(), vec![database_group()]);
    assert!(v1.run_cycle(&target(), &source).await.is_success());

    let v2 = pipeline(
        sink.clone(),
        vec![
            MetricGroup::new(
                "pg_stat_database",
                vec![
                    definition("blks_hit", "SELECT blks_hit", StoredType::UInt64),
                    definition("blks_read", "SELECT blks_read", StoredType::UInt64),
                ],
            )
            .unwrap(),
        ],
    );
    assert!(v2.run_cycle(&target(), &source).await.is_success());

    let columns: HashSet<_> = sink.columns("pg_stat_database").into_iter().collect();
    let expected: HashSet<_> = [
        "dt", "ts", "dbname", "dbhost", "dbport", "xact_commit", "xact_rollback", "blks_hit",
        "blks_read",
    ]
    .into_iter()
    .map(String::from)
    .collect();
    assert_eq!(columns, expected);

    let rows = sink.rows("pg_stat_database");
    assert_eq!(rows[0]["blks_hit"], NativeValue::UInt64(0));
    assert_eq!(rows[1]["xact_commit"], NativeValue::UInt64(0));
    assert_eq!(rows[1]["blks_hit"], NativeValue::UInt64(900));
}

#[tokio::test]
async fn test_concurrent_creation_is_tolerated() {
    let memory = Arc::new(MemorySink::default());
    let sink = Arc::new(StaleCatalogSink {
        inner: memory.clone(),
    });
    let store = Store::new(sink);
    let batch = batch_with(2, 8, MetricValue::new("calls", StoredType::UInt64, 5_i64));

    let first = store.insert("t", &batch).await.unwrap();
    assert_eq!(first.added_columns, vec!["calls".to_string()]);

    // Every meta and metric column already exists; the sink reports it and
    // the insert proceeds.
    let second = store.insert("t", &batch).await.unwrap();
    assert!(second.added_columns.is_empty());
    assert_eq!(memory.rows("t").len(), 2);
}

#[tokio::test]
async fn test_rejected_column_fails_insert() {
    let memory = Arc::new(MemorySink::default());
    let store = Store::new(Arc::new(RejectingSink::columns(memory.clone())));
    let batch = batch_with(2, 9, MetricValue::new("calls", StoredType::UInt64, 5_i64));

    let err = store.insert("t", &batch).await.unwrap_err();

    assert!(matches!(
        &err,
        StoreError::SchemaSync { table, column: Some(column), source: SinkError::Rejected { .. } }
            if table == "t" && column == "calls"
    ));
    assert_eq!(memory.insert_count(), 0);
    assert!(memory.rows("t").is_empty());
}

#[tokio::test]
async fn test_rejected_view_does_not_block_inserts() {
    let memory = Arc::new(MemorySink::default());
    let p = pipeline(
        Arc::new(RejectingSink::views(memory.clone())),
        vec![database_group()],
    );

    let report = p.run_cycle(&target(), &database_source()).await;

    assert!(report.is_success(), "{:?}", report.failed);
    assert_eq!(report.inserted, vec!["pg_stat_database".to_string()]);
    assert_eq!(memory.rows("pg_stat_database").len(), 1);

    assert_eq!(report.views.failures.len(), 3);
    assert!(report.views.failures.iter().all(|e| matches!(
        e,
        ViewError::CreateFailed { source: SinkError::Rejected { code: Some(44), .. }, .. }
    )));
    assert_eq!(report.views.count(ViewOutcome::Present), 0);
    assert!(memory.view_names().is_empty());
}

// =============================================================================
// Collection Failures
// =============================================================================

#[tokio::test]
async fn test_zero_row_query_fails_group_without_insert() {
    let sink = Arc::new(MemorySink::default());
    let p = pipeline(sink.clone(), vec![statements_group()]);
    let source = ScriptedSource::default().no_rows("SELECT sum(calls)");

    let report = p.run_cycle(&target(), &source).await;

    assert_eq!(report.failed.len(), 1);
    let (table, error) = &report.failed[0];
    assert_eq!(table, "pg_stat_statements");
    assert!(matches!(
        error,
        PipelineError::Collection(CollectionError::QueryFailed { name }) if name == "calls"
    ));
    assert_eq!(sink.insert_count(), 0);
    assert!(sink.columns("pg_stat_statements").is_empty());
}

#[tokio::test]
async fn test_failing_group_does_not_stop_others() {
    let sink = Arc::new(MemorySink::default());
    let p = pipeline(sink.clone(), vec![database_group(), statements_group()]);
    let source = database_source().failing("SELECT sum(calls)");

    let report = p.run_cycle(&target(), &source).await;

    assert_eq!(report.inserted, vec!["pg_stat_database".to_string()]);
    assert_eq!(report.failed.len(), 1);
    assert!(matches!(
        &report.failed[0].1,
        PipelineError::Collection(CollectionError::SourceUnavailable { name, .. }) if name == "calls"
    ));
    assert_eq!(sink.rows("pg_stat_database").len(), 1);
    assert!(sink.rows("pg_stat_statements").is_empty());
}

#[tokio::test]
async fn test_unreachable_source_does_not_affect_other_sources() {
    let sink = Arc::new(MemorySink::default());
    let p = pipeline(sink.clone(), vec![database_group()]);

    let down = ScriptedSource::default()
        .failing("SELECT xact_commit FROM s WHERE datname = $1")
        .failing("SELECT xact_rollback FROM s WHERE datname = $1");
    let up = database_source();

    let down_target = SourceTarget::new("replica", "app", "db2", 5433);
    let up_target = target();
    let (down_report, up_report) = tokio::join!(
        p.run_cycle(&down_target, &down),
        p.run_cycle(&up_target, &up)
    );

    assert!(!down_report.is_success());
    assert!(up_report.is_success());
    let rows = sink.rows("pg_stat_database");
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["dbhost"], NativeValue::String("db1".into()));
    assert_eq!(rows[0]["dbport"], NativeValue::UInt16(5432));
}

#[tokio::test]
async fn test_one_query_per_metric_bound_to_dbname() {
    let sink = Arc::new(MemorySink::default());
    let p = pipeline(sink.clone(), vec![database_group()]);
    let source = database_source();

    p.run_cycle(&target(), &source).await;

    assert_eq!(source.call_count(), 2);
    let calls = source.calls.lock().unwrap().clone();
    assert!(calls.iter().all(|(_, params)| params == &["app".to_string()]));
}

// =============================================================================
// Coercion
// =============================================================================

#[test]
fn test_coerce_text_to_integer() {
    let fractional = MetricValue::new("rows", StoredType::UInt32, "12.7");
    assert!(matches!(
        coerce(&fractional),
        Err(StoreError::TypeMismatch { name, .. }) if name == "rows"
    ));

    let whole = MetricValue::new("rows", StoredType::UInt32, "12");
    assert_eq!(coerce(&whole).unwrap(), NativeValue::UInt32(12));

    let too_big = MetricValue::new("small", StoredType::UInt8, 300_i64);
    assert!(coerce(&too_big).is_err());
}

#[tokio::test]
async fn test_mismatch_policy_controls_insert() {
    let bad = MetricValue::new("calls", StoredType::UInt8, -1_i64);

    let sink = Arc::new(MemorySink::default());
    let store = Store::new(sink.clone());
    let err = store.insert("t", &batch_with(3, 9, bad.clone())).await.unwrap_err();
    assert!(matches!(err, StoreError::TypeMismatch { .. }));
    assert!(sink.ddl_log().is_empty());

    let sink = Arc::new(MemorySink::default());
    let store = Store::new(sink.clone()).with_policy(MismatchPolicy::Substitute);
    store.insert("t", &batch_with(3, 9, bad)).await.unwrap();
    assert_eq!(sink.rows("t")[0]["calls"], NativeValue::UInt8(0));
}

#[tokio::test]
async fn test_null_value_is_stored_as_zero() {
    let sink = Arc::new(MemorySink::default());
    let p = pipeline(sink.clone(), vec![statements_group()]);
    let source = ScriptedSource::default().answer("SELECT sum(calls)", RawValue::Null);

    assert!(p.run_cycle(&target(), &source).await.is_success());
    assert_eq!(sink.rows("pg_stat_statements")[0]["calls"], NativeValue::UInt64(0));
}

// =============================================================================
// Views
// =============================================================================

#[tokio::test]
async fn test_views_follow_source_tables() {
    let sink = Arc::new(MemorySink::default());
    let p = pipeline(sink.clone(), vec![database_group()]);

    let report = p.run_cycle(&target(), &database_source()).await;
    assert_eq!(report.views.count(ViewOutcome::Created), 3);
    assert_eq!(report.views.count(ViewOutcome::Skipped), 2);

    let query = sink.view_query("rollbacks").unwrap();
    assert!(query.contains("FROM pg_telemetry.pg_stat_database"));
    assert!(query.contains("PARTITION BY dbname, dbhost, dbport"));
}

#[tokio::test]
async fn test_dropped_view_is_recreated_once() {
    let sink = Arc::new(MemorySink::default());
    let p = pipeline(sink.clone(), vec![database_group()]);
    let source = database_source();

    p.run_cycle(&target(), &source).await;
    p.run_cycle(&target(), &source).await;
    assert_eq!(view_creates(&sink, "tps"), 1);

    sink.apply(&Ddl::DropView { name: "tps".into() })
        .await
        .unwrap();
    p.run_cycle(&target(), &source).await;
    p.run_cycle(&target(), &source).await;
    assert_eq!(view_creates(&sink, "tps"), 2);
}

#[tokio::test]
async fn test_refresh_mode_recreates_once_per_process() {
    let sink = Arc::new(MemorySink::default());
    let p = pipeline(sink.clone(), vec![database_group()]);
    p.run_cycle(&target(), &database_source()).await;
    assert_eq!(view_creates(&sink, "tps"), 1);

    // A new process with refresh mode rebuilds existing views exactly once.
    let registry = ViewRegistry::new(sink.clone()).with_mode(ViewMode::Refresh);
    let first = registry.ensure_all().await;
    assert_eq!(first.count(ViewOutcome::Recreated), 3);
    let second = registry.ensure_all().await;
    assert_eq!(second.count(ViewOutcome::Present), 3);
    assert_eq!(view_creates(&sink, "tps"), 2);
}

// =============================================================================
// Metric Definitions
// =============================================================================

#[tokio::test]
async fn test_definitions_loaded_from_directory() {
    let dir = tempfile::tempdir().unwrap();
    let group_dir = dir.path().join("pg_database_size");
    std::fs::create_dir(&group_dir).unwrap();
    std::fs::write(
        group_dir.join("size_bytes.sql"),
        "-- type: UInt64\nSELECT pg_database_size($1)\n",
    )
    .unwrap();
    std::fs::write(group_dir.join("label.sql"), "SELECT 'main'\n").unwrap();
    std::fs::create_dir(dir.path().join("empty")).unwrap();

    let groups = MetricGroup::load_dir(dir.path()).unwrap();
    assert_eq!(groups.len(), 1);
    assert_eq!(groups[0].table(), "pg_database_size");

    let source = ScriptedSource::default()
        .answer("SELECT pg_database_size($1)", 8_388_608_i64)
        .answer("SELECT 'main'", "main");
    let sink = Arc::new(MemorySink::default());
    let p = pipeline(sink.clone(), groups);
    assert!(p.run_cycle(&target(), &source).await.is_success());

    assert_eq!(
        sink.column_type("pg_database_size", "size_bytes"),
        Some(StoredType::UInt64)
    );
    assert_eq!(
        sink.column_type("pg_database_size", "label"),
        Some(StoredType::String)
    );
    let rows = sink.rows("pg_database_size");
    assert_eq!(rows[0]["size_bytes"], NativeValue::UInt64(8_388_608));
    assert_eq!(rows[0]["label"], NativeValue::String("main".into()));
}

#[tokio::test]
async fn test_database_id_column() {
    let sink = Arc::new(MemorySink::default());
    let p = pipeline(sink.clone(), vec![statements_group()]).with_database_id(true);
    let source = ScriptedSource::default()
        .answer("SELECT sum(calls)", 1_i64)
        .answer(&MetricDefinition::database_id().query, 16384_i64);

    assert!(p.run_cycle(&target(), &source).await.is_success());
    assert_eq!(
        sink.rows("pg_stat_statements")[0]["dbid"],
        NativeValue::UInt32(16384)
    );
}

#[test]
fn test_shipped_definitions_load() {
    let root = std::path::Path::new(env!("CARGO_MANIFEST_DIR")).join("metrics");
    let groups = MetricGroup::load_dir(root).unwrap();
    let tables: Vec<_> = groups.iter().map(MetricGroup::table).collect();
    assert_eq!(
        tables,
        ["pg_database_size", "pg_stat_activity", "pg_stat_database", "pg_stat_statements"]
    );
    for group in &groups {
        assert!(!group.is_empty());
    }
}

#[test]
fn test_shipped_config_parses() {
    let path = std::path::Path::new(env!("CARGO_MANIFEST_DIR")).join("configs/config.yaml");
    let config = pgtelemetry::AppConfig::load(path).unwrap();
    assert_eq!(config.sources.len(), 1);
    assert_eq!(config.sink.database, "pg_telemetry");
}
