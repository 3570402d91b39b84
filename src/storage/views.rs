//! Derived views over the metric tables.
//!
//! Views are declared as compile-time templates. [`ViewRegistry::ensure_all`]
//! runs after every insert cycle and is cheap when everything exists: one
//! catalog query, no DDL.
//!
//! Template placeholders:
//!
//! - `{meta}`: the meta column list
//! - `{source}`: the fully qualified metric table the view reads
//! - `{database}`: the sink database
//! - `{window}`: the per-source window used for running differences
//! - `{elapsed}`: seconds since the previous row within that window

use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};

use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};

use crate::collector::META_COLUMNS;
use crate::storage::catalog::SchemaCatalog;
use crate::storage::db::{Sink, SinkError};
use crate::storage::error::ViewError;
use crate::storage::schema::Ddl;

/// Window for consecutive-row differences. Partitioned by source so that
/// rows of different databases are never subtracted from each other.
pub const SOURCE_WINDOW: &str = "WINDOW w AS (PARTITION BY dbname, dbhost, dbport \
     ORDER BY ts ASC ROWS BETWEEN 1 PRECEDING AND CURRENT ROW)";

/// Seconds elapsed since the previous row of the same source; NULL on the
/// first row and when two rows share a timestamp.
const ELAPSED: &str = "nullIf(toInt64(toUnixTimestamp(ts)) - \
     lagInFrame(toNullable(toInt64(toUnixTimestamp(ts)))) OVER w, 0)";

/// A named view over one metric table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ViewDefinition {
    pub name: &'static str,
    pub source_table: &'static str,
    pub select_template: &'static str,
    pub order_clause: &'static str,
}

impl ViewDefinition {
    /// The view's `SELECT` statement for `database`.
    pub fn render(&self, database: &str) -> String {
        let meta = META_COLUMNS
            .iter()
            .map(|(name, _)| *name)
            .collect::<Vec<_>>()
            .join(", ");
        let source = format!("{database}.{}", self.source_table);
        let select = self
            .select_template
            .replace("{meta}", &meta)
            .replace("{source}", &source)
            .replace("{database}", database)
            .replace("{window}", SOURCE_WINDOW)
            .replace("{elapsed}", ELAPSED);
        format!("{select} ORDER BY {}", self.order_clause)
    }
}

/// Built-in views.
pub const BUILTIN_VIEWS: [ViewDefinition; 5] = [
    ViewDefinition {
        name: "response_time",
        source_table: "pg_stat_statements",
        select_template: "SELECT {meta}, calls, total_time, \
             if(calls = 0, NULL, total_time / calls) AS response_time \
             FROM {source}",
        order_clause: "ts DESC",
    },
    ViewDefinition {
        name: "rollbacks",
        source_table: "pg_stat_database",
        select_template: "SELECT {meta}, \
             (toInt64(xact_rollback) - lagInFrame(toNullable(toInt64(xact_rollback))) OVER w) \
             / {elapsed} AS rps \
             FROM {source} {window}",
        order_clause: "ts DESC",
    },
    ViewDefinition {
        name: "cache_hit_ratio",
        source_table: "pg_stat_database",
        select_template: "SELECT {meta}, \
             if(blks_hit + blks_read = 0, NULL, blks_hit / (blks_hit + blks_read)) AS cache_hit_ratio \
             FROM {source}",
        order_clause: "ts DESC",
    },
    ViewDefinition {
        name: "tps",
        source_table: "pg_stat_database",
        select_template: "SELECT {meta}, \
             (toInt64(xact_commit + xact_rollback) \
             - lagInFrame(toNullable(toInt64(xact_commit + xact_rollback))) OVER w) \
             / {elapsed} AS tps \
             FROM {source} {window}",
        order_clause: "ts DESC",
    },
    ViewDefinition {
        name: "qps",
        source_table: "pg_stat_statements",
        select_template: "SELECT {meta}, \
             (toInt64(calls) - lagInFrame(toNullable(toInt64(calls))) OVER w) \
             / {elapsed} AS qps \
             FROM {source} {window}",
        order_clause: "ts DESC",
    },
];

/// How existing views are treated.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    EnumString,
    Display,
    AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum ViewMode {
    /// Create missing views, leave existing ones alone.
    #[default]
    CreateIfAbsent,
    /// Drop and recreate each view once per process, then as `CreateIfAbsent`.
    Refresh,
}

/// Result of ensuring one view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViewOutcome {
    Created,
    Recreated,
    Present,
    /// The source table does not exist yet.
    Skipped,
}

/// Outcome of [`ViewRegistry::ensure_all`].
#[derive(Debug, Default)]
pub struct ViewReport {
    pub outcomes: Vec<(String, ViewOutcome)>,
    pub failures: Vec<ViewError>,
}

impl ViewReport {
    pub fn count(&self, outcome: ViewOutcome) -> usize {
        self.outcomes.iter().filter(|(_, o)| *o == outcome).count()
    }

    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Materializes views idempotently.
pub struct ViewRegistry {
    sink: Arc<dyn Sink>,
    catalog: SchemaCatalog,
    views: Vec<ViewDefinition>,
    mode: ViewMode,
    refreshed: Mutex<HashSet<&'static str>>,
}

impl std::fmt::Debug for ViewRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ViewRegistry")
            .field("views", &self.views.iter().map(|v| v.name).collect::<Vec<_>>())
            .field("mode", &self.mode)
            .finish_non_exhaustive()
    }
}

impl ViewRegistry {
    /// Registry with the built-in views.
    pub fn new(sink: Arc<dyn Sink>) -> Self {
        Self::with_views(sink, BUILTIN_VIEWS.to_vec())
    }

    pub fn with_views(sink: Arc<dyn Sink>, views: Vec<ViewDefinition>) -> Self {
        Self {
            catalog: SchemaCatalog::new(Arc::clone(&sink)),
            sink,
            views,
            mode: ViewMode::default(),
            refreshed: Mutex::new(HashSet::new()),
        }
    }

    pub fn with_mode(mut self, mode: ViewMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn views(&self) -> &[ViewDefinition] {
        &self.views
    }

    pub fn mode(&self) -> ViewMode {
        self.mode
    }

    /// Create `view` if absent (or recreate it, once, in refresh mode).
    pub async fn ensure(&self, view: &ViewDefinition) -> Result<ViewOutcome, ViewError> {
        let tables = self
            .catalog
            .list_tables()
            .await
            .map_err(|source| ViewError::Catalog {
                view: view.name.to_owned(),
                source,
            })?;
        self.ensure_with(view, &tables).await
    }

    /// Ensure every registered view. Failures are logged and reported, never
    /// returned.
    pub async fn ensure_all(&self) -> ViewReport {
        let mut report = ViewReport::default();

        let tables = match self.catalog.list_tables().await {
            Ok(tables) => tables,
            Err(source) => {
                tracing::warn!(error = %source, "Failed to list sink tables, skipping views");
                report.failures.push(ViewError::Catalog {
                    view: "*".to_owned(),
                    source,
                });
                return report;
            }
        };

        for view in &self.views {
            match self.ensure_with(view, &tables).await {
                Ok(outcome) => report.outcomes.push((view.name.to_owned(), outcome)),
                Err(e) => {
                    tracing::error!(view = %view.name, error = %e, "View creation failed");
                    report.failures.push(e);
                }
            }
        }
        report
    }

    // --- Private helpers ---

    async fn ensure_with(
        &self,
        view: &ViewDefinition,
        tables: &HashSet<String>,
    ) -> Result<ViewOutcome, ViewError> {
        if !tables.contains(view.source_table) {
            tracing::debug!(view = %view.name, table = %view.source_table, "Source table missing, view skipped");
            return Ok(ViewOutcome::Skipped);
        }

        let refresh_pending = self.mode == ViewMode::Refresh && !self.is_refreshed(view.name);
        let exists = tables.contains(view.name);

        let outcome = match (exists, refresh_pending) {
            (true, false) => return Ok(ViewOutcome::Present),
            (true, true) => {
                self.apply(view, &Ddl::DropView {
                    name: view.name.to_owned(),
                })
                .await?;
                self.create(view).await?;
                ViewOutcome::Recreated
            }
            (false, _) => self.create(view).await?,
        };

        self.mark_refreshed(view.name);
        tracing::info!(view = %view.name, outcome = ?outcome, "View ensured");
        Ok(outcome)
    }

    async fn create(&self, view: &ViewDefinition) -> Result<ViewOutcome, ViewError> {
        let ddl = Ddl::CreateView {
            name: view.name.to_owned(),
            query: view.render(self.sink.database()),
        };
        match self.sink.apply(&ddl).await {
            Ok(()) => Ok(ViewOutcome::Created),
            Err(SinkError::AlreadyExists(_)) => {
                tracing::debug!(view = %view.name, "View created concurrently");
                Ok(ViewOutcome::Present)
            }
            Err(source) => Err(ViewError::CreateFailed {
                view: view.name.to_owned(),
                source,
            }),
        }
    }

    async fn apply(&self, view: &ViewDefinition, ddl: &Ddl) -> Result<(), ViewError> {
        self.sink
            .apply(ddl)
            .await
            .map_err(|source| ViewError::CreateFailed {
                view: view.name.to_owned(),
                source,
            })
    }

    fn is_refreshed(&self, name: &str) -> bool {
        self.refreshed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(name)
    }

    fn mark_refreshed(&self, name: &'static str) {
        self.refreshed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name);
    }
}
