//! Metric definitions loaded from `.sql` files.
//!
//! Layout on disk:
//!
//! ```text
//! metrics/
//!   pg_stat_database/        <- destination table
//!     xact_commit.sql        <- column `xact_commit`
//!     blks_hit.sql
//!   pg_database_size/
//!     size_bytes.sql
//! ```
//!
//! A file may declare its storage type on the first line:
//!
//! ```sql
//! -- type: UInt64
//! SELECT xact_commit FROM pg_stat_database WHERE datname = $1
//! ```
//!
//! Without the header the column is stored as `String`.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use thiserror::Error;

use super::value::{StoredType, is_identifier, is_meta_column};

/// Extension of definition files.
pub const DEFINITION_EXTENSION: &str = "sql";

/// Header prefix declaring the storage type.
const TYPE_HEADER: &str = "-- type:";

/// Placeholder bound to the monitored database name.
const DBNAME_PLACEHOLDER: &str = "$1";

/// Errors raised while loading metric definitions.
#[derive(Debug, Error)]
pub enum DefinitionError {
    #[error("failed to read '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid identifier '{0}'")]
    InvalidName(String),

    #[error("metric '{0}' collides with a meta column")]
    MetaCollision(String),

    #[error("metric '{name}' declares unknown type '{type_name}'")]
    UnknownType { name: String, type_name: String },

    #[error("metric '{0}' has an empty query")]
    EmptyQuery(String),

    #[error("metric '{name}' defined twice in group '{table}'")]
    Duplicate { table: String, name: String },
}

/// One metric: a column name, the query producing it and its storage type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricDefinition {
    pub name: String,
    pub query: String,
    pub stored_type: StoredType,
}

impl MetricDefinition {
    /// Build a definition, validating its name.
    pub fn new(
        name: impl Into<String>,
        query: impl Into<String>,
        stored_type: StoredType,
    ) -> Result<Self, DefinitionError> {
        let name = name.into();
        let query = query.into();
        if !is_identifier(&name) {
            return Err(DefinitionError::InvalidName(name));
        }
        if is_meta_column(&name) {
            return Err(DefinitionError::MetaCollision(name));
        }
        if query.trim().is_empty() {
            return Err(DefinitionError::EmptyQuery(name));
        }
        Ok(Self {
            name,
            query,
            stored_type,
        })
    }

    /// Parse file contents, honouring an optional `-- type:` header.
    pub fn parse(name: impl Into<String>, contents: &str) -> Result<Self, DefinitionError> {
        let name = name.into();
        let first = contents.lines().next().unwrap_or_default().trim();

        let Some(declared) = first.strip_prefix(TYPE_HEADER) else {
            return Self::new(name, contents.trim(), StoredType::String);
        };

        let type_name = declared.trim();
        let stored_type =
            StoredType::from_str(type_name).map_err(|_| DefinitionError::UnknownType {
                name: name.clone(),
                type_name: type_name.to_owned(),
            })?;
        let body = contents.split_once('\n').map_or("", |(_, rest)| rest);
        Self::new(name, body.trim(), stored_type)
    }

    /// Built-in definition resolving the source-side database id.
    pub fn database_id() -> Self {
        Self {
            name: "dbid".to_owned(),
            query: "SELECT datid FROM pg_stat_database WHERE datname = $1".to_owned(),
            stored_type: StoredType::UInt32,
        }
    }

    /// Positional parameters for this query against `dbname`.
    pub fn parameters_for(&self, dbname: &str) -> Vec<String> {
        if self.query.contains(DBNAME_PLACEHOLDER) {
            vec![dbname.to_owned()]
        } else {
            Vec::new()
        }
    }
}

/// Definitions that land in the same table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricGroup {
    table: String,
    definitions: Vec<MetricDefinition>,
}

impl MetricGroup {
    /// Build a group; definitions are sorted by name.
    pub fn new(
        table: impl Into<String>,
        mut definitions: Vec<MetricDefinition>,
    ) -> Result<Self, DefinitionError> {
        let table = table.into();
        if !is_identifier(&table) {
            return Err(DefinitionError::InvalidName(table));
        }

        let mut seen = HashSet::new();
        for def in &definitions {
            if !seen.insert(def.name.as_str()) {
                return Err(DefinitionError::Duplicate {
                    table,
                    name: def.name.clone(),
                });
            }
        }

        definitions.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(Self { table, definitions })
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn definitions(&self) -> &[MetricDefinition] {
        &self.definitions
    }

    pub fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }

    /// Add a definition, keeping name order.
    pub fn push(&mut self, definition: MetricDefinition) -> Result<(), DefinitionError> {
        if self.definitions.iter().any(|d| d.name == definition.name) {
            return Err(DefinitionError::Duplicate {
                table: self.table.clone(),
                name: definition.name,
            });
        }
        let at = self
            .definitions
            .partition_point(|d| d.name < definition.name);
        self.definitions.insert(at, definition);
        Ok(())
    }

    /// Load every group under `root`, one per subdirectory, sorted by table.
    ///
    /// Subdirectories without `.sql` files are skipped.
    pub fn load_dir(root: impl AsRef<Path>) -> Result<Vec<MetricGroup>, DefinitionError> {
        let root = root.as_ref();
        let mut groups = Vec::new();

        for dir in sorted_entries(root)? {
            if !dir.is_dir() {
                continue;
            }
            let Some(table) = file_name(&dir) else {
                continue;
            };

            let mut definitions = Vec::new();
            for file in sorted_entries(&dir)? {
                if file.extension().and_then(|e| e.to_str()) != Some(DEFINITION_EXTENSION) {
                    continue;
                }
                let Some(name) = file.file_stem().and_then(|s| s.to_str()) else {
                    continue;
                };
                let contents = std::fs::read_to_string(&file).map_err(|source| {
                    DefinitionError::Io {
                        path: file.clone(),
                        source,
                    }
                })?;
                definitions.push(MetricDefinition::parse(name, &contents)?);
            }

            if definitions.is_empty() {
                tracing::debug!(dir = %dir.display(), "Skipping directory without definitions");
                continue;
            }

            let group = MetricGroup::new(table, definitions)?;
            tracing::debug!(table = %group.table, metrics = group.definitions.len(), "Loaded metric group");
            groups.push(group);
        }

        Ok(groups)
    }
}

fn sorted_entries(dir: &Path) -> Result<Vec<PathBuf>, DefinitionError> {
    let io_err = |source| DefinitionError::Io {
        path: dir.to_path_buf(),
        source,
    };
    let mut paths = std::fs::read_dir(dir)
        .map_err(io_err)?
        .map(|entry| entry.map(|e| e.path()))
        .collect::<Result<Vec<_>, _>>()
        .map_err(io_err)?;
    paths.sort();
    Ok(paths)
}

fn file_name(path: &Path) -> Option<String> {
    path.file_name()
        .and_then(|n| n.to_str())
        .map(str::to_owned)
}
