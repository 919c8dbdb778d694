//! Storage sink: buffered batch insert with dynamic table creation.
//!
//! Grounded in `storage/storage.go` (the `DataCell`/`Storage` contract) and
//! `storage/sqlstorage/sqlstorage.go` (`SqlStorage::Save`/`Flush`). Targets
//! MySQL because the source's reference column types (`MEDIUMTEXT`,
//! `VARCHAR(255)`) are MySQL conventions.

use std::collections::HashSet;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Local;
use serde_json::Value;

use crate::error::StorageError;
use crate::registry::TaskRegistry;

/// A single extraction record: task, rule, URL, timestamp, and payload.
#[derive(Debug, Clone)]
pub struct DataCell {
    pub task: String,
    pub rule: String,
    pub url: String,
    pub time: String,
    pub data: Vec<(String, Value)>,
}

impl DataCell {
    pub fn new(task: impl Into<String>, rule: impl Into<String>, url: impl Into<String>, data: Vec<(String, Value)>) -> Self {
        Self {
            task: task.into(),
            rule: rule.into(),
            url: url.into(),
            time: Local::now().format("%Y-%m-%d %H:%M:%S").to_string(),
            data,
        }
    }
}

/// Contract every storage backend must satisfy.
#[async_trait]
pub trait Storage: Send + Sync {
    async fn save(&self, cells: &[DataCell]) -> Result<(), StorageError>;
}

/// Serialize a field value to the text form stored in a `MEDIUMTEXT` column:
/// strings pass through unchanged, everything else (including `null`)
/// becomes its canonical JSON text, and `null`/missing becomes `""` to match
/// the source's `switch v.(type) { case nil: ... }` behavior.
fn field_text(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(other) => serde_json::to_string(other).unwrap_or_default(),
    }
}

#[cfg(feature = "storage")]
mod mysql_backend {
    use super::*;
    use sqlx::MySqlPool;

    /// Buffered, batching MySQL-backed `Storage`.
    pub struct SqlStorage {
        pool: MySqlPool,
        registry: TaskRegistry,
        batch_count: usize,
        known_tables: Mutex<HashSet<String>>,
        data_docker: Mutex<Vec<DataCell>>,
    }

    impl SqlStorage {
        pub fn new(pool: MySqlPool, registry: TaskRegistry, batch_count: usize) -> Self {
            Self {
                pool,
                registry,
                batch_count,
                known_tables: Mutex::new(HashSet::new()),
                data_docker: Mutex::new(Vec::new()),
            }
        }

        async fn ensure_table(&self, table: &str, fields: &[String]) -> Result<(), StorageError> {
            let already_known = self.known_tables.lock().unwrap().contains(table);
            if already_known {
                return Ok(());
            }
            let mut columns = fields
                .iter()
                .map(|f| format!("`{f}` MEDIUMTEXT"))
                .collect::<Vec<_>>();
            columns.push("`Url` VARCHAR(255)".to_string());
            columns.push("`Time` VARCHAR(255)".to_string());
            let ddl = format!(
                "CREATE TABLE IF NOT EXISTS `{table}` (id BIGINT UNSIGNED AUTO_INCREMENT PRIMARY KEY, {})",
                columns.join(", ")
            );
            sqlx::query(&ddl).execute(&self.pool).await?;
            self.known_tables.lock().unwrap().insert(table.to_string());
            Ok(())
        }

        /// Flush every buffered cell, grouped by table, then clear the
        /// buffer. The source's `Flush` never clears `dataDocker` after a
        /// successful flush — a documented bug this crate fixes (see
        /// DESIGN.md / SPEC_FULL.md §9).
        pub async fn flush(&self) -> Result<(), StorageError> {
            let cells = std::mem::take(&mut *self.data_docker.lock().unwrap());
            if cells.is_empty() {
                return Ok(());
            }

            let mut by_table: std::collections::BTreeMap<String, Vec<&DataCell>> =
                std::collections::BTreeMap::new();
            for cell in &cells {
                by_table.entry(cell.task.clone()).or_default().push(cell);
            }

            for (table, group) in by_table {
                let fields = self
                    .registry
                    .fields(&table, &group[0].rule)
                    .ok_or_else(|| StorageError::UnknownFields(table.clone(), group[0].rule.clone()))?;
                self.ensure_table(&table, &fields).await?;

                let mut column_list = fields
                    .iter()
                    .map(|f| format!("`{f}`"))
                    .collect::<Vec<_>>();
                column_list.push("`Url`".to_string());
                column_list.push("`Time`".to_string());

                for cell in group {
                    let data: std::collections::HashMap<_, _> = cell.data.iter().cloned().collect();
                    let mut query = sqlx::QueryBuilder::new(format!(
                        "INSERT INTO `{table}` ({}) VALUES (",
                        column_list.join(", ")
                    ));
                    let mut separated = query.separated(", ");
                    for field in &fields {
                        separated.push_bind(field_text(data.get(field)));
                    }
                    separated.push_bind(cell.url.clone());
                    separated.push_bind(cell.time.clone());
                    query.push(")");
                    query.build().execute(&self.pool).await?;
                }
            }
            Ok(())
        }
    }

    #[async_trait]
    impl Storage for SqlStorage {
        async fn save(&self, cells: &[DataCell]) -> Result<(), StorageError> {
            {
                let mut docker = self.data_docker.lock().unwrap();
                docker.extend_from_slice(cells);
            }
            let should_flush = self.data_docker.lock().unwrap().len() >= self.batch_count;
            if should_flush {
                self.flush().await?;
            }
            Ok(())
        }
    }
}

#[cfg(feature = "storage")]
pub use mysql_backend::SqlStorage;

/// In-memory `Storage` used by tests and demos: appends every cell to a
/// shared buffer instead of hitting a database.
#[derive(Default)]
pub struct MemoryStorage {
    cells: Mutex<Vec<DataCell>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cells(&self) -> Vec<DataCell> {
        self.cells.lock().unwrap().clone()
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn save(&self, cells: &[DataCell]) -> Result<(), StorageError> {
        self.cells.lock().unwrap().extend_from_slice(cells);
        Ok(())
    }
}
