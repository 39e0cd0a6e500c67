//! Shared fixtures for the integration tests.

#![allow(dead_code)]

use std::cell::Cell;
use std::fs;
use std::path::{Path, PathBuf};

use snowload::catalog::{SourceDatabase, scan_export};
use snowload::error::WarehouseError;
use snowload::naming::TargetTableName;
use snowload::warehouse::{CellValue, InsertTarget, SqlxWarehouse, Warehouse};
use tempfile::TempDir;

/// An export directory laid out as `csv/<db>/<table>.csv` and `sql/<TARGET>.sql`.
pub struct Export {
    dir: TempDir,
}

impl Export {
    pub fn new() -> Self {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("csv")).unwrap();
        fs::create_dir_all(dir.path().join("sql")).unwrap();
        Self { dir }
    }

    pub fn csv_dir(&self) -> PathBuf {
        self.dir.path().join("csv")
    }

    pub fn sql_dir(&self) -> PathBuf {
        self.dir.path().join("sql")
    }

    pub fn table(self, database: &str, table: &str, content: &str) -> Self {
        let path = self.csv_dir().join(database).join(format!("{table}.csv"));
        write(&path, content);
        self
    }

    pub fn ddl(self, target: &str, sql: &str) -> Self {
        write(&self.sql_dir().join(format!("{target}.sql")), sql);
        self
    }

    pub fn scan(&self) -> Vec<SourceDatabase> {
        scan_export(&self.csv_dir(), Some(&self.sql_dir())).unwrap()
    }
}

fn write(path: &Path, content: &str) {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(path, content).unwrap();
}

pub async fn memory() -> SqlxWarehouse {
    SqlxWarehouse::connect("sqlite::memory:").await.unwrap()
}

pub async fn row_count(warehouse: &impl Warehouse, table: &str) -> u64 {
    warehouse
        .query_count(&format!("SELECT COUNT(*) FROM \"{table}\""))
        .await
        .unwrap()
}

/// Delegates to sqlite but drops the connection on loads into one table.
pub struct DropsOnLoad<'a> {
    pub inner: &'a SqlxWarehouse,
    pub table: &'a str,
}

impl Warehouse for DropsOnLoad<'_> {
    fn describe(&self) -> String {
        self.inner.describe()
    }

    async fn execute(&self, sql: &str) -> Result<u64, WarehouseError> {
        self.inner.execute(sql).await
    }

    async fn query_count(&self, sql: &str) -> Result<u64, WarehouseError> {
        self.inner.query_count(sql).await
    }

    async fn table_exists(&self, table: &TargetTableName) -> Result<bool, WarehouseError> {
        self.inner.table_exists(table).await
    }

    async fn bulk_load(&self, target: &InsertTarget, rows: &[Vec<CellValue>]) -> Result<u64, WarehouseError> {
        if target.table.contains(self.table) {
            return Err(WarehouseError::connectivity("connection reset by peer"));
        }
        self.inner.bulk_load(target, rows).await
    }
}

/// Delegates to sqlite but drops the connection on the `fail_at`-th batch
/// (1-based), after the earlier batches were written.
pub struct DropsMidLoad<'a> {
    pub inner: &'a SqlxWarehouse,
    pub fail_at: usize,
    pub batches: Cell<usize>,
}

impl<'a> DropsMidLoad<'a> {
    pub fn new(inner: &'a SqlxWarehouse, fail_at: usize) -> Self {
        Self {
            inner,
            fail_at,
            batches: Cell::new(0),
        }
    }
}

impl Warehouse for DropsMidLoad<'_> {
    fn describe(&self) -> String {
        self.inner.describe()
    }

    async fn execute(&self, sql: &str) -> Result<u64, WarehouseError> {
        self.inner.execute(sql).await
    }

    async fn query_count(&self, sql: &str) -> Result<u64, WarehouseError> {
        self.inner.query_count(sql).await
    }

    async fn table_exists(&self, table: &TargetTableName) -> Result<bool, WarehouseError> {
        self.inner.table_exists(table).await
    }

    async fn bulk_load(&self, target: &InsertTarget, rows: &[Vec<CellValue>]) -> Result<u64, WarehouseError> {
        self.batches.set(self.batches.get() + 1);
        if self.batches.get() == self.fail_at {
            return Err(WarehouseError::connectivity("connection reset by peer"));
        }
        self.inner.bulk_load(target, rows).await
    }
}
