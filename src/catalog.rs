//! Source catalog.
//!
//! The export step leaves one subdirectory per source database under the
//! CSV directory, one `<table>.csv` per table inside it, and optionally a
//! `<TARGET>.sql` DDL file per table in the SQL directory:
//!
//! ```text
//! output_csv/
//!   school/
//!     order.csv
//!     student.csv
//! output_sql/
//!   SCHOOL_TABLE_ORDER.sql
//!   SCHOOL_TABLE_STUDENT.sql
//! ```
//!
//! Scanning only lists files. Column inspection and row reading happen per
//! table so one unreadable file never stops the others.

use std::fs::{self, File};
use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::ddl::TableElement;
use crate::ddl::parser::parse_create_table;
use crate::error::{LoadError, LoadResult};
use crate::naming::{TargetTableName, target_table_name};

/// Primitive type inferred from a column's values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceType {
    Text,
    Integer,
    Real,
    Blob,
    /// Every sampled value was empty.
    Null,
}

impl SourceType {
    /// Classify a single non-empty field.
    fn of_value(value: &str) -> Self {
        let value = value.trim();
        if value.parse::<i64>().is_ok() {
            Self::Integer
        } else if value.parse::<f64>().map(f64::is_finite).unwrap_or(false) {
            Self::Real
        } else {
            Self::Text
        }
    }

    /// Widen this type to also admit `value`.
    pub fn observe(self, value: &str) -> Self {
        if value.is_empty() {
            return self;
        }
        match (self, Self::of_value(value)) {
            (Self::Null, seen) => seen,
            (Self::Text, _) | (_, Self::Text) => Self::Text,
            (Self::Blob, _) => Self::Blob,
            (Self::Integer, Self::Integer) => Self::Integer,
            (Self::Integer | Self::Real, Self::Integer | Self::Real) => Self::Real,
            (current, _) => current,
        }
    }
}

/// One column of a source table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SourceColumn {
    pub name: String,
    pub source_type: SourceType,
    /// Type declared by the paired DDL file, when there is one.
    pub declared: Option<String>,
}

impl SourceColumn {
    pub fn new(name: impl Into<String>, source_type: SourceType) -> Self {
        Self {
            name: name.into(),
            source_type,
            declared: None,
        }
    }

    pub fn declared(mut self, declared: impl Into<String>) -> Self {
        self.declared = Some(declared.into());
        self
    }
}

/// How CSV files are read.
#[derive(Debug, Clone)]
pub struct ScanOptions {
    /// Whether the first CSV row holds column names.
    pub has_header: bool,
    /// Rows sampled for type inference.
    pub infer_rows: usize,
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self {
            has_header: true,
            infer_rows: 1000,
        }
    }
}

/// One table found in the export directory.
#[derive(Debug, Clone)]
pub struct SourceTable {
    pub database: String,
    pub name: String,
    pub csv_path: PathBuf,
    pub ddl_path: Option<PathBuf>,
}

impl SourceTable {
    pub fn target(&self) -> TargetTableName {
        target_table_name(&self.database, &self.name)
    }

    /// Inspect the CSV (and paired DDL file) for the ordered column list.
    pub fn describe(&self, options: &ScanOptions) -> LoadResult<Vec<SourceColumn>> {
        let mut reader = csv_reader(&self.csv_path, options.has_header)?;

        let mut names: Vec<String> = if options.has_header {
            reader.headers()?.iter().map(|h| h.trim().to_string()).collect()
        } else {
            Vec::new()
        };

        let mut types: Vec<SourceType> = vec![SourceType::Null; names.len()];
        for record in reader.records().take(options.infer_rows) {
            let record = record?;
            if names.is_empty() && !options.has_header {
                names = (1..=record.len()).map(|i| format!("C{i}")).collect();
                types = vec![SourceType::Null; names.len()];
            }
            for (ty, field) in types.iter_mut().zip(record.iter()) {
                *ty = ty.observe(field);
            }
        }

        let mut columns: Vec<SourceColumn> = names
            .into_iter()
            .zip(types)
            .map(|(name, ty)| SourceColumn::new(name, ty))
            .collect();

        if let Some(declared) = self.declared_types()? {
            if declared.len() == columns.len() {
                for (col, decl) in columns.iter_mut().zip(declared) {
                    col.declared = Some(decl);
                }
            } else {
                tracing::warn!(
                    table = %self.target(),
                    declared = declared.len(),
                    csv = columns.len(),
                    "paired DDL column count differs from CSV, ignoring declared types"
                );
            }
        }

        Ok(columns)
    }

    /// Declared column types from the paired DDL file, in order.
    fn declared_types(&self) -> LoadResult<Option<Vec<String>>> {
        let Some(sql) = self.exported_ddl()? else {
            return Ok(None);
        };
        match parse_create_table(&sql) {
            Ok(stmt) => Ok(Some(
                stmt.elements
                    .into_iter()
                    .filter_map(|e| match e {
                        TableElement::Column { data_type, .. } => Some(data_type),
                        TableElement::Constraint(_) => None,
                    })
                    .collect(),
            )),
            Err(e) => {
                tracing::warn!(table = %self.target(), error = %e, "unparsable paired DDL file");
                Ok(None)
            }
        }
    }

    /// Raw text of the paired DDL file, when one exists.
    pub fn exported_ddl(&self) -> LoadResult<Option<String>> {
        match &self.ddl_path {
            Some(path) => Ok(Some(fs::read_to_string(path)?)),
            None => Ok(None),
        }
    }

    /// Open the CSV for streaming data rows.
    pub fn rows(&self, options: &ScanOptions) -> LoadResult<RowReader> {
        let reader = csv_reader(&self.csv_path, options.has_header)?;
        Ok(RowReader {
            records: reader.into_records(),
        })
    }
}

/// One exported source database.
#[derive(Debug, Clone)]
pub struct SourceDatabase {
    pub name: String,
    pub path: PathBuf,
    pub tables: Vec<SourceTable>,
}

/// Streams positional CSV rows in batches.
pub struct RowReader {
    records: csv::StringRecordsIntoIter<File>,
}

impl RowReader {
    /// Read up to `max` rows. An empty batch means the file is exhausted.
    pub fn next_batch(&mut self, max: usize) -> LoadResult<Vec<Vec<String>>> {
        let mut batch = Vec::with_capacity(max.min(1024));
        for record in self.records.by_ref().take(max) {
            let record = record?;
            batch.push(record.iter().map(str::to_string).collect());
        }
        Ok(batch)
    }
}

fn csv_reader(path: &Path, has_header: bool) -> LoadResult<csv::Reader<File>> {
    Ok(csv::ReaderBuilder::new()
        .has_headers(has_header)
        .flexible(false)
        .from_path(path)?)
}

fn sorted_entries(dir: &Path) -> LoadResult<Vec<PathBuf>> {
    let mut entries: Vec<PathBuf> = fs::read_dir(dir)?
        .filter_map(|e| e.ok().map(|e| e.path()))
        .filter(|p| {
            p.file_name()
                .and_then(|n| n.to_str())
                .map(|n| !n.starts_with('.'))
                .unwrap_or(false)
        })
        .collect();
    entries.sort();
    Ok(entries)
}

/// DDL file for a table: `<TARGET>.sql`, else the exporter's
/// `<db>_<table>.sql`.
fn paired_ddl(sql_dir: &Path, database: &str, table: &str, target: &TargetTableName) -> Option<PathBuf> {
    let candidates = [
        sql_dir.join(target.file_name("sql")),
        sql_dir.join(format!("{}_{}.sql", database, table)),
    ];
    let found = candidates.into_iter().find(|p| p.is_file());
    if found.is_none() {
        tracing::debug!(table = %target, dir = %sql_dir.display(), "no DDL file");
    }
    found
}

/// Scan an export directory into databases and tables, in sorted order.
pub fn scan_export(csv_dir: &Path, sql_dir: Option<&Path>) -> LoadResult<Vec<SourceDatabase>> {
    if !csv_dir.is_dir() {
        return Err(LoadError::Source(format!(
            "CSV directory not found: {}",
            csv_dir.display()
        )));
    }

    let mut databases = Vec::new();
    for db_path in sorted_entries(csv_dir)?.into_iter().filter(|p| p.is_dir()) {
        let Some(db_name) = db_path.file_name().and_then(|n| n.to_str()).map(str::to_string)
        else {
            continue;
        };

        let mut tables = Vec::new();
        for file in sorted_entries(&db_path)? {
            if file.extension().and_then(|e| e.to_str()) != Some("csv") {
                continue;
            }
            let Some(table_name) = file.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            let target = target_table_name(&db_name, table_name);
            let ddl_path = sql_dir.and_then(|dir| paired_ddl(dir, &db_name, table_name, &target));

            tables.push(SourceTable {
                database: db_name.clone(),
                name: table_name.to_string(),
                csv_path: file,
                ddl_path,
            });
        }

        if tables.is_empty() {
            tracing::warn!(database = %db_name, "no CSV files found");
        }
        databases.push(SourceDatabase {
            name: db_name,
            path: db_path,
            tables,
        });
    }

    if databases.is_empty() {
        return Err(LoadError::Source(format!(
            "No database directories found in {}",
            csv_dir.display()
        )));
    }

    Ok(databases)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn write(path: &Path, content: &str) {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(path, content).unwrap();
    }

    #[test]
    fn test_type_widening() {
        let ty = SourceType::Null.observe("").observe("1").observe("2");
        assert_eq!(ty, SourceType::Integer);
        assert_eq!(ty.observe("2.5"), SourceType::Real);
        assert_eq!(ty.observe("2.5").observe("abc"), SourceType::Text);
        assert_eq!(SourceType::Null.observe(""), SourceType::Null);
        assert_eq!(SourceType::Real.observe("7"), SourceType::Real);
    }

    #[test]
    fn test_scan_is_sorted_and_pairs_ddl() {
        let dir = tempfile::tempdir().unwrap();
        let csv = dir.path().join("csv");
        let sql = dir.path().join("sql");
        write(&csv.join("shop/order.csv"), "id\n1\n");
        write(&csv.join("school/student.csv"), "id\n1\n");
        write(&csv.join("school/order.csv"), "id\n1\n");
        write(&csv.join("school/notes.txt"), "ignored");
        write(&csv.join(".hidden/x.csv"), "id\n");
        write(&sql.join("SCHOOL_TABLE_ORDER.sql"), "CREATE TABLE X (ID NUMBER)");

        let dbs = scan_export(&csv, Some(&sql)).unwrap();
        let names: Vec<_> = dbs.iter().map(|d| d.name.as_str()).collect();
        assert_eq!(names, ["school", "shop"]);

        let tables: Vec<_> = dbs[0].tables.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(tables, ["order", "student"]);
        assert!(dbs[0].tables[0].ddl_path.is_some());
        assert!(dbs[0].tables[1].ddl_path.is_none());
    }

    #[test]
    fn test_scan_pairs_exporter_file_names() {
        let dir = tempfile::tempdir().unwrap();
        let csv = dir.path().join("csv");
        let sql = dir.path().join("sql");
        write(&csv.join("school/order.csv"), "id,order date\n1,2024-01-05\n");
        write(&csv.join("school/student.csv"), "id\n1\n");
        write(
            &sql.join("school_order.sql"),
            "CREATE OR REPLACE TABLE SCHOOL_TABLE_ORDER (\n    id NUMBER,\n    order date VARCHAR()\n);",
        );

        let dbs = scan_export(&csv, Some(&sql)).unwrap();
        let order = &dbs[0].tables[0];
        assert_eq!(order.ddl_path.as_deref(), Some(sql.join("school_order.sql").as_path()));
        assert!(dbs[0].tables[1].ddl_path.is_none());

        let columns = order.describe(&ScanOptions::default()).unwrap();
        assert_eq!(columns[1].declared.as_deref(), Some("VARCHAR()"));
    }

    #[test]
    fn test_scan_missing_dir() {
        let err = scan_export(Path::new("/definitely/not/here"), None).unwrap_err();
        assert!(matches!(err, LoadError::Source(_)));
    }

    #[test]
    fn test_describe_infers_types_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("school/order.csv");
        write(&path, "id,order date,amount,note\n1,2024-01-01,3.5,\n2,2024-01-02,4,\n");

        let table = SourceTable {
            database: "school".into(),
            name: "order".into(),
            csv_path: path,
            ddl_path: None,
        };
        let cols = table.describe(&ScanOptions::default()).unwrap();
        let summary: Vec<_> = cols.iter().map(|c| (c.name.as_str(), c.source_type)).collect();
        assert_eq!(
            summary,
            [
                ("id", SourceType::Integer),
                ("order date", SourceType::Text),
                ("amount", SourceType::Real),
                ("note", SourceType::Null),
            ]
        );
    }

    #[test]
    fn test_describe_without_header_and_declared_types() {
        let dir = tempfile::tempdir().unwrap();
        let csv = dir.path().join("db/t.csv");
        let sql = dir.path().join("DB_TABLE_T.sql");
        write(&csv, "1,x\n2,y\n");
        write(&sql, "CREATE OR REPLACE TABLE DB_TABLE_T (\n    A NUMBER,\n    B VARCHAR\n);");

        let table = SourceTable {
            database: "db".into(),
            name: "t".into(),
            csv_path: csv,
            ddl_path: Some(sql),
        };
        let options = ScanOptions {
            has_header: false,
            ..ScanOptions::default()
        };
        let cols = table.describe(&options).unwrap();
        assert_eq!(cols[0].name, "C1");
        assert_eq!(cols[1].name, "C2");
        assert_eq!(cols[0].declared.as_deref(), Some("NUMBER"));
        assert_eq!(cols[1].declared.as_deref(), Some("VARCHAR"));

        let mut rows = table.rows(&options).unwrap();
        assert_eq!(rows.next_batch(10).unwrap().len(), 2);
        assert!(rows.next_batch(10).unwrap().is_empty());
    }

    #[test]
    fn test_row_batches() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("db/t.csv");
        write(&path, "a\n1\n2\n3\n");
        let table = SourceTable {
            database: "db".into(),
            name: "t".into(),
            csv_path: path,
            ddl_path: None,
        };
        let mut rows = table.rows(&ScanOptions::default()).unwrap();
        assert_eq!(rows.next_batch(2).unwrap(), vec![vec!["1"], vec!["2"]]);
        assert_eq!(rows.next_batch(2).unwrap(), vec![vec!["3"]]);
        assert!(rows.next_batch(2).unwrap().is_empty());
    }
}
