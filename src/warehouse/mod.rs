//! Warehouse connections.
//!
//! The loader talks to the warehouse only through [`Warehouse`]. Two
//! backends implement it:
//!
//! - [`SnowflakeWarehouse`]: the Snowflake SQL API over HTTPS
//! - [`SqlxWarehouse`]: any sqlx URL (`postgres://`, `sqlite::memory:`),
//!   used for local staging runs and tests

pub mod pool;
pub mod snowflake;

use crate::catalog::SourceType;
use crate::config::WarehouseConfig;
use crate::ddl::CreateTable;
use crate::error::{LoadResult, WarehouseError};
use crate::naming::TargetTableName;
use crate::sanitizer::quote_identifier;

pub use pool::SqlxWarehouse;
pub use snowflake::SnowflakeWarehouse;

/// Upper bound on bound parameters in one INSERT.
pub const MAX_BIND_PARAMS: usize = 16_384;

/// A single value bound into an INSERT.
#[derive(Debug, Clone, PartialEq)]
pub enum CellValue {
    Null,
    Int(i64),
    Float(f64),
    Text(String),
}

impl CellValue {
    /// Convert a CSV field for a column loaded as `load_type`.
    ///
    /// Empty fields become NULL for every non-text column. Values that do
    /// not parse are passed through as text and left to the warehouse.
    pub fn from_field(field: &str, load_type: SourceType) -> Self {
        match load_type {
            SourceType::Text => Self::Text(field.to_string()),
            _ if field.is_empty() => Self::Null,
            SourceType::Integer => match field.trim().parse::<i64>() {
                Ok(v) => Self::Int(v),
                // Integral floats ("3.0") come out of the export step.
                Err(_) => match field.trim().parse::<f64>() {
                    Ok(v) if v.fract() == 0.0 && v.abs() < 9.0e15 => Self::Int(v as i64),
                    _ => Self::Text(field.to_string()),
                },
            },
            SourceType::Real => field
                .trim()
                .parse::<f64>()
                .map(Self::Float)
                .unwrap_or_else(|_| Self::Text(field.to_string())),
            SourceType::Blob | SourceType::Null => Self::Text(field.to_string()),
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }
}

impl From<i64> for CellValue {
    fn from(v: i64) -> Self {
        CellValue::Int(v)
    }
}

impl From<f64> for CellValue {
    fn from(v: f64) -> Self {
        CellValue::Float(v)
    }
}

impl From<&str> for CellValue {
    fn from(v: &str) -> Self {
        CellValue::Text(v.to_string())
    }
}

impl From<String> for CellValue {
    fn from(v: String) -> Self {
        CellValue::Text(v)
    }
}

/// Table and column identifiers exactly as an INSERT should spell them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InsertTarget {
    pub table: String,
    pub columns: Vec<String>,
}

impl InsertTarget {
    /// Quote every name.
    pub fn quoted(table: &TargetTableName, columns: &[String]) -> Self {
        Self {
            table: table.quoted(),
            columns: columns.iter().map(|c| quote_identifier(c)).collect(),
        }
    }

    /// Spell names the way a CREATE statement did, so bare names fold the
    /// same way on insert as they did on create.
    pub fn from_create_table(stmt: &CreateTable) -> Self {
        Self {
            table: stmt.table.render(),
            columns: stmt.columns().map(|c| c.render()).collect(),
        }
    }

    /// Rows that fit in one statement under [`MAX_BIND_PARAMS`].
    pub fn rows_per_statement(&self) -> usize {
        (MAX_BIND_PARAMS / self.columns.len().max(1)).max(1)
    }
}

/// Placeholder style of a backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Placeholder {
    /// `?`
    Question,
    /// `$1`, `$2`, ...
    Dollar,
}

impl Placeholder {
    fn render(self, index: usize) -> String {
        match self {
            Placeholder::Question => "?".to_string(),
            Placeholder::Dollar => format!("${}", index),
        }
    }
}

/// Build a multi-row INSERT with one placeholder per cell.
pub fn build_insert_sql(target: &InsertTarget, rows: usize, placeholder: Placeholder) -> String {
    let width = target.columns.len();
    let tuples: Vec<String> = (0..rows)
        .map(|r| {
            let params: Vec<String> = (0..width)
                .map(|c| placeholder.render(r * width + c + 1))
                .collect();
            format!("({})", params.join(", "))
        })
        .collect();
    format!(
        "INSERT INTO {} ({}) VALUES {}",
        target.table,
        target.columns.join(", "),
        tuples.join(", ")
    )
}

/// Operations the loader needs from a warehouse.
///
/// Errors carry the warehouse's message verbatim and say whether the
/// failure was connectivity or a rejected statement.
#[allow(async_fn_in_trait)]
pub trait Warehouse {
    /// Short description for logs, without credentials.
    fn describe(&self) -> String;

    /// Execute a statement, returning affected rows where reported.
    async fn execute(&self, sql: &str) -> Result<u64, WarehouseError>;

    /// Run a query returning a single count.
    async fn query_count(&self, sql: &str) -> Result<u64, WarehouseError>;

    /// Whether a table with this exact name exists in the current schema.
    async fn table_exists(&self, table: &TargetTableName) -> Result<bool, WarehouseError>;

    /// Insert rows, returning how many were written.
    async fn bulk_load(&self, target: &InsertTarget, rows: &[Vec<CellValue>]) -> Result<u64, WarehouseError>;

    async fn close(&self) {}
}

/// A connected backend chosen from configuration.
pub enum WarehouseClient {
    Sqlx(SqlxWarehouse),
    Snowflake(SnowflakeWarehouse),
}

impl WarehouseClient {
    /// Connect using `url` when set, otherwise the Snowflake account settings.
    pub async fn connect(config: &WarehouseConfig) -> LoadResult<Self> {
        match &config.url {
            Some(url) => Ok(Self::Sqlx(SqlxWarehouse::connect(url).await?)),
            None => Ok(Self::Snowflake(SnowflakeWarehouse::from_config(config)?)),
        }
    }
}

impl Warehouse for WarehouseClient {
    fn describe(&self) -> String {
        match self {
            Self::Sqlx(w) => w.describe(),
            Self::Snowflake(w) => w.describe(),
        }
    }

    async fn execute(&self, sql: &str) -> Result<u64, WarehouseError> {
        match self {
            Self::Sqlx(w) => w.execute(sql).await,
            Self::Snowflake(w) => w.execute(sql).await,
        }
    }

    async fn query_count(&self, sql: &str) -> Result<u64, WarehouseError> {
        match self {
            Self::Sqlx(w) => w.query_count(sql).await,
            Self::Snowflake(w) => w.query_count(sql).await,
        }
    }

    async fn table_exists(&self, table: &TargetTableName) -> Result<bool, WarehouseError> {
        match self {
            Self::Sqlx(w) => w.table_exists(table).await,
            Self::Snowflake(w) => w.table_exists(table).await,
        }
    }

    async fn bulk_load(&self, target: &InsertTarget, rows: &[Vec<CellValue>]) -> Result<u64, WarehouseError> {
        match self {
            Self::Sqlx(w) => w.bulk_load(target, rows).await,
            Self::Snowflake(w) => w.bulk_load(target, rows).await,
        }
    }

    async fn close(&self) {
        match self {
            Self::Sqlx(w) => w.close().await,
            Self::Snowflake(w) => w.close().await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ddl::parser::parse_create_table;
    use crate::naming::target_table_name;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_empty_fields_become_null_for_numeric_columns() {
        assert_eq!(CellValue::from_field("", SourceType::Integer), CellValue::Null);
        assert_eq!(CellValue::from_field("", SourceType::Real), CellValue::Null);
        assert_eq!(CellValue::from_field("", SourceType::Text), CellValue::Text(String::new()));
    }

    #[test]
    fn test_field_conversion() {
        assert_eq!(CellValue::from_field("42", SourceType::Integer), CellValue::Int(42));
        assert_eq!(CellValue::from_field("3.0", SourceType::Integer), CellValue::Int(3));
        assert_eq!(CellValue::from_field("2.5", SourceType::Real), CellValue::Float(2.5));
        assert_eq!(CellValue::from_field("n/a", SourceType::Integer), "n/a".into());
    }

    #[test]
    fn test_insert_sql_placeholders() {
        let target = InsertTarget::quoted(
            &target_table_name("school", "order"),
            &["id".to_string(), "order date".to_string()],
        );
        assert_eq!(
            build_insert_sql(&target, 2, Placeholder::Question),
            "INSERT INTO \"SCHOOL_TABLE_ORDER\" (\"id\", \"order date\") VALUES (?, ?), (?, ?)"
        );
        assert_eq!(
            build_insert_sql(&target, 2, Placeholder::Dollar),
            "INSERT INTO \"SCHOOL_TABLE_ORDER\" (\"id\", \"order date\") VALUES ($1, $2), ($3, $4)"
        );
    }

    #[test]
    fn test_insert_target_follows_create_spelling() {
        let stmt = parse_create_table("CREATE TABLE T (\n    ID NUMBER,\n    \"order date\" TEXT\n)").unwrap();
        let target = InsertTarget::from_create_table(&stmt);
        assert_eq!(target.table, "T");
        assert_eq!(target.columns, ["ID", "\"order date\""]);
    }

    #[test]
    fn test_rows_per_statement() {
        let target = InsertTarget::quoted(&target_table_name("d", "t"), &vec!["c".to_string(); 4]);
        assert_eq!(target.rows_per_statement(), MAX_BIND_PARAMS / 4);
    }
}
