//! # snowload
//!
//! Loads exported embedded databases into a cloud warehouse, once.
//!
//! Every source table becomes one warehouse table named
//! `{DATABASE}_TABLE_{TABLE}`. Runs are idempotent: a table that already
//! holds rows is skipped, so a failed run can simply be repeated.
//!
//! ## Quick Example
//!
//! ```rust,ignore
//! use snowload::prelude::*;
//!
//! let config = LoaderConfig::load(None)?;
//! let warehouse = WarehouseClient::connect(&config.warehouse).await?;
//! let databases = scan_export(&config.loader.csv_dir, Some(&config.loader.sql_dir))?;
//!
//! let orchestrator = LoadOrchestrator::new(
//!     &warehouse,
//!     DdlGenerator::new(config.schema_overrides()),
//!     ErrorPatterns::with_rules(&config.error_patterns),
//!     LoadOptions::from_settings(&config.loader),
//! );
//! let stats = orchestrator.run(&databases, &mut ()).await;
//! std::process::exit(stats.exit_code());
//! ```
//!
//! ## Pipeline
//!
//! | Step      | Module          | Does                                  |
//! |-----------|-----------------|---------------------------------------|
//! | Scan      | [`catalog`]     | Lists databases, tables, CSV rows     |
//! | Probe     | [`existence`]   | Absent / empty / holds rows           |
//! | Generate  | [`ddl`]         | Quoted `CREATE TABLE IF NOT EXISTS`   |
//! | Create    | [`creator`]     | Retries with repaired DDL             |
//! | Load      | [`orchestrator`]| Batched inserts, run statistics       |

pub mod catalog;
pub mod config;
pub mod creator;
pub mod ddl;
pub mod error;
pub mod existence;
pub mod naming;
pub mod orchestrator;
pub mod report;
pub mod sanitizer;
pub mod warehouse;

pub mod prelude {
    pub use crate::catalog::{ScanOptions, SourceColumn, SourceDatabase, SourceTable, SourceType, scan_export};
    pub use crate::config::{LoaderConfig, WarehouseConfig};
    pub use crate::creator::{CreateResult, ErrorClass, ErrorPatterns, PatternRule, TableCreator};
    pub use crate::ddl::{DdlGenerator, SchemaOverrides, generate_create_table_sql, validate_ddl};
    pub use crate::error::*;
    pub use crate::existence::{TableState, table_exists_and_has_data};
    pub use crate::naming::{TargetTableName, target_table_name};
    pub use crate::orchestrator::{LoadOptions, LoadOrchestrator, LoadOutcome, RunObserver, RunStatistics};
    pub use crate::sanitizer::{QuotePolicy, quote_identifier, sanitize_identifier};
    pub use crate::warehouse::{SqlxWarehouse, Warehouse, WarehouseClient};
}

/// Generate the CREATE statement for a source table.
///
/// # Example
///
/// ```
/// use snowload::catalog::{SourceColumn, SourceType};
///
/// let sql = snowload::generate("school", "order", &[
///     SourceColumn::new("order date", SourceType::Text),
/// ]).unwrap();
/// assert!(sql.starts_with("CREATE TABLE IF NOT EXISTS \"SCHOOL_TABLE_ORDER\""));
/// assert!(sql.contains("\"order date\" VARCHAR(16777216)"));
/// ```
pub fn generate(
    database: &str,
    table: &str,
    columns: &[catalog::SourceColumn],
) -> error::LoadResult<String> {
    ddl::generate_create_table_sql(&naming::target_table_name(database, table), columns)
}
