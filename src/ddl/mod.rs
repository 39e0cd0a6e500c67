//! CREATE TABLE generation.
//!
//! Statements are built as a [`CreateTable`] and rendered through one
//! function, so generated, parsed and repaired DDL all share a format:
//!
//! ```text
//! CREATE TABLE IF NOT EXISTS "SCHOOL_TABLE_ORDER" (
//!     "id" NUMBER(38,0),
//!     "order date" VARCHAR(16777216)
//! )
//! ```

pub mod overrides;
pub mod parser;
pub mod repair;
pub mod types;

use serde::Serialize;

use crate::catalog::SourceColumn;
use crate::error::{LoadError, LoadResult};
use crate::naming::{TargetTableName, target_table_name};
use crate::sanitizer::{needs_quoting, quote_identifier};

pub use overrides::{OverrideColumn, SchemaOverride, SchemaOverrides};
pub use types::{ColumnSpec, WarehouseType};

/// An identifier as written in a statement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identifier {
    pub name: String,
    pub quoted: bool,
}

impl Identifier {
    pub fn quoted(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            quoted: true,
        }
    }

    pub fn bare(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            quoted: false,
        }
    }

    pub fn render(&self) -> String {
        if self.quoted {
            quote_identifier(&self.name)
        } else {
            self.name.clone()
        }
    }

    /// Whether the rendered form is a valid identifier for this name.
    pub fn is_safe(&self) -> bool {
        self.quoted || !needs_quoting(&self.name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreateMode {
    IfNotExists,
    OrReplace,
    Plain,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TableElement {
    Column { name: Identifier, data_type: String },
    /// Out-of-line constraint, kept verbatim.
    Constraint(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateTable {
    pub mode: CreateMode,
    pub table: Identifier,
    pub elements: Vec<TableElement>,
}

impl CreateTable {
    pub fn to_sql(&self) -> String {
        let head = match self.mode {
            CreateMode::IfNotExists => "CREATE TABLE IF NOT EXISTS",
            CreateMode::OrReplace => "CREATE OR REPLACE TABLE",
            CreateMode::Plain => "CREATE TABLE",
        };
        let defs: Vec<String> = self
            .elements
            .iter()
            .map(|e| match e {
                TableElement::Column { name, data_type } => {
                    format!("    {} {}", name.render(), data_type)
                }
                TableElement::Constraint(c) => format!("    {}", c),
            })
            .collect();
        format!("{} {} (\n{}\n)", head, self.table.render(), defs.join(",\n"))
    }

    pub fn columns(&self) -> impl Iterator<Item = &Identifier> {
        self.elements.iter().filter_map(|e| match e {
            TableElement::Column { name, .. } => Some(name),
            TableElement::Constraint(_) => None,
        })
    }

    /// Raw names rendered bare although they need quoting.
    pub fn unsafe_identifiers(&self) -> Vec<String> {
        std::iter::once(&self.table)
            .chain(self.columns())
            .filter(|ident| !ident.is_safe())
            .map(|ident| ident.name.clone())
            .collect()
    }
}

/// Re-validate a statement: it must parse and every identifier that needs
/// quoting must be quoted.
pub fn validate_ddl(sql: &str) -> LoadResult<CreateTable> {
    let stmt = parser::parse_create_table(sql)?;
    let offenders = stmt.unsafe_identifiers();
    if !offenders.is_empty() {
        return Err(LoadError::IdentifierConflict {
            table: stmt.table.name.clone(),
            message: format!("unquoted identifiers: {}", offenders.join(", ")),
        });
    }
    Ok(stmt)
}

/// Render the CREATE statement for resolved columns.
pub fn render_create_table(target: &TargetTableName, columns: &[ColumnSpec]) -> LoadResult<String> {
    if columns.is_empty() {
        return Err(LoadError::SchemaGeneration {
            table: target.to_string(),
            message: "source table has no columns".to_string(),
        });
    }

    let stmt = CreateTable {
        mode: CreateMode::IfNotExists,
        table: Identifier::quoted(target.as_str()),
        elements: columns
            .iter()
            .map(|col| TableElement::Column {
                name: Identifier::quoted(col.name.as_str()),
                data_type: col.sql_type.clone(),
            })
            .collect(),
    };
    let sql = stmt.to_sql();
    validate_ddl(&sql)?;
    Ok(sql)
}

/// Generate the CREATE statement for inferred source columns.
pub fn generate_create_table_sql(
    target: &TargetTableName,
    columns: &[SourceColumn],
) -> LoadResult<String> {
    let (specs, warnings) = types::column_specs(columns);
    for warning in &warnings {
        tracing::warn!(table = %target, "{}", warning);
    }
    render_create_table(target, &specs)
}

/// Where a table's schema came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SchemaSource {
    Override,
    Inferred,
}

/// Everything the loader needs to create and fill one table.
#[derive(Debug, Clone, Serialize)]
pub struct TablePlan {
    pub target: TargetTableName,
    pub columns: Vec<ColumnSpec>,
    pub ddl: String,
    pub source: SchemaSource,
    pub warnings: Vec<String>,
}

/// DDL generator with its override table.
#[derive(Debug, Clone, Default)]
pub struct DdlGenerator {
    overrides: SchemaOverrides,
}

impl DdlGenerator {
    pub fn new(overrides: SchemaOverrides) -> Self {
        Self { overrides }
    }

    pub fn overrides(&self) -> &SchemaOverrides {
        &self.overrides
    }

    /// Plan a table. An override, when present, replaces inference.
    pub fn plan(&self, database: &str, table: &str, columns: &[SourceColumn]) -> LoadResult<TablePlan> {
        let target = target_table_name(database, table);

        let (specs, warnings, source) = match self.overrides.lookup(database, table) {
            Some(cols) => {
                tracing::debug!(table = %target, "using schema override");
                (overrides::override_specs(cols), Vec::new(), SchemaSource::Override)
            }
            None => {
                let (specs, warnings) = types::column_specs(columns);
                (specs, warnings, SchemaSource::Inferred)
            }
        };

        let ddl = render_create_table(&target, &specs)?;
        Ok(TablePlan {
            target,
            columns: specs,
            ddl,
            source,
            warnings,
        })
    }
}
