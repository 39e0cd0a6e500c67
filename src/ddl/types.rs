//! Source to warehouse type mapping.

use serde::Serialize;

use crate::catalog::{SourceColumn, SourceType};

/// Width used for text columns and for repaired `VARCHAR()` declarations.
pub const VARCHAR_MAX: u32 = 16_777_216;

/// Warehouse column types the generator emits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum WarehouseType {
    Varchar,
    Number,
    Float,
    Binary,
    Boolean,
    TimestampNtz,
}

impl WarehouseType {
    pub fn to_sql(self) -> String {
        match self {
            Self::Varchar => format!("VARCHAR({})", VARCHAR_MAX),
            Self::Number => "NUMBER(38,0)".to_string(),
            Self::Float => "FLOAT".to_string(),
            Self::Binary => "BINARY".to_string(),
            Self::Boolean => "BOOLEAN".to_string(),
            Self::TimestampNtz => "TIMESTAMP_NTZ".to_string(),
        }
    }

    /// How CSV fields are converted before binding into this column.
    ///
    /// Dates and booleans travel as text and are cast by the warehouse.
    pub fn load_type(self) -> SourceType {
        match self {
            Self::Number => SourceType::Integer,
            Self::Float => SourceType::Real,
            Self::Binary => SourceType::Blob,
            Self::Varchar | Self::Boolean | Self::TimestampNtz => SourceType::Text,
        }
    }
}

/// A mapping decision. `fallback` is set when the text type was chosen
/// because nothing better could be determined.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TypeMapping {
    pub warehouse: WarehouseType,
    pub fallback: bool,
}

impl TypeMapping {
    fn exact(warehouse: WarehouseType) -> Self {
        Self {
            warehouse,
            fallback: false,
        }
    }

    fn fallback() -> Self {
        Self {
            warehouse: WarehouseType::Varchar,
            fallback: true,
        }
    }
}

pub fn map_source_type(source: SourceType) -> TypeMapping {
    match source {
        SourceType::Text => TypeMapping::exact(WarehouseType::Varchar),
        SourceType::Integer => TypeMapping::exact(WarehouseType::Number),
        SourceType::Real => TypeMapping::exact(WarehouseType::Float),
        SourceType::Blob => TypeMapping::exact(WarehouseType::Binary),
        SourceType::Null => TypeMapping::fallback(),
    }
}

/// Map a declared source type by affinity, the way the embedded engine
/// resolves it. Unknown declarations fall back to text.
pub fn map_declared_type(declared: &str) -> TypeMapping {
    let upper = declared.trim().to_ascii_uppercase();
    let base = upper.split('(').next().unwrap_or_default().trim();

    if upper.contains("INT") {
        return TypeMapping::exact(WarehouseType::Number);
    }
    if upper.contains("CHAR") || upper.contains("CLOB") || upper.contains("TEXT") || base == "STRING" {
        return TypeMapping::exact(WarehouseType::Varchar);
    }
    if upper.contains("BLOB") || upper.contains("BINARY") {
        return TypeMapping::exact(WarehouseType::Binary);
    }
    if upper.contains("BOOL") {
        return TypeMapping::exact(WarehouseType::Boolean);
    }
    if upper.contains("DATE") || upper.contains("TIME") {
        return TypeMapping::exact(WarehouseType::TimestampNtz);
    }
    if upper.contains("REAL") || upper.contains("FLOA") || upper.contains("DOUB") {
        return TypeMapping::exact(WarehouseType::Float);
    }
    match base {
        "NUMBER" if declared_scale(&upper).unwrap_or(0) == 0 => {
            TypeMapping::exact(WarehouseType::Number)
        }
        "NUMERIC" | "DECIMAL" if declared_scale(&upper) == Some(0) => {
            TypeMapping::exact(WarehouseType::Number)
        }
        "NUMBER" | "NUMERIC" | "DECIMAL" => TypeMapping::exact(WarehouseType::Float),
        _ => TypeMapping::fallback(),
    }
}

/// Scale of a `NAME(p, s)` declaration, if present.
fn declared_scale(upper: &str) -> Option<u32> {
    let args = upper.split_once('(')?.1.split_once(')')?.0;
    args.split(',').nth(1)?.trim().parse().ok()
}

/// Resolved column for DDL and load.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ColumnSpec {
    pub name: String,
    pub sql_type: String,
    pub load_type: SourceType,
}

/// Resolve every source column, collecting fallback warnings.
pub fn column_specs(columns: &[SourceColumn]) -> (Vec<ColumnSpec>, Vec<String>) {
    let mut warnings = Vec::new();
    let specs = columns
        .iter()
        .map(|col| {
            let mapping = resolve_column(col, &mut warnings);
            ColumnSpec {
                name: col.name.clone(),
                sql_type: mapping.warehouse.to_sql(),
                load_type: mapping.warehouse.load_type(),
            }
        })
        .collect();
    (specs, warnings)
}

fn resolve_column(col: &SourceColumn, warnings: &mut Vec<String>) -> TypeMapping {
    let Some(declared) = col.declared.as_deref() else {
        let mapping = map_source_type(col.source_type);
        if mapping.fallback {
            warnings.push(format!("column {}: no values to infer from, using text", col.name));
        }
        return mapping;
    };

    let mapping = map_declared_type(declared);
    if mapping.fallback {
        warnings.push(format!("column {}: unknown type {}, using text", col.name, declared));
        return mapping;
    }

    // Dynamic typing lets a declared numeric column hold text values.
    let numeric = matches!(mapping.warehouse, WarehouseType::Number | WarehouseType::Float);
    if numeric && col.source_type == SourceType::Text {
        warnings.push(format!(
            "column {}: declared {} but holds mixed values, using text",
            col.name, declared
        ));
        return TypeMapping::fallback();
    }
    if mapping.warehouse == WarehouseType::Number && col.source_type == SourceType::Real {
        return TypeMapping::exact(WarehouseType::Float);
    }
    mapping
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_source_type_mapping() {
        assert_eq!(map_source_type(SourceType::Integer).warehouse, WarehouseType::Number);
        assert_eq!(map_source_type(SourceType::Real).warehouse, WarehouseType::Float);
        assert_eq!(map_source_type(SourceType::Text).warehouse, WarehouseType::Varchar);
        assert_eq!(map_source_type(SourceType::Blob).warehouse, WarehouseType::Binary);
        assert!(map_source_type(SourceType::Null).fallback);
    }

    #[test]
    fn test_declared_affinity() {
        let cases = [
            ("INTEGER", WarehouseType::Number),
            ("bigint", WarehouseType::Number),
            ("VARCHAR(255)", WarehouseType::Varchar),
            ("TEXT", WarehouseType::Varchar),
            ("REAL", WarehouseType::Float),
            ("DOUBLE PRECISION", WarehouseType::Float),
            ("NUMERIC", WarehouseType::Float),
            ("DECIMAL(10,2)", WarehouseType::Float),
            ("NUMBER", WarehouseType::Number),
            ("NUMBER(38,0)", WarehouseType::Number),
            ("DATE", WarehouseType::TimestampNtz),
            ("DATETIME", WarehouseType::TimestampNtz),
            ("BOOLEAN", WarehouseType::Boolean),
            ("BLOB", WarehouseType::Binary),
        ];
        for (declared, expected) in cases {
            assert_eq!(map_declared_type(declared).warehouse, expected, "{declared}");
        }
        assert!(map_declared_type("GEOMETRY").fallback);
    }

    #[test]
    fn test_column_specs_fall_back_to_text() {
        let columns = vec![
            SourceColumn::new("id", SourceType::Integer),
            SourceColumn::new("empty", SourceType::Null),
            SourceColumn::new("code", SourceType::Text).declared("INTEGER"),
        ];
        let (specs, warnings) = column_specs(&columns);
        assert_eq!(specs[0].sql_type, "NUMBER(38,0)");
        assert_eq!(specs[1].sql_type, "VARCHAR(16777216)");
        assert_eq!(specs[2].sql_type, "VARCHAR(16777216)");
        assert_eq!(specs[2].load_type, SourceType::Text);
        assert_eq!(warnings.len(), 2);
    }

    #[test]
    fn test_declared_integer_with_real_values_widens() {
        let columns = vec![SourceColumn::new("amount", SourceType::Real).declared("INT")];
        let (specs, _) = column_specs(&columns);
        assert_eq!(specs[0].sql_type, "FLOAT");
        assert_eq!(specs[0].load_type, SourceType::Real);
    }
}
