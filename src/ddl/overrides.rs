//! Hand-authored schemas for tables whose inferred schema is known wrong.

use std::collections::HashMap;

use serde::Deserialize;

use super::types::{ColumnSpec, map_declared_type};

/// One column of an override, with its warehouse type written verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct OverrideColumn {
    pub name: String,
    #[serde(rename = "type")]
    pub sql_type: String,
}

impl OverrideColumn {
    pub fn new(name: impl Into<String>, sql_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            sql_type: sql_type.into(),
        }
    }
}

/// An override entry as written in the config file:
///
/// ```toml
/// [[overrides]]
/// database = "financial"
/// table = "order"
/// columns = [
///     { name = "ORDER_ID", type = "NUMBER" },
///     { name = "AMOUNT", type = "FLOAT" },
/// ]
/// ```
#[derive(Debug, Clone, Deserialize)]
pub struct SchemaOverride {
    pub database: String,
    pub table: String,
    pub columns: Vec<OverrideColumn>,
}

/// Override table keyed by lowercased (database, table).
#[derive(Debug, Clone, Default)]
pub struct SchemaOverrides {
    entries: HashMap<(String, String), Vec<OverrideColumn>>,
}

impl SchemaOverrides {
    pub fn new() -> Self {
        Self::default()
    }

    /// Overrides shipped with the loader.
    pub fn builtin() -> Self {
        let mut overrides = Self::new();
        overrides.insert(
            "financial",
            "order",
            vec![
                OverrideColumn::new("ORDER_ID", "NUMBER"),
                OverrideColumn::new("ACCOUNT_ID", "NUMBER"),
                OverrideColumn::new("BANK_TO", "VARCHAR"),
                OverrideColumn::new("ACCOUNT_TO", "VARCHAR"),
                OverrideColumn::new("AMOUNT", "FLOAT"),
                OverrideColumn::new("K_SYMBOL", "VARCHAR"),
            ],
        );
        overrides
    }

    /// Add or replace an entry. Later entries win.
    pub fn insert(&mut self, database: &str, table: &str, columns: Vec<OverrideColumn>) {
        self.entries
            .insert((database.to_lowercase(), table.to_lowercase()), columns);
    }

    pub fn extend(&mut self, entries: impl IntoIterator<Item = SchemaOverride>) {
        for entry in entries {
            self.insert(&entry.database, &entry.table, entry.columns);
        }
    }

    pub fn lookup(&self, database: &str, table: &str) -> Option<&[OverrideColumn]> {
        self.entries
            .get(&(database.to_lowercase(), table.to_lowercase()))
            .map(Vec::as_slice)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Column specs for an override. Load conversion follows type affinity.
pub fn override_specs(columns: &[OverrideColumn]) -> Vec<ColumnSpec> {
    columns
        .iter()
        .map(|col| ColumnSpec {
            name: col.name.clone(),
            sql_type: col.sql_type.clone(),
            load_type: map_declared_type(&col.sql_type).warehouse.load_type(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::SourceType;

    #[test]
    fn test_builtin_financial_order() {
        let overrides = SchemaOverrides::builtin();
        let cols = overrides.lookup("FINANCIAL", "Order").unwrap();
        let names: Vec<_> = cols.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(
            names,
            ["ORDER_ID", "ACCOUNT_ID", "BANK_TO", "ACCOUNT_TO", "AMOUNT", "K_SYMBOL"]
        );
        assert!(overrides.lookup("financial", "loan").is_none());
    }

    #[test]
    fn test_extend_replaces_builtin() {
        let mut overrides = SchemaOverrides::builtin();
        overrides.extend([SchemaOverride {
            database: "financial".into(),
            table: "order".into(),
            columns: vec![OverrideColumn::new("X", "TEXT")],
        }]);
        assert_eq!(overrides.len(), 1);
        assert_eq!(overrides.lookup("financial", "order").unwrap().len(), 1);
    }

    #[test]
    fn test_override_load_types() {
        let specs = override_specs(&[
            OverrideColumn::new("ORDER_ID", "NUMBER"),
            OverrideColumn::new("AMOUNT", "FLOAT"),
            OverrideColumn::new("K_SYMBOL", "VARCHAR"),
        ]);
        let load: Vec<_> = specs.iter().map(|s| s.load_type).collect();
        assert_eq!(load, [SourceType::Integer, SourceType::Real, SourceType::Text]);
        assert_eq!(specs[0].sql_type, "NUMBER");
    }
}
