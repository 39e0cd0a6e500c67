//! Target table naming.
//!
//! Every phase (file pairing, DDL, existence probes, load) derives the
//! warehouse table name through [`target_table_name`], so the derivation
//! must stay pure.

use std::fmt;

use serde::Serialize;

use crate::sanitizer::quote_identifier;

/// Separator between the database prefix and the table name.
pub const TABLE_SEPARATOR: &str = "_TABLE_";

/// Suffix of the table rows are staged in before they reach the target.
pub const STAGE_SUFFIX: &str = "__SNOWLOAD_STAGE";

/// Warehouse table name derived as `{DATABASE}_TABLE_{TABLE}`, uppercased.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct TargetTableName(String);

impl TargetTableName {
    pub fn new(database: &str, table: &str) -> Self {
        Self(format!(
            "{}{}{}",
            database.to_uppercase(),
            TABLE_SEPARATOR,
            table.to_uppercase()
        ))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Quoted form used in every statement.
    ///
    /// The name is already uppercase, so the quoted form resolves to the
    /// same object as the bare one would.
    pub fn quoted(&self) -> String {
        quote_identifier(&self.0)
    }

    /// Quoted name of the staging table used while loading this target.
    pub fn stage_quoted(&self) -> String {
        quote_identifier(&format!("{}{}", self.0, STAGE_SUFFIX))
    }

    /// File name paired with this table in an export directory.
    pub fn file_name(&self, extension: &str) -> String {
        format!("{}.{}", self.0, extension)
    }
}

impl fmt::Display for TargetTableName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for TargetTableName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Derive the target table name for a (database, table) pair.
pub fn target_table_name(database: &str, table: &str) -> TargetTableName {
    TargetTableName::new(database, table)
}
