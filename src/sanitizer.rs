//! Identifier sanitizing for the warehouse dialect.
//!
//! Quoted identifiers are case- and space-sensitive in the target dialect,
//! so quoting always preserves the raw name verbatim. Every function here is
//! pure: the same input always produces byte-identical output.

/// Reserved words that cannot appear as bare identifiers.
///
/// The warehouse's reserved list plus the words our source exports are
/// known to collide with.
pub const RESERVED_KEYWORDS: &[&str] = &[
    "ACCOUNT", "ALL", "ALTER", "AND", "ANY", "AS", "BETWEEN", "BY", "CASE", "CAST", "CHECK",
    "COLUMN", "COMMIT", "CONNECT", "CONNECTION", "CONSTRAINT", "CREATE", "CROSS", "CURRENT",
    "CURRENT_DATE", "CURRENT_TIME", "CURRENT_TIMESTAMP", "CURRENT_USER", "DATABASE", "DEFAULT",
    "DELETE", "DISTINCT", "DROP", "ELSE", "END", "EXISTS", "FALSE", "FOLLOWING", "FOR",
    "FOREIGN", "FROM", "FULL", "GRANT", "GROUP", "GSCLUSTER", "HAVING", "ILIKE", "IN",
    "INCREMENT", "INDEX", "INNER", "INSERT", "INTERSECT", "INTO", "IS", "ISSUE", "JOIN",
    "LATERAL", "LEFT", "LIKE", "LOCALTIME", "LOCALTIMESTAMP", "MINUS", "NATURAL", "NOT", "NULL",
    "OF", "ON", "OR", "ORDER", "ORGANIZATION", "PRIMARY", "QUALIFY", "REFERENCES", "REGEXP",
    "REVOKE", "RIGHT", "RLIKE", "ROLLBACK", "ROW", "ROWS", "SAMPLE", "SCHEMA", "SELECT",
    "SESSION", "SET", "SOME", "START", "TABLE", "TABLESAMPLE", "THEN", "TO", "TRANSACTION",
    "TRIGGER", "TRUE", "TRY_CAST", "UNION", "UNIQUE", "UPDATE", "USING", "VALUES", "VIEW", "WHEN",
    "WHENEVER", "WHERE", "WITH",
];

/// How eagerly an identifier gets quoted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum QuotePolicy {
    /// Quote only names that would break or change meaning when bare.
    #[default]
    WhenNeeded,
    /// Quote every identifier.
    Always,
}

/// Check whether a name is a reserved keyword (case-insensitive).
pub fn is_reserved(name: &str) -> bool {
    let upper = name.to_ascii_uppercase();
    RESERVED_KEYWORDS.contains(&upper.as_str())
}

/// Check whether a name is already wrapped in double quotes.
pub fn is_quoted(name: &str) -> bool {
    name.len() >= 2 && name.starts_with('"') && name.ends_with('"')
}

/// Check whether a raw name must be quoted to be used as an identifier.
///
/// True for reserved keywords, empty names, names starting with a digit or
/// `$`, and names containing anything outside `[A-Za-z0-9_$]` (spaces,
/// hyphens, punctuation, non-ASCII).
pub fn needs_quoting(name: &str) -> bool {
    let Some(first) = name.chars().next() else {
        return true;
    };
    if first.is_ascii_digit() || first == '$' {
        return true;
    }
    if name
        .chars()
        .any(|c| !(c.is_ascii_alphanumeric() || c == '_' || c == '$'))
    {
        return true;
    }
    is_reserved(name)
}

/// Wrap a raw name in double quotes, doubling embedded quotes.
pub fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Strip surrounding double quotes and undo quote doubling.
pub fn unquote_identifier(name: &str) -> String {
    if is_quoted(name) {
        name[1..name.len() - 1].replace("\"\"", "\"")
    } else {
        name.to_string()
    }
}

/// Render a raw name as a warehouse-safe identifier under `policy`.
pub fn sanitize_identifier(name: &str, policy: QuotePolicy) -> String {
    match policy {
        QuotePolicy::Always => quote_identifier(name),
        QuotePolicy::WhenNeeded if needs_quoting(name) => quote_identifier(name),
        QuotePolicy::WhenNeeded => name.to_string(),
    }
}

/// Render a column identifier. Columns are always quoted.
pub fn sanitize_column(name: &str) -> String {
    quote_identifier(name)
}
