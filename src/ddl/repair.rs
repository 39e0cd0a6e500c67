//! DDL rewrites applied by the table creator between attempts.
//!
//! Both rewrites parse the statement and re-render it, so their output is a
//! fixed point: repairing an already repaired statement yields the same text.
//! They return `None` when the statement cannot be parsed.

use super::parser::parse_create_table;
use super::types::VARCHAR_MAX;
use super::{CreateTable, TableElement};
use crate::naming::TABLE_SEPARATOR;
use crate::sanitizer::{is_reserved, needs_quoting};

/// Quote the table and every column name.
pub fn force_quote_identifiers(sql: &str) -> Option<String> {
    let mut stmt = parse_create_table(sql).ok()?;
    stmt.table.quoted = true;
    for_each_column(&mut stmt, |name, data_type| {
        name.quoted = true;
        *data_type = normalize_type(data_type);
    });
    Some(stmt.to_sql())
}

/// Quote only the names that need it, and a table name whose parts are
/// reserved words (`SCHOOL_TABLE_ORDER`).
pub fn requote_keywords(sql: &str) -> Option<String> {
    let mut stmt = parse_create_table(sql).ok()?;
    if table_mentions_keyword(&stmt.table.name) || needs_quoting(&stmt.table.name) {
        stmt.table.quoted = true;
    }
    for_each_column(&mut stmt, |name, data_type| {
        if needs_quoting(&name.name) {
            name.quoted = true;
        }
        *data_type = normalize_type(data_type);
    });
    Some(stmt.to_sql())
}

fn for_each_column(stmt: &mut CreateTable, mut f: impl FnMut(&mut super::Identifier, &mut String)) {
    for element in &mut stmt.elements {
        if let TableElement::Column { name, data_type } = element {
            f(name, data_type);
        }
    }
}

fn table_mentions_keyword(name: &str) -> bool {
    match name.split_once(TABLE_SEPARATOR) {
        Some((db, table)) => is_reserved(db) || is_reserved(table),
        None => is_reserved(name),
    }
}

/// Give width-less text types the maximum width.
pub fn normalize_type(data_type: &str) -> String {
    let compact: String = data_type.split_whitespace().collect();
    if compact.eq_ignore_ascii_case("VARCHAR()") {
        format!("VARCHAR({})", VARCHAR_MAX)
    } else {
        data_type.to_string()
    }
}
