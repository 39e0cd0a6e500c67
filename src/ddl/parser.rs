//! CREATE TABLE parser using nom.
//!
//! Reads the statements this crate generates and the ones the export step
//! leaves in the SQL directory, which are looser:
//!
//! ```text
//! CREATE OR REPLACE TABLE SCHOOL_TABLE_ORDER (
//!     ID NUMBER,
//!     order date VARCHAR()
//! );
//! ```
//!
//! Bare column names may contain spaces. The name is everything before the
//! last recognised type keyword in the definition.

use nom::{
    branch::alt,
    bytes::complete::{is_not, tag, tag_no_case},
    character::complete::{char, multispace0, multispace1},
    combinator::{map, opt, value},
    multi::many0,
    sequence::{delimited, tuple},
    IResult,
};

use super::{CreateMode, CreateTable, Identifier, TableElement};
use crate::error::{LoadError, LoadResult};
use crate::sanitizer::{is_quoted, unquote_identifier};

/// Type keywords recognised when splitting a bare column definition.
const TYPE_KEYWORDS: &[&str] = &[
    "ARRAY", "BIGINT", "BINARY", "BLOB", "BOOL", "BOOLEAN", "CHAR", "CHARACTER", "CLOB", "DATE",
    "DATETIME", "DECIMAL", "DOUBLE", "FLOAT", "FLOAT4", "FLOAT8", "INT", "INTEGER", "NUMBER",
    "NUMERIC", "NVARCHAR", "OBJECT", "REAL", "SMALLINT", "STRING", "TEXT", "TIME", "TIMESTAMP",
    "TIMESTAMP_LTZ", "TIMESTAMP_NTZ", "TIMESTAMP_TZ", "TINYINT", "VARBINARY", "VARCHAR",
    "VARIANT",
];

/// Leading words of an out-of-line table constraint.
const CONSTRAINT_KEYWORDS: &[&str] = &["CHECK", "CONSTRAINT", "FOREIGN", "PRIMARY", "UNIQUE"];

/// Parse a single CREATE TABLE statement. A trailing `;` is accepted.
pub fn parse_create_table(input: &str) -> LoadResult<CreateTable> {
    let input = input.trim();

    let (rest, mode) = match parse_header(input) {
        Ok(ok) => ok,
        Err(e) => return Err(LoadError::ddl_parse(0, format!("Parse failed: {:?}", e))),
    };

    let Some(open) = rest.find('(') else {
        return Err(LoadError::ddl_parse(
            input.len() - rest.len(),
            "expected '(' after table name",
        ));
    };
    let table = parse_table_name(&rest[..open])
        .ok_or_else(|| LoadError::ddl_parse(input.len() - rest.len(), "missing table name"))?;

    let body_start = input.len() - rest.len() + open + 1;
    let close = find_closing_paren(&input[body_start..])
        .ok_or_else(|| LoadError::ddl_parse(body_start, "unbalanced parentheses"))?;
    let body = &input[body_start..body_start + close];

    let trailing = input[body_start + close + 1..].trim();
    if !(trailing.is_empty() || trailing == ";") {
        return Err(LoadError::ddl_parse(
            body_start + close + 1,
            format!("Unexpected trailing content: '{}'", trailing),
        ));
    }

    let mut elements = Vec::new();
    for def in split_top_level(body) {
        elements.push(parse_element(def).map_err(|msg| LoadError::ddl_parse(body_start, msg))?);
    }
    if elements.is_empty() {
        return Err(LoadError::ddl_parse(body_start, "table has no columns"));
    }

    Ok(CreateTable {
        mode,
        table,
        elements,
    })
}

/// Parse `CREATE [OR REPLACE] TABLE [IF NOT EXISTS]`.
fn parse_header(input: &str) -> IResult<&str, CreateMode> {
    let (input, _) = tag_no_case("CREATE")(input)?;
    let (input, _) = multispace1(input)?;
    let (input, replace) = opt(value(
        CreateMode::OrReplace,
        tuple((
            tag_no_case("OR"),
            multispace1,
            tag_no_case("REPLACE"),
            multispace1,
        )),
    ))(input)?;
    let (input, _) = tag_no_case("TABLE")(input)?;
    let (input, if_not_exists) = opt(value(
        CreateMode::IfNotExists,
        tuple((
            multispace1,
            tag_no_case("IF"),
            multispace1,
            tag_no_case("NOT"),
            multispace1,
            tag_no_case("EXISTS"),
        )),
    ))(input)?;
    let (input, _) = multispace0(input)?;

    Ok((input, replace.or(if_not_exists).unwrap_or(CreateMode::Plain)))
}

/// Table names with stray quotes inside (`FINANCIAL_TABLE_"ORDER"`) are
/// read as bare names with the quotes dropped.
fn parse_table_name(raw: &str) -> Option<Identifier> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    if is_quoted(raw) && !raw[1..raw.len() - 1].replace("\"\"", "").contains('"') {
        return Some(Identifier::quoted(unquote_identifier(raw)));
    }
    Some(Identifier::bare(raw.replace('"', "")))
}

/// Parse a double-quoted identifier with `""` escapes.
fn parse_quoted_identifier(input: &str) -> IResult<&str, String> {
    map(
        delimited(
            char('"'),
            many0(alt((value("\"", tag("\"\"")), is_not("\"")))),
            char('"'),
        ),
        |parts: Vec<&str>| parts.concat(),
    )(input)
}

fn parse_element(def: &str) -> Result<TableElement, String> {
    let first_word = def
        .split_whitespace()
        .next()
        .unwrap_or_default()
        .to_ascii_uppercase();
    if CONSTRAINT_KEYWORDS.contains(&first_word.as_str()) {
        return Ok(TableElement::Constraint(def.to_string()));
    }

    if def.starts_with('"') {
        let (rest, name) = parse_quoted_identifier(def)
            .map_err(|_| format!("unterminated quoted identifier in '{}'", def))?;
        let data_type = rest.trim();
        if data_type.is_empty() {
            return Err(format!("column {} has no type", name));
        }
        return Ok(TableElement::Column {
            name: Identifier::quoted(name),
            data_type: data_type.to_string(),
        });
    }

    let tokens: Vec<&str> = def.split_whitespace().collect();
    let last = tokens
        .iter()
        .enumerate()
        .skip(1)
        .filter(|(_, tok)| is_type_keyword(tok))
        .map(|(i, _)| i)
        .last()
        .or(if tokens.len() >= 2 { Some(1) } else { None })
        .ok_or_else(|| format!("column definition '{}' has no type", def))?;
    let split = time_zone_start(&tokens, last);

    Ok(TableElement::Column {
        name: Identifier::bare(tokens[..split].join(" ")),
        data_type: tokens[split..].join(" "),
    })
}

/// `TIMESTAMP WITH [LOCAL] TIME ZONE` and `TIME WITHOUT TIME ZONE` end in
/// a type keyword of their own; move the split back to the leading one.
fn time_zone_start(tokens: &[&str], split: usize) -> usize {
    let is = |i: usize, word: &str| tokens.get(i).is_some_and(|t| t.eq_ignore_ascii_case(word));
    if !(is(split, "TIME") && is(split + 1, "ZONE")) {
        return split;
    }
    let mut start = split;
    while start > 1 && (is(start - 1, "WITH") || is(start - 1, "WITHOUT") || is(start - 1, "LOCAL")) {
        start -= 1;
    }
    if start < split && start > 1 && is_type_keyword(tokens[start - 1]) {
        start - 1
    } else {
        split
    }
}

fn is_type_keyword(token: &str) -> bool {
    let base = token.split('(').next().unwrap_or(token).to_ascii_uppercase();
    TYPE_KEYWORDS.contains(&base.as_str())
}

/// Byte offset of the `)` closing an already-opened `(`.
fn find_closing_paren(input: &str) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_quotes = false;
    for (i, c) in input.char_indices() {
        match c {
            '"' => in_quotes = !in_quotes,
            '(' if !in_quotes => depth += 1,
            ')' if !in_quotes => {
                if depth == 0 {
                    return Some(i);
                }
                depth -= 1;
            }
            _ => {}
        }
    }
    None
}

/// Split on commas outside quotes and parentheses.
fn split_top_level(body: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut depth = 0usize;
    let mut in_quotes = false;
    let mut start = 0;
    for (i, c) in body.char_indices() {
        match c {
            '"' => in_quotes = !in_quotes,
            '(' if !in_quotes => depth += 1,
            ')' if !in_quotes => depth = depth.saturating_sub(1),
            ',' if !in_quotes && depth == 0 => {
                parts.push(body[start..i].trim());
                start = i + 1;
            }
            _ => {}
        }
    }
    parts.push(body[start..].trim());
    parts.into_iter().filter(|p| !p.is_empty()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn column(name: Identifier, ty: &str) -> TableElement {
        TableElement::Column {
            name,
            data_type: ty.to_string(),
        }
    }

    #[test]
    fn test_generated_statement() {
        let sql = "CREATE TABLE IF NOT EXISTS \"SCHOOL_TABLE_ORDER\" (\n    \"id\" NUMBER(38,0),\n    \"order date\" VARCHAR(16777216)\n)";
        let stmt = parse_create_table(sql).unwrap();
        assert_eq!(stmt.mode, CreateMode::IfNotExists);
        assert_eq!(stmt.table, Identifier::quoted("SCHOOL_TABLE_ORDER"));
        assert_eq!(
            stmt.elements,
            vec![
                column(Identifier::quoted("id"), "NUMBER(38,0)"),
                column(Identifier::quoted("order date"), "VARCHAR(16777216)"),
            ]
        );
        assert_eq!(stmt.to_sql(), sql);
    }

    #[test]
    fn test_exported_statement_with_spaced_bare_names() {
        let sql = "CREATE OR REPLACE TABLE SCHOOL_TABLE_ORDER (\n    ID NUMBER,\n    order date VARCHAR(),\n    amount NUMBER(10, 2)\n);";
        let stmt = parse_create_table(sql).unwrap();
        assert_eq!(stmt.mode, CreateMode::OrReplace);
        assert_eq!(stmt.table, Identifier::bare("SCHOOL_TABLE_ORDER"));
        assert_eq!(
            stmt.elements,
            vec![
                column(Identifier::bare("ID"), "NUMBER"),
                column(Identifier::bare("order date"), "VARCHAR()"),
                column(Identifier::bare("amount"), "NUMBER(10, 2)"),
            ]
        );
    }

    #[test]
    fn test_time_zone_types_stay_whole() {
        let sql = "CREATE TABLE T (\n    ts TIMESTAMP WITH TIME ZONE,\n    shift start TIME WITHOUT TIME ZONE,\n    seen TIMESTAMP(6) WITH LOCAL TIME ZONE,\n    order date VARCHAR()\n)";
        let stmt = parse_create_table(sql).unwrap();
        assert_eq!(
            stmt.elements,
            vec![
                column(Identifier::bare("ts"), "TIMESTAMP WITH TIME ZONE"),
                column(Identifier::bare("shift start"), "TIME WITHOUT TIME ZONE"),
                column(Identifier::bare("seen"), "TIMESTAMP(6) WITH LOCAL TIME ZONE"),
                column(Identifier::bare("order date"), "VARCHAR()"),
            ]
        );
    }

    #[test]
    fn test_partially_quoted_table_name() {
        let stmt = parse_create_table("CREATE TABLE FINANCIAL_TABLE_\"ORDER\" (A INT)").unwrap();
        assert_eq!(stmt.table, Identifier::bare("FINANCIAL_TABLE_ORDER"));
        assert_eq!(stmt.mode, CreateMode::Plain);
    }

    #[test]
    fn test_quoted_identifier_escapes() {
        let stmt = parse_create_table("create table t (\"say \"\"hi\"\"\" TEXT)").unwrap();
        assert_eq!(
            stmt.elements,
            vec![column(Identifier::quoted("say \"hi\""), "TEXT")]
        );
    }

    #[test]
    fn test_constraints_are_kept_verbatim() {
        let stmt = parse_create_table("CREATE TABLE t (a INT, b INT, PRIMARY KEY (a, b))").unwrap();
        assert_eq!(stmt.elements.len(), 3);
        assert_eq!(
            stmt.elements[2],
            TableElement::Constraint("PRIMARY KEY (a, b)".to_string())
        );
    }

    #[test]
    fn test_errors() {
        assert!(parse_create_table("SELECT 1").is_err());
        assert!(parse_create_table("CREATE TABLE t (a INT").is_err());
        assert!(parse_create_table("CREATE TABLE t ()").is_err());
        assert!(parse_create_table("CREATE TABLE t (a INT) extra").is_err());
        assert!(parse_create_table("CREATE TABLE t (lonely)").is_err());
    }
}
