//! INSERT statement rendering and extraction for backup artifacts

use std::sync::OnceLock;

use regex::Regex;

use super::literal::{render_value, scan_literals, Literal};

/// A parsed `INSERT INTO table (cols) VALUES (vals);` statement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InsertStatement {
    /// Table name as written, without schema or quoting
    pub table: String,
    /// Column names, unquoted
    pub columns: Vec<String>,
    /// Values, `None` for SQL `NULL`
    pub values: Vec<Option<String>>,
}

/// Why a statement could not be turned into a row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatementIssue {
    /// Not an INSERT, or an INSERT without a column list
    Unrecognized,
    /// Column and value counts differ
    ArityMismatch { columns: usize, values: usize },
}

fn insert_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(concat!(
            r#"(?is)^INSERT\s+INTO\s+([A-Za-z0-9_."]+)\s*"#,
            r"\(([^)]*)\)\s*VALUES\s*\((.*)\)\s*$",
        ))
        .expect("insert pattern is valid")
    })
}

/// Whether `name` is a plain SQL identifier.
pub fn is_valid_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    name.len() <= 63 && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Double-quotes an identifier.
pub fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Strips quoting and any schema qualifier from a table or column name.
fn bare_name(name: &str) -> String {
    let last = name.rsplit('.').next().unwrap_or(name);
    last.trim().trim_matches('"').to_string()
}

/// Renders one backup INSERT line.
pub fn render_insert(table: &str, columns: &[String], values: &[Option<String>]) -> String {
    let rendered: Vec<String> = values.iter().map(|v| render_value(v.as_deref())).collect();
    format!(
        "INSERT INTO {} ({}) VALUES ({});",
        table,
        columns.join(", "),
        rendered.join(", ")
    )
}

/// Splits SQL text into statements on unquoted `;`, dropping `--` comments
/// that start outside a string literal. The terminating `;` is not included.
pub fn split_statements(text: &str) -> Vec<String> {
    let mut statements = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut chars = text.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '\'' => {
                in_quotes = !in_quotes;
                current.push(c);
            }
            '-' if !in_quotes && chars.peek() == Some(&'-') => {
                for skipped in chars.by_ref() {
                    if skipped == '\n' {
                        current.push('\n');
                        break;
                    }
                }
            }
            ';' if !in_quotes => {
                let statement = current.trim();
                if !statement.is_empty() {
                    statements.push(statement.to_string());
                }
                current.clear();
            }
            c => current.push(c),
        }
    }

    let tail = current.trim();
    if !tail.is_empty() {
        statements.push(tail.to_string());
    }
    statements
}

/// Parses one statement (without the trailing `;`) as an INSERT.
pub fn parse_insert(statement: &str) -> Result<InsertStatement, StatementIssue> {
    let captures = insert_pattern()
        .captures(statement.trim())
        .ok_or(StatementIssue::Unrecognized)?;

    let table = bare_name(&captures[1]);
    let columns: Vec<String> = captures[2]
        .split(',')
        .map(bare_name)
        .filter(|c| !c.is_empty())
        .collect();
    let values: Vec<Option<String>> = scan_literals(&captures[3])
        .into_iter()
        .map(Literal::into_value)
        .collect();

    if columns.len() != values.len() {
        return Err(StatementIssue::ArityMismatch {
            columns: columns.len(),
            values: values.len(),
        });
    }

    Ok(InsertStatement {
        table,
        columns,
        values,
    })
}

/// Whether `statement` looks like an INSERT at all, even a malformed one.
pub fn is_insert(statement: &str) -> bool {
    let head: String = statement.trim_start().chars().take(6).collect();
    head.eq_ignore_ascii_case("insert")
}

/// Extracts every INSERT targeting `table`. Malformed INSERTs are returned as
/// issues; statements that are not INSERTs at all (`SET`, `SELECT`, ...) are
/// ignored.
pub fn extract_inserts(
    text: &str,
    table: &str,
) -> Vec<Result<InsertStatement, StatementIssue>> {
    split_statements(text)
        .into_iter()
        .filter(|s| is_insert(s))
        .map(|s| parse_insert(&s))
        .filter(|parsed| match parsed {
            Ok(insert) => insert.table.eq_ignore_ascii_case(table),
            Err(_) => true,
        })
        .collect()
}

/// Whether the text contains an active `DELETE FROM table;` statement.
/// Only the exact statement counts; commented-out copies and text inside
/// string literals do not.
pub fn has_active_delete(text: &str, table: &str) -> bool {
    let expected = format!("DELETE FROM {}", table);
    split_statements(text).iter().any(|s| *s == expected)
}

/// The commented-out advisory line written into backup headers.
pub fn advisory_delete_line(table: &str) -> String {
    format!("-- DELETE FROM {};", table)
}
