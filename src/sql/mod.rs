//! SQL text handling for backup artifacts
//!
//! Only the narrow grammar that backups contain is supported: `--` comment
//! lines, `DELETE FROM table;`, and flat single-row
//! `INSERT INTO table (cols) VALUES (vals);` statements.

mod literal;
mod statement;

pub use literal::{render_value, scan_literals, scan_values, Literal};
pub use statement::{
    advisory_delete_line, extract_inserts, has_active_delete, is_insert, is_valid_identifier,
    parse_insert, quote_identifier, render_insert, split_statements, InsertStatement,
    StatementIssue,
};
