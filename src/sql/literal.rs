//! SQL literal scanning and rendering
//!
//! The scanner understands exactly the flat, single-row `VALUES (...)` payload
//! that backups contain: comma-separated values, each either a bare token
//! (`42`, `NULL`, `true`) or a single-quoted string where `''` stands for one
//! literal quote. It is not a general SQL lexer.

/// One value from a `VALUES` payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Literal {
    /// Unescaped text of the value
    pub text: String,
    /// Whether any part of the value was quoted
    pub quoted: bool,
}

impl Literal {
    /// Converts to the textual column value; an unquoted `NULL` is `None`.
    pub fn into_value(self) -> Option<String> {
        if !self.quoted && self.text.eq_ignore_ascii_case("null") {
            None
        } else {
            Some(self.text)
        }
    }
}

/// Scans a `VALUES` payload into literals.
pub fn scan_literals(payload: &str) -> Vec<Literal> {
    let mut literals = Vec::new();
    let mut current = String::new();
    let mut quoted = false;
    let mut in_quotes = false;
    let mut seen_any = false;

    let mut chars = payload.chars().peekable();
    while let Some(c) = chars.next() {
        seen_any = true;
        match c {
            '\'' if in_quotes && chars.peek() == Some(&'\'') => {
                chars.next();
                current.push('\'');
            }
            '\'' => {
                in_quotes = !in_quotes;
                quoted = true;
            }
            ',' if !in_quotes => {
                literals.push(Literal {
                    text: std::mem::take(&mut current),
                    quoted,
                });
                quoted = false;
            }
            c if !in_quotes && c.is_whitespace() => {}
            c => current.push(c),
        }
    }

    if seen_any && (!current.is_empty() || quoted || !literals.is_empty()) {
        literals.push(Literal {
            text: current,
            quoted,
        });
    }

    literals
}

/// Scans a `VALUES` payload into plain string tokens.
pub fn scan_values(payload: &str) -> Vec<String> {
    scan_literals(payload).into_iter().map(|l| l.text).collect()
}

/// Renders a column value as a SQL literal: `NULL` or a single-quoted string
/// with embedded quotes doubled.
pub fn render_value(value: Option<&str>) -> String {
    match value {
        None => "NULL".to_string(),
        Some(text) => format!("'{}'", text.replace('\'', "''")),
    }
}
