//! Built-in SQL text generation, used when the native dump is unavailable

use chrono::{DateTime, SecondsFormat, Utc};

use crate::sql::{advisory_delete_line, render_insert};
use crate::store::Record;

/// Render a complete artifact: comment header, then one INSERT per row.
///
/// The header carries a commented-out `DELETE FROM` so replaying the file
/// with a generic SQL client appends rather than wipes.
pub fn render_dump(
    table: &str,
    columns: &[String],
    rows: &[Record],
    created_at: DateTime<Utc>,
) -> String {
    let mut out = String::with_capacity(256 + rows.len() * 96);

    out.push_str("-- pixelvault backup\n");
    out.push_str(&format!(
        "-- Created: {}\n",
        created_at.to_rfc3339_opts(SecondsFormat::Millis, true)
    ));
    out.push_str(&format!("-- Table: {}\n", table));
    out.push_str(&format!("-- Records: {}\n", rows.len()));
    out.push_str("-- Uncomment the next line to replace the table contents on restore:\n");
    out.push_str(&advisory_delete_line(table));
    out.push_str("\n\n");

    for row in rows {
        let values: Vec<Option<String>> = columns
            .iter()
            .map(|c| row.get(c).map(String::from))
            .collect();
        out.push_str(&render_insert(table, columns, &values));
        out.push('\n');
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sql::{extract_inserts, has_active_delete};
    use chrono::TimeZone;

    fn columns() -> Vec<String> {
        vec!["path".to_string(), "title".to_string()]
    }

    #[test]
    fn test_header_and_rows() {
        let at = Utc.with_ymd_and_hms(2026, 10, 15, 12, 0, 0).unwrap();
        let rows = vec![
            Record::new().with("path", "a.png").with("title", "O'Brien"),
            Record::new().with("path", "b.png").with_null("title"),
        ];
        let text = render_dump("images", &columns(), &rows, at);

        assert!(text.starts_with("-- pixelvault backup\n"));
        assert!(text.contains("-- Created: 2026-10-15T12:00:00.000Z\n"));
        assert!(text.contains("-- Records: 2\n"));
        assert!(text.contains("-- DELETE FROM images;\n"));
        assert!(text.contains("INSERT INTO images (path, title) VALUES ('a.png', 'O''Brien');\n"));
        assert!(text.contains("INSERT INTO images (path, title) VALUES ('b.png', NULL);\n"));
    }

    #[test]
    fn test_generated_dump_never_deletes() {
        let text = render_dump("images", &columns(), &[], Utc::now());
        assert!(!has_active_delete(&text, "images"));
    }

    #[test]
    fn test_generated_dump_parses_back() {
        let rows = vec![
            Record::new().with("path", "x, y.png").with("title", "multi\nline"),
            Record::new().with("path", "z.png").with("title", "''"),
        ];
        let text = render_dump("images", &columns(), &rows, Utc::now());
        let parsed: Vec<_> = extract_inserts(&text, "images")
            .into_iter()
            .map(|r| r.unwrap())
            .collect();

        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed[0].values[0].as_deref(), Some("x, y.png"));
        assert_eq!(parsed[0].values[1].as_deref(), Some("multi\nline"));
        assert_eq!(parsed[1].values[1].as_deref(), Some("''"));
    }
}
