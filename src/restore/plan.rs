//! Turning artifact text into a replay plan

use tracing::debug;

use crate::sql::{extract_inserts, has_active_delete, StatementIssue};
use crate::store::{Record, ReplayPlan, TableLayout};

/// A replay plan plus the INSERTs that could not be parsed
#[derive(Debug, Clone, Default)]
pub struct ParsedArtifact {
    pub plan: ReplayPlan,
    pub malformed: u64,
}

/// Build the rows to replay from artifact text.
///
/// The table is cleared first only when the artifact carries an active
/// `DELETE FROM <table>;`. Primary-key values are dropped so the store
/// assigns new ones; NULL timestamp values are dropped so the store's
/// defaults apply.
pub fn plan_replay(text: &str, layout: &TableLayout) -> ParsedArtifact {
    let mut parsed = ParsedArtifact {
        plan: ReplayPlan {
            clear_first: has_active_delete(text, &layout.table),
            rows: Vec::new(),
        },
        malformed: 0,
    };

    for statement in extract_inserts(text, &layout.table) {
        match statement {
            Ok(insert) => {
                let mut record =
                    Record::from_fields(insert.columns.into_iter().zip(insert.values).collect());
                record.retain(|column, value| {
                    column != layout.primary_key
                        && !(value.is_none() && layout.is_timestamp_column(column))
                });
                parsed.plan.rows.push(record);
            }
            Err(issue) => {
                match issue {
                    StatementIssue::Unrecognized => debug!("unrecognized INSERT statement"),
                    StatementIssue::ArityMismatch { columns, values } => {
                        debug!(columns, values, "INSERT column/value count mismatch")
                    }
                }
                parsed.malformed += 1;
            }
        }
    }

    parsed
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plan_strips_key_and_null_timestamps() {
        let text = concat!(
            "-- DELETE FROM images;\n",
            "INSERT INTO images (id, path, created_at, title) ",
            "VALUES (7, 'a.png', NULL, NULL);\n",
            "INSERT INTO images (path, created_at) ",
            "VALUES ('b.png', '2026-01-01 00:00:00');\n",
        );
        let parsed = plan_replay(text, &TableLayout::default());

        assert!(!parsed.plan.clear_first);
        assert_eq!(parsed.malformed, 0);
        assert_eq!(parsed.plan.rows.len(), 2);

        let first = &parsed.plan.rows[0];
        assert!(!first.contains("id"));
        assert!(!first.contains("created_at"));
        assert!(first.contains("title"));
        assert_eq!(first.get("title"), None);

        assert_eq!(parsed.plan.rows[1].get("created_at"), Some("2026-01-01 00:00:00"));
    }

    #[test]
    fn test_plan_counts_malformed_and_honors_active_delete() {
        let text = "DELETE FROM images;\n\
                    INSERT INTO images (path, title) VALUES ('a.png');\n\
                    INSERT INTO images (path) VALUES ('b.png');\n";
        let parsed = plan_replay(text, &TableLayout::default());
        assert!(parsed.plan.clear_first);
        assert_eq!(parsed.malformed, 1);
        assert_eq!(parsed.plan.rows.len(), 1);
    }
}
