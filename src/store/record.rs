//! Opaque record rows

use serde::{Deserialize, Serialize};

/// A row of the primary table.
///
/// Columns keep their order and every value is carried as text (`None` is
/// SQL `NULL`). The store casts to and from column types; this layer never
/// interprets a value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    fields: Vec<(String, Option<String>)>,
}

impl Record {
    /// Create an empty record
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a record from ordered fields
    pub fn from_fields(fields: Vec<(String, Option<String>)>) -> Self {
        let mut record = Self::new();
        for (column, value) in fields {
            record.set(column, value);
        }
        record
    }

    /// Builder: set a text value
    pub fn with(mut self, column: impl Into<String>, value: impl Into<String>) -> Self {
        self.set(column, Some(value.into()));
        self
    }

    /// Builder: set a NULL value
    pub fn with_null(mut self, column: impl Into<String>) -> Self {
        self.set(column, None);
        self
    }

    /// Set a column, replacing any existing value in place
    pub fn set(&mut self, column: impl Into<String>, value: Option<String>) {
        let column = column.into();
        match self.fields.iter_mut().find(|(c, _)| *c == column) {
            Some(slot) => slot.1 = value,
            None => self.fields.push((column, value)),
        }
    }

    /// Text value of a column; `None` when missing or NULL
    pub fn get(&self, column: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(c, _)| c == column)
            .and_then(|(_, v)| v.as_deref())
    }

    /// Whether the column is present (even if NULL)
    pub fn contains(&self, column: &str) -> bool {
        self.fields.iter().any(|(c, _)| c == column)
    }

    /// Copy without the given column
    pub fn without(&self, column: &str) -> Self {
        Self {
            fields: self
                .fields
                .iter()
                .filter(|(c, _)| c != column)
                .cloned()
                .collect(),
        }
    }

    /// Drop columns for which `keep` returns false
    pub fn retain(&mut self, mut keep: impl FnMut(&str, Option<&str>) -> bool) {
        self.fields.retain(|(c, v)| keep(c, v.as_deref()));
    }

    pub fn columns(&self) -> Vec<String> {
        self.fields.iter().map(|(c, _)| c.clone()).collect()
    }

    pub fn values(&self) -> Vec<Option<String>> {
        self.fields.iter().map(|(_, v)| v.clone()).collect()
    }

    pub fn fields(&self) -> &[(String, Option<String>)] {
        &self.fields
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}
