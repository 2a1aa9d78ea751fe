//! Field-level diff between two row images
//!
//! The diff is driven by `before`: every column of `before` is compared with
//! the same column of `after`, in `before`'s order. Columns that only exist in
//! `after` are not reported. A symmetric diff would also walk `after`'s extra
//! columns; callers that need one should add it alongside rather than change
//! this behaviour.

use serde_json::Value;
use std::fmt;

use super::models::RowImage;

/// One column whose value changed.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldDiff {
    pub column: String,
    pub before: Value,
    /// `None` when the column is missing from `after`
    pub after: Option<Value>,
}

impl fmt::Display for FieldDiff {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.after {
            Some(after) => write!(f, "{}: {} -> {}", self.column, self.before, after),
            None => write!(f, "{}: {} -> <absent>", self.column, self.before),
        }
    }
}

/// Compare columns by their compact JSON serialization, with object keys sorted.
pub fn diff(before: &RowImage, after: &RowImage) -> Vec<FieldDiff> {
    before
        .iter()
        .filter_map(|(column, old)| match after.get(column) {
            Some(new) if canonical(old) == canonical(new) => None,
            new => Some(FieldDiff {
                column: column.clone(),
                before: old.clone(),
                after: new.cloned(),
            }),
        })
        .collect()
}

/// Compact JSON text that does not depend on the order object keys arrived in.
fn canonical(value: &Value) -> String {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(&String, &Value)> = map.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));
            let fields = entries
                .into_iter()
                .map(|(key, value)| format!("{}:{}", Value::from(key.as_str()), canonical(value)))
                .collect::<Vec<_>>();
            format!("{{{}}}", fields.join(","))
        }
        Value::Array(items) => {
            let items = items.iter().map(canonical).collect::<Vec<_>>();
            format!("[{}]", items.join(","))
        }
        other => other.to_string(),
    }
}

/// Render a diff as `col: old -> new, ...`.
pub fn summarize(diffs: &[FieldDiff]) -> String {
    diffs
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}
