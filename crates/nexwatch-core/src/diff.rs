//! Structural comparison of snapshots.
//!
//! [`compare`] works on keyed tables and only tracks loss relative to the
//! original: keys that disappeared and significant fields that changed. Keys
//! that only exist in the current table are ignored.
//!
//! [`compare_trees`] is the whole-tree variant used for full-detail
//! comparisons, where additions are reported as well.

use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;
use serde_json::Value;

use crate::snapshot::{display_value, Record, Table};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FieldChange {
    pub original: Value,
    /// `None` when the field is gone from the current record.
    pub current: Option<Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DiffResult {
    /// Keys present in the original but absent from the current table.
    pub missing: BTreeMap<String, Record>,
    /// Keys present in both whose significant fields differ.
    pub changed: BTreeMap<String, BTreeMap<String, FieldChange>>,
    pub missing_count: usize,
    pub changed_count: usize,
    pub total_count: usize,
    /// `total_count` relative to the size of the original table; 0 when it was empty.
    pub percentage: f64,
}

impl DiffResult {
    pub fn is_empty(&self) -> bool {
        self.total_count == 0
    }
}

/// Compares `current` against `original`, considering only `significant` fields.
pub fn compare(original: &Table, current: &Table, significant: &[&str]) -> DiffResult {
    let mut result = DiffResult::default();

    for (key, original_record) in original {
        let Some(current_record) = current.get(key) else {
            result.missing.insert(key.clone(), original_record.clone());
            continue;
        };

        let mut fields = BTreeMap::new();
        for field in significant {
            let Some(original_value) = original_record.get(*field) else {
                continue;
            };
            match current_record.get(*field) {
                Some(current_value) if current_value == original_value => {}
                current_value => {
                    fields.insert(
                        (*field).to_string(),
                        FieldChange {
                            original: original_value.clone(),
                            current: current_value.cloned(),
                        },
                    );
                }
            }
        }

        if !fields.is_empty() {
            result.changed.insert(key.clone(), fields);
        }
    }

    result.missing_count = result.missing.len();
    result.changed_count = result.changed.len();
    result.total_count = result.missing_count + result.changed_count;
    result.percentage = percent_of(result.total_count as f64, original.len() as f64);
    result
}

/// `part` as a percentage of `whole`, or 0 when `whole` is zero.
pub fn percent_of(part: f64, whole: f64) -> f64 {
    if whole == 0.0 {
        0.0
    } else {
        part * 100.0 / whole
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TreeChange {
    Removed { path: Vec<String>, value: Value },
    Added { path: Vec<String>, value: Value },
    Modified { path: Vec<String>, original: Value, current: Value },
}

impl TreeChange {
    pub fn render(&self) -> String {
        match self {
            TreeChange::Removed { path, value } => format!("-{}: {}", path.join(" > "), display_value(value)),
            TreeChange::Added { path, value } => format!("+{}: {}", path.join(" > "), display_value(value)),
            TreeChange::Modified { path, original, current } => format!(
                "~{}: {} -> {}",
                path.join(" > "),
                display_value(original),
                display_value(current)
            ),
        }
    }
}

/// Recursively compares two JSON trees. Object keys named in `exclude` are
/// skipped at any depth.
pub fn compare_trees(original: &Value, current: &Value, exclude: &BTreeSet<String>) -> Vec<TreeChange> {
    let mut changes = Vec::new();
    let mut path = Vec::new();
    walk(original, current, exclude, &mut path, &mut changes);
    changes
}

fn walk(original: &Value, current: &Value, exclude: &BTreeSet<String>, path: &mut Vec<String>, out: &mut Vec<TreeChange>) {
    match (original, current) {
        (Value::Object(a), Value::Object(b)) => {
            for (key, a_value) in a {
                if exclude.contains(key) {
                    continue;
                }
                path.push(key.clone());
                match b.get(key) {
                    Some(b_value) => walk(a_value, b_value, exclude, path, out),
                    None => out.push(TreeChange::Removed {
                        path: path.clone(),
                        value: a_value.clone(),
                    }),
                }
                path.pop();
            }
            for (key, b_value) in b {
                if exclude.contains(key) || a.contains_key(key) {
                    continue;
                }
                path.push(key.clone());
                out.push(TreeChange::Added {
                    path: path.clone(),
                    value: b_value.clone(),
                });
                path.pop();
            }
        }
        (a, b) if a == b => {}
        (a, b) => out.push(TreeChange::Modified {
            path: path.clone(),
            original: a.clone(),
            current: b.clone(),
        }),
    }
}
