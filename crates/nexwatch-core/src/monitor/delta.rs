use std::collections::BTreeMap;
use std::fmt::Write as _;

use crate::diff::{compare, percent_of, DiffResult};
use crate::monitor::Delta;
use crate::snapshot::{display_value, field_str, Table};

/// Loss of a scalar counter such as the number of MAC entries.
///
/// Growth gives a negative delta and percentage and is never significant.
#[derive(Debug, Clone, PartialEq)]
pub struct CountDelta {
    pub label: &'static str,
    pub original: u64,
    pub current: u64,
    pub delta: i64,
    pub percentage: f64,
    pub threshold: f64,
}

impl CountDelta {
    pub fn new(label: &'static str, original: u64, current: u64, threshold: f64) -> Self {
        let delta = original as i64 - current as i64;
        Self {
            label,
            original,
            current,
            delta,
            percentage: percent_of(delta as f64, original as f64),
            threshold,
        }
    }
}

impl Delta for CountDelta {
    fn is_significant(&self) -> bool {
        self.percentage > self.threshold
    }

    fn describe(&self) -> String {
        format!(
            "{} entries lost: {:.2}% {} below baseline ({} -> {})\n",
            self.delta, self.percentage, self.label, self.original, self.current
        )
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ListDelta {
    pub label: &'static str,
    pub missing: Vec<String>,
    pub original_len: usize,
    pub percentage: f64,
}

impl ListDelta {
    pub fn new(label: &'static str, original: &[String], current: &[String]) -> Self {
        let missing: Vec<String> = original
            .iter()
            .filter(|item| !current.contains(item))
            .cloned()
            .collect();
        let percentage = percent_of(missing.len() as f64, original.len() as f64);
        Self {
            label,
            missing,
            original_len: original.len(),
            percentage,
        }
    }
}

impl Delta for ListDelta {
    fn is_significant(&self) -> bool {
        !self.missing.is_empty()
    }

    fn describe(&self) -> String {
        let mut out = format!(
            "There are {} ({:.2}%) {} changed to down.\nList of the {} changed to down:\n",
            self.missing.len(),
            self.percentage,
            self.label,
            self.label
        );
        if self.missing.is_empty() {
            out.push_str("   None\n");
        }
        for item in &self.missing {
            let _ = writeln!(out, "   {item}");
        }
        out
    }
}

/// How a keyed table with a `state` field is judged.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StateSpec {
    /// Singular entity label, e.g. `VLAN`.
    pub entity: &'static str,
    pub plural: &'static str,
    /// Only records in one of these states at baseline time are tracked.
    pub healthy: &'static [&'static str],
    /// State shown for tracked records that disappeared.
    pub missing_state: &'static str,
}

impl StateSpec {
    /// Whether any record of `table` is in a healthy state.
    pub fn tracks_any(&self, table: &Table) -> bool {
        table
            .values()
            .any(|record| field_str(record, "state").is_some_and(|state| self.healthy.contains(&state)))
    }
}

/// Tracked records whose `state` changed or that disappeared.
#[derive(Debug, Clone, PartialEq)]
pub struct StateDelta {
    pub spec: StateSpec,
    pub diff: DiffResult,
}

impl StateDelta {
    pub fn evaluate(spec: StateSpec, original: &Table, current: &Table) -> Self {
        let tracked = tracked_records(&spec, original);
        Self {
            spec,
            diff: compare(&tracked, current, &["state"]),
        }
    }

    /// Current state per degraded key, with the sentinel for lost records.
    pub fn degraded(&self) -> BTreeMap<&str, String> {
        let mut out = BTreeMap::new();
        for key in self.diff.missing.keys() {
            out.insert(key.as_str(), self.spec.missing_state.to_string());
        }
        for (key, fields) in &self.diff.changed {
            let state = fields
                .get("state")
                .and_then(|change| change.current.as_ref())
                .map(display_value)
                .unwrap_or_else(|| "<absent>".to_string());
            out.insert(key.as_str(), state);
        }
        out
    }
}

fn tracked_records(spec: &StateSpec, table: &Table) -> Table {
    table
        .iter()
        .filter(|(_, record)| field_str(record, "state").is_some_and(|state| spec.healthy.contains(&state)))
        .map(|(key, record)| (key.clone(), record.clone()))
        .collect()
}

impl Delta for StateDelta {
    fn is_significant(&self) -> bool {
        !self.diff.is_empty()
    }

    fn describe(&self) -> String {
        let mut out = format!(
            "There are {} ({:.2}%) {} out of their baseline state.\nList of the {} changed:\n",
            self.diff.total_count, self.diff.percentage, self.spec.plural, self.spec.plural
        );
        let degraded = self.degraded();
        if degraded.is_empty() {
            out.push_str("   None\n");
        }
        for (key, state) in degraded {
            let _ = writeln!(out, "   {} {} - state: {}", self.spec.entity, key, state);
        }
        out
    }
}
