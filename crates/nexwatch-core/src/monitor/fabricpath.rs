use async_trait::async_trait;
use serde_json::Value;

use crate::device::{DeviceClient, DeviceError, Feature};
use crate::monitor::delta::{StateDelta, StateSpec};
use crate::monitor::Probe;
use crate::snapshot::{record_from, Table};

const ADJACENCY_SPEC: StateSpec = StateSpec {
    entity: "adjacency",
    plural: "fabricpath adjacencies",
    healthy: &["up"],
    missing_state: "Not found in fabricpath adjacency table",
};

/// FabricPath IS-IS adjacencies, keyed `<domain>/<interface>`.
pub struct FabricpathProbe;

/// Adjacency records with their `state` lower-cased so `Up` and `up` compare equal.
pub fn adjacency_table(raw: &Value) -> Result<Table, DeviceError> {
    let Some(domains) = raw.get("domain") else {
        return Ok(Table::new());
    };
    let domains = domains
        .as_object()
        .ok_or_else(|| DeviceError::Parse("fabricpath `domain` is not a mapping".to_string()))?;

    let mut table = Table::new();
    for (domain, body) in domains {
        let Some(interfaces) = body.get("interfaces").and_then(Value::as_object) else {
            continue;
        };
        for (interface, adjacency) in interfaces {
            let Some(mut record) = record_from(adjacency) else {
                continue;
            };
            if let Some(state) = record.get("state").and_then(Value::as_str).map(str::to_lowercase) {
                record.insert("state".to_string(), Value::String(state));
            }
            table.insert(format!("{domain}/{interface}"), record);
        }
    }
    Ok(table)
}

#[async_trait]
impl Probe for FabricpathProbe {
    type Snapshot = Table;
    type Delta = StateDelta;

    fn name(&self) -> &'static str {
        "fabricpath"
    }

    fn blob(&self) -> &'static str {
        "fabricpath_adjacency"
    }

    async fn learn(&self, device: &dyn DeviceClient) -> Result<Table, DeviceError> {
        let raw = device.query(Feature::Fabricpath).await?;
        adjacency_table(&raw)
    }

    fn is_vacant(&self, snapshot: &Table) -> bool {
        !ADJACENCY_SPEC.tracks_any(snapshot)
    }

    fn compare(&self, original: &Table, current: &Table) -> StateDelta {
        StateDelta::evaluate(ADJACENCY_SPEC, original, current)
    }
}
