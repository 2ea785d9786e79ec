use async_trait::async_trait;
use serde_json::{json, Value};

use crate::device::{DeviceClient, DeviceError, Feature};
use crate::monitor::delta::{StateDelta, StateSpec};
use crate::monitor::Probe;
use crate::snapshot::{Record, Table};

const FEATURE_SPEC: StateSpec = StateSpec {
    entity: "feature",
    plural: "features",
    healthy: &["enabled"],
    missing_state: "Not found in feature list",
};

pub struct FeaturesProbe;

/// One record per feature instance. Instance `1` is keyed by the bare name,
/// any other instance by `<name>#<instance>`.
pub fn feature_table(raw: &Value) -> Result<Table, DeviceError> {
    let features = raw
        .get("feature")
        .and_then(Value::as_object)
        .ok_or_else(|| DeviceError::Parse("feature output has no `feature` mapping".to_string()))?;

    let mut table = Table::new();
    for (name, body) in features {
        let Some(instances) = body.get("instance").and_then(Value::as_object) else {
            continue;
        };
        for (instance, detail) in instances {
            let Some(state) = detail.get("state").and_then(Value::as_str) else {
                continue;
            };
            let key = if instance == "1" {
                name.clone()
            } else {
                format!("{name}#{instance}")
            };
            let mut record = Record::new();
            record.insert("state".to_string(), json!(state));
            record.insert("instance".to_string(), json!(instance));
            table.insert(key, record);
        }
    }
    Ok(table)
}

#[async_trait]
impl Probe for FeaturesProbe {
    type Snapshot = Table;
    type Delta = StateDelta;

    fn name(&self) -> &'static str {
        "features"
    }

    fn blob(&self) -> &'static str {
        "features"
    }

    async fn learn(&self, device: &dyn DeviceClient) -> Result<Table, DeviceError> {
        let raw = device.query(Feature::Features).await?;
        feature_table(&raw)
    }

    fn is_vacant(&self, snapshot: &Table) -> bool {
        !FEATURE_SPEC.tracks_any(snapshot)
    }

    fn compare(&self, original: &Table, current: &Table) -> StateDelta {
        StateDelta::evaluate(FEATURE_SPEC, original, current)
    }
}
