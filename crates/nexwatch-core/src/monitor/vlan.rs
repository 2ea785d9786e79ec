use async_trait::async_trait;
use serde_json::Value;

use crate::device::{DeviceClient, DeviceError, Feature};
use crate::monitor::delta::{StateDelta, StateSpec};
use crate::monitor::Probe;
use crate::snapshot::{record_from, Table};

const VLAN_SPEC: StateSpec = StateSpec {
    entity: "VLAN",
    plural: "VLANs",
    healthy: &["active"],
    missing_state: "Not found in VLAN database",
};

/// Keys under `vlans` that describe global settings rather than a VLAN.
const NON_VLAN_KEYS: [&str; 3] = ["interface_vlan_enabled", "vn_segment_vlan_based_enabled", "configuration"];

pub struct VlanProbe;

pub fn vlan_table(raw: &Value) -> Result<Table, DeviceError> {
    let Some(vlans) = raw.get("vlans") else {
        return Ok(Table::new());
    };
    let vlans = vlans
        .as_object()
        .ok_or_else(|| DeviceError::Parse("`vlans` is not a mapping".to_string()))?;

    Ok(vlans
        .iter()
        .filter(|(key, _)| !NON_VLAN_KEYS.contains(&key.as_str()))
        .filter_map(|(key, value)| record_from(value).map(|record| (key.clone(), record)))
        .collect())
}

#[async_trait]
impl Probe for VlanProbe {
    type Snapshot = Table;
    type Delta = StateDelta;

    fn name(&self) -> &'static str {
        "vlan"
    }

    fn blob(&self) -> &'static str {
        "vlan"
    }

    async fn learn(&self, device: &dyn DeviceClient) -> Result<Table, DeviceError> {
        let raw = device.query(Feature::Vlan).await?;
        vlan_table(&raw)
    }

    fn is_vacant(&self, snapshot: &Table) -> bool {
        !VLAN_SPEC.tracks_any(snapshot)
    }

    fn compare(&self, original: &Table, current: &Table) -> StateDelta {
        StateDelta::evaluate(VLAN_SPEC, original, current)
    }
}
