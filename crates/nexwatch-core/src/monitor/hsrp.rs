use async_trait::async_trait;
use serde_json::{json, Value};

use crate::device::{DeviceClient, DeviceError, Feature};
use crate::monitor::delta::{StateDelta, StateSpec};
use crate::monitor::Probe;
use crate::snapshot::{Record, Table};

const HSRP_SPEC: StateSpec = StateSpec {
    entity: "HSRP group",
    plural: "HSRP groups",
    healthy: &["active", "standby"],
    missing_state: "Not found in HSRP table",
};

pub struct HsrpProbe;

/// Groups keyed `<interface>/<address family>/v<version>/<group>`.
pub fn hsrp_table(raw: &Value) -> Result<Table, DeviceError> {
    let interfaces = raw
        .as_object()
        .ok_or_else(|| DeviceError::Parse("hsrp output is not a mapping".to_string()))?;

    let mut table = Table::new();
    for (interface, body) in interfaces {
        let Some(families) = body.get("address_family").and_then(Value::as_object) else {
            continue;
        };
        for (family, family_body) in families {
            let Some(versions) = family_body.get("version").and_then(Value::as_object) else {
                continue;
            };
            for (version, version_body) in versions {
                let Some(groups) = version_body.get("groups").and_then(Value::as_object) else {
                    continue;
                };
                for (group, detail) in groups {
                    let Some(state) = detail.get("hsrp_router_state").and_then(Value::as_str) else {
                        continue;
                    };
                    let mut record = Record::new();
                    record.insert("state".to_string(), json!(state.to_lowercase()));
                    if let Some(priority) = detail.get("priority") {
                        record.insert("priority".to_string(), priority.clone());
                    }
                    if let Some(address) = detail.pointer("/primary_ipv4_address/address") {
                        record.insert("virtual_ip".to_string(), address.clone());
                    }
                    table.insert(format!("{interface}/{family}/v{version}/{group}"), record);
                }
            }
        }
    }
    Ok(table)
}

#[async_trait]
impl Probe for HsrpProbe {
    type Snapshot = Table;
    type Delta = StateDelta;

    fn name(&self) -> &'static str {
        "hsrp"
    }

    fn blob(&self) -> &'static str {
        "hsrp"
    }

    async fn learn(&self, device: &dyn DeviceClient) -> Result<Table, DeviceError> {
        let raw = device.query(Feature::Hsrp).await?;
        hsrp_table(&raw)
    }

    fn is_vacant(&self, snapshot: &Table) -> bool {
        !HSRP_SPEC.tracks_any(snapshot)
    }

    fn compare(&self, original: &Table, current: &Table) -> StateDelta {
        StateDelta::evaluate(HSRP_SPEC, original, current)
    }
}
