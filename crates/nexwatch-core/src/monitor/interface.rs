use async_trait::async_trait;
use serde_json::Value;

use crate::device::{DeviceClient, DeviceError, Feature};
use crate::monitor::delta::ListDelta;
use crate::monitor::Probe;

pub struct InterfaceProbe;

/// Names of the interfaces whose `oper_status` is `up`, in key order.
pub fn up_interfaces(raw: &Value) -> Result<Vec<String>, DeviceError> {
    let interfaces = raw
        .as_object()
        .ok_or_else(|| DeviceError::Parse("interface output is not a mapping".to_string()))?;

    Ok(interfaces
        .iter()
        .filter(|(_, info)| info.get("oper_status").and_then(Value::as_str) == Some("up"))
        .map(|(name, _)| name.clone())
        .collect())
}

#[async_trait]
impl Probe for InterfaceProbe {
    type Snapshot = Vec<String>;
    type Delta = ListDelta;

    fn name(&self) -> &'static str {
        "interface"
    }

    fn blob(&self) -> &'static str {
        "interface_up_list"
    }

    async fn learn(&self, device: &dyn DeviceClient) -> Result<Vec<String>, DeviceError> {
        let raw = device.query(Feature::Interface).await?;
        up_interfaces(&raw)
    }

    fn is_vacant(&self, snapshot: &Vec<String>) -> bool {
        snapshot.is_empty()
    }

    fn compare(&self, original: &Vec<String>, current: &Vec<String>) -> ListDelta {
        ListDelta::new("interfaces", original, current)
    }
}
