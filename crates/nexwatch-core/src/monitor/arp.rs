use async_trait::async_trait;
use serde_json::Value;

use crate::device::{DeviceClient, DeviceError, Feature};
use crate::monitor::delta::CountDelta;
use crate::monitor::Probe;

pub struct ArpProbe {
    threshold: f64,
}

impl ArpProbe {
    pub fn new(threshold: f64) -> Self {
        Self { threshold }
    }
}

/// Dotted MAC notation as printed by NX-OS, e.g. `00a1.b2c3.d4e5`.
fn is_dotted_mac(text: &str) -> bool {
    let groups: Vec<&str> = text.split('.').collect();
    groups.len() == 3
        && groups
            .iter()
            .all(|group| group.len() == 4 && group.chars().all(|c| matches!(c, '0'..='9' | 'a'..='f')))
}

/// Neighbors whose link-layer address is resolved. Incomplete entries are skipped.
pub fn count_arp_entries(raw: &Value) -> Result<u64, DeviceError> {
    let Some(interfaces) = raw.get("interfaces") else {
        return Ok(0);
    };
    let interfaces = interfaces
        .as_object()
        .ok_or_else(|| DeviceError::Parse("arp `interfaces` is not a mapping".to_string()))?;

    let count = interfaces
        .values()
        .filter_map(|intf| intf.pointer("/ipv4/neighbors").and_then(Value::as_object))
        .flat_map(|neighbors| neighbors.values())
        .filter(|neighbor| {
            neighbor
                .get("link_layer_address")
                .and_then(Value::as_str)
                .is_some_and(is_dotted_mac)
        })
        .count();
    Ok(count as u64)
}

#[async_trait]
impl Probe for ArpProbe {
    type Snapshot = u64;
    type Delta = CountDelta;

    fn name(&self) -> &'static str {
        "arp"
    }

    fn blob(&self) -> &'static str {
        "arp"
    }

    async fn learn(&self, device: &dyn DeviceClient) -> Result<u64, DeviceError> {
        let raw = device.query(Feature::Arp).await?;
        count_arp_entries(&raw)
    }

    fn is_vacant(&self, snapshot: &u64) -> bool {
        *snapshot == 0
    }

    fn compare(&self, original: &u64, current: &u64) -> CountDelta {
        CountDelta::new("ARP entries", *original, *current, self.threshold)
    }
}
