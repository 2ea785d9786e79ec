use async_trait::async_trait;
use serde_json::Value;

use crate::device::{DeviceClient, DeviceError, Feature};
use crate::monitor::delta::CountDelta;
use crate::monitor::Probe;
use crate::snapshot::entry_count;

pub struct FdbProbe {
    threshold: f64,
}

impl FdbProbe {
    pub fn new(threshold: f64) -> Self {
        Self { threshold }
    }
}

/// Total MAC entries across all VLANs; a table without VLANs counts as zero.
pub fn count_mac_addresses(raw: &Value) -> u64 {
    raw.pointer("/mac_table/vlans")
        .and_then(Value::as_object)
        .map(|vlans| vlans.values().map(|vlan| entry_count(vlan.get("mac_addresses"))).sum())
        .unwrap_or(0)
}

#[async_trait]
impl Probe for FdbProbe {
    type Snapshot = u64;
    type Delta = CountDelta;

    fn name(&self) -> &'static str {
        "fdb"
    }

    fn blob(&self) -> &'static str {
        "fdb"
    }

    async fn learn(&self, device: &dyn DeviceClient) -> Result<u64, DeviceError> {
        let raw = device.query(Feature::Fdb).await?;
        Ok(count_mac_addresses(&raw))
    }

    fn is_vacant(&self, snapshot: &u64) -> bool {
        *snapshot == 0
    }

    fn compare(&self, original: &u64, current: &u64) -> CountDelta {
        CountDelta::new("MAC addresses", *original, *current, self.threshold)
    }
}
