use async_trait::async_trait;
use serde_json::Value;

use crate::device::{DeviceClient, DeviceError, Feature};
use crate::monitor::delta::CountDelta;
use crate::monitor::Probe;
use crate::snapshot::entry_count;

pub struct RoutingProbe {
    threshold: f64,
}

impl RoutingProbe {
    pub fn new(threshold: f64) -> Self {
        Self { threshold }
    }
}

pub fn count_routes(raw: &Value) -> Result<u64, DeviceError> {
    let vrfs = raw
        .get("vrf")
        .and_then(Value::as_object)
        .ok_or_else(|| DeviceError::Parse("routing output has no `vrf` mapping".to_string()))?;

    Ok(vrfs
        .values()
        .filter_map(|vrf| vrf.get("address_family").and_then(Value::as_object))
        .flat_map(|families| families.values())
        .map(|family| entry_count(family.get("routes")))
        .sum())
}

#[async_trait]
impl Probe for RoutingProbe {
    type Snapshot = u64;
    type Delta = CountDelta;

    fn name(&self) -> &'static str {
        "routing"
    }

    fn blob(&self) -> &'static str {
        "routing"
    }

    async fn learn(&self, device: &dyn DeviceClient) -> Result<u64, DeviceError> {
        let raw = device.query(Feature::Routing).await?;
        count_routes(&raw)
    }

    fn is_vacant(&self, snapshot: &u64) -> bool {
        *snapshot == 0
    }

    fn compare(&self, original: &u64, current: &u64) -> CountDelta {
        CountDelta::new("routes", *original, *current, self.threshold)
    }
}
