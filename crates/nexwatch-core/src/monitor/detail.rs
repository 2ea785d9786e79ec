use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Write as _;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

use crate::device::{DeviceClient, DeviceError};
use crate::diff::{compare_trees, TreeChange};
use crate::monitor::{Delta, Probe};

/// Keys that move on their own on a healthy device. `show users` is a whole
/// command whose output is never compared.
pub const VOLATILE_FIELDS: &[&str] = &[
    "idle_percent",
    "kernel_percent",
    "user_percent",
    "bpdu_sent",
    "time_since_topology_change",
    "show users",
    "current_temp_celsius",
    "fwd_id",
    "table_id",
    "vrf_id",
    "counters",
];

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DetailSnapshot {
    pub outputs: BTreeMap<String, Value>,
    pub exclude: BTreeSet<String>,
}

impl DetailSnapshot {
    fn as_tree(&self) -> Value {
        let map: Map<String, Value> = self.outputs.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
        Value::Object(map)
    }
}

pub struct DetailProbe;

#[derive(Debug, Clone, PartialEq)]
pub struct DetailDelta {
    pub changes: Vec<TreeChange>,
}

impl Delta for DetailDelta {
    fn is_significant(&self) -> bool {
        !self.changes.is_empty()
    }

    fn describe(&self) -> String {
        let mut out = format!("There are {} detailed changes:\n", self.changes.len());
        for change in &self.changes {
            let _ = writeln!(out, "   {}", change.render());
        }
        out
    }
}

#[async_trait]
impl Probe for DetailProbe {
    type Snapshot = DetailSnapshot;
    type Delta = DetailDelta;

    fn name(&self) -> &'static str {
        "all_detail"
    }

    fn blob(&self) -> &'static str {
        "all_detail_original"
    }

    async fn learn(&self, device: &dyn DeviceClient) -> Result<DetailSnapshot, DeviceError> {
        let mut outputs = device.parse_all().await?;
        outputs.retain(|command, output| {
            let errored = output.get("errored").is_some();
            if errored {
                debug!(command = %command, "skipping command the parser could not handle");
            }
            !errored
        });

        let mut exclude: BTreeSet<String> = VOLATILE_FIELDS.iter().map(|field| field.to_string()).collect();
        for command in outputs.keys() {
            match device.parser_exclude(command).await {
                Ok(fields) => exclude.extend(fields),
                Err(err) if err.is_transport() => return Err(err),
                Err(err) => debug!(command = %command, error = %err, "no exclude list"),
            }
        }
        Ok(DetailSnapshot { outputs, exclude })
    }

    fn is_vacant(&self, snapshot: &DetailSnapshot) -> bool {
        snapshot.outputs.is_empty()
    }

    fn compare(&self, original: &DetailSnapshot, current: &DetailSnapshot) -> DetailDelta {
        let exclude: BTreeSet<String> = original.exclude.union(&current.exclude).cloned().collect();
        DetailDelta {
            changes: compare_trees(&original.as_tree(), &current.as_tree(), &exclude),
        }
    }

    fn learn_when_import_missing(&self) -> bool {
        true
    }
}
