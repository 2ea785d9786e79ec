use std::collections::BTreeMap;
use std::fmt::Write as _;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::device::{DeviceClient, DeviceError, Feature};
use crate::diff::compare;
use crate::monitor::{Delta, Probe};
use crate::snapshot::{Record, Table};

const FULL: &str = "full";
const NOT_FOUND: &str = "Not found in OSPF neighbor table";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkKind {
    Interface,
    VirtualLink,
    ShamLink,
}

impl LinkKind {
    const ALL: [LinkKind; 3] = [LinkKind::VirtualLink, LinkKind::ShamLink, LinkKind::Interface];

    /// Key of this link kind under an OSPF area.
    fn area_key(self) -> &'static str {
        match self {
            LinkKind::Interface => "interfaces",
            LinkKind::VirtualLink => "virtual_links",
            LinkKind::ShamLink => "sham_links",
        }
    }

    fn label(self) -> &'static str {
        match self {
            LinkKind::Interface => "interface",
            LinkKind::VirtualLink => "virtual_link",
            LinkKind::ShamLink => "sham_link",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OspfNeighbor {
    pub vrf: String,
    pub instance: String,
    pub area: String,
    pub link: LinkKind,
    pub link_id: String,
    pub neighbor_router_id: String,
    pub address: Option<String>,
    pub state: String,
}

impl OspfNeighbor {
    /// The adjacency's identity, independent of its state.
    pub fn identity(&self) -> String {
        format!(
            "{}|{}|{}|{}|{}|{}",
            self.vrf,
            self.instance,
            self.area,
            self.link.label(),
            self.link_id,
            self.neighbor_router_id
        )
    }

    fn state_record(&self) -> Record {
        let mut record = Record::new();
        record.insert("state".to_string(), json!(self.state));
        record
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NeighborChangeKind {
    /// Same identity, state no longer `full`.
    Changed,
    NotFound,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NeighborChange {
    pub kind: NeighborChangeKind,
    /// The current record, or the baseline record with the not-found sentinel as state.
    pub neighbor: OspfNeighbor,
}

/// Matches baseline `full` adjacencies against the current table by identity.
pub fn correlate_neighbors(original: &[OspfNeighbor], current: &[OspfNeighbor]) -> (Vec<NeighborChange>, f64) {
    let tracked: Vec<&OspfNeighbor> = original.iter().filter(|n| n.state == FULL).collect();
    let tracked_table: Table = tracked.iter().map(|n| (n.identity(), n.state_record())).collect();
    let current_by_id: BTreeMap<String, &OspfNeighbor> = current.iter().map(|n| (n.identity(), n)).collect();
    let current_table: Table = current_by_id
        .iter()
        .map(|(id, n)| (id.clone(), n.state_record()))
        .collect();

    let diff = compare(&tracked_table, &current_table, &["state"]);

    let mut changes = Vec::new();
    for neighbor in tracked {
        let id = neighbor.identity();
        if diff.missing.contains_key(&id) {
            changes.push(NeighborChange {
                kind: NeighborChangeKind::NotFound,
                neighbor: OspfNeighbor {
                    state: NOT_FOUND.to_string(),
                    ..neighbor.clone()
                },
            });
        } else if diff.changed.contains_key(&id) {
            if let Some(now) = current_by_id.get(&id) {
                changes.push(NeighborChange {
                    kind: NeighborChangeKind::Changed,
                    neighbor: (*now).clone(),
                });
            }
        }
    }
    (changes, diff.percentage)
}

fn text(value: Option<&Value>) -> Option<String> {
    value.and_then(Value::as_str).map(str::to_string)
}

/// Flattens the OSPF tree into one record per neighbor.
pub fn ospf_neighbors(raw: &Value) -> Result<Vec<OspfNeighbor>, DeviceError> {
    if raw.get("feature_ospf").and_then(Value::as_bool) != Some(true) {
        return Ok(Vec::new());
    }
    let Some(vrfs) = raw.get("vrf").and_then(Value::as_object) else {
        return Ok(Vec::new());
    };

    let mut neighbors = Vec::new();
    for (vrf, vrf_body) in vrfs {
        let Some(instances) = vrf_body.pointer("/address_family/ipv4/instance").and_then(Value::as_object) else {
            continue;
        };
        for (instance, instance_body) in instances {
            let Some(areas) = instance_body.get("areas").and_then(Value::as_object) else {
                continue;
            };
            for (area, area_body) in areas {
                for link in LinkKind::ALL {
                    let Some(links) = area_body.get(link.area_key()).and_then(Value::as_object) else {
                        continue;
                    };
                    for (link_id, link_body) in links {
                        let Some(entries) = link_body.get("neighbors").and_then(Value::as_object) else {
                            continue;
                        };
                        for (neighbor_key, entry) in entries {
                            let missing = |field: &str| {
                                DeviceError::Parse(format!(
                                    "ospf neighbor {neighbor_key} on {link_id} has no `{field}`"
                                ))
                            };
                            neighbors.push(OspfNeighbor {
                                vrf: vrf.clone(),
                                instance: instance.clone(),
                                area: area.clone(),
                                link,
                                link_id: link_id.clone(),
                                neighbor_router_id: text(entry.get("neighbor_router_id"))
                                    .ok_or_else(|| missing("neighbor_router_id"))?,
                                address: text(entry.get("address")),
                                state: text(entry.get("state")).ok_or_else(|| missing("state"))?,
                            });
                        }
                    }
                }
            }
        }
    }
    Ok(neighbors)
}

pub struct OspfProbe;

#[derive(Debug, Clone, PartialEq)]
pub struct OspfDelta {
    pub changes: Vec<NeighborChange>,
    pub percentage: f64,
}

impl Delta for OspfDelta {
    fn is_significant(&self) -> bool {
        !self.changes.is_empty()
    }

    fn describe(&self) -> String {
        let mut out = format!(
            "There are {} ({:.2}%) OSPF neighbors' state changed.\nList of the OSPF neighbors' state changed:\n",
            self.changes.len(),
            self.percentage
        );
        if self.changes.is_empty() {
            out.push_str("   None\n");
        }
        for change in &self.changes {
            let n = &change.neighbor;
            let _ = writeln!(out, "   vrf: {}", n.vrf);
            let _ = writeln!(out, "   ospf_instance: {}", n.instance);
            let _ = writeln!(out, "   area: {}", n.area);
            let _ = writeln!(out, "   {}: {}", n.link.label(), n.link_id);
            let _ = writeln!(out, "   neighbor_router_id: {}", n.neighbor_router_id);
            if let Some(address) = &n.address {
                let _ = writeln!(out, "   neighbor_interface_address: {address}");
            }
            let _ = writeln!(out, "   state: {}\n", n.state);
        }
        out
    }
}

#[async_trait]
impl Probe for OspfProbe {
    type Snapshot = Vec<OspfNeighbor>;
    type Delta = OspfDelta;

    fn name(&self) -> &'static str {
        "ospf"
    }

    fn blob(&self) -> &'static str {
        "ospf_neighbors_list"
    }

    async fn learn(&self, device: &dyn DeviceClient) -> Result<Vec<OspfNeighbor>, DeviceError> {
        let raw = device.query(Feature::Ospf).await?;
        ospf_neighbors(&raw)
    }

    fn is_vacant(&self, snapshot: &Vec<OspfNeighbor>) -> bool {
        !snapshot.iter().any(|neighbor| neighbor.state == FULL)
    }

    fn compare(&self, original: &Vec<OspfNeighbor>, current: &Vec<OspfNeighbor>) -> OspfDelta {
        let (changes, percentage) = correlate_neighbors(original, current);
        OspfDelta { changes, percentage }
    }
}
