//! Feature monitors.
//!
//! Every monitor follows the same lifecycle: capture a baseline once, then
//! capture the current state each cycle and keep the resulting delta for
//! reporting. [`FeatureMonitor`] implements that lifecycle once; the
//! feature-specific parts (how to learn, what counts as empty, how to
//! compare) live in a [`Probe`].

mod arp;
mod delta;
mod detail;
mod fabricpath;
mod fdb;
mod features;
mod hsrp;
mod interface;
mod ospf;
mod routing;
mod vlan;

use std::time::Instant;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::{MonitorConfig, Thresholds};
use crate::device::{DeviceClient, DeviceError};
use crate::store::{SnapshotStore, StoreError};

pub use arp::ArpProbe;
pub use delta::{CountDelta, ListDelta, StateDelta};
pub use detail::{DetailDelta, DetailProbe, DetailSnapshot, VOLATILE_FIELDS};
pub use fabricpath::FabricpathProbe;
pub use fdb::FdbProbe;
pub use features::FeaturesProbe;
pub use hsrp::HsrpProbe;
pub use interface::InterfaceProbe;
pub use ospf::{correlate_neighbors, LinkKind, NeighborChange, NeighborChangeKind, OspfDelta, OspfNeighbor, OspfProbe};
pub use routing::RoutingProbe;
pub use vlan::VlanProbe;

/// Names of the regular monitors, in registration order.
pub const MONITOR_NAMES: [&str; 9] = [
    "interface",
    "fabricpath",
    "vlan",
    "fdb",
    "arp",
    "routing",
    "ospf",
    "features",
    "hsrp",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorState {
    Unlearned,
    BaselineCaptured,
    /// Terminal: the device does not offer this feature.
    Unsupported,
    Evaluated,
}

#[derive(Debug, Error)]
pub enum MonitorError {
    #[error("{monitor}: connection lost: {source}")]
    Transport {
        monitor: &'static str,
        #[source]
        source: DeviceError,
    },
    #[error("{monitor}: {source}")]
    Store {
        monitor: &'static str,
        #[source]
        source: StoreError,
    },
    #[error("{monitor}: current state requested before a baseline was captured")]
    NotReady { monitor: &'static str },
}

impl MonitorError {
    pub fn is_transport(&self) -> bool {
        matches!(self, MonitorError::Transport { .. })
    }
}

/// Where a baseline comes from and where it goes.
pub struct BaselineContext<'a> {
    pub device: &'a dyn DeviceClient,
    /// Previously saved baselines to load instead of learning.
    pub import: Option<&'a dyn SnapshotStore>,
    /// Destination for freshly learned baselines.
    pub export: &'a dyn SnapshotStore,
}

#[async_trait]
pub trait Monitor: Send {
    fn name(&self) -> &'static str;
    fn state(&self) -> MonitorState;
    async fn capture_baseline(&mut self, ctx: &BaselineContext<'_>) -> Result<(), MonitorError>;
    async fn capture_current(&mut self, device: &dyn DeviceClient) -> Result<(), MonitorError>;
    /// Drops the latest delta, e.g. after an interrupted cycle.
    fn discard_current(&mut self);
    fn is_changed(&self) -> bool;
    fn describe(&self) -> String;
}

pub trait Delta: Send + Sync {
    fn is_significant(&self) -> bool;
    fn describe(&self) -> String;
}

#[async_trait]
pub trait Probe: Send + Sync + 'static {
    type Snapshot: Serialize + DeserializeOwned + Send + Sync;
    type Delta: Delta;

    fn name(&self) -> &'static str;
    /// Name the baseline is persisted under.
    fn blob(&self) -> &'static str;
    async fn learn(&self, device: &dyn DeviceClient) -> Result<Self::Snapshot, DeviceError>;
    /// A baseline with nothing to watch, which marks the monitor unsupported.
    fn is_vacant(&self, snapshot: &Self::Snapshot) -> bool;
    fn compare(&self, original: &Self::Snapshot, current: &Self::Snapshot) -> Self::Delta;

    /// Learn live when an import store lacks this blob instead of giving up.
    fn learn_when_import_missing(&self) -> bool {
        false
    }
}

pub struct FeatureMonitor<P: Probe> {
    probe: P,
    state: MonitorState,
    baseline: Option<P::Snapshot>,
    delta: Option<P::Delta>,
}

impl<P: Probe> FeatureMonitor<P> {
    pub fn new(probe: P) -> Self {
        Self {
            probe,
            state: MonitorState::Unlearned,
            baseline: None,
            delta: None,
        }
    }

    pub fn boxed(probe: P) -> Box<dyn Monitor> {
        Box::new(Self::new(probe))
    }

    pub fn baseline(&self) -> Option<&P::Snapshot> {
        self.baseline.as_ref()
    }

    pub fn delta(&self) -> Option<&P::Delta> {
        self.delta.as_ref()
    }

    fn mark_unsupported(&mut self, reason: &str) {
        warn!(monitor = self.probe.name(), reason = %reason, "feature unsupported, monitor disabled");
        self.state = MonitorState::Unsupported;
        self.baseline = None;
        self.delta = None;
    }

    fn classify(&self, err: DeviceError) -> Result<String, MonitorError> {
        if err.is_transport() {
            Err(MonitorError::Transport {
                monitor: self.probe.name(),
                source: err,
            })
        } else {
            Ok(err.to_string())
        }
    }

    fn import(&self, store: &dyn SnapshotStore) -> Result<P::Snapshot, String> {
        let value = store
            .load(self.probe.blob())
            .map_err(|err| err.to_string())?
            .ok_or_else(|| format!("no saved baseline named `{}`", self.probe.blob()))?;
        serde_json::from_value(value).map_err(|err| format!("saved baseline `{}` is unreadable: {err}", self.probe.blob()))
    }
}

#[async_trait]
impl<P: Probe> Monitor for FeatureMonitor<P> {
    fn name(&self) -> &'static str {
        self.probe.name()
    }

    fn state(&self) -> MonitorState {
        self.state
    }

    async fn capture_baseline(&mut self, ctx: &BaselineContext<'_>) -> Result<(), MonitorError> {
        let name = self.probe.name();
        let started = Instant::now();

        let imported = match ctx.import {
            Some(store) => match self.import(store) {
                Ok(snapshot) => Some(snapshot),
                Err(reason) if !self.probe.learn_when_import_missing() => {
                    self.mark_unsupported(&reason);
                    return Ok(());
                }
                Err(reason) => {
                    info!(monitor = name, reason = %reason, "learning baseline live");
                    None
                }
            },
            None => None,
        };

        let snapshot = match imported {
            Some(snapshot) => snapshot,
            None => {
                let snapshot = match self.probe.learn(ctx.device).await {
                    Ok(snapshot) => snapshot,
                    Err(err) => {
                        let reason = self.classify(err)?;
                        self.mark_unsupported(&reason);
                        return Ok(());
                    }
                };
                let value = serde_json::to_value(&snapshot).map_err(|source| MonitorError::Store {
                    monitor: name,
                    source: StoreError::Encode {
                        name: self.probe.blob().to_string(),
                        source,
                    },
                })?;
                ctx.export
                    .save(self.probe.blob(), &value)
                    .map_err(|source| MonitorError::Store { monitor: name, source })?;
                snapshot
            }
        };

        if self.probe.is_vacant(&snapshot) {
            self.mark_unsupported("baseline is empty");
            return Ok(());
        }

        debug!(monitor = name, elapsed_ms = started.elapsed().as_millis() as u64, "baseline captured");
        self.baseline = Some(snapshot);
        self.delta = None;
        self.state = MonitorState::BaselineCaptured;
        Ok(())
    }

    async fn capture_current(&mut self, device: &dyn DeviceClient) -> Result<(), MonitorError> {
        let name = self.probe.name();
        if self.baseline.is_none() || self.state == MonitorState::Unsupported {
            return Err(MonitorError::NotReady { monitor: name });
        }

        let current = match self.probe.learn(device).await {
            Ok(current) => current,
            Err(err) => {
                let reason = self.classify(err)?;
                self.mark_unsupported(&reason);
                return Ok(());
            }
        };

        let Some(baseline) = self.baseline.as_ref() else {
            return Err(MonitorError::NotReady { monitor: name });
        };
        self.delta = Some(self.probe.compare(baseline, &current));
        self.state = MonitorState::Evaluated;
        Ok(())
    }

    fn discard_current(&mut self) {
        if self.state == MonitorState::Evaluated {
            self.delta = None;
            self.state = MonitorState::BaselineCaptured;
        }
    }

    fn is_changed(&self) -> bool {
        self.state == MonitorState::Evaluated && self.delta.as_ref().is_some_and(|delta| delta.is_significant())
    }

    fn describe(&self) -> String {
        match (&self.delta, self.state) {
            (_, MonitorState::Unsupported) => format!("{} is not supported by this device.\n", self.probe.name()),
            (Some(delta), _) => delta.describe(),
            (None, _) => format!("{} has not been evaluated yet.\n", self.probe.name()),
        }
    }
}

/// The regular monitors enabled by `config`, in registration order.
pub fn standard_monitors(config: &MonitorConfig) -> Vec<Box<dyn Monitor>> {
    MONITOR_NAMES
        .iter()
        .filter(|name| config.is_enabled(name))
        .filter_map(|name| build_monitor(name, config.thresholds))
        .collect()
}

fn build_monitor(name: &str, thresholds: Thresholds) -> Option<Box<dyn Monitor>> {
    let monitor = match name {
        "interface" => FeatureMonitor::boxed(InterfaceProbe),
        "fabricpath" => FeatureMonitor::boxed(FabricpathProbe),
        "vlan" => FeatureMonitor::boxed(VlanProbe),
        "fdb" => FeatureMonitor::boxed(FdbProbe::new(thresholds.mac_percent)),
        "arp" => FeatureMonitor::boxed(ArpProbe::new(thresholds.arp_percent)),
        "routing" => FeatureMonitor::boxed(RoutingProbe::new(thresholds.routes_percent)),
        "ospf" => FeatureMonitor::boxed(OspfProbe),
        "features" => FeatureMonitor::boxed(FeaturesProbe),
        "hsrp" => FeatureMonitor::boxed(HsrpProbe),
        _ => return None,
    };
    Some(monitor)
}

pub fn detail_monitor() -> Box<dyn Monitor> {
    FeatureMonitor::boxed(DetailProbe)
}
