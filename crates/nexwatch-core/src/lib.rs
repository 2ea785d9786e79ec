pub mod config;
pub mod control;
pub mod device;
pub mod diff;
pub mod monitor;
pub mod orchestrator;
pub mod report;
pub mod snapshot;
pub mod store;

#[cfg(test)]
mod control_tests;
#[cfg(test)]
pub(crate) mod testing;

pub use config::{ConfigError, ConfigFile, MonitorConfig, Thresholds};
pub use control::{ControlLoop, LoopError, Operator, Phase, RunSummary, StopReason};
pub use device::{DeviceClient, DeviceError, DeviceInfo, Feature, FixtureDriver, HelperDriver};
pub use diff::{compare, DiffResult, FieldChange};
pub use monitor::{Monitor, MonitorError, MonitorState, MONITOR_NAMES};
pub use orchestrator::{Orchestrator, OrchestratorError};
pub use report::{CycleReport, DetailReport, ReportLog, ReportLogError};
pub use store::{DirStore, SnapshotStore, StoreError};
