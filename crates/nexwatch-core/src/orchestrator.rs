use std::time::Instant;

use chrono::Local;
use futures::stream::{self, StreamExt};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::MonitorConfig;
use crate::device::DeviceClient;
use crate::monitor::{detail_monitor, standard_monitors, BaselineContext, Monitor, MonitorError, MonitorState};
use crate::report::{CycleReport, DetailReport, ReportSection};

#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error(transparent)]
    Monitor(#[from] MonitorError),
    #[error("the device supports none of the enabled monitors")]
    AllUnsupported,
}

impl OrchestratorError {
    pub fn is_transport(&self) -> bool {
        matches!(self, OrchestratorError::Monitor(err) if err.is_transport())
    }
}

/// Owns the active monitors and drives their phases.
///
/// Monitors are fanned out on the calling task with at most `parallelism`
/// captures in flight. Dropping a phase future abandons the remaining device
/// queries without giving up ownership of any monitor.
pub struct Orchestrator {
    monitors: Vec<Box<dyn Monitor>>,
    unsupported: Vec<&'static str>,
    detail: Option<Box<dyn Monitor>>,
    parallelism: usize,
}

impl Orchestrator {
    pub fn new(monitors: Vec<Box<dyn Monitor>>, parallelism: usize) -> Self {
        Self {
            monitors,
            unsupported: Vec::new(),
            detail: None,
            parallelism: parallelism.max(1),
        }
    }

    pub fn with_detail(mut self, detail: Box<dyn Monitor>) -> Self {
        self.detail = Some(detail);
        self
    }

    /// The enabled regular monitors plus the full-detail monitor.
    pub fn from_config(config: &MonitorConfig) -> Self {
        Self::new(standard_monitors(config), config.parallelism).with_detail(detail_monitor())
    }

    pub fn active(&self) -> Vec<&'static str> {
        self.monitors.iter().map(|monitor| monitor.name()).collect()
    }

    pub fn unsupported(&self) -> &[&'static str] {
        &self.unsupported
    }

    pub fn has_detail(&self) -> bool {
        self.detail
            .as_ref()
            .is_some_and(|detail| detail.state() != MonitorState::Unsupported)
    }

    /// Captures every baseline. Only a lost connection or a store failure
    /// fails the phase.
    pub async fn capture_baseline(&mut self, ctx: &BaselineContext<'_>) -> Result<(), OrchestratorError> {
        let started = Instant::now();
        let parallelism = self.parallelism;
        let results: Vec<Result<(), MonitorError>> = stream::iter(self.monitors.iter_mut())
            .map(|monitor| monitor.capture_baseline(ctx))
            .buffer_unordered(parallelism)
            .collect()
            .await;
        first_failure(results)?;
        self.prune();
        info!(
            active = self.monitors.len(),
            unsupported = self.unsupported.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "baseline captured"
        );

        if let Some(detail) = self.detail.as_mut() {
            let started = Instant::now();
            detail.capture_baseline(ctx).await?;
            debug!(elapsed_ms = started.elapsed().as_millis() as u64, "detail baseline captured");
        }

        if self.monitors.is_empty() {
            return Err(OrchestratorError::AllUnsupported);
        }
        Ok(())
    }

    /// Captures the current state of every active monitor.
    ///
    /// On failure every delta of this round is dropped, so nothing partial is
    /// ever reported. Monitors that lost their feature during the round are
    /// excluded either way.
    pub async fn capture_current(&mut self, device: &dyn DeviceClient) -> Result<(), OrchestratorError> {
        let parallelism = self.parallelism;
        let results: Vec<Result<(), MonitorError>> = stream::iter(
            self.monitors
                .iter_mut()
                .filter(|monitor| monitor.state() != MonitorState::Unsupported),
        )
        .map(|monitor| monitor.capture_current(device))
        .buffer_unordered(parallelism)
        .collect()
        .await;
        if let Err(err) = first_failure(results) {
            self.discard_current();
            return Err(err.into());
        }
        self.prune();
        if self.monitors.is_empty() {
            return Err(OrchestratorError::AllUnsupported);
        }
        Ok(())
    }

    /// Report of the latest capture, in registration order.
    pub fn report(&self, host: &str) -> CycleReport {
        let sections = self
            .monitors
            .iter()
            .filter(|monitor| monitor.is_changed())
            .map(|monitor| ReportSection {
                monitor: monitor.name(),
                body: monitor.describe(),
            })
            .collect();
        CycleReport {
            host: host.to_string(),
            taken_at: Local::now(),
            sections,
        }
    }

    pub async fn capture_current_and_report(
        &mut self,
        device: &dyn DeviceClient,
        host: &str,
    ) -> Result<CycleReport, OrchestratorError> {
        self.capture_current(device).await?;
        Ok(self.report(host))
    }

    /// Runs the full-detail comparison. `None` when the device cannot provide it.
    pub async fn capture_detail(&mut self, device: &dyn DeviceClient) -> Result<Option<DetailReport>, OrchestratorError> {
        let Some(detail) = self.detail.as_mut() else {
            return Ok(None);
        };
        if detail.state() == MonitorState::Unsupported {
            return Ok(None);
        }
        if let Err(err) = detail.capture_current(device).await {
            detail.discard_current();
            return Err(err.into());
        }
        if detail.state() == MonitorState::Unsupported {
            return Ok(None);
        }
        let changes = detail.is_changed().then(|| detail.describe());
        Ok(Some(DetailReport {
            taken_at: Local::now(),
            changes,
        }))
    }

    pub fn discard_current(&mut self) {
        for monitor in &mut self.monitors {
            monitor.discard_current();
        }
        if let Some(detail) = self.detail.as_mut() {
            detail.discard_current();
        }
        self.prune();
    }

    fn prune(&mut self) {
        let (active, dropped): (Vec<_>, Vec<_>) = std::mem::take(&mut self.monitors)
            .into_iter()
            .partition(|monitor| monitor.state() != MonitorState::Unsupported);
        for monitor in dropped {
            warn!(monitor = monitor.name(), "monitor excluded from further cycles");
            self.unsupported.push(monitor.name());
        }
        self.monitors = active;
    }
}

/// Transport failures win over any other error of the same round.
fn first_failure(results: Vec<Result<(), MonitorError>>) -> Result<(), MonitorError> {
    let mut failure: Option<MonitorError> = None;
    for err in results.into_iter().filter_map(Result::err) {
        match &failure {
            Some(existing) if existing.is_transport() || !err.is_transport() => {}
            _ => failure = Some(err),
        }
    }
    failure.map_or(Ok(()), Err)
}
