//! Top-level scheduling: connect, learn the baseline once, then keep
//! sampling until the operator stops the run.

use std::future::Future;
use std::time::Instant;

use async_trait::async_trait;
use chrono::Local;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::config::MonitorConfig;
use crate::device::{DeviceClient, DeviceError};
use crate::monitor::BaselineContext;
use crate::orchestrator::{Orchestrator, OrchestratorError};
use crate::report::{CycleReport, DetailReport, ReportLog, ReportLogError, COMMON_REPORT_FILE, DETAIL_REPORT_FILE};
use crate::store::{DirStore, SnapshotStore, StoreError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Connecting,
    LearningBaseline,
    Monitoring,
    Paused,
    Terminated(StopReason),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    CycleLimit,
    OperatorExit,
    /// Interrupted before a baseline existed.
    Interrupted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunSummary {
    pub cycles: u64,
    pub stop: StopReason,
}

#[derive(Debug, Error)]
pub enum LoopError {
    #[error("cannot connect to the device: {0}")]
    Connect(#[source] DeviceError),
    #[error("connection lost before the baseline was learned: {0}")]
    BaselineLost(#[source] OrchestratorError),
    #[error(transparent)]
    Orchestrator(OrchestratorError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Report(#[from] ReportLogError),
}

#[async_trait]
pub trait Operator: Send {
    fn present(&mut self, text: &str);
    async fn confirm_exit(&mut self) -> bool;
    /// Whether to flip detailed mode, given its current value.
    async fn confirm_detail_toggle(&mut self, detailed: bool) -> bool;
}

enum CycleFailure {
    /// Reconnect or query failed at the transport level; retried after a delay.
    Transport(String),
    Fatal(OrchestratorError),
}

impl From<OrchestratorError> for CycleFailure {
    fn from(err: OrchestratorError) -> Self {
        if err.is_transport() {
            CycleFailure::Transport(err.to_string())
        } else {
            CycleFailure::Fatal(err)
        }
    }
}

struct ReportLogs {
    common: ReportLog,
    detail: ReportLog,
}

pub struct ControlLoop<D: DeviceClient, O: Operator> {
    device: D,
    operator: O,
    orchestrator: Orchestrator,
    config: MonitorConfig,
    interrupts: mpsc::Receiver<()>,
    detailed: bool,
    host: String,
    cycles: u64,
}

impl<D: DeviceClient, O: Operator> ControlLoop<D, O> {
    /// Each message on `interrupts` pauses monitoring, or ends the run
    /// while no baseline exists yet.
    pub fn new(
        device: D,
        operator: O,
        orchestrator: Orchestrator,
        config: MonitorConfig,
        interrupts: mpsc::Receiver<()>,
    ) -> Self {
        let detailed = config.detailed;
        Self {
            device,
            operator,
            orchestrator,
            config,
            interrupts,
            detailed,
            host: String::new(),
            cycles: 0,
        }
    }

    pub fn orchestrator(&self) -> &Orchestrator {
        &self.orchestrator
    }

    pub fn detailed(&self) -> bool {
        self.detailed
    }

    pub async fn run(&mut self) -> Result<RunSummary, LoopError> {
        let logs = ReportLogs {
            common: ReportLog::create(self.config.output_dir.join(COMMON_REPORT_FILE))?,
            detail: ReportLog::create(self.config.output_dir.join(DETAIL_REPORT_FILE))?,
        };

        let mut phase = Phase::Connecting;
        loop {
            debug!(?phase, "entering phase");
            phase = match phase {
                Phase::Connecting => self.connect().await?,
                Phase::LearningBaseline => self.learn_baseline().await?,
                Phase::Monitoring => self.monitor(&logs).await?,
                Phase::Paused => self.pause().await,
                Phase::Terminated(stop) => {
                    info!(cycles = self.cycles, ?stop, "monitoring stopped");
                    return Ok(RunSummary {
                        cycles: self.cycles,
                        stop,
                    });
                }
            };
        }
    }

    async fn connect(&mut self) -> Result<Phase, LoopError> {
        match until_interrupted(&mut self.interrupts, self.device.connect()).await {
            None => Ok(Phase::Terminated(StopReason::Interrupted)),
            Some(Ok(info)) => {
                info!(host = %info.hostname, address = %info.address, platform = %info.platform, "connected");
                self.host = info.hostname;
                Ok(Phase::LearningBaseline)
            }
            Some(Err(err)) => Err(LoopError::Connect(err)),
        }
    }

    /// The import store, if one is configured and present, and the store
    /// live-learned baselines are written to.
    fn baseline_stores(&self) -> Result<(Option<DirStore>, DirStore), StoreError> {
        if let Some(dir) = &self.config.baseline_dir {
            if dir.is_dir() {
                info!(dir = %dir.display(), "importing baseline");
                let store = DirStore::open(dir);
                return Ok((Some(store.clone()), store));
            }
            warn!(dir = %dir.display(), "baseline directory not found, learning live");
        }
        let export = DirStore::create_baseline_dir(&self.config.output_dir, &self.host, Local::now())?;
        info!(dir = %export.dir().display(), "saving baseline");
        Ok((None, export))
    }

    async fn learn_baseline(&mut self) -> Result<Phase, LoopError> {
        let (import, export) = self.baseline_stores()?;
        let ctx = BaselineContext {
            device: &self.device,
            import: import.as_ref().map(|store| store as &dyn SnapshotStore),
            export: &export,
        };

        info!(host = %self.host, "learning baseline");
        let started = Instant::now();
        match until_interrupted(&mut self.interrupts, self.orchestrator.capture_baseline(&ctx)).await {
            None => {
                warn!("interrupted before the baseline was learned");
                Ok(Phase::Terminated(StopReason::Interrupted))
            }
            Some(Ok(())) => {
                info!(
                    elapsed_secs = started.elapsed().as_secs_f64(),
                    active = ?self.orchestrator.active(),
                    unsupported = ?self.orchestrator.unsupported(),
                    "baseline ready"
                );
                if self.config.max_cycles == Some(0) {
                    return Ok(Phase::Terminated(StopReason::CycleLimit));
                }
                Ok(Phase::Monitoring)
            }
            Some(Err(err)) if err.is_transport() => Err(LoopError::BaselineLost(err)),
            Some(Err(err)) => Err(self.fatal(err)),
        }
    }

    fn fatal(&mut self, err: OrchestratorError) -> LoopError {
        if matches!(err, OrchestratorError::AllUnsupported) {
            self.operator
                .present(&format!("The {} device does not support any monitoring category.", self.host));
        }
        LoopError::Orchestrator(err)
    }

    async fn monitor(&mut self, logs: &ReportLogs) -> Result<Phase, LoopError> {
        if self.config.max_cycles.is_some_and(|max| self.cycles >= max) {
            return Ok(Phase::Terminated(StopReason::CycleLimit));
        }

        let cycle = common_cycle(&self.device, &mut self.orchestrator, &self.host);
        let report = match until_interrupted(&mut self.interrupts, cycle).await {
            None => {
                self.orchestrator.discard_current();
                return Ok(Phase::Paused);
            }
            Some(Ok(report)) => report,
            Some(Err(CycleFailure::Fatal(err))) => return Err(self.fatal(err)),
            Some(Err(CycleFailure::Transport(reason))) => return Ok(self.back_off(&reason).await),
        };

        let text = report.render();
        self.operator.present(&text);
        logs.common.prepend(&text)?;

        if self.detailed {
            let detail = self.orchestrator.capture_detail(&self.device);
            match until_interrupted(&mut self.interrupts, detail).await {
                None => {
                    self.orchestrator.discard_current();
                    self.cycles += 1;
                    return Ok(Phase::Paused);
                }
                Some(Ok(Some(detail))) => self.emit_detail(&detail, logs)?,
                Some(Ok(None)) => self.operator.present("Full-detail comparison is not available on this device."),
                Some(Err(err)) if err.is_transport() => {
                    self.cycles += 1;
                    return Ok(self.back_off(&err.to_string()).await);
                }
                Some(Err(err)) => return Err(self.fatal(err)),
            }
        }

        self.cycles += 1;
        Ok(Phase::Monitoring)
    }

    fn emit_detail(&mut self, detail: &DetailReport, logs: &ReportLogs) -> Result<(), ReportLogError> {
        let text = detail.render();
        logs.detail.prepend(&text)?;
        self.operator.present(&format!(
            "Full-detail differences written to {}.",
            logs.detail.path().display()
        ));
        Ok(())
    }

    /// Waits out the reconnect delay. An interrupt cuts the wait short and pauses.
    async fn back_off(&mut self, reason: &str) -> Phase {
        let delay = self.config.reconnect_delay;
        warn!(reason = %reason, retry_in_secs = delay.as_secs(), "connection lost, retrying cycle");
        self.operator.present(&format!(
            "The connection is lost. The device may be reloading. Retrying in {} seconds.",
            delay.as_secs()
        ));
        self.orchestrator.discard_current();
        match until_interrupted(&mut self.interrupts, sleep(delay)).await {
            None => Phase::Paused,
            Some(()) => Phase::Monitoring,
        }
    }

    async fn pause(&mut self) -> Phase {
        self.operator.present("You have paused the program.");
        if self.operator.confirm_exit().await {
            self.operator.present("The program has exited.");
            return Phase::Terminated(StopReason::OperatorExit);
        }
        if self.operator.confirm_detail_toggle(self.detailed).await {
            self.detailed = !self.detailed;
            info!(detailed = self.detailed, "detailed mode toggled");
        }
        while self.interrupts.try_recv().is_ok() {}

        if let Err(err) = self.device.disconnect().await {
            debug!(error = %err, "disconnect after pause failed");
        }
        Phase::Monitoring
    }
}

async fn common_cycle(
    device: &dyn DeviceClient,
    orchestrator: &mut Orchestrator,
    host: &str,
) -> Result<CycleReport, CycleFailure> {
    if !device.is_connected().await {
        info!(host = %host, "reconnecting");
        device
            .connect()
            .await
            .map_err(|err| CycleFailure::Transport(err.to_string()))?;
    }
    Ok(orchestrator.capture_current_and_report(device, host).await?)
}

/// Completes when an interrupt arrives. A closed channel never interrupts.
async fn interrupted(interrupts: &mut mpsc::Receiver<()>) {
    if interrupts.recv().await.is_none() {
        std::future::pending::<()>().await;
    }
}

/// Runs `work` unless an interrupt arrives while it is pending, in which case
/// `work` is dropped. Finished work always wins over a queued interrupt.
async fn until_interrupted<F: Future>(interrupts: &mut mpsc::Receiver<()>, work: F) -> Option<F::Output> {
    tokio::select! {
        biased;
        output = work => Some(output),
        _ = interrupted(interrupts) => None,
    }
}
