use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, warn};

/// Exit codes understood from the parsing helper.
const EXIT_PARSE_FAILURE: i32 = 2;
const EXIT_UNSUPPORTED: i32 = 3;
const EXIT_DISCONNECTED: i32 = 4;

const DISCONNECTED_MARKER: &str = "DISCONNECTED";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DeviceInfo {
    pub hostname: String,
    pub address: String,
    pub platform: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Feature {
    Interface,
    Vlan,
    Fdb,
    Arp,
    Routing,
    Ospf,
    Features,
    Fabricpath,
    Hsrp,
}

impl Feature {
    pub fn name(self) -> &'static str {
        match self {
            Feature::Interface => "interface",
            Feature::Vlan => "vlan",
            Feature::Fdb => "fdb",
            Feature::Arp => "arp",
            Feature::Routing => "routing",
            Feature::Ospf => "ospf",
            Feature::Features => "features",
            Feature::Fabricpath => "fabricpath",
            Feature::Hsrp => "hsrp",
        }
    }

    pub fn command(self) -> &'static str {
        match self {
            Feature::Interface => "show interface",
            Feature::Vlan => "show vlan",
            Feature::Fdb => "show mac address-table",
            Feature::Arp => "show ip arp detail vrf all",
            Feature::Routing => "show routing vrf all",
            Feature::Ospf => "show ip ospf neighbors detail vrf all",
            Feature::Features => "show feature",
            Feature::Fabricpath => "show fabricpath isis adjacency",
            Feature::Hsrp => "show hsrp all",
        }
    }
}

#[derive(Debug, Error)]
pub enum DeviceError {
    #[error("feature not supported: {0}")]
    Unsupported(String),
    #[error("cannot parse output: {0}")]
    Parse(String),
    #[error("device disconnected: {0}")]
    Disconnected(String),
    #[error("timeout")]
    Timeout,
    #[error("io error: {0}")]
    Io(String),
    #[error("driver error: {0}")]
    Other(String),
}

impl DeviceError {
    /// Connection-level failures; everything else only affects the feature
    /// being queried.
    pub fn is_transport(&self) -> bool {
        matches!(self, DeviceError::Disconnected(_) | DeviceError::Timeout)
    }
}

/// The device transport plus parsing layer.
///
/// Methods take `&self` so several monitors can query the same device at once;
/// implementations keep their connection state behind interior mutability.
#[async_trait]
pub trait DeviceClient: Send + Sync {
    async fn connect(&self) -> Result<DeviceInfo, DeviceError>;
    async fn is_connected(&self) -> bool;
    async fn disconnect(&self) -> Result<(), DeviceError>;
    async fn query(&self, feature: Feature) -> Result<Value, DeviceError>;
    /// Every command the parsing layer supports, keyed by command.
    async fn parse_all(&self) -> Result<BTreeMap<String, Value>, DeviceError>;
    /// Volatile field names the parsing layer says to ignore for `command`.
    async fn parser_exclude(&self, command: &str) -> Result<Vec<String>, DeviceError>;
}

/// Talks to an external parsing helper, one process per request.
///
/// The helper receives `--host <host> <verb> [arg]` after any configured
/// arguments and prints JSON on stdout.
pub struct HelperDriver {
    program: PathBuf,
    args: Vec<String>,
    host: String,
    query_timeout: Duration,
    connected: AtomicBool,
}

impl HelperDriver {
    pub fn new(program: impl Into<PathBuf>, args: Vec<String>, host: impl Into<String>, query_timeout: Duration) -> Self {
        Self {
            program: program.into(),
            args,
            host: host.into(),
            query_timeout,
            connected: AtomicBool::new(false),
        }
    }

    async fn invoke(&self, verb: &str, arg: Option<&str>) -> Result<Value, DeviceError> {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .arg("--host")
            .arg(&self.host)
            .arg(verb)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(arg) = arg {
            cmd.arg(arg);
        }

        debug!(verb, arg = arg.unwrap_or_default(), "invoking parsing helper");
        let output = timeout(self.query_timeout, cmd.output())
            .await
            .map_err(|_| DeviceError::Timeout)?
            .map_err(|err| DeviceError::Io(format!("failed to run {}: {err}", self.program.display())))?;

        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        match output.status.code() {
            Some(0) => serde_json::from_slice(&output.stdout)
                .map_err(|err| DeviceError::Parse(format!("helper returned invalid JSON for {verb}: {err}"))),
            Some(EXIT_PARSE_FAILURE) => Err(DeviceError::Parse(stderr)),
            Some(EXIT_UNSUPPORTED) => Err(DeviceError::Unsupported(stderr)),
            Some(EXIT_DISCONNECTED) => {
                self.connected.store(false, Ordering::SeqCst);
                Err(DeviceError::Disconnected(stderr))
            }
            Some(code) => Err(DeviceError::Other(format!("helper exited with {code}: {stderr}"))),
            None => Err(DeviceError::Other("helper terminated by signal".to_string())),
        }
    }
}

#[async_trait]
impl DeviceClient for HelperDriver {
    async fn connect(&self) -> Result<DeviceInfo, DeviceError> {
        let value = self.invoke("connect", None).await?;
        let info: DeviceInfo = serde_json::from_value(value)
            .map_err(|err| DeviceError::Parse(format!("bad connect response: {err}")))?;
        self.connected.store(true, Ordering::SeqCst);
        Ok(info)
    }

    async fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn disconnect(&self) -> Result<(), DeviceError> {
        if self.connected.swap(false, Ordering::SeqCst) {
            warn!(host = %self.host, "disconnecting helper session");
            self.invoke("disconnect", None).await?;
        }
        Ok(())
    }

    async fn query(&self, feature: Feature) -> Result<Value, DeviceError> {
        self.invoke("query", Some(feature.name())).await
    }

    async fn parse_all(&self) -> Result<BTreeMap<String, Value>, DeviceError> {
        let value = self.invoke("parse-all", None).await?;
        serde_json::from_value(value).map_err(|err| DeviceError::Parse(format!("bad parse-all response: {err}")))
    }

    async fn parser_exclude(&self, command: &str) -> Result<Vec<String>, DeviceError> {
        let value = self.invoke("exclude", Some(command)).await?;
        serde_json::from_value(value).map_err(|err| DeviceError::Parse(format!("bad exclude response: {err}")))
    }
}

/// Replays structured output saved on disk.
///
/// Files are re-read on every call, so editing them while a run is in
/// progress shows up as drift on the next cycle.
pub struct FixtureDriver {
    dir: PathBuf,
    connected: AtomicBool,
}

impl FixtureDriver {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            connected: AtomicBool::new(false),
        }
    }

    fn ensure_reachable(&self) -> Result<(), DeviceError> {
        if self.dir.join(DISCONNECTED_MARKER).exists() {
            self.connected.store(false, Ordering::SeqCst);
            return Err(DeviceError::Disconnected(format!(
                "{} marker present in {}",
                DISCONNECTED_MARKER,
                self.dir.display()
            )));
        }
        Ok(())
    }

    async fn read_json(&self, path: &Path) -> Result<Option<Value>, DeviceError> {
        self.ensure_reachable()?;
        match tokio::fs::read(path).await {
            Ok(bytes) => serde_json::from_slice(&bytes)
                .map(Some)
                .map_err(|err| DeviceError::Parse(format!("{}: {err}", path.display()))),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(DeviceError::Io(format!("{}: {err}", path.display()))),
        }
    }
}

#[async_trait]
impl DeviceClient for FixtureDriver {
    async fn connect(&self) -> Result<DeviceInfo, DeviceError> {
        self.ensure_reachable()?;
        if !self.dir.is_dir() {
            return Err(DeviceError::Disconnected(format!(
                "fixture directory {} not found",
                self.dir.display()
            )));
        }

        let info = match self.read_json(&self.dir.join("device.json")).await? {
            Some(value) => serde_json::from_value(value)
                .map_err(|err| DeviceError::Parse(format!("device.json: {err}")))?,
            None => DeviceInfo {
                hostname: self
                    .dir
                    .file_name()
                    .and_then(|v| v.to_str())
                    .unwrap_or("fixture")
                    .to_string(),
                address: self.dir.display().to_string(),
                platform: "fixture".to_string(),
            },
        };
        self.connected.store(true, Ordering::SeqCst);
        Ok(info)
    }

    async fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst) && !self.dir.join(DISCONNECTED_MARKER).exists()
    }

    async fn disconnect(&self) -> Result<(), DeviceError> {
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn query(&self, feature: Feature) -> Result<Value, DeviceError> {
        let path = self.dir.join(format!("{}.json", feature.name()));
        self.read_json(&path)
            .await?
            .ok_or_else(|| DeviceError::Unsupported(format!("no fixture for `{}`", feature.command())))
    }

    async fn parse_all(&self) -> Result<BTreeMap<String, Value>, DeviceError> {
        let path = self.dir.join("all.json");
        match self.read_json(&path).await? {
            Some(value) => serde_json::from_value(value).map_err(|err| DeviceError::Parse(format!("all.json: {err}"))),
            None => Err(DeviceError::Unsupported("no all.json fixture".to_string())),
        }
    }

    async fn parser_exclude(&self, command: &str) -> Result<Vec<String>, DeviceError> {
        let path = self.dir.join("exclude.json");
        let Some(value) = self.read_json(&path).await? else {
            return Ok(Vec::new());
        };
        let mut table: BTreeMap<String, Vec<String>> =
            serde_json::from_value(value).map_err(|err| DeviceError::Parse(format!("exclude.json: {err}")))?;
        Ok(table.remove(command).unwrap_or_default())
    }
}
