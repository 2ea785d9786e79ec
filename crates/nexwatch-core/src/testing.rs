//! Scripted collaborators for unit tests.

use std::collections::{BTreeMap, VecDeque};
use std::env;
use std::fs;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::SystemTime;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;

use crate::control::Operator;
use crate::device::{DeviceClient, DeviceError, DeviceInfo, Feature};
use crate::store::{SnapshotStore, StoreError};

pub fn make_temp_dir(name: &str) -> PathBuf {
    let mut path = env::temp_dir();
    let uniq = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .expect("unix epoch")
        .as_nanos();
    path.push(format!("nexwatch-tests-{name}-{uniq}"));
    fs::create_dir_all(&path).expect("create temp dir");
    path
}

#[derive(Debug, Clone)]
pub enum Reply {
    Value(Value),
    Unsupported,
    Parse,
    Disconnected,
    /// Raises an interrupt, then never completes.
    Interrupt,
}

#[derive(Default)]
struct DeviceInner {
    hostname: String,
    replies: Mutex<BTreeMap<Feature, VecDeque<Reply>>>,
    all: Mutex<VecDeque<Reply>>,
    exclude: Mutex<BTreeMap<String, Vec<String>>>,
    interrupts: Mutex<Option<mpsc::Sender<()>>>,
    connected: AtomicBool,
    refuse_connect: AtomicBool,
    connects: AtomicUsize,
    disconnects: AtomicUsize,
    queries: Mutex<BTreeMap<Feature, usize>>,
}

/// Replies per feature are consumed in order; the last one repeats forever.
/// Features without replies are unsupported.
#[derive(Clone, Default)]
pub struct ScriptedDevice {
    inner: Arc<DeviceInner>,
}

fn next_reply(queue: &mut VecDeque<Reply>) -> Option<Reply> {
    if queue.len() > 1 {
        queue.pop_front()
    } else {
        queue.front().cloned()
    }
}

impl ScriptedDevice {
    pub fn new(hostname: &str) -> Self {
        Self {
            inner: Arc::new(DeviceInner {
                hostname: hostname.to_string(),
                ..DeviceInner::default()
            }),
        }
    }

    pub fn with(self, feature: Feature, replies: impl IntoIterator<Item = Reply>) -> Self {
        self.inner
            .replies
            .lock()
            .expect("replies lock")
            .entry(feature)
            .or_default()
            .extend(replies);
        self
    }

    pub fn with_all(self, replies: impl IntoIterator<Item = Reply>) -> Self {
        self.inner.all.lock().expect("all lock").extend(replies);
        self
    }

    pub fn with_exclude(self, command: &str, fields: &[&str]) -> Self {
        self.inner
            .exclude
            .lock()
            .expect("exclude lock")
            .insert(command.to_string(), fields.iter().map(|f| f.to_string()).collect());
        self
    }

    pub fn refusing_connections(self) -> Self {
        self.inner.refuse_connect.store(true, Ordering::SeqCst);
        self
    }

    /// Where [`Reply::Interrupt`] sends its interrupt.
    pub fn interrupting(self, sender: mpsc::Sender<()>) -> Self {
        *self.inner.interrupts.lock().expect("interrupts lock") = Some(sender);
        self
    }

    pub fn query_count(&self, feature: Feature) -> usize {
        self.inner
            .queries
            .lock()
            .expect("queries lock")
            .get(&feature)
            .copied()
            .unwrap_or(0)
    }

    pub fn connect_count(&self) -> usize {
        self.inner.connects.load(Ordering::SeqCst)
    }

    pub fn disconnect_count(&self) -> usize {
        self.inner.disconnects.load(Ordering::SeqCst)
    }

    async fn play(&self, reply: Option<Reply>, what: &str) -> Result<Value, DeviceError> {
        match reply {
            Some(Reply::Value(value)) => Ok(value),
            None | Some(Reply::Unsupported) => Err(DeviceError::Unsupported(what.to_string())),
            Some(Reply::Parse) => Err(DeviceError::Parse(what.to_string())),
            Some(Reply::Disconnected) => {
                self.inner.connected.store(false, Ordering::SeqCst);
                Err(DeviceError::Disconnected(what.to_string()))
            }
            Some(Reply::Interrupt) => {
                let sender = self.inner.interrupts.lock().expect("interrupts lock").clone();
                if let Some(sender) = sender {
                    sender.send(()).await.expect("send interrupt");
                }
                std::future::pending().await
            }
        }
    }
}

#[async_trait]
impl DeviceClient for ScriptedDevice {
    async fn connect(&self) -> Result<DeviceInfo, DeviceError> {
        self.inner.connects.fetch_add(1, Ordering::SeqCst);
        if self.inner.refuse_connect.load(Ordering::SeqCst) {
            return Err(DeviceError::Disconnected("connection refused".to_string()));
        }
        self.inner.connected.store(true, Ordering::SeqCst);
        Ok(DeviceInfo {
            hostname: self.inner.hostname.clone(),
            address: "192.0.2.1".to_string(),
            platform: "nxos".to_string(),
        })
    }

    async fn is_connected(&self) -> bool {
        self.inner.connected.load(Ordering::SeqCst)
    }

    async fn disconnect(&self) -> Result<(), DeviceError> {
        self.inner.disconnects.fetch_add(1, Ordering::SeqCst);
        self.inner.connected.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn query(&self, feature: Feature) -> Result<Value, DeviceError> {
        *self
            .inner
            .queries
            .lock()
            .expect("queries lock")
            .entry(feature)
            .or_default() += 1;
        let reply = self
            .inner
            .replies
            .lock()
            .expect("replies lock")
            .get_mut(&feature)
            .and_then(next_reply);
        self.play(reply, feature.command()).await
    }

    async fn parse_all(&self) -> Result<BTreeMap<String, Value>, DeviceError> {
        let reply = next_reply(&mut self.inner.all.lock().expect("all lock"));
        let value = self.play(reply, "parse all").await?;
        serde_json::from_value(value).map_err(|err| DeviceError::Parse(err.to_string()))
    }

    async fn parser_exclude(&self, command: &str) -> Result<Vec<String>, DeviceError> {
        Ok(self
            .inner
            .exclude
            .lock()
            .expect("exclude lock")
            .get(command)
            .cloned()
            .unwrap_or_default())
    }
}

/// Answers prompts from queues; an empty queue answers no.
#[derive(Clone, Default)]
pub struct ScriptedOperator {
    exits: Arc<Mutex<VecDeque<bool>>>,
    toggles: Arc<Mutex<VecDeque<bool>>>,
    presented: Arc<Mutex<Vec<String>>>,
}

impl ScriptedOperator {
    pub fn answering(exits: &[bool], toggles: &[bool]) -> Self {
        let operator = Self::default();
        operator.exits.lock().expect("exits lock").extend(exits);
        operator.toggles.lock().expect("toggles lock").extend(toggles);
        operator
    }

    pub fn presented(&self) -> Vec<String> {
        self.presented.lock().expect("presented lock").clone()
    }

    pub fn saw(&self, needle: &str) -> bool {
        self.presented().iter().any(|text| text.contains(needle))
    }
}

#[async_trait]
impl Operator for ScriptedOperator {
    fn present(&mut self, text: &str) {
        self.presented.lock().expect("presented lock").push(text.to_string());
    }

    async fn confirm_exit(&mut self) -> bool {
        self.exits.lock().expect("exits lock").pop_front().unwrap_or(false)
    }

    async fn confirm_detail_toggle(&mut self, _detailed: bool) -> bool {
        self.toggles.lock().expect("toggles lock").pop_front().unwrap_or(false)
    }
}

#[derive(Default)]
pub struct MemoryStore {
    blobs: Mutex<BTreeMap<String, Value>>,
}

impl MemoryStore {
    pub fn names(&self) -> Vec<String> {
        self.blobs.lock().expect("blobs lock").keys().cloned().collect()
    }
}

impl SnapshotStore for MemoryStore {
    fn save(&self, name: &str, snapshot: &Value) -> Result<(), StoreError> {
        self.blobs
            .lock()
            .expect("blobs lock")
            .insert(name.to_string(), snapshot.clone());
        Ok(())
    }

    fn load(&self, name: &str) -> Result<Option<Value>, StoreError> {
        Ok(self.blobs.lock().expect("blobs lock").get(name).cloned())
    }
}
