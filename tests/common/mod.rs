#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::{broadcast, mpsc, watch};

use appstack::config::model::{
    AppConfig, ServiceConfig, StackConfig, StartupConfig, ShutdownConfig,
};
use appstack::events::StackEvent;
use appstack::logs::LogLine;
use appstack::probe::HealthProber;
use appstack::process::{Launcher, ProcessExit, ProcessHandle};

// ---------------------------------------------------------------------------
// FakeProber — scripted health-check answers, per port
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct FakeProber {
    scripts: Mutex<HashMap<u16, VecDeque<bool>>>,
    defaults: Mutex<HashMap<u16, bool>>,
    calls: Mutex<HashMap<u16, usize>>,
}

impl FakeProber {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// The port always answers `value`.
    pub fn always(&self, port: u16, value: bool) {
        self.defaults.lock().unwrap().insert(port, value);
    }

    /// The port answers `false` for the first `failures` probes, then `true`
    /// forever. The orchestrator's short-circuit check counts as a probe.
    pub fn healthy_after(&self, port: u16, failures: usize) {
        self.scripts
            .lock()
            .unwrap()
            .insert(port, std::iter::repeat(false).take(failures).collect());
        self.defaults.lock().unwrap().insert(port, true);
    }

    pub fn calls(&self, port: u16) -> usize {
        self.calls.lock().unwrap().get(&port).copied().unwrap_or(0)
    }
}

#[async_trait]
impl HealthProber for FakeProber {
    async fn probe(&self, port: u16, _path: &str) -> bool {
        *self.calls.lock().unwrap().entry(port).or_default() += 1;
        if let Some(script) = self.scripts.lock().unwrap().get_mut(&port) {
            if let Some(answer) = script.pop_front() {
                return answer;
            }
        }
        self.defaults.lock().unwrap().get(&port).copied().unwrap_or(false)
    }
}

// ---------------------------------------------------------------------------
// FakeLauncher — records spawns instead of forking
// ---------------------------------------------------------------------------

/// What it takes for a fake process to confirm its exit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitPolicy {
    /// Graceful termination confirms the exit.
    OnTerm,
    /// Only a force kill confirms the exit.
    OnKillOnly,
    /// Nothing ever confirms the exit.
    Never,
}

#[derive(Clone)]
pub struct SpawnRecord {
    pub service: String,
    terminated: Arc<AtomicBool>,
    killed: Arc<AtomicBool>,
    exited_tx: Arc<watch::Sender<bool>>,
    exit_tx: mpsc::UnboundedSender<ProcessExit>,
}

impl SpawnRecord {
    pub fn was_terminated(&self) -> bool {
        self.terminated.load(Ordering::SeqCst)
    }

    pub fn was_killed(&self) -> bool {
        self.killed.load(Ordering::SeqCst)
    }

    /// Simulate the process exiting on its own.
    pub fn exit_now(&self, code: Option<i32>) {
        let _ = self.exited_tx.send(true);
        let _ = self.exit_tx.send(ProcessExit {
            service: self.service.clone(),
            code,
        });
    }
}

pub struct FakeLauncher {
    policy: ExitPolicy,
    records: Mutex<Vec<SpawnRecord>>,
}

impl FakeLauncher {
    pub fn new(policy: ExitPolicy) -> Arc<Self> {
        Arc::new(Self {
            policy,
            records: Mutex::new(Vec::new()),
        })
    }

    pub fn spawned(&self) -> Vec<String> {
        self.records
            .lock()
            .unwrap()
            .iter()
            .map(|r| r.service.clone())
            .collect()
    }

    pub fn record(&self, service: &str) -> Option<SpawnRecord> {
        self.records
            .lock()
            .unwrap()
            .iter()
            .find(|r| r.service == service)
            .cloned()
    }
}

#[async_trait]
impl Launcher for FakeLauncher {
    async fn spawn(
        &self,
        descriptor: &appstack::config::model::ServiceDescriptor,
        _log_tx: broadcast::Sender<LogLine>,
        exit_tx: mpsc::UnboundedSender<ProcessExit>,
    ) -> anyhow::Result<Box<dyn ProcessHandle>> {
        let (exited_tx, exited_rx) = watch::channel(false);
        let record = SpawnRecord {
            service: descriptor.key.clone(),
            terminated: Arc::new(AtomicBool::new(false)),
            killed: Arc::new(AtomicBool::new(false)),
            exited_tx: Arc::new(exited_tx),
            exit_tx,
        };
        self.records.lock().unwrap().push(record.clone());
        Ok(Box::new(FakeProcess {
            policy: self.policy,
            record,
            exited: exited_rx,
        }))
    }
}

struct FakeProcess {
    policy: ExitPolicy,
    record: SpawnRecord,
    exited: watch::Receiver<bool>,
}

#[async_trait]
impl ProcessHandle for FakeProcess {
    fn pid(&self) -> Option<u32> {
        Some(4242)
    }

    fn signal_terminate(&self) {
        self.record.terminated.store(true, Ordering::SeqCst);
        if self.policy == ExitPolicy::OnTerm {
            self.record.exit_now(Some(0));
        }
    }

    fn force_kill(&self) {
        self.record.killed.store(true, Ordering::SeqCst);
        if self.policy != ExitPolicy::Never {
            self.record.exit_now(None);
        }
    }

    async fn wait_exited(&self) {
        let mut rx = self.exited.clone();
        let _ = rx.wait_for(|exited| *exited).await;
    }
}

// ---------------------------------------------------------------------------
// Config helpers
// ---------------------------------------------------------------------------

pub fn service(name: &str, dir: &Path, port: u16, required: bool) -> ServiceConfig {
    ServiceConfig {
        name: name.to_string(),
        display_name: None,
        path: dir.to_string_lossy().into_owned(),
        command: "service-binary".to_string(),
        args: vec![],
        env: BTreeMap::new(),
        port,
        health_path: "/".to_string(),
        required,
    }
}

/// Config with fast timings suited to paused-clock tests.
pub fn stack(services: Vec<ServiceConfig>, max_attempts: u32) -> StackConfig {
    StackConfig {
        app: AppConfig {
            name: "test".to_string(),
        },
        services,
        container: None,
        startup: StartupConfig {
            probe_timeout_ms: 100,
            poll_interval_ms: 100,
            max_attempts,
            status_every: 2,
        },
        shutdown: ShutdownConfig {
            grace_ms: 200,
            stop_container: false,
        },
    }
}

pub fn drain_events(rx: &mut broadcast::Receiver<StackEvent>) -> Vec<StackEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

pub fn progress_percents(events: &[StackEvent]) -> Vec<u8> {
    events
        .iter()
        .filter_map(|e| match e {
            StackEvent::Progress { percent, .. } => Some(*percent),
            _ => None,
        })
        .collect()
}

pub fn service_events<'a>(events: &'a [StackEvent], key: &str) -> Vec<&'a StackEvent> {
    events
        .iter()
        .filter(|e| matches!(e, StackEvent::Service { service, .. } if service == key))
        .collect()
}
