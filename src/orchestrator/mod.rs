pub mod state;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{bail, Result};
use chrono::Utc;
use thiserror::Error;
use tokio::sync::{broadcast, mpsc};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use crate::config::model::{ContainerSpec, ServiceDescriptor, StackConfig};
use crate::docker::ContainerEngine;
use crate::events::{self, ServiceStatus, StackEvent};
use crate::logs::LogLine;
use crate::probe::{HealthProber, HttpHealthProber};
use crate::process::{Launcher, OsLauncher, ProcessExit};

use state::{RunningService, ServiceState};

// ---------------------------------------------------------------------------
// StartError — per-service startup failure taxonomy
// ---------------------------------------------------------------------------

/// Startup failures. Only a required service's error propagates out of
/// `start_all`; optional services log, emit a status event, and are skipped.
/// None of these are retried within a run.
#[derive(Debug, Error)]
pub enum StartError {
    #[error("working directory for {service} not found: {}", path.display())]
    Precondition { service: String, path: PathBuf },

    #[error("failed to launch {service}: {message}")]
    Spawn { service: String, message: String },

    #[error("{service} failed to become ready after {attempts} health checks")]
    UnreadyTimeout { service: String, attempts: u32 },

    #[error("{service} exited before becoming ready")]
    ExitedEarly { service: String },
}

/// How one `start_service` call resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    /// Spawned and confirmed healthy.
    Started,
    /// An instance was already answering health checks; nothing was spawned.
    AlreadyRunning,
    /// Optional service failed; the sequence continues without it.
    Skipped,
    /// Shutdown began while the service was still starting.
    Cancelled,
}

// ---------------------------------------------------------------------------
// Timing knobs
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct StartupTiming {
    pub poll_interval: Duration,
    pub max_attempts: u32,
    pub status_every: u32,
}

// ---------------------------------------------------------------------------
// Shared state — mutated only by orchestrator event handlers
// ---------------------------------------------------------------------------

struct Shared {
    events_tx: broadcast::Sender<StackEvent>,
    services: Mutex<BTreeMap<String, RunningService>>,
    last_percent: AtomicU8,
    shutting_down: AtomicBool,
}

impl Shared {
    fn emit_service(&self, service: &str, status: ServiceStatus, message: impl Into<String>) {
        let _ = self.events_tx.send(StackEvent::Service {
            service: service.to_string(),
            status,
            message: message.into(),
        });
    }

    /// Progress is monotonically non-decreasing within a run; a stale lower
    /// percentage is clamped up to the last one reported.
    fn emit_progress(&self, percent: u8, message: impl Into<String>) {
        let prev = self.last_percent.fetch_max(percent, Ordering::SeqCst);
        let _ = self.events_tx.send(StackEvent::Progress {
            percent: prev.max(percent),
            message: message.into(),
        });
    }

    fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::SeqCst)
    }

    fn insert_service(&self, service: RunningService) {
        let key = service.descriptor.key.clone();
        self.services.lock().unwrap().insert(key, service);
    }

    fn remove_service(&self, key: &str) -> Option<RunningService> {
        self.services.lock().unwrap().remove(key)
    }

    fn contains(&self, key: &str) -> bool {
        self.services.lock().unwrap().contains_key(key)
    }

    fn state_of(&self, key: &str) -> Option<ServiceState> {
        self.services.lock().unwrap().get(key).map(|s| s.state)
    }

    fn set_state(&self, key: &str, state: ServiceState) -> bool {
        match self.services.lock().unwrap().get_mut(key) {
            Some(service) => {
                service.state = state;
                true
            }
            None => false,
        }
    }

    fn drain(&self) -> Vec<RunningService> {
        let mut map = self.services.lock().unwrap();
        std::mem::take(&mut *map).into_values().collect()
    }
}

fn exit_label(code: Option<i32>) -> String {
    match code {
        Some(code) => format!("exit code {}", code),
        None => "killed by signal".to_string(),
    }
}

fn percent_for(done: usize, total: usize) -> u8 {
    if total == 0 {
        100
    } else {
        ((done * 100) / total) as u8
    }
}

// ---------------------------------------------------------------------------
// Orchestrator
// ---------------------------------------------------------------------------

/// Owns the live-service collection and drives startup sequencing, readiness
/// polling, steady-state exit monitoring, and coordinated shutdown.
///
/// Startup order is fixed: the optional container-managed service is kicked
/// off first as a background task (it has no ordering dependency and may
/// race with the rest), then the native services strictly in declared order
/// — a required service must be confirmed healthy before the next one is
/// attempted.
pub struct Orchestrator {
    descriptors: Vec<Arc<ServiceDescriptor>>,
    container: Option<ContainerSpec>,
    timing: StartupTiming,
    grace: Duration,
    stop_container: bool,
    prober: Arc<dyn HealthProber>,
    launcher: Arc<dyn Launcher>,
    engine: ContainerEngine,
    log_tx: broadcast::Sender<LogLine>,
    shared: Arc<Shared>,
    cancel: CancellationToken,
    tracker: TaskTracker,
    container_started: AtomicBool,
    exit_tx: mpsc::UnboundedSender<ProcessExit>,
    exit_rx: Mutex<Option<mpsc::UnboundedReceiver<ProcessExit>>>,
}

impl Orchestrator {
    /// Build an orchestrator with the real HTTP prober and OS launcher.
    /// `base` anchors relative service paths (the config file's directory).
    pub fn from_config(config: StackConfig, base: &Path) -> Result<Self> {
        let prober = Arc::new(HttpHealthProber::new(config.startup.probe_timeout())?);
        Ok(Self::with_parts(config, base, prober, Arc::new(OsLauncher)))
    }

    /// Build an orchestrator with explicit prober/launcher implementations.
    pub fn with_parts(
        config: StackConfig,
        base: &Path,
        prober: Arc<dyn HealthProber>,
        launcher: Arc<dyn Launcher>,
    ) -> Self {
        let descriptors = config
            .services
            .iter()
            .map(|svc| Arc::new(ServiceDescriptor::from_config(svc, base)))
            .collect();
        let container = config
            .container
            .as_ref()
            .map(|c| ContainerSpec::from_config(c, &config.app.name));
        let engine = ContainerEngine::new(
            container
                .as_ref()
                .map(|c| c.engine.clone())
                .unwrap_or_else(|| "docker".to_string()),
        );

        let (events_tx, _) = events::channel();
        let (log_tx, _) = broadcast::channel(4096);
        let (exit_tx, exit_rx) = mpsc::unbounded_channel();

        Self {
            descriptors,
            container,
            timing: StartupTiming {
                poll_interval: config.startup.poll_interval(),
                max_attempts: config.startup.max_attempts,
                status_every: config.startup.status_every.max(1),
            },
            grace: config.shutdown.grace(),
            stop_container: config.shutdown.stop_container,
            prober,
            launcher,
            engine,
            log_tx,
            shared: Arc::new(Shared {
                events_tx,
                services: Mutex::new(BTreeMap::new()),
                last_percent: AtomicU8::new(0),
                shutting_down: AtomicBool::new(false),
            }),
            cancel: CancellationToken::new(),
            tracker: TaskTracker::new(),
            container_started: AtomicBool::new(false),
            exit_tx,
            exit_rx: Mutex::new(Some(exit_rx)),
        }
    }

    /// Subscribe to progress/status events.
    pub fn subscribe(&self) -> broadcast::Receiver<StackEvent> {
        self.shared.events_tx.subscribe()
    }

    /// Subscribe to captured child-process output.
    pub fn subscribe_logs(&self) -> broadcast::Receiver<LogLine> {
        self.log_tx.subscribe()
    }

    /// Current state of a spawned service, `None` once it has exited or was
    /// never spawned.
    pub fn service_state(&self, key: &str) -> Option<ServiceState> {
        self.shared.state_of(key)
    }

    /// Longest display name across configured services, for log alignment.
    pub fn max_name_len(&self) -> usize {
        self.descriptors
            .iter()
            .map(|d| d.key.len())
            .chain(self.container.iter().map(|c| c.key.len()))
            .max()
            .unwrap_or(0)
    }

    // -----------------------------------------------------------------------
    // Startup
    // -----------------------------------------------------------------------

    /// Start every configured service. Resolves `Ok` once all required
    /// services are healthy (optional failures are skipped); resolves `Err`
    /// with the first fatal error, after emitting `Failed`.
    pub async fn start_all(&self) -> Result<()> {
        let exit_rx = self.exit_rx.lock().unwrap().take();
        let Some(exit_rx) = exit_rx else {
            bail!("start_all may only be called once per orchestrator");
        };
        self.tracker.spawn(Self::run_exit_monitor(
            self.shared.clone(),
            exit_rx,
            self.cancel.clone(),
        ));

        let total = self.descriptors.len() + usize::from(self.container.is_some());
        let done = Arc::new(AtomicUsize::new(0));
        self.shared.emit_progress(0, "Initializing services...");

        // The container-managed service starts first but never gates the
        // native services; it races with them and degrades on failure.
        let container_task = self.container.as_ref().map(|spec| {
            self.container_started.store(true, Ordering::SeqCst);
            let spec = spec.clone();
            let engine = self.engine.clone();
            let prober = self.prober.clone();
            let shared = self.shared.clone();
            let timing = self.timing.clone();
            let cancel = self.cancel.clone();
            let done = done.clone();
            self.tracker.spawn(async move {
                let display = spec.display_name.clone();
                run_container_startup(engine, spec, prober, shared.clone(), timing, cancel).await;
                let finished = done.fetch_add(1, Ordering::SeqCst) + 1;
                shared.emit_progress(
                    percent_for(finished, total),
                    format!("{} startup finished", display),
                );
            })
        });

        for descriptor in &self.descriptors {
            self.shared.emit_progress(
                percent_for(done.load(Ordering::SeqCst), total),
                format!("Starting {}...", descriptor.display_name),
            );

            match self.start_service(descriptor).await {
                Ok(StartOutcome::Cancelled) => {
                    info!("startup interrupted by shutdown");
                    return Ok(());
                }
                Ok(outcome) => {
                    let finished = done.fetch_add(1, Ordering::SeqCst) + 1;
                    let message = match outcome {
                        StartOutcome::Skipped => {
                            format!("{} skipped", descriptor.display_name)
                        }
                        _ => format!("{} ready", descriptor.display_name),
                    };
                    self.shared
                        .emit_progress(percent_for(finished, total), message);
                }
                Err(err) => {
                    warn!(service = %descriptor.key, error = %err, "required service failed to start");
                    let _ = self.shared.events_tx.send(StackEvent::Failed {
                        reason: err.to_string(),
                    });
                    return Err(err.into());
                }
            }
        }

        if let Some(task) = container_task {
            let _ = task.await;
        }

        if self.shared.is_shutting_down() {
            return Ok(());
        }

        self.shared.emit_progress(100, "All services ready");
        let _ = self.shared.events_tx.send(StackEvent::Ready);
        info!("all services ready");
        Ok(())
    }

    /// Start one native service and poll it to readiness.
    async fn start_service(
        &self,
        descriptor: &Arc<ServiceDescriptor>,
    ) -> Result<StartOutcome, StartError> {
        let key = descriptor.key.as_str();
        let display = descriptor.display_name.as_str();

        self.shared
            .emit_service(key, ServiceStatus::Starting, format!("Starting {}...", display));

        // A healthy endpoint means a prior instance is still up; spawning
        // another would collide on the port.
        if self.prober.probe(descriptor.port, &descriptor.health_path).await {
            info!(service = %key, port = descriptor.port, "already answering health checks, not spawning");
            self.shared.emit_service(
                key,
                ServiceStatus::Running,
                format!("{} already running", display),
            );
            return Ok(StartOutcome::AlreadyRunning);
        }

        if !descriptor.working_dir.is_dir() {
            let err = StartError::Precondition {
                service: key.to_string(),
                path: descriptor.working_dir.clone(),
            };
            self.shared
                .emit_service(key, ServiceStatus::Error, err.to_string());
            return self.fail_or_skip(descriptor, err);
        }

        let handle = match self
            .launcher
            .spawn(descriptor, self.log_tx.clone(), self.exit_tx.clone())
            .await
        {
            Ok(handle) => handle,
            Err(e) => {
                let err = StartError::Spawn {
                    service: key.to_string(),
                    message: format!("{:#}", e),
                };
                self.shared
                    .emit_service(key, ServiceStatus::Error, err.to_string());
                return self.fail_or_skip(descriptor, err);
            }
        };

        let pid = handle.pid();
        info!(service = %key, pid = ?pid, "service spawned");
        self.shared.insert_service(RunningService {
            descriptor: descriptor.clone(),
            pid,
            started_at: Utc::now(),
            state: ServiceState::Starting,
            handle,
        });

        let mut ticker = tokio::time::interval(self.timing.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await; // the first tick completes immediately

        let mut attempts = 0u32;
        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = self.cancel.cancelled() => return Ok(StartOutcome::Cancelled),
            }
            if self.shared.is_shutting_down() {
                return Ok(StartOutcome::Cancelled);
            }

            // The exit monitor removes entries on exit; a missing entry means
            // the process died before ever answering a health check.
            if !self.shared.contains(key) {
                let err = StartError::ExitedEarly {
                    service: key.to_string(),
                };
                return self.fail_or_skip(descriptor, err);
            }

            if self.prober.probe(descriptor.port, &descriptor.health_path).await {
                if !self.shared.set_state(key, ServiceState::Running) {
                    let err = StartError::ExitedEarly {
                        service: key.to_string(),
                    };
                    return self.fail_or_skip(descriptor, err);
                }
                self.shared.emit_service(
                    key,
                    ServiceStatus::Running,
                    format!("{} is ready", display),
                );
                return Ok(StartOutcome::Started);
            }

            attempts += 1;
            if attempts >= self.timing.max_attempts {
                self.shared.set_state(key, ServiceState::TimedOut);
                let err = StartError::UnreadyTimeout {
                    service: key.to_string(),
                    attempts,
                };
                self.shared
                    .emit_service(key, ServiceStatus::Timeout, err.to_string());
                return self.fail_or_skip(descriptor, err);
            }

            // Throttled so observers are not flooded on every poll.
            if attempts % self.timing.status_every == 0 {
                self.shared.emit_service(
                    key,
                    ServiceStatus::Starting,
                    format!(
                        "{} starting... ({}/{} checks)",
                        display, attempts, self.timing.max_attempts
                    ),
                );
            }
        }
    }

    fn fail_or_skip(
        &self,
        descriptor: &ServiceDescriptor,
        err: StartError,
    ) -> Result<StartOutcome, StartError> {
        if descriptor.required {
            Err(err)
        } else {
            warn!(service = %descriptor.key, error = %err, "optional service failed to start, continuing");
            Ok(StartOutcome::Skipped)
        }
    }

    // -----------------------------------------------------------------------
    // Steady-state exit monitoring
    // -----------------------------------------------------------------------

    async fn run_exit_monitor(
        shared: Arc<Shared>,
        mut exit_rx: mpsc::UnboundedReceiver<ProcessExit>,
        cancel: CancellationToken,
    ) {
        loop {
            let exit = tokio::select! {
                _ = cancel.cancelled() => break,
                exit = exit_rx.recv() => match exit {
                    Some(exit) => exit,
                    None => break,
                },
            };

            let Some(service) = shared.remove_service(&exit.service) else {
                continue;
            };
            // Exits during shutdown are requested; don't report them.
            if shared.is_shutting_down() {
                continue;
            }

            let display = service.descriptor.display_name.as_str();
            match service.state {
                ServiceState::Running => {
                    warn!(service = %exit.service, code = ?exit.code, "service exited unexpectedly");
                    shared.emit_service(
                        &exit.service,
                        ServiceStatus::Stopped,
                        format!("{} stopped unexpectedly ({})", display, exit_label(exit.code)),
                    );
                }
                ServiceState::Starting => {
                    warn!(service = %exit.service, code = ?exit.code, "service exited before becoming ready");
                    shared.emit_service(
                        &exit.service,
                        ServiceStatus::Error,
                        format!(
                            "{} exited before becoming ready ({})",
                            display,
                            exit_label(exit.code)
                        ),
                    );
                }
                _ => {
                    // Already reported as timed out or errored.
                    debug!(service = %exit.service, state = %service.state, "late exit");
                }
            }
        }
    }

    // -----------------------------------------------------------------------
    // Shutdown
    // -----------------------------------------------------------------------

    /// Stop everything: graceful termination of each live process tree with
    /// a bounded grace period, force kill on overrun, then the container if
    /// configured. Idempotent; never hangs on an unconfirmed exit.
    pub async fn stop_all(&self) {
        self.shared.shutting_down.store(true, Ordering::SeqCst);
        self.cancel.cancel();

        let drained = self.shared.drain();
        if !drained.is_empty() {
            info!(count = drained.len(), "stopping services");
            let grace = self.grace;
            futures_util::future::join_all(drained.into_iter().map(|service| async move {
                let key = service.descriptor.key.clone();
                service.handle.signal_terminate();
                if tokio::time::timeout(grace, service.handle.wait_exited())
                    .await
                    .is_ok()
                {
                    debug!(service = %key, "exited gracefully");
                    return;
                }
                warn!(service = %key, "did not exit within grace period, force killing");
                service.handle.force_kill();
                if tokio::time::timeout(grace, service.handle.wait_exited())
                    .await
                    .is_err()
                {
                    warn!(service = %key, "exit not confirmed after force kill");
                }
            }))
            .await;
        }

        if self.stop_container && self.container_started.load(Ordering::SeqCst) {
            if let Some(spec) = &self.container {
                if let Err(e) = self.engine.stop(&spec.container_name, true).await {
                    warn!(container = %spec.container_name, error = %e, "failed to stop container");
                }
            }
        }

        self.tracker.close();
        if tokio::time::timeout(Duration::from_secs(10), self.tracker.wait())
            .await
            .is_err()
        {
            warn!("shutdown timed out waiting for background tasks");
        }
    }
}

// ---------------------------------------------------------------------------
// Container-managed service startup
// ---------------------------------------------------------------------------

/// Start the container and poll it to readiness on the same cadence as
/// native services. Always optional: every failure becomes a status event
/// and the rest of the stack keeps going.
async fn run_container_startup(
    engine: ContainerEngine,
    spec: ContainerSpec,
    prober: Arc<dyn HealthProber>,
    shared: Arc<Shared>,
    timing: StartupTiming,
    cancel: CancellationToken,
) {
    let key = spec.key.as_str();
    let display = spec.display_name.as_str();

    shared.emit_service(key, ServiceStatus::Starting, format!("Starting {}...", display));

    if let Err(e) = engine.ensure_running(&spec).await {
        warn!(container = %spec.container_name, error = %format!("{:#}", e), "container startup failed");
        shared.emit_service(key, ServiceStatus::Error, format!("{}: {:#}", display, e));
        return;
    }

    let mut ticker = tokio::time::interval(timing.poll_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker.tick().await;

    let mut attempts = 0u32;
    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = cancel.cancelled() => return,
        }
        if shared.is_shutting_down() {
            return;
        }

        if prober.probe(spec.host_port, &spec.health_path).await {
            shared.emit_service(key, ServiceStatus::Running, format!("{} is ready", display));
            return;
        }

        attempts += 1;
        if attempts >= timing.max_attempts {
            shared.emit_service(
                key,
                ServiceStatus::Timeout,
                format!(
                    "{} failed to become ready after {} health checks",
                    display, attempts
                ),
            );
            return;
        }

        if attempts % timing.status_every == 0 {
            shared.emit_service(
                key,
                ServiceStatus::Starting,
                format!(
                    "{} starting... ({}/{} checks)",
                    display, attempts, timing.max_attempts
                ),
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn percent_is_proportional() {
        assert_eq!(percent_for(0, 3), 0);
        assert_eq!(percent_for(1, 3), 33);
        assert_eq!(percent_for(2, 3), 66);
        assert_eq!(percent_for(3, 3), 100);
        assert_eq!(percent_for(0, 0), 100);
    }

    #[test]
    fn exit_labels() {
        assert_eq!(exit_label(Some(1)), "exit code 1");
        assert_eq!(exit_label(None), "killed by signal");
    }

    #[test]
    fn start_error_messages_name_the_service() {
        let err = StartError::UnreadyTimeout {
            service: "frontend".into(),
            attempts: 60,
        };
        assert!(err.to_string().contains("frontend"));
        assert!(err.to_string().contains("60"));

        let err = StartError::Precondition {
            service: "backend".into(),
            path: PathBuf::from("/missing"),
        };
        assert!(err.to_string().contains("/missing"));
    }
}
