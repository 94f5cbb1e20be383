use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Deserialize)]
pub struct StackConfig {
    pub app: AppConfig,
    #[serde(default, rename = "service")]
    pub services: Vec<ServiceConfig>,
    #[serde(default)]
    pub container: Option<ContainerConfig>,
    #[serde(default)]
    pub startup: StartupConfig,
    #[serde(default)]
    pub shutdown: ShutdownConfig,
}

#[derive(Debug, Deserialize)]
pub struct AppConfig {
    pub name: String,
}

/// One native service managed by the orchestrator. Services are started in
/// the order they appear in the config file.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct ServiceConfig {
    pub name: String,
    #[serde(default)]
    pub display_name: Option<String>,
    /// Working directory, relative to the config file unless absolute.
    pub path: String,
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    pub port: u16,
    #[serde(default = "default_health_path")]
    pub health_path: String,
    #[serde(default = "default_required")]
    pub required: bool,
}

/// The optional container-managed service. Always treated as best-effort:
/// any failure here degrades the stack instead of aborting startup.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct ContainerConfig {
    pub name: String,
    #[serde(default)]
    pub display_name: Option<String>,
    pub image: String,
    /// Host port the container is published on; also the health-check target.
    pub port: u16,
    pub container_port: u16,
    #[serde(default = "default_health_path")]
    pub health_path: String,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    /// Extra arguments inserted before the image in `run`.
    #[serde(default)]
    pub run_args: Vec<String>,
    #[serde(default = "default_engine")]
    pub engine: String,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct StartupConfig {
    pub probe_timeout_ms: u64,
    pub poll_interval_ms: u64,
    pub max_attempts: u32,
    /// Emit a `starting` status event every N polls instead of every poll.
    pub status_every: u32,
}

impl Default for StartupConfig {
    fn default() -> Self {
        Self {
            probe_timeout_ms: 3_000,
            poll_interval_ms: 2_000,
            max_attempts: 60,
            status_every: 5,
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct ShutdownConfig {
    pub grace_ms: u64,
    /// Whether `stop_all` also stops the container-managed service. Leaving
    /// it running lets the container survive application restarts.
    pub stop_container: bool,
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            grace_ms: 5_000,
            stop_container: true,
        }
    }
}

fn default_health_path() -> String {
    "/".to_string()
}

fn default_required() -> bool {
    true
}

fn default_engine() -> String {
    "docker".to_string()
}

impl StartupConfig {
    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

impl ShutdownConfig {
    pub fn grace(&self) -> Duration {
        Duration::from_millis(self.grace_ms)
    }
}

// ---------------------------------------------------------------------------
// Runtime descriptors — config entries with paths resolved to absolutes
// ---------------------------------------------------------------------------

/// Immutable description of one native service, built once per orchestration
/// run from a [`ServiceConfig`].
#[derive(Debug, Clone)]
pub struct ServiceDescriptor {
    pub key: String,
    pub display_name: String,
    pub working_dir: PathBuf,
    pub command: String,
    pub args: Vec<String>,
    pub env: BTreeMap<String, String>,
    pub port: u16,
    pub health_path: String,
    pub required: bool,
}

impl ServiceDescriptor {
    pub fn from_config(cfg: &ServiceConfig, base: &Path) -> Self {
        let path = PathBuf::from(&cfg.path);
        let working_dir = if path.is_absolute() {
            path
        } else {
            base.join(path)
        };
        Self {
            key: cfg.name.clone(),
            display_name: cfg
                .display_name
                .clone()
                .unwrap_or_else(|| cfg.name.clone()),
            working_dir,
            command: cfg.command.clone(),
            args: cfg.args.clone(),
            env: cfg.env.clone(),
            port: cfg.port,
            health_path: cfg.health_path.clone(),
            required: cfg.required,
        }
    }

    pub fn health_url(&self) -> String {
        format!("http://localhost:{}{}", self.port, self.health_path)
    }
}

/// Immutable description of the container-managed service.
#[derive(Debug, Clone)]
pub struct ContainerSpec {
    pub key: String,
    pub display_name: String,
    pub container_name: String,
    pub image: String,
    pub host_port: u16,
    pub container_port: u16,
    pub health_path: String,
    pub env: BTreeMap<String, String>,
    pub run_args: Vec<String>,
    pub engine: String,
}

impl ContainerSpec {
    pub fn from_config(cfg: &ContainerConfig, app_name: &str) -> Self {
        Self {
            key: cfg.name.clone(),
            display_name: cfg
                .display_name
                .clone()
                .unwrap_or_else(|| cfg.name.clone()),
            container_name: format!("{}-{}", app_name, cfg.name),
            image: cfg.image.clone(),
            host_port: cfg.port,
            container_port: cfg.container_port,
            health_path: cfg.health_path.clone(),
            env: cfg.env.clone(),
            run_args: cfg.run_args.clone(),
            engine: cfg.engine.clone(),
        }
    }
}
