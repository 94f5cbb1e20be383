use serde::Serialize;
use tokio::sync::broadcast;

/// Per-service status carried by [`StackEvent::Service`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceStatus {
    Starting,
    Running,
    Stopped,
    Error,
    Timeout,
}

impl ServiceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceStatus::Starting => "starting",
            ServiceStatus::Running => "running",
            ServiceStatus::Stopped => "stopped",
            ServiceStatus::Error => "error",
            ServiceStatus::Timeout => "timeout",
        }
    }
}

impl std::fmt::Display for ServiceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Events emitted by the orchestrator for an external UI to render.
///
/// `Progress.percent` is monotonically non-decreasing within one startup run.
/// Every service receives at least one terminal `Service` event per run
/// unless shutdown has begun, which suppresses further status events.
#[derive(Debug, Clone)]
pub enum StackEvent {
    Progress {
        percent: u8,
        message: String,
    },
    Service {
        service: String,
        status: ServiceStatus,
        message: String,
    },
    Ready,
    Failed {
        reason: String,
    },
}

/// Channel used to fan events out to subscribers.
pub fn channel() -> (broadcast::Sender<StackEvent>, broadcast::Receiver<StackEvent>) {
    broadcast::channel(256)
}
