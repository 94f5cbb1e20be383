use chrono::{DateTime, Utc};
use std::sync::Arc;

use crate::config::model::ServiceDescriptor;
use crate::process::ProcessHandle;

/// Per-service lifecycle state.
///
/// `Starting` is the only non-terminal startup state; once a service leaves
/// it there is no way back within one orchestration run. `Stopped` is
/// reached from `Running` when the process exits during steady-state
/// operation — reported, never auto-restarted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceState {
    Starting,
    Running,
    Stopped,
    Errored,
    TimedOut,
}

impl ServiceState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceState::Starting => "starting",
            ServiceState::Running => "running",
            ServiceState::Stopped => "stopped",
            ServiceState::Errored => "errored",
            ServiceState::TimedOut => "timed-out",
        }
    }

    pub fn is_terminal_for_startup(&self) -> bool {
        !matches!(self, ServiceState::Starting)
    }
}

impl std::fmt::Display for ServiceState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A spawned service owned by the orchestrator. An entry exists in the
/// live-service collection iff the process has been spawned and its exit has
/// not yet been confirmed; it is removed on exit notification or drained at
/// shutdown.
pub struct RunningService {
    pub descriptor: Arc<ServiceDescriptor>,
    pub pid: Option<u32>,
    pub started_at: DateTime<Utc>,
    pub state: ServiceState,
    pub handle: Box<dyn ProcessHandle>,
}
