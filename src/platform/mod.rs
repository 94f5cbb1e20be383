use tokio::process::{Child, Command};

#[cfg(unix)]
mod unix;
#[cfg(windows)]
mod windows;

#[cfg(unix)]
use unix as imp;
#[cfg(windows)]
use windows as imp;

pub use imp::ProcessGroupHandle;

/// Configure the command to run in a new process group so that termination
/// reaches the whole tree, not just the immediate child. Launched services
/// are frequently interpreter or script wrappers around the real executable.
/// Unix: `process_group(0)`, Windows: `CREATE_NEW_PROCESS_GROUP`.
pub fn configure_process_group(cmd: &mut Command) {
    imp::configure_process_group(cmd)
}

/// Post-spawn setup (a Job Object on Windows). The returned handle must be
/// kept alive for the lifetime of the process.
pub fn post_spawn_setup(child_pid: Option<u32>) -> Option<ProcessGroupHandle> {
    imp::post_spawn_setup(child_pid)
}

/// Request graceful termination of the child's process group.
/// Unix: SIGTERM via `killpg`, Windows: `CTRL_BREAK_EVENT`.
pub fn signal_graceful(child: &mut Child, child_pid: Option<u32>, group: Option<&ProcessGroupHandle>) {
    imp::signal_graceful(child, child_pid, group)
}

/// Forcefully terminate the child's process group and reap it.
pub async fn force_kill(child: &mut Child, child_pid: Option<u32>, group: Option<&ProcessGroupHandle>) {
    imp::force_kill(child, child_pid, group).await
}

/// Check whether a process with the given PID is still alive.
pub fn is_process_alive(pid: u32) -> bool {
    imp::is_process_alive(pid)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn own_process_is_alive() {
        assert!(is_process_alive(std::process::id()));
    }
}
