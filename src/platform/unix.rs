use tokio::process::{Child, Command};
use tracing::{debug, warn};

use nix::sys::signal::{kill, killpg, Signal};
use nix::unistd::Pid;

/// No-op handle on Unix; group signalling uses `killpg` with the child PID,
/// which equals the group ID after `process_group(0)`.
pub struct ProcessGroupHandle;

pub fn configure_process_group(cmd: &mut Command) {
    cmd.process_group(0);
}

pub fn post_spawn_setup(_child_pid: Option<u32>) -> Option<ProcessGroupHandle> {
    None
}

pub fn signal_graceful(child: &mut Child, child_pid: Option<u32>, _group: Option<&ProcessGroupHandle>) {
    let Some(pid) = child_pid else {
        // No PID means the spawn likely failed; request a direct kill.
        let _ = child.start_kill();
        return;
    };

    let pgid = Pid::from_raw(pid as i32);
    match killpg(pgid, Signal::SIGTERM) {
        Ok(()) => {
            debug!(pid, "sent SIGTERM to process group");
        }
        Err(nix::errno::Errno::ESRCH) => {
            debug!(pid, "process group already exited");
        }
        Err(e) => {
            warn!(pid, error = %e, "killpg(SIGTERM) failed, falling back to kill");
            let _ = child.start_kill();
        }
    }
}

pub async fn force_kill(child: &mut Child, child_pid: Option<u32>, _group: Option<&ProcessGroupHandle>) {
    if let Some(pid) = child_pid {
        let pgid = Pid::from_raw(pid as i32);
        if let Err(e) = killpg(pgid, Signal::SIGKILL) {
            if e != nix::errno::Errno::ESRCH {
                warn!(pid, error = %e, "killpg(SIGKILL) failed");
            }
        }
    }
    // kill() also reaps the child; harmless if it already exited.
    let _ = child.kill().await;
}

pub fn is_process_alive(pid: u32) -> bool {
    kill(Pid::from_raw(pid as i32), None).is_ok()
}
