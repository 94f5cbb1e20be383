use std::process::Stdio;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::{broadcast, mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::model::ServiceDescriptor;
use crate::logs::{LogLine, LogStream};
use crate::platform;

/// Exit notification delivered to the orchestrator when a spawned process
/// terminates, whether requested or not. `code` is `None` when the process
/// was killed by a signal.
#[derive(Debug, Clone)]
pub struct ProcessExit {
    pub service: String,
    pub code: Option<i32>,
}

/// One spawned service process.
///
/// Termination is split so the orchestrator can drive the grace period:
/// `signal_terminate` requests a graceful stop of the whole process tree,
/// `force_kill` ends it unconditionally, and `wait_exited` resolves once the
/// exit is confirmed.
#[async_trait]
pub trait ProcessHandle: Send + Sync {
    fn pid(&self) -> Option<u32>;
    fn signal_terminate(&self);
    fn force_kill(&self);
    async fn wait_exited(&self);
}

/// Spawns service processes. The seam exists so orchestration tests can
/// substitute a fake that records spawns instead of forking.
#[async_trait]
pub trait Launcher: Send + Sync {
    async fn spawn(
        &self,
        descriptor: &ServiceDescriptor,
        log_tx: broadcast::Sender<LogLine>,
        exit_tx: mpsc::UnboundedSender<ProcessExit>,
    ) -> Result<Box<dyn ProcessHandle>>;
}

// ---------------------------------------------------------------------------
// OsLauncher — real child processes
// ---------------------------------------------------------------------------

pub struct OsLauncher;

#[async_trait]
impl Launcher for OsLauncher {
    async fn spawn(
        &self,
        descriptor: &ServiceDescriptor,
        log_tx: broadcast::Sender<LogLine>,
        exit_tx: mpsc::UnboundedSender<ProcessExit>,
    ) -> Result<Box<dyn ProcessHandle>> {
        // Direct argument-vector spawn: no shell interpretation, environment
        // overrides merged over the inherited environment.
        let mut cmd = Command::new(&descriptor.command);
        cmd.args(&descriptor.args)
            .current_dir(&descriptor.working_dir)
            .envs(&descriptor.env)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        platform::configure_process_group(&mut cmd);

        let mut child = cmd
            .spawn()
            .with_context(|| format!("failed to spawn service {}", descriptor.key))?;

        let pid = child.id();
        let group = platform::post_spawn_setup(pid);
        debug!(service = %descriptor.key, pid = ?pid, "child spawned");

        let stdout_task = child
            .stdout
            .take()
            .map(|out| spawn_line_pump(out, descriptor.key.clone(), LogStream::Stdout, log_tx.clone()));
        let stderr_task = child
            .stderr
            .take()
            .map(|err| spawn_line_pump(err, descriptor.key.clone(), LogStream::Stderr, log_tx.clone()));

        let term = CancellationToken::new();
        let kill = CancellationToken::new();
        let (exited_tx, exited_rx) = watch::channel(false);

        let service = descriptor.key.clone();
        let waiter_term = term.clone();
        let waiter_kill = kill.clone();
        tokio::spawn(async move {
            let status = tokio::select! {
                res = child.wait() => res.ok(),
                _ = waiter_term.cancelled() => {
                    platform::signal_graceful(&mut child, pid, group.as_ref());
                    tokio::select! {
                        res = child.wait() => res.ok(),
                        _ = waiter_kill.cancelled() => {
                            platform::force_kill(&mut child, pid, group.as_ref()).await;
                            child.wait().await.ok()
                        }
                    }
                }
                _ = waiter_kill.cancelled() => {
                    platform::force_kill(&mut child, pid, group.as_ref()).await;
                    child.wait().await.ok()
                }
            };

            // Let the IO pumps drain before announcing the exit.
            if let Some(task) = stdout_task {
                let _ = task.await;
            }
            if let Some(task) = stderr_task {
                let _ = task.await;
            }

            let code = status.and_then(|s| s.code());
            debug!(service = %service, code = ?code, "process exited");
            let _ = exited_tx.send(true);
            let _ = exit_tx.send(ProcessExit { service, code });
        });

        Ok(Box::new(OsProcess {
            pid,
            term,
            kill,
            exited: exited_rx,
        }))
    }
}

struct OsProcess {
    pid: Option<u32>,
    term: CancellationToken,
    kill: CancellationToken,
    exited: watch::Receiver<bool>,
}

#[async_trait]
impl ProcessHandle for OsProcess {
    fn pid(&self) -> Option<u32> {
        self.pid
    }

    fn signal_terminate(&self) {
        self.term.cancel();
    }

    fn force_kill(&self) {
        self.kill.cancel();
    }

    async fn wait_exited(&self) {
        let mut rx = self.exited.clone();
        // A closed channel means the waiter task is gone, so the process is
        // no longer running either way.
        let _ = rx.wait_for(|exited| *exited).await;
    }
}

fn spawn_line_pump<R>(
    reader: R,
    service: String,
    stream: LogStream,
    tx: broadcast::Sender<LogLine>,
) -> tokio::task::JoinHandle<()>
where
    R: tokio::io::AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut reader = BufReader::new(reader);
        let mut line = String::new();
        loop {
            line.clear();
            match reader.read_line(&mut line).await {
                Ok(0) => break, // EOF
                Ok(_) => {
                    let text = line.trim_end_matches(['\n', '\r']).to_string();
                    let _ = tx.send(LogLine::capture(&service, stream, text));
                }
                Err(e) => {
                    warn!(service = %service, error = %e, "output read error");
                    break;
                }
            }
        }
    })
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use std::time::Duration;

    fn descriptor(command: &str, args: &[&str], dir: &std::path::Path) -> ServiceDescriptor {
        ServiceDescriptor {
            key: "test-svc".into(),
            display_name: "test-svc".into(),
            working_dir: dir.to_path_buf(),
            command: command.into(),
            args: args.iter().map(|a| a.to_string()).collect(),
            env: BTreeMap::new(),
            port: 0,
            health_path: "/".into(),
            required: true,
        }
    }

    async fn next_exit(rx: &mut mpsc::UnboundedReceiver<ProcessExit>) -> ProcessExit {
        tokio::time::timeout(Duration::from_secs(10), rx.recv())
            .await
            .expect("exit event within timeout")
            .expect("channel open")
    }

    #[tokio::test]
    async fn captures_stdout_and_stderr() {
        let dir = tempfile::tempdir().unwrap();
        let desc = descriptor("sh", &["-c", "echo hello; echo oops >&2"], dir.path());
        let (log_tx, mut log_rx) = broadcast::channel(64);
        let (exit_tx, mut exit_rx) = mpsc::unbounded_channel();

        let handle = OsLauncher.spawn(&desc, log_tx, exit_tx).await.unwrap();
        assert!(handle.pid().is_some());

        let exit = next_exit(&mut exit_rx).await;
        assert_eq!(exit.service, "test-svc");
        assert_eq!(exit.code, Some(0));

        let mut lines = Vec::new();
        while let Ok(line) = log_rx.try_recv() {
            lines.push(line);
        }
        assert!(lines
            .iter()
            .any(|l| l.text == "hello" && l.stream == LogStream::Stdout));
        assert!(lines
            .iter()
            .any(|l| l.text == "oops" && l.stream == LogStream::Stderr));
    }

    #[tokio::test]
    async fn env_override_wins() {
        let dir = tempfile::tempdir().unwrap();
        let mut desc = descriptor("sh", &["-c", "echo $APP_MODE"], dir.path());
        desc.env.insert("APP_MODE".into(), "production".into());
        let (log_tx, mut log_rx) = broadcast::channel(16);
        let (exit_tx, mut exit_rx) = mpsc::unbounded_channel();

        OsLauncher.spawn(&desc, log_tx, exit_tx).await.unwrap();
        next_exit(&mut exit_rx).await;

        let mut lines = Vec::new();
        while let Ok(line) = log_rx.try_recv() {
            lines.push(line.text);
        }
        assert!(lines.contains(&"production".to_string()));
    }

    #[tokio::test]
    async fn runs_in_working_directory() {
        let dir = tempfile::tempdir().unwrap();
        let desc = descriptor("sh", &["-c", "pwd"], dir.path());
        let (log_tx, mut log_rx) = broadcast::channel(16);
        let (exit_tx, mut exit_rx) = mpsc::unbounded_channel();

        OsLauncher.spawn(&desc, log_tx, exit_tx).await.unwrap();
        next_exit(&mut exit_rx).await;

        let expected = dir.path().canonicalize().unwrap();
        let mut found = false;
        while let Ok(line) = log_rx.try_recv() {
            if std::path::Path::new(&line.text)
                .canonicalize()
                .map(|p| p == expected)
                .unwrap_or(false)
            {
                found = true;
            }
        }
        assert!(found, "expected pwd output matching {}", expected.display());
    }

    #[tokio::test]
    async fn spawn_fails_for_missing_binary() {
        let dir = tempfile::tempdir().unwrap();
        let desc = descriptor("definitely-not-a-real-binary", &[], dir.path());
        let (log_tx, _) = broadcast::channel(16);
        let (exit_tx, _exit_rx) = mpsc::unbounded_channel();

        let err = match OsLauncher.spawn(&desc, log_tx, exit_tx).await {
            Ok(_) => panic!("expected spawn to fail for missing binary"),
            Err(e) => e,
        };
        assert!(err.to_string().contains("failed to spawn service test-svc"));
    }

    #[tokio::test]
    async fn terminate_stops_long_running_process() {
        let dir = tempfile::tempdir().unwrap();
        let desc = descriptor("sh", &["-c", "sleep 60"], dir.path());
        let (log_tx, _log_rx) = broadcast::channel(16);
        let (exit_tx, mut exit_rx) = mpsc::unbounded_channel();

        let handle = OsLauncher.spawn(&desc, log_tx, exit_tx).await.unwrap();
        let pid = handle.pid().unwrap();

        handle.signal_terminate();
        tokio::time::timeout(Duration::from_secs(10), handle.wait_exited())
            .await
            .expect("process should exit after SIGTERM");

        let exit = next_exit(&mut exit_rx).await;
        // Killed by signal, so there is no exit code.
        assert_eq!(exit.code, None);

        // Give the kernel a moment to reap, then confirm it is gone.
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(!platform::is_process_alive(pid));
    }

    #[tokio::test]
    async fn force_kill_stops_process() {
        let dir = tempfile::tempdir().unwrap();
        let desc = descriptor("sh", &["-c", "sleep 60"], dir.path());
        let (log_tx, _log_rx) = broadcast::channel(16);
        let (exit_tx, mut exit_rx) = mpsc::unbounded_channel();

        let handle = OsLauncher.spawn(&desc, log_tx, exit_tx).await.unwrap();
        handle.force_kill();
        tokio::time::timeout(Duration::from_secs(10), handle.wait_exited())
            .await
            .expect("process should exit after SIGKILL");
        let exit = next_exit(&mut exit_rx).await;
        assert_eq!(exit.code, None);
    }
}
