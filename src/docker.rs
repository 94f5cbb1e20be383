use anyhow::{bail, Context, Result};
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::config::model::ContainerSpec;

/// Drives the container-engine CLI (`docker` by default) for the one
/// container-managed service. Exit code 0 is success; failures carry the
/// engine's stderr text.
#[derive(Clone)]
pub struct ContainerEngine {
    binary: String,
}

impl ContainerEngine {
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    async fn run(&self, args: &[String]) -> Result<std::process::Output> {
        debug!(engine = %self.binary, ?args, "invoking container engine");
        Command::new(&self.binary)
            .args(args)
            .output()
            .await
            .with_context(|| format!("invoking {}", self.binary))
    }

    fn stderr_of(output: &std::process::Output) -> String {
        String::from_utf8_lossy(&output.stderr).trim().to_string()
    }

    /// Check that the engine daemon is reachable, not just that the CLI is
    /// installed.
    pub async fn available(&self) -> Result<()> {
        let output = self
            .run(&["version".to_string()])
            .await
            .with_context(|| format!("cannot run {} — is it installed?", self.binary))?;
        if !output.status.success() {
            bail!(
                "container engine is not reachable: {}",
                Self::stderr_of(&output)
            );
        }
        Ok(())
    }

    /// Bring up a fresh container for the spec:
    /// 1. fail fast if the engine is unreachable;
    /// 2. best-effort stop/remove of a stale container with the same name;
    /// 3. best-effort image pull, falling back to whatever is cached;
    /// 4. run a new detached container with the configured port mapping.
    ///
    /// Readiness is the caller's concern; this returns once the container is
    /// created.
    pub async fn ensure_running(&self, spec: &ContainerSpec) -> Result<()> {
        self.available().await?;

        // A stale instance from a previous run is the common case after a
        // crash; absence is not an error.
        for sub in ["stop", "rm"] {
            match self
                .run(&[sub.to_string(), spec.container_name.clone()])
                .await
            {
                Ok(output) if !output.status.success() => {
                    debug!(
                        container = %spec.container_name,
                        "{} of stale container skipped: {}",
                        sub,
                        Self::stderr_of(&output)
                    );
                }
                Ok(_) => {
                    info!(container = %spec.container_name, "removed stale container ({})", sub);
                }
                Err(e) => {
                    debug!(container = %spec.container_name, error = %e, "stale cleanup failed");
                }
            }
        }

        match self.run(&["pull".to_string(), spec.image.clone()]).await {
            Ok(output) if !output.status.success() => {
                warn!(
                    image = %spec.image,
                    "image pull failed, using cached image: {}",
                    Self::stderr_of(&output)
                );
            }
            Ok(_) => {
                info!(image = %spec.image, "image up to date");
            }
            Err(e) => {
                warn!(image = %spec.image, error = %e, "image pull failed, using cached image");
            }
        }

        let args = run_args(spec);
        let output = self.run(&args).await?;
        if !output.status.success() {
            bail!(
                "{} run failed for {}: {}",
                self.binary,
                spec.container_name,
                Self::stderr_of(&output)
            );
        }

        info!(container = %spec.container_name, image = %spec.image, "container started");
        Ok(())
    }

    /// Stop (and optionally remove) the container. Used at shutdown when the
    /// config opts in to stopping the container-managed service.
    pub async fn stop(&self, container_name: &str, remove: bool) -> Result<()> {
        let output = self
            .run(&["stop".to_string(), container_name.to_string()])
            .await?;
        if !output.status.success() {
            bail!(
                "{} stop failed for {}: {}",
                self.binary,
                container_name,
                Self::stderr_of(&output)
            );
        }
        if remove {
            let output = self
                .run(&["rm".to_string(), container_name.to_string()])
                .await?;
            if !output.status.success() {
                bail!(
                    "{} rm failed for {}: {}",
                    self.binary,
                    container_name,
                    Self::stderr_of(&output)
                );
            }
        }
        info!(container = %container_name, "container stopped");
        Ok(())
    }
}

/// Argument vector for `run`: detached, named, port-mapped, with env vars
/// and any extra run arguments ahead of the image.
fn run_args(spec: &ContainerSpec) -> Vec<String> {
    let mut args = vec![
        "run".to_string(),
        "-d".to_string(),
        "--name".to_string(),
        spec.container_name.clone(),
        "-p".to_string(),
        format!("{}:{}", spec.host_port, spec.container_port),
    ];
    for (key, value) in &spec.env {
        args.push("-e".to_string());
        args.push(format!("{}={}", key, value));
    }
    args.extend(spec.run_args.iter().cloned());
    args.push(spec.image.clone());
    args
}
