//! Dev-server process supervision: implements `ProcessSupervisor`.
//!
//! A launch runs the dependency install through the injected
//! `CommandRunner`, then spawns the dev server in its own process group.
//! A watcher task owns the child, logs its exit code and publishes the exit
//! on a watch channel that termination and shutdown wait on.

use std::os::unix::process::CommandExt;
use std::path::Path;
use std::process::Stdio;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use nix::sys::signal::Signal;
use previewd_common::{ServerConfig, expand_port};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::sync::watch;

use crate::application::ports::{CommandRunner, DevProcess, ProcessSupervisor};
use crate::domain::InstanceError;
use crate::infra::command_runner::TokioCommandRunner;
use crate::infra::signals::signal_group;

/// Time between SIGTERM and SIGKILL.
pub const TERMINATION_GRACE: Duration = Duration::from_secs(5);

const LOG_TARGET: &str = "previewd::dev_server";

/// Commands and limits for launching dev servers.
#[derive(Debug, Clone)]
pub struct DevServerSettings {
    /// Empty skips the install step.
    pub install_command: Vec<String>,
    pub install_timeout: Duration,
    /// `{port}` is substituted in every argument.
    pub dev_server_command: Vec<String>,
    pub quiet_patterns: Vec<String>,
    pub termination_grace: Duration,
}

impl DevServerSettings {
    #[must_use]
    pub fn from_config(config: &ServerConfig) -> Self {
        Self {
            install_command: config.install_command.clone(),
            install_timeout: config.install_timeout(),
            dev_server_command: config.dev_server_command.clone(),
            quiet_patterns: config.quiet_patterns.clone(),
            termination_grace: TERMINATION_GRACE,
        }
    }
}

/// Production `ProcessSupervisor`.
pub struct DevServerSupervisor<R: CommandRunner = TokioCommandRunner> {
    runner: R,
    settings: DevServerSettings,
    quiet: Arc<[String]>,
}

impl<R: CommandRunner> DevServerSupervisor<R> {
    #[must_use]
    pub fn new(runner: R, settings: DevServerSettings) -> Self {
        let quiet = settings.quiet_patterns.clone().into();
        Self {
            runner,
            settings,
            quiet,
        }
    }

    async fn install(&self, app_id: &str, workspace: &Path) -> Result<()> {
        let Some((program, args)) = self.settings.install_command.split_first() else {
            tracing::debug!(app_id, "no install command configured, skipping install");
            return Ok(());
        };
        tracing::info!(app_id, program = %program, "installing dependencies");

        let output = self
            .runner
            .run_with_timeout(
                program,
                args,
                workspace,
                &[("CI", "1")],
                self.settings.install_timeout,
            )
            .await
            .map_err(|e| InstanceError::DependencyInstall(format!("{e:#}")))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(InstanceError::DependencyInstall(format!(
                "{program} exited with {}: {}",
                output.status,
                stderr.trim()
            ))
            .into());
        }
        Ok(())
    }

    fn spawn(&self, app_id: &str, workspace: &Path, port: u16) -> Result<SupervisedProcess> {
        let Some((program, args)) = self.settings.dev_server_command.split_first() else {
            return Err(InstanceError::ProcessLaunch("dev server command is empty".into()).into());
        };
        let args = expand_port(args, port);

        // Own process group, so signals reach the whole dev-server tree.
        let mut command = std::process::Command::new(program);
        command
            .args(&args)
            .current_dir(workspace)
            .env("CI", "1")
            .env("PORT", port.to_string())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .process_group(0);
        let mut child = tokio::process::Command::from(command)
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| InstanceError::ProcessLaunch(format!("spawning {program}: {e}")))?;

        let pid = child.id();
        tracing::info!(app_id, port, pid = ?pid, program = %program, "dev server spawned");

        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(forward_output(
                stdout,
                "stdout",
                app_id.to_string(),
                port,
                Arc::clone(&self.quiet),
            ));
        }
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(forward_output(
                stderr,
                "stderr",
                app_id.to_string(),
                port,
                Arc::clone(&self.quiet),
            ));
        }

        let (exit_tx, exit_rx) = watch::channel(None);
        let owner = app_id.to_string();
        tokio::spawn(async move {
            let code = match child.wait().await {
                Ok(status) => {
                    tracing::info!(app_id = %owner, port, code = ?status.code(), "dev server exited");
                    status.code()
                }
                Err(e) => {
                    tracing::warn!(app_id = %owner, port, error = %e, "waiting for dev server failed");
                    None
                }
            };
            let _ = exit_tx.send(Some(code));
        });

        Ok(SupervisedProcess {
            pid,
            exit: exit_rx,
            grace: self.settings.termination_grace,
            terminating: AtomicBool::new(false),
        })
    }
}

#[async_trait]
impl<R: CommandRunner> ProcessSupervisor for DevServerSupervisor<R> {
    async fn launch(
        &self,
        app_id: &str,
        workspace: &Path,
        port: u16,
    ) -> Result<Box<dyn DevProcess>> {
        self.install(app_id, workspace).await?;
        let process = self.spawn(app_id, workspace, port)?;
        Ok(Box::new(process))
    }
}

/// Handle to a dev server started by [`DevServerSupervisor`].
#[derive(Debug)]
pub struct SupervisedProcess {
    pid: Option<u32>,
    /// `None` while running, `Some(exit code)` once exited.
    exit: watch::Receiver<Option<Option<i32>>>,
    grace: Duration,
    terminating: AtomicBool,
}

#[async_trait]
impl DevProcess for SupervisedProcess {
    fn pid(&self) -> Option<u32> {
        self.pid
    }

    fn has_exited(&self) -> bool {
        self.exit.borrow().is_some()
    }

    fn terminate(&self) {
        if self.has_exited() || self.terminating.swap(true, Ordering::SeqCst) {
            return;
        }
        let Some(pid) = self.pid else {
            return;
        };
        signal_group(pid, Signal::SIGTERM);

        // Without a runtime there is nothing to run the grace timer on.
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            signal_group(pid, Signal::SIGKILL);
            return;
        };

        // Forced kill, abandoned as soon as the process exits.
        let mut exit = self.exit.clone();
        let grace = self.grace;
        runtime.spawn(async move {
            let timed_out = tokio::time::timeout(grace, exit.wait_for(Option::is_some))
                .await
                .is_err();
            if timed_out {
                tracing::warn!(pid, ?grace, "dev server ignored SIGTERM, sending SIGKILL");
                signal_group(pid, Signal::SIGKILL);
            }
        });
    }

    async fn wait(&self) -> Option<i32> {
        let mut exit = self.exit.clone();
        exit.wait_for(Option::is_some).await.ok().and_then(|state| *state).flatten()
    }
}

/// A handle that is dropped without being stopped, for example by a start
/// cancelled mid-flight, still takes its process group down.
impl Drop for SupervisedProcess {
    fn drop(&mut self) {
        self.terminate();
    }
}

/// `true` if `line` contains any of the configured noisy substrings.
pub(crate) fn is_quiet(line: &str, quiet: &[String]) -> bool {
    line.trim().is_empty() || quiet.iter().any(|pattern| line.contains(pattern.as_str()))
}

async fn forward_output<S>(
    stream: S,
    name: &'static str,
    app_id: String,
    port: u16,
    quiet: Arc<[String]>,
) where
    S: AsyncRead + Unpin + Send + 'static,
{
    let mut reader = BufReader::new(stream);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {
                let line = String::from_utf8_lossy(&buf);
                let line = line.trim_end();
                if is_quiet(line, &quiet) {
                    continue;
                }
                if name == "stderr" {
                    tracing::warn!(target: LOG_TARGET, app_id = %app_id, port, stream = name, "{line}");
                } else {
                    tracing::info!(target: LOG_TARGET, app_id = %app_id, port, stream = name, "{line}");
                }
            }
            Err(e) => {
                tracing::debug!(target: LOG_TARGET, app_id = %app_id, error = %e, "output stream closed");
                break;
            }
        }
    }
}
