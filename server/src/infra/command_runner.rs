//! `CommandRunner` backed by tokio child processes.
//!
//! Each command runs as the leader of a fresh process group. On timeout the
//! whole group is killed, so helpers forked by an installer (postinstall
//! scripts, native builds) do not outlive it.

use std::os::unix::process::CommandExt;
use std::path::Path;
use std::process::{Output, Stdio};
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use nix::sys::signal::Signal;
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::application::ports::CommandRunner;
use crate::infra::signals::signal_group;

/// Production `CommandRunner`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioCommandRunner;

#[async_trait]
impl CommandRunner for TokioCommandRunner {
    async fn run_with_timeout(
        &self,
        program: &str,
        args: &[String],
        cwd: &Path,
        envs: &[(&str, &str)],
        timeout: Duration,
    ) -> Result<Output> {
        let mut command = std::process::Command::new(program);
        command
            .args(args)
            .current_dir(cwd)
            .envs(envs.iter().copied())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .process_group(0);
        let mut child = tokio::process::Command::from(command)
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("failed to spawn {program}"))?;

        let pid = child.id();
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();

        let collected = tokio::time::timeout(timeout, async {
            tokio::join!(child.wait(), read_all(stdout), read_all(stderr))
        })
        .await;

        match collected {
            Ok((status, stdout, stderr)) => Ok(Output {
                status: status.with_context(|| format!("waiting for {program}"))?,
                stdout,
                stderr,
            }),
            Err(_) => {
                if let Some(pid) = pid {
                    signal_group(pid, Signal::SIGKILL);
                }
                let _ = child.kill().await;
                anyhow::bail!("{program} timed out after {timeout:?}")
            }
        }
    }
}

async fn read_all<S>(stream: Option<S>) -> Vec<u8>
where
    S: AsyncRead + Unpin,
{
    let mut buf = Vec::new();
    if let Some(mut stream) = stream {
        let _ = stream.read_to_end(&mut buf).await;
    }
    buf
}
