//! Tunnel providers: implement `TunnelProvider`.
//!
//! `CommandTunnel` drives an external tunnel client (cloudflared by default):
//! one child process per tunnel, whose output is scanned for the public URL.
//! `LocalTunnel` skips the public internet and hands out loopback URLs.

use std::collections::HashMap;
use std::process::Stdio;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use previewd_common::{ServerConfig, expand_port};
use regex::Regex;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Child;
use tokio::sync::{Mutex, mpsc};

use crate::application::ports::TunnelProvider;
use crate::domain::InstanceError;

/// Spawns a tunnel client per port and scrapes its public URL.
pub struct CommandTunnel {
    command: Vec<String>,
    url_pattern: Regex,
    open_timeout: Duration,
    tunnels: Mutex<HashMap<String, Child>>,
}

impl CommandTunnel {
    /// # Errors
    ///
    /// Returns an error if the command is empty or `url_pattern` is not a
    /// valid regex.
    pub fn new(command: Vec<String>, url_pattern: &str, open_timeout: Duration) -> Result<Self> {
        anyhow::ensure!(!command.is_empty(), "tunnel command must not be empty");
        let url_pattern = Regex::new(url_pattern)
            .with_context(|| format!("invalid tunnel URL pattern '{url_pattern}'"))?;
        Ok(Self {
            command,
            url_pattern,
            open_timeout,
            tunnels: Mutex::new(HashMap::new()),
        })
    }

    /// # Errors
    ///
    /// See [`CommandTunnel::new`].
    pub fn from_config(config: &ServerConfig) -> Result<Self> {
        Self::new(
            config.tunnel_command.clone(),
            &config.tunnel_url_pattern,
            config.tunnel_open_timeout(),
        )
    }

    /// Number of tunnel clients currently tracked.
    pub async fn open_count(&self) -> usize {
        self.tunnels.lock().await.len()
    }

    async fn spawn_and_scrape(&self, port: u16) -> Result<(String, Child), InstanceError> {
        let (program, args) = self
            .command
            .split_first()
            .ok_or_else(|| InstanceError::Tunnel("tunnel command is empty".into()))?;
        let args = expand_port(args, port);

        let mut child = tokio::process::Command::new(program)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| InstanceError::Tunnel(format!("spawning {program}: {e}")))?;

        let (tx, mut rx) = mpsc::channel::<String>(64);
        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(pump_lines(stdout, tx.clone()));
        }
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(pump_lines(stderr, tx));
        }

        let scrape = async {
            while let Some(line) = rx.recv().await {
                if let Some(found) = self.url_pattern.find(&line) {
                    return Some(found.as_str().to_string());
                }
            }
            None
        };

        match tokio::time::timeout(self.open_timeout, scrape).await {
            Ok(Some(url)) => Ok((url, child)),
            Ok(None) => {
                let _ = child.kill().await;
                Err(InstanceError::Tunnel(format!(
                    "{program} exited before publishing a URL"
                )))
            }
            Err(_) => {
                let _ = child.kill().await;
                Err(InstanceError::Tunnel(format!(
                    "{program} published no URL within {:?}",
                    self.open_timeout
                )))
            }
        }
    }
}

#[async_trait]
impl TunnelProvider for CommandTunnel {
    async fn open(&self, port: u16) -> Result<String> {
        let (url, child) = self.spawn_and_scrape(port).await?;
        tracing::info!(port, url = %url, pid = ?child.id(), "tunnel opened");
        if let Some(mut stale) = self.tunnels.lock().await.insert(url.clone(), child) {
            tracing::warn!(url = %url, "replacing tunnel client with the same URL");
            let _ = stale.start_kill();
        }
        Ok(url)
    }

    async fn close(&self, url: &str) {
        let Some(mut child) = self.tunnels.lock().await.remove(url) else {
            tracing::debug!(url, "close for unknown tunnel ignored");
            return;
        };
        match child.kill().await {
            Ok(()) => tracing::info!(url, "tunnel closed"),
            Err(e) => tracing::debug!(url, error = %e, "tunnel client already gone"),
        }
    }

    async fn close_all(&self) {
        let drained: Vec<(String, Child)> = self.tunnels.lock().await.drain().collect();
        for (url, mut child) in drained {
            if let Err(e) = child.kill().await {
                tracing::debug!(url = %url, error = %e, "tunnel client already gone");
            }
        }
    }
}

/// Forward lines to `tx`; once nobody listens, keep draining so the client
/// never blocks on a full pipe.
async fn pump_lines<S>(stream: S, tx: mpsc::Sender<String>)
where
    S: AsyncRead + Unpin + Send + 'static,
{
    let mut reader = BufReader::new(stream);
    let mut buf = Vec::new();
    let mut listening = true;
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(_) => {
                let line = String::from_utf8_lossy(&buf).trim_end().to_string();
                tracing::trace!(target: "previewd::tunnel", "{line}");
                if listening && tx.send(line).await.is_err() {
                    listening = false;
                }
            }
        }
    }
}

/// Loopback "tunnel" for offline development.
#[derive(Debug, Default, Clone, Copy)]
pub struct LocalTunnel;

#[async_trait]
impl TunnelProvider for LocalTunnel {
    async fn open(&self, port: u16) -> Result<String> {
        Ok(format!("http://127.0.0.1:{port}"))
    }

    async fn close(&self, _url: &str) {}

    async fn close_all(&self) {}
}
