//! Port trait definitions for the Application layer.
//!
//! Ports are the interfaces (contracts) that infrastructure must fulfill.
//! They are object safe and `Send + Sync` so the instance manager can hold
//! them as `Arc<dyn _>` and run behind a multi-threaded HTTP server.

use std::collections::BTreeMap;
use std::path::Path;
use std::process::Output;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;

// ── Workspace Port ────────────────────────────────────────────────────────────

/// Materializes an application's files on disk.
#[async_trait]
pub trait WorkspaceProvisioner: Send + Sync {
    /// Replace whatever exists at `path` with exactly `files`.
    ///
    /// Keys of `files` are paths relative to `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the old tree cannot be cleared or any file cannot
    /// be written. The instance must not be launched after an error.
    async fn provision(&self, path: &Path, files: &BTreeMap<String, String>) -> Result<()>;
}

// ── Process Ports ─────────────────────────────────────────────────────────────

/// A running dev-server process owned by one instance.
#[async_trait]
pub trait DevProcess: Send + Sync + std::fmt::Debug {
    /// OS process id, if the process was started.
    fn pid(&self) -> Option<u32>;

    /// `true` once the process has exited for any reason.
    fn has_exited(&self) -> bool;

    /// Ask the process to stop, escalating to a forced kill after the grace
    /// window. Calling this on an exited process is a no-op.
    fn terminate(&self);

    /// Wait until the process has exited and return its exit code, if any.
    async fn wait(&self) -> Option<i32>;
}

/// Launches the external dev-server program for an instance.
#[async_trait]
pub trait ProcessSupervisor: Send + Sync {
    /// Install dependencies in `workspace`, then start the dev server bound
    /// to `port` with `workspace` as its working directory.
    ///
    /// # Errors
    ///
    /// Returns an error wrapping `InstanceError::DependencyInstall` when the
    /// install step fails or times out, and `InstanceError::ProcessLaunch`
    /// when the program cannot be spawned.
    async fn launch(&self, app_id: &str, workspace: &Path, port: u16)
    -> Result<Box<dyn DevProcess>>;
}

// ── Command Runner Port ───────────────────────────────────────────────────────

/// Abstracts bounded, captured process execution so infrastructure can be
/// swapped or mocked.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run `program` in `cwd` with extra environment and capture its output.
    ///
    /// # Errors
    ///
    /// Returns an error if the process cannot be spawned or exceeds `timeout`.
    /// On timeout, the child process must be killed (not left orphaned).
    async fn run_with_timeout(
        &self,
        program: &str,
        args: &[String],
        cwd: &Path,
        envs: &[(&str, &str)],
        timeout: Duration,
    ) -> Result<Output>;
}

// ── Readiness Port ────────────────────────────────────────────────────────────

/// Polls a locally bound dev server until it answers.
#[async_trait]
pub trait ReadinessProbe: Send + Sync {
    /// Returns `true` as soon as the server on `port` responds successfully,
    /// `false` after `max_attempts` failed attempts. Network errors count as
    /// "not ready yet".
    async fn wait_ready(&self, port: u16, max_attempts: u32) -> bool;
}

// ── Tunnel Port ───────────────────────────────────────────────────────────────

/// Opens and closes public tunnels to local ports.
#[async_trait]
pub trait TunnelProvider: Send + Sync {
    /// Open a tunnel to `127.0.0.1:port` and return its public URL.
    ///
    /// # Errors
    ///
    /// Returns an error wrapping `InstanceError::Tunnel` on provider failure.
    async fn open(&self, port: u16) -> Result<String>;

    /// Close the tunnel serving `url`. Unknown or already closed URLs are
    /// ignored.
    async fn close(&self, url: &str);

    /// Close every tunnel this provider has opened.
    async fn close_all(&self);
}
