//! Shared in-memory collaborators for unit tests.
//!
//! Each stub records what the manager asked of it so tests can assert on
//! calls without touching the filesystem, processes or the network.

#![allow(clippy::expect_used, clippy::unwrap_used)]

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use previewd::application::services::{Collaborators, InstanceManager, ManagerSettings};
use previewd::application::{
    DevProcess, ProcessSupervisor, ReadinessProbe, TunnelProvider, WorkspaceProvisioner,
};
use previewd::domain::InstanceError;

pub const BUNDLE_PATH: &str = "/index.bundle?platform=ios&dev=true&minify=false";

pub fn tunnel_url(port: u16) -> String {
    format!("https://app-{port}.stub.example")
}

pub fn files() -> BTreeMap<String, String> {
    BTreeMap::from([
        ("package.json".to_string(), "{}".to_string()),
        ("App.js".to_string(), "export default () => null;".to_string()),
    ])
}

// ── Workspace ─────────────────────────────────────────────────────────────────

#[derive(Default)]
pub struct StubWorkspaces {
    pub fail: bool,
    pub calls: AtomicUsize,
    pub paths: Mutex<Vec<PathBuf>>,
}

#[async_trait]
impl WorkspaceProvisioner for StubWorkspaces {
    async fn provision(&self, path: &Path, _files: &BTreeMap<String, String>) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.paths.lock().unwrap().push(path.to_path_buf());
        if self.fail {
            anyhow::bail!("disk full");
        }
        Ok(())
    }
}

// ── Processes ─────────────────────────────────────────────────────────────────

/// Observable state of one stub dev server.
#[derive(Debug, Default)]
pub struct ProcessState {
    pub exited: AtomicBool,
    pub terminations: AtomicUsize,
}

#[derive(Debug)]
pub struct StubProcess {
    state: Arc<ProcessState>,
}

#[async_trait]
impl DevProcess for StubProcess {
    fn pid(&self) -> Option<u32> {
        Some(4242)
    }

    fn has_exited(&self) -> bool {
        self.state.exited.load(Ordering::SeqCst)
    }

    fn terminate(&self) {
        self.state.terminations.fetch_add(1, Ordering::SeqCst);
        self.state.exited.store(true, Ordering::SeqCst);
    }

    async fn wait(&self) -> Option<i32> {
        while !self.has_exited() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        Some(0)
    }
}

#[derive(Default)]
pub struct StubProcesses {
    pub fail_install: bool,
    pub launched: Mutex<Vec<(String, u16, Arc<ProcessState>)>>,
}

impl StubProcesses {
    pub fn launch_count(&self) -> usize {
        self.launched.lock().unwrap().len()
    }

    pub fn state(&self, index: usize) -> Arc<ProcessState> {
        Arc::clone(&self.launched.lock().unwrap()[index].2)
    }
}

#[async_trait]
impl ProcessSupervisor for StubProcesses {
    async fn launch(
        &self,
        app_id: &str,
        _workspace: &Path,
        port: u16,
    ) -> Result<Box<dyn DevProcess>> {
        if self.fail_install {
            return Err(InstanceError::DependencyInstall("npm exited with 1".into()).into());
        }
        let state = Arc::new(ProcessState::default());
        self.launched
            .lock()
            .unwrap()
            .push((app_id.to_string(), port, Arc::clone(&state)));
        Ok(Box::new(StubProcess { state }))
    }
}

// ── Probe ─────────────────────────────────────────────────────────────────────

pub struct StubProbe {
    pub ready: bool,
    pub delay: Duration,
}

impl Default for StubProbe {
    fn default() -> Self {
        Self {
            ready: true,
            delay: Duration::ZERO,
        }
    }
}

#[async_trait]
impl ReadinessProbe for StubProbe {
    async fn wait_ready(&self, _port: u16, _max_attempts: u32) -> bool {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.ready
    }
}

// ── Tunnel ────────────────────────────────────────────────────────────────────

#[derive(Default)]
pub struct StubTunnels {
    pub fail: bool,
    /// Returned for every port instead of [`tunnel_url`].
    pub fixed_url: Option<String>,
    pub open_delay: Duration,
    pub close_delay: Duration,
    pub opened: Mutex<Vec<String>>,
    pub closed: Mutex<Vec<String>>,
    pub close_all_calls: AtomicUsize,
}

impl StubTunnels {
    pub fn closed(&self) -> Vec<String> {
        self.closed.lock().unwrap().clone()
    }
}

#[async_trait]
impl TunnelProvider for StubTunnels {
    async fn open(&self, port: u16) -> Result<String> {
        if self.fail {
            anyhow::bail!("provider rejected the connection");
        }
        tokio::time::sleep(self.open_delay).await;
        let url = self.fixed_url.clone().unwrap_or_else(|| tunnel_url(port));
        self.opened.lock().unwrap().push(url.clone());
        Ok(url)
    }

    async fn close(&self, url: &str) {
        tokio::time::sleep(self.close_delay).await;
        self.closed.lock().unwrap().push(url.to_string());
    }

    async fn close_all(&self) {
        self.close_all_calls.fetch_add(1, Ordering::SeqCst);
    }
}

// ── Harness ───────────────────────────────────────────────────────────────────

pub struct Harness {
    pub manager: InstanceManager,
    pub workspaces: Arc<StubWorkspaces>,
    pub processes: Arc<StubProcesses>,
    pub probe: Arc<StubProbe>,
    pub tunnels: Arc<StubTunnels>,
}

pub struct HarnessBuilder {
    settings: ManagerSettings,
    workspaces: StubWorkspaces,
    processes: StubProcesses,
    probe: StubProbe,
    tunnels: StubTunnels,
}

impl Harness {
    pub fn builder() -> HarnessBuilder {
        HarnessBuilder {
            settings: ManagerSettings {
                workspace_root: PathBuf::from("/srv/previewd"),
                port_range_start: 8081,
                port_range_end: 8180,
                idle_timeout: Duration::from_secs(15 * 60),
                start_timeout: Duration::from_secs(5),
                readiness_attempts: 3,
                bundle_path: Some(BUNDLE_PATH.to_string()),
            },
            workspaces: StubWorkspaces::default(),
            processes: StubProcesses::default(),
            probe: StubProbe::default(),
            tunnels: StubTunnels::default(),
        }
    }

    pub fn new() -> Self {
        Self::builder().build()
    }
}

impl HarnessBuilder {
    pub fn ports(mut self, start: u16, end: u16) -> Self {
        self.settings.port_range_start = start;
        self.settings.port_range_end = end;
        self
    }

    pub fn idle_timeout(mut self, timeout: Duration) -> Self {
        self.settings.idle_timeout = timeout;
        self
    }

    pub fn start_timeout(mut self, timeout: Duration) -> Self {
        self.settings.start_timeout = timeout;
        self
    }

    pub fn no_bundle(mut self) -> Self {
        self.settings.bundle_path = None;
        self
    }

    pub fn failing_workspace(mut self) -> Self {
        self.workspaces.fail = true;
        self
    }

    pub fn failing_install(mut self) -> Self {
        self.processes.fail_install = true;
        self
    }

    pub fn never_ready(mut self) -> Self {
        self.probe.ready = false;
        self
    }

    pub fn slow_probe(mut self, delay: Duration) -> Self {
        self.probe.delay = delay;
        self
    }

    pub fn fixed_tunnel_url(mut self, url: &str) -> Self {
        self.tunnels.fixed_url = Some(url.to_string());
        self
    }

    pub fn failing_tunnel(mut self) -> Self {
        self.tunnels.fail = true;
        self
    }

    pub fn slow_tunnel_open(mut self, delay: Duration) -> Self {
        self.tunnels.open_delay = delay;
        self
    }

    pub fn slow_tunnel_close(mut self, delay: Duration) -> Self {
        self.tunnels.close_delay = delay;
        self
    }

    pub fn build(self) -> Harness {
        let workspaces = Arc::new(self.workspaces);
        let processes = Arc::new(self.processes);
        let probe = Arc::new(self.probe);
        let tunnels = Arc::new(self.tunnels);
        let collaborators = Collaborators {
            workspaces: workspaces.clone(),
            processes: processes.clone(),
            probe: probe.clone(),
            tunnels: tunnels.clone(),
        };
        let manager =
            InstanceManager::new(self.settings, collaborators).expect("valid port range");
        Harness {
            manager,
            workspaces,
            processes,
            probe,
            tunnels,
        }
    }
}
