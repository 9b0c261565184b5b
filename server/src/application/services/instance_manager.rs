//! Application service: instance registry and start/stop orchestration.
//!
//! Imports only from `crate::domain` and `crate::application::ports`.
//! All I/O is routed through injected port traits.
//!
//! Registry map and port pool share one mutex. The lock is held for every
//! check-and-mutate and never across a pipeline stage, so starts for
//! different apps run in parallel while a single app moves through
//! `provisioning → launching → probing → tunneling → ready` one stage at a
//! time.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use previewd_common::{ConfigError, InstancePhase, InstanceStatus, ServerConfig, StartResponse};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use crate::application::ports::{
    DevProcess, ProcessSupervisor, ReadinessProbe, TunnelProvider, WorkspaceProvisioner,
};
use crate::application::services::reaper;
use crate::domain::{InstanceError, InstanceRecord, PortPool, validate_app_id};

/// How long `shutdown` waits for each terminated process to exit.
const SHUTDOWN_WAIT: Duration = Duration::from_secs(6);

/// Tunables for the manager, usually derived from [`ServerConfig`].
#[derive(Debug, Clone)]
pub struct ManagerSettings {
    pub workspace_root: PathBuf,
    pub port_range_start: u16,
    pub port_range_end: u16,
    pub idle_timeout: Duration,
    pub start_timeout: Duration,
    pub readiness_attempts: u32,
    pub bundle_path: Option<String>,
}

impl ManagerSettings {
    #[must_use]
    pub fn from_config(config: &ServerConfig) -> Self {
        Self {
            workspace_root: config.workspace_root.clone(),
            port_range_start: config.port_range_start,
            port_range_end: config.port_range_end,
            idle_timeout: config.idle_timeout(),
            start_timeout: config.start_timeout(),
            readiness_attempts: config.readiness_attempts,
            bundle_path: config.bundle_path().map(str::to_owned),
        }
    }
}

/// The collaborators the manager drives.
#[derive(Clone)]
pub struct Collaborators {
    pub workspaces: Arc<dyn WorkspaceProvisioner>,
    pub processes: Arc<dyn ProcessSupervisor>,
    pub probe: Arc<dyn ReadinessProbe>,
    pub tunnels: Arc<dyn TunnelProvider>,
}

struct Instance {
    record: InstanceRecord,
    process: Option<Box<dyn DevProcess>>,
}

struct Registry {
    instances: HashMap<String, Instance>,
    ports: PortPool,
    next_generation: u64,
}

struct Inner {
    registry: Mutex<Registry>,
    collaborators: Collaborators,
    settings: ManagerSettings,
    reaper: Mutex<Option<JoinHandle<()>>>,
}

/// Owner of every live instance on this host.
///
/// Cheap to clone; clones share the same registry.
#[derive(Clone)]
pub struct InstanceManager {
    inner: Arc<Inner>,
}

/// Non-owning handle used by the reaper task.
#[derive(Clone)]
pub struct WeakInstanceManager {
    inner: Weak<Inner>,
}

impl WeakInstanceManager {
    #[must_use]
    pub fn upgrade(&self) -> Option<InstanceManager> {
        self.inner.upgrade().map(|inner| InstanceManager { inner })
    }
}

enum Claim {
    Reused(StartResponse),
    New {
        generation: u64,
        port: u16,
        workspace: PathBuf,
    },
}

/// What a teardown found and took ownership of.
struct Teardown {
    found: bool,
    process: Option<Box<dyn DevProcess>>,
}

impl Teardown {
    fn missing() -> Self {
        Self {
            found: false,
            process: None,
        }
    }
}

impl InstanceManager {
    /// Build a manager with an empty registry.
    ///
    /// # Errors
    ///
    /// Returns an error if the configured port range is empty.
    pub fn new(
        settings: ManagerSettings,
        collaborators: Collaborators,
    ) -> Result<Self, ConfigError> {
        let ports = PortPool::new(settings.port_range_start, settings.port_range_end)?;
        Ok(Self {
            inner: Arc::new(Inner {
                registry: Mutex::new(Registry {
                    instances: HashMap::new(),
                    ports,
                    next_generation: 0,
                }),
                collaborators,
                settings,
                reaper: Mutex::new(None),
            }),
        })
    }

    #[must_use]
    pub fn settings(&self) -> &ManagerSettings {
        &self.inner.settings
    }

    #[must_use]
    pub fn downgrade(&self) -> WeakInstanceManager {
        WeakInstanceManager {
            inner: Arc::downgrade(&self.inner),
        }
    }

    // ── Start ────────────────────────────────────────────────────────────────

    /// Start an instance for `app_id`, or reuse the ready one.
    ///
    /// Never fails: errors are reported through [`StartResponse::error`].
    pub async fn start(
        &self,
        app_id: &str,
        app_name: &str,
        files: &BTreeMap<String, String>,
    ) -> StartResponse {
        match self.try_start(app_id, app_name, files).await {
            Ok(response) => response,
            Err(err) => StartResponse::failed(err.to_string()),
        }
    }

    /// Typed variant of [`InstanceManager::start`].
    ///
    /// # Errors
    ///
    /// Returns the stage-specific [`InstanceError`] of the first failing
    /// stage. Everything allocated before the failure has been released by
    /// the time this returns.
    pub async fn try_start(
        &self,
        app_id: &str,
        app_name: &str,
        files: &BTreeMap<String, String>,
    ) -> Result<StartResponse, InstanceError> {
        validate_app_id(app_id)?;

        let (generation, port, workspace) = match self.claim(app_id, app_name).await? {
            Claim::Reused(response) => {
                tracing::info!(app_id, port = ?response.port, "reusing ready instance");
                return Ok(response);
            }
            Claim::New {
                generation,
                port,
                workspace,
            } => (generation, port, workspace),
        };
        tracing::info!(app_id, port, workspace = %workspace.display(), "starting instance");

        let pipeline = self.run_pipeline(app_id, generation, port, &workspace, files);
        let outcome = match tokio::time::timeout(self.inner.settings.start_timeout, pipeline).await
        {
            Ok(outcome) => outcome,
            Err(_) => Err(InstanceError::StartTimeout(
                self.inner.settings.start_timeout.as_secs(),
            )),
        };

        match outcome {
            Ok(response) => {
                tracing::info!(
                    app_id,
                    port,
                    tunnel_url = ?response.tunnel_url,
                    "instance ready"
                );
                Ok(response)
            }
            Err(err) => {
                tracing::warn!(app_id, port, error = %err, "start failed, rolling back");
                self.teardown(app_id, Some(generation)).await;
                Err(err)
            }
        }
    }

    /// Reserve the registry slot and a port, or hand back the ready instance.
    async fn claim(&self, app_id: &str, app_name: &str) -> Result<Claim, InstanceError> {
        let mut registry = self.inner.registry.lock().await;
        if let Some(existing) = registry.instances.get_mut(app_id) {
            return match existing.record.phase {
                InstancePhase::Ready => {
                    existing.record.touch(Instant::now());
                    Ok(Claim::Reused(ready_response(&existing.record)))
                }
                InstancePhase::Stopping => Err(InstanceError::Stopping(app_id.to_string())),
                _ => Err(InstanceError::StartInProgress(app_id.to_string())),
            };
        }

        let port = registry.ports.acquire()?;
        registry.next_generation += 1;
        let generation = registry.next_generation;
        let workspace = self.inner.settings.workspace_root.join(app_id);
        let record = InstanceRecord::new(
            app_id,
            app_name,
            workspace.clone(),
            port,
            generation,
            Instant::now(),
        );
        registry.instances.insert(
            app_id.to_string(),
            Instance {
                record,
                process: None,
            },
        );
        Ok(Claim::New {
            generation,
            port,
            workspace,
        })
    }

    async fn run_pipeline(
        &self,
        app_id: &str,
        generation: u64,
        port: u16,
        workspace: &Path,
        files: &BTreeMap<String, String>,
    ) -> Result<StartResponse, InstanceError> {
        let collab = &self.inner.collaborators;

        collab
            .workspaces
            .provision(workspace, files)
            .await
            .map_err(|e| classify(e, InstanceError::WorkspaceProvision))?;
        self.advance(app_id, generation, InstancePhase::Launching)
            .await?;

        let process = collab
            .processes
            .launch(app_id, workspace, port)
            .await
            .map_err(|e| classify(e, InstanceError::ProcessLaunch))?;
        self.attach_process(app_id, generation, process).await?;

        let attempts = self.inner.settings.readiness_attempts;
        if !collab.probe.wait_ready(port, attempts).await {
            return Err(InstanceError::ReadinessTimeout { port, attempts });
        }
        self.advance(app_id, generation, InstancePhase::Tunneling)
            .await?;

        let url = collab
            .tunnels
            .open(port)
            .await
            .map_err(|e| classify(e, InstanceError::Tunnel))?;
        self.finish(app_id, generation, url).await
    }

    /// Move the in-flight record to `phase`, unless it was stopped meanwhile.
    async fn advance(
        &self,
        app_id: &str,
        generation: u64,
        phase: InstancePhase,
    ) -> Result<(), InstanceError> {
        let mut registry = self.inner.registry.lock().await;
        let instance = live_instance(&mut registry, app_id, generation)?;
        instance.record.advance(phase);
        tracing::debug!(app_id, %phase, "instance phase");
        Ok(())
    }

    async fn attach_process(
        &self,
        app_id: &str,
        generation: u64,
        process: Box<dyn DevProcess>,
    ) -> Result<(), InstanceError> {
        let mut registry = self.inner.registry.lock().await;
        match live_instance(&mut registry, app_id, generation) {
            Ok(instance) => {
                instance.process = Some(process);
                instance.record.advance(InstancePhase::Probing);
                Ok(())
            }
            Err(err) => {
                process.terminate();
                Err(err)
            }
        }
    }

    async fn finish(
        &self,
        app_id: &str,
        generation: u64,
        tunnel_url: String,
    ) -> Result<StartResponse, InstanceError> {
        let bundle_path = self.inner.settings.bundle_path.as_deref();
        {
            let mut registry = self.inner.registry.lock().await;
            if let Ok(instance) = live_instance(&mut registry, app_id, generation) {
                instance.record.mark_ready(tunnel_url, bundle_path);
                return Ok(ready_response(&instance.record));
            }
        }
        self.inner.collaborators.tunnels.close(&tunnel_url).await;
        Err(InstanceError::Stopped(app_id.to_string()))
    }

    // ── Stop ─────────────────────────────────────────────────────────────────

    /// Stop the instance for `app_id`.
    ///
    /// Returns `true` if an instance was found and its stop initiated. A
    /// start still in flight for `app_id` then fails with
    /// [`InstanceError::Stopped`].
    pub async fn stop(&self, app_id: &str) -> bool {
        let found = self.teardown(app_id, None).await.found;
        if found {
            tracing::info!(app_id, "instance stopped");
        }
        found
    }

    /// Tear down the instance for `app_id`, optionally only if it is still
    /// generation `expected`.
    ///
    /// The record goes to `stopping` and its process is signalled while the
    /// lock is held; from then on reads report it absent and further
    /// teardowns find nothing. The tunnel is closed outside the lock, then
    /// the record is removed and its port released.
    async fn teardown(&self, app_id: &str, expected: Option<u64>) -> Teardown {
        let (generation, port, tunnel_url, process) = {
            let mut registry = self.inner.registry.lock().await;
            let Some(instance) = registry.instances.get_mut(app_id) else {
                return Teardown::missing();
            };
            if expected.is_some_and(|g| g != instance.record.generation)
                || instance.record.phase == InstancePhase::Stopping
            {
                return Teardown::missing();
            }
            instance.record.phase = InstancePhase::Stopping;
            let process = instance.process.take();
            if let Some(process) = &process {
                process.terminate();
            }
            (
                instance.record.generation,
                instance.record.port,
                instance.record.tunnel_url.clone(),
                process,
            )
        };

        // Runs to completion even if the caller is dropped.
        let manager = self.clone();
        let owner = app_id.to_string();
        let drain = tokio::spawn(async move {
            if let Some(url) = tunnel_url {
                manager.inner.collaborators.tunnels.close(&url).await;
            }
            let mut registry = manager.inner.registry.lock().await;
            let same = registry
                .instances
                .get(&owner)
                .is_some_and(|i| i.record.generation == generation);
            if same {
                registry.instances.remove(&owner);
                registry.ports.release(port);
            }
        });
        if let Err(e) = drain.await {
            tracing::warn!(app_id, error = %e, "teardown task failed");
        }

        Teardown {
            found: true,
            process,
        }
    }

    // ── Reads ────────────────────────────────────────────────────────────────

    /// Snapshot of one instance, or `None` if there is no record or it is
    /// being stopped.
    pub async fn status(&self, app_id: &str) -> Option<InstanceStatus> {
        let registry = self.inner.registry.lock().await;
        let now = Instant::now();
        registry
            .instances
            .get(app_id)
            .filter(|instance| instance.record.phase != InstancePhase::Stopping)
            .map(|instance| instance.record.status(now))
    }

    /// Snapshot of every instance not being stopped, ordered by `app_id`.
    pub async fn list(&self) -> Vec<InstanceStatus> {
        let registry = self.inner.registry.lock().await;
        let now = Instant::now();
        let mut statuses: Vec<InstanceStatus> = registry
            .instances
            .values()
            .filter(|instance| instance.record.phase != InstancePhase::Stopping)
            .map(|instance| instance.record.status(now))
            .collect();
        statuses.sort_by(|a, b| a.app_id.cmp(&b.app_id));
        statuses
    }

    /// Number of ports currently handed out, including those of instances
    /// still being stopped.
    pub async fn ports_in_use(&self) -> usize {
        self.inner.registry.lock().await.ports.in_use_count()
    }

    // ── Reaper ───────────────────────────────────────────────────────────────

    /// Stop ready instances idle past the threshold, or whose dev server has
    /// exited. Returns how many were stopped.
    pub async fn sweep_idle(&self) -> usize {
        self.sweep_idle_at(Instant::now()).await
    }

    /// [`InstanceManager::sweep_idle`] evaluated at `now`.
    pub async fn sweep_idle_at(&self, now: Instant) -> usize {
        let threshold = self.inner.settings.idle_timeout;
        let victims: Vec<(String, u64, &'static str)> = {
            let registry = self.inner.registry.lock().await;
            registry
                .instances
                .iter()
                .filter_map(|(app_id, instance)| {
                    let record = &instance.record;
                    if record.is_idle(now, threshold) {
                        Some((app_id.clone(), record.generation, "idle"))
                    } else if record.is_ready()
                        && instance.process.as_ref().is_some_and(|p| p.has_exited())
                    {
                        Some((app_id.clone(), record.generation, "exited"))
                    } else {
                        None
                    }
                })
                .collect()
        };

        let mut stopped = 0;
        for (app_id, generation, reason) in victims {
            if self.teardown(&app_id, Some(generation)).await.found {
                tracing::info!(app_id = %app_id, reason, "reaped instance");
                stopped += 1;
            }
        }
        stopped
    }

    /// Start the periodic idle sweep. Replaces any reaper already running.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::ZeroDuration`] if `interval` is zero.
    pub async fn spawn_reaper(&self, interval: Duration) -> Result<(), ConfigError> {
        if interval.is_zero() {
            return Err(ConfigError::ZeroDuration("sweep interval"));
        }
        let handle = reaper::spawn(self.downgrade(), interval);
        if let Some(previous) = self.inner.reaper.lock().await.replace(handle) {
            previous.abort();
        }
        Ok(())
    }

    // ── Shutdown ─────────────────────────────────────────────────────────────

    /// Stop every instance, close every tunnel and disable the reaper.
    ///
    /// Waits (bounded) for the terminated processes to exit.
    pub async fn shutdown(&self) {
        if let Some(reaper) = self.inner.reaper.lock().await.take() {
            reaper.abort();
        }

        let app_ids: Vec<String> = {
            let registry = self.inner.registry.lock().await;
            registry.instances.keys().cloned().collect()
        };
        tracing::info!(count = app_ids.len(), "shutting down instances");

        let mut processes = Vec::new();
        for app_id in &app_ids {
            if let Some(process) = self.teardown(app_id, None).await.process {
                processes.push(process);
            }
        }
        self.inner.collaborators.tunnels.close_all().await;

        for process in processes {
            if tokio::time::timeout(SHUTDOWN_WAIT, process.wait())
                .await
                .is_err()
            {
                tracing::warn!(pid = ?process.pid(), "dev server still running after shutdown wait");
            }
        }
    }
}

fn live_instance<'a>(
    registry: &'a mut Registry,
    app_id: &str,
    generation: u64,
) -> Result<&'a mut Instance, InstanceError> {
    registry
        .instances
        .get_mut(app_id)
        .filter(|i| i.record.generation == generation && i.record.phase != InstancePhase::Stopping)
        .ok_or_else(|| InstanceError::Stopped(app_id.to_string()))
}

fn ready_response(record: &InstanceRecord) -> StartResponse {
    StartResponse::ready(
        record.port,
        record.tunnel_url.clone(),
        record.bundle_url.clone(),
    )
}

/// Recover the typed error a stage raised, or file it under the stage.
fn classify(err: anyhow::Error, stage: fn(String) -> InstanceError) -> InstanceError {
    match err.downcast::<InstanceError>() {
        Ok(typed) => typed,
        Err(other) => stage(format!("{other:#}")),
    }
}
