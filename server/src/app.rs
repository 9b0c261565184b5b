//! Application context: wires production collaborators from configuration.
//!
//! `AppContext` is built once in `main` and owns everything the HTTP surface
//! and the shutdown path need.

use std::sync::Arc;

use anyhow::{Context, Result};
use previewd_common::{ServerConfig, TunnelKind};

use crate::application::TunnelProvider;
use crate::application::services::{Collaborators, InstanceManager, ManagerSettings};
use crate::infra::dev_server::DevServerSettings;
use crate::infra::{
    CommandTunnel, DevServerSupervisor, FsWorkspaceProvisioner, HttpReadinessProbe, LocalTunnel,
    TokioCommandRunner,
};

/// Unified server state.
pub struct AppContext {
    pub config: ServerConfig,
    pub manager: InstanceManager,
}

impl AppContext {
    /// Validate `config` and build the manager with production collaborators.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid or the tunnel URL
    /// pattern does not compile.
    pub fn new(config: ServerConfig) -> Result<Self> {
        config.validate().context("invalid configuration")?;

        let tunnels: Arc<dyn TunnelProvider> = match config.tunnel {
            TunnelKind::Command => Arc::new(CommandTunnel::from_config(&config)?),
            TunnelKind::Local => Arc::new(LocalTunnel),
        };
        let collaborators = Collaborators {
            workspaces: Arc::new(FsWorkspaceProvisioner),
            processes: Arc::new(DevServerSupervisor::new(
                TokioCommandRunner,
                DevServerSettings::from_config(&config),
            )),
            probe: Arc::new(HttpReadinessProbe::default()),
            tunnels,
        };

        let manager = InstanceManager::new(ManagerSettings::from_config(&config), collaborators)
            .context("building instance manager")?;
        Ok(Self { config, manager })
    }
}
