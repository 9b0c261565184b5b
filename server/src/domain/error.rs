//! Typed lifecycle errors.
//!
//! Every variant converts to `anyhow::Error` via `?`; the instance manager
//! recovers the typed variant with `downcast` when classifying a failed stage.

use thiserror::Error;

/// Errors raised while starting, inspecting or stopping an instance.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum InstanceError {
    #[error("port pool exhausted: all {capacity} ports are in use")]
    PortPoolExhausted { capacity: usize },

    #[error("workspace provisioning failed: {0}")]
    WorkspaceProvision(String),

    #[error("dependency install failed: {0}")]
    DependencyInstall(String),

    #[error("dev server failed to launch: {0}")]
    ProcessLaunch(String),

    #[error("dev server on port {port} was not ready after {attempts} attempts")]
    ReadinessTimeout { port: u16, attempts: u32 },

    #[error("tunnel unavailable: {0}")]
    Tunnel(String),

    #[error("no instance for app '{0}'")]
    NotFound(String),

    #[error("app '{0}' is already starting; wait for it to finish or stop it first")]
    StartInProgress(String),

    #[error("app '{0}' is stopping; retry once it is gone")]
    Stopping(String),

    #[error("invalid app id '{0}': use 1-128 characters from [A-Za-z0-9._-]")]
    InvalidAppId(String),

    #[error("start sequence timed out after {0}s")]
    StartTimeout(u64),

    #[error("app '{0}' was stopped while starting")]
    Stopped(String),
}
