use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

/// Placeholder substituted with the allocated port in command arguments.
pub const PORT_PLACEHOLDER: &str = "{port}";

/// Which tunnel provider the server wires in.
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum TunnelKind {
    /// Spawn an external tunnel client and scrape its public URL.
    #[default]
    Command,
    /// No public tunnel; hand out the loopback URL.
    Local,
}

/// Supervisor configuration.
///
/// Loaded by the server from `PREVIEWD_*` environment variables via `envy`;
/// list-valued fields are comma separated.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Listen address for the REST surface (default: 0.0.0.0:3003)
    #[serde(default = "default_listen_addr")]
    pub listen_addr: SocketAddr,

    /// Directory holding one subdirectory per application workspace.
    #[serde(default = "default_workspace_root")]
    pub workspace_root: PathBuf,

    /// First port of the dev-server pool (inclusive).
    #[serde(default = "default_port_range_start")]
    pub port_range_start: u16,

    /// Last port of the dev-server pool (inclusive).
    #[serde(default = "default_port_range_end")]
    pub port_range_end: u16,

    #[serde(default = "default_idle_timeout_secs")]
    pub idle_timeout_secs: u64,

    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,

    /// Upper bound on a whole start sequence.
    #[serde(default = "default_start_timeout_secs")]
    pub start_timeout_secs: u64,

    #[serde(default = "default_install_timeout_secs")]
    pub install_timeout_secs: u64,

    /// Dependency install command. Empty skips the install step.
    #[serde(default = "default_install_command")]
    pub install_command: Vec<String>,

    /// Dev-server command; `{port}` is replaced with the allocated port.
    #[serde(default = "default_dev_server_command")]
    pub dev_server_command: Vec<String>,

    /// Output lines containing any of these substrings are not logged.
    #[serde(default = "default_quiet_patterns")]
    pub quiet_patterns: Vec<String>,

    #[serde(default = "default_readiness_attempts")]
    pub readiness_attempts: u32,

    /// Path appended to the tunnel URL to form the bundle URL. Empty disables it.
    #[serde(default = "default_bundle_path")]
    pub bundle_path: String,

    #[serde(default)]
    pub tunnel: TunnelKind,

    /// Tunnel client command; `{port}` is replaced with the local port.
    #[serde(default = "default_tunnel_command")]
    pub tunnel_command: Vec<String>,

    /// Regex matching the public URL in the tunnel client's output.
    #[serde(default = "default_tunnel_url_pattern")]
    pub tunnel_url_pattern: String,

    #[serde(default = "default_tunnel_open_timeout_secs")]
    pub tunnel_open_timeout_secs: u64,
}

/// Rejected configuration.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("port range {start}-{end} is empty")]
    EmptyPortRange { start: u16, end: u16 },

    #[error("dev server command must not be empty")]
    EmptyDevServerCommand,

    #[error("tunnel command must not be empty when the command tunnel is selected")]
    EmptyTunnelCommand,

    #[error("{0} must be greater than zero")]
    ZeroDuration(&'static str),
}

fn default_listen_addr() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 3003))
}

fn default_workspace_root() -> PathBuf {
    std::env::temp_dir().join("previewd-workspaces")
}

fn default_port_range_start() -> u16 {
    8081
}

fn default_port_range_end() -> u16 {
    8180
}

fn default_idle_timeout_secs() -> u64 {
    15 * 60
}

fn default_sweep_interval_secs() -> u64 {
    5 * 60
}

fn default_start_timeout_secs() -> u64 {
    5 * 60
}

fn default_install_timeout_secs() -> u64 {
    120
}

fn default_install_command() -> Vec<String> {
    vec!["npm".into(), "install".into()]
}

fn default_dev_server_command() -> Vec<String> {
    ["npx", "expo", "start", "--port", PORT_PLACEHOLDER]
        .into_iter()
        .map(String::from)
        .collect()
}

fn default_quiet_patterns() -> Vec<String> {
    [
        "npm WARN",
        "ExperimentalWarning",
        "Waiting on http",
        "Logs for your project will appear below",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

fn default_readiness_attempts() -> u32 {
    15
}

fn default_bundle_path() -> String {
    "/index.bundle?platform=ios&dev=true&minify=false".to_string()
}

fn default_tunnel_command() -> Vec<String> {
    [
        "cloudflared",
        "tunnel",
        "--no-autoupdate",
        "--url",
        "http://127.0.0.1:{port}",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

fn default_tunnel_url_pattern() -> String {
    r"https://[a-z0-9-]+\.trycloudflare\.com".to_string()
}

fn default_tunnel_open_timeout_secs() -> u64 {
    30
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            workspace_root: default_workspace_root(),
            port_range_start: default_port_range_start(),
            port_range_end: default_port_range_end(),
            idle_timeout_secs: default_idle_timeout_secs(),
            sweep_interval_secs: default_sweep_interval_secs(),
            start_timeout_secs: default_start_timeout_secs(),
            install_timeout_secs: default_install_timeout_secs(),
            install_command: default_install_command(),
            dev_server_command: default_dev_server_command(),
            quiet_patterns: default_quiet_patterns(),
            readiness_attempts: default_readiness_attempts(),
            bundle_path: default_bundle_path(),
            tunnel: TunnelKind::default(),
            tunnel_command: default_tunnel_command(),
            tunnel_url_pattern: default_tunnel_url_pattern(),
            tunnel_open_timeout_secs: default_tunnel_open_timeout_secs(),
        }
    }
}

impl ServerConfig {
    /// Reject configurations the supervisor cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.port_range_start > self.port_range_end {
            return Err(ConfigError::EmptyPortRange {
                start: self.port_range_start,
                end: self.port_range_end,
            });
        }
        if self.dev_server_command.is_empty() {
            return Err(ConfigError::EmptyDevServerCommand);
        }
        if self.tunnel == TunnelKind::Command && self.tunnel_command.is_empty() {
            return Err(ConfigError::EmptyTunnelCommand);
        }
        for (name, secs) in [
            ("sweep interval", self.sweep_interval_secs),
            ("idle timeout", self.idle_timeout_secs),
            ("start timeout", self.start_timeout_secs),
            ("install timeout", self.install_timeout_secs),
            ("tunnel open timeout", self.tunnel_open_timeout_secs),
        ] {
            if secs == 0 {
                return Err(ConfigError::ZeroDuration(name));
            }
        }
        Ok(())
    }

    #[must_use]
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }

    #[must_use]
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    #[must_use]
    pub fn start_timeout(&self) -> Duration {
        Duration::from_secs(self.start_timeout_secs)
    }

    #[must_use]
    pub fn install_timeout(&self) -> Duration {
        Duration::from_secs(self.install_timeout_secs)
    }

    #[must_use]
    pub fn tunnel_open_timeout(&self) -> Duration {
        Duration::from_secs(self.tunnel_open_timeout_secs)
    }

    /// Bundle path, or `None` when bundle URLs are disabled.
    #[must_use]
    pub fn bundle_path(&self) -> Option<&str> {
        let path = self.bundle_path.trim();
        (!path.is_empty()).then_some(path)
    }
}

/// Substitute `{port}` in every argument.
#[must_use]
pub fn expand_port(args: &[String], port: u16) -> Vec<String> {
    let port = port.to_string();
    args.iter()
        .map(|arg| arg.replace(PORT_PLACEHOLDER, &port))
        .collect()
}
