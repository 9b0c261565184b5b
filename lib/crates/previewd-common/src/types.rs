use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle phase of a supervised instance.
///
/// An instance walks `Provisioning → Launching → Probing → Tunneling → Ready`
/// on the happy path and passes through `Stopping` on its way out.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum InstancePhase {
    Provisioning,
    Launching,
    Probing,
    Tunneling,
    Ready,
    Stopping,
}

impl InstancePhase {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Provisioning => "provisioning",
            Self::Launching => "launching",
            Self::Probing => "probing",
            Self::Tunneling => "tunneling",
            Self::Ready => "ready",
            Self::Stopping => "stopping",
        }
    }
}

impl std::fmt::Display for InstancePhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Request body for starting (or reusing) an instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartRequest {
    pub app_id: String,
    pub app_name: String,
    /// Workspace files keyed by path relative to the workspace root.
    #[serde(default)]
    pub files: BTreeMap<String, String>,
}

/// Outcome of a start request. Failures are reported here, never raised.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct StartResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tunnel_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bundle_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl StartResponse {
    #[must_use]
    pub fn ready(port: u16, tunnel_url: Option<String>, bundle_url: Option<String>) -> Self {
        Self {
            success: true,
            tunnel_url,
            bundle_url,
            port: Some(port),
            error: None,
        }
    }

    #[must_use]
    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            tunnel_url: None,
            bundle_url: None,
            port: None,
            error: Some(error.into()),
        }
    }
}

/// Read-only snapshot of one instance, computed on demand.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct InstanceStatus {
    pub app_id: String,
    pub app_name: String,
    pub port: u16,
    pub tunnel_url: Option<String>,
    pub bundle_url: Option<String>,
    pub is_ready: bool,
    pub phase: InstancePhase,
    pub started_at: DateTime<Utc>,
    pub uptime_millis: u64,
    pub idle_millis: u64,
}

/// Response body for a stop request.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct StopResponse {
    pub stopped: bool,
}
