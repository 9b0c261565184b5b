//! Instance record and pure lifecycle rules.

use std::path::PathBuf;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use previewd_common::{InstancePhase, InstanceStatus};

use crate::domain::error::InstanceError;

const MAX_APP_ID_LEN: usize = 128;

/// Validate an application ID.
///
/// The ID names the instance's workspace directory, so it must be a single
/// safe path component.
///
/// # Errors
///
/// Returns [`InstanceError::InvalidAppId`] if the ID is empty, too long,
/// `.`/`..`, or contains characters outside `[A-Za-z0-9._-]`.
pub fn validate_app_id(id: &str) -> Result<(), InstanceError> {
    let valid = !id.is_empty()
        && id.len() <= MAX_APP_ID_LEN
        && id != "."
        && id != ".."
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'));
    if valid {
        Ok(())
    } else {
        Err(InstanceError::InvalidAppId(id.to_string()))
    }
}

/// Join a tunnel URL and a bundle path.
#[must_use]
pub fn bundle_url(tunnel_url: &str, bundle_path: &str) -> String {
    let base = tunnel_url.trim_end_matches('/');
    if bundle_path.starts_with('/') {
        format!("{base}{bundle_path}")
    } else {
        format!("{base}/{bundle_path}")
    }
}

/// Bookkeeping for one live instance.
///
/// The owned process and tunnel live next to the record in the registry;
/// this type only carries data so it can be reasoned about without I/O.
#[derive(Debug, Clone)]
pub struct InstanceRecord {
    pub app_id: String,
    pub app_name: String,
    pub workspace_path: PathBuf,
    pub port: u16,
    pub tunnel_url: Option<String>,
    pub bundle_url: Option<String>,
    pub phase: InstancePhase,
    /// Distinguishes successive instances of the same `app_id`.
    pub generation: u64,
    pub started_at: Instant,
    pub started_at_utc: DateTime<Utc>,
    pub last_access: Instant,
}

impl InstanceRecord {
    #[must_use]
    pub fn new(
        app_id: &str,
        app_name: &str,
        workspace_path: PathBuf,
        port: u16,
        generation: u64,
        now: Instant,
    ) -> Self {
        Self {
            app_id: app_id.to_string(),
            app_name: app_name.to_string(),
            workspace_path,
            port,
            tunnel_url: None,
            bundle_url: None,
            phase: InstancePhase::Provisioning,
            generation,
            started_at: now,
            started_at_utc: Utc::now(),
            last_access: now,
        }
    }

    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.phase == InstancePhase::Ready
    }

    /// Record an access; `last_access` never moves backwards.
    pub fn touch(&mut self, now: Instant) {
        if now > self.last_access {
            self.last_access = now;
        }
    }

    /// Move to the next in-flight phase. Ignored once the record is ready or
    /// stopping.
    pub fn advance(&mut self, phase: InstancePhase) {
        if matches!(self.phase, InstancePhase::Ready | InstancePhase::Stopping) {
            return;
        }
        self.phase = phase;
    }

    /// Flip the record to ready with its public URLs. Returns `false` if the
    /// record was already ready or is stopping.
    pub fn mark_ready(&mut self, tunnel_url: String, bundle_path: Option<&str>) -> bool {
        if matches!(self.phase, InstancePhase::Ready | InstancePhase::Stopping) {
            return false;
        }
        self.bundle_url = bundle_path.map(|path| bundle_url(&tunnel_url, path));
        self.tunnel_url = Some(tunnel_url);
        self.phase = InstancePhase::Ready;
        true
    }

    /// Ready and untouched for longer than `threshold` at `now`.
    #[must_use]
    pub fn is_idle(&self, now: Instant, threshold: Duration) -> bool {
        self.is_ready() && now.saturating_duration_since(self.last_access) > threshold
    }

    #[must_use]
    pub fn status(&self, now: Instant) -> InstanceStatus {
        InstanceStatus {
            app_id: self.app_id.clone(),
            app_name: self.app_name.clone(),
            port: self.port,
            tunnel_url: self.tunnel_url.clone(),
            bundle_url: self.bundle_url.clone(),
            is_ready: self.is_ready(),
            phase: self.phase,
            started_at: self.started_at_utc,
            uptime_millis: millis(now.saturating_duration_since(self.started_at)),
            idle_millis: millis(now.saturating_duration_since(self.last_access)),
        }
    }
}

fn millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}
