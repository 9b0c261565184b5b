//! HTTP readiness probing: implements `ReadinessProbe`.

use std::time::Duration;

use async_trait::async_trait;

use crate::application::ports::ReadinessProbe;

/// Path the dev server answers once it is serving.
pub const STATUS_PATH: &str = "/status";

/// Polls `GET http://127.0.0.1:<port>/status`.
///
/// Every attempt has its own request timeout; between attempts the probe
/// sleeps for `interval`. Any transport error or non-success status means
/// "not ready yet".
#[derive(Debug, Clone)]
pub struct HttpReadinessProbe {
    client: reqwest::Client,
    path: String,
    request_timeout: Duration,
    interval: Duration,
}

impl Default for HttpReadinessProbe {
    fn default() -> Self {
        Self::new(STATUS_PATH, Duration::from_secs(2), Duration::from_secs(2))
    }
}

impl HttpReadinessProbe {
    #[must_use]
    pub fn new(path: &str, request_timeout: Duration, interval: Duration) -> Self {
        Self {
            client: reqwest::Client::new(),
            path: path.to_string(),
            request_timeout,
            interval,
        }
    }

    fn url(&self, port: u16) -> String {
        format!("http://127.0.0.1:{port}{}", self.path)
    }

    async fn check(&self, url: &str) -> Result<(), String> {
        let response = self
            .client
            .get(url)
            .timeout(self.request_timeout)
            .send()
            .await
            .map_err(|e| e.to_string())?;
        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(format!("status {status}"))
        }
    }
}

#[async_trait]
impl ReadinessProbe for HttpReadinessProbe {
    async fn wait_ready(&self, port: u16, max_attempts: u32) -> bool {
        let url = self.url(port);
        for attempt in 1..=max_attempts {
            match self.check(&url).await {
                Ok(()) => {
                    tracing::debug!(port, attempt, "dev server ready");
                    return true;
                }
                Err(reason) => {
                    tracing::debug!(port, attempt, max_attempts, %reason, "dev server not ready yet");
                }
            }
            if attempt < max_attempts {
                tokio::time::sleep(self.interval).await;
            }
        }
        tracing::warn!(port, max_attempts, "dev server never became ready");
        false
    }
}
