use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use tracing::debug;

use crate::error::Result;
use crate::transport::Transport;

/// Asks an etcd client endpoint whether it is healthy.
#[async_trait]
pub trait HealthProbe: Send + Sync {
    /// `true` only for an explicit healthy answer. Errors count as unhealthy.
    async fn is_healthy(&self, endpoint: &str) -> bool;
}

/// Probes `GET <endpoint>/health` over the selected transport.
#[derive(Clone, Debug)]
pub struct HttpHealthProbe {
    client: Client,
}

impl HttpHealthProbe {
    /// Creates a probe whose requests are bounded by `timeout`.
    ///
    /// # Errors
    ///
    /// Returns an error if the TLS material of `transport` cannot be loaded.
    pub fn new(transport: &Transport, timeout: Duration) -> Result<Self> {
        Ok(Self {
            client: transport.http_client(timeout)?,
        })
    }
}

#[async_trait]
impl HealthProbe for HttpHealthProbe {
    async fn is_healthy(&self, endpoint: &str) -> bool {
        let url = format!("{}/health", endpoint.trim_end_matches('/'));

        let body = match self.client.get(&url).send().await {
            Ok(response) => match response.text().await {
                Ok(body) => body,
                Err(e) => {
                    debug!(target: "formation", "reading {url} failed: {e}");
                    return false;
                }
            },
            Err(e) => {
                debug!(target: "formation", "probing {url} failed: {e}");
                return false;
            }
        };

        let healthy = is_healthy_body(&body);
        debug!(target: "formation", "{url} answered healthy={healthy}: {}", body.trim());
        healthy
    }
}

/// etcd answers `{"health":"true"}`; some versions use a boolean.
#[must_use]
pub fn is_healthy_body(body: &str) -> bool {
    let Ok(value) = serde_json::from_str::<serde_json::Value>(body) else {
        return false;
    };

    match value.get("health") {
        Some(serde_json::Value::String(s)) => s == "true",
        Some(serde_json::Value::Bool(b)) => *b,
        _ => false,
    }
}
