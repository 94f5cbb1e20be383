use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;

/// Readiness probe against a service's local HTTP endpoint.
///
/// A probe never fails: connection errors, timeouts, and non-200 responses
/// all read as "not ready yet". Probers are stateless and safe to call
/// concurrently for different services.
#[async_trait]
pub trait HealthProber: Send + Sync {
    async fn probe(&self, port: u16, path: &str) -> bool;
}

pub struct HttpHealthProber {
    client: reqwest::Client,
}

impl HttpHealthProber {
    /// The timeout bounds the whole request so the orchestration loop is
    /// never blocked longer than one probe interval.
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("building HTTP client")?;
        Ok(Self { client })
    }
}

#[async_trait]
impl HealthProber for HttpHealthProber {
    async fn probe(&self, port: u16, path: &str) -> bool {
        let url = format!("http://localhost:{}{}", port, path);
        match self.client.get(&url).send().await {
            Ok(response) => response.status() == reqwest::StatusCode::OK,
            Err(_) => false,
        }
    }
}
