//! HTTP status probe used by the route readiness check

use super::ClusterError;
use async_trait::async_trait;
use reqwest::Url;
use std::time::Duration;

/// "GET and return the status code"
#[async_trait]
pub trait HttpProbe: Send + Sync {
    async fn status_code(&self, url: &Url) -> Result<u16, ClusterError>;
}

/// reqwest-backed probe
///
/// Routes on test clusters usually carry self-signed certificates, so
/// certificate validation is disabled.
pub struct ReqwestProbe {
    client: reqwest::Client,
}

impl ReqwestProbe {
    pub fn new(timeout: Duration) -> Result<Self, ClusterError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .danger_accept_invalid_certs(true)
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl HttpProbe for ReqwestProbe {
    async fn status_code(&self, url: &Url) -> Result<u16, ClusterError> {
        let response = self.client.get(url.clone()).send().await?;
        Ok(response.status().as_u16())
    }
}

#[cfg(test)]
#[path = "probe_test.rs"]
mod tests;
