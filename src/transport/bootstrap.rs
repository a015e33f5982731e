use crate::error::TransportError;
use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use std::time::Duration;

/// Source of the bootstrap document that names the staking proxy
#[async_trait]
pub trait BootstrapSource: Send + Sync {
    async fn fetch(&self) -> Result<Value, TransportError>;
}

/// Bootstrap endpoint served over HTTP(S), e.g. a node's `/display_checkpoint`
pub struct HttpBootstrap {
    url: String,
    client: Client,
}

impl HttpBootstrap {
    pub fn new(url: &str) -> Result<Self, TransportError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| TransportError::Unavailable(format!("failed to create HTTP client: {}", e)))?;

        Ok(Self {
            url: url.to_string(),
            client,
        })
    }
}

#[async_trait]
impl BootstrapSource for HttpBootstrap {
    async fn fetch(&self) -> Result<Value, TransportError> {
        let response = self
            .client
            .get(&self.url)
            .send()
            .await
            .map_err(|e| TransportError::Unavailable(e.to_string()))?;

        if !response.status().is_success() {
            return Err(TransportError::Rpc(format!(
                "bootstrap request to {} failed: {}",
                self.url,
                response.status()
            )));
        }

        response
            .json::<Value>()
            .await
            .map_err(|e| TransportError::Rpc(format!("bootstrap response is not JSON: {}", e)))
    }
}
