// Address resolver
//
// Rebuilds the address set of an existing cluster: the bootstrap endpoint
// names the proxy, the proxy names the system contract, and the system
// contract names the remaining modules. Resolution only reads.

use crate::contracts::{SystemContract, SystemProxyContract};
use crate::error::ResolutionError;
use crate::transport::{BootstrapSource, Transport};
use common::utils::{display_address, parse_address};
use common::{AddressSet, Role};
use ethers::types::Address;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

/// Field of the bootstrap document holding the proxy address
pub const DEFAULT_BOOTSTRAP_FIELD: &str = "evm_staking_address";

/// Backoff applied while the node is still catching up
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_delay_ms: u64,
    pub backoff_factor: f64,
    pub max_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_delay_ms: 1_000,
            backoff_factor: 2.0,
            max_delay_ms: 30_000,
        }
    }
}

impl RetryPolicy {
    /// Single attempt, no waiting
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Delay before retry number `retry` (1-based)
    pub fn delay_for(&self, retry: u32) -> Duration {
        let factor = self.backoff_factor.max(1.0).powi(retry.saturating_sub(1) as i32);
        let millis = (self.initial_delay_ms as f64 * factor).min(self.max_delay_ms as f64);
        Duration::from_millis(millis as u64)
    }
}

/// Walks bootstrap -> proxy -> system -> modules
pub struct AddressResolver<'a> {
    bootstrap: &'a dyn BootstrapSource,
    transport: &'a dyn Transport,
    field: String,
}

impl<'a> AddressResolver<'a> {
    pub fn new(bootstrap: &'a dyn BootstrapSource, transport: &'a dyn Transport) -> Self {
        Self {
            bootstrap,
            transport,
            field: DEFAULT_BOOTSTRAP_FIELD.to_string(),
        }
    }

    /// Read the proxy address from a different bootstrap field
    pub fn with_field(mut self, field: impl Into<String>) -> Self {
        self.field = field.into();
        self
    }

    /// Resolve every role of the cluster, or fail on the first hop that
    /// cannot be read
    pub async fn resolve(&self) -> Result<AddressSet, ResolutionError> {
        let mut addresses = AddressSet::new();

        let proxy = self.proxy_address().await?;
        debug!("proxy at {}", display_address(&proxy));
        addresses.insert(Role::Proxy, proxy);

        let system = SystemProxyContract::new(proxy, self.transport).system_address().await?;
        debug!("system at {}", display_address(&system));
        addresses.insert(Role::System, system);

        let system = SystemContract::new(system, self.transport);
        addresses.insert(Role::Staking, system.staking_address().await?);
        addresses.insert(Role::Reward, system.reward_address().await?);
        addresses.insert(Role::Power, system.power_address().await?);

        info!("resolved {} role(s)", addresses.len());
        Ok(addresses)
    }

    /// [`resolve`](Self::resolve), retried on transient failures
    pub async fn resolve_with_retry(&self, policy: &RetryPolicy) -> Result<AddressSet, ResolutionError> {
        let max_attempts = policy.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match self.resolve().await {
                Ok(addresses) => return Ok(addresses),
                Err(err) if err.is_transient() && attempt < max_attempts => {
                    let delay = policy.delay_for(attempt);
                    warn!(
                        "resolution attempt {}/{} failed ({}), retrying in {:?}",
                        attempt, max_attempts, err, delay
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }

    async fn proxy_address(&self) -> Result<Address, ResolutionError> {
        let document = self
            .bootstrap
            .fetch()
            .await
            .map_err(|source| ResolutionError::Transport {
                role: Role::Proxy,
                source,
            })?;
        proxy_from_document(&document, &self.field)
    }
}

/// Extract the proxy address from a bootstrap document
fn proxy_from_document(document: &Value, field: &str) -> Result<Address, ResolutionError> {
    let text = match document.get(field) {
        None | Some(Value::Null) => return Err(ResolutionError::Empty { role: Role::Proxy }),
        Some(Value::String(text)) => text.as_str(),
        Some(other) => {
            return Err(ResolutionError::Malformed {
                role: Role::Proxy,
                detail: format!("{} is not a string: {}", field, other),
            })
        }
    };

    parse_address(text).map_err(|err| {
        if err.is_empty() {
            ResolutionError::Empty { role: Role::Proxy }
        } else {
            ResolutionError::Malformed {
                role: Role::Proxy,
                detail: format!("{}: {}", field, err),
            }
        }
    })
}
