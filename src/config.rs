// Configuration for the staking deployer
//
// A single JSON file describes the target network, where the current
// addresses come from and which topology to converge to. The signing key is
// never part of it.

use crate::error::DeployError;
use crate::planner::Topology;
use crate::registry::ContractRegistry;
use crate::resolver::{RetryPolicy, DEFAULT_BOOTSTRAP_FIELD};
use common::{AddressSet, Role, StepKind};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Environment variable holding the deployer's private key
pub const PRIVATE_KEY_ENV: &str = "DEPLOYER_PRIVATE_KEY";

/// Node connection settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    pub rpc_url: String,
    /// Queried from the node when absent
    pub chain_id: Option<u64>,
    pub confirmations: usize,
    pub confirmation_timeout_secs: u64,
    /// Left to the node's estimate when absent
    pub gas_limit: Option<u64>,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            rpc_url: "http://localhost:8545".to_string(),
            chain_id: None,
            confirmations: 1,
            confirmation_timeout_secs: 120,
            gas_limit: None,
        }
    }
}

/// Where the addresses the planner starts from come from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum AddressSource {
    /// Walk the bootstrap endpoint and the on-chain getters
    Resolve,
    /// Use the listed addresses as they are
    Static { addresses: AddressSet },
    /// Fresh deployment of every desired role
    Empty,
}

impl Default for AddressSource {
    fn default() -> Self {
        AddressSource::Resolve
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BootstrapConfig {
    pub url: String,
    /// Field holding the proxy address
    pub field: String,
}

impl Default for BootstrapConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:8668/display_checkpoint".to_string(),
            field: DEFAULT_BOOTSTRAP_FIELD.to_string(),
        }
    }
}

/// Location of compiled Hardhat artifacts
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ArtifactsConfig {
    pub dir: PathBuf,
    /// Artifact of the proxy placed in front of upgradeable units, relative to `dir`
    pub upgrade_proxy: Option<PathBuf>,
}

impl Default for ArtifactsConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("artifacts"),
            upgrade_proxy: Some(PathBuf::from(
                "@openzeppelin/contracts/proxy/ERC1967/ERC1967Proxy.sol/ERC1967Proxy.json",
            )),
        }
    }
}

/// Everything a deployment run needs apart from the credential
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeployConfig {
    #[serde(default)]
    pub network: NetworkConfig,
    #[serde(default)]
    pub address_source: AddressSource,
    #[serde(default)]
    pub bootstrap: BootstrapConfig,
    #[serde(default)]
    pub artifacts: ArtifactsConfig,
    #[serde(default)]
    pub retry: RetryPolicy,
    #[serde(default = "Topology::staking_cluster")]
    pub topology: Topology,
}

impl Default for DeployConfig {
    fn default() -> Self {
        Self {
            network: NetworkConfig::default(),
            address_source: AddressSource::default(),
            bootstrap: BootstrapConfig::default(),
            artifacts: ArtifactsConfig::default(),
            retry: RetryPolicy::default(),
            topology: Topology::staking_cluster(),
        }
    }
}

impl DeployConfig {
    /// Roles whose artifacts must be loaded
    pub fn deployable_roles(&self) -> Vec<Role> {
        self.topology.desired_roles().into_iter().collect()
    }

    /// Load the artifacts of every desired role, and the upgrade proxy when
    /// some role is deployed behind one
    pub fn load_registry(&self) -> Result<ContractRegistry, DeployError> {
        let needs_proxy = self
            .topology
            .roles
            .iter()
            .any(|spec| spec.kind == StepKind::DeployUpgradeable);
        let upgrade_proxy = if needs_proxy {
            self.artifacts.upgrade_proxy.as_deref()
        } else {
            None
        };
        ContractRegistry::from_artifacts(&self.artifacts.dir, &self.deployable_roles(), upgrade_proxy)
    }

    /// Reject settings that can only fail later
    pub fn validate(&self) -> Result<(), DeployError> {
        if self.network.rpc_url.trim().is_empty() {
            return Err(DeployError::Config("network.rpc_url is empty".to_string()));
        }
        if self.network.confirmation_timeout_secs == 0 {
            return Err(DeployError::Config(
                "network.confirmation_timeout_secs must be positive".to_string(),
            ));
        }
        if self.address_source == AddressSource::Resolve && self.bootstrap.url.trim().is_empty() {
            return Err(DeployError::Config(
                "bootstrap.url is required when resolving addresses".to_string(),
            ));
        }
        if self.topology.roles.is_empty() {
            return Err(DeployError::Config("topology lists no roles".to_string()));
        }
        Ok(())
    }
}

/// Configuration manager for the deployer
pub struct ConfigManager;

impl ConfigManager {
    /// Load configuration from a file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<DeployConfig, DeployError> {
        let path = path.as_ref();
        let config_str = fs::read_to_string(path)
            .map_err(|e| DeployError::Config(format!("cannot read {}: {}", path.display(), e)))?;
        let config: DeployConfig = serde_json::from_str(&config_str)
            .map_err(|e| DeployError::Config(format!("cannot parse {}: {}", path.display(), e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a file
    pub fn save_to_file<P: AsRef<Path>>(config: &DeployConfig, path: P) -> Result<(), DeployError> {
        let path = path.as_ref();
        let config_str = serde_json::to_string_pretty(config).map_err(|e| DeployError::Config(e.to_string()))?;
        fs::write(path, config_str)
            .map_err(|e| DeployError::Config(format!("cannot write {}: {}", path.display(), e)))?;
        Ok(())
    }

    /// Create a builder for configuration
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }
}

/// Builder for creating configurations
#[derive(Default)]
pub struct ConfigBuilder {
    config: DeployConfig,
}

impl ConfigBuilder {
    pub fn rpc_url(mut self, value: impl Into<String>) -> Self {
        self.config.network.rpc_url = value.into();
        self
    }

    pub fn chain_id(mut self, value: u64) -> Self {
        self.config.network.chain_id = Some(value);
        self
    }

    pub fn confirmations(mut self, value: usize) -> Self {
        self.config.network.confirmations = value;
        self
    }

    pub fn gas_limit(mut self, value: Option<u64>) -> Self {
        self.config.network.gas_limit = value;
        self
    }

    pub fn address_source(mut self, value: AddressSource) -> Self {
        self.config.address_source = value;
        self
    }

    pub fn bootstrap_url(mut self, value: impl Into<String>) -> Self {
        self.config.bootstrap.url = value.into();
        self
    }

    pub fn artifacts_dir(mut self, value: impl Into<PathBuf>) -> Self {
        self.config.artifacts.dir = value.into();
        self
    }

    pub fn retry(mut self, value: RetryPolicy) -> Self {
        self.config.retry = value;
        self
    }

    pub fn topology(mut self, value: Topology) -> Self {
        self.config.topology = value;
        self
    }

    /// Build the configuration
    pub fn build(self) -> DeployConfig {
        self.config
    }
}
