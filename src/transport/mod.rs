// Transport boundary
//
// Everything the orchestrator needs from a node: read calls, contract
// creation and plain transactions. Writes only return once the transaction
// is confirmed (or has failed to be).

pub mod bootstrap;
pub mod ethereum;
pub mod memory;

pub use self::bootstrap::{BootstrapSource, HttpBootstrap};
pub use self::ethereum::EthereumConnector;
pub use self::memory::{MemoryTransport, StaticBootstrap, WriteFailure};

use crate::error::{DeployError, TransportError};
use ethers::signers::{LocalWallet, Signer};
use ethers::types::{Address, Bytes, H256};
use async_trait::async_trait;
use std::fmt;

/// Outcome of a confirmed transaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Receipt {
    pub tx_hash: H256,
    /// Set for contract creations
    pub contract_address: Option<Address>,
    /// `false` when the transaction was mined but reverted
    pub success: bool,
}

/// Signing key authorizing deployments and admin calls
#[derive(Clone)]
pub struct Credential {
    wallet: LocalWallet,
}

impl Credential {
    /// Parse a hex private key, with or without `0x`
    pub fn from_private_key(key: &str) -> Result<Self, DeployError> {
        let key = key.trim();
        let key = key.strip_prefix("0x").unwrap_or(key);
        let wallet = key
            .parse::<LocalWallet>()
            .map_err(|e| DeployError::Config(format!("invalid private key: {}", e)))?;
        Ok(Self { wallet })
    }

    pub fn from_env(var: &str) -> Result<Self, DeployError> {
        let key = std::env::var(var)
            .map_err(|_| DeployError::Config(format!("{} is not set", var)))?;
        Self::from_private_key(&key)
    }

    /// Throwaway key for rehearsals that never reach a real node
    pub fn ephemeral() -> Self {
        Self {
            wallet: LocalWallet::new(&mut ethers::core::rand::thread_rng()),
        }
    }

    pub fn address(&self) -> Address {
        self.wallet.address()
    }

    pub fn wallet(&self) -> &LocalWallet {
        &self.wallet
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("address", &self.address())
            .finish_non_exhaustive()
    }
}

/// Request/response access to a chain
#[async_trait]
pub trait Transport: Send + Sync {
    /// Read-only call, returning the raw ABI-encoded output
    async fn call(&self, to: Address, data: Bytes) -> Result<Bytes, TransportError>;

    /// Submit a contract creation and wait for its receipt
    async fn deploy(&self, credential: &Credential, init_code: Bytes) -> Result<Receipt, TransportError>;

    /// Submit a call transaction and wait for its receipt
    async fn send(&self, credential: &Credential, to: Address, data: Bytes) -> Result<Receipt, TransportError>;
}
