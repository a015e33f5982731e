use super::{Credential, Receipt, Transport};
use crate::config::NetworkConfig;
use crate::error::TransportError;
use async_trait::async_trait;
use ethers::{
    middleware::SignerMiddleware,
    providers::{Http, Middleware, Provider, ProviderError},
    signers::Signer,
    types::{transaction::eip2718::TypedTransaction, Address, Bytes, TransactionRequest, U256, U64},
};
use log::debug;
use std::time::Duration;

/// Interface to an EVM node over JSON-RPC
#[derive(Clone)]
pub struct EthereumConnector {
    provider: Provider<Http>,
    chain_id: u64,
    confirmations: usize,
    confirmation_timeout: Duration,
    gas_limit: Option<U256>,
}

impl EthereumConnector {
    /// Create new connector for a known chain id
    pub fn new(rpc_url: &str, chain_id: u64) -> Result<Self, TransportError> {
        let provider = Provider::<Http>::try_from(rpc_url)
            .map_err(|e| TransportError::Unavailable(format!("invalid rpc url {}: {}", rpc_url, e)))?;
        Ok(Self {
            provider,
            chain_id,
            confirmations: 1,
            confirmation_timeout: Duration::from_secs(120),
            gas_limit: None,
        })
    }

    /// Connect using network configuration, asking the node for its chain id
    /// when none is configured
    pub async fn connect(config: &NetworkConfig) -> Result<Self, TransportError> {
        let mut connector = Self::new(&config.rpc_url, config.chain_id.unwrap_or_default())?;
        if config.chain_id.is_none() {
            let chain_id = connector.provider.get_chainid().await.map_err(classify)?;
            connector.chain_id = chain_id.as_u64();
        }
        connector.confirmations = config.confirmations;
        connector.confirmation_timeout = Duration::from_secs(config.confirmation_timeout_secs);
        connector.gas_limit = config.gas_limit.map(U256::from);
        Ok(connector)
    }

    pub fn chain_id(&self) -> u64 {
        self.chain_id
    }

    async fn submit(&self, credential: &Credential, mut tx: TransactionRequest) -> Result<Receipt, TransportError> {
        if let Some(gas) = self.gas_limit {
            tx = tx.gas(gas);
        }

        let wallet = credential.wallet().clone().with_chain_id(self.chain_id);
        let client = SignerMiddleware::new(self.provider.clone(), wallet);

        let pending = client
            .send_transaction(tx, None)
            .await
            .map_err(|e| TransportError::Rpc(e.to_string()))?;
        let tx_hash = pending.tx_hash();
        debug!("submitted {:?}, waiting for {} confirmation(s)", tx_hash, self.confirmations);

        let receipt = tokio::time::timeout(
            self.confirmation_timeout,
            pending.confirmations(self.confirmations),
        )
        .await
        .map_err(|_| TransportError::Timeout(self.confirmation_timeout))?
        .map_err(classify)?
        .ok_or(TransportError::Dropped(tx_hash))?;

        Ok(Receipt {
            tx_hash,
            contract_address: receipt.contract_address,
            success: receipt.status == Some(U64::from(1)),
        })
    }
}

#[async_trait]
impl Transport for EthereumConnector {
    async fn call(&self, to: Address, data: Bytes) -> Result<Bytes, TransportError> {
        let tx: TypedTransaction = TransactionRequest::new().to(to).data(data).into();
        self.provider.call(&tx, None).await.map_err(classify)
    }

    async fn deploy(&self, credential: &Credential, init_code: Bytes) -> Result<Receipt, TransportError> {
        let tx = TransactionRequest::new().from(credential.address()).data(init_code);
        self.submit(credential, tx).await
    }

    async fn send(&self, credential: &Credential, to: Address, data: Bytes) -> Result<Receipt, TransportError> {
        let tx = TransactionRequest::new().from(credential.address()).to(to).data(data);
        self.submit(credential, tx).await
    }
}

/// Connection problems are worth retrying; anything the node answered is not
fn classify(err: ProviderError) -> TransportError {
    match err {
        ProviderError::HTTPError(e) => TransportError::Unavailable(e.to_string()),
        other => TransportError::Rpc(other.to_string()),
    }
}
