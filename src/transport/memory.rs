// In-memory chain
//
// Deterministic stand-in for a node. Used to rehearse a plan before it is
// sent anywhere real (`deploy --dry-run`) and to drive the orchestrator in
// tests. Contract creation assigns CREATE addresses from the sender's nonce;
// reads are answered from a table keyed by target and selector.

use super::{BootstrapSource, Credential, Receipt, Transport};
use crate::error::TransportError;
use async_trait::async_trait;
use ethers::abi::{self, Token};
use ethers::types::{Address, Bytes, H256, U256};
use ethers::utils::{get_contract_address, id, keccak256};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// Failure to inject into a write
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteFailure {
    /// Mined with a failed status
    Revert,
    /// Never confirmed
    Timeout,
    /// Node unreachable, nothing submitted
    Unavailable,
}

/// A write the chain accepted (mined, possibly reverted)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedWrite {
    pub from: Address,
    /// `None` for contract creations
    pub to: Option<Address>,
    pub data: Bytes,
    pub receipt: Receipt,
}

#[derive(Default)]
struct MemoryChain {
    nonces: HashMap<Address, U256>,
    reads: HashMap<(Address, [u8; 4]), Bytes>,
    writes: Vec<RecordedWrite>,
    attempts: usize,
    injected: HashMap<usize, WriteFailure>,
    failing_reads: usize,
}

impl MemoryChain {
    fn next_nonce(&mut self, from: Address) -> U256 {
        let nonce = self.nonces.entry(from).or_default();
        let current = *nonce;
        *nonce += U256::one();
        current
    }

    fn tx_hash(from: Address, nonce: U256) -> H256 {
        let mut preimage = from.as_bytes().to_vec();
        let mut word = [0u8; 32];
        nonce.to_big_endian(&mut word);
        preimage.extend_from_slice(&word);
        H256::from(keccak256(preimage))
    }

    fn write(&mut self, from: Address, to: Option<Address>, data: Bytes) -> Result<Receipt, TransportError> {
        self.attempts += 1;
        let failure = self.injected.get(&self.attempts).copied();
        match failure {
            Some(WriteFailure::Unavailable) => {
                return Err(TransportError::Unavailable("injected outage".to_string()))
            }
            Some(WriteFailure::Timeout) => return Err(TransportError::Timeout(Duration::ZERO)),
            _ => {}
        }

        let nonce = self.next_nonce(from);
        let tx_hash = Self::tx_hash(from, nonce);
        let success = failure != Some(WriteFailure::Revert);

        let contract_address = match to {
            None if success => Some(get_contract_address(from, nonce)),
            _ => None,
        };

        let receipt = Receipt {
            tx_hash,
            contract_address,
            success,
        };
        self.writes.push(RecordedWrite {
            from,
            to,
            data,
            receipt: receipt.clone(),
        });
        Ok(receipt)
    }
}

/// Deterministic in-memory [`Transport`]
#[derive(Default)]
pub struct MemoryTransport {
    chain: Mutex<MemoryChain>,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    fn chain(&self) -> MutexGuard<'_, MemoryChain> {
        self.chain.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Answer calls to `to` whose selector matches `signature` (e.g. `"systemAddress()"`)
    pub fn set_read(&self, to: Address, signature: &str, output: Bytes) {
        let mut selector = [0u8; 4];
        selector.copy_from_slice(&id(signature)[..4]);
        self.chain().reads.insert((to, selector), output);
    }

    /// Answer an address getter
    pub fn set_address_read(&self, to: Address, signature: &str, value: Address) {
        self.set_read(to, signature, Bytes::from(abi::encode(&[Token::Address(value)])));
    }

    /// Make the `nth` write (1-based, counting every attempt) fail
    pub fn fail_write(&self, nth: usize, failure: WriteFailure) {
        self.chain().injected.insert(nth, failure);
    }

    /// Make the next `count` reads fail as if the node were unreachable
    pub fn fail_reads(&self, count: usize) {
        self.chain().failing_reads = count;
    }

    pub fn writes(&self) -> Vec<RecordedWrite> {
        self.chain().writes.clone()
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn call(&self, to: Address, data: Bytes) -> Result<Bytes, TransportError> {
        let mut chain = self.chain();
        if chain.failing_reads > 0 {
            chain.failing_reads -= 1;
            return Err(TransportError::Unavailable("injected outage".to_string()));
        }
        if data.len() < 4 {
            return Ok(Bytes::default());
        }
        let mut selector = [0u8; 4];
        selector.copy_from_slice(&data[..4]);
        Ok(chain.reads.get(&(to, selector)).cloned().unwrap_or_default())
    }

    async fn deploy(&self, credential: &Credential, init_code: Bytes) -> Result<Receipt, TransportError> {
        self.chain().write(credential.address(), None, init_code)
    }

    async fn send(&self, credential: &Credential, to: Address, data: Bytes) -> Result<Receipt, TransportError> {
        self.chain().write(credential.address(), Some(to), data)
    }
}

/// Bootstrap document fixed up front
pub struct StaticBootstrap {
    document: Value,
}

impl StaticBootstrap {
    pub fn new(document: Value) -> Self {
        Self { document }
    }
}

#[async_trait]
impl BootstrapSource for StaticBootstrap {
    async fn fetch(&self) -> Result<Value, TransportError> {
        Ok(self.document.clone())
    }
}
