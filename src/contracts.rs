// Typed role handles
//
// Each role's deployed contract is reached through a small handle exposing
// only the operations the orchestrator needs: the address getters walked
// during resolution and the single-address admin setters used for wiring.

use crate::error::{ResolutionError, StepFailure};
use crate::transport::{Credential, Receipt, Transport};
use common::Role;
use ethers::abi::{parse_abi, Function, Token};
use ethers::types::{Address, Bytes};

/// Build the ABI entry for `name` from a human-readable signature
fn function(name: &str, signature: &str) -> Result<Function, String> {
    let abi = parse_abi(&[signature]).map_err(|e| format!("{}: {}", signature, e))?;
    abi.function(name).cloned().map_err(|e| format!("{}: {}", name, e))
}

/// Address and transport of one deployed contract
#[derive(Clone, Copy)]
pub struct ContractHandle<'a> {
    address: Address,
    transport: &'a dyn Transport,
}

impl<'a> ContractHandle<'a> {
    pub fn new(address: Address, transport: &'a dyn Transport) -> Self {
        Self { address, transport }
    }

    pub fn address(&self) -> Address {
        self.address
    }

    /// Call a no-argument getter returning an address, reporting failures
    /// against the role being resolved
    pub async fn read_address(&self, getter: &str, resolving: Role) -> Result<Address, ResolutionError> {
        let malformed = |detail: String| ResolutionError::Malformed {
            role: resolving,
            detail,
        };

        let function = function(getter, &format!("function {}() external view returns (address)", getter))
            .map_err(malformed)?;
        let data = function
            .encode_input(&[])
            .map_err(|e| malformed(e.to_string()))?;

        let output = self
            .transport
            .call(self.address, Bytes::from(data))
            .await
            .map_err(|source| ResolutionError::Transport {
                role: resolving,
                source,
            })?;

        if output.is_empty() {
            return Err(ResolutionError::Empty { role: resolving });
        }
        if output.len() != 32 {
            return Err(malformed(format!("{} returned {} bytes, expected 32", getter, output.len())));
        }
        if output[..12].iter().any(|byte| *byte != 0) {
            return Err(malformed(format!("{} returned a word that is not an address", getter)));
        }

        match function.decode_output(&output).map_err(|e| malformed(e.to_string()))?.first() {
            Some(Token::Address(address)) if address.is_zero() => {
                Err(ResolutionError::Empty { role: resolving })
            }
            Some(Token::Address(address)) => Ok(*address),
            _ => Err(malformed(format!("{} did not decode to an address", getter))),
        }
    }

    /// Send `setter(value)` and wait for the receipt
    pub async fn set_address(
        &self,
        setter: &str,
        value: Address,
        credential: &Credential,
    ) -> Result<Receipt, StepFailure> {
        let function = function(setter, &format!("function {}(address)", setter)).map_err(StepFailure::Encoding)?;
        let data = function
            .encode_input(&[Token::Address(value)])
            .map_err(|e| StepFailure::Encoding(e.to_string()))?;

        self.transport
            .send(credential, self.address, Bytes::from(data))
            .await
            .map_err(StepFailure::from)
    }
}

/// `SystemProxy`: the stable entry point named by the bootstrap endpoint
pub struct SystemProxyContract<'a> {
    handle: ContractHandle<'a>,
}

impl<'a> SystemProxyContract<'a> {
    pub fn new(address: Address, transport: &'a dyn Transport) -> Self {
        Self {
            handle: ContractHandle::new(address, transport),
        }
    }

    pub async fn system_address(&self) -> Result<Address, ResolutionError> {
        self.handle.read_address("systemAddress", Role::System).await
    }
}

/// `System`: records where the staking, reward and power modules live
pub struct SystemContract<'a> {
    handle: ContractHandle<'a>,
}

impl<'a> SystemContract<'a> {
    pub fn new(address: Address, transport: &'a dyn Transport) -> Self {
        Self {
            handle: ContractHandle::new(address, transport),
        }
    }

    pub async fn staking_address(&self) -> Result<Address, ResolutionError> {
        self.handle.read_address("stakingAddress", Role::Staking).await
    }

    pub async fn reward_address(&self) -> Result<Address, ResolutionError> {
        self.handle.read_address("rewardAddress", Role::Reward).await
    }

    pub async fn power_address(&self) -> Result<Address, ResolutionError> {
        self.handle.read_address("powerAddress", Role::Power).await
    }

    pub async fn set_staking_address(&self, staking: Address, credential: &Credential) -> Result<Receipt, StepFailure> {
        self.handle.set_address("setStakingAddress", staking, credential).await
    }

    pub async fn set_reward_address(&self, reward: Address, credential: &Credential) -> Result<Receipt, StepFailure> {
        self.handle.set_address("setRewardAddress", reward, credential).await
    }

    pub async fn set_power_address(&self, power: Address, credential: &Credential) -> Result<Receipt, StepFailure> {
        self.handle.set_address("setPowerAddress", power, credential).await
    }
}

/// Modules with no reads during resolution; only admin setters are used
pub struct ModuleContract<'a> {
    handle: ContractHandle<'a>,
}

/// Typed handle for whichever role a step targets
pub enum RoleHandle<'a> {
    Proxy(SystemProxyContract<'a>),
    System(SystemContract<'a>),
    Module(ModuleContract<'a>),
}

impl<'a> RoleHandle<'a> {
    fn contract(&self) -> ContractHandle<'a> {
        match self {
            RoleHandle::Proxy(proxy) => proxy.handle,
            RoleHandle::System(system) => system.handle,
            RoleHandle::Module(module) => module.handle,
        }
    }

    pub fn address(&self) -> Address {
        self.contract().address()
    }

    /// Invoke a declared single-address setter on this contract
    pub async fn set_address(
        &self,
        setter: &str,
        value: Address,
        credential: &Credential,
    ) -> Result<Receipt, StepFailure> {
        match (self, setter) {
            (RoleHandle::System(system), "setStakingAddress") => system.set_staking_address(value, credential).await,
            (RoleHandle::System(system), "setRewardAddress") => system.set_reward_address(value, credential).await,
            (RoleHandle::System(system), "setPowerAddress") => system.set_power_address(value, credential).await,
            _ => self.contract().set_address(setter, value, credential).await,
        }
    }
}

/// Factory keyed by role
pub fn handle_for<'a>(role: Role, address: Address, transport: &'a dyn Transport) -> RoleHandle<'a> {
    match role {
        Role::Proxy => RoleHandle::Proxy(SystemProxyContract::new(address, transport)),
        Role::System => RoleHandle::System(SystemContract::new(address, transport)),
        Role::Staking | Role::Power | Role::Reward => RoleHandle::Module(ModuleContract {
            handle: ContractHandle::new(address, transport),
        }),
    }
}
