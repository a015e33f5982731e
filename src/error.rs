// Error types
//
// Resolution and planning errors are returned before anything touches the
// chain. Execution errors carry the partial state left behind by a halted run.

use crate::orchestrator::OperationRecord;
use common::{AddressSet, Role, RoleError, StepKind};
use ethers::types::{Address, H256};
use std::time::Duration;
use thiserror::Error;

/// Failures of the node or bootstrap transport
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("node unavailable: {0}")]
    Unavailable(String),
    #[error("rpc error: {0}")]
    Rpc(String),
    #[error("no confirmation after {0:?}")]
    Timeout(Duration),
    #[error("transaction {0:?} was dropped before confirmation")]
    Dropped(H256),
}

/// Failures while discovering the current topology
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ResolutionError {
    /// Nothing there yet, usually because the node is still synchronizing
    #[error("resolving {role}: no address returned yet")]
    Empty { role: Role },
    #[error("resolving {role}: malformed value: {detail}")]
    Malformed { role: Role, detail: String },
    #[error("resolving {role}: {source}")]
    Transport {
        role: Role,
        #[source]
        source: TransportError,
    },
}

impl ResolutionError {
    /// Whether the caller should retry after a delay rather than abort
    pub fn is_transient(&self) -> bool {
        !matches!(self, ResolutionError::Malformed { .. })
    }

    pub fn role(&self) -> Role {
        match self {
            ResolutionError::Empty { role }
            | ResolutionError::Malformed { role, .. }
            | ResolutionError::Transport { role, .. } => *role,
        }
    }
}

/// Why a single deployment step did not complete
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StepFailure {
    #[error("transaction {tx_hash:?} reverted")]
    Reverted { tx_hash: H256 },
    #[error("transaction not confirmed within {0:?}")]
    ConfirmationTimeout(Duration),
    #[error("creation receipt {tx_hash:?} has no contract address")]
    MissingContractAddress { tx_hash: H256 },
    #[error(transparent)]
    Transport(TransportError),
    #[error("cannot encode call: {0}")]
    Encoding(String),
    #[error("required role {0} has no address")]
    DependencyMissing(Role),
    #[error("role {0} is not registered")]
    UnknownRole(Role),
    /// The logic contract landed but the proxy in front of it did not
    #[error("logic contract at {logic:?} has no proxy: {cause}")]
    ProxyCreation { logic: Address, cause: Box<StepFailure> },
}

impl StepFailure {
    /// Reverted or unconfirmed transactions, as opposed to transport or setup problems
    pub fn is_transaction_failure(&self) -> bool {
        match self {
            StepFailure::ProxyCreation { cause, .. } => cause.is_transaction_failure(),
            other => matches!(
                other,
                StepFailure::Reverted { .. }
                    | StepFailure::ConfirmationTimeout(_)
                    | StepFailure::MissingContractAddress { .. }
            ),
        }
    }

    /// Logic contract left on chain without a proxy, if any
    pub fn orphaned_logic(&self) -> Option<Address> {
        match self {
            StepFailure::ProxyCreation { logic, .. } => Some(*logic),
            _ => None,
        }
    }
}

impl From<TransportError> for StepFailure {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::Timeout(waited) => StepFailure::ConfirmationTimeout(waited),
            other => StepFailure::Transport(other),
        }
    }
}

/// A halted execution. Effects of the steps before `step` are on chain and
/// are reflected in `addresses`; nothing was rolled back.
#[derive(Error, Debug)]
#[error("step {step} ({kind} {role}) failed: {cause}")]
pub struct ExecutionError {
    /// 1-based index of the failed step
    pub step: usize,
    pub role: Role,
    pub kind: StepKind,
    pub addresses: AddressSet,
    pub operations: Vec<OperationRecord>,
    #[source]
    pub cause: StepFailure,
}

#[derive(Error, Debug)]
pub enum DeployError {
    #[error(transparent)]
    Resolution(#[from] ResolutionError),

    #[error("unknown role: {0}")]
    UnknownRole(String),

    #[error("{role} requires {missing}, which is neither resolved nor planned earlier")]
    DependencyMissing { role: Role, missing: Role },

    #[error("role {0} appears more than once in the topology")]
    DuplicateRole(Role),

    #[error("artifact {name}: {detail}")]
    Artifact { name: String, detail: String },

    #[error("configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Execution(#[from] Box<ExecutionError>),
}

impl From<RoleError> for DeployError {
    fn from(err: RoleError) -> Self {
        match err {
            RoleError::Unknown(name) => DeployError::UnknownRole(name),
        }
    }
}
