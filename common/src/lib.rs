pub mod types;
pub mod utils;

pub use types::*;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RoleError {
    #[error("unknown role: {0}")]
    Unknown(String),
}

/// A logical position in the contract topology.
///
/// The declaration order is the fixed priority used to break ties between
/// roles that are otherwise independent of each other.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Proxy,
    System,
    Staking,
    Power,
    Reward,
}

impl Role {
    /// Every role, in priority order
    pub const ALL: [Role; 5] = [Role::Proxy, Role::System, Role::Staking, Role::Power, Role::Reward];

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Proxy => "proxy",
            Role::System => "system",
            Role::Staking => "staking",
            Role::Power => "power",
            Role::Reward => "reward",
        }
    }

    /// Name of the compiled contract that fills this role
    pub fn contract_name(&self) -> &'static str {
        match self {
            Role::Proxy => "SystemProxy",
            Role::System => "System",
            Role::Staking => "Staking",
            Role::Power => "Power",
            Role::Reward => "Reward",
        }
    }

    /// Construction-time predecessors in the static dependency DAG
    /// (proxy <- system <- staking <- {power, reward}).
    pub fn dependencies(&self) -> &'static [Role] {
        match self {
            Role::Proxy => &[],
            Role::System => &[Role::Proxy],
            Role::Staking => &[Role::System],
            Role::Power => &[Role::Staking],
            Role::Reward => &[Role::Staking],
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = RoleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "proxy" => Ok(Role::Proxy),
            "system" => Ok(Role::System),
            "staking" => Ok(Role::Staking),
            "power" => Ok(Role::Power),
            "reward" => Ok(Role::Reward),
            _ => Err(RoleError::Unknown(s.to_string())),
        }
    }
}
