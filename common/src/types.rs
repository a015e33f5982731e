use crate::utils::display_address;
use crate::Role;
use ethers::abi::Token;
use ethers::types::{Address, Bytes, U256};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

/// Role -> address mapping built up during a run.
///
/// A role is only present once resolution or a deployment step has
/// confirmed it; absence means "not yet known".
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AddressSet {
    addresses: BTreeMap<Role, Address>,
}

impl AddressSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, role: Role) -> Option<Address> {
        self.addresses.get(&role).copied()
    }

    pub fn contains(&self, role: Role) -> bool {
        self.addresses.contains_key(&role)
    }

    /// Record the confirmed address of a role, returning the one it replaces
    pub fn insert(&mut self, role: Role, address: Address) -> Option<Address> {
        self.addresses.insert(role, address)
    }

    /// Forget a role so it can be planned again
    pub fn remove(&mut self, role: Role) -> Option<Address> {
        self.addresses.remove(&role)
    }

    pub fn len(&self) -> usize {
        self.addresses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.addresses.is_empty()
    }

    pub fn roles(&self) -> impl Iterator<Item = Role> + '_ {
        self.addresses.keys().copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (Role, Address)> + '_ {
        self.addresses.iter().map(|(role, address)| (*role, *address))
    }
}

impl FromIterator<(Role, Address)> for AddressSet {
    fn from_iter<I: IntoIterator<Item = (Role, Address)>>(iter: I) -> Self {
        Self {
            addresses: iter.into_iter().collect(),
        }
    }
}

impl fmt::Display for AddressSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.addresses.is_empty() {
            return f.write_str("(none)");
        }
        let parts: Vec<String> = self
            .iter()
            .map(|(role, address)| format!("{}={}", role, display_address(&address)))
            .collect();
        f.write_str(&parts.join(", "))
    }
}

/// Kind of operation a deployment step performs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepKind {
    /// Plain contract creation
    Deploy,
    /// Logic contract fronted by an upgrade proxy; the proxy address is recorded
    DeployUpgradeable,
    /// Single-address admin setter on an already deployed contract
    AdminSet,
}

impl fmt::Display for StepKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StepKind::Deploy => f.write_str("DEPLOY"),
            StepKind::DeployUpgradeable => f.write_str("DEPLOY_UPGRADEABLE"),
            StepKind::AdminSet => f.write_str("ADMIN_SET"),
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ArgError {
    #[error("argument references role {0} which has no address yet")]
    MissingRole(Role),
    #[error("invalid unsigned integer argument: {0}")]
    InvalidUint(String),
}

/// Constructor / initializer argument as written in configuration.
///
/// `Role` values are symbolic and only become concrete addresses when the
/// step that uses them executes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum ArgValue {
    Role(Role),
    Address(Address),
    /// Decimal string, wide enough for wei amounts
    Uint(String),
    Bool(bool),
    String(String),
    Bytes(Bytes),
}

impl ArgValue {
    pub fn role(&self) -> Option<Role> {
        match self {
            ArgValue::Role(role) => Some(*role),
            _ => None,
        }
    }

    /// Substitute role references and produce an ABI token
    pub fn to_token(&self, addresses: &AddressSet) -> Result<Token, ArgError> {
        match self {
            ArgValue::Role(role) => addresses
                .get(*role)
                .map(Token::Address)
                .ok_or(ArgError::MissingRole(*role)),
            ArgValue::Address(address) => Ok(Token::Address(*address)),
            ArgValue::Uint(value) => U256::from_dec_str(value.trim())
                .map(Token::Uint)
                .map_err(|_| ArgError::InvalidUint(value.clone())),
            ArgValue::Bool(value) => Ok(Token::Bool(*value)),
            ArgValue::String(value) => Ok(Token::String(value.clone())),
            ArgValue::Bytes(value) => Ok(Token::Bytes(value.to_vec())),
        }
    }
}

impl fmt::Display for ArgValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArgValue::Role(role) => write!(f, "<{}>", role),
            ArgValue::Address(address) => f.write_str(&display_address(address)),
            ArgValue::Uint(value) => f.write_str(value),
            ArgValue::Bool(value) => write!(f, "{}", value),
            ArgValue::String(value) => write!(f, "{:?}", value),
            ArgValue::Bytes(value) => write!(f, "{}", value),
        }
    }
}

/// One unit of work in a deployment plan
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentStep {
    /// Role being deployed, or the target contract of an admin call
    pub role: Role,
    pub kind: StepKind,
    /// Roles that must already have an address when this step runs
    pub requires: Vec<Role>,
    pub args: Vec<ArgValue>,
    /// Setter method name, only for `AdminSet`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub setter: Option<String>,
}

impl DeploymentStep {
    pub fn deploy(role: Role, kind: StepKind, requires: Vec<Role>, args: Vec<ArgValue>) -> Self {
        Self {
            role,
            kind,
            requires,
            args,
            setter: None,
        }
    }

    /// `target.setter(address of source)`
    pub fn admin_set(target: Role, source: Role, setter: impl Into<String>) -> Self {
        Self {
            role: target,
            kind: StepKind::AdminSet,
            requires: vec![target, source],
            args: vec![ArgValue::Role(source)],
            setter: Some(setter.into()),
        }
    }

    pub fn is_deployment(&self) -> bool {
        !matches!(self.kind, StepKind::AdminSet)
    }

    /// Role whose address an admin call stores
    pub fn source(&self) -> Option<Role> {
        match self.kind {
            StepKind::AdminSet => self.args.first().and_then(ArgValue::role),
            _ => None,
        }
    }
}

impl fmt::Display for DeploymentStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let args: Vec<String> = self.args.iter().map(|arg| arg.to_string()).collect();
        match &self.setter {
            Some(setter) => write!(f, "{} {}.{}({})", self.kind, self.role, setter, args.join(", ")),
            None => write!(f, "{} {}({})", self.kind, self.role, args.join(", ")),
        }
    }
}

/// Ordered sequence of steps
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeploymentPlan {
    steps: Vec<DeploymentStep>,
}

impl DeploymentPlan {
    pub fn new(steps: Vec<DeploymentStep>) -> Self {
        Self { steps }
    }

    pub fn steps(&self) -> &[DeploymentStep] {
        &self.steps
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, DeploymentStep> {
        self.steps.iter()
    }

    /// Roles this plan will assign an address to, in order
    pub fn deployed_roles(&self) -> Vec<Role> {
        self.steps
            .iter()
            .filter(|step| step.is_deployment())
            .map(|step| step.role)
            .collect()
    }

    /// Check that every step's required roles are either in `initial` or
    /// deployed by an earlier step.
    pub fn is_ordered_for(&self, initial: &AddressSet) -> bool {
        let mut known: Vec<Role> = initial.roles().collect();
        for step in &self.steps {
            if !step.requires.iter().all(|role| known.contains(role)) {
                return false;
            }
            if step.is_deployment() {
                known.push(step.role);
            }
        }
        true
    }
}

impl<'a> IntoIterator for &'a DeploymentPlan {
    type Item = &'a DeploymentStep;
    type IntoIter = std::slice::Iter<'a, DeploymentStep>;

    fn into_iter(self) -> Self::IntoIter {
        self.steps.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(n: u64) -> Address {
        Address::from_low_u64_be(n)
    }

    #[test]
    fn test_arg_substitution() {
        let mut addresses = AddressSet::new();
        addresses.insert(Role::System, addr(7));

        assert_eq!(
            ArgValue::Role(Role::System).to_token(&addresses),
            Ok(Token::Address(addr(7)))
        );
        assert_eq!(
            ArgValue::Role(Role::Staking).to_token(&addresses),
            Err(ArgError::MissingRole(Role::Staking))
        );
        assert_eq!(
            ArgValue::Uint("3000000000000000000000000".to_string()).to_token(&addresses),
            Ok(Token::Uint(U256::from(3) * U256::exp10(24)))
        );
        assert!(ArgValue::Uint("12abc".to_string()).to_token(&addresses).is_err());
    }

    #[test]
    fn test_arg_value_json_shape() {
        let args: Vec<ArgValue> = serde_json::from_str(
            r#"[{"type":"role","value":"system"},{"type":"uint","value":"20000"},{"type":"bool","value":true}]"#,
        )
        .unwrap();
        assert_eq!(
            args,
            vec![
                ArgValue::Role(Role::System),
                ArgValue::Uint("20000".to_string()),
                ArgValue::Bool(true),
            ]
        );
    }

    #[test]
    fn test_plan_order_check() {
        let ordered = DeploymentPlan::new(vec![
            DeploymentStep::deploy(Role::System, StepKind::Deploy, vec![], vec![]),
            DeploymentStep::deploy(Role::Staking, StepKind::DeployUpgradeable, vec![Role::System], vec![]),
            DeploymentStep::admin_set(Role::System, Role::Staking, "setStakingAddress"),
        ]);
        assert!(ordered.is_ordered_for(&AddressSet::new()));
        assert_eq!(ordered.deployed_roles(), vec![Role::System, Role::Staking]);

        let reversed = DeploymentPlan::new(ordered.iter().rev().cloned().collect());
        assert!(!reversed.is_ordered_for(&AddressSet::new()));
    }

    #[test]
    fn test_admin_set_source() {
        let step = DeploymentStep::admin_set(Role::System, Role::Reward, "setRewardAddress");
        assert_eq!(step.source(), Some(Role::Reward));
        assert_eq!(step.requires, vec![Role::System, Role::Reward]);
        assert!(!step.is_deployment());
        assert_eq!(step.to_string(), "ADMIN_SET system.setRewardAddress(<reward>)");
    }
}
