// Deployment planner
//
// Turns the current address set and a desired topology into an ordered plan.
// Pure: no transport, no mutation, so it can be tested without a chain.

use crate::error::DeployError;
use crate::registry::ContractRegistry;
use common::{AddressSet, ArgValue, DeploymentPlan, DeploymentStep, Role, StepKind};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

fn default_kind() -> StepKind {
    StepKind::Deploy
}

/// How one desired role is deployed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleSpec {
    pub role: Role,
    #[serde(default = "default_kind")]
    pub kind: StepKind,
    /// Constructor arguments, or initializer arguments for upgradeable units
    #[serde(default)]
    pub args: Vec<ArgValue>,
    /// Deploy a fresh instance even if the role already resolved to an address
    #[serde(default)]
    pub redeploy: bool,
}

impl RoleSpec {
    pub fn new(role: Role, kind: StepKind, args: Vec<ArgValue>) -> Self {
        Self {
            role,
            kind,
            args,
            redeploy: false,
        }
    }
}

/// Admin linkage: `target.setter(address of source)`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WiringEdge {
    pub target: Role,
    pub source: Role,
    pub setter: String,
}

impl WiringEdge {
    pub fn new(target: Role, source: Role, setter: impl Into<String>) -> Self {
        Self {
            target,
            source,
            setter: setter.into(),
        }
    }
}

/// Desired roles plus the wiring declared between them
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Topology {
    pub roles: Vec<RoleSpec>,
    #[serde(default)]
    pub wiring: Vec<WiringEdge>,
}

impl Topology {
    /// System, staking (behind an upgrade proxy), power and reward, with the
    /// system contract recording the other three
    pub fn staking_cluster() -> Self {
        Self {
            roles: vec![
                RoleSpec::new(Role::System, StepKind::Deploy, vec![]),
                RoleSpec::new(
                    Role::Staking,
                    StepKind::DeployUpgradeable,
                    vec![ArgValue::Role(Role::System)],
                ),
                RoleSpec::new(
                    Role::Power,
                    StepKind::Deploy,
                    vec![
                        ArgValue::Role(Role::System),
                        ArgValue::Role(Role::Staking),
                        ArgValue::Uint("20".to_string()),
                    ],
                ),
                RoleSpec::new(
                    Role::Reward,
                    StepKind::Deploy,
                    vec![
                        ArgValue::Role(Role::System),
                        ArgValue::Role(Role::Staking),
                        ArgValue::Uint("1000".to_string()),
                    ],
                ),
            ],
            wiring: vec![
                WiringEdge::new(Role::System, Role::Staking, "setStakingAddress"),
                WiringEdge::new(Role::System, Role::Power, "setPowerAddress"),
                WiringEdge::new(Role::System, Role::Reward, "setRewardAddress"),
            ],
        }
    }

    pub fn desired_roles(&self) -> BTreeSet<Role> {
        self.roles.iter().map(|spec| spec.role).collect()
    }

    pub fn spec(&self, role: Role) -> Option<&RoleSpec> {
        self.roles.iter().find(|spec| spec.role == role)
    }

    /// Roles configured to be deployed again despite resolving
    pub fn redeployed_roles(&self) -> Vec<Role> {
        self.roles.iter().filter(|spec| spec.redeploy).map(|spec| spec.role).collect()
    }
}

/// Computes deployment plans against a registry
pub struct Planner<'a> {
    registry: &'a ContractRegistry,
}

impl<'a> Planner<'a> {
    pub fn new(registry: &'a ContractRegistry) -> Self {
        Self { registry }
    }

    /// Plan the steps that take `current` to `topology`.
    ///
    /// Deployments come first in dependency order (ties broken by role
    /// priority), followed by the declared wiring between desired roles.
    pub fn plan(&self, current: &AddressSet, topology: &Topology) -> Result<DeploymentPlan, DeployError> {
        let desired = self.validate(topology)?;

        let mut available: BTreeSet<Role> = current.roles().collect();
        let mut steps = Vec::new();

        for role in topological_order(&desired) {
            if current.contains(role) {
                continue;
            }
            if !self.registry.contains(role) {
                return Err(DeployError::UnknownRole(role.to_string()));
            }
            let spec = topology
                .spec(role)
                .ok_or_else(|| DeployError::UnknownRole(role.to_string()))?;

            let mut requires: BTreeSet<Role> = role
                .dependencies()
                .iter()
                .filter(|dependency| desired.contains(*dependency))
                .copied()
                .collect();
            requires.extend(spec.args.iter().filter_map(ArgValue::role));

            if let Some(missing) = requires.iter().find(|required| !available.contains(*required)) {
                return Err(DeployError::DependencyMissing {
                    role,
                    missing: *missing,
                });
            }

            steps.push(DeploymentStep::deploy(
                role,
                spec.kind,
                requires.into_iter().collect(),
                spec.args.clone(),
            ));
            available.insert(role);
        }

        let mut wiring: Vec<&WiringEdge> = topology
            .wiring
            .iter()
            .filter(|edge| desired.contains(&edge.target) && desired.contains(&edge.source))
            .collect();
        wiring.sort_by_key(|edge| (edge.source, edge.target));

        for edge in wiring {
            steps.push(DeploymentStep::admin_set(edge.target, edge.source, edge.setter.clone()));
        }

        Ok(DeploymentPlan::new(steps))
    }

    fn validate(&self, topology: &Topology) -> Result<BTreeSet<Role>, DeployError> {
        let mut desired = BTreeSet::new();
        for spec in &topology.roles {
            if !desired.insert(spec.role) {
                return Err(DeployError::DuplicateRole(spec.role));
            }
            if spec.kind == StepKind::AdminSet {
                return Err(DeployError::Config(format!(
                    "role {} cannot be deployed with kind {}",
                    spec.role, spec.kind
                )));
            }
        }

        for edge in &topology.wiring {
            if edge.target == edge.source {
                return Err(DeployError::Config(format!(
                    "wiring edge {}.{} points at itself",
                    edge.target, edge.setter
                )));
            }
            if edge.setter.trim().is_empty() {
                return Err(DeployError::Config(format!(
                    "wiring edge {} <- {} has no setter",
                    edge.target, edge.source
                )));
            }
        }

        Ok(desired)
    }
}

/// Kahn's algorithm over the static dependency DAG restricted to `desired`;
/// the ready set is ordered so that independent roles come out by priority
fn topological_order(desired: &BTreeSet<Role>) -> Vec<Role> {
    let mut pending: BTreeMap<Role, usize> = desired
        .iter()
        .map(|role| {
            let count = role
                .dependencies()
                .iter()
                .filter(|dependency| desired.contains(*dependency))
                .count();
            (*role, count)
        })
        .collect();

    let mut ready: BTreeSet<Role> = pending
        .iter()
        .filter(|(_, count)| **count == 0)
        .map(|(role, _)| *role)
        .collect();

    let mut order = Vec::with_capacity(desired.len());
    while let Some(role) = ready.pop_first() {
        order.push(role);
        for dependent in desired.iter().filter(|candidate| candidate.dependencies().contains(&role)) {
            if let Some(count) = pending.get_mut(dependent) {
                *count -= 1;
                if *count == 0 {
                    ready.insert(*dependent);
                }
            }
        }
    }
    order
}
