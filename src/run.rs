// Deployment run
//
// Drives one resolve -> plan -> execute pass and tracks where it is:
//
//   Init -> Resolving -> Planning -> Executing -> Done
//
// Any active stage can fail into Failed, which is terminal.

use crate::config::{AddressSource, DeployConfig};
use crate::error::DeployError;
use crate::orchestrator::{Execution, OperationRecord, Orchestrator};
use crate::planner::Planner;
use crate::registry::ContractRegistry;
use crate::resolver::AddressResolver;
use crate::transport::{BootstrapSource, Credential, Transport};
use common::utils::display_address;
use common::{AddressSet, DeploymentPlan, Role};
use ethers::types::Address;
use log::{debug, error, info};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunState {
    Init,
    Resolving,
    Planning,
    Executing,
    Done,
    Failed,
}

impl RunState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, RunState::Done | RunState::Failed)
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RunState::Init => "INIT",
            RunState::Resolving => "RESOLVING",
            RunState::Planning => "PLANNING",
            RunState::Executing => "EXECUTING",
            RunState::Done => "DONE",
            RunState::Failed => "FAILED",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunEvent {
    Started,
    Resolved,
    Planned,
    Executed,
    Failed { reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("cannot leave {from} on {event}: {reason}")]
pub struct TransitionError {
    pub from: RunState,
    pub event: String,
    pub reason: String,
}

pub fn transition(current: &RunState, event: &RunEvent) -> Result<RunState, TransitionError> {
    match (current, event) {
        (RunState::Init, RunEvent::Started) => Ok(RunState::Resolving),
        (RunState::Resolving, RunEvent::Resolved) => Ok(RunState::Planning),
        (RunState::Planning, RunEvent::Planned) => Ok(RunState::Executing),
        (RunState::Executing, RunEvent::Executed) => Ok(RunState::Done),
        (RunState::Init, RunEvent::Failed { .. }) => Ok(RunState::Failed),
        (RunState::Resolving, RunEvent::Failed { .. }) => Ok(RunState::Failed),
        (RunState::Planning, RunEvent::Failed { .. }) => Ok(RunState::Failed),
        (RunState::Executing, RunEvent::Failed { .. }) => Ok(RunState::Failed),
        _ => Err(TransitionError {
            from: *current,
            event: format!("{event:?}"),
            reason: "invalid transition".to_string(),
        }),
    }
}

/// Result of a completed run
#[derive(Debug, Clone)]
pub struct RunOutcome {
    /// Addresses the plan started from
    pub initial: AddressSet,
    pub plan: DeploymentPlan,
    pub addresses: AddressSet,
    pub operations: Vec<OperationRecord>,
}

impl RunOutcome {
    /// Roles given an address by this run
    pub fn new_addresses(&self) -> Vec<(Role, Address)> {
        self.addresses
            .iter()
            .filter(|(role, address)| self.initial.get(*role) != Some(*address))
            .collect()
    }
}

/// One pass from configuration to converged cluster.
///
/// Reads and writes go through separate transports so a rehearsal can
/// resolve against a live node while submitting to an in-memory chain.
pub struct DeploymentRun<'a> {
    config: &'a DeployConfig,
    registry: &'a ContractRegistry,
    bootstrap: &'a dyn BootstrapSource,
    reader: &'a dyn Transport,
    writer: &'a dyn Transport,
    state: RunState,
    initial: Option<AddressSet>,
    plan: Option<DeploymentPlan>,
}

impl<'a> DeploymentRun<'a> {
    pub fn new(
        config: &'a DeployConfig,
        registry: &'a ContractRegistry,
        bootstrap: &'a dyn BootstrapSource,
        reader: &'a dyn Transport,
        writer: &'a dyn Transport,
    ) -> Self {
        Self {
            config,
            registry,
            bootstrap,
            reader,
            writer,
            state: RunState::Init,
            initial: None,
            plan: None,
        }
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    /// Starting addresses, once resolution has completed
    pub fn initial(&self) -> Option<&AddressSet> {
        self.initial.as_ref()
    }

    /// The computed plan, once planning has completed
    pub fn plan(&self) -> Option<&DeploymentPlan> {
        self.plan.as_ref()
    }

    fn advance(&mut self, event: RunEvent) -> Result<(), DeployError> {
        let next = transition(&self.state, &event).map_err(|e| DeployError::Config(e.to_string()))?;
        debug!("run {} -> {}", self.state, next);
        self.state = next;
        Ok(())
    }

    fn fail(&mut self, err: DeployError) -> DeployError {
        error!("run failed while {}: {}", self.state, err);
        if let Ok(next) = transition(&self.state, &RunEvent::Failed { reason: err.to_string() }) {
            self.state = next;
        }
        err
    }

    /// Resolve, plan and execute. Stops at the first failure with the run in
    /// `Failed`; a halted execution carries the partial address set.
    pub async fn run(&mut self, credential: &Credential) -> Result<RunOutcome, DeployError> {
        self.advance(RunEvent::Started)?;

        let initial = match self.initial_addresses().await {
            Ok(addresses) => addresses,
            Err(err) => return Err(self.fail(err)),
        };
        self.initial = Some(initial.clone());
        self.advance(RunEvent::Resolved)?;

        let plan = match Planner::new(self.registry).plan(&initial, &self.config.topology) {
            Ok(plan) => plan,
            Err(err) => return Err(self.fail(err)),
        };
        info!("planned {} step(s)", plan.len());
        for (index, step) in plan.iter().enumerate() {
            info!("  {}. {}", index + 1, step);
        }
        self.plan = Some(plan.clone());
        self.advance(RunEvent::Planned)?;

        let execution = Orchestrator::new(self.registry, self.writer)
            .execute(&plan, initial.clone(), credential)
            .await;
        let Execution { addresses, operations } = match execution {
            Ok(execution) => execution,
            Err(err) => return Err(self.fail(DeployError::Execution(err))),
        };
        self.advance(RunEvent::Executed)?;

        for (role, address) in addresses.iter() {
            debug!("{} = {}", role, display_address(&address));
        }
        Ok(RunOutcome {
            initial,
            plan,
            addresses,
            operations,
        })
    }

    /// Resolve and plan without executing anything
    pub async fn plan_only(&mut self) -> Result<(AddressSet, DeploymentPlan), DeployError> {
        self.advance(RunEvent::Started)?;
        let initial = match self.initial_addresses().await {
            Ok(addresses) => addresses,
            Err(err) => return Err(self.fail(err)),
        };
        self.initial = Some(initial.clone());
        self.advance(RunEvent::Resolved)?;
        match Planner::new(self.registry).plan(&initial, &self.config.topology) {
            Ok(plan) => {
                self.plan = Some(plan.clone());
                Ok((initial, plan))
            }
            Err(err) => Err(self.fail(err)),
        }
    }

    /// Seed the address set per the configured source, minus roles marked
    /// for redeployment
    async fn initial_addresses(&self) -> Result<AddressSet, DeployError> {
        let mut addresses = match &self.config.address_source {
            AddressSource::Resolve => {
                AddressResolver::new(self.bootstrap, self.reader)
                    .with_field(self.config.bootstrap.field.clone())
                    .resolve_with_retry(&self.config.retry)
                    .await?
            }
            AddressSource::Static { addresses } => addresses.clone(),
            AddressSource::Empty => AddressSet::new(),
        };

        for role in self.config.topology.redeployed_roles() {
            if let Some(previous) = addresses.remove(role) {
                info!("{} at {} will be redeployed", role, display_address(&previous));
            }
        }
        Ok(addresses)
    }
}
