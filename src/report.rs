// Deployment reports
//
// Machine-readable record of what a run did, written next to the config so
// the next run (or a human) can see which transactions landed.

use crate::error::ExecutionError;
use crate::orchestrator::OperationRecord;
use crate::run::{RunOutcome, RunState};
use anyhow::Result;
use chrono::{DateTime, Utc};
use common::utils::display_address;
use common::{AddressSet, DeploymentPlan, Role};
use ethers::types::Address;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Failed step as reported
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureSummary {
    pub step: usize,
    pub role: Role,
    pub reason: String,
    /// Logic contract of an upgradeable role whose proxy never landed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub orphaned_logic: Option<Address>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentReport {
    pub timestamp: DateTime<Utc>,
    pub chain_id: Option<u64>,
    pub dry_run: bool,
    pub state: RunState,
    pub initial: AddressSet,
    pub plan: DeploymentPlan,
    pub addresses: AddressSet,
    pub operations: Vec<OperationRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<FailureSummary>,
}

impl DeploymentReport {
    pub fn completed(outcome: &RunOutcome, chain_id: Option<u64>, dry_run: bool) -> Self {
        Self {
            timestamp: Utc::now(),
            chain_id,
            dry_run,
            state: RunState::Done,
            initial: outcome.initial.clone(),
            plan: outcome.plan.clone(),
            addresses: outcome.addresses.clone(),
            operations: outcome.operations.clone(),
            failure: None,
        }
    }

    /// Report of a halted execution; `initial` and `plan` are what the run
    /// had computed before executing
    pub fn halted(
        err: &ExecutionError,
        initial: AddressSet,
        plan: DeploymentPlan,
        chain_id: Option<u64>,
        dry_run: bool,
    ) -> Self {
        Self {
            timestamp: Utc::now(),
            chain_id,
            dry_run,
            state: RunState::Failed,
            initial,
            plan,
            addresses: err.addresses.clone(),
            operations: err.operations.clone(),
            failure: Some(FailureSummary {
                step: err.step,
                role: err.role,
                reason: err.cause.to_string(),
                orphaned_logic: err.cause.orphaned_logic(),
            }),
        }
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        fs::write(path, self.to_json()?)?;
        Ok(())
    }

    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let raw = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }

    /// Plain text summary
    pub fn to_text(&self) -> String {
        let mut output = String::new();

        output.push_str("Staking Deployment Report\n");
        output.push_str("=========================\n\n");
        output.push_str(&format!("Timestamp: {}\n", self.timestamp.to_rfc3339()));
        if let Some(chain_id) = self.chain_id {
            output.push_str(&format!("Chain: {}\n", chain_id));
        }
        if self.dry_run {
            output.push_str("Mode: dry run (nothing was sent)\n");
        }
        output.push_str(&format!("State: {}\n\n", self.state));

        output.push_str(&format!("Operations: {}/{}\n", self.operations.len(), self.plan.len()));
        output.push_str("----------\n");
        for operation in &self.operations {
            output.push_str(&format!(
                "{:>3}. {} {} at {} (tx {:?})\n",
                operation.step,
                operation.kind,
                operation.role,
                display_address(&operation.address),
                operation.tx_hash
            ));
        }

        if let Some(failure) = &self.failure {
            output.push_str(&format!(
                "\nFAILED at step {} ({}): {}\n",
                failure.step, failure.role, failure.reason
            ));
            if let Some(logic) = failure.orphaned_logic {
                output.push_str(&format!("Logic contract left without a proxy: {}\n", display_address(&logic)));
            }
        }

        output.push_str("\nAddresses\n---------\n");
        output.push_str(&format!("{}\n", self.addresses));
        output
    }
}
