// Orchestrator
//
// Executes a deployment plan one step at a time. Every step waits for its
// transaction to confirm before the next is submitted, and new addresses are
// fed into the address set for the steps that follow. The first failure
// halts the run; earlier steps stay on chain and are reported back.

use crate::contracts::handle_for;
use crate::error::{ExecutionError, StepFailure};
use crate::registry::{ContractRegistry, DeployableUnit};
use crate::transport::{Credential, Transport};
use chrono::{DateTime, Utc};
use common::utils::display_address;
use common::{AddressSet, ArgError, DeploymentPlan, DeploymentStep, Role, StepKind};
use ethers::abi::{ParamType, Token};
use ethers::types::{Address, Bytes, H256};
use log::{error, info, warn};
use serde::{Deserialize, Serialize};

/// One confirmed step
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationRecord {
    /// 1-based position in the plan
    pub step: usize,
    pub kind: StepKind,
    pub role: Role,
    /// Recorded address of the role (the proxy for upgradeable units, the
    /// target contract for admin calls)
    pub address: Address,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logic_address: Option<Address>,
    /// Role whose address an admin call stored
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<Role>,
    pub tx_hash: H256,
    pub confirmed_at: DateTime<Utc>,
}

/// Result of a fully executed plan
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Execution {
    pub addresses: AddressSet,
    pub operations: Vec<OperationRecord>,
}

/// Sequential plan executor
pub struct Orchestrator<'a> {
    registry: &'a ContractRegistry,
    transport: &'a dyn Transport,
}

impl<'a> Orchestrator<'a> {
    pub fn new(registry: &'a ContractRegistry, transport: &'a dyn Transport) -> Self {
        Self { registry, transport }
    }

    /// Run every step of `plan` in order, starting from `addresses`.
    ///
    /// On failure nothing is rolled back: the error carries the address set
    /// as it stood after the last confirmed step and the index of the step
    /// that failed, so the run can be resumed through resolution.
    pub async fn execute(
        &self,
        plan: &DeploymentPlan,
        addresses: AddressSet,
        credential: &Credential,
    ) -> Result<Execution, Box<ExecutionError>> {
        let mut addresses = addresses;
        let mut operations = Vec::with_capacity(plan.len());

        for (index, step) in plan.iter().enumerate() {
            let number = index + 1;
            info!("step {}/{}: {}", number, plan.len(), step);

            match self.run_step(number, step, &addresses, credential).await {
                Ok(record) => {
                    if step.is_deployment() {
                        addresses.insert(step.role, record.address);
                        info!("{} deployed at {}", step.role, display_address(&record.address));
                    } else {
                        info!("{} wired into {}", record.source.map(|role| role.to_string()).unwrap_or_default(), step.role);
                    }
                    operations.push(record);
                }
                Err(cause) => {
                    error!("step {} ({} {}) failed: {}", number, step.kind, step.role, cause);
                    return Err(Box::new(ExecutionError {
                        step: number,
                        role: step.role,
                        kind: step.kind,
                        addresses,
                        operations,
                        cause,
                    }));
                }
            }
        }

        Ok(Execution { addresses, operations })
    }

    async fn run_step(
        &self,
        number: usize,
        step: &DeploymentStep,
        addresses: &AddressSet,
        credential: &Credential,
    ) -> Result<OperationRecord, StepFailure> {
        if let Some(missing) = step.requires.iter().find(|role| !addresses.contains(**role)) {
            return Err(StepFailure::DependencyMissing(*missing));
        }

        match step.kind {
            StepKind::Deploy => self.deploy(number, step, addresses, credential).await,
            StepKind::DeployUpgradeable => self.deploy_upgradeable(number, step, addresses, credential).await,
            StepKind::AdminSet => self.admin_set(number, step, addresses, credential).await,
        }
    }

    fn unit(&self, role: Role) -> Result<&'a DeployableUnit, StepFailure> {
        self.registry.lookup(role).map_err(|_| StepFailure::UnknownRole(role))
    }

    async fn deploy(
        &self,
        number: usize,
        step: &DeploymentStep,
        addresses: &AddressSet,
        credential: &Credential,
    ) -> Result<OperationRecord, StepFailure> {
        let unit = self.unit(step.role)?;
        let tokens = resolve_args(step, addresses)?;
        let init_code = unit.encode_constructor(&tokens).map_err(StepFailure::Encoding)?;

        let (address, tx_hash) = self.create(credential, init_code).await?;
        Ok(OperationRecord {
            step: number,
            kind: step.kind,
            role: step.role,
            address,
            logic_address: None,
            source: None,
            tx_hash,
            confirmed_at: Utc::now(),
        })
    }

    /// Deploy the logic contract, then an upgrade proxy pointing at it that
    /// runs `initialize(args)` in its constructor. The proxy is what the role
    /// records.
    async fn deploy_upgradeable(
        &self,
        number: usize,
        step: &DeploymentStep,
        addresses: &AddressSet,
        credential: &Credential,
    ) -> Result<OperationRecord, StepFailure> {
        let unit = self.unit(step.role)?;
        let proxy_unit = self
            .registry
            .upgrade_proxy()
            .map_err(|e| StepFailure::Encoding(e.to_string()))?;

        let tokens = resolve_args(step, addresses)?;
        let init_data = unit.encode_initializer(&tokens).map_err(StepFailure::Encoding)?;
        let logic_code = unit.encode_constructor(&[]).map_err(StepFailure::Encoding)?;

        let (logic, _) = self.create(credential, logic_code).await?;
        info!("{} logic deployed at {}", step.role, display_address(&logic));

        let orphaned = |cause: StepFailure| {
            warn!(
                "{} logic at {} is deployed but has no proxy in front of it",
                step.role,
                display_address(&logic)
            );
            StepFailure::ProxyCreation {
                logic,
                cause: Box::new(cause),
            }
        };

        let proxy_args = proxy_constructor_args(&proxy_unit.constructor_schema(), logic, init_data)
            .map_err(|detail| orphaned(StepFailure::Encoding(detail)))?;
        let proxy_code = proxy_unit
            .encode_constructor(&proxy_args)
            .map_err(|detail| orphaned(StepFailure::Encoding(detail)))?;
        let (proxy, tx_hash) = self.create(credential, proxy_code).await.map_err(orphaned)?;

        Ok(OperationRecord {
            step: number,
            kind: step.kind,
            role: step.role,
            address: proxy,
            logic_address: Some(logic),
            source: None,
            tx_hash,
            confirmed_at: Utc::now(),
        })
    }

    async fn admin_set(
        &self,
        number: usize,
        step: &DeploymentStep,
        addresses: &AddressSet,
        credential: &Credential,
    ) -> Result<OperationRecord, StepFailure> {
        let source = step
            .source()
            .ok_or_else(|| StepFailure::Encoding(format!("admin step on {} has no source role", step.role)))?;
        let setter = step
            .setter
            .as_deref()
            .ok_or_else(|| StepFailure::Encoding(format!("admin step on {} has no setter", step.role)))?;
        let target = addresses.get(step.role).ok_or(StepFailure::DependencyMissing(step.role))?;
        let value = addresses.get(source).ok_or(StepFailure::DependencyMissing(source))?;

        let receipt = handle_for(step.role, target, self.transport)
            .set_address(setter, value, credential)
            .await?;
        if !receipt.success {
            return Err(StepFailure::Reverted {
                tx_hash: receipt.tx_hash,
            });
        }

        Ok(OperationRecord {
            step: number,
            kind: step.kind,
            role: step.role,
            address: target,
            logic_address: None,
            source: Some(source),
            tx_hash: receipt.tx_hash,
            confirmed_at: Utc::now(),
        })
    }

    /// Submit a creation and insist on a successful receipt with an address
    async fn create(&self, credential: &Credential, init_code: Bytes) -> Result<(Address, H256), StepFailure> {
        let receipt = self.transport.deploy(credential, init_code).await?;
        if !receipt.success {
            return Err(StepFailure::Reverted {
                tx_hash: receipt.tx_hash,
            });
        }
        let address = receipt
            .contract_address
            .ok_or(StepFailure::MissingContractAddress {
                tx_hash: receipt.tx_hash,
            })?;
        Ok((address, receipt.tx_hash))
    }
}

/// Substitute role references with the addresses known so far
fn resolve_args(step: &DeploymentStep, addresses: &AddressSet) -> Result<Vec<Token>, StepFailure> {
    step.args
        .iter()
        .map(|arg| arg.to_token(addresses))
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| match e {
            ArgError::MissingRole(role) => StepFailure::DependencyMissing(role),
            other => StepFailure::Encoding(other.to_string()),
        })
}

/// Arguments for the upgrade proxy's constructor. Only the ERC-1967 shape
/// `(logic, data)` is supported. A transparent proxy's `(logic, admin, data)`
/// would make the deployer its admin, and the admin cannot call through to
/// the logic contract.
fn proxy_constructor_args(schema: &[ParamType], logic: Address, init_data: Bytes) -> Result<Vec<Token>, String> {
    match schema {
        [ParamType::Address, ParamType::Bytes] => Ok(vec![Token::Address(logic), Token::Bytes(init_data.to_vec())]),
        [ParamType::Address, ParamType::Address, ParamType::Bytes] => Err(
            "transparent proxy constructors (logic, admin, data) are not supported; use an ERC1967Proxy artifact"
                .to_string(),
        ),
        other => Err(format!("unsupported upgrade proxy constructor {:?}", other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TransportError;
    use crate::transport::{MemoryTransport, WriteFailure};
    use common::ArgValue;
    use serde_json::json;

    fn unit(name: &str, abi: serde_json::Value) -> DeployableUnit {
        DeployableUnit::new(name, Bytes::from(vec![0x60, 0x80]), serde_json::from_value(abi).unwrap())
    }

    fn registry() -> ContractRegistry {
        let mut registry = ContractRegistry::new();
        registry.register(Role::System, unit("System", json!([])));
        registry.register(
            Role::Staking,
            unit(
                "Staking",
                json!([{
                    "type": "function",
                    "name": "initialize",
                    "stateMutability": "nonpayable",
                    "inputs": [{ "name": "system", "type": "address" }],
                    "outputs": []
                }]),
            ),
        );
        let with_system = json!([{
            "type": "constructor",
            "stateMutability": "nonpayable",
            "inputs": [{ "name": "system", "type": "address" }]
        }]);
        registry.register(Role::Power, unit("Power", with_system.clone()));
        registry.register(Role::Reward, unit("Reward", with_system));
        registry.set_upgrade_proxy(unit(
            "ERC1967Proxy",
            json!([{
                "type": "constructor",
                "stateMutability": "payable",
                "inputs": [
                    { "name": "implementation", "type": "address" },
                    { "name": "_data", "type": "bytes" }
                ]
            }]),
        ));
        registry
    }

    fn deploy(role: Role, kind: StepKind, args: Vec<ArgValue>) -> DeploymentStep {
        let requires = args.iter().filter_map(ArgValue::role).collect();
        DeploymentStep::deploy(role, kind, requires, args)
    }

    fn four_step_plan() -> DeploymentPlan {
        DeploymentPlan::new(vec![
            deploy(Role::System, StepKind::Deploy, vec![]),
            deploy(Role::Staking, StepKind::DeployUpgradeable, vec![ArgValue::Role(Role::System)]),
            deploy(Role::Power, StepKind::Deploy, vec![ArgValue::Role(Role::System)]),
            deploy(Role::Reward, StepKind::Deploy, vec![ArgValue::Role(Role::System)]),
        ])
    }

    #[tokio::test]
    async fn test_upgradeable_records_proxy_address() {
        let registry = registry();
        let transport = MemoryTransport::new();
        let credential = Credential::ephemeral();
        let plan = DeploymentPlan::new(vec![
            deploy(Role::System, StepKind::Deploy, vec![]),
            deploy(Role::Staking, StepKind::DeployUpgradeable, vec![ArgValue::Role(Role::System)]),
        ]);

        let execution = Orchestrator::new(&registry, &transport)
            .execute(&plan, AddressSet::new(), &credential)
            .await
            .unwrap();

        // system, staking logic, staking proxy
        let writes = transport.writes();
        assert_eq!(writes.len(), 3);
        let logic = writes[1].receipt.contract_address.unwrap();
        let proxy = writes[2].receipt.contract_address.unwrap();

        assert_eq!(execution.addresses.get(Role::Staking), Some(proxy));
        assert_eq!(execution.operations[1].logic_address, Some(logic));
        assert_eq!(execution.operations[1].address, proxy);

        // proxy creation code carries the logic address and initialize(system)
        let system = execution.addresses.get(Role::System).unwrap();
        let proxy_code = &writes[2].data;
        assert!(proxy_code.windows(20).any(|window| window == logic.as_bytes()));
        assert!(proxy_code.windows(20).any(|window| window == system.as_bytes()));
    }

    #[tokio::test]
    async fn test_halts_at_failed_step() {
        let registry = registry();
        let transport = MemoryTransport::new();
        let credential = Credential::ephemeral();
        // writes: system, staking logic, staking proxy, power (step 3)
        transport.fail_write(4, WriteFailure::Revert);

        let err = Orchestrator::new(&registry, &transport)
            .execute(&four_step_plan(), AddressSet::new(), &credential)
            .await
            .unwrap_err();

        assert_eq!(err.step, 3);
        assert_eq!(err.role, Role::Power);
        assert!(matches!(err.cause, StepFailure::Reverted { .. }));
        assert!(err.cause.is_transaction_failure());
        assert_eq!(err.addresses.roles().collect::<Vec<_>>(), vec![Role::System, Role::Staking]);
        assert!(!err.addresses.contains(Role::Reward));
        assert_eq!(err.operations.len(), 2);
        // nothing was submitted after the failure
        assert_eq!(transport.writes().len(), 4);
    }

    #[tokio::test]
    async fn test_timeout_is_reported_as_confirmation_timeout() {
        let registry = registry();
        let transport = MemoryTransport::new();
        let credential = Credential::ephemeral();
        transport.fail_write(1, WriteFailure::Timeout);

        let err = Orchestrator::new(&registry, &transport)
            .execute(&four_step_plan(), AddressSet::new(), &credential)
            .await
            .unwrap_err();

        assert_eq!(err.step, 1);
        assert!(matches!(err.cause, StepFailure::ConfirmationTimeout(_)));
        assert!(err.addresses.is_empty());
    }

    #[tokio::test]
    async fn test_admin_set_does_not_touch_addresses() {
        let registry = registry();
        let transport = MemoryTransport::new();
        let credential = Credential::ephemeral();
        let before: AddressSet = vec![
            (Role::System, Address::from_low_u64_be(1)),
            (Role::Staking, Address::from_low_u64_be(2)),
            (Role::Reward, Address::from_low_u64_be(3)),
        ]
        .into_iter()
        .collect();
        let plan = DeploymentPlan::new(vec![
            DeploymentStep::admin_set(Role::System, Role::Staking, "setStakingAddress"),
            DeploymentStep::admin_set(Role::System, Role::Reward, "setRewardAddress"),
        ]);

        let execution = Orchestrator::new(&registry, &transport)
            .execute(&plan, before.clone(), &credential)
            .await
            .unwrap();

        assert_eq!(execution.addresses, before);
        assert_eq!(execution.operations.len(), 2);
        assert_eq!(execution.operations[1].source, Some(Role::Reward));
        assert!(transport.writes().iter().all(|write| write.to == Some(Address::from_low_u64_be(1))));
    }

    #[tokio::test]
    async fn test_missing_dependency_fails_before_submitting() {
        let registry = registry();
        let transport = MemoryTransport::new();
        let credential = Credential::ephemeral();
        let plan = DeploymentPlan::new(vec![deploy(
            Role::Power,
            StepKind::Deploy,
            vec![ArgValue::Role(Role::System)],
        )]);

        let err = Orchestrator::new(&registry, &transport)
            .execute(&plan, AddressSet::new(), &credential)
            .await
            .unwrap_err();

        assert_eq!(err.step, 1);
        assert_eq!(err.cause, StepFailure::DependencyMissing(Role::System));
        assert!(transport.writes().is_empty());
    }

    #[tokio::test]
    async fn test_unregistered_role() {
        let registry = registry();
        let transport = MemoryTransport::new();
        let plan = DeploymentPlan::new(vec![deploy(Role::Proxy, StepKind::Deploy, vec![])]);

        let err = Orchestrator::new(&registry, &transport)
            .execute(&plan, AddressSet::new(), &Credential::ephemeral())
            .await
            .unwrap_err();
        assert_eq!(err.cause, StepFailure::UnknownRole(Role::Proxy));
    }

    #[tokio::test]
    async fn test_write_outage_is_not_retried() {
        let registry = registry();
        let transport = MemoryTransport::new();
        let credential = Credential::ephemeral();
        let plan = DeploymentPlan::new(vec![
            deploy(Role::System, StepKind::Deploy, vec![]),
            deploy(Role::Power, StepKind::Deploy, vec![ArgValue::Role(Role::System)]),
            deploy(Role::Reward, StepKind::Deploy, vec![ArgValue::Role(Role::System)]),
        ]);
        transport.fail_write(2, WriteFailure::Unavailable);

        let err = Orchestrator::new(&registry, &transport)
            .execute(&plan, AddressSet::new(), &credential)
            .await
            .unwrap_err();

        assert_eq!(err.step, 2);
        assert_eq!(err.role, Role::Power);
        assert!(matches!(err.cause, StepFailure::Transport(TransportError::Unavailable(_))));
        assert!(!err.cause.is_transaction_failure());
        assert_eq!(err.addresses.roles().collect::<Vec<_>>(), vec![Role::System]);
        assert_eq!(err.operations.len(), 1);
        // the outage consumed no nonce and nothing followed it
        assert_eq!(transport.writes().len(), 1);
    }

    #[tokio::test]
    async fn test_failed_proxy_reports_orphaned_logic() {
        let registry = registry();
        let transport = MemoryTransport::new();
        let credential = Credential::ephemeral();
        // writes: system, staking logic, staking proxy
        transport.fail_write(3, WriteFailure::Revert);

        let err = Orchestrator::new(&registry, &transport)
            .execute(&four_step_plan(), AddressSet::new(), &credential)
            .await
            .unwrap_err();

        let writes = transport.writes();
        let logic = writes[1].receipt.contract_address.unwrap();
        assert_eq!(err.step, 2);
        assert_eq!(err.role, Role::Staking);
        assert_eq!(err.cause.orphaned_logic(), Some(logic));
        assert!(matches!(
            err.cause,
            StepFailure::ProxyCreation { ref cause, .. } if matches!(**cause, StepFailure::Reverted { .. })
        ));
        assert!(err.cause.is_transaction_failure());
        assert!(err.cause.to_string().contains(&format!("{:?}", logic)));
        // the role itself is still unset so a resume redeploys it
        assert!(!err.addresses.contains(Role::Staking));
        assert_eq!(writes.len(), 3);
    }

    #[tokio::test]
    async fn test_transparent_proxy_artifact_is_rejected() {
        let mut registry = registry();
        registry.set_upgrade_proxy(unit(
            "TransparentUpgradeableProxy",
            json!([{
                "type": "constructor",
                "stateMutability": "payable",
                "inputs": [
                    { "name": "_logic", "type": "address" },
                    { "name": "admin_", "type": "address" },
                    { "name": "_data", "type": "bytes" }
                ]
            }]),
        ));
        let transport = MemoryTransport::new();

        let err = Orchestrator::new(&registry, &transport)
            .execute(&four_step_plan(), AddressSet::new(), &Credential::ephemeral())
            .await
            .unwrap_err();

        assert_eq!(err.step, 2);
        match &err.cause {
            StepFailure::ProxyCreation { cause, .. } => assert!(matches!(**cause, StepFailure::Encoding(_))),
            other => panic!("unexpected failure {:?}", other),
        }
        // system and the staking logic only; no proxy was submitted
        assert_eq!(transport.writes().len(), 2);
    }

    #[test]
    fn test_proxy_constructor_shapes() {
        let logic = Address::from_low_u64_be(1);

        let erc1967 = proxy_constructor_args(&[ParamType::Address, ParamType::Bytes], logic, Bytes::default()).unwrap();
        assert_eq!(erc1967, vec![Token::Address(logic), Token::Bytes(vec![])]);

        let transparent = proxy_constructor_args(
            &[ParamType::Address, ParamType::Address, ParamType::Bytes],
            logic,
            Bytes::default(),
        );
        assert!(transparent.unwrap_err().contains("ERC1967Proxy"));

        assert!(proxy_constructor_args(&[ParamType::Address], logic, Bytes::default()).is_err());
    }
}
