use ethers::types::{Address, Bytes};
use serde_json::json;

use common::{AddressSet, Role, StepKind};
use staking_deployer::config::{AddressSource, ConfigManager, DeployConfig};
use staking_deployer::planner::Topology;
use staking_deployer::registry::{ContractRegistry, DeployableUnit};
use staking_deployer::resolver::RetryPolicy;
use staking_deployer::run::{DeploymentRun, RunState};
use staking_deployer::transport::{Credential, MemoryTransport, StaticBootstrap, WriteFailure};
use staking_deployer::{DeployError, ResolutionError, StepFailure};

const DEV_KEY: &str = "0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";

fn unit(name: &str, abi: serde_json::Value) -> DeployableUnit {
    DeployableUnit::new(name, Bytes::from(vec![0x60, 0x80, 0x60, 0x40]), serde_json::from_value(abi).unwrap())
}

// Power and reward take (system, staking, limit)
fn module_abi() -> serde_json::Value {
    json!([{
        "type": "constructor",
        "stateMutability": "nonpayable",
        "inputs": [
            { "name": "system", "type": "address" },
            { "name": "staking", "type": "address" },
            { "name": "limit", "type": "uint256" }
        ]
    }])
}

fn cluster_registry() -> ContractRegistry {
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
    registry.register(Role::Power, unit("Power", module_abi()));
    registry.register(Role::Reward, unit("Reward", module_abi()));
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

fn config(source: AddressSource) -> DeployConfig {
    ConfigManager::builder()
        .address_source(source)
        .retry(RetryPolicy::none())
        .build()
}

fn credential() -> Credential {
    Credential::from_private_key(DEV_KEY).unwrap()
}

fn addr(n: u64) -> Address {
    Address::from_low_u64_be(n)
}

// Existing cluster: proxy 0x..10 -> system 0x..11 -> staking 12, reward 13, power 14
fn deployed_chain() -> (MemoryTransport, StaticBootstrap) {
    let chain = MemoryTransport::new();
    chain.set_address_read(addr(0x10), "systemAddress()", addr(0x11));
    chain.set_address_read(addr(0x11), "stakingAddress()", addr(0x12));
    chain.set_address_read(addr(0x11), "rewardAddress()", addr(0x13));
    chain.set_address_read(addr(0x11), "powerAddress()", addr(0x14));
    let bootstrap = StaticBootstrap::new(json!({
        "evm_staking_address": "0x0000000000000000000000000000000000000010"
    }));
    (chain, bootstrap)
}

#[tokio::test]
async fn test_fresh_cluster_deploys_and_wires_everything() {
    let registry = cluster_registry();
    let config = config(AddressSource::Empty);
    let chain = MemoryTransport::new();
    let bootstrap = StaticBootstrap::new(json!({}));

    let mut run = DeploymentRun::new(&config, &registry, &bootstrap, &chain, &chain);
    let outcome = run.run(&credential()).await.unwrap();

    assert_eq!(run.state(), RunState::Done);
    assert_eq!(outcome.plan.len(), 7);
    let kinds: Vec<StepKind> = outcome.plan.iter().map(|step| step.kind).collect();
    assert_eq!(
        kinds,
        vec![
            StepKind::Deploy,
            StepKind::DeployUpgradeable,
            StepKind::Deploy,
            StepKind::Deploy,
            StepKind::AdminSet,
            StepKind::AdminSet,
            StepKind::AdminSet,
        ]
    );
    let wired: Vec<Role> = outcome.plan.iter().filter_map(|step| step.source()).collect();
    assert_eq!(wired, vec![Role::Staking, Role::Power, Role::Reward]);

    assert_eq!(outcome.addresses.len(), 4);
    assert_eq!(outcome.operations.len(), 7);
    assert_eq!(outcome.new_addresses().len(), 4);
    assert!(outcome.plan.is_ordered_for(&AddressSet::new()));

    // five creations (staking needs two) and three admin calls, all to system
    let writes = chain.writes();
    assert_eq!(writes.len(), 8);
    let system = outcome.addresses.get(Role::System).unwrap();
    assert!(writes[5..].iter().all(|write| write.to == Some(system)));
    assert!(writes.iter().all(|write| write.receipt.success));
}

#[tokio::test]
async fn test_halted_run_can_resume_from_partial_state() {
    let registry = cluster_registry();
    let chain = MemoryTransport::new();
    let bootstrap = StaticBootstrap::new(json!({}));
    // system, staking logic, staking proxy, then power (step 3) reverts
    chain.fail_write(4, WriteFailure::Revert);

    let first = config(AddressSource::Empty);
    let mut run = DeploymentRun::new(&first, &registry, &bootstrap, &chain, &chain);
    let err = match run.run(&credential()).await {
        Err(DeployError::Execution(err)) => err,
        other => panic!("expected an execution failure, got {:?}", other.map(|outcome| outcome.plan)),
    };

    assert_eq!(run.state(), RunState::Failed);
    assert_eq!(err.step, 3);
    assert_eq!(err.role, Role::Power);
    assert!(matches!(err.cause, StepFailure::Reverted { .. }));
    assert_eq!(err.addresses.len(), 2);
    assert!(!err.addresses.contains(Role::Reward));
    assert_eq!(run.plan().map(|plan| plan.len()), Some(7));

    // resume from what landed
    let second = config(AddressSource::Static {
        addresses: err.addresses.clone(),
    });
    let mut resumed = DeploymentRun::new(&second, &registry, &bootstrap, &chain, &chain);
    let outcome = resumed.run(&credential()).await.unwrap();

    assert_eq!(outcome.plan.len(), 5);
    assert_eq!(outcome.addresses.len(), 4);
    assert_eq!(outcome.addresses.get(Role::System), err.addresses.get(Role::System));
    assert_eq!(outcome.addresses.get(Role::Staking), err.addresses.get(Role::Staking));
    let fresh: Vec<Role> = outcome.new_addresses().into_iter().map(|(role, _)| role).collect();
    assert_eq!(fresh, vec![Role::Power, Role::Reward]);
}

#[tokio::test]
async fn test_resolved_cluster_is_only_rewired() {
    let registry = cluster_registry();
    let config = config(AddressSource::Resolve);
    let (chain, bootstrap) = deployed_chain();

    let mut run = DeploymentRun::new(&config, &registry, &bootstrap, &chain, &chain);
    let outcome = run.run(&credential()).await.unwrap();

    assert_eq!(outcome.initial.len(), 5);
    assert_eq!(outcome.plan.len(), 3);
    assert!(outcome.plan.iter().all(|step| step.kind == StepKind::AdminSet));
    assert_eq!(outcome.addresses, outcome.initial);
    assert!(outcome.new_addresses().is_empty());
    assert!(chain.writes().iter().all(|write| write.to == Some(addr(0x11))));
}

#[tokio::test]
async fn test_redeploy_replaces_only_flagged_role() {
    let registry = cluster_registry();
    let mut topology = Topology::staking_cluster();
    for spec in topology.roles.iter_mut() {
        spec.redeploy = spec.role == Role::Reward;
    }
    let config = ConfigManager::builder()
        .address_source(AddressSource::Resolve)
        .retry(RetryPolicy::none())
        .topology(topology)
        .build();
    let (chain, bootstrap) = deployed_chain();

    let mut run = DeploymentRun::new(&config, &registry, &bootstrap, &chain, &chain);
    let outcome = run.run(&credential()).await.unwrap();

    assert_eq!(outcome.plan.len(), 4);
    assert_eq!(outcome.plan.steps()[0].role, Role::Reward);
    let fresh = outcome.new_addresses();
    assert_eq!(fresh.len(), 1);
    assert_eq!(fresh[0].0, Role::Reward);
    assert_ne!(fresh[0].1, addr(0x13));
}

#[tokio::test]
async fn test_rehearsal_reads_one_chain_and_writes_another() {
    let registry = cluster_registry();
    let config = config(AddressSource::Resolve);
    let (live, bootstrap) = deployed_chain();
    let rehearsal = MemoryTransport::new();

    let mut run = DeploymentRun::new(&config, &registry, &bootstrap, &live, &rehearsal);
    run.run(&credential()).await.unwrap();

    assert!(live.writes().is_empty());
    assert_eq!(rehearsal.writes().len(), 3);
}

#[tokio::test]
async fn test_unsynchronized_node_fails_resolution() {
    let registry = cluster_registry();
    let config = config(AddressSource::Resolve);
    let chain = MemoryTransport::new();
    let bootstrap = StaticBootstrap::new(json!({ "evm_staking_address": "" }));

    let mut run = DeploymentRun::new(&config, &registry, &bootstrap, &chain, &chain);
    let err = run.run(&credential()).await.unwrap_err();

    assert!(matches!(
        err,
        DeployError::Resolution(ResolutionError::Empty { role: Role::Proxy })
    ));
    assert_eq!(run.state(), RunState::Failed);
    assert!(run.plan().is_none());
    assert!(chain.writes().is_empty());
}

#[tokio::test]
async fn test_missing_artifact_fails_planning() {
    let full = cluster_registry();
    let mut registry = ContractRegistry::new();
    for role in [Role::System, Role::Staking, Role::Reward] {
        registry.register(role, full.lookup(role).unwrap().clone());
    }
    registry.set_upgrade_proxy(full.upgrade_proxy().unwrap().clone());
    let config = config(AddressSource::Empty);
    let chain = MemoryTransport::new();
    let bootstrap = StaticBootstrap::new(json!({}));

    let mut run = DeploymentRun::new(&config, &registry, &bootstrap, &chain, &chain);
    let err = run.run(&credential()).await.unwrap_err();

    assert!(matches!(err, DeployError::UnknownRole(ref role) if role == "power"));
    assert_eq!(run.state(), RunState::Failed);
    assert!(chain.writes().is_empty());
}
