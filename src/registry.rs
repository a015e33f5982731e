// Contract registry
//
// Maps each role to the compiled contract deployed for it. Units are loaded
// once from Hardhat artifacts and never change during a run.

use crate::error::DeployError;
use common::Role;
use log::debug;
use ethers::abi::{Abi, ParamType, Token};
use ethers::types::Bytes;
use serde::Deserialize;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

/// Hardhat artifact layout (`artifacts/contracts/<Name>.sol/<Name>.json`)
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Artifact {
    #[serde(default)]
    contract_name: Option<String>,
    abi: Abi,
    bytecode: Bytes,
}

/// A compiled contract ready to be instantiated
#[derive(Debug, Clone)]
pub struct DeployableUnit {
    pub name: String,
    pub bytecode: Bytes,
    pub abi: Abi,
}

impl DeployableUnit {
    pub fn new(name: impl Into<String>, bytecode: Bytes, abi: Abi) -> Self {
        Self {
            name: name.into(),
            bytecode,
            abi,
        }
    }

    /// Load a Hardhat artifact file
    pub fn from_artifact<P: AsRef<Path>>(path: P) -> Result<Self, DeployError> {
        let path = path.as_ref();
        let artifact_error = |detail: String| DeployError::Artifact {
            name: path.display().to_string(),
            detail,
        };

        let raw = fs::read_to_string(path).map_err(|e| artifact_error(e.to_string()))?;
        let artifact: Artifact = serde_json::from_str(&raw).map_err(|e| artifact_error(e.to_string()))?;
        if artifact.bytecode.is_empty() {
            return Err(artifact_error("no bytecode (abstract contract or interface?)".to_string()));
        }

        let name = artifact.contract_name.unwrap_or_else(|| {
            path.file_stem()
                .map(|stem| stem.to_string_lossy().into_owned())
                .unwrap_or_default()
        });
        Ok(Self::new(name, artifact.bytecode, artifact.abi))
    }

    /// Ordered constructor parameters; empty when the contract declares none
    pub fn constructor_schema(&self) -> Vec<ParamType> {
        self.abi
            .constructor()
            .map(|constructor| constructor.inputs.iter().map(|param| param.kind.clone()).collect())
            .unwrap_or_default()
    }

    /// Parameters of `initialize`, for units deployed behind an upgrade proxy
    pub fn initializer_schema(&self) -> Option<Vec<ParamType>> {
        self.abi
            .function("initialize")
            .ok()
            .map(|function| function.inputs.iter().map(|param| param.kind.clone()).collect())
    }

    /// Creation code with ABI-encoded constructor arguments appended
    pub fn encode_constructor(&self, tokens: &[Token]) -> Result<Bytes, String> {
        check_schema(&self.name, "constructor", &self.constructor_schema(), tokens)?;
        match self.abi.constructor() {
            Some(constructor) => constructor
                .encode_input(self.bytecode.to_vec(), tokens)
                .map(Bytes::from)
                .map_err(|e| format!("{} constructor: {}", self.name, e)),
            None => Ok(self.bytecode.clone()),
        }
    }

    /// Calldata for `initialize(tokens)`. Empty when there is no
    /// initializer and nothing to pass.
    pub fn encode_initializer(&self, tokens: &[Token]) -> Result<Bytes, String> {
        match self.abi.function("initialize") {
            Ok(function) => {
                let schema: Vec<ParamType> = function.inputs.iter().map(|param| param.kind.clone()).collect();
                check_schema(&self.name, "initialize", &schema, tokens)?;
                function
                    .encode_input(tokens)
                    .map(Bytes::from)
                    .map_err(|e| format!("{}.initialize: {}", self.name, e))
            }
            Err(_) if tokens.is_empty() => Ok(Bytes::default()),
            Err(_) => Err(format!(
                "{} has no initialize function but {} argument(s) were given",
                self.name,
                tokens.len()
            )),
        }
    }
}

fn check_schema(name: &str, what: &str, schema: &[ParamType], tokens: &[Token]) -> Result<(), String> {
    if schema.len() != tokens.len() {
        return Err(format!(
            "{} {} takes {} argument(s), got {}",
            name,
            what,
            schema.len(),
            tokens.len()
        ));
    }
    for (index, (kind, token)) in schema.iter().zip(tokens).enumerate() {
        if !token.type_check(kind) {
            return Err(format!(
                "{} {} argument {} must be {}, got {:?}",
                name, what, index, kind, token
            ));
        }
    }
    Ok(())
}

/// Role -> deployable unit lookup table
#[derive(Debug, Clone, Default)]
pub struct ContractRegistry {
    units: HashMap<Role, DeployableUnit>,
    upgrade_proxy: Option<DeployableUnit>,
}

impl ContractRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, role: Role, unit: DeployableUnit) {
        self.units.insert(role, unit);
    }

    /// Proxy contract placed in front of upgradeable units
    pub fn set_upgrade_proxy(&mut self, unit: DeployableUnit) {
        self.upgrade_proxy = Some(unit);
    }

    pub fn lookup(&self, role: Role) -> Result<&DeployableUnit, DeployError> {
        self.units
            .get(&role)
            .ok_or_else(|| DeployError::UnknownRole(role.to_string()))
    }

    pub fn contains(&self, role: Role) -> bool {
        self.units.contains_key(&role)
    }

    pub fn upgrade_proxy(&self) -> Result<&DeployableUnit, DeployError> {
        self.upgrade_proxy.as_ref().ok_or_else(|| DeployError::Artifact {
            name: "upgrade proxy".to_string(),
            detail: "no upgrade proxy artifact loaded".to_string(),
        })
    }

    /// Load the artifacts found for `roles` in a Hardhat artifacts directory,
    /// plus the upgrade proxy when a path for it is given. Roles without an
    /// artifact stay unregistered.
    pub fn from_artifacts<P: AsRef<Path>>(
        dir: P,
        roles: &[Role],
        upgrade_proxy: Option<&Path>,
    ) -> Result<Self, DeployError> {
        let dir = dir.as_ref();
        let mut registry = Self::new();

        for role in roles {
            let path = artifact_path(dir, role.contract_name());
            if !path.is_file() {
                // Only an error if the planner ends up needing to deploy it
                debug!("no artifact for {} at {}", role, path.display());
                continue;
            }
            registry.register(*role, DeployableUnit::from_artifact(&path)?);
        }
        if let Some(relative) = upgrade_proxy {
            registry.set_upgrade_proxy(DeployableUnit::from_artifact(dir.join(relative))?);
        }

        Ok(registry)
    }
}

/// First existing candidate among the usual artifact layouts
fn artifact_path(dir: &Path, name: &str) -> PathBuf {
    let candidates = [
        dir.join("contracts").join(format!("{}.sol", name)).join(format!("{}.json", name)),
        dir.join(format!("{}.sol", name)).join(format!("{}.json", name)),
        dir.join(format!("{}.json", name)),
    ];
    candidates
        .iter()
        .find(|candidate| candidate.is_file())
        .cloned()
        .unwrap_or_else(|| candidates[0].clone())
}
