pub mod config;
pub mod contracts;
pub mod error;
pub mod orchestrator;
pub mod planner;
pub mod registry;
pub mod report;
pub mod resolver;
pub mod run;
pub mod transport;

pub use config::{AddressSource, ConfigManager, DeployConfig};
pub use error::{DeployError, ExecutionError, ResolutionError, StepFailure, TransportError};
pub use orchestrator::{Execution, OperationRecord, Orchestrator};
pub use planner::{Planner, RoleSpec, Topology, WiringEdge};
pub use registry::{ContractRegistry, DeployableUnit};
pub use report::DeploymentReport;
pub use resolver::{AddressResolver, RetryPolicy};
pub use run::{DeploymentRun, RunOutcome, RunState};
pub use transport::{Credential, Transport};
