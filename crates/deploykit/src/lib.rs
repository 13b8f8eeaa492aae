//! # deploykit
//!
//! Deployment layer of a test-grid runner: takes infrastructure that is
//! already provisioned and deploys the system under test onto it.
//!
//! This crate provides:
//! - A [`Bootstrapper`] that materializes bundled scripts onto disk atomically
//! - A [`ScriptExecutor`] that runs scripts with a timeout and bounded output
//! - A [`DeployerRegistry`] mapping strategy names to [`Deployer`]s
//! - Built-in `shell`, `helm` and `none` deployers
//!
//! ## Example
//!
//! ```no_run
//! use deploykit::{
//!     Bootstrapper, DeployerRegistry, DeploymentScript, ExitPolicy,
//!     InfrastructureProvisionResult, ScriptExecutor, TestPlanContext,
//! };
//!
//! let registry = DeployerRegistry::standard(
//!     ScriptExecutor::new(),
//!     ExitPolicy::strict(),
//!     Bootstrapper::new(),
//! );
//!
//! let plan = TestPlanContext::new("run1", "/tmp/run1");
//! let infra = InfrastructureProvisionResult::new("cluster", "kubernetes")
//!     .with_output("kube-config", "/tmp/kubeconfig");
//!
//! let deployer = registry.resolve("helm").expect("strategy registered");
//! let result = deployer
//!     .deploy(&plan, &infra, &DeploymentScript::helm("charts"))
//!     .expect("deployment ran");
//! println!("endpoint: {:?}", result.output("endpoint"));
//! ```
//!
//! ## Failure stages
//!
//! A script that runs and exits non-zero produces a result with
//! `success == false`. Errors are reserved for deployments that could not be
//! carried out; [`DeploymentError::stage`] tells staging problems apart from
//! script problems and missing outputs.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod deployers;
pub mod error;
pub mod executor;
pub mod outputs;
pub mod registry;
pub mod resource;
pub mod types;

pub use deployers::helm::HelmDeployer;
pub use deployers::noop::NoopDeployer;
pub use deployers::shell::ShellDeployer;
pub use deployers::{Deployer, ExitPolicy, ExitVerdict};
pub use error::{
    BootstrapError, DeploymentError, ErrorStage, ExecutionError, Result, UnknownStrategyError,
};
pub use executor::{Invocation, ScriptExecutor};
pub use registry::{DeployerRegistry, DeployerRegistryBuilder};
pub use resource::{Bootstrapper, EmbeddedSource, MaterializedResource, MemorySource, ResourceSource};
pub use types::{
    DeploymentCreationResult, DeploymentScript, InfrastructureProvisionResult, ProcessOutcome,
    ScriptType, TestPlanContext,
};
