//! Deployer implementations.
//!
//! The [`Deployer`] trait is the only interface the test execution engine
//! depends on. Each backend implements it:
//!
//! - [`shell::ShellDeployer`] - runs a script from the deployment repository
//! - [`helm::HelmDeployer`] - stages the bundled helm script, then runs it
//! - [`noop::NoopDeployer`] - for infrastructure that deploys itself

pub mod helm;
pub mod noop;
pub mod shell;

use crate::error::Result;
use crate::types::{DeploymentCreationResult, DeploymentScript, InfrastructureProvisionResult, TestPlanContext};
use std::collections::BTreeSet;

/// A pluggable deployment strategy.
pub trait Deployer: Send + Sync {
    /// Strategy name this deployer is registered under.
    fn name(&self) -> &str;

    /// Deploy onto already provisioned infrastructure.
    ///
    /// A script that runs and exits unsuccessfully yields `Ok` with
    /// `success == false`; `Err` means the deployment could not be carried
    /// out or its outputs could not be read.
    fn deploy(
        &self,
        plan: &TestPlanContext,
        infrastructure: &InfrastructureProvisionResult,
        script: &DeploymentScript,
    ) -> Result<DeploymentCreationResult>;
}

/// How script exit codes map to deployment success.
///
/// Exit code 0 is success. Codes listed as warnings also count as success
/// but are recorded in the result's warnings. Every other code, and
/// termination by a signal, is a failure.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExitPolicy {
    warning_codes: BTreeSet<i32>,
}

/// Verdict of an [`ExitPolicy`] for one exit status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitVerdict {
    /// Clean exit
    Success,
    /// Non-zero exit that is reserved for warnings
    Warning(i32),
    /// Failed exit code, or `None` when killed by a signal
    Failure(Option<i32>),
}

impl ExitPolicy {
    /// Treat only exit code 0 as success.
    pub fn strict() -> Self {
        Self::default()
    }

    /// Reserve `codes` as success-with-warning.
    pub fn with_warning_codes(codes: impl IntoIterator<Item = i32>) -> Self {
        Self {
            warning_codes: codes.into_iter().filter(|c| *c != 0).collect(),
        }
    }

    /// Classify an exit code.
    pub fn classify(&self, exit_code: Option<i32>) -> ExitVerdict {
        match exit_code {
            Some(0) => ExitVerdict::Success,
            Some(code) if self.warning_codes.contains(&code) => ExitVerdict::Warning(code),
            other => ExitVerdict::Failure(other),
        }
    }
}
