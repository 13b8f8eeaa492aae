//! Deployer for infrastructure that needs no deployment step.

use super::Deployer;
use crate::error::Result;
use crate::types::{
    DeploymentCreationResult, DeploymentScript, InfrastructureProvisionResult, TestPlanContext,
};

/// Strategy name of the no-op deployer.
pub const NONE: &str = "none";

/// Deployer that does nothing and always succeeds.
///
/// Used when provisioning already brought up everything the tests need.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopDeployer;

impl Deployer for NoopDeployer {
    fn name(&self) -> &str {
        NONE
    }

    fn deploy(
        &self,
        plan: &TestPlanContext,
        _infrastructure: &InfrastructureProvisionResult,
        _script: &DeploymentScript,
    ) -> Result<DeploymentCreationResult> {
        log::debug!("Test plan {} needs no deployment", plan.id);
        Ok(DeploymentCreationResult::empty(NONE))
    }
}
