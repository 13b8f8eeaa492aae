//! Helm deployer.
//!
//! Stages the bundled `helm-deploy.sh` into the deployment repository and
//! runs it the same way the shell deployer runs repository scripts.

use super::Deployer;
use super::shell::ShellDeployer;
use crate::error::Result;
use crate::resource::{Bootstrapper, HELM_DEPLOY_SCRIPT};
use crate::types::{
    DeploymentCreationResult, DeploymentScript, InfrastructureProvisionResult, TestPlanContext,
};

/// Strategy name of the helm deployer.
pub const HELM: &str = "helm";

/// Deployer that installs the charts of a deployment repository with helm.
#[derive(Debug, Clone, Default)]
pub struct HelmDeployer {
    bootstrapper: Bootstrapper,
    shell: ShellDeployer,
}

impl HelmDeployer {
    /// Create a helm deployer.
    pub fn new(bootstrapper: Bootstrapper, shell: ShellDeployer) -> Self {
        Self {
            bootstrapper,
            shell,
        }
    }
}

impl Deployer for HelmDeployer {
    fn name(&self) -> &str {
        HELM
    }

    fn deploy(
        &self,
        plan: &TestPlanContext,
        infrastructure: &InfrastructureProvisionResult,
        script: &DeploymentScript,
    ) -> Result<DeploymentCreationResult> {
        let staged = self
            .bootstrapper
            .materialize(HELM_DEPLOY_SCRIPT, &plan.deployment_repository)?;
        log::debug!(
            "Staged {} for test plan {}",
            staged.path.display(),
            plan.id
        );

        self.shell
            .run_script(HELM, plan, infrastructure, &staged.path, script)
    }
}
