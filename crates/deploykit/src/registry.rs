//! Strategy name to deployer dispatch.

use crate::deployers::Deployer;
use crate::deployers::helm::HelmDeployer;
use crate::deployers::noop::NoopDeployer;
use crate::deployers::shell::ShellDeployer;
use crate::deployers::ExitPolicy;
use crate::error::UnknownStrategyError;
use crate::executor::ScriptExecutor;
use crate::resource::Bootstrapper;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Sentinel key `resolve` falls back to for unknown names, when registered.
pub const DEFAULT_KEY: &str = "default";

/// Immutable map from strategy name to deployer.
///
/// Built once through [`DeployerRegistry::builder`] and then shared by
/// reference; lookups need no locking.
#[derive(Clone)]
pub struct DeployerRegistry {
    deployers: HashMap<String, Arc<dyn Deployer>>,
}

impl DeployerRegistry {
    /// Start building a registry.
    pub fn builder() -> DeployerRegistryBuilder {
        DeployerRegistryBuilder::default()
    }

    /// Registry with the built-in `shell`, `helm` and `none` deployers.
    pub fn standard(executor: ScriptExecutor, policy: ExitPolicy, bootstrapper: Bootstrapper) -> Self {
        Self::builder()
            .with_standard(executor, policy, bootstrapper)
            .build()
    }

    /// Look up the deployer for a strategy name.
    ///
    /// Matching is exact and case-sensitive. Unknown names resolve to the
    /// deployer registered under [`DEFAULT_KEY`], if any.
    ///
    /// # Errors
    ///
    /// `UnknownStrategyError` if nothing is registered under `name` and no
    /// default exists.
    pub fn resolve(&self, name: &str) -> Result<&dyn Deployer, UnknownStrategyError> {
        if let Some(deployer) = self.deployers.get(name) {
            return Ok(deployer.as_ref());
        }
        if let Some(deployer) = self.deployers.get(DEFAULT_KEY) {
            log::debug!(
                "No deployer named '{}', using default ({})",
                name,
                deployer.name()
            );
            return Ok(deployer.as_ref());
        }
        Err(UnknownStrategyError {
            name: name.to_string(),
            available: self.names(),
        })
    }

    /// Registered strategy names, sorted, without the default sentinel.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .deployers
            .keys()
            .filter(|k| *k != DEFAULT_KEY)
            .cloned()
            .collect();
        names.sort();
        names
    }

    /// Name of the deployer registered as the default, if any.
    pub fn default_strategy(&self) -> Option<&str> {
        self.deployers.get(DEFAULT_KEY).map(|d| d.name())
    }

    /// Whether a deployer is registered under exactly this name.
    pub fn contains(&self, name: &str) -> bool {
        self.deployers.contains_key(name)
    }
}

impl fmt::Debug for DeployerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeployerRegistry")
            .field("strategies", &self.names())
            .field("default", &self.default_strategy())
            .finish()
    }
}

/// Builder for [`DeployerRegistry`].
#[derive(Default)]
pub struct DeployerRegistryBuilder {
    deployers: HashMap<String, Arc<dyn Deployer>>,
}

impl DeployerRegistryBuilder {
    /// Register a deployer under its own name, replacing any previous one.
    pub fn register(self, deployer: impl Deployer + 'static) -> Self {
        let key = deployer.name().to_string();
        self.register_as(key, deployer)
    }

    /// Register a deployer under an explicit key.
    pub fn register_as(mut self, key: impl Into<String>, deployer: impl Deployer + 'static) -> Self {
        let key = key.into();
        if self.deployers.insert(key.clone(), Arc::new(deployer)).is_some() {
            log::warn!("Replacing deployer registered as '{key}'");
        }
        self
    }

    /// Register the built-in `shell`, `helm` and `none` deployers.
    pub fn with_standard(
        self,
        executor: ScriptExecutor,
        policy: ExitPolicy,
        bootstrapper: Bootstrapper,
    ) -> Self {
        let shell = ShellDeployer::new(executor, policy);
        self.register(HelmDeployer::new(bootstrapper, shell.clone()))
            .register(shell)
            .register(NoopDeployer)
    }

    /// Also register the already registered strategy `name` under [`DEFAULT_KEY`].
    ///
    /// # Errors
    ///
    /// `UnknownStrategyError` if `name` has not been registered yet.
    pub fn default_strategy(mut self, name: &str) -> Result<Self, UnknownStrategyError> {
        let Some(deployer) = self.deployers.get(name).cloned() else {
            let mut available: Vec<String> = self.deployers.keys().cloned().collect();
            available.sort();
            return Err(UnknownStrategyError {
                name: name.to_string(),
                available,
            });
        };
        self.deployers.insert(DEFAULT_KEY.to_string(), deployer);
        Ok(self)
    }

    /// Finish building.
    pub fn build(self) -> DeployerRegistry {
        DeployerRegistry {
            deployers: self.deployers,
        }
    }
}
