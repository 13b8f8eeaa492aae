pub mod bootstrap;
pub mod deploy;
pub mod doctor;
pub mod strategies;

use anyhow::{Context as _, Result};
use deploykit::{Bootstrapper, DeployerRegistry};

use crate::Context;
use crate::config::{Config, Overrides};

/// Load the config selected on the command line.
pub fn load_config(ctx: &Context) -> Result<Config> {
    Config::load(ctx.config_path.as_deref())
}

/// Build the deployer registry from config and command-line overrides.
pub fn build_registry(config: &Config, overrides: &Overrides) -> Result<DeployerRegistry> {
    let builder = DeployerRegistry::builder().with_standard(
        config.executor(overrides)?,
        config.exit_policy(),
        Bootstrapper::new(),
    );

    let builder = match &config.registry.default {
        Some(name) => builder
            .default_strategy(name)
            .context("Invalid [registry] default in config")?,
        None => builder,
    };

    Ok(builder.build())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_registry_with_default() {
        let mut config = Config::default();
        config.registry.default = Some("none".to_string());

        let registry = build_registry(&config, &Overrides::default()).unwrap();
        assert_eq!(registry.names(), vec!["helm", "none", "shell"]);
        assert_eq!(registry.resolve("terraform").unwrap().name(), "none");
    }

    #[test]
    fn test_build_registry_rejects_unknown_default() {
        let mut config = Config::default();
        config.registry.default = Some("ansible".to_string());

        let err = build_registry(&config, &Overrides::default()).unwrap_err();
        assert!(format!("{err:#}").contains("ansible"));
    }
}
