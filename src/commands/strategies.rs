use anyhow::Result;
use colored::Colorize;
use deploykit::DeployerRegistry;

use crate::Context;
use crate::config::Overrides;
use crate::ui;

fn describe(name: &str) -> &'static str {
    match name {
        "shell" => "run a script from the deployment repository",
        "helm" => "install the repository's charts with the bundled helm script",
        "none" => "nothing to deploy; infrastructure is ready as provisioned",
        _ => "",
    }
}

pub fn run(ctx: &Context) -> Result<()> {
    let config = super::load_config(ctx)?;
    let registry = super::build_registry(&config, &Overrides::default())?;
    print_strategies(&registry);
    Ok(())
}

fn print_strategies(registry: &DeployerRegistry) {
    ui::header("Deployment Strategies");

    let default = registry.default_strategy();
    for name in registry.names() {
        let marker = if default == Some(name.as_str()) {
            " (default)".green().to_string()
        } else {
            String::new()
        };
        println!("  {}{}  {}", name.bold(), marker, describe(&name).dimmed());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_standard_strategy_is_described() {
        let registry = DeployerRegistry::standard(
            deploykit::ScriptExecutor::new(),
            deploykit::ExitPolicy::strict(),
            deploykit::Bootstrapper::new(),
        );
        for name in registry.names() {
            assert!(!describe(&name).is_empty(), "{name} has no description");
        }
    }
}
