use clap::{Args, Parser, Subcommand};
use clap_complete::Shell;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "gridploy")]
#[command(author = "Alberto Cavalcante")]
#[command(version)]
#[command(about = "Deploy test plans onto provisioned infrastructure", long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Verbosity level
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Config file (default: ~/.config/gridploy/config.toml)
    #[arg(long, global = true, env = "GRIDPLOY_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Deploy one or more test plans onto provisioned infrastructure
    Deploy(DeployArgs),

    /// List registered deployment strategies
    Strategies,

    /// Write a bundled deployment script into a directory
    Bootstrap {
        /// Bundled resource name (e.g. helm-deploy.sh)
        resource: String,

        /// Destination directory
        dir: PathBuf,
    },

    /// Check that deployment tooling is available
    Doctor,

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[derive(Args)]
pub struct DeployArgs {
    /// Strategy to deploy with (default: each plan's script type)
    #[arg(short, long)]
    pub strategy: Option<String>,

    /// Test plan files (TOML or JSON)
    #[arg(short, long = "plan", required = true, num_args = 1..)]
    pub plans: Vec<PathBuf>,

    /// Provisioned infrastructure description (JSON or TOML)
    #[arg(short, long)]
    pub infra: PathBuf,

    /// Number of parallel deployments
    #[arg(short, long, default_value = "4")]
    pub jobs: u16,

    /// Script timeout in seconds (overrides config)
    #[arg(long)]
    pub timeout: Option<u64>,

    /// Output capture limit per stream, e.g. "1MB" (overrides config)
    #[arg(long)]
    pub max_output: Option<String>,

    /// Print results as JSON
    #[arg(long)]
    pub json: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_deploy() {
        let cli = Cli::parse_from([
            "gridploy", "-vv", "deploy", "--strategy", "helm", "--plan", "a.toml", "b.toml",
            "--infra", "infra.json", "--jobs", "2", "--json",
        ]);
        assert_eq!(cli.verbose, 2);
        let Command::Deploy(args) = cli.command else {
            panic!("expected deploy");
        };
        assert_eq!(args.strategy.as_deref(), Some("helm"));
        assert_eq!(args.plans.len(), 2);
        assert_eq!(args.jobs, 2);
        assert!(args.json);
    }

    #[test]
    fn test_deploy_requires_plan() {
        assert!(Cli::try_parse_from(["gridploy", "deploy", "--infra", "i.json"]).is_err());
    }
}
