use anyhow::Result;
use colored::Colorize;

use crate::Context;
use crate::config::{Config, Overrides};
use crate::paths;
use crate::ui;

struct Issue {
    category: &'static str,
    summary: String,
    detail: Option<String>,
    fix: Option<String>,
}

struct Tool {
    name: &'static str,
    purpose: &'static str,
    needed_by: &'static str,
}

const TOOLS: &[Tool] = &[
    Tool {
        name: "bash",
        purpose: "Script interpreter",
        needed_by: "shell, helm",
    },
    Tool {
        name: "helm",
        purpose: "Chart installer",
        needed_by: "helm",
    },
    Tool {
        name: "kubectl",
        purpose: "Cluster client",
        needed_by: "helm",
    },
];

pub fn run(ctx: &Context) -> Result<()> {
    ui::header("Deployment Health Check");

    let mut issues: Vec<Issue> = Vec::new();

    check_tools(&mut issues);
    check_config(ctx, &mut issues);
    check_resources();

    println!();
    if issues.is_empty() {
        ui::success("Ready to deploy");
    } else {
        print_issue_summary(&issues);
    }

    Ok(())
}

fn print_issue_summary(issues: &[Issue]) {
    let count = issues.len();
    let label = if count == 1 { "Issue" } else { "Issues" };
    ui::header(&format!("{count} {label} Found"));

    for (i, issue) in issues.iter().enumerate() {
        let num = i + 1;
        println!(
            "  {}  {} {}",
            format!("{num}.").bold(),
            issue.summary,
            format!("[{}]", issue.category).dimmed()
        );
        if let Some(detail) = &issue.detail {
            for line in detail.lines() {
                println!("      {}", line.dimmed());
            }
        }
        if let Some(fix) = &issue.fix {
            println!("      {} {}", "Fix:".cyan(), fix);
        }
        println!();
    }
}

fn check_tools(issues: &mut Vec<Issue>) {
    ui::section("Deployment Tools");

    for tool in TOOLS {
        match which::which(tool.name) {
            Ok(path) => println!(
                "  {} {} - {} {}",
                "✓".green(),
                tool.name,
                tool.purpose.dimmed(),
                path.display().to_string().dimmed()
            ),
            Err(_) => {
                println!(
                    "  {} {} - {} {}",
                    "✗".red(),
                    tool.name,
                    tool.purpose,
                    "(missing)".red()
                );
                issues.push(Issue {
                    category: "Deployment Tools",
                    summary: format!("{} is not installed", tool.name),
                    detail: Some(format!("Needed by strategies: {}", tool.needed_by)),
                    fix: Some(format!("Install {} and make sure it is on PATH", tool.name)),
                });
            }
        }
    }
}

fn check_config(ctx: &Context, issues: &mut Vec<Issue>) {
    ui::section("Configuration");

    let location = match &ctx.config_path {
        Some(p) => Ok(paths::expand(&p.to_string_lossy())),
        None => paths::config_file(),
    };
    match &location {
        Ok(path) if path.exists() => ui::kv("config", &path.display().to_string()),
        Ok(path) => ui::kv("config", &format!("{} (not found, using defaults)", path.display())),
        Err(e) => ui::kv("config", &format!("unknown ({e})")),
    }

    let config = match Config::load(ctx.config_path.as_deref()) {
        Ok(c) => c,
        Err(e) => {
            issues.push(Issue {
                category: "Configuration",
                summary: "Config file could not be loaded".into(),
                detail: Some(format!("{e:#}")),
                fix: Some("Fix the file or pass --config with a valid path".into()),
            });
            return;
        }
    };

    match config.executor(&Overrides::default()) {
        Ok(executor) => {
            ui::kv("timeout", &ui::format_duration(executor.timeout()));
            ui::kv(
                "output limit",
                &ui::format_size(executor.max_output_bytes() as u64),
            );
            ui::kv("interpreter", executor.interpreter().unwrap_or("(direct)"));
        }
        Err(e) => issues.push(Issue {
            category: "Configuration",
            summary: "Invalid [executor] settings".into(),
            detail: Some(format!("{e:#}")),
            fix: None,
        }),
    }

    if let Err(e) = super::build_registry(&config, &Overrides::default()) {
        issues.push(Issue {
            category: "Configuration",
            summary: "Invalid [registry] settings".into(),
            detail: Some(format!("{e:#}")),
            fix: Some("Set [registry] default to one of: shell, helm, none".into()),
        });
    }
}

fn check_resources() {
    ui::section("Bundled Scripts");
    for name in deploykit::Bootstrapper::new().available() {
        println!("  {} {}", "✓".green(), name);
    }
}
