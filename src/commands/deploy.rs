use anyhow::{Context as _, Result, bail};
use colored::Colorize;
use deploykit::{
    Deployer, DeployerRegistry, DeploymentCreationResult, DeploymentError, ErrorStage,
    InfrastructureProvisionResult,
};
use rayon::prelude::*;
use serde::Serialize;

use crate::Context;
use crate::cli::DeployArgs;
use crate::config::Overrides;
use crate::plan::{self, PlanFile};
use crate::progress;
use crate::ui;

/// Outcome of deploying one plan
#[derive(Debug, Serialize)]
struct Report {
    plan: String,
    source: String,
    strategy: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    result: Option<DeploymentCreationResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<ErrorReport>,
}

#[derive(Debug, Serialize)]
struct ErrorReport {
    stage: String,
    message: String,
    #[serde(skip)]
    kind: ErrorStage,
}

impl Report {
    fn succeeded(&self) -> bool {
        self.result.as_ref().is_some_and(|r| r.success)
    }
}

pub fn run(ctx: &Context, args: &DeployArgs) -> Result<()> {
    let config = super::load_config(ctx)?;
    let overrides = Overrides {
        timeout_secs: args.timeout,
        max_output: args.max_output.clone(),
    };
    let registry = super::build_registry(&config, &overrides)?;

    let infra = plan::load_infrastructure(&args.infra)?;
    let plans = args
        .plans
        .iter()
        .map(|p| PlanFile::load(p))
        .collect::<Result<Vec<_>>>()?;

    let quiet = ctx.quiet || args.json;
    let reports = deploy_all(
        &registry,
        args.strategy.as_deref(),
        &plans,
        &infra,
        args.jobs as usize,
        quiet,
    )?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&reports)?);
    } else {
        print_reports(ctx, &reports);
    }

    let failed = reports.iter().filter(|r| !r.succeeded()).count();
    if failed > 0 {
        bail!("{failed} deployment(s) failed");
    }
    Ok(())
}

/// Resolve every plan's deployer, then deploy all plans on a bounded pool.
///
/// Strategies are resolved before anything runs, so a typo fails fast.
fn deploy_all(
    registry: &DeployerRegistry,
    strategy: Option<&str>,
    plans: &[PlanFile],
    infra: &InfrastructureProvisionResult,
    jobs: usize,
    quiet: bool,
) -> Result<Vec<Report>> {
    let resolved = plans
        .iter()
        .map(|p| {
            let name = strategy.unwrap_or_else(|| p.strategy());
            match registry.resolve(name) {
                Ok(deployer) => Ok((p, name, deployer)),
                Err(e) => {
                    ui::error(&e.to_string());
                    ui::stage_hint(e.stage());
                    Err(e).with_context(|| format!("Cannot deploy {}", p.source.display()))
                }
            }
        })
        .collect::<Result<Vec<(&PlanFile, &str, &dyn Deployer)>>>()?;

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(jobs.max(1))
        .build()
        .context("Failed to create deploy thread pool")?;

    let pb = progress::deploy_bar(resolved.len() as u64, quiet);

    let reports = pool.install(|| {
        resolved
            .par_iter()
            .map(|(plan_file, name, deployer)| {
                let outcome = deployer.deploy(&plan_file.plan, infra, &plan_file.script);

                let symbol = match &outcome {
                    Ok(r) if r.success => "✓",
                    _ => "✗",
                };
                pb.set_message(format!("{} {}", symbol, plan_file.plan.id));
                pb.inc(1);

                report(plan_file, name, outcome)
            })
            .collect::<Vec<_>>()
    });

    pb.finish_and_clear();
    Ok(reports)
}

fn report(
    plan_file: &PlanFile,
    strategy: &str,
    outcome: std::result::Result<DeploymentCreationResult, DeploymentError>,
) -> Report {
    let (result, error) = match outcome {
        Ok(result) => (Some(result), None),
        Err(e) => {
            let stage = e.stage();
            (
                None,
                Some(ErrorReport {
                    stage: stage.as_str().to_string(),
                    message: e.to_string(),
                    kind: stage,
                }),
            )
        }
    };

    Report {
        plan: plan_file.plan.id.clone(),
        source: plan_file.source.display().to_string(),
        strategy: strategy.to_string(),
        result,
        error,
    }
}

fn print_reports(ctx: &Context, reports: &[Report]) {
    ui::header("Deployments");

    for report in reports {
        let label = format!("{} ({})", report.plan, report.strategy);
        match (&report.result, &report.error) {
            (Some(result), _) if result.success => {
                let duration = ui::format_duration(result.duration);
                if result.warnings.is_empty() {
                    ui::success(&format!("{label} {}", duration.dimmed()));
                } else {
                    ui::warn(&format!("{label} {}", duration.dimmed()));
                    for warning in &result.warnings {
                        ui::dim(warning);
                    }
                }
                for (key, value) in &result.outputs {
                    ui::kv(key, value);
                }
            }
            (Some(result), _) => {
                ui::error(&label);
                for line in result.message.lines() {
                    ui::dim(line);
                }
                if ctx.verbose > 0 {
                    for (key, value) in &result.outputs {
                        ui::kv(key, value);
                    }
                }
            }
            (None, Some(error)) => {
                ui::error(&format!("{label}: {}", error.message));
                ui::stage_hint(error.kind);
            }
            (None, None) => {}
        }
    }

    let total = reports.len();
    let succeeded = reports.iter().filter(|r| r.succeeded()).count();
    println!();
    if succeeded == total {
        ui::success(&format!("{succeeded}/{total} deployed"));
    } else {
        println!(
            "{} {}/{} deployed, {} failed",
            "✗".red(),
            succeeded,
            total,
            (total - succeeded).to_string().red()
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use deploykit::{
        Bootstrapper, DeploymentScript, ExitPolicy, ScriptExecutor, TestPlanContext,
    };
    use std::fs;
    use std::path::{Path, PathBuf};
    use tempfile::tempdir;

    fn registry() -> DeployerRegistry {
        DeployerRegistry::standard(
            ScriptExecutor::new(),
            ExitPolicy::strict(),
            Bootstrapper::new(),
        )
    }

    fn plan_file(id: &str, root: &Path, script: DeploymentScript) -> PlanFile {
        PlanFile {
            source: PathBuf::from(format!("{id}.toml")),
            plan: TestPlanContext::new(id, root),
            script,
        }
    }

    #[test]
    fn test_unknown_strategy_fails_before_deploying() {
        let dir = tempdir().unwrap();
        let plans = vec![plan_file("p1", dir.path(), DeploymentScript::default())];

        let err = deploy_all(
            &registry(),
            Some("terraform"),
            &plans,
            &InfrastructureProvisionResult::default(),
            2,
            true,
        )
        .unwrap_err();

        assert!(format!("{err:#}").contains("terraform"));
    }

    #[test]
    fn test_none_strategy_reports_success() {
        let dir = tempdir().unwrap();
        let plans = vec![
            plan_file("p1", dir.path(), DeploymentScript::default()),
            plan_file("p2", dir.path(), DeploymentScript::default()),
        ];

        let reports = deploy_all(
            &registry(),
            Some("none"),
            &plans,
            &InfrastructureProvisionResult::default(),
            2,
            true,
        )
        .unwrap();

        assert_eq!(reports.len(), 2);
        assert!(reports.iter().all(Report::succeeded));
        assert_eq!(reports[0].plan, "p1");
        assert_eq!(reports[1].plan, "p2");
    }

    #[cfg(unix)]
    #[test]
    fn test_mixed_results_keep_plan_order() {
        let dir = tempdir().unwrap();
        let ok = dir.path().join("ok");
        let bad = dir.path().join("bad");
        fs::create_dir_all(&ok).unwrap();
        fs::create_dir_all(&bad).unwrap();
        fs::write(ok.join("deploy.sh"), "echo ENDPOINT=http://ok\n").unwrap();
        fs::write(bad.join("deploy.sh"), "exit 3\n").unwrap();

        let plans = vec![
            plan_file("ok", &ok, DeploymentScript::shell("deploy.sh")),
            plan_file("bad", &bad, DeploymentScript::shell("deploy.sh")),
            plan_file(
                "missing",
                dir.path(),
                DeploymentScript::shell("nope.sh"),
            ),
        ];

        let reports = deploy_all(
            &registry(),
            None,
            &plans,
            &InfrastructureProvisionResult::default(),
            3,
            true,
        )
        .unwrap();

        assert!(reports[0].succeeded());
        assert_eq!(
            reports[0].result.as_ref().unwrap().output("endpoint"),
            Some("http://ok")
        );

        let bad = reports[1].result.as_ref().unwrap();
        assert!(!bad.success);
        assert_eq!(bad.exit_code, Some(3));

        let error = reports[2].error.as_ref().unwrap();
        assert_eq!(error.kind, ErrorStage::Execution);
        assert_eq!(error.stage, "execution");

        let json = serde_json::to_value(&reports).unwrap();
        assert_eq!(json[2]["error"]["stage"], "execution");
        assert!(json[2].get("result").is_none());
    }
}
