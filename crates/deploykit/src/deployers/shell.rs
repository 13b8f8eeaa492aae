//! Shell script deployer.
//!
//! Runs a script from the test plan's deployment repository. Infrastructure
//! outputs are handed to the script through `infrastructure.properties` and
//! environment variables; the script reports back through `KEY=VALUE` lines
//! on stdout and an optional `deployment.properties` file.

use super::{Deployer, ExitPolicy, ExitVerdict};
use crate::error::{ExecutionError, Result};
use crate::executor::{Invocation, ScriptExecutor};
use crate::outputs;
use crate::resource::{validate_relative, write_atomic};
use crate::types::{
    DeploymentCreationResult, DeploymentScript, InfrastructureProvisionResult, TestPlanContext,
};
use chrono::Utc;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Strategy name of the shell deployer.
pub const SHELL: &str = "shell";

/// Lines of stderr quoted in failure messages.
const STDERR_TAIL_LINES: usize = 20;

/// Deployer that runs a script from the deployment repository.
#[derive(Debug, Clone, Default)]
pub struct ShellDeployer {
    executor: ScriptExecutor,
    policy: ExitPolicy,
}

impl ShellDeployer {
    /// Create a shell deployer.
    pub fn new(executor: ScriptExecutor, policy: ExitPolicy) -> Self {
        Self { executor, policy }
    }

    /// Locate the script under the deployment repository, writing inline
    /// content first when the script carries it.
    fn resolve_script(&self, plan: &TestPlanContext, script: &DeploymentScript) -> Result<PathBuf> {
        let relative = validate_relative(&script.file).map_err(|e| {
            ExecutionError::launch(format!("script '{}'", script.file), e)
        })?;
        let path = plan.deployment_repository.join(relative);

        if let Some(content) = &script.inline {
            write_atomic(&path, content.as_bytes(), true)?;
            log::debug!("Wrote inline script {}", path.display());
        } else if !path.is_file() {
            return Err(ExecutionError::launch(
                path.display().to_string(),
                io::Error::new(io::ErrorKind::NotFound, "deployment script not found"),
            )
            .into());
        }

        Ok(path)
    }

    /// Run `script_path` for `plan` and translate the outcome into a result
    /// attributed to `deployer`.
    pub(crate) fn run_script(
        &self,
        deployer: &str,
        plan: &TestPlanContext,
        infrastructure: &InfrastructureProvisionResult,
        script_path: &Path,
        script: &DeploymentScript,
    ) -> Result<DeploymentCreationResult> {
        let workspace = plan.workspace_dir();
        prepare_workspace(workspace, infrastructure)?;

        let workspace_arg = std::path::absolute(workspace)
            .unwrap_or_else(|_| workspace.to_path_buf())
            .display()
            .to_string();
        let mut invocation = Invocation::new(script_path, &plan.deployment_repository)
            .args(["--input-dir", workspace_arg.as_str(), "--output-dir", workspace_arg.as_str()])
            .args(script.args.iter().cloned())
            .env("GRIDPLOY_TEST_PLAN_ID", &plan.id)
            .env("GRIDPLOY_INFRA_PROVIDER", &infrastructure.provider)
            .env(
                "GRIDPLOY_DEPLOYMENT_REPOSITORY",
                plan.deployment_repository.display().to_string(),
            );
        for (key, value) in &infrastructure.outputs {
            invocation = invocation.env(outputs::env_key(key), value);
        }

        log::info!(
            "Deploying test plan {} with {} ({})",
            plan.id,
            deployer,
            script_path.display()
        );
        let outcome = self.executor.execute(&invocation)?;

        let mut warnings = Vec::new();
        let reported = if outcome.stdout_truncated {
            warnings.push("stdout exceeded the capture limit and was truncated".to_string());
            complete_lines(&outcome.stdout)
        } else {
            outcome.stdout.as_str()
        };

        let mut result = DeploymentCreationResult {
            deployer: deployer.to_string(),
            success: false,
            message: String::new(),
            outputs: outputs::parse_stdout(reported),
            exit_code: outcome.exit_code,
            duration: outcome.duration,
            warnings,
            completed_at: Utc::now(),
        };

        match self.policy.classify(outcome.exit_code) {
            ExitVerdict::Failure(code) => {
                let status = code.map_or_else(
                    || "was terminated by a signal".to_string(),
                    |c| format!("exited with code {c}"),
                );
                let tail = outcome.stderr_tail(STDERR_TAIL_LINES);
                result.message = if tail.is_empty() {
                    format!("Deployment script {status}")
                } else {
                    format!("Deployment script {status}:\n{tail}")
                };
                log::warn!("Test plan {}: {}", plan.id, result.message);
                return Ok(result);
            }
            ExitVerdict::Warning(code) => {
                result
                    .warnings
                    .push(format!("deployment script exited with warning code {code}"));
            }
            ExitVerdict::Success => {}
        }

        if let Some(props) = outputs::read_deployment_properties(workspace)? {
            result.outputs.extend(props);
        }
        outputs::check_required(&result.outputs, &script.required_outputs)?;

        result.success = true;
        result.message = format!(
            "Deployed with {} in {:.1}s",
            deployer,
            outcome.duration.as_secs_f64()
        );
        log::info!("Test plan {}: {}", plan.id, result.message);
        Ok(result)
    }
}

impl Deployer for ShellDeployer {
    fn name(&self) -> &str {
        SHELL
    }

    fn deploy(
        &self,
        plan: &TestPlanContext,
        infrastructure: &InfrastructureProvisionResult,
        script: &DeploymentScript,
    ) -> Result<DeploymentCreationResult> {
        let path = self.resolve_script(plan, script)?;
        self.run_script(SHELL, plan, infrastructure, &path, script)
    }
}

/// The part of `stdout` up to its last newline. A line cut off by the
/// capture limit is not a complete output.
fn complete_lines(stdout: &str) -> &str {
    stdout.rfind('\n').map_or("", |end| &stdout[..=end])
}

/// Write infrastructure inputs and clear outputs left over from an earlier run.
fn prepare_workspace(
    workspace: &Path,
    infrastructure: &InfrastructureProvisionResult,
) -> Result<()> {
    write_atomic(
        &workspace.join(outputs::INFRASTRUCTURE_PROPERTIES),
        outputs::render_properties(&infrastructure.outputs).as_bytes(),
        false,
    )?;

    let stale = workspace.join(outputs::DEPLOYMENT_PROPERTIES);
    match fs::remove_file(&stale) {
        Ok(()) => log::debug!("Removed stale {}", stale.display()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => log::warn!("Could not remove stale {}: {}", stale.display(), e),
    }
    Ok(())
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::error::{DeploymentError, ErrorStage};
    use std::time::Duration;
    use tempfile::tempdir;

    fn infra() -> InfrastructureProvisionResult {
        InfrastructureProvisionResult::new("mock-cluster", "kubernetes")
            .with_output("kube-config", "/tmp/kubeconfig")
    }

    #[test]
    fn test_deploy_success_with_outputs() {
        let dir = tempdir().unwrap();
        fs::write(
            dir.path().join("deploy.sh"),
            "echo deploying\necho ENDPOINT=http://x\necho \"KUBE=$KUBE_CONFIG\"\n",
        )
        .unwrap();
        let plan = TestPlanContext::new("plan-1", dir.path());

        let result = ShellDeployer::default()
            .deploy(&plan, &infra(), &DeploymentScript::shell("deploy.sh"))
            .unwrap();

        assert!(result.success);
        assert_eq!(result.deployer, SHELL);
        assert_eq!(result.exit_code, Some(0));
        assert_eq!(result.output("endpoint"), Some("http://x"));
        assert_eq!(result.output("kube"), Some("/tmp/kubeconfig"));
        assert_eq!(
            fs::read_to_string(dir.path().join("infrastructure.properties")).unwrap(),
            "kube-config=/tmp/kubeconfig\n"
        );
    }

    #[test]
    fn test_deploy_receives_standard_args() {
        let dir = tempdir().unwrap();
        fs::write(
            dir.path().join("deploy.sh"),
            "echo \"ARGS=$*\"\necho \"PLAN=$GRIDPLOY_TEST_PLAN_ID\"\n",
        )
        .unwrap();
        let ws = dir.path().join("ws");
        let plan = TestPlanContext::new("plan-7", dir.path()).with_workspace(&ws);
        let script = DeploymentScript::shell("deploy.sh").with_arg("--verbose");

        let result = ShellDeployer::default()
            .deploy(&plan, &infra(), &script)
            .unwrap();

        let ws = ws.display().to_string();
        assert_eq!(
            result.output("args").unwrap(),
            format!("--input-dir {ws} --output-dir {ws} --verbose")
        );
        assert_eq!(result.output("plan"), Some("plan-7"));
    }

    #[test]
    fn test_non_zero_exit_is_failed_result() {
        let dir = tempdir().unwrap();
        fs::write(
            dir.path().join("deploy.sh"),
            "echo ENDPOINT=http://x\necho 'chart not found' >&2\nexit 4\n",
        )
        .unwrap();
        let plan = TestPlanContext::new("plan-1", dir.path());

        let result = ShellDeployer::default()
            .deploy(&plan, &infra(), &DeploymentScript::shell("deploy.sh"))
            .unwrap();

        assert!(!result.success);
        assert_eq!(result.exit_code, Some(4));
        assert!(result.message.contains("exited with code 4"));
        assert!(result.message.contains("chart not found"));
    }

    #[test]
    fn test_warning_exit_code() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("deploy.sh"), "echo ENDPOINT=http://x\nexit 10\n").unwrap();
        let plan = TestPlanContext::new("plan-1", dir.path());
        let deployer =
            ShellDeployer::new(ScriptExecutor::new(), ExitPolicy::with_warning_codes([10]));

        let result = deployer
            .deploy(&plan, &infra(), &DeploymentScript::shell("deploy.sh"))
            .unwrap();

        assert!(result.success);
        assert_eq!(result.exit_code, Some(10));
        assert_eq!(result.warnings.len(), 1);
        assert!(result.warnings[0].contains("10"));
    }

    #[test]
    fn test_missing_required_output_fails() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("deploy.sh"), "echo NAMESPACE=run1\n").unwrap();
        let plan = TestPlanContext::new("plan-1", dir.path());
        let script = DeploymentScript::shell("deploy.sh").require_output("endpoint");

        let err = ShellDeployer::default()
            .deploy(&plan, &infra(), &script)
            .unwrap_err();

        assert_eq!(err.stage(), ErrorStage::ResultParse);
        assert!(err.to_string().contains("endpoint"));
    }

    #[test]
    fn test_truncated_output_line_is_discarded() {
        let dir = tempdir().unwrap();
        fs::write(
            dir.path().join("deploy.sh"),
            "echo ENDPOINT=http://example.com:8080/api\n",
        )
        .unwrap();
        let plan = TestPlanContext::new("plan-1", dir.path());
        let deployer = ShellDeployer::new(
            ScriptExecutor::new().with_max_output_bytes(20),
            ExitPolicy::strict(),
        );
        let script = DeploymentScript::shell("deploy.sh").require_output("endpoint");

        let err = deployer.deploy(&plan, &infra(), &script).unwrap_err();

        assert_eq!(err.stage(), ErrorStage::ResultParse);
        assert!(err.to_string().contains("endpoint"));
    }

    #[test]
    fn test_complete_lines_kept_when_truncated() {
        let dir = tempdir().unwrap();
        fs::write(
            dir.path().join("deploy.sh"),
            "echo NAMESPACE=run1\necho ENDPOINT=http://example.com:8080/api\n",
        )
        .unwrap();
        let plan = TestPlanContext::new("plan-1", dir.path());
        let deployer = ShellDeployer::new(
            ScriptExecutor::new().with_max_output_bytes(30),
            ExitPolicy::strict(),
        );

        let result = deployer
            .deploy(&plan, &infra(), &DeploymentScript::shell("deploy.sh"))
            .unwrap();

        assert!(result.success);
        assert_eq!(result.output("namespace"), Some("run1"));
        assert!(result.output("endpoint").is_none());
        assert_eq!(result.warnings.len(), 1);
    }

    #[test]
    fn test_complete_lines() {
        assert_eq!(complete_lines("A=1\nB=2"), "A=1\n");
        assert_eq!(complete_lines("A=1\n"), "A=1\n");
        assert_eq!(complete_lines("ENDPOINT=http://exam"), "");
    }

    #[test]
    fn test_deployment_properties_merged() {
        let dir = tempdir().unwrap();
        fs::write(
            dir.path().join("deploy.sh"),
            "echo ENDPOINT=http://stdout\necho 'endpoint=http://file' > \"$4/deployment.properties\"\necho 'token=abc' >> \"$4/deployment.properties\"\n",
        )
        .unwrap();
        let plan = TestPlanContext::new("plan-1", dir.path());
        let script = DeploymentScript::shell("deploy.sh").require_output("token");

        let result = ShellDeployer::default()
            .deploy(&plan, &infra(), &script)
            .unwrap();

        assert!(result.success);
        assert_eq!(result.output("endpoint"), Some("http://file"));
        assert_eq!(result.output("token"), Some("abc"));
    }

    #[test]
    fn test_stale_deployment_properties_removed() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("deployment.properties"), "token=stale\n").unwrap();
        fs::write(dir.path().join("deploy.sh"), "echo ENDPOINT=http://x\n").unwrap();
        let plan = TestPlanContext::new("plan-1", dir.path());

        let result = ShellDeployer::default()
            .deploy(&plan, &infra(), &DeploymentScript::shell("deploy.sh"))
            .unwrap();

        assert!(result.output("token").is_none());
        assert!(!dir.path().join("deployment.properties").exists());
    }

    #[test]
    fn test_inline_script_written_and_run() {
        let dir = tempdir().unwrap();
        let plan = TestPlanContext::new("plan-1", dir.path());
        let script = DeploymentScript::shell("scripts/inline.sh")
            .with_inline("echo ENDPOINT=http://inline\n");

        let result = ShellDeployer::default()
            .deploy(&plan, &infra(), &script)
            .unwrap();

        assert!(result.success);
        assert_eq!(result.output("endpoint"), Some("http://inline"));
        assert!(dir.path().join("scripts/inline.sh").is_file());
    }

    #[test]
    fn test_missing_script_never_runs() {
        let dir = tempdir().unwrap();
        let plan = TestPlanContext::new("plan-1", dir.path());

        let err = ShellDeployer::default()
            .deploy(&plan, &infra(), &DeploymentScript::shell("missing.sh"))
            .unwrap_err();

        assert_eq!(err.stage(), ErrorStage::Execution);
        assert!(!err.script_ran());
    }

    #[test]
    fn test_escaping_script_path_rejected() {
        let dir = tempdir().unwrap();
        let plan = TestPlanContext::new("plan-1", dir.path().join("repo"));

        let err = ShellDeployer::default()
            .deploy(&plan, &infra(), &DeploymentScript::shell("../outside.sh"))
            .unwrap_err();

        assert!(matches!(
            err,
            DeploymentError::ExecutionFailed(ExecutionError::LaunchFailure { .. })
        ));
    }

    #[test]
    fn test_timeout_surfaces_as_execution_error() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("deploy.sh"), "echo ENDPOINT=http://x\nexec sleep 30\n").unwrap();
        let plan = TestPlanContext::new("plan-1", dir.path());
        let deployer = ShellDeployer::new(
            ScriptExecutor::new().with_timeout(Duration::from_millis(300)),
            ExitPolicy::strict(),
        );

        let err = deployer
            .deploy(&plan, &infra(), &DeploymentScript::shell("deploy.sh"))
            .unwrap_err();

        match err {
            DeploymentError::ExecutionFailed(ref e @ ExecutionError::Timeout { .. }) => {
                assert!(e.partial_outcome().unwrap().stdout.contains("ENDPOINT"));
            }
            other => panic!("expected timeout, got {other:?}"),
        }
    }
}
