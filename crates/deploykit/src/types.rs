//! Core types shared by the bootstrapper, executor and deployers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Description of infrastructure that was already provisioned.
///
/// Owned by the provisioning side; deployers only read it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InfrastructureProvisionResult {
    /// Name of the provisioned environment
    pub name: String,
    /// Provider that created it (e.g. "kubernetes", "aws")
    #[serde(default)]
    pub provider: String,
    /// Provider outputs such as cluster endpoints or kubeconfig paths
    #[serde(default)]
    pub outputs: BTreeMap<String, String>,
    /// Free-form provisioning metadata
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

impl InfrastructureProvisionResult {
    /// Create an infrastructure result with no outputs.
    pub fn new(name: impl Into<String>, provider: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            provider: provider.into(),
            ..Default::default()
        }
    }

    /// Add a provider output.
    pub fn with_output(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.outputs.insert(key.into(), value.into());
        self
    }
}

/// Kind of deployment script.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScriptType {
    /// Plain shell script from the deployment repository
    #[default]
    Shell,
    /// Helm chart deployment driven by the bundled helm script
    Helm,
}

impl ScriptType {
    /// Get the type tag as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Shell => "shell",
            Self::Helm => "helm",
        }
    }
}

impl fmt::Display for ScriptType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A deployment action described by configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentScript {
    /// Human-readable name of the step
    #[serde(default)]
    pub name: String,
    /// Script kind
    #[serde(default, rename = "type")]
    pub script_type: ScriptType,
    /// Path of the script, relative to the deployment repository root
    #[serde(default)]
    pub file: String,
    /// Inline script content, written to `file` before running
    #[serde(default)]
    pub inline: Option<String>,
    /// Extra arguments appended after the standard ones
    #[serde(default)]
    pub args: Vec<String>,
    /// Output keys that must be reported for the deployment to count as successful
    #[serde(default)]
    pub required_outputs: Vec<String>,
}

impl DeploymentScript {
    /// Create a shell script reference.
    pub fn shell(file: impl Into<String>) -> Self {
        let file = file.into();
        Self {
            name: file.clone(),
            script_type: ScriptType::Shell,
            file,
            ..Default::default()
        }
    }

    /// Create a helm deployment reference.
    pub fn helm(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            script_type: ScriptType::Helm,
            ..Default::default()
        }
    }

    /// Provide the script content inline.
    pub fn with_inline(mut self, content: impl Into<String>) -> Self {
        self.inline = Some(content.into());
        self
    }

    /// Append an argument.
    pub fn with_arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Require an output key.
    pub fn require_output(mut self, key: impl Into<String>) -> Self {
        self.required_outputs.push(key.into());
        self
    }
}

/// Per-run context of the test plan being deployed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestPlanContext {
    /// Run-scoped identifier of the test plan
    pub id: String,
    /// Root of the deployment repository, where scripts are staged and run
    pub deployment_repository: PathBuf,
    /// Directory for exchange files; defaults to the repository root
    #[serde(default)]
    pub workspace: Option<PathBuf>,
}

impl TestPlanContext {
    /// Create a context rooted at a deployment repository.
    pub fn new(id: impl Into<String>, deployment_repository: impl Into<PathBuf>) -> Self {
        Self {
            id: id.into(),
            deployment_repository: deployment_repository.into(),
            workspace: None,
        }
    }

    /// Use a separate workspace directory for exchange files.
    pub fn with_workspace(mut self, workspace: impl Into<PathBuf>) -> Self {
        self.workspace = Some(workspace.into());
        self
    }

    /// Directory where infrastructure inputs and deployment outputs are exchanged.
    pub fn workspace_dir(&self) -> &Path {
        self.workspace
            .as_deref()
            .unwrap_or(&self.deployment_repository)
    }
}

/// Outcome of a single deploy call, handed to the test execution engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentCreationResult {
    /// Name of the deployer that produced this result
    pub deployer: String,
    /// Whether the deployment succeeded
    pub success: bool,
    /// Human-readable summary
    pub message: String,
    /// Deployment outputs such as exposed endpoints
    pub outputs: BTreeMap<String, String>,
    /// Exit code of the deployment script, if one ran
    pub exit_code: Option<i32>,
    /// Time spent running the deployment script
    pub duration: Duration,
    /// Non-fatal conditions reported during the deployment
    pub warnings: Vec<String>,
    /// When the result was produced
    pub completed_at: DateTime<Utc>,
}

impl DeploymentCreationResult {
    /// Create a successful result with no outputs.
    pub fn empty(deployer: impl Into<String>) -> Self {
        Self {
            deployer: deployer.into(),
            success: true,
            message: "Nothing to deploy".to_string(),
            outputs: BTreeMap::new(),
            exit_code: None,
            duration: Duration::ZERO,
            warnings: Vec::new(),
            completed_at: Utc::now(),
        }
    }

    /// Look up an output value.
    pub fn output(&self, key: &str) -> Option<&str> {
        self.outputs.get(key).map(String::as_str)
    }
}

/// Raw result of running an external process.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessOutcome {
    /// Exit code, or `None` if the process was terminated by a signal
    pub exit_code: Option<i32>,
    /// Captured standard output
    pub stdout: String,
    /// Captured standard error
    pub stderr: String,
    /// Whether stdout exceeded the capture limit
    pub stdout_truncated: bool,
    /// Whether stderr exceeded the capture limit
    pub stderr_truncated: bool,
    /// Wall-clock time the process ran
    pub duration: Duration,
}

impl ProcessOutcome {
    /// Whether the process exited with status 0.
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }

    /// Last `lines` lines of stderr, for error messages.
    pub fn stderr_tail(&self, lines: usize) -> String {
        let all: Vec<&str> = self.stderr.lines().collect();
        let start = all.len().saturating_sub(lines);
        all[start..].join("\n")
    }
}
