//! Test plan and infrastructure files read by `gridploy deploy`.
//!
//! A plan file (TOML or JSON) names the test plan and the script to deploy:
//!
//! ```toml
//! [plan]
//! id = "run1"
//! deployment_repository = "./repo"
//!
//! [script]
//! type = "helm"
//! required_outputs = ["endpoint"]
//! ```
//!
//! Relative paths are resolved against the plan file's directory and made
//! absolute, since deployment scripts run inside the repository.

use anyhow::{Context, Result};
use deploykit::{DeploymentScript, InfrastructureProvisionResult, TestPlanContext};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use std::fs;
use std::path::{Path, PathBuf};

use crate::paths;

/// A test plan to deploy, as loaded from disk
#[derive(Debug, Clone)]
pub struct PlanFile {
    pub source: PathBuf,
    pub plan: TestPlanContext,
    pub script: DeploymentScript,
}

#[derive(Debug, Deserialize)]
struct RawPlan {
    plan: RawContext,
    #[serde(default)]
    script: DeploymentScript,
}

#[derive(Debug, Deserialize)]
struct RawContext {
    id: String,
    deployment_repository: String,
    #[serde(default)]
    workspace: Option<String>,
}

impl PlanFile {
    pub fn load(path: &Path) -> Result<Self> {
        let raw: RawPlan = read_document(path)?;
        let dir = match path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };
        let base = std::path::absolute(dir)
            .with_context(|| format!("Could not resolve {}", dir.display()))?;

        let mut plan = TestPlanContext::new(
            raw.plan.id,
            paths::resolve(&raw.plan.deployment_repository, &base),
        );
        if let Some(workspace) = raw.plan.workspace {
            plan = plan.with_workspace(paths::resolve(&workspace, &base));
        }

        Ok(Self {
            source: path.to_path_buf(),
            plan,
            script: raw.script,
        })
    }

    /// Strategy to deploy with when none is given on the command line
    pub fn strategy(&self) -> &'static str {
        self.script.script_type.as_str()
    }
}

/// Load the description of already provisioned infrastructure.
pub fn load_infrastructure(path: &Path) -> Result<InfrastructureProvisionResult> {
    read_document(path)
}

/// Read a TOML or JSON document, chosen by file extension (JSON by default).
fn read_document<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let content =
        fs::read_to_string(path).with_context(|| format!("Could not read {}", path.display()))?;

    let is_toml = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"));

    if is_toml {
        toml::from_str(&content).with_context(|| format!("Invalid TOML in {}", path.display()))
    } else {
        serde_json::from_str(&content)
            .with_context(|| format!("Invalid JSON in {}", path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use deploykit::ScriptType;
    use tempfile::tempdir;

    #[test]
    fn test_load_toml_plan() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("plan.toml");
        fs::write(
            &path,
            r#"
            [plan]
            id = "run1"
            deployment_repository = "repo"

            [script]
            type = "helm"
            args = ["--atomic"]
            required_outputs = ["endpoint"]
            "#,
        )
        .unwrap();

        let loaded = PlanFile::load(&path).unwrap();
        assert_eq!(loaded.plan.id, "run1");
        assert_eq!(loaded.plan.deployment_repository, dir.path().join("repo"));
        assert_eq!(loaded.plan.workspace_dir(), dir.path().join("repo"));
        assert_eq!(loaded.script.script_type, ScriptType::Helm);
        assert_eq!(loaded.script.args, vec!["--atomic"]);
        assert_eq!(loaded.strategy(), "helm");
    }

    #[test]
    fn test_load_json_plan_with_workspace() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("plan.json");
        fs::write(
            &path,
            r#"{
                "plan": {"id": "p2", "deployment_repository": "/abs/repo", "workspace": "ws"},
                "script": {"file": "deploy.sh"}
            }"#,
        )
        .unwrap();

        let loaded = PlanFile::load(&path).unwrap();
        assert_eq!(loaded.plan.deployment_repository, PathBuf::from("/abs/repo"));
        assert_eq!(loaded.plan.workspace_dir(), dir.path().join("ws"));
        assert_eq!(loaded.script.file, "deploy.sh");
        assert_eq!(loaded.strategy(), "shell");
    }

    #[test]
    fn test_plan_without_script_section() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("plan.toml");
        fs::write(&path, "[plan]\nid = \"p\"\ndeployment_repository = \".\"\n").unwrap();

        let loaded = PlanFile::load(&path).unwrap();
        assert_eq!(loaded.script, DeploymentScript::default());
    }

    #[test]
    fn test_invalid_plan() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("plan.toml");
        fs::write(&path, "[plan]\nid = \"p\"\n").unwrap();

        let err = PlanFile::load(&path).unwrap_err();
        assert!(format!("{err:#}").contains("Invalid TOML"));
        assert!(PlanFile::load(&dir.path().join("missing.toml")).is_err());
    }

    #[test]
    fn test_load_infrastructure() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("infra.json");
        fs::write(
            &path,
            r#"{"name": "cluster-a", "provider": "kubernetes", "outputs": {"kube-config": "/tmp/kc"}}"#,
        )
        .unwrap();

        let infra = load_infrastructure(&path).unwrap();
        assert_eq!(infra.name, "cluster-a");
        assert_eq!(infra.outputs["kube-config"], "/tmp/kc");
        assert!(infra.metadata.is_empty());
    }
}
