//! Structured outputs exchanged with deployment scripts.
//!
//! Scripts report outputs as `KEY=VALUE` lines on stdout and, optionally, in
//! a `deployment.properties` file. Infrastructure details flow the other way
//! through `infrastructure.properties` and environment variables.

use crate::error::DeploymentError;
use regex::Regex;
use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::Path;
use std::sync::LazyLock;

/// File the script may write extra outputs to, inside the workspace.
pub const DEPLOYMENT_PROPERTIES: &str = "deployment.properties";

/// File infrastructure outputs are written to, inside the workspace.
pub const INFRASTRUCTURE_PROPERTIES: &str = "infrastructure.properties";

static OUTPUT_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^([A-Z][A-Z0-9_]*)=(.*)$").expect("valid output regex"));

/// Extract `KEY=VALUE` lines from script stdout.
///
/// Keys are lowercased; later lines win. Lines that do not look like an
/// output are ignored, since scripts also print progress.
pub fn parse_stdout(stdout: &str) -> BTreeMap<String, String> {
    stdout
        .lines()
        .filter_map(|line| OUTPUT_LINE.captures(line.trim_end_matches('\r')))
        .map(|caps| (caps[1].to_lowercase(), caps[2].trim().to_string()))
        .collect()
}

/// Parse a Java-style properties document into lowercased keys.
///
/// `#` and `!` start comments. A non-blank line without `=` or `:` is an error.
pub fn parse_properties(content: &str) -> Result<BTreeMap<String, String>, String> {
    let mut props = BTreeMap::new();
    for (idx, raw) in content.lines().enumerate() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') || line.starts_with('!') {
            continue;
        }
        let Some(sep) = line.find(['=', ':']) else {
            return Err(format!("line {}: expected key=value, got '{}'", idx + 1, line));
        };
        let key = line[..sep].trim();
        if key.is_empty() {
            return Err(format!("line {}: missing key", idx + 1));
        }
        props.insert(key.to_lowercase(), line[sep + 1..].trim().to_string());
    }
    Ok(props)
}

/// Read `deployment.properties` from `workspace`, if the script wrote one.
pub fn read_deployment_properties(
    workspace: &Path,
) -> Result<Option<BTreeMap<String, String>>, DeploymentError> {
    let path = workspace.join(DEPLOYMENT_PROPERTIES);
    let content = match fs::read_to_string(&path) {
        Ok(c) => c,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => {
            return Err(DeploymentError::parse(format!(
                "cannot read {}: {e}",
                path.display()
            )));
        }
    };
    parse_properties(&content)
        .map(Some)
        .map_err(|e| DeploymentError::parse(format!("{}: {e}", path.display())))
}

/// Check that every required key is present with a non-empty value.
pub fn check_required(
    outputs: &BTreeMap<String, String>,
    required: &[String],
) -> Result<(), DeploymentError> {
    let missing: Vec<&str> = required
        .iter()
        .map(String::as_str)
        .filter(|key| {
            outputs
                .get(&key.to_lowercase())
                .is_none_or(|v| v.is_empty())
        })
        .collect();

    if missing.is_empty() {
        Ok(())
    } else {
        Err(DeploymentError::parse(format!(
            "missing required outputs: {}",
            missing.join(", ")
        )))
    }
}

/// Render a map as a properties document, one `key=value` per line.
pub fn render_properties(values: &BTreeMap<String, String>) -> String {
    values
        .iter()
        .map(|(k, v)| format!("{k}={}\n", v.replace('\n', "\\n")))
        .collect()
}

/// Turn an arbitrary key into an environment variable name.
pub fn env_key(key: &str) -> String {
    key.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_uppercase()
            } else {
                '_'
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_parse_stdout() {
        let stdout = "Deploying chart...\nENDPOINT=http://x\nrelease ready\nNAMESPACE=run1\n";
        let outputs = parse_stdout(stdout);
        assert_eq!(outputs.len(), 2);
        assert_eq!(outputs["endpoint"], "http://x");
        assert_eq!(outputs["namespace"], "run1");
    }

    #[test]
    fn test_parse_stdout_later_wins_and_ignores_noise() {
        let stdout = "ENDPOINT=http://old\nlowercase=ignored\n  INDENTED=ignored\nENDPOINT=http://new\r\n";
        let outputs = parse_stdout(stdout);
        assert_eq!(outputs.len(), 1);
        assert_eq!(outputs["endpoint"], "http://new");
    }

    #[test]
    fn test_parse_stdout_keeps_equals_in_value() {
        let outputs = parse_stdout("DB_URL=postgres://h/db?sslmode=require\n");
        assert_eq!(outputs["db_url"], "postgres://h/db?sslmode=require");
    }

    #[test]
    fn test_parse_properties() {
        let content = "# comment\n! also comment\n\nHost = example.com\nport:8080\n";
        let props = parse_properties(content).unwrap();
        assert_eq!(props["host"], "example.com");
        assert_eq!(props["port"], "8080");
    }

    #[test]
    fn test_parse_properties_malformed() {
        let err = parse_properties("good=1\nthis line is broken\n").unwrap_err();
        assert!(err.contains("line 2"));

        let err = parse_properties("=value\n").unwrap_err();
        assert!(err.contains("missing key"));
    }

    #[test]
    fn test_read_deployment_properties() {
        let dir = tempdir().unwrap();
        assert!(read_deployment_properties(dir.path()).unwrap().is_none());

        fs::write(dir.path().join(DEPLOYMENT_PROPERTIES), "ENDPOINT=http://y\n").unwrap();
        let props = read_deployment_properties(dir.path()).unwrap().unwrap();
        assert_eq!(props["endpoint"], "http://y");

        fs::write(dir.path().join(DEPLOYMENT_PROPERTIES), "garbage\n").unwrap();
        let err = read_deployment_properties(dir.path()).unwrap_err();
        assert!(matches!(err, DeploymentError::ResultParseFailed { .. }));
    }

    #[test]
    fn test_check_required() {
        let mut outputs = BTreeMap::new();
        outputs.insert("endpoint".to_string(), "http://x".to_string());
        outputs.insert("namespace".to_string(), String::new());

        assert!(check_required(&outputs, &["ENDPOINT".to_string()]).is_ok());

        let err = check_required(
            &outputs,
            &["endpoint".to_string(), "namespace".to_string(), "token".to_string()],
        )
        .unwrap_err();
        let message = err.to_string();
        assert!(message.contains("namespace"));
        assert!(message.contains("token"));
        assert!(!message.contains("endpoint,"));
    }

    #[test]
    fn test_render_properties() {
        let mut values = BTreeMap::new();
        values.insert("b".to_string(), "2".to_string());
        values.insert("a".to_string(), "line1\nline2".to_string());
        assert_eq!(render_properties(&values), "a=line1\\nline2\nb=2\n");
    }

    #[test]
    fn test_env_key() {
        assert_eq!(env_key("kube-config"), "KUBE_CONFIG");
        assert_eq!(env_key("cluster.endpoint"), "CLUSTER_ENDPOINT");
        assert_eq!(env_key("DB_HOST"), "DB_HOST");
    }
}
