//! gridploy configuration (`config.toml`)
//!
//! ```toml
//! [executor]
//! timeout_secs = 1800
//! max_output_bytes = "1MB"
//! interpreter = "bash"
//!
//! [policy]
//! warning_exit_codes = [10]
//!
//! [registry]
//! default = "shell"
//! ```

use anyhow::{Context, Result};
use deploykit::executor::{DEFAULT_INTERPRETER, DEFAULT_MAX_OUTPUT_BYTES, DEFAULT_TIMEOUT};
use deploykit::{ExitPolicy, ScriptExecutor};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

use crate::paths;
use crate::ui;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub executor: ExecutorConfig,
    pub policy: PolicyConfig,
    pub registry: RegistryConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorConfig {
    /// Seconds a deployment script may run before it is killed
    pub timeout_secs: u64,
    /// Capture limit per output stream, in bytes or as "1MB"
    pub max_output_bytes: SizeValue,
    /// Interpreter scripts are run with; empty runs scripts directly
    pub interpreter: String,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            timeout_secs: DEFAULT_TIMEOUT.as_secs(),
            max_output_bytes: SizeValue::Bytes(DEFAULT_MAX_OUTPUT_BYTES as u64),
            interpreter: DEFAULT_INTERPRETER.to_string(),
        }
    }
}

/// A size given either as a byte count or a human-readable string
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SizeValue {
    Bytes(u64),
    Human(String),
}

impl SizeValue {
    pub fn bytes(&self) -> Result<u64> {
        match self {
            Self::Bytes(n) => Ok(*n),
            Self::Human(s) => {
                ui::parse_size(s).map_err(|e| anyhow::anyhow!("Invalid max_output_bytes: {e}"))
            }
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyConfig {
    /// Non-zero exit codes that count as success with a warning
    pub warning_exit_codes: Vec<i32>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// Strategy used for names that are not registered
    pub default: Option<String>,
}

/// Command-line values that take precedence over the config file
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub timeout_secs: Option<u64>,
    pub max_output: Option<String>,
}

impl Config {
    /// Load the config from `path`, or from the default location.
    ///
    /// A missing default config yields defaults; a missing explicit path is an error.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let (path, explicit) = match path {
            Some(p) => (paths::expand(&p.to_string_lossy()), true),
            None => (paths::config_file()?, false),
        };

        if !path.exists() {
            if explicit {
                anyhow::bail!("Config file not found: {}", path.display());
            }
            log::debug!("No config at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        Self::load_from(&path)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Could not read {}", path.display()))?;
        let config: Self = toml::from_str(&content)
            .with_context(|| format!("Invalid config format in {}", path.display()))?;
        log::debug!("Loaded config from {}", path.display());
        Ok(config)
    }

    /// Build the script executor, applying command-line overrides.
    pub fn executor(&self, overrides: &Overrides) -> Result<ScriptExecutor> {
        let timeout = overrides
            .timeout_secs
            .unwrap_or(self.executor.timeout_secs);
        if timeout == 0 {
            anyhow::bail!("Timeout must be at least one second");
        }

        let max_output = match &overrides.max_output {
            Some(s) => ui::parse_size(s).map_err(|e| anyhow::anyhow!("Invalid --max-output: {e}"))?,
            None => self.executor.max_output_bytes.bytes()?,
        };

        let interpreter = match self.executor.interpreter.trim() {
            "" => None,
            name => Some(name.to_string()),
        };

        Ok(ScriptExecutor::new()
            .with_timeout(Duration::from_secs(timeout))
            .with_max_output_bytes(max_output as usize)
            .with_interpreter(interpreter))
    }

    pub fn exit_policy(&self) -> ExitPolicy {
        ExitPolicy::with_warning_codes(self.policy.warning_exit_codes.iter().copied())
    }
}
