//! Error types for deployment operations.
//!
//! Errors are grouped by the stage that produced them so callers can tell
//! an environment problem (bootstrap) from a deployment script problem
//! (execution) from a configuration problem (unknown strategy).

use crate::types::ProcessOutcome;
use std::fmt;
use std::io;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Stage of the deployment pipeline an error originated from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorStage {
    /// Staging a bundled script into the deployment repository
    Bootstrap,
    /// Launching or waiting for the deployment script
    Execution,
    /// Reading structured outputs produced by the script
    ResultParse,
    /// Selecting a deployer for a strategy name
    Dispatch,
}

impl ErrorStage {
    /// Short machine-readable name of the stage.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Bootstrap => "bootstrap",
            Self::Execution => "execution",
            Self::ResultParse => "result_parse",
            Self::Dispatch => "dispatch",
        }
    }

    /// Get a user-friendly description of this stage.
    pub fn description(&self) -> &'static str {
        match self {
            Self::Bootstrap => "Deployment script could not be staged",
            Self::Execution => "Deployment script failed to run",
            Self::ResultParse => "Deployment outputs are incomplete",
            Self::Dispatch => "Unknown deployment strategy",
        }
    }

    /// Get actionable advice for resolving errors from this stage.
    pub fn advice(&self) -> &'static str {
        match self {
            Self::Bootstrap => {
                "Check that the deployment repository exists and is writable"
            }
            Self::Execution => "Inspect the script output and make sure its tooling is installed",
            Self::ResultParse => "Make sure the script prints every required KEY=VALUE output",
            Self::Dispatch => "Use one of the registered strategies (see `gridploy strategies`)",
        }
    }
}

impl fmt::Display for ErrorStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.description())
    }
}

/// Errors raised while materializing a bundled resource.
#[derive(Debug, Error)]
pub enum BootstrapError {
    /// No bundled resource exists under this name
    #[error("bundled resource not found: {name}")]
    ResourceNotFound {
        /// Name of the missing resource
        name: String,
    },

    /// The destination could not be created or written
    #[error("failed to write {path}: {source}")]
    WriteFailure {
        /// Destination that could not be written
        path: PathBuf,
        /// Underlying IO error
        #[source]
        source: io::Error,
    },
}

impl BootstrapError {
    /// Create a write failure with path context.
    pub fn write(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::WriteFailure {
            path: path.into(),
            source,
        }
    }
}

/// Errors raised while running an external script.
#[derive(Debug, Error)]
pub enum ExecutionError {
    /// The script did not finish before the configured timeout and was killed
    #[error("{program} timed out after {}s", .after.as_secs())]
    Timeout {
        /// Program that was running
        program: String,
        /// Configured timeout that elapsed
        after: Duration,
        /// Output captured before the process was killed
        partial: Box<ProcessOutcome>,
    },

    /// The process could not be started
    #[error("failed to launch {program}: {source}")]
    LaunchFailure {
        /// Program that failed to launch
        program: String,
        /// Underlying IO error
        #[source]
        source: io::Error,
    },

    /// The process started but its exit status could not be collected
    #[error("lost track of {program} while waiting for it: {source}")]
    WaitFailure {
        /// Program that was running
        program: String,
        /// Underlying IO error
        #[source]
        source: io::Error,
    },
}

impl ExecutionError {
    /// Create a launch failure for a program.
    pub fn launch(program: impl Into<String>, source: io::Error) -> Self {
        Self::LaunchFailure {
            program: program.into(),
            source,
        }
    }

    /// Output captured before a timeout, if any.
    pub fn partial_outcome(&self) -> Option<&ProcessOutcome> {
        match self {
            Self::Timeout { partial, .. } => Some(partial),
            Self::LaunchFailure { .. } | Self::WaitFailure { .. } => None,
        }
    }
}

/// No deployer is registered under the requested strategy name.
#[derive(Debug, Error)]
#[error("unknown deployment strategy '{name}' (available: {})", .available.join(", "))]
pub struct UnknownStrategyError {
    /// Requested strategy name
    pub name: String,
    /// Strategies that are registered
    pub available: Vec<String>,
}

impl UnknownStrategyError {
    /// Stage this error belongs to.
    pub fn stage(&self) -> ErrorStage {
        ErrorStage::Dispatch
    }
}

/// Errors surfaced by [`Deployer::deploy`](crate::Deployer::deploy).
#[derive(Debug, Error)]
pub enum DeploymentError {
    /// The backend script could not be staged; it never ran
    #[error("bootstrap failed: {0}")]
    BootstrapFailed(#[from] BootstrapError),

    /// The script could not be run to completion
    #[error("execution failed: {0}")]
    ExecutionFailed(#[from] ExecutionError),

    /// The script exited successfully but its outputs were incomplete or malformed
    #[error("could not read deployment outputs: {message}")]
    ResultParseFailed {
        /// What was wrong with the outputs
        message: String,
    },
}

impl DeploymentError {
    /// Create a result parse failure.
    pub fn parse(message: impl Into<String>) -> Self {
        Self::ResultParseFailed {
            message: message.into(),
        }
    }

    /// Get the stage this error originated from.
    pub fn stage(&self) -> ErrorStage {
        match self {
            Self::BootstrapFailed(_) => ErrorStage::Bootstrap,
            Self::ExecutionFailed(_) => ErrorStage::Execution,
            Self::ResultParseFailed { .. } => ErrorStage::ResultParse,
        }
    }

    /// Whether the deployment script started at all.
    pub fn script_ran(&self) -> bool {
        match self {
            Self::BootstrapFailed(_) => false,
            Self::ExecutionFailed(ExecutionError::LaunchFailure { .. }) => false,
            Self::ExecutionFailed(
                ExecutionError::Timeout { .. } | ExecutionError::WaitFailure { .. },
            ) => true,
            Self::ResultParseFailed { .. } => true,
        }
    }
}

/// Result type for deployment operations.
pub type Result<T> = std::result::Result<T, DeploymentError>;
