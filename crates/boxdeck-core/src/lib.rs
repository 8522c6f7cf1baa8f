//! Lifecycle orchestration and the read façade for boxdeck.
//!
//! This crate ties the catalog resolver and the status aggregator together
//! behind the [`Engine`]: the [`Orchestrator`] drives install, uninstall and
//! restart against a [`ContainerManager`] and waits for the status feeds to
//! confirm convergence; the [`QueryFacade`] serves the read-only views the
//! management UI needs. Configuration is loaded from TOML via [`Config`].

pub mod concurrency;
pub mod config;
pub mod engine;
pub mod manager;
pub mod mock;
pub mod operation;
pub mod orchestrator;
pub mod query;

pub use concurrency::{OperationGuard, OperationLocks};
pub use config::{
    Config, ConfigError, ContainerManagerConfig, OrchestratorConfig, ServerConfig,
};
pub use engine::Engine;
pub use manager::{ContainerManager, HttpContainerManager, ManagerError};
pub use mock::{MockAction, MockContainerManager, MockOutcome, MockRequest};
pub use operation::{
    OperationKind, OperationLog, OperationOutcome, OperationStep, OperationTracker,
    OrchestrationOperation,
};
pub use orchestrator::Orchestrator;
pub use query::{AppStoreEntry, QueryFacade};

use boxdeck_catalog::CatalogError;
use boxdeck_schema::ComponentState;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("component not found: {0}")]
    NotFound(String),
    #[error("invalid manifest '{name}': {reason}")]
    Invalid { name: String, reason: String },
    #[error("source unavailable: {0}")]
    SourceUnavailable(String),
    #[error("another operation is in progress for '{0}'")]
    Busy(String),
    #[error("{operation} of '{name}' timed out in state {state}")]
    TimedOut {
        name: String,
        operation: OperationKind,
        state: ComponentState,
    },
    #[error("{operation} of '{name}' was cancelled")]
    Cancelled {
        name: String,
        operation: OperationKind,
    },
    #[error("install of '{name}' failed: {reason}")]
    InstallFailed { name: String, reason: String },
    #[error("uninstall of '{name}' failed: {reason}")]
    UninstallFailed { name: String, reason: String },
    #[error("restart of '{name}' incomplete in {phase} phase: {source}")]
    RestartIncomplete {
        name: String,
        phase: RestartPhase,
        source: Box<CoreError>,
    },
    #[error("internal error: {0}")]
    Internal(String),
}

/// The stable, transport-facing classification of a [`CoreError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    NotFound,
    Invalid,
    SourceUnavailable,
    Busy,
    TimedOut,
    Cancelled,
    InstallFailed,
    UninstallFailed,
    Partial,
    Internal,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::NotFound => "not_found",
            ErrorKind::Invalid => "invalid",
            ErrorKind::SourceUnavailable => "source_unavailable",
            ErrorKind::Busy => "busy",
            ErrorKind::TimedOut => "timed_out",
            ErrorKind::Cancelled => "cancelled",
            ErrorKind::InstallFailed => "install_failed",
            ErrorKind::UninstallFailed => "uninstall_failed",
            ErrorKind::Partial => "partial",
            ErrorKind::Internal => "internal",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which half of a restart did not converge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RestartPhase {
    Uninstall,
    Install,
}

impl fmt::Display for RestartPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RestartPhase::Uninstall => write!(f, "uninstall"),
            RestartPhase::Install => write!(f, "install"),
        }
    }
}

impl CoreError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            CoreError::NotFound(_) => ErrorKind::NotFound,
            CoreError::Invalid { .. } => ErrorKind::Invalid,
            CoreError::SourceUnavailable(_) => ErrorKind::SourceUnavailable,
            CoreError::Busy(_) => ErrorKind::Busy,
            CoreError::TimedOut { .. } => ErrorKind::TimedOut,
            CoreError::Cancelled { .. } => ErrorKind::Cancelled,
            CoreError::InstallFailed { .. } => ErrorKind::InstallFailed,
            CoreError::UninstallFailed { .. } => ErrorKind::UninstallFailed,
            CoreError::RestartIncomplete { .. } => ErrorKind::Partial,
            CoreError::Internal(_) => ErrorKind::Internal,
        }
    }

    /// For a partial restart, the error of the phase that stopped it.
    pub fn phase_error(&self) -> Option<(RestartPhase, &CoreError)> {
        match self {
            CoreError::RestartIncomplete { phase, source, .. } => Some((*phase, source)),
            _ => None,
        }
    }
}

impl From<CatalogError> for CoreError {
    fn from(e: CatalogError) -> Self {
        match e {
            CatalogError::NotFound(name) => CoreError::NotFound(name),
            CatalogError::Invalid { name, reason } => CoreError::Invalid { name, reason },
            CatalogError::SourceUnavailable(reason) => CoreError::SourceUnavailable(reason),
        }
    }
}
