//! Error taxonomy for compiling and running plans
//!
//! Compile-time errors abort before any step runs. Runtime errors are fatal
//! to the remainder of the plan and are never retried by the engine.

use crate::spec::ResourceKind;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Flat classification of every error the engine can report
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    // Compile time
    MissingVariable,
    TypeMismatch,
    InvalidSpec,
    // Runtime
    PackageManagerError,
    IdentityConflict,
    UnknownGroup,
    AccountError,
    PathIsFile,
    PayloadNotFound,
    Io,
    BuildFailure,
    ServiceStartFailure,
    UndefinedVariable,
    TemplateNotFound,
    /// Produced by callers that put a deadline on a run
    Timeout,
}

impl ErrorKind {
    /// Whether this kind is raised before any step executes
    pub fn is_compile_time(&self) -> bool {
        matches!(
            self,
            Self::MissingVariable | Self::TypeMismatch | Self::InvalidSpec
        )
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Plan compilation failure, identifying the offending spec by declaration index
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CompileError {
    #[error("spec #{index}: missing variable '{variable}'")]
    MissingVariable { index: usize, variable: String },

    #[error("spec #{index}: variable '{variable}' must be {expected}, found {found}")]
    TypeMismatch {
        index: usize,
        variable: String,
        expected: &'static str,
        found: &'static str,
    },

    #[error("spec #{index} ({kind}): {reason}")]
    InvalidSpec {
        index: usize,
        kind: ResourceKind,
        reason: String,
    },
}

impl CompileError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::MissingVariable { .. } => ErrorKind::MissingVariable,
            Self::TypeMismatch { .. } => ErrorKind::TypeMismatch,
            Self::InvalidSpec { .. } => ErrorKind::InvalidSpec,
        }
    }

    /// Declaration index of the spec that failed
    pub fn index(&self) -> usize {
        match self {
            Self::MissingVariable { index, .. }
            | Self::TypeMismatch { index, .. }
            | Self::InvalidSpec { index, .. } => *index,
        }
    }
}

/// Template rendering failure
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RenderError {
    #[error("template '{template}' references undefined variable '{variable}'")]
    UndefinedVariable { template: String, variable: String },

    #[error("template not found: {template}")]
    TemplateNotFound { template: String },
}

impl RenderError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::UndefinedVariable { .. } => ErrorKind::UndefinedVariable,
            Self::TemplateNotFound { .. } => ErrorKind::TemplateNotFound,
        }
    }
}

/// Fatal failure while converging a single step
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("package manager error: {message}")]
    PackageManager { message: String },

    #[error("{entity} '{name}' conflicts with existing state: {detail}")]
    IdentityConflict {
        entity: &'static str,
        name: String,
        detail: String,
    },

    #[error("primary group '{group}' of user '{user}' does not exist")]
    UnknownGroup { user: String, group: String },

    #[error("account database error: {message}")]
    Account { message: String },

    #[error("path exists and is not a directory: {}", path.display())]
    PathIsFile { path: PathBuf },

    #[error("payload not found: {name}")]
    PayloadNotFound { name: String },

    #[error("{}: {message}", path.display())]
    Io { path: PathBuf, message: String },

    #[error("build failed in {}: {diagnostic}", project.display())]
    BuildFailure { project: PathBuf, diagnostic: String },

    #[error("services failed to start in {}: {diagnostic}", project.display())]
    ServiceStartFailure { project: PathBuf, diagnostic: String },

    #[error(transparent)]
    Render(#[from] RenderError),
}

impl BackendError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::PackageManager { .. } => ErrorKind::PackageManagerError,
            Self::IdentityConflict { .. } => ErrorKind::IdentityConflict,
            Self::UnknownGroup { .. } => ErrorKind::UnknownGroup,
            Self::Account { .. } => ErrorKind::AccountError,
            Self::PathIsFile { .. } => ErrorKind::PathIsFile,
            Self::PayloadNotFound { .. } => ErrorKind::PayloadNotFound,
            Self::Io { .. } => ErrorKind::Io,
            Self::BuildFailure { .. } => ErrorKind::BuildFailure,
            Self::ServiceStartFailure { .. } => ErrorKind::ServiceStartFailure,
            Self::Render(e) => e.kind(),
        }
    }

    /// Wrap a filesystem collaborator failure
    pub fn io(path: impl Into<PathBuf>, err: &anyhow::Error) -> Self {
        Self::Io {
            path: path.into(),
            message: format!("{err:#}"),
        }
    }

    /// Record whether the step had already modified the host when it failed
    pub fn with_changed(self, changed: bool) -> StepFailure {
        StepFailure {
            changed,
            error: self,
        }
    }
}

/// A failed step, remembering any change made before the failure
///
/// A container build that succeeds before its services fail to start still
/// changed the host.
#[derive(Debug, Error)]
#[error("{error}")]
pub struct StepFailure {
    pub changed: bool,
    pub error: BackendError,
}

impl StepFailure {
    pub fn kind(&self) -> ErrorKind {
        self.error.kind()
    }
}

impl From<BackendError> for StepFailure {
    fn from(error: BackendError) -> Self {
        error.with_changed(false)
    }
}

impl From<RenderError> for StepFailure {
    fn from(error: RenderError) -> Self {
        BackendError::from(error).into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compile_error_index_and_kind() {
        let err = CompileError::TypeMismatch {
            index: 3,
            variable: "uid".to_string(),
            expected: "string",
            found: "boolean",
        };
        assert_eq!(err.index(), 3);
        assert_eq!(err.kind(), ErrorKind::TypeMismatch);
        assert!(err.kind().is_compile_time());
        assert_eq!(
            err.to_string(),
            "spec #3: variable 'uid' must be string, found boolean"
        );
    }

    #[test]
    fn test_render_error_kind_passes_through_backend_error() {
        let err: BackendError = RenderError::TemplateNotFound {
            template: "compose.yml".to_string(),
        }
        .into();
        assert_eq!(err.kind(), ErrorKind::TemplateNotFound);
        assert_eq!(err.to_string(), "template not found: compose.yml");
    }

    #[test]
    fn test_step_failure_keeps_changed_flag() {
        let err = BackendError::PayloadNotFound {
            name: "serial_bridge.py".to_string(),
        };
        let failure = err.with_changed(true);
        assert!(failure.changed);
        assert_eq!(failure.kind(), ErrorKind::PayloadNotFound);
        assert_eq!(failure.to_string(), "payload not found: serial_bridge.py");

        let failure: StepFailure = BackendError::Account {
            message: "getent: permission denied".to_string(),
        }
        .into();
        assert!(!failure.changed);
    }

    #[test]
    fn test_diagnostic_text_untouched() {
        let diagnostic = "failed to solve: process \"/bin/sh -c pip install\" exit code: 1\n";
        let err = BackendError::BuildFailure {
            project: PathBuf::from("/opt/app"),
            diagnostic: diagnostic.to_string(),
        };
        match err {
            BackendError::BuildFailure { diagnostic: d, .. } => assert_eq!(d, diagnostic),
            _ => unreachable!(),
        }
    }
}
