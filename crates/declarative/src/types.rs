//! Core types: resolved desired state, step outcomes and run reports

use crate::error::ErrorKind;
use crate::spec::ResourceKind;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::Output;

/// Packages that must be installed
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PackageSet {
    pub names: Vec<String>,
    pub update_cache: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Group {
    pub name: String,
    pub gid: u32,
    pub system: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct User {
    pub name: String,
    pub uid: u32,
    pub primary_group: String,
    pub shell: Option<String>,
    pub home: Option<PathBuf>,
    pub create_home: bool,
    pub system: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Directory {
    pub path: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FilePlacement {
    pub src: String,
    pub dest: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileCopy {
    pub files: Vec<FilePlacement>,
}

/// A template with its fully resolved render context
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TemplateRender {
    pub template: String,
    pub dest: PathBuf,
    pub variables: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ContainerService {
    pub project_path: PathBuf,
    pub build_required: bool,
}

/// Resolved desired state for one step
///
/// Produced only by the planner; a compiled step never changes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Desired {
    PackageSet(PackageSet),
    Group(Group),
    User(User),
    Directory(Directory),
    FileCopy(FileCopy),
    TemplateRender(TemplateRender),
    ContainerService(ContainerService),
}

impl Desired {
    pub fn kind(&self) -> ResourceKind {
        match self {
            Self::PackageSet(_) => ResourceKind::PackageSet,
            Self::Group(_) => ResourceKind::Group,
            Self::User(_) => ResourceKind::User,
            Self::Directory(_) => ResourceKind::Directory,
            Self::FileCopy(_) => ResourceKind::FileCopy,
            Self::TemplateRender(_) => ResourceKind::TemplateRender,
            Self::ContainerService(_) => ResourceKind::ContainerService,
        }
    }

    /// Short identifier for display, e.g. "radio-bridge" or "/opt/app"
    pub fn id(&self) -> String {
        match self {
            Self::PackageSet(p) => p.names.join(", "),
            Self::Group(g) => g.name.clone(),
            Self::User(u) => u.name.clone(),
            Self::Directory(d) => d.path.display().to_string(),
            Self::FileCopy(f) => f
                .files
                .iter()
                .map(|p| p.dest.display().to_string())
                .collect::<Vec<_>>()
                .join(", "),
            Self::TemplateRender(t) => t.dest.display().to_string(),
            Self::ContainerService(c) => c.project_path.display().to_string(),
        }
    }

    /// Human-readable description of the assertion
    pub fn description(&self) -> String {
        match self {
            Self::PackageSet(p) => format!("Install packages: {}", p.names.join(", ")),
            Self::Group(g) => format!("Group {} (gid {})", g.name, g.gid),
            Self::User(u) => format!(
                "User {} (uid {}, group {})",
                u.name, u.uid, u.primary_group
            ),
            Self::Directory(d) => format!("Directory {}", d.path.display()),
            Self::FileCopy(f) => format!("Copy {} file(s)", f.files.len()),
            Self::TemplateRender(t) => {
                format!("Render {} -> {}", t.template, t.dest.display())
            }
            Self::ContainerService(c) => format!(
                "Containers in {}{}",
                c.project_path.display(),
                if c.build_required { " (build)" } else { "" }
            ),
        }
    }
}

/// Error attached to a failed step
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorInfo {
    pub kind: ErrorKind,
    pub message: String,
}

/// Outcome of one executed step
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepResult {
    /// Declaration index of the spec this step came from
    pub spec_index: usize,
    pub kind: ResourceKind,
    pub id: String,
    pub changed: bool,
    pub error: Option<ErrorInfo>,
}

impl StepResult {
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

/// Result of running a plan, created fresh per run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunReport {
    pub steps: Vec<StepResult>,
    pub succeeded: bool,
    pub any_changed: bool,
}

impl Default for RunReport {
    fn default() -> Self {
        Self::new()
    }
}

impl RunReport {
    /// An empty report; an empty plan trivially succeeds
    pub fn new() -> Self {
        Self {
            steps: Vec::new(),
            succeeded: true,
            any_changed: false,
        }
    }

    /// The step that halted the run, if any
    pub fn failure(&self) -> Option<&StepResult> {
        self.steps.iter().find(|s| s.error.is_some())
    }

    /// Number of steps that changed the host
    pub fn changed_count(&self) -> usize {
        self.steps.iter().filter(|s| s.changed).count()
    }

    /// Number of steps already converged
    pub fn unchanged_count(&self) -> usize {
        self.steps
            .iter()
            .filter(|s| s.is_success() && !s.changed)
            .count()
    }

    /// Append a step result and refresh the overall flags
    pub fn push(&mut self, result: StepResult) {
        self.any_changed |= result.changed;
        self.steps.push(result);
        self.succeeded = self.steps.iter().all(StepResult::is_success);
    }
}

/// Output from a collaborator command
#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub success: bool,
}

impl From<Output> for CommandOutput {
    fn from(output: Output) -> Self {
        Self {
            stdout: output.stdout,
            stderr: output.stderr,
            success: output.status.success(),
        }
    }
}

impl CommandOutput {
    /// Get stdout as a string
    pub fn stdout_str(&self) -> String {
        String::from_utf8_lossy(&self.stdout).to_string()
    }

    /// Get stderr as a string
    pub fn stderr_str(&self) -> String {
        String::from_utf8_lossy(&self.stderr).to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn step(index: usize, changed: bool, failed: bool) -> StepResult {
        StepResult {
            spec_index: index,
            kind: ResourceKind::Directory,
            id: format!("/tmp/{index}"),
            changed,
            error: failed.then(|| ErrorInfo {
                kind: ErrorKind::PathIsFile,
                message: "path exists and is not a directory".to_string(),
            }),
        }
    }

    #[test]
    fn test_report_flags() {
        let mut report = RunReport::default();
        report.push(step(0, false, false));
        assert!(report.succeeded);
        assert!(!report.any_changed);

        report.push(step(1, true, false));
        assert!(report.succeeded);
        assert!(report.any_changed);
        assert_eq!(report.changed_count(), 1);
        assert_eq!(report.unchanged_count(), 1);

        report.push(step(2, false, true));
        assert!(!report.succeeded);
        assert_eq!(report.failure().map(|s| s.spec_index), Some(2));
    }

    #[test]
    fn test_desired_identity() {
        let desired = Desired::Group(Group {
            name: "radio-bridge".to_string(),
            gid: 900,
            system: true,
        });
        assert_eq!(desired.kind(), ResourceKind::Group);
        assert_eq!(desired.id(), "radio-bridge");
        assert_eq!(desired.description(), "Group radio-bridge (gid 900)");
    }
}
