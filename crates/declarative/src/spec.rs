//! Resource specifications - what a role declares about the host
//!
//! A [`ResourceSpec`] is the unresolved, declarative form: attributes that
//! come from the variable context are still [`Param::Var`] references.
//! The planner resolves them into [`crate::types::Desired`] values.

use crate::vars::{FromVariable, ResolveError, VariableContext};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

/// An attribute that is either written literally or looked up in the variable context
///
/// In TOML a reference is written as an inline table:
///
/// ```toml
/// gid = { var = "radio_bridge_uid_gid" }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Param<T> {
    /// Reference to a variable supplied at compile time
    Var { var: String },
    /// Literal value
    Value(T),
}

impl<T> Param<T> {
    /// Create a reference to a variable
    pub fn var(name: impl Into<String>) -> Self {
        Self::Var { var: name.into() }
    }

    /// Name of the referenced variable, if this is a reference
    pub fn variable(&self) -> Option<&str> {
        match self {
            Self::Var { var } => Some(var),
            Self::Value(_) => None,
        }
    }
}

impl<T: FromVariable + Clone> Param<T> {
    /// Resolve against a variable context
    pub fn resolve(&self, vars: &VariableContext) -> Result<T, ResolveError> {
        match self {
            Self::Value(value) => Ok(value.clone()),
            Self::Var { var } => vars.get_as(var),
        }
    }
}

impl<T> From<T> for Param<T> {
    fn from(value: T) -> Self {
        Self::Value(value)
    }
}

/// Resource kind category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    PackageSet,
    Group,
    User,
    Directory,
    FileCopy,
    TemplateRender,
    ContainerService,
}

impl ResourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PackageSet => "package_set",
            Self::Group => "group",
            Self::User => "user",
            Self::Directory => "directory",
            Self::FileCopy => "file_copy",
            Self::TemplateRender => "template_render",
            Self::ContainerService => "container_service",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One desired-state assertion, as declared by a role
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ResourceSpec {
    PackageSet(PackageSetSpec),
    Group(GroupSpec),
    User(UserSpec),
    Directory(DirectorySpec),
    FileCopy(FileCopySpec),
    TemplateRender(TemplateRenderSpec),
    ContainerService(ContainerServiceSpec),
}

impl ResourceSpec {
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
}

/// Packages that must be installed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageSetSpec {
    pub names: Vec<String>,
    /// Refresh the package index before installing anything
    #[serde(default)]
    pub update_cache: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupSpec {
    pub name: String,
    pub gid: Param<u32>,
    #[serde(default)]
    pub system: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserSpec {
    pub name: String,
    pub uid: Param<u32>,
    pub primary_group: String,
    #[serde(default)]
    pub shell: Option<Param<String>>,
    #[serde(default)]
    pub home: Option<PathBuf>,
    #[serde(default)]
    pub create_home: bool,
    #[serde(default)]
    pub system: bool,
}

/// A directory (and all of its parents)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectorySpec {
    pub path: PathBuf,
}

/// Static payloads placed at destination paths
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileCopySpec {
    pub files: Vec<FileEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileEntry {
    /// Payload name, resolved by a [`crate::PayloadSource`]
    pub src: String,
    pub dest: PathBuf,
}

/// A template rendered to a destination path
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TemplateRenderSpec {
    /// Template identifier, resolved by a [`crate::TemplateSource`]
    pub template: String,
    pub dest: PathBuf,
    /// Template-local variables, layered over the whole variable context
    #[serde(default)]
    pub variables: BTreeMap<String, Param<Value>>,
}

/// A containerized project whose services must be running
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerServiceSpec {
    pub project_path: PathBuf,
    #[serde(default)]
    pub build_required: bool,
}
