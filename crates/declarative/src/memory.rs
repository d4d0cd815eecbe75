//! In-memory host for tests and simulations
//!
//! [`MemoryHost`] implements every collaborator trait against plain data
//! structures, counts calls per operation, and can be told to fail a given
//! operation. Nothing here touches the real machine.

use crate::backend::{
    AccountDatabase, ContainerRuntime, Convergers, FileKind, Filesystem, GroupEntry,
    PackageManager, PayloadSource, UserEntry,
};
use crate::template::TemplateStore;
use crate::types::{Group, User};
use anyhow::{Result, anyhow, bail};
use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

/// Convergers wired to a [`MemoryHost`]
pub type MemoryConvergers<'h> = Convergers<
    &'h MemoryHost,
    &'h MemoryHost,
    &'h MemoryHost,
    &'h MemoryHost,
    &'h TemplateStore,
    &'h MemoryHost,
>;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Node {
    Dir,
    File(Vec<u8>),
}

#[derive(Debug, Clone, Default)]
struct Project {
    services: Vec<String>,
    running: BTreeSet<String>,
    images: Vec<String>,
    /// Bumped whenever the build context changes
    revision: u32,
    built_revision: Option<u32>,
    /// Services that refuse to start
    broken: BTreeSet<String>,
}

#[derive(Debug, Default)]
struct State {
    packages: BTreeSet<String>,
    groups: Vec<GroupEntry>,
    users: Vec<UserEntry>,
    nodes: BTreeMap<PathBuf, Node>,
    projects: BTreeMap<PathBuf, Project>,
    calls: BTreeMap<&'static str, usize>,
    failures: BTreeMap<&'static str, String>,
}

/// A simulated host
#[derive(Debug)]
pub struct MemoryHost {
    state: RefCell<State>,
    payloads: BTreeMap<String, Vec<u8>>,
    templates: TemplateStore,
}

impl Default for MemoryHost {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryHost {
    /// A fresh host with only `/` present
    pub fn new() -> Self {
        let mut state = State::default();
        state.nodes.insert(PathBuf::from("/"), Node::Dir);
        Self {
            state: RefCell::new(state),
            payloads: BTreeMap::new(),
            templates: TemplateStore::new(),
        }
    }

    pub fn with_payload(mut self, name: &str, contents: impl Into<Vec<u8>>) -> Self {
        self.payloads.insert(name.to_string(), contents.into());
        self
    }

    pub fn with_template(mut self, id: &str, source: &str) -> Self {
        self.templates.insert(id, source);
        self
    }

    /// Register a container project and the services its descriptor declares
    pub fn with_project(self, path: impl AsRef<Path>, services: &[&str]) -> Self {
        self.state.borrow_mut().projects.insert(
            path.as_ref().to_path_buf(),
            Project {
                services: services.iter().map(ToString::to_string).collect(),
                ..Project::default()
            },
        );
        self
    }

    pub fn templates(&self) -> &TemplateStore {
        &self.templates
    }

    /// Convergers backed by this host
    pub fn convergers(&self) -> MemoryConvergers<'_> {
        Convergers::new(self, self, self, self, &self.templates, self)
    }

    /// Make the named operation fail with `message` until cleared
    pub fn fail(&self, operation: &'static str, message: &str) {
        self.state
            .borrow_mut()
            .failures
            .insert(operation, message.to_string());
    }

    pub fn clear_failures(&self) {
        self.state.borrow_mut().failures.clear();
    }

    /// Number of calls made to an operation
    pub fn calls(&self, operation: &str) -> usize {
        self.state
            .borrow()
            .calls
            .get(operation)
            .copied()
            .unwrap_or(0)
    }

    /// Total number of mutating operations performed
    pub fn mutations(&self) -> usize {
        const MUTATING: [&str; 9] = [
            "refresh",
            "install",
            "create_group",
            "create_user",
            "modify_user",
            "create_dir_all",
            "write",
            "build",
            "start",
        ];
        MUTATING.iter().map(|op| self.calls(op)).sum()
    }

    pub fn add_group(&self, name: &str, gid: u32) {
        self.state.borrow_mut().groups.push(GroupEntry {
            name: name.to_string(),
            gid,
        });
    }

    pub fn add_user(&self, name: &str, uid: u32, gid: u32) {
        self.state.borrow_mut().users.push(UserEntry {
            name: name.to_string(),
            uid,
            gid,
            home: PathBuf::from(format!("/home/{name}")),
            shell: "/bin/sh".to_string(),
        });
    }

    pub fn add_package(&self, name: &str) {
        self.state.borrow_mut().packages.insert(name.to_string());
    }

    pub fn has_package(&self, name: &str) -> bool {
        self.state.borrow().packages.contains(name)
    }

    pub fn group(&self, name: &str) -> Option<GroupEntry> {
        self.state
            .borrow()
            .groups
            .iter()
            .find(|g| g.name == name)
            .cloned()
    }

    pub fn user(&self, name: &str) -> Option<UserEntry> {
        self.state
            .borrow()
            .users
            .iter()
            .find(|u| u.name == name)
            .cloned()
    }

    /// Place a file directly, bypassing the filesystem trait
    pub fn put_file(&self, path: impl AsRef<Path>, contents: impl Into<Vec<u8>>) {
        self.state
            .borrow_mut()
            .nodes
            .insert(path.as_ref().to_path_buf(), Node::File(contents.into()));
    }

    pub fn file(&self, path: impl AsRef<Path>) -> Option<Vec<u8>> {
        match self.state.borrow().nodes.get(path.as_ref()) {
            Some(Node::File(contents)) => Some(contents.clone()),
            _ => None,
        }
    }

    pub fn is_dir(&self, path: impl AsRef<Path>) -> bool {
        matches!(self.state.borrow().nodes.get(path.as_ref()), Some(Node::Dir))
    }

    /// Simulate an edit to a project's build context
    pub fn touch_build_context(&self, project: impl AsRef<Path>) {
        if let Some(p) = self.state.borrow_mut().projects.get_mut(project.as_ref()) {
            p.revision += 1;
        }
    }

    /// Simulate a service crashing
    pub fn stop_service(&self, project: impl AsRef<Path>, service: &str) {
        if let Some(p) = self.state.borrow_mut().projects.get_mut(project.as_ref()) {
            p.running.remove(service);
        }
    }

    /// Make a service fail to come up
    pub fn break_service(&self, project: impl AsRef<Path>, service: &str) {
        if let Some(p) = self.state.borrow_mut().projects.get_mut(project.as_ref()) {
            p.broken.insert(service.to_string());
        }
    }

    pub fn running_services_of(&self, project: impl AsRef<Path>) -> Vec<String> {
        self.state
            .borrow()
            .projects
            .get(project.as_ref())
            .map(|p| p.running.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Count a call and fail it if requested
    fn record(&self, operation: &'static str) -> Result<()> {
        let mut state = self.state.borrow_mut();
        *state.calls.entry(operation).or_insert(0) += 1;
        match state.failures.get(operation) {
            Some(message) => Err(anyhow!("{message}")),
            None => Ok(()),
        }
    }

    fn with_project_mut<T>(
        &self,
        path: &Path,
        f: impl FnOnce(&mut Project) -> Result<T>,
    ) -> Result<T> {
        let mut state = self.state.borrow_mut();
        let project = state
            .projects
            .get_mut(path)
            .ok_or_else(|| anyhow!("no composition descriptor in {}", path.display()))?;
        f(project)
    }
}

impl PackageManager for MemoryHost {
    fn is_installed(&self, name: &str) -> Result<bool> {
        self.record("is_installed")?;
        Ok(self.has_package(name))
    }

    fn refresh(&self) -> Result<()> {
        self.record("refresh")
    }

    fn install(&self, names: &[String]) -> Result<()> {
        self.record("install")?;
        let mut state = self.state.borrow_mut();
        for name in names {
            state.packages.insert(name.clone());
        }
        Ok(())
    }
}

impl AccountDatabase for MemoryHost {
    fn group_by_name(&self, name: &str) -> Result<Option<GroupEntry>> {
        self.record("group_by_name")?;
        Ok(self.group(name))
    }

    fn group_by_gid(&self, gid: u32) -> Result<Option<GroupEntry>> {
        self.record("group_by_gid")?;
        Ok(self
            .state
            .borrow()
            .groups
            .iter()
            .find(|g| g.gid == gid)
            .cloned())
    }

    fn user_by_name(&self, name: &str) -> Result<Option<UserEntry>> {
        self.record("user_by_name")?;
        Ok(self.user(name))
    }

    fn user_by_uid(&self, uid: u32) -> Result<Option<UserEntry>> {
        self.record("user_by_uid")?;
        Ok(self
            .state
            .borrow()
            .users
            .iter()
            .find(|u| u.uid == uid)
            .cloned())
    }

    fn create_group(&self, group: &Group) -> Result<()> {
        self.record("create_group")?;
        self.add_group(&group.name, group.gid);
        Ok(())
    }

    fn create_user(&self, user: &User, gid: u32) -> Result<()> {
        self.record("create_user")?;
        self.state.borrow_mut().users.push(UserEntry {
            name: user.name.clone(),
            uid: user.uid,
            gid,
            home: user
                .home
                .clone()
                .unwrap_or_else(|| PathBuf::from(format!("/home/{}", user.name))),
            shell: user.shell.clone().unwrap_or_else(|| "/bin/sh".to_string()),
        });
        Ok(())
    }

    fn modify_user(&self, user: &User, gid: u32) -> Result<()> {
        self.record("modify_user")?;
        let mut state = self.state.borrow_mut();
        let entry = state
            .users
            .iter_mut()
            .find(|u| u.name == user.name)
            .ok_or_else(|| anyhow!("user {} does not exist", user.name))?;
        entry.gid = gid;
        if let Some(shell) = &user.shell {
            entry.shell.clone_from(shell);
        }
        if let Some(home) = &user.home {
            entry.home.clone_from(home);
        }
        Ok(())
    }
}

impl Filesystem for MemoryHost {
    fn kind(&self, path: &Path) -> Result<Option<FileKind>> {
        self.record("kind")?;
        Ok(match self.state.borrow().nodes.get(path) {
            Some(Node::Dir) => Some(FileKind::Directory),
            Some(Node::File(_)) => Some(FileKind::File),
            None => None,
        })
    }

    fn create_dir_all(&self, path: &Path) -> Result<()> {
        self.record("create_dir_all")?;
        let mut state = self.state.borrow_mut();
        let mut missing = Vec::new();
        for ancestor in path.ancestors() {
            match state.nodes.get(ancestor) {
                Some(Node::Dir) => break,
                Some(Node::File(_)) => bail!("{} is not a directory", ancestor.display()),
                None => missing.push(ancestor.to_path_buf()),
            }
        }
        for dir in missing {
            state.nodes.insert(dir, Node::Dir);
        }
        Ok(())
    }

    fn read(&self, path: &Path) -> Result<Option<Vec<u8>>> {
        self.record("read")?;
        match self.state.borrow().nodes.get(path) {
            Some(Node::File(contents)) => Ok(Some(contents.clone())),
            Some(Node::Dir) => bail!("{} is a directory", path.display()),
            None => Ok(None),
        }
    }

    fn write(&self, path: &Path, contents: &[u8]) -> Result<()> {
        self.record("write")?;
        let mut state = self.state.borrow_mut();
        let parent_is_dir = path
            .parent()
            .is_some_and(|p| matches!(state.nodes.get(p), Some(Node::Dir)));
        if !parent_is_dir {
            bail!("parent directory of {} does not exist", path.display());
        }
        if matches!(state.nodes.get(path), Some(Node::Dir)) {
            bail!("{} is a directory", path.display());
        }
        state
            .nodes
            .insert(path.to_path_buf(), Node::File(contents.to_vec()));
        Ok(())
    }
}

impl PayloadSource for MemoryHost {
    fn payload(&self, name: &str) -> Result<Option<Vec<u8>>> {
        self.record("payload")?;
        Ok(self.payloads.get(name).cloned())
    }
}

impl ContainerRuntime for MemoryHost {
    fn image_ids(&self, project: &Path) -> Result<Vec<String>> {
        self.record("image_ids")?;
        self.with_project_mut(project, |p| Ok(p.images.clone()))
    }

    fn build(&self, project: &Path) -> Result<()> {
        self.record("build")?;
        self.with_project_mut(project, |p| {
            if p.built_revision != Some(p.revision) {
                p.images = p
                    .services
                    .iter()
                    .map(|s| format!("sha256:{s}-r{}", p.revision))
                    .collect();
                p.built_revision = Some(p.revision);
            }
            Ok(())
        })
    }

    fn declared_services(&self, project: &Path) -> Result<Vec<String>> {
        self.record("declared_services")?;
        self.with_project_mut(project, |p| Ok(p.services.clone()))
    }

    fn running_services(&self, project: &Path) -> Result<Vec<String>> {
        self.record("running_services")?;
        self.with_project_mut(project, |p| Ok(p.running.iter().cloned().collect()))
    }

    fn start(&self, project: &Path) -> Result<()> {
        self.record("start")?;
        self.with_project_mut(project, |p| {
            for service in &p.services {
                if !p.broken.contains(service) {
                    p.running.insert(service.clone());
                }
            }
            Ok(())
        })
    }
}
