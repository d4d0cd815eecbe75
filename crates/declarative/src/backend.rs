//! Backends - one convergence routine per resource kind
//!
//! Every backend implements the same capability, [`Backend::ensure`]:
//! inspect current state, apply the minimal action, report whether anything
//! changed. Calling `ensure` twice with the same desired state and no
//! outside interference reports `true` then `false`. A failure still reports
//! whether the host was modified before it happened.
//!
//! The convergers here hold the decision logic. Talking to the real host
//! goes through narrow collaborator traits ([`PackageManager`],
//! [`AccountDatabase`], [`Filesystem`], [`PayloadSource`],
//! [`ContainerRuntime`]) which return `anyhow` errors; convergers translate
//! those into the typed [`BackendError`] taxonomy.

use crate::error::{BackendError, StepFailure};
use crate::template::Renderer;
use crate::types::{
    ContainerService, Desired, Directory, FileCopy, FilePlacement, Group, PackageSet,
    TemplateRender, User,
};
use anyhow::Result;
use std::path::{Path, PathBuf};

/// Converge one resource kind
pub trait Backend<D> {
    /// Bring the host to `desired`, returning whether a change was made
    fn ensure(&self, desired: &D) -> Result<bool, StepFailure>;
}

// ============================================================================
// Collaborators
// ============================================================================

/// Package manager client
pub trait PackageManager {
    fn is_installed(&self, name: &str) -> Result<bool>;

    /// Refresh the package index
    fn refresh(&self) -> Result<()>;

    fn install(&self, names: &[String]) -> Result<()>;
}

/// A group as recorded in the account database
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupEntry {
    pub name: String,
    pub gid: u32,
}

/// A user as recorded in the account database
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserEntry {
    pub name: String,
    pub uid: u32,
    pub gid: u32,
    pub home: PathBuf,
    pub shell: String,
}

/// System group and user database
pub trait AccountDatabase {
    fn group_by_name(&self, name: &str) -> Result<Option<GroupEntry>>;
    fn group_by_gid(&self, gid: u32) -> Result<Option<GroupEntry>>;
    fn user_by_name(&self, name: &str) -> Result<Option<UserEntry>>;
    fn user_by_uid(&self, uid: u32) -> Result<Option<UserEntry>>;
    fn create_group(&self, group: &Group) -> Result<()>;

    /// Create a user whose primary group has already been resolved to `gid`
    fn create_user(&self, user: &User, gid: u32) -> Result<()>;

    /// Update primary group, shell and home of an existing user
    fn modify_user(&self, user: &User, gid: u32) -> Result<()>;
}

/// What occupies a path
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    Directory,
    File,
    Other,
}

/// Byte-level filesystem access
pub trait Filesystem {
    /// Kind of the entry at `path`, `None` if nothing exists there
    fn kind(&self, path: &Path) -> Result<Option<FileKind>>;

    /// Create a directory and all missing parents
    fn create_dir_all(&self, path: &Path) -> Result<()>;

    /// Contents of a file, `None` if it does not exist
    fn read(&self, path: &Path) -> Result<Option<Vec<u8>>>;

    fn write(&self, path: &Path, contents: &[u8]) -> Result<()>;
}

/// Named static payloads (a Dockerfile, a lockfile, a script)
pub trait PayloadSource {
    fn payload(&self, name: &str) -> Result<Option<Vec<u8>>>;
}

/// Container build and orchestration client
///
/// Error text returned from `build` and `start` is passed to the caller as-is.
pub trait ContainerRuntime {
    /// Identifiers of the images currently built for the project
    fn image_ids(&self, project: &Path) -> Result<Vec<String>>;
    fn build(&self, project: &Path) -> Result<()>;
    /// Services the project's composition descriptor declares
    fn declared_services(&self, project: &Path) -> Result<Vec<String>>;
    fn running_services(&self, project: &Path) -> Result<Vec<String>>;
    /// Start (or recreate) the project's services
    fn start(&self, project: &Path) -> Result<()>;
}

// Borrowed collaborators work wherever owned ones do.

impl<T: PackageManager + ?Sized> PackageManager for &T {
    fn is_installed(&self, name: &str) -> Result<bool> {
        (**self).is_installed(name)
    }

    fn refresh(&self) -> Result<()> {
        (**self).refresh()
    }

    fn install(&self, names: &[String]) -> Result<()> {
        (**self).install(names)
    }
}

impl<T: AccountDatabase + ?Sized> AccountDatabase for &T {
    fn group_by_name(&self, name: &str) -> Result<Option<GroupEntry>> {
        (**self).group_by_name(name)
    }

    fn group_by_gid(&self, gid: u32) -> Result<Option<GroupEntry>> {
        (**self).group_by_gid(gid)
    }

    fn user_by_name(&self, name: &str) -> Result<Option<UserEntry>> {
        (**self).user_by_name(name)
    }

    fn user_by_uid(&self, uid: u32) -> Result<Option<UserEntry>> {
        (**self).user_by_uid(uid)
    }

    fn create_group(&self, group: &Group) -> Result<()> {
        (**self).create_group(group)
    }

    fn create_user(&self, user: &User, gid: u32) -> Result<()> {
        (**self).create_user(user, gid)
    }

    fn modify_user(&self, user: &User, gid: u32) -> Result<()> {
        (**self).modify_user(user, gid)
    }
}

impl<T: Filesystem + ?Sized> Filesystem for &T {
    fn kind(&self, path: &Path) -> Result<Option<FileKind>> {
        (**self).kind(path)
    }

    fn create_dir_all(&self, path: &Path) -> Result<()> {
        (**self).create_dir_all(path)
    }

    fn read(&self, path: &Path) -> Result<Option<Vec<u8>>> {
        (**self).read(path)
    }

    fn write(&self, path: &Path, contents: &[u8]) -> Result<()> {
        (**self).write(path, contents)
    }
}

impl<T: PayloadSource + ?Sized> PayloadSource for &T {
    fn payload(&self, name: &str) -> Result<Option<Vec<u8>>> {
        (**self).payload(name)
    }
}

impl<T: ContainerRuntime + ?Sized> ContainerRuntime for &T {
    fn image_ids(&self, project: &Path) -> Result<Vec<String>> {
        (**self).image_ids(project)
    }

    fn build(&self, project: &Path) -> Result<()> {
        (**self).build(project)
    }

    fn declared_services(&self, project: &Path) -> Result<Vec<String>> {
        (**self).declared_services(project)
    }

    fn running_services(&self, project: &Path) -> Result<Vec<String>> {
        (**self).running_services(project)
    }

    fn start(&self, project: &Path) -> Result<()> {
        (**self).start(project)
    }
}

// ============================================================================
// Packages
// ============================================================================

pub struct PackageConverger<M> {
    manager: M,
}

impl<M: PackageManager> PackageConverger<M> {
    pub fn new(manager: M) -> Self {
        Self { manager }
    }
}

impl<M: PackageManager> Backend<PackageSet> for PackageConverger<M> {
    fn ensure(&self, desired: &PackageSet) -> Result<bool, StepFailure> {
        let package_error = |e: anyhow::Error| BackendError::PackageManager {
            message: format!("{e:#}"),
        };

        let mut missing = Vec::new();
        for name in &desired.names {
            if !self.manager.is_installed(name).map_err(package_error)? {
                missing.push(name.clone());
            }
        }

        if missing.is_empty() {
            log::debug!("packages already installed: {}", desired.names.join(", "));
            return Ok(false);
        }

        if desired.update_cache {
            self.manager.refresh().map_err(package_error)?;
        }

        log::info!("installing packages: {}", missing.join(", "));
        self.manager.install(&missing).map_err(package_error)?;
        Ok(true)
    }
}

// ============================================================================
// Groups and users
// ============================================================================

pub struct IdentityConverger<A> {
    accounts: A,
}

impl<A: AccountDatabase> IdentityConverger<A> {
    pub fn new(accounts: A) -> Self {
        Self { accounts }
    }
}

fn account_error(e: anyhow::Error) -> BackendError {
    BackendError::Account {
        message: format!("{e:#}"),
    }
}

impl<A: AccountDatabase> Backend<Group> for IdentityConverger<A> {
    fn ensure(&self, desired: &Group) -> Result<bool, StepFailure> {
        let conflict = |detail: String| BackendError::IdentityConflict {
            entity: "group",
            name: desired.name.clone(),
            detail,
        };

        if let Some(existing) = self
            .accounts
            .group_by_name(&desired.name)
            .map_err(account_error)?
        {
            if existing.gid == desired.gid {
                return Ok(false);
            }
            return Err(conflict(format!(
                "exists with gid {}, wanted {}",
                existing.gid, desired.gid
            ))
            .into());
        }

        if let Some(other) = self
            .accounts
            .group_by_gid(desired.gid)
            .map_err(account_error)?
        {
            return Err(conflict(format!(
                "gid {} already belongs to group '{}'",
                desired.gid, other.name
            ))
            .into());
        }

        log::info!("creating group {} (gid {})", desired.name, desired.gid);
        self.accounts
            .create_group(desired)
            .map_err(account_error)?;
        Ok(true)
    }
}

impl<A: AccountDatabase> Backend<User> for IdentityConverger<A> {
    fn ensure(&self, desired: &User) -> Result<bool, StepFailure> {
        let conflict = |detail: String| BackendError::IdentityConflict {
            entity: "user",
            name: desired.name.clone(),
            detail,
        };

        let group = self
            .accounts
            .group_by_name(&desired.primary_group)
            .map_err(account_error)?
            .ok_or_else(|| BackendError::UnknownGroup {
                user: desired.name.clone(),
                group: desired.primary_group.clone(),
            })?;

        match self
            .accounts
            .user_by_name(&desired.name)
            .map_err(account_error)?
        {
            Some(existing) if existing.uid != desired.uid => Err(conflict(format!(
                "exists with uid {}, wanted {}",
                existing.uid, desired.uid
            ))
            .into()),
            Some(existing) => {
                if user_matches(&existing, desired, group.gid) {
                    return Ok(false);
                }
                log::info!("updating user {}", desired.name);
                self.accounts
                    .modify_user(desired, group.gid)
                    .map_err(account_error)?;
                Ok(true)
            }
            None => {
                if let Some(other) = self
                    .accounts
                    .user_by_uid(desired.uid)
                    .map_err(account_error)?
                {
                    return Err(conflict(format!(
                        "uid {} already belongs to user '{}'",
                        desired.uid, other.name
                    ))
                    .into());
                }

                log::info!("creating user {} (uid {})", desired.name, desired.uid);
                self.accounts
                    .create_user(desired, group.gid)
                    .map_err(account_error)?;
                Ok(true)
            }
        }
    }
}

/// Attributes left unset in the desired state are not compared
fn user_matches(existing: &UserEntry, desired: &User, gid: u32) -> bool {
    existing.gid == gid
        && desired
            .shell
            .as_ref()
            .is_none_or(|shell| *shell == existing.shell)
        && desired
            .home
            .as_ref()
            .is_none_or(|home| *home == existing.home)
}

// ============================================================================
// Directories and files
// ============================================================================

pub struct DirectoryConverger<F> {
    fs: F,
}

impl<F: Filesystem> DirectoryConverger<F> {
    pub fn new(fs: F) -> Self {
        Self { fs }
    }
}

impl<F: Filesystem> Backend<Directory> for DirectoryConverger<F> {
    fn ensure(&self, desired: &Directory) -> Result<bool, StepFailure> {
        let path = &desired.path;
        let kind_of = |p: &Path| self.fs.kind(p).map_err(|e| BackendError::io(p, &e));

        match kind_of(path)? {
            Some(FileKind::Directory) => return Ok(false),
            Some(_) => return Err(BackendError::PathIsFile { path: path.clone() }.into()),
            None => {}
        }

        // The nearest existing ancestor must be a directory too.
        for ancestor in path.ancestors().skip(1) {
            match kind_of(ancestor)? {
                Some(FileKind::Directory) => break,
                Some(_) => {
                    return Err(BackendError::PathIsFile {
                        path: ancestor.to_path_buf(),
                    }
                    .into());
                }
                None => {}
            }
        }

        log::info!("creating directory {}", path.display());
        self.fs
            .create_dir_all(path)
            .map_err(|e| BackendError::io(path, &e))?;
        Ok(true)
    }
}

/// Write `contents` to `dest` unless it already holds exactly those bytes
fn place<F: Filesystem>(fs: &F, dest: &Path, contents: &[u8]) -> Result<bool, BackendError> {
    let current = fs.read(dest).map_err(|e| BackendError::io(dest, &e))?;
    if current.as_deref() == Some(contents) {
        log::debug!("{} is up to date", dest.display());
        return Ok(false);
    }

    log::info!("writing {}", dest.display());
    fs.write(dest, contents)
        .map_err(|e| BackendError::io(dest, &e))?;
    Ok(true)
}

pub struct FileCopyConverger<F, P> {
    fs: F,
    payloads: P,
}

impl<F: Filesystem, P: PayloadSource> FileCopyConverger<F, P> {
    pub fn new(fs: F, payloads: P) -> Self {
        Self { fs, payloads }
    }

    fn copy(&self, file: &FilePlacement) -> Result<bool, BackendError> {
        let contents = self
            .payloads
            .payload(&file.src)
            .map_err(|e| BackendError::io(&file.src, &e))?
            .ok_or_else(|| BackendError::PayloadNotFound {
                name: file.src.clone(),
            })?;

        place(&self.fs, &file.dest, &contents)
    }
}

impl<F: Filesystem, P: PayloadSource> Backend<FileCopy> for FileCopyConverger<F, P> {
    fn ensure(&self, desired: &FileCopy) -> Result<bool, StepFailure> {
        let mut changed = false;

        // Files already placed stay placed when a later one fails.
        for file in &desired.files {
            changed |= self.copy(file).map_err(|e| e.with_changed(changed))?;
        }

        Ok(changed)
    }
}

pub struct TemplateConverger<F, R> {
    fs: F,
    renderer: R,
}

impl<F: Filesystem, R: Renderer> TemplateConverger<F, R> {
    pub fn new(fs: F, renderer: R) -> Self {
        Self { fs, renderer }
    }
}

impl<F: Filesystem, R: Renderer> Backend<TemplateRender> for TemplateConverger<F, R> {
    fn ensure(&self, desired: &TemplateRender) -> Result<bool, StepFailure> {
        let rendered = self
            .renderer
            .render(&desired.template, &desired.variables)?;
        Ok(place(&self.fs, &desired.dest, &rendered)?)
    }
}

// ============================================================================
// Containerized services
// ============================================================================

pub struct ContainerConverger<C> {
    runtime: C,
}

impl<C: ContainerRuntime> ContainerConverger<C> {
    pub fn new(runtime: C) -> Self {
        Self { runtime }
    }

    fn stopped_services(&self, project: &Path) -> Result<Vec<String>> {
        let declared = self.runtime.declared_services(project)?;
        let running = self.runtime.running_services(project)?;
        Ok(declared
            .into_iter()
            .filter(|s| !running.contains(s))
            .collect())
    }

    /// Build images, returning whether any image changed
    fn build(&self, project: &Path) -> Result<bool> {
        let mut before = self.runtime.image_ids(project)?;
        self.runtime.build(project)?;
        let mut after = self.runtime.image_ids(project)?;
        before.sort();
        after.sort();
        Ok(before != after)
    }
}

impl<C: ContainerRuntime> Backend<ContainerService> for ContainerConverger<C> {
    fn ensure(&self, desired: &ContainerService) -> Result<bool, StepFailure> {
        let project = &desired.project_path;

        let rebuilt = if desired.build_required {
            self.build(project)
                .map_err(|e| BackendError::BuildFailure {
                    project: project.clone(),
                    diagnostic: format!("{e:#}"),
                })?
        } else {
            false
        };

        // From here on a failure still reports the rebuild.
        let start_failure = |e: anyhow::Error| {
            BackendError::ServiceStartFailure {
                project: project.clone(),
                diagnostic: format!("{e:#}"),
            }
            .with_changed(rebuilt)
        };

        let stopped = self.stopped_services(project).map_err(start_failure)?;
        if stopped.is_empty() && !rebuilt {
            log::debug!("services in {} already running", project.display());
            return Ok(false);
        }

        // New images need their containers recreated even if they are up.
        log::info!(
            "starting services in {}{}",
            project.display(),
            if rebuilt { " (images rebuilt)" } else { "" }
        );
        self.runtime.start(project).map_err(start_failure)?;

        let still_stopped = self.stopped_services(project).map_err(start_failure)?;
        if !still_stopped.is_empty() {
            return Err(BackendError::ServiceStartFailure {
                project: project.clone(),
                diagnostic: format!("not running after start: {}", still_stopped.join(", ")),
            }
            .with_changed(rebuilt));
        }

        Ok(true)
    }
}

// ============================================================================
// Dispatch
// ============================================================================

/// One backend per resource kind, as seen by the executor
pub struct Backends<'a> {
    pub packages: &'a dyn Backend<PackageSet>,
    pub groups: &'a dyn Backend<Group>,
    pub users: &'a dyn Backend<User>,
    pub directories: &'a dyn Backend<Directory>,
    pub files: &'a dyn Backend<FileCopy>,
    pub templates: &'a dyn Backend<TemplateRender>,
    pub containers: &'a dyn Backend<ContainerService>,
}

impl Backends<'_> {
    /// Dispatch a compiled step to the backend for its kind
    pub fn ensure(&self, desired: &Desired) -> Result<bool, StepFailure> {
        match desired {
            Desired::PackageSet(d) => self.packages.ensure(d),
            Desired::Group(d) => self.groups.ensure(d),
            Desired::User(d) => self.users.ensure(d),
            Desired::Directory(d) => self.directories.ensure(d),
            Desired::FileCopy(d) => self.files.ensure(d),
            Desired::TemplateRender(d) => self.templates.ensure(d),
            Desired::ContainerService(d) => self.containers.ensure(d),
        }
    }
}

/// The full set of convergers for one host
///
/// The filesystem collaborator is shared by directories, files and templates.
pub struct Convergers<M, A, F, P, R, C> {
    pub packages: PackageConverger<M>,
    pub identity: IdentityConverger<A>,
    pub directories: DirectoryConverger<F>,
    pub files: FileCopyConverger<F, P>,
    pub templates: TemplateConverger<F, R>,
    pub containers: ContainerConverger<C>,
}

impl<M, A, F, P, R, C> Convergers<M, A, F, P, R, C>
where
    M: PackageManager,
    A: AccountDatabase,
    F: Filesystem + Clone,
    P: PayloadSource,
    R: Renderer,
    C: ContainerRuntime,
{
    pub fn new(packages: M, accounts: A, fs: F, payloads: P, renderer: R, runtime: C) -> Self {
        Self {
            packages: PackageConverger::new(packages),
            identity: IdentityConverger::new(accounts),
            directories: DirectoryConverger::new(fs.clone()),
            files: FileCopyConverger::new(fs.clone(), payloads),
            templates: TemplateConverger::new(fs, renderer),
            containers: ContainerConverger::new(runtime),
        }
    }

    /// Borrow as the executor's dispatch table
    pub fn backends(&self) -> Backends<'_> {
        Backends {
            packages: &self.packages,
            groups: &self.identity,
            users: &self.identity,
            directories: &self.directories,
            files: &self.files,
            templates: &self.templates,
            containers: &self.containers,
        }
    }
}
