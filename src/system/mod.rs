//! Collaborators for the local Linux host

pub mod accounts;
pub mod apt;
pub mod compose;
pub mod fs;

use declarative::{Convergers, TemplateStore};
use std::path::PathBuf;

use accounts::Accounts;
use apt::Apt;
use compose::Compose;
use fs::{LocalFs, PayloadDir};

/// Convergers wired to the local host
pub type HostConvergers<'h> =
    Convergers<&'h Apt, &'h Accounts, &'h LocalFs, &'h PayloadDir, &'h TemplateStore, &'h Compose>;

/// Everything needed to converge this machine for one role
pub struct Host {
    apt: Apt,
    accounts: Accounts,
    fs: LocalFs,
    payloads: PayloadDir,
    templates: TemplateStore,
    compose: Compose,
}

impl Host {
    pub fn new(templates: TemplateStore, payload_dir: impl Into<PathBuf>) -> Self {
        Self {
            apt: Apt,
            accounts: Accounts,
            fs: LocalFs,
            payloads: PayloadDir::new(payload_dir),
            templates,
            compose: Compose::detect(),
        }
    }

    pub fn convergers(&self) -> HostConvergers<'_> {
        Convergers::new(
            &self.apt,
            &self.accounts,
            &self.fs,
            &self.payloads,
            &self.templates,
            &self.compose,
        )
    }
}

/// Whether the process runs with root privileges
pub fn is_root() -> bool {
    // SAFETY: geteuid has no preconditions and cannot fail
    unsafe {
        libc::geteuid() == 0
    }
}
