//! Debian package manager client (dpkg-query / apt-get)

use anyhow::Result;
use declarative::PackageManager;
use std::process::Command;

use crate::runner;

/// `apt-get` backed package manager
#[derive(Debug, Clone, Copy, Default)]
pub struct Apt;

impl Apt {
    fn apt_get(args: &[&str]) -> Command {
        let mut cmd = Command::new("apt-get");
        cmd.args(args)
            .env("DEBIAN_FRONTEND", "noninteractive")
            .env("NEEDRESTART_MODE", "a");
        cmd
    }
}

impl PackageManager for Apt {
    fn is_installed(&self, name: &str) -> Result<bool> {
        // Unknown packages make dpkg-query exit non-zero; that just means
        // "not installed".
        let output = runner::capture(Command::new("dpkg-query").args([
            "--show",
            "--showformat=${db:Status-Status}",
            name,
        ]))?;
        Ok(output.success && is_installed_status(&output.stdout_str()))
    }

    fn refresh(&self) -> Result<()> {
        log::info!("refreshing package index");
        runner::checked(&mut Self::apt_get(&["update", "-q"]))?;
        Ok(())
    }

    fn install(&self, names: &[String]) -> Result<()> {
        let mut args = vec!["install", "-y", "-q", "--no-install-recommends"];
        args.extend(names.iter().map(String::as_str));
        runner::checked(&mut Self::apt_get(&args))?;
        Ok(())
    }
}

/// `${db:Status-Status}` is `installed` only for fully configured packages
fn is_installed_status(status: &str) -> bool {
    status.trim() == "installed"
}
