//! Docker Compose client

use anyhow::{Context, Result};
use declarative::ContainerRuntime;
use std::path::Path;
use std::process::Command;

use crate::runner;

/// How compose is invoked on this host
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Compose {
    program: String,
    prefix: Vec<String>,
}

impl Default for Compose {
    fn default() -> Self {
        Self::plugin()
    }
}

impl Compose {
    /// `docker compose` (the v2 plugin)
    pub fn plugin() -> Self {
        Self {
            program: "docker".to_string(),
            prefix: vec!["compose".to_string()],
        }
    }

    /// Prefer the compose plugin, fall back to standalone `docker-compose`
    pub fn detect() -> Self {
        if runner::run_quiet("docker", &["compose", "version"]) {
            return Self::plugin();
        }
        if runner::command_exists("docker-compose") {
            log::debug!("using standalone docker-compose");
            return Self {
                program: "docker-compose".to_string(),
                prefix: Vec::new(),
            };
        }
        log::debug!("no compose client found, assuming docker compose");
        Self::plugin()
    }

    fn command(&self, project: &Path, args: &[&str]) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.prefix).args(args).current_dir(project);
        cmd
    }

    fn lines(&self, project: &Path, args: &[&str]) -> Result<Vec<String>> {
        let output = runner::checked(&mut self.command(project, args))?;
        Ok(parse_lines(&output.stdout_str()))
    }

    /// Image references the project's services use
    fn images(&self, project: &Path) -> Result<Vec<String>> {
        self.lines(project, &["config", "--images"])
    }
}

impl ContainerRuntime for Compose {
    fn image_ids(&self, project: &Path) -> Result<Vec<String>> {
        let mut ids = Vec::new();
        for image in self.images(project)? {
            // Images that were never built or pulled have no id yet.
            let output = runner::capture(Command::new("docker").args([
                "image",
                "inspect",
                "--format",
                "{{.Id}}",
                image.as_str(),
            ]))?;
            if output.success {
                ids.extend(parse_lines(&output.stdout_str()));
            }
        }
        Ok(ids)
    }

    fn build(&self, project: &Path) -> Result<()> {
        log::info!("building images in {}", project.display());
        runner::checked(&mut self.command(project, &["build"]))
            .with_context(|| format!("compose build in {}", project.display()))?;
        Ok(())
    }

    fn declared_services(&self, project: &Path) -> Result<Vec<String>> {
        self.lines(project, &["config", "--services"])
    }

    fn running_services(&self, project: &Path) -> Result<Vec<String>> {
        self.lines(
            project,
            &["ps", "--services", "--filter", "status=running"],
        )
    }

    fn start(&self, project: &Path) -> Result<()> {
        runner::checked(&mut self.command(project, &["up", "-d", "--remove-orphans"]))
            .with_context(|| format!("compose up in {}", project.display()))?;
        Ok(())
    }
}

fn parse_lines(stdout: &str) -> Vec<String> {
    stdout
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(ToString::to_string)
        .collect()
}
