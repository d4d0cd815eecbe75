//! Local filesystem and payload directory

use anyhow::{Context, Result, bail};
use colored::Colorize;
use declarative::{FileKind, Filesystem, PayloadSource};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use crate::paths;

/// The real filesystem
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalFs;

impl Filesystem for LocalFs {
    fn kind(&self, path: &Path) -> Result<Option<FileKind>> {
        match fs::metadata(path) {
            Ok(meta) if meta.is_dir() => Ok(Some(FileKind::Directory)),
            Ok(meta) if meta.is_file() => Ok(Some(FileKind::File)),
            Ok(_) => Ok(Some(FileKind::Other)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e).with_context(|| format!("Could not stat {}", path.display())),
        }
    }

    fn create_dir_all(&self, path: &Path) -> Result<()> {
        fs::create_dir_all(path)
            .with_context(|| format!("Could not create directory {}", path.display()))
    }

    fn read(&self, path: &Path) -> Result<Option<Vec<u8>>> {
        match fs::read(path) {
            Ok(contents) => Ok(Some(contents)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e).with_context(|| format!("Could not read {}", path.display())),
        }
    }

    fn write(&self, path: &Path, contents: &[u8]) -> Result<()> {
        if log::log_enabled!(log::Level::Debug) {
            let previous = fs::read(path).ok();
            log_change(path, previous.as_deref(), contents);
        }

        // Write beside the destination and rename so readers never see a
        // partial file.
        let file_name = path
            .file_name()
            .with_context(|| format!("Not a file path: {}", path.display()))?;
        let mut staging_name = std::ffi::OsString::from(".");
        staging_name.push(file_name);
        staging_name.push(".hostrole-tmp");
        let staging = path.with_file_name(staging_name);

        fs::write(&staging, contents)
            .with_context(|| format!("Could not write {}", staging.display()))?;
        if let Err(e) = keep_mode(path, &staging) {
            log::warn!("{e:#}; {} gets default permissions", path.display());
        }
        if let Err(e) = fs::rename(&staging, path) {
            let _ = fs::remove_file(&staging);
            return Err(e).with_context(|| format!("Could not replace {}", path.display()));
        }
        Ok(())
    }
}

/// Give `staging` the permissions of the file it replaces, if there is one
fn keep_mode(original: &Path, staging: &Path) -> Result<()> {
    let Ok(meta) = fs::metadata(original) else {
        return Ok(());
    };
    fs::set_permissions(staging, meta.permissions())
        .with_context(|| format!("Could not keep the mode of {}", original.display()))
}

/// Log a file change with digests and, for text, a unified diff
fn log_change(path: &Path, previous: Option<&[u8]>, next: &[u8]) {
    let digest = |bytes: &[u8]| blake3::hash(bytes).to_hex()[..16].to_string();

    match previous {
        None => log::debug!("{}: new file ({})", path.display(), digest(next)),
        Some(old) => {
            log::debug!(
                "{}: {} -> {}",
                path.display(),
                digest(old),
                digest(next)
            );
            if let (Ok(old), Ok(new)) = (std::str::from_utf8(old), std::str::from_utf8(next)) {
                log::debug!("{}", render_diff(old, new));
            }
        }
    }
}

/// Unified diff of two texts, colored for the terminal
pub fn render_diff(old: &str, new: &str) -> String {
    let diff = similar::TextDiff::from_lines(old, new);
    let mut out = String::new();

    for hunk in diff.unified_diff().context_radius(2).iter_hunks() {
        out.push_str(&format!("{}\n", hunk.header().to_string().cyan()));
        for change in hunk.iter_changes() {
            let line = format!("{}{}", change.tag(), change.value().trim_end_matches('\n'));
            let line = match change.tag() {
                similar::ChangeTag::Delete => line.red().to_string(),
                similar::ChangeTag::Insert => line.green().to_string(),
                similar::ChangeTag::Equal => line,
            };
            out.push_str(&line);
            out.push('\n');
        }
    }

    out
}

/// Static payloads stored in the role's `files/` directory
#[derive(Debug, Clone)]
pub struct PayloadDir {
    root: PathBuf,
}

impl PayloadDir {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl PayloadSource for PayloadDir {
    fn payload(&self, name: &str) -> Result<Option<Vec<u8>>> {
        if !paths::is_contained(Path::new(name)) {
            bail!("Payload name escapes {}: {name}", self.root.display());
        }
        LocalFs.read(&self.root.join(name))
    }
}
