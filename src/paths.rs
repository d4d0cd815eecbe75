//! Path expansion for role and variable files
//!
//! Paths given on the command line may use `~` and environment variables
//! (`$HOME/roles/radio-bridge`). Paths inside a role are resolved against
//! the role's directory.

use std::path::{Component, Path, PathBuf};

/// Expand ~ and environment variables in a path string.
pub fn expand(path: &str) -> PathBuf {
    let expanded = shellexpand::full(path).unwrap_or(std::borrow::Cow::Borrowed(path));
    PathBuf::from(expanded.as_ref())
}

/// Directory containing `file`, `.` for bare file names
pub fn parent_dir(file: &Path) -> PathBuf {
    match file.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

/// Whether `relative` stays inside the directory it is joined to
pub fn is_contained(relative: &Path) -> bool {
    relative
        .components()
        .all(|c| matches!(c, Component::Normal(_) | Component::CurDir))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expand_tilde() {
        let expanded = expand("~/roles");
        assert!(!expanded.to_string_lossy().starts_with('~'));
        assert!(expanded.ends_with("roles"));
    }

    #[test]
    fn test_expand_env_var() {
        let path = expand("$PATH_THAT_DOES_NOT_EXIST_12345/x");
        // Unknown variables leave the input untouched
        assert_eq!(path, PathBuf::from("$PATH_THAT_DOES_NOT_EXIST_12345/x"));
    }

    #[test]
    fn test_parent_dir() {
        assert_eq!(parent_dir(Path::new("role.toml")), PathBuf::from("."));
        assert_eq!(
            parent_dir(Path::new("demos/radio-bridge/role.toml")),
            PathBuf::from("demos/radio-bridge")
        );
    }

    #[test]
    fn test_is_contained() {
        assert!(is_contained(Path::new("Dockerfile")));
        assert!(is_contained(Path::new("./app/serial_bridge.py")));
        assert!(!is_contained(Path::new("../secrets")));
        assert!(!is_contained(Path::new("/etc/shadow")));
        assert!(!is_contained(Path::new("app/../../x")));
    }
}
