//! Role and variable loading
//!
//! A role is a directory:
//!
//! ```text
//! radio-bridge/
//!   role.toml       name, description, [[resource]] specs
//!   vars.toml       default variables (optional)
//!   templates/      template sources, identified by relative path
//!   files/          static payloads for file_copy
//! ```

use anyhow::{Context, Result, bail};
use declarative::{ResourceSpec, TemplateStore, VariableContext};
use serde::Deserialize;
use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::paths;

/// Default variables file looked up next to the role file
pub const DEFAULT_VARS_FILE: &str = "vars.toml";

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RoleFile {
    name: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    resource: Vec<ResourceSpec>,
}

/// A loaded role
#[derive(Debug)]
pub struct Role {
    pub name: String,
    pub description: Option<String>,
    pub specs: Vec<ResourceSpec>,
    /// Directory the role file lives in
    pub dir: PathBuf,
}

impl Role {
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Could not read role file {}", path.display()))?;
        let file: RoleFile = toml::from_str(&content)
            .with_context(|| format!("Invalid role file {}", path.display()))?;

        log::debug!(
            "loaded role '{}' with {} resource(s) from {}",
            file.name,
            file.resource.len(),
            path.display()
        );

        Ok(Self {
            name: file.name,
            description: file.description,
            specs: file.resource,
            dir: paths::parent_dir(path),
        })
    }

    pub fn templates_dir(&self) -> PathBuf {
        self.dir.join("templates")
    }

    pub fn files_dir(&self) -> PathBuf {
        self.dir.join("files")
    }

    /// Load every template under `templates/`
    pub fn templates(&self) -> Result<TemplateStore> {
        load_templates(&self.templates_dir())
    }

    /// Resolve variables: the vars file (explicit, or the role's default
    /// `vars.toml` if present) overridden by `--var` flags
    pub fn variables(&self, vars_file: Option<&Path>, overrides: &[String]) -> Result<VariableContext> {
        let mut vars = match vars_file {
            Some(path) => load_vars(path)?,
            None => {
                let default = self.dir.join(DEFAULT_VARS_FILE);
                if default.is_file() {
                    load_vars(&default)?
                } else {
                    VariableContext::new()
                }
            }
        };

        for item in overrides {
            let (name, value) = parse_var(item)?;
            log::debug!("variable override {name}={value}");
            vars.insert(name, value);
        }

        Ok(vars)
    }
}

/// Load a variables file, TOML or JSON by extension
pub fn load_vars(path: &Path) -> Result<VariableContext> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Could not read variables file {}", path.display()))?;

    let is_json = path.extension().is_some_and(|ext| ext == "json");
    let vars = if is_json {
        serde_json::from_str(&content)
            .with_context(|| format!("Invalid JSON in {}", path.display()))?
    } else {
        toml::from_str(&content).with_context(|| format!("Invalid TOML in {}", path.display()))?
    };
    Ok(vars)
}

/// Parse a `name=value` override
///
/// The value is read as JSON when it parses (`900`, `true`, `[1,2]`) and
/// taken as a plain string otherwise.
pub fn parse_var(item: &str) -> Result<(String, Value)> {
    let Some((name, raw)) = item.split_once('=') else {
        bail!("Invalid --var '{item}': expected name=value");
    };
    let name = name.trim();
    if name.is_empty() {
        bail!("Invalid --var '{item}': empty name");
    }

    let value = serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()));
    Ok((name.to_string(), value))
}

/// Load templates from a directory tree; identifiers are `/`-separated
/// relative paths. A missing directory yields an empty store.
pub fn load_templates(dir: &Path) -> Result<TemplateStore> {
    let mut store = TemplateStore::new();
    if !dir.is_dir() {
        log::debug!("no template directory at {}", dir.display());
        return Ok(store);
    }

    for entry in WalkDir::new(dir).sort_by_file_name() {
        let entry = entry.with_context(|| format!("Could not walk {}", dir.display()))?;
        if !entry.file_type().is_file() {
            continue;
        }

        let relative = entry.path().strip_prefix(dir).unwrap_or(entry.path());
        let id = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");
        let source = fs::read_to_string(entry.path())
            .with_context(|| format!("Could not read template {}", entry.path().display()))?;

        log::trace!("template {id}");
        store.insert(id, source);
    }

    Ok(store)
}

#[cfg(test)]
mod tests {
    use super::*;
    use declarative::{ResourceKind, TemplateSource};
    use tempfile::TempDir;

    fn write(dir: &Path, relative: &str, content: &str) -> PathBuf {
        let path = dir.join(relative);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn test_parse_var() {
        assert_eq!(
            parse_var("radio_bridge_uid_gid=900").unwrap(),
            ("radio_bridge_uid_gid".to_string(), Value::from(900))
        );
        assert_eq!(
            parse_var("device=/dev/ttyUSB0").unwrap().1,
            Value::String("/dev/ttyUSB0".to_string())
        );
        assert_eq!(parse_var("flag=true").unwrap().1, Value::Bool(true));
        assert_eq!(parse_var("empty=").unwrap().1, Value::String(String::new()));
        assert_eq!(parse_var("eq=a=b").unwrap().1, Value::String("a=b".to_string()));
    }

    #[test]
    fn test_parse_var_rejects_malformed() {
        assert!(parse_var("novalue").is_err());
        assert!(parse_var("=900").is_err());
    }

    #[test]
    fn test_load_role() {
        let tmp = TempDir::new().unwrap();
        let path = write(
            tmp.path(),
            "role.toml",
            r#"
name = "radio-bridge"
description = "Serial to MQTT bridge"

[[resource]]
kind = "group"
name = "radio-bridge"
gid = { var = "uid" }

[[resource]]
kind = "directory"
path = "/opt/app/radio-bridge"
"#,
        );

        let role = Role::load(&path).unwrap();
        assert_eq!(role.name, "radio-bridge");
        assert_eq!(role.description.as_deref(), Some("Serial to MQTT bridge"));
        assert_eq!(role.dir, tmp.path());
        let kinds: Vec<_> = role.specs.iter().map(ResourceSpec::kind).collect();
        assert_eq!(kinds, vec![ResourceKind::Group, ResourceKind::Directory]);
    }

    #[test]
    fn test_load_role_rejects_unknown_kind() {
        let tmp = TempDir::new().unwrap();
        let path = write(
            tmp.path(),
            "role.toml",
            "name = \"x\"\n[[resource]]\nkind = \"cron_job\"\n",
        );
        let err = Role::load(&path).unwrap_err();
        assert!(format!("{err:#}").contains("Invalid role file"));
    }

    #[test]
    fn test_variables_layering() {
        let tmp = TempDir::new().unwrap();
        let role_path = write(tmp.path(), "role.toml", "name = \"r\"\n");
        write(
            tmp.path(),
            "vars.toml",
            "radio_bridge_uid_gid = 900\nserial_device = \"/dev/ttyUSB0\"\n",
        );
        let role = Role::load(&role_path).unwrap();

        let vars = role
            .variables(None, &["radio_bridge_uid_gid=901".to_string()])
            .unwrap();
        assert_eq!(vars.get("radio_bridge_uid_gid"), Some(&Value::from(901)));
        assert_eq!(
            vars.get("serial_device"),
            Some(&Value::String("/dev/ttyUSB0".to_string()))
        );
    }

    #[test]
    fn test_load_vars_json() {
        let tmp = TempDir::new().unwrap();
        let path = write(
            tmp.path(),
            "vars.json",
            r#"{"radio_bridge_uid_gid": 900, "mqtt": {"host": "broker"}}"#,
        );
        let vars = load_vars(&path).unwrap();
        assert_eq!(vars.len(), 2);
        assert_eq!(vars.get("radio_bridge_uid_gid"), Some(&Value::from(900)));
    }

    #[test]
    fn test_load_templates() {
        let tmp = TempDir::new().unwrap();
        write(tmp.path(), "docker-compose.yml", "user: {{ uid }}\n");
        write(tmp.path(), "systemd/bridge.service", "[Unit]\n");

        let store = load_templates(tmp.path()).unwrap();
        assert_eq!(
            store.ids().collect::<Vec<_>>(),
            vec!["docker-compose.yml", "systemd/bridge.service"]
        );
        assert_eq!(
            store.template("docker-compose.yml"),
            Some("user: {{ uid }}\n")
        );

        let missing = load_templates(&tmp.path().join("nope")).unwrap();
        assert!(missing.is_empty());
    }
}
