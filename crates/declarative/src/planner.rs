//! Plan compiler - validates specs and resolves variables into an execution plan
//!
//! Compilation is a pure transformation. Declaration order is preserved
//! verbatim: the caller is responsible for declaring prerequisites (group
//! before user, directory before the files placed in it) first.

use crate::error::CompileError;
use crate::spec::{
    ContainerServiceSpec, DirectorySpec, FileCopySpec, GroupSpec, PackageSetSpec, Param,
    ResourceKind, ResourceSpec, TemplateRenderSpec, UserSpec,
};
use crate::template::TemplateSource;
use crate::types::{
    ContainerService, Desired, Directory, FileCopy, FilePlacement, Group, PackageSet,
    TemplateRender, User,
};
use crate::vars::{FromVariable, ResolveError, VariableContext};
use serde::Serialize;
use std::path::Path;

/// One compiled step: a resolved spec tagged with its declaration index
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CompiledStep {
    pub index: usize,
    pub desired: Desired,
}

/// An ordered, validated sequence of steps ready for execution
///
/// Steps can only be read once compiled.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct ExecutionPlan {
    steps: Vec<CompiledStep>,
}

impl ExecutionPlan {
    pub fn steps(&self) -> &[CompiledStep] {
        &self.steps
    }

    pub fn iter(&self) -> impl Iterator<Item = &CompiledStep> {
        self.steps.iter()
    }

    /// Total number of steps in the plan
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    /// Check if plan is empty
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Count steps of a given kind
    pub fn count_kind(&self, kind: ResourceKind) -> usize {
        self.steps.iter().filter(|s| s.desired.kind() == kind).count()
    }
}

/// Compile an ordered list of specs against a variable context
///
/// Fails on the first spec with a missing or mistyped variable or an
/// invalid structure; no plan is produced in that case.
pub fn compile<T: TemplateSource + ?Sized>(
    specs: &[ResourceSpec],
    vars: &VariableContext,
    templates: &T,
) -> Result<ExecutionPlan, CompileError> {
    let mut steps = Vec::with_capacity(specs.len());

    for (index, spec) in specs.iter().enumerate() {
        let compiler = SpecCompiler {
            index,
            kind: spec.kind(),
            vars,
        };

        let desired = match spec {
            ResourceSpec::PackageSet(s) => compiler.package_set(s)?,
            ResourceSpec::Group(s) => compiler.group(s)?,
            ResourceSpec::User(s) => compiler.user(s)?,
            ResourceSpec::Directory(s) => compiler.directory(s)?,
            ResourceSpec::FileCopy(s) => compiler.file_copy(s)?,
            ResourceSpec::TemplateRender(s) => compiler.template_render(s, templates)?,
            ResourceSpec::ContainerService(s) => compiler.container_service(s)?,
        };

        log::trace!("compiled spec #{index}: {}", desired.description());
        steps.push(CompiledStep { index, desired });
    }

    Ok(ExecutionPlan { steps })
}

/// Per-spec compilation state
struct SpecCompiler<'a> {
    index: usize,
    kind: ResourceKind,
    vars: &'a VariableContext,
}

impl SpecCompiler<'_> {
    fn resolve<T: FromVariable + Clone>(&self, param: &Param<T>) -> Result<T, CompileError> {
        param.resolve(self.vars).map_err(|e| match e {
            ResolveError::Missing { variable } => CompileError::MissingVariable {
                index: self.index,
                variable,
            },
            ResolveError::Mismatch {
                variable,
                expected,
                found,
            } => CompileError::TypeMismatch {
                index: self.index,
                variable,
                expected,
                found,
            },
        })
    }

    fn invalid(&self, reason: impl Into<String>) -> CompileError {
        CompileError::InvalidSpec {
            index: self.index,
            kind: self.kind,
            reason: reason.into(),
        }
    }

    fn require_name(&self, field: &str, value: &str) -> Result<(), CompileError> {
        if value.trim().is_empty() {
            return Err(self.invalid(format!("{field} must not be empty")));
        }
        if value.chars().any(|c| c.is_whitespace() || c == ':') {
            return Err(self.invalid(format!("{field} '{value}' contains invalid characters")));
        }
        Ok(())
    }

    fn require_absolute(&self, field: &str, path: &Path) -> Result<(), CompileError> {
        if !path.is_absolute() {
            return Err(self.invalid(format!(
                "{field} must be an absolute path, got '{}'",
                path.display()
            )));
        }
        Ok(())
    }

    fn package_set(&self, spec: &PackageSetSpec) -> Result<Desired, CompileError> {
        if spec.names.is_empty() {
            return Err(self.invalid("at least one package name is required"));
        }
        for name in &spec.names {
            self.require_name("package name", name)?;
        }

        Ok(Desired::PackageSet(PackageSet {
            names: spec.names.clone(),
            update_cache: spec.update_cache,
        }))
    }

    fn group(&self, spec: &GroupSpec) -> Result<Desired, CompileError> {
        self.require_name("group name", &spec.name)?;

        Ok(Desired::Group(Group {
            name: spec.name.clone(),
            gid: self.resolve(&spec.gid)?,
            system: spec.system,
        }))
    }

    fn user(&self, spec: &UserSpec) -> Result<Desired, CompileError> {
        self.require_name("user name", &spec.name)?;
        self.require_name("primary_group", &spec.primary_group)?;
        if let Some(home) = &spec.home {
            self.require_absolute("home", home)?;
        }

        let shell = spec.shell.as_ref().map(|s| self.resolve(s)).transpose()?;

        Ok(Desired::User(User {
            name: spec.name.clone(),
            uid: self.resolve(&spec.uid)?,
            primary_group: spec.primary_group.clone(),
            shell,
            home: spec.home.clone(),
            create_home: spec.create_home,
            system: spec.system,
        }))
    }

    fn directory(&self, spec: &DirectorySpec) -> Result<Desired, CompileError> {
        self.require_absolute("path", &spec.path)?;

        Ok(Desired::Directory(Directory {
            path: spec.path.clone(),
        }))
    }

    fn file_copy(&self, spec: &FileCopySpec) -> Result<Desired, CompileError> {
        if spec.files.is_empty() {
            return Err(self.invalid("at least one file is required"));
        }

        let mut files = Vec::with_capacity(spec.files.len());
        for entry in &spec.files {
            if entry.src.trim().is_empty() {
                return Err(self.invalid("file src must not be empty"));
            }
            self.require_absolute("dest", &entry.dest)?;
            files.push(FilePlacement {
                src: entry.src.clone(),
                dest: entry.dest.clone(),
            });
        }

        Ok(Desired::FileCopy(FileCopy { files }))
    }

    fn template_render<T: TemplateSource + ?Sized>(
        &self,
        spec: &TemplateRenderSpec,
        templates: &T,
    ) -> Result<Desired, CompileError> {
        if !templates.contains(&spec.template) {
            return Err(self.invalid(format!("unknown template '{}'", spec.template)));
        }
        self.require_absolute("dest", &spec.dest)?;

        // The whole context is visible to the template; local variables win.
        let mut variables = self.vars.as_map().clone();
        for (name, param) in &spec.variables {
            variables.insert(name.clone(), self.resolve(param)?);
        }

        Ok(Desired::TemplateRender(TemplateRender {
            template: spec.template.clone(),
            dest: spec.dest.clone(),
            variables,
        }))
    }

    fn container_service(&self, spec: &ContainerServiceSpec) -> Result<Desired, CompileError> {
        self.require_absolute("project_path", &spec.project_path)?;

        Ok(Desired::ContainerService(ContainerService {
            project_path: spec.project_path.clone(),
            build_required: spec.build_required,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spec::FileEntry;
    use crate::template::TemplateStore;
    use serde_json::Value;
    use std::collections::BTreeMap;
    use std::path::PathBuf;

    fn templates() -> TemplateStore {
        let mut store = TemplateStore::new();
        store.insert("docker-compose.yml", "user: \"{{ uid }}\"\n");
        store
    }

    fn vars() -> VariableContext {
        let mut vars = VariableContext::new();
        vars.insert("radio_bridge_uid_gid", 900);
        vars
    }

    fn group(gid: Param<u32>) -> ResourceSpec {
        ResourceSpec::Group(GroupSpec {
            name: "radio-bridge".to_string(),
            gid,
            system: true,
        })
    }

    fn user(primary_group: &str) -> ResourceSpec {
        ResourceSpec::User(UserSpec {
            name: "radio-bridge".to_string(),
            uid: Param::var("radio_bridge_uid_gid"),
            primary_group: primary_group.to_string(),
            shell: None,
            home: None,
            create_home: false,
            system: true,
        })
    }

    #[test]
    fn test_compile_preserves_declaration_order() {
        let specs = vec![
            ResourceSpec::Directory(DirectorySpec {
                path: PathBuf::from("/opt/app/radio-bridge"),
            }),
            user("radio-bridge"),
            group(Param::var("radio_bridge_uid_gid")),
        ];

        let plan = compile(&specs, &vars(), &templates()).unwrap();
        let kinds: Vec<_> = plan.iter().map(|s| s.desired.kind()).collect();
        let indices: Vec<_> = plan.iter().map(|s| s.index).collect();

        assert_eq!(
            kinds,
            vec![ResourceKind::Directory, ResourceKind::User, ResourceKind::Group]
        );
        assert_eq!(indices, vec![0, 1, 2]);
    }

    #[test]
    fn test_compile_resolves_variables() {
        let plan = compile(&[group(Param::var("radio_bridge_uid_gid"))], &vars(), &templates())
            .unwrap();
        match &plan.steps()[0].desired {
            Desired::Group(g) => assert_eq!(g.gid, 900),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_compile_missing_variable() {
        let specs = vec![
            group(Param::Value(900)),
            ResourceSpec::Directory(DirectorySpec {
                path: PathBuf::from("/opt"),
            }),
            group(Param::var("nope")),
        ];
        let err = compile(&specs, &vars(), &templates()).unwrap_err();
        assert_eq!(
            err,
            CompileError::MissingVariable {
                index: 2,
                variable: "nope".to_string()
            }
        );
    }

    #[test]
    fn test_compile_type_mismatch() {
        let mut vars = VariableContext::new();
        vars.insert("radio_bridge_uid_gid", "900");
        let err = compile(&[user("radio-bridge")], &vars, &templates()).unwrap_err();
        assert!(matches!(
            err,
            CompileError::TypeMismatch { index: 0, ref variable, found: "string", .. }
                if variable == "radio_bridge_uid_gid"
        ));
    }

    #[test]
    fn test_compile_invalid_user_without_group() {
        let err = compile(&[user("")], &vars(), &templates()).unwrap_err();
        assert!(matches!(
            err,
            CompileError::InvalidSpec { index: 0, kind: ResourceKind::User, .. }
        ));
    }

    #[test]
    fn test_compile_unknown_template() {
        let spec = ResourceSpec::TemplateRender(TemplateRenderSpec {
            template: "missing.yml".to_string(),
            dest: PathBuf::from("/opt/app/docker-compose.yml"),
            variables: BTreeMap::new(),
        });
        let err = compile(&[spec], &vars(), &templates()).unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::InvalidSpec);
        assert!(err.to_string().contains("unknown template 'missing.yml'"));
    }

    #[test]
    fn test_compile_relative_paths_rejected() {
        let specs = vec![ResourceSpec::FileCopy(FileCopySpec {
            files: vec![FileEntry {
                src: "Dockerfile".to_string(),
                dest: PathBuf::from("opt/Dockerfile"),
            }],
        })];
        assert!(matches!(
            compile(&specs, &vars(), &templates()),
            Err(CompileError::InvalidSpec { kind: ResourceKind::FileCopy, .. })
        ));
    }

    #[test]
    fn test_template_context_layers_local_variables() {
        let mut variables = BTreeMap::new();
        variables.insert("uid".to_string(), Param::var("radio_bridge_uid_gid"));
        variables.insert(
            "radio_bridge_uid_gid".to_string(),
            Param::Value(Value::from("overridden")),
        );
        let spec = ResourceSpec::TemplateRender(TemplateRenderSpec {
            template: "docker-compose.yml".to_string(),
            dest: PathBuf::from("/opt/app/radio-bridge/docker-compose.yml"),
            variables,
        });

        let plan = compile(&[spec], &vars(), &templates()).unwrap();
        let Desired::TemplateRender(t) = &plan.steps()[0].desired else {
            panic!("expected template step");
        };
        assert_eq!(t.variables["uid"], Value::from(900));
        assert_eq!(t.variables["radio_bridge_uid_gid"], Value::from("overridden"));
    }

    #[test]
    fn test_compile_empty() {
        let plan = compile(&[], &vars(), &templates()).unwrap();
        assert!(plan.is_empty());
    }
}
