pub mod apply;
pub mod plan;

use anyhow::{Context, Result};
use declarative::{ExecutionPlan, TemplateStore, compile};

use crate::cli::RoleArgs;
use crate::config::Role;

/// A role compiled against its variables and templates
pub struct Compiled {
    pub role: Role,
    pub templates: TemplateStore,
    pub plan: ExecutionPlan,
}

/// Load, resolve and compile the role named on the command line
pub fn compile_role(args: &RoleArgs) -> Result<Compiled> {
    let role = Role::load(&args.role_path())?;
    let vars = role.variables(args.vars_path().as_deref(), &args.overrides)?;
    let templates = role.templates()?;

    log::debug!(
        "compiling role '{}': {} spec(s), {} variable(s), {} template(s)",
        role.name,
        role.specs.len(),
        vars.len(),
        templates.len()
    );

    let plan = compile(&role.specs, &vars, &templates)
        .with_context(|| format!("Role '{}' does not compile", role.name))?;

    Ok(Compiled {
        role,
        templates,
        plan,
    })
}
