//! `hostrole plan` - show what apply would converge, in order

use anyhow::Result;

use super::{Compiled, compile_role};
use crate::Context;
use crate::cli::RoleArgs;
use crate::ui;

pub fn run(ctx: &Context, args: &RoleArgs) -> Result<()> {
    let compiled = compile_role(args)?;
    print_plan(&compiled);

    if !ctx.quiet {
        println!();
        ui::success(&format!("{} step(s), all variables resolved", compiled.plan.len()));
    }
    Ok(())
}

/// Print the compiled steps in execution order
pub fn print_plan(compiled: &Compiled) {
    ui::header(&format!("Role {}", compiled.role.name));
    if let Some(description) = &compiled.role.description {
        ui::dim(description);
    }
    ui::kv("directory", &compiled.role.dir.display().to_string());
    println!();

    let total = compiled.plan.len();
    if total == 0 {
        ui::info("Role declares no resources");
        return;
    }

    for (n, step) in compiled.plan.iter().enumerate() {
        ui::step(n + 1, total, &step.desired.description());
    }
}
