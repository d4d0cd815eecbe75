//! Execution engine - converges a compiled plan step by step
//!
//! Steps run strictly in plan order, one at a time. The first failing step
//! halts the run: its result carries the error and no later step is
//! attempted. There are no retries and no rollback; converging is
//! idempotent, so re-running after fixing the cause picks up where the
//! previous run stopped.

use crate::backend::Backends;
use crate::context::{NoProgress, ProgressCallback};
use crate::planner::{CompiledStep, ExecutionPlan};
use crate::types::{ErrorInfo, RunReport, StepResult};

/// Execute a plan, reporting progress through `progress`
///
/// Always returns a report; per-step failures are recorded in it rather
/// than returned as errors.
pub fn run<P: ProgressCallback>(
    plan: &ExecutionPlan,
    backends: &Backends<'_>,
    progress: &mut P,
) -> RunReport {
    let mut report = RunReport::new();
    progress.on_plan_start(plan.len());

    for step in plan.iter() {
        progress.on_step_start(step);
        let result = converge(step, backends);
        progress.on_step_complete(&result);

        let failed = !result.is_success();
        report.push(result);
        if failed {
            let skipped = plan.len() - report.steps.len();
            if skipped > 0 {
                log::warn!("halting run, {skipped} step(s) not attempted");
            }
            break;
        }
    }

    log::info!(
        "run finished: {} changed, {} unchanged, succeeded={}",
        report.changed_count(),
        report.unchanged_count(),
        report.succeeded
    );
    progress.on_plan_complete(&report);
    report
}

/// Execute a plan without progress reporting
pub fn run_simple(plan: &ExecutionPlan, backends: &Backends<'_>) -> RunReport {
    run(plan, backends, &mut NoProgress)
}

fn converge(step: &CompiledStep, backends: &Backends<'_>) -> StepResult {
    let desired = &step.desired;
    log::debug!("step {}: {}", step.index, desired.description());

    let (changed, error) = match backends.ensure(desired) {
        Ok(changed) => (changed, None),
        Err(e) => {
            log::error!("step {} ({}) failed: {e}", step.index, desired.kind());
            (
                e.changed,
                Some(ErrorInfo {
                    kind: e.kind(),
                    message: e.to_string(),
                }),
            )
        }
    };

    StepResult {
        spec_index: step.index,
        kind: desired.kind(),
        id: desired.id(),
        changed,
        error,
    }
}
