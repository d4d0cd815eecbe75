//! Progress hooks for plan execution
//!
//! The executor reports through this trait so the crate stays free of any
//! particular terminal UI.

use crate::planner::CompiledStep;
use crate::types::{RunReport, StepResult};

/// Progress callback for execution operations
///
/// Implement this trait to receive progress updates during a run.
pub trait ProgressCallback {
    /// Called once before the first step
    fn on_plan_start(&mut self, total: usize);

    /// Called when a step is about to be converged
    fn on_step_start(&mut self, step: &CompiledStep);

    /// Called when a step finishes, successfully or not
    fn on_step_complete(&mut self, result: &StepResult);

    /// Called once after the last executed step
    fn on_plan_complete(&mut self, report: &RunReport);
}

/// No-op progress callback
pub struct NoProgress;

impl ProgressCallback for NoProgress {
    fn on_plan_start(&mut self, _total: usize) {}
    fn on_step_start(&mut self, _step: &CompiledStep) {}
    fn on_step_complete(&mut self, _result: &StepResult) {}
    fn on_plan_complete(&mut self, _report: &RunReport) {}
}
