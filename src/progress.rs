//! Terminal progress for plan execution

use colored::Colorize;
use declarative::{CompiledStep, ProgressCallback, RunReport, StepResult};
use indicatif::{ProgressBar, ProgressStyle};

/// Progress bar plus one line per finished step
pub struct TerminalProgress {
    bar: ProgressBar,
    visible: bool,
}

impl TerminalProgress {
    pub fn new(visible: bool) -> Self {
        Self {
            bar: ProgressBar::hidden(),
            visible,
        }
    }
}

impl ProgressCallback for TerminalProgress {
    fn on_plan_start(&mut self, total: usize) {
        if !self.visible {
            return;
        }
        let style = ProgressStyle::default_bar()
            .template("{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} {msg}")
            .map_or_else(|_| ProgressStyle::default_bar(), |s| s.progress_chars("=>-"));
        self.bar = ProgressBar::new(total as u64).with_style(style);
    }

    fn on_step_start(&mut self, step: &CompiledStep) {
        self.bar.set_message(step.desired.description());
    }

    fn on_step_complete(&mut self, result: &StepResult) {
        self.bar.inc(1);
        if !self.visible {
            return;
        }
        // Without a terminal the bar is hidden and swallows println.
        if self.bar.is_hidden() {
            eprintln!("{}", step_line(result));
        } else {
            self.bar.println(step_line(result));
        }
    }

    fn on_plan_complete(&mut self, _report: &RunReport) {
        self.bar.finish_and_clear();
    }
}

/// One-line outcome of a step: ✓ changed, ○ unchanged, ✗ failed
pub fn step_line(result: &StepResult) -> String {
    let label = format!("[{}] {} {}", result.spec_index, result.kind, result.id);
    match &result.error {
        Some(error) => format!(
            "  {} {} {}",
            "✗".red(),
            label,
            format!("{}: {}", error.kind, error.message).red()
        ),
        None if result.changed => format!("  {} {} {}", "✓".green(), label, "changed".green()),
        None => format!("  {} {}", "○".dimmed(), label.dimmed()),
    }
}
