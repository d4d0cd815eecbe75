//! `hostrole apply` - converge this host to a role

use anyhow::{Context as _, Result, bail};
use chrono::{DateTime, Utc};
use declarative::{ErrorInfo, ErrorKind, ExecutionPlan, RunReport, TemplateStore};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread;
use std::time::Duration;

use super::compile_role;
use super::plan::print_plan;
use crate::Context;
use crate::cli::ApplyArgs;
use crate::progress::TerminalProgress;
use crate::system::{self, Host};
use crate::ui;

enum Outcome {
    Finished(RunReport),
    TimedOut(Duration),
}

/// JSON document printed by `apply --json`
#[derive(Serialize)]
struct ApplyOutput<'a> {
    role: &'a str,
    started_at: DateTime<Utc>,
    finished_at: DateTime<Utc>,
    succeeded: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    report: Option<&'a RunReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<ErrorInfo>,
}

pub fn run(ctx: &Context, args: &ApplyArgs) -> Result<()> {
    let compiled = compile_role(&args.role)?;
    let human = !args.json && !ctx.quiet;

    if !system::is_root() {
        log::warn!("not running as root: package, account and container steps will likely fail");
    }

    if human {
        print_plan(&compiled);
        println!();
    }

    if compiled.plan.is_empty() {
        if human {
            ui::success("Nothing to converge");
        }
        return Ok(());
    }

    if !args.yes && !confirm(compiled.plan.len())? {
        ui::info("Aborted, no changes made");
        return Ok(());
    }

    let started_at = Utc::now();
    let outcome = execute(
        compiled.plan,
        compiled.templates,
        compiled.role.files_dir(),
        TerminalProgress::new(human),
        args.timeout.map(Duration::from_secs),
    )?;
    let finished_at = Utc::now();

    let (report, error) = match &outcome {
        Outcome::Finished(report) => (Some(report), None),
        Outcome::TimedOut(limit) => (
            None,
            Some(ErrorInfo {
                kind: ErrorKind::Timeout,
                message: format!("run exceeded {}s", limit.as_secs()),
            }),
        ),
    };

    if args.json {
        let output = ApplyOutput {
            role: &compiled.role.name,
            started_at,
            finished_at,
            succeeded: report.is_some_and(|r| r.succeeded),
            report,
            error: error.clone(),
        };
        println!("{}", serde_json::to_string_pretty(&output)?);
    } else if human && let Some(report) = report {
        print_summary(report, finished_at - started_at);
    }

    if let Some(error) = error {
        bail!("{}: {}", error.kind, error.message);
    }
    if let Some(failure) = report.and_then(RunReport::failure) {
        let error = failure.error.as_ref().map_or_else(
            || "unknown error".to_string(),
            |e| format!("{}: {}", e.kind, e.message),
        );
        bail!(
            "Step #{} ({} {}) failed with {}",
            failure.spec_index,
            failure.kind,
            failure.id,
            error
        );
    }
    Ok(())
}

fn confirm(steps: usize) -> Result<bool> {
    if !console::Term::stderr().is_term() {
        bail!("Refusing to apply without confirmation on a non-interactive terminal; pass --yes");
    }

    let confirmed = dialoguer::Confirm::new()
        .with_prompt(format!("Converge this host ({steps} step(s))?"))
        .default(false)
        .interact()?;

    Ok(confirmed)
}

/// Run the plan against the local host, on a worker thread when a time
/// limit applies
fn execute(
    plan: ExecutionPlan,
    templates: TemplateStore,
    payload_dir: PathBuf,
    mut progress: TerminalProgress,
    timeout: Option<Duration>,
) -> Result<Outcome> {
    with_deadline(timeout, move || {
        let host = Host::new(templates, payload_dir);
        let convergers = host.convergers();
        declarative::run(&plan, &convergers.backends(), &mut progress)
    })
}

/// Run `job` to completion, or give up waiting on it after `timeout`
fn with_deadline<F>(timeout: Option<Duration>, job: F) -> Result<Outcome>
where
    F: FnOnce() -> RunReport + Send + 'static,
{
    let Some(limit) = timeout else {
        return Ok(Outcome::Finished(job()));
    };

    let (tx, rx) = mpsc::channel();
    thread::Builder::new()
        .name("converge".to_string())
        .spawn(move || {
            // Nobody is listening any more once the deadline has passed.
            let _ = tx.send(job());
        })
        .context("Failed to spawn worker thread")?;

    match rx.recv_timeout(limit) {
        Ok(report) => Ok(Outcome::Finished(report)),
        Err(RecvTimeoutError::Timeout) => {
            log::error!(
                "run exceeded {}s; an in-flight command may still be running",
                limit.as_secs()
            );
            Ok(Outcome::TimedOut(limit))
        }
        Err(RecvTimeoutError::Disconnected) => bail!("Worker thread exited without a report"),
    }
}

fn print_summary(report: &RunReport, elapsed: chrono::TimeDelta) {
    println!();
    let took = format!("{:.1}s", elapsed.num_milliseconds() as f64 / 1000.0);

    if !report.succeeded {
        ui::error(&format!(
            "Run halted after {} step(s) ({took})",
            report.steps.len()
        ));
        return;
    }

    if report.any_changed {
        ui::success(&format!(
            "Host converged: {} changed, {} already in place ({took})",
            report.changed_count(),
            report.unchanged_count()
        ));
    } else {
        ui::success(&format!(
            "Host already converged, nothing changed ({took})"
        ));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use declarative::memory::MemoryHost;
    use declarative::spec::DirectorySpec;
    use declarative::{ResourceSpec, VariableContext, compile, run_simple};
    use std::time::Instant;

    #[test]
    fn test_deadline_expires_on_slow_run() {
        let started = Instant::now();
        let outcome = with_deadline(Some(Duration::from_millis(50)), || {
            thread::sleep(Duration::from_secs(2));
            RunReport::new()
        })
        .unwrap();

        assert!(matches!(
            outcome,
            Outcome::TimedOut(limit) if limit == Duration::from_millis(50)
        ));
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[test]
    fn test_deadline_returns_finished_report() {
        let outcome = with_deadline(Some(Duration::from_secs(30)), || {
            let specs = [ResourceSpec::Directory(DirectorySpec {
                path: PathBuf::from("/opt/app/radio-bridge"),
            })];
            let host = MemoryHost::new();
            let plan = compile(&specs, &VariableContext::new(), host.templates()).unwrap();
            run_simple(&plan, &host.convergers().backends())
        })
        .unwrap();

        match outcome {
            Outcome::Finished(report) => assert!(report.succeeded && report.any_changed),
            Outcome::TimedOut(_) => panic!("run should finish well within the limit"),
        }
    }

    #[test]
    fn test_no_deadline_runs_inline() {
        let caller = thread::current().id();
        let outcome = with_deadline(None, move || {
            assert_eq!(thread::current().id(), caller);
            RunReport::new()
        })
        .unwrap();
        assert!(matches!(outcome, Outcome::Finished(report) if report.steps.is_empty()));
    }
}
