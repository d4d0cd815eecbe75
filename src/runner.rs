use anyhow::{Context, Result, bail};
use declarative::CommandOutput;
use std::process::{Command, Stdio};

/// Run a command and capture its output, whatever the exit status
pub fn capture(cmd: &mut Command) -> Result<CommandOutput> {
    log::trace!("exec: {}", describe(cmd));
    let output = cmd
        .stdin(Stdio::null())
        .output()
        .with_context(|| format!("Failed to execute: {}", describe(cmd)))?;
    Ok(output.into())
}

/// Run a command, failing with its stderr when it exits non-zero
pub fn checked(cmd: &mut Command) -> Result<CommandOutput> {
    let output = capture(cmd)?;
    if !output.success {
        let stderr = output.stderr_str();
        let stderr = stderr.trim();
        if stderr.is_empty() {
            bail!("Command failed: {}", describe(cmd));
        }
        bail!("Command failed: {}: {}", describe(cmd), stderr);
    }
    Ok(output)
}

/// Run a command silently, returning success/failure
pub fn run_quiet(cmd: &str, args: &[&str]) -> bool {
    Command::new(cmd)
        .args(args)
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map(|s| s.success())
        .unwrap_or(false)
}

/// Check if a command exists
pub fn command_exists(cmd: &str) -> bool {
    Command::new("which")
        .arg(cmd)
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map(|s| s.success())
        .unwrap_or(false)
}

fn describe(cmd: &Command) -> String {
    let mut parts = vec![cmd.get_program().to_string_lossy().to_string()];
    parts.extend(cmd.get_args().map(|a| a.to_string_lossy().to_string()));
    parts.join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_describe_joins_program_and_args() {
        let mut cmd = Command::new("apt-get");
        cmd.args(["install", "-y", "docker.io"]);
        assert_eq!(describe(&cmd), "apt-get install -y docker.io");
    }

    #[test]
    fn test_checked_reports_failure() {
        let err = checked(Command::new("sh").args(["-c", "echo boom >&2; exit 3"])).unwrap_err();
        assert!(err.to_string().contains("boom"));
    }

    #[test]
    fn test_checked_returns_stdout() {
        let output = checked(Command::new("sh").args(["-c", "echo hi"])).unwrap();
        assert!(output.success);
        assert_eq!(output.stdout_str(), "hi\n");
    }
}
