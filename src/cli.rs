use clap::{Args, Parser, Subcommand};
use clap_complete::Shell;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "hostrole")]
#[command(author = "Alberto Cavalcante")]
#[command(version)]
#[command(about = "Converge this host to a declared role", long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Verbosity level
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Compile a role and show the ordered steps
    Plan(RoleArgs),

    /// Converge this host to a role
    Apply(ApplyArgs),

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

/// Which role to load and with which variables
#[derive(Args)]
pub struct RoleArgs {
    /// Role file (role.toml)
    #[arg(short, long, env = "HOSTROLE_ROLE")]
    pub role: String,

    /// Variables file, TOML or JSON (defaults to vars.toml next to the role)
    #[arg(long, env = "HOSTROLE_VARS")]
    pub vars: Option<String>,

    /// Set a variable, overriding the vars file (repeatable)
    #[arg(long = "var", value_name = "NAME=VALUE")]
    pub overrides: Vec<String>,
}

#[derive(Args)]
pub struct ApplyArgs {
    #[command(flatten)]
    pub role: RoleArgs,

    /// Skip the confirmation prompt
    #[arg(short, long)]
    pub yes: bool,

    /// Abort if the run takes longer than this many seconds
    #[arg(long, value_name = "SECS")]
    pub timeout: Option<u64>,

    /// Print the run report as JSON
    #[arg(long)]
    pub json: bool,
}

impl RoleArgs {
    pub fn role_path(&self) -> PathBuf {
        crate::paths::expand(&self.role)
    }

    pub fn vars_path(&self) -> Option<PathBuf> {
        self.vars.as_deref().map(crate::paths::expand)
    }
}
