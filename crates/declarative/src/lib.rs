//! # Declarative
//!
//! An idempotent reconciliation engine for single-host provisioning.
//!
//! A caller declares an ordered list of desired-state assertions about a
//! host (packages, groups, users, directories, files, rendered templates,
//! containerized services). The engine compiles them against a variable
//! context, then converges the host one step at a time and reports whether
//! each step changed anything.
//!
//! ## Core Concepts
//!
//! - **ResourceSpec**: a typed, declarative description of one assertion
//! - **VariableContext**: named values referenced by specs, supplied once
//! - **ExecutionPlan**: validated, resolved, immutable steps in declared order
//! - **Backend**: converges exactly one resource kind and reports `changed`
//! - **RunReport**: ordered per-step outcomes plus overall flags
//!
//! ## Example
//!
//! ```ignore
//! use declarative::{compile, run_simple, memory::MemoryHost, ResourceSpec, VariableContext};
//!
//! let specs: Vec<ResourceSpec> = load_role()?;
//! let mut vars = VariableContext::new();
//! vars.insert("radio_bridge_uid_gid", 900);
//!
//! let host = MemoryHost::new();
//! let plan = compile(&specs, &vars, host.templates())?;
//! let convergers = host.convergers();
//! let report = run_simple(&plan, &convergers.backends());
//! assert!(report.succeeded);
//! ```
//!
//! ## Collaborator Traits
//!
//! Convergence logic lives here; talking to the real host does not.
//! Backends are built on narrow traits the caller implements:
//!
//! - [`PackageManager`]: query and install named packages
//! - [`AccountDatabase`]: look up and create system groups and users
//! - [`Filesystem`]: inspect paths, create directories, read and write bytes
//! - [`PayloadSource`]: resolve named static payloads
//! - [`ContainerRuntime`]: build images and start a project's services
//! - [`Renderer`] / [`TemplateSource`]: render templates
//!
//! Ordering is the caller's contract. The engine never reorders steps and
//! never retries a failed one.

pub mod backend;
pub mod context;
pub mod error;
pub mod executor;
pub mod memory;
pub mod planner;
pub mod spec;
pub mod template;
pub mod types;
pub mod vars;

// Re-export main types at crate root
pub use backend::{
    AccountDatabase, Backend, Backends, ContainerConverger, ContainerRuntime, Convergers,
    DirectoryConverger, FileCopyConverger, FileKind, Filesystem, GroupEntry, IdentityConverger,
    PackageConverger, PackageManager, PayloadSource, TemplateConverger, UserEntry,
};
pub use context::{NoProgress, ProgressCallback};
pub use error::{BackendError, CompileError, ErrorKind, RenderError, StepFailure};
pub use executor::{run, run_simple};
pub use planner::{CompiledStep, ExecutionPlan, compile};
pub use spec::{Param, ResourceKind, ResourceSpec};
pub use template::{Renderer, TemplateSource, TemplateStore};
pub use types::{CommandOutput, Desired, ErrorInfo, RunReport, StepResult};
pub use vars::{FromVariable, VariableContext};
