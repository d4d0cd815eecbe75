//! End-to-end convergence of the radio-bridge role against an in-memory host

use declarative::memory::MemoryHost;
use declarative::{ErrorKind, ResourceKind, ResourceSpec, VariableContext, compile, run_simple};
use serde::Deserialize;

const PROJECT: &str = "/opt/app/radio-bridge";

const ROLE: &str = r#"
[[resource]]
kind = "group"
name = "radio-bridge"
gid = { var = "radio_bridge_uid_gid" }
system = true

[[resource]]
kind = "user"
name = "radio-bridge"
uid = { var = "radio_bridge_uid_gid" }
primary_group = "radio-bridge"
system = true

[[resource]]
kind = "directory"
path = "/opt/app/radio-bridge"

[[resource]]
kind = "template_render"
template = "docker-compose.yml"
dest = "/opt/app/radio-bridge/docker-compose.yml"

[resource.variables]
uid = { var = "radio_bridge_uid_gid" }
serial_device = "/dev/ttyUSB0"

[[resource]]
kind = "container_service"
project_path = "/opt/app/radio-bridge"
build_required = true
"#;

const COMPOSE: &str = "services:
  serial-bridge:
    build: .
    user: \"{{ uid }}:{{ uid }}\"
    devices:
      - \"{{ serial_device }}:{{ serial_device }}\"
";

#[derive(Deserialize)]
struct Role {
    resource: Vec<ResourceSpec>,
}

fn specs() -> Vec<ResourceSpec> {
    toml::from_str::<Role>(ROLE).unwrap().resource
}

fn vars(uid: u32) -> VariableContext {
    let mut vars = VariableContext::new();
    vars.insert("radio_bridge_uid_gid", uid);
    vars
}

fn host() -> MemoryHost {
    MemoryHost::new()
        .with_template("docker-compose.yml", COMPOSE)
        .with_project(PROJECT, &["serial-bridge"])
}

#[test]
fn fresh_host_converges_then_stays_converged() {
    let host = host();
    let plan = compile(&specs(), &vars(900), host.templates()).unwrap();
    let convergers = host.convergers();

    let first = run_simple(&plan, &convergers.backends());
    assert!(first.succeeded);
    assert_eq!(first.steps.len(), 5);
    assert!(first.steps.iter().all(|s| s.changed), "{first:#?}");

    let compose = host
        .file(format!("{PROJECT}/docker-compose.yml"))
        .map(String::from_utf8)
        .unwrap()
        .unwrap();
    assert!(compose.contains("user: \"900:900\""));
    assert!(compose.contains("/dev/ttyUSB0:/dev/ttyUSB0"));
    assert_eq!(host.running_services_of(PROJECT), vec!["serial-bridge"]);

    let second = run_simple(&plan, &convergers.backends());
    assert!(second.succeeded);
    assert!(!second.any_changed);
    assert!(second.steps.iter().all(|s| !s.changed));
}

#[test]
fn changed_identity_is_a_conflict_not_an_overwrite() {
    let host = host();
    let convergers = host.convergers();

    let plan = compile(&specs(), &vars(900), host.templates()).unwrap();
    assert!(run_simple(&plan, &convergers.backends()).succeeded);

    let plan = compile(&specs(), &vars(901), host.templates()).unwrap();
    let report = run_simple(&plan, &convergers.backends());

    assert!(!report.succeeded);
    assert_eq!(report.steps.len(), 1);
    let failure = report.failure().unwrap();
    assert_eq!(failure.kind, ResourceKind::Group);
    assert_eq!(
        failure.error.as_ref().map(|e| e.kind),
        Some(ErrorKind::IdentityConflict)
    );
    assert_eq!(host.group("radio-bridge").map(|g| g.gid), Some(900));
    assert_eq!(host.user("radio-bridge").map(|u| u.uid), Some(900));
}

#[test]
fn missing_variable_fails_before_touching_the_host() {
    let host = host();
    let err = compile(&specs(), &VariableContext::new(), host.templates()).unwrap_err();

    assert_eq!(err.kind(), ErrorKind::MissingVariable);
    assert_eq!(err.index(), 0);
    assert_eq!(host.mutations(), 0);
}

#[test]
fn stopped_service_is_restarted_on_rerun() {
    let host = host();
    let plan = compile(&specs(), &vars(900), host.templates()).unwrap();
    let convergers = host.convergers();
    run_simple(&plan, &convergers.backends());

    host.stop_service(PROJECT, "serial-bridge");
    let report = run_simple(&plan, &convergers.backends());

    let changed: Vec<_> = report
        .steps
        .iter()
        .filter(|s| s.changed)
        .map(|s| s.kind)
        .collect();
    assert_eq!(changed, vec![ResourceKind::ContainerService]);
}
