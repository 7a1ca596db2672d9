//! CLI integration tests that run without a docker daemon
//!
//! Exit-code policy under test: 0 on success, 1 on command failure, 2 on
//! usage errors (clap). Runtime-dependent paths are exercised up to the
//! validation boundary or with the docker binary pointed at nothing.

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

fn clawker(home: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("clawker").expect("binary");
    cmd.env("CLAWKER_HOME", home.path().join("clawker-home"));
    // Point docker at a nonexistent binary so nothing leaks to a real
    // daemon from CI machines.
    cmd.env("CLAWKER_DOCKER", home.path().join("no-such-docker"));
    cmd.env("NO_COLOR", "1");
    cmd
}

#[test]
fn help_exits_zero() {
    let home = TempDir::new().unwrap();
    clawker(&home)
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("container"));
}

#[test]
fn missing_image_is_a_usage_error() {
    let home = TempDir::new().unwrap();
    clawker(&home)
        .args(["container", "create"])
        .assert()
        .code(2);
}

#[test]
fn unknown_flag_is_a_usage_error() {
    let home = TempDir::new().unwrap();
    clawker(&home)
        .args(["container", "list", "--bogus-flag"])
        .assert()
        .code(2);
}

#[test]
fn invalid_mode_fails_before_runtime_contact() {
    let home = TempDir::new().unwrap();
    clawker(&home)
        .args(["container", "create", "--mode", "overlay", "alpine"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("Invalid workspace mode"));
}

#[test]
fn invalid_memory_suffix_fails_validation() {
    let home = TempDir::new().unwrap();
    clawker(&home)
        .args(["container", "create", "--memory", "10x", "alpine"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("memory suffix"));
}

#[test]
fn runtime_connect_failure_renders_next_steps() {
    let home = TempDir::new().unwrap();
    clawker(&home)
        .args(["container", "create", "alpine"])
        .assert()
        .code(1)
        .stderr(
            predicate::str::contains("error:")
                .and(predicate::str::contains("Next steps:")),
        );
}

#[test]
fn stop_without_targets_is_an_error() {
    let home = TempDir::new().unwrap();
    clawker(&home)
        .args(["container", "stop"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("no containers specified"));
}

#[test]
fn project_add_list_remove_round_trip() {
    let home = TempDir::new().unwrap();
    let repo = home.path().join("myrepo");
    std::fs::create_dir_all(&repo).unwrap();

    clawker(&home)
        .args(["project", "add", "My App", "--root"])
        .arg(&repo)
        .assert()
        .success()
        .stdout(predicate::str::contains("my-app"));

    clawker(&home)
        .args(["project", "ls"])
        .assert()
        .success()
        .stdout(
            predicate::str::contains("my-app").and(predicate::str::contains("My App")),
        );

    clawker(&home)
        .args(["project", "rm", "my-app"])
        .assert()
        .success();

    clawker(&home)
        .args(["project", "rm", "my-app"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("unknown project"));
}

#[test]
fn config_set_then_get_round_trips() {
    let home = TempDir::new().unwrap();

    clawker(&home)
        .args(["config", "set", "logging.level", "debug"])
        .assert()
        .success();

    clawker(&home)
        .args(["config", "get", "logging.level"])
        .assert()
        .success()
        .stdout(predicate::str::contains("debug"));
}

#[test]
fn config_set_rejects_wrong_scope() {
    let home = TempDir::new().unwrap();
    clawker(&home)
        .args([
            "config", "set", "build.image", "x", "--scope", "settings",
        ])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("owned by scope 'project'"));
}

#[test]
fn config_get_unknown_key_fails() {
    let home = TempDir::new().unwrap();
    clawker(&home)
        .args(["config", "get", "nonsense.key"])
        .assert()
        .code(1);
}

#[test]
fn config_write_exports_merged_view() {
    let home = TempDir::new().unwrap();
    let out = home.path().join("export.yaml");
    clawker(&home)
        .args(["config", "write", "--path"])
        .arg(&out)
        .assert()
        .success();
    let exported = std::fs::read_to_string(&out).unwrap();
    assert!(exported.contains("workspace"), "{exported}");
    assert!(exported.contains("logging"), "{exported}");
}

#[test]
fn proxy_status_reports_stopped_on_a_free_port() {
    let home = TempDir::new().unwrap();
    let port = std::net::TcpListener::bind(("127.0.0.1", 0))
        .and_then(|l| l.local_addr())
        .map(|a| a.port())
        .unwrap();
    clawker(&home)
        .env(
            "CLAWKER_SETTINGS_HOST_PROXY_MANAGER_PORT",
            port.to_string(),
        )
        .args(["proxy", "status"])
        .assert()
        .success()
        .stdout(predicate::str::contains("stopped"));
}

#[test]
fn create_outside_any_project_suggests_registration() {
    let home = TempDir::new().unwrap();
    // Use a real docker stub that answers `docker version` so the
    // pipeline reaches project resolution.
    let stub = home.path().join("docker-stub.sh");
    std::fs::write(&stub, "#!/bin/sh\nexit 0\n").unwrap();
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&stub, std::fs::Permissions::from_mode(0o755)).unwrap();
        clawker(&home)
            .env("CLAWKER_DOCKER", &stub)
            .current_dir(home.path())
            .args(["container", "create", "alpine"])
            .assert()
            .code(1)
            .stderr(predicate::str::contains("clawker project add"));
    }
}
