//! The exec orchestrator end to end: PATH injection, child lifecycle,
//! verification, and cleanup.
#![cfg(unix)]

use assert_cmd::Command;
use cli_replay_core::state::state_path_in;
use predicates::prelude::*;
use std::path::PathBuf;
use tempfile::tempdir;

fn bin() -> Command {
    Command::cargo_bin("cli-replay").unwrap()
}

const SCENARIO: &str = r#"
meta:
  name: deploy
steps:
  - match: {argv: [kubectl, apply, -f, deploy.yaml]}
    respond: {stdout: "deployment configured\n"}
  - match: {argv: [kubectl, get, deployment]}
    respond: {stdout: "nginx 1/1\n"}
"#;

fn write_scenario(dir: &std::path::Path, yaml: &str) -> PathBuf {
    let path = dir.join("scenario.yaml");
    std::fs::write(&path, yaml).unwrap();
    path
}

#[test]
fn exec_runs_child_with_interception_and_verifies() {
    let dir = tempdir().unwrap();
    let scenario = write_scenario(dir.path(), SCENARIO);

    bin()
        .env("TMPDIR", dir.path())
        .args(["exec"])
        .arg(&scenario)
        .args(["--", "sh", "-c", "kubectl apply -f deploy.yaml && kubectl get deployment"])
        .assert()
        .success()
        .stdout(predicate::str::contains("deployment configured"))
        .stdout(predicate::str::contains("nginx 1/1"))
        .stderr(predicate::str::contains("PASSED"));

    // State and intercept dir are cleaned up.
    let leftovers: Vec<_> = std::fs::read_dir(dir.path())
        .unwrap()
        .flatten()
        .filter(|e| {
            let name = e.file_name().to_string_lossy().into_owned();
            name.starts_with("cli-replay-state-") || name.starts_with("cli-replay-intercept-")
        })
        .collect();
    assert!(leftovers.is_empty(), "leftovers: {leftovers:?}");
}

#[test]
fn exec_fails_verification_when_steps_are_missed() {
    let dir = tempdir().unwrap();
    let scenario = write_scenario(dir.path(), SCENARIO);

    bin()
        .env("TMPDIR", dir.path())
        .args(["exec"])
        .arg(&scenario)
        .args(["--", "sh", "-c", "kubectl apply -f deploy.yaml"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("FAILED"));
}

#[test]
fn child_exit_code_dominates() {
    let dir = tempdir().unwrap();
    let scenario = write_scenario(dir.path(), SCENARIO);

    bin()
        .env("TMPDIR", dir.path())
        .args(["exec"])
        .arg(&scenario)
        .args(["--", "sh", "-c", "kubectl apply -f deploy.yaml; exit 7"])
        .assert()
        .code(7);
}

#[test]
fn missing_child_command_exits_127() {
    let dir = tempdir().unwrap();
    let scenario = write_scenario(dir.path(), SCENARIO);

    bin()
        .env("TMPDIR", dir.path())
        .args(["exec"])
        .arg(&scenario)
        .args(["--", "definitely-not-a-command-xyz"])
        .assert()
        .code(127);
}

#[test]
fn invalid_scenario_exits_1_without_side_effects() {
    let dir = tempdir().unwrap();
    let scenario = write_scenario(dir.path(), "meta: {name: x}\nsteps: []\nbogus: 1\n");

    bin()
        .env("TMPDIR", dir.path())
        .args(["exec"])
        .arg(&scenario)
        .args(["--", "true"])
        .assert()
        .code(1);

    let leftovers: Vec<_> = std::fs::read_dir(dir.path())
        .unwrap()
        .flatten()
        .filter(|e| {
            e.file_name()
                .to_string_lossy()
                .starts_with("cli-replay-intercept-")
        })
        .collect();
    assert!(leftovers.is_empty());
}

#[test]
fn allowlist_violation_is_rejected_before_setup() {
    let yaml = r#"
meta:
  name: restricted
  security:
    allowed_commands: [kubectl]
steps:
  - match: {argv: [docker, info]}
"#;
    let dir = tempdir().unwrap();
    let scenario = write_scenario(dir.path(), yaml);

    bin()
        .env("TMPDIR", dir.path())
        .args(["exec"])
        .arg(&scenario)
        .args(["--", "true"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("docker"));
}

#[test]
fn cli_allowlist_intersects_with_scenario() {
    let dir = tempdir().unwrap();
    let scenario = write_scenario(dir.path(), SCENARIO);

    // Scenario only uses kubectl, but the CLI list forbids it.
    bin()
        .env("TMPDIR", dir.path())
        .args(["exec", "--allowed-commands", "az,docker"])
        .arg(&scenario)
        .args(["--", "true"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("kubectl"));
}

#[test]
fn dry_run_prints_plan_without_running() {
    let dir = tempdir().unwrap();
    let scenario = write_scenario(dir.path(), SCENARIO);

    bin()
        .env("TMPDIR", dir.path())
        .args(["exec", "--dry-run"])
        .arg(&scenario)
        .args(["--", "sh", "-c", "exit 9"])
        .assert()
        .success()
        .stdout(predicate::str::contains("kubectl"));
}

#[test]
fn report_file_receives_junit_output() {
    let dir = tempdir().unwrap();
    let scenario = write_scenario(dir.path(), SCENARIO);
    let report = dir.path().join("report.xml");

    bin()
        .env("TMPDIR", dir.path())
        .args(["exec", "--format", "junit", "--report-file"])
        .arg(&report)
        .arg(&scenario)
        .args(["--", "sh", "-c", "kubectl apply -f deploy.yaml && kubectl get deployment"])
        .assert()
        .success();

    let xml = std::fs::read_to_string(&report).unwrap();
    assert!(xml.contains(r#"<testsuites name="cli-replay""#), "{xml}");
    assert!(xml.contains(r#"failures="0""#), "{xml}");
}

#[test]
fn signal_killed_child_maps_to_128_plus_signum() {
    let dir = tempdir().unwrap();
    let scenario = write_scenario(dir.path(), SCENARIO);

    // The child kills itself with SIGKILL (9).
    bin()
        .env("TMPDIR", dir.path())
        .args(["exec"])
        .arg(&scenario)
        .args(["--", "sh", "-c", "kill -9 $$"])
        .assert()
        .code(137);
}

#[test]
fn clean_is_idempotent_after_exec() {
    let dir = tempdir().unwrap();
    let scenario = write_scenario(dir.path(), SCENARIO);
    let canonical = scenario.canonicalize().unwrap();

    bin()
        .env("TMPDIR", dir.path())
        .args(["exec"])
        .arg(&scenario)
        .args(["--", "sh", "-c", "kubectl apply -f deploy.yaml && kubectl get deployment"])
        .assert()
        .success();

    assert!(!state_path_in(dir.path(), &canonical, "").exists());
    for _ in 0..2 {
        bin()
            .env("TMPDIR", dir.path())
            .env_remove("CLI_REPLAY_SESSION")
            .args(["clean"])
            .arg(&scenario)
            .assert()
            .success();
    }
}
