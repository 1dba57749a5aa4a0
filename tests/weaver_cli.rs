use std::fs;
use std::path::{Path, PathBuf};

use assert_cmd::Command;
use predicates::prelude::PredicateBooleanExt;
use predicates::str::contains;
use tempfile::tempdir;

const FIXTURE: &str = r#"
types:
  - name: Service
    members:
      - { kind: method, name: Run, modifiers: [virtual] }
  - name: Logging
    members:
      - { kind: method, name: OverrideMethod, returns: dynamic, template: template }
      - { kind: method, name: Describe, returns: string, template: introduction }
aspects:
  - aspect: Logging
    steps:
      - { op: override-method, target: Service.Run, templates: { default: OverrideMethod } }
      - { op: introduce-method, target: Service, template: Describe }
"#;

fn weaver_cmd() -> Command {
    let mut cmd = Command::cargo_bin("weaver").expect("weaver binary");
    cmd.env_remove("WEAVER_CONFIG")
        .env_remove("WEAVER_LOG_LEVEL")
        .env_remove("WEAVER_LOG_FORMAT")
        .env_remove("RUST_LOG");
    cmd
}

fn write_fixture(dir: &Path, text: &str) -> PathBuf {
    let path = dir.join("aspects.yaml");
    fs::write(&path, text).expect("write fixture");
    path
}

#[test]
fn help_and_version_commands() {
    weaver_cmd()
        .arg("--help")
        .assert()
        .success()
        .stdout(contains("Usage: weaver"));

    weaver_cmd()
        .args(["help", "run"])
        .assert()
        .success()
        .stdout(contains("--commit"));

    weaver_cmd()
        .arg("--version")
        .assert()
        .success()
        .stdout(contains("weaver "));
}

#[test]
fn run_prints_transformations() {
    let dir = tempdir().expect("tempdir");
    let fixture = write_fixture(dir.path(), FIXTURE);
    weaver_cmd()
        .args(["run", fixture.to_str().expect("utf8 path"), "--commit"])
        .assert()
        .success()
        .stdout(
            contains("Service")
                .and(contains("override-body"))
                .and(contains("committed snapshot v1"))
                .and(contains("2 advice(s) from 1 aspect instance(s) in parallel mode, 0 failed")),
        );
}

#[test]
fn json_output_uses_configured_mode() {
    let dir = tempdir().expect("tempdir");
    let fixture = write_fixture(dir.path(), FIXTURE);
    fs::write(
        dir.path().join("weaver.yaml"),
        "execution:\n  mode: randomized\n  seed: 5\n",
    )
    .expect("write config");

    let output = weaver_cmd()
        .args(["run", fixture.to_str().expect("utf8 path"), "--format", "json"])
        .output()
        .expect("run weaver");
    assert!(output.status.success());
    let value: serde_json::Value = serde_json::from_slice(&output.stdout).expect("json");
    assert_eq!(value["mode"], "randomized(5)");
    assert_eq!(value["success"], true);
    assert_eq!(value["transformations"]["transformations"], 2);
}

#[test]
fn failing_instance_exits_with_error() {
    let dir = tempdir().expect("tempdir");
    let broken = FIXTURE.replace("template: Describe", "template: Missing");
    let fixture = write_fixture(dir.path(), &broken);
    weaver_cmd()
        .args(["check", fixture.to_str().expect("utf8 path"), "--mode", "sequential"])
        .assert()
        .failure()
        .stdout(contains("ADV101").and(contains("failed: instance 0 (Logging)")))
        .stderr(contains("1 of 1 aspect instance(s) failed"));
}

#[test]
fn invalid_arguments_and_config_are_reported() {
    weaver_cmd()
        .arg("weave")
        .assert()
        .failure()
        .stderr(contains("unknown command 'weave'"));

    let dir = tempdir().expect("tempdir");
    let fixture = write_fixture(dir.path(), FIXTURE);
    let config = dir.path().join("custom.yaml");
    fs::write(&config, "advice:\n  unknown-option: true\n").expect("write config");
    weaver_cmd()
        .args([
            "check",
            fixture.to_str().expect("utf8 path"),
            "--config",
            config.to_str().expect("utf8 path"),
        ])
        .assert()
        .failure()
        .stderr(contains("configuration error"));
}
