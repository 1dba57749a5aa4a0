use super::reporting::{report_error_to, write_json, write_text};
use super::*;
use serde_json::Value;
use std::fs;
use std::path::Path;
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
  - aspect: Logging
    label: broken
    steps:
      - { op: introduce-method, target: Service, template: Missing }
"#;

fn write_fixture(dir: &Path, text: &str) -> WeaveArgs {
    let path = dir.join("aspects.yaml");
    fs::write(&path, text).expect("write fixture");
    WeaveArgs {
        fixture: path,
        mode: Some("sequential".into()),
        ..WeaveArgs::default()
    }
}

fn text_of(summary: &WeaveSummary) -> String {
    let mut out = Vec::new();
    write_text(summary, &mut out).expect("write text");
    String::from_utf8(out).expect("utf8")
}

#[test]
fn command_line_mode_overrides_configuration() {
    let configured = ExecutionMode::Parallel { max_workers: 8 };
    let mut args = WeaveArgs::default();
    assert_eq!(resolve_mode(&args, configured).expect("mode"), configured);

    args.max_workers = Some(2);
    assert_eq!(
        resolve_mode(&args, configured).expect("mode"),
        ExecutionMode::Parallel { max_workers: 2 }
    );

    args.seed = Some(11);
    assert_eq!(
        resolve_mode(&args, ExecutionMode::Sequential).expect("mode"),
        ExecutionMode::Randomized { seed: 11 }
    );

    args.mode = Some("sequential".into());
    args.seed = None;
    assert_eq!(resolve_mode(&args, configured).expect("mode"), ExecutionMode::Sequential);

    args.mode = Some("fastest".into());
    assert!(matches!(resolve_mode(&args, configured), Err(Error::Config { .. })));
}

#[test]
fn run_summary_lists_transformations_and_failures() {
    let dir = tempdir().expect("tempdir");
    let args = write_fixture(dir.path(), FIXTURE);
    let summary = weave(&args, &WeaverConfig::default(), true, true).expect("weave");

    assert_eq!(summary.instances, 2);
    assert_eq!(summary.advices, 2);
    assert_eq!(summary.failures.len(), 1);
    assert_eq!(summary.failures[0].instance, 1);
    assert_eq!(summary.failures[0].aspect, "broken");
    assert!(!summary.is_success());
    assert_eq!(summary.committed.map(|commit| commit.version), Some(1));

    let text = text_of(&summary);
    assert!(text.starts_with("Service\n"), "{text}");
    assert!(text.contains("override-body"), "{text}");
    assert!(text.contains("introduce"), "{text}");
    assert!(text.contains("ADV101"), "{text}");
    assert!(text.contains("failed: instance 1 (broken)"), "{text}");
    assert!(text.contains("committed snapshot v1"), "{text}");
    assert!(
        text.ends_with("2 advice(s) from 2 aspect instance(s) in sequential mode, 1 failed\n"),
        "{text}"
    );

    let status = outcome_status(&summary).expect_err("failed instance");
    assert_eq!(status.to_string(), "1 of 2 aspect instance(s) failed");
}

#[test]
fn check_skips_transformations() {
    let dir = tempdir().expect("tempdir");
    let args = write_fixture(dir.path(), FIXTURE);
    let summary = weave(&args, &WeaverConfig::default(), false, false).expect("weave");
    assert!(summary.report.is_none());
    assert!(summary.rendered.is_none());
    assert!(summary.committed.is_none());
    assert!(!text_of(&summary).contains("override-body"));
}

#[test]
fn json_summary_embeds_report_and_diagnostics() {
    let dir = tempdir().expect("tempdir");
    let args = write_fixture(dir.path(), FIXTURE);
    let summary = weave(&args, &WeaverConfig::default(), false, true).expect("weave");

    let mut out = Vec::new();
    write_json("run", &summary, &mut out).expect("write json");
    let value: Value = serde_json::from_slice(&out).expect("valid json");
    assert_eq!(value["command"], "run");
    assert_eq!(value["mode"], "sequential");
    assert_eq!(value["success"], false);
    assert_eq!(value["transformations"]["targets"][0]["target"], "Service");
    assert_eq!(value["failures"][0]["aspect"], "broken");
    assert_eq!(value["diagnostics"][0]["code"]["code"], "ADV101");
    assert!(value.get("committed").is_none());
}

#[test]
fn clean_fixture_succeeds() {
    let dir = tempdir().expect("tempdir");
    let clean = FIXTURE
        .split("  - aspect: Logging\n    label: broken")
        .next()
        .expect("prefix");
    let args = write_fixture(dir.path(), clean);
    let summary = weave(&args, &WeaverConfig::default(), false, true).expect("weave");
    assert!(summary.is_success(), "{summary:?}");
    assert!(outcome_status(&summary).is_ok());
}

#[test]
fn missing_fixture_is_a_configuration_error() {
    let dir = tempdir().expect("tempdir");
    let args = WeaveArgs {
        fixture: dir.path().join("absent.yaml"),
        ..WeaveArgs::default()
    };
    let err = weave(&args, &WeaverConfig::default(), false, true).expect_err("missing");
    assert!(matches!(err, Error::Config { .. }));
}

#[test]
fn report_error_prefixes_message() {
    let mut out = Vec::new();
    report_error_to(&Error::config("bad mode"), &mut out).expect("write");
    assert_eq!(
        String::from_utf8(out).expect("utf8"),
        "error: configuration error: bad mode\n"
    );
}
