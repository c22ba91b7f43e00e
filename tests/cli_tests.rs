//! CLI integration tests

use assert_cmd::Command;
use predicates::prelude::*;
use std::io::Write;

fn blueprint_file(contents: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::Builder::new()
        .suffix(".yaml")
        .tempfile()
        .expect("create temp blueprint");
    file.write_all(contents.as_bytes()).expect("write blueprint");
    file
}

const VALID_BLUEPRINT: &str = r#"
schema_version: "1.1.0"
nodes:
  - id: fetch
    kind: tool
    tool_name: echo
    tool_args: { topic: "workflows" }
    input_schema: { topic: str }
    output_schema: { topic: str }
  - id: shout
    kind: tool
    tool_name: uppercase
    dependencies: [fetch]
    input_schema: { topic: str }
    output_schema: { topic: str }
    input_mappings:
      topic: { source_node_id: fetch, source_output_path: topic }
"#;

const INVALID_BLUEPRINT: &str = r#"
nodes:
  - id: bad
    kind: tool
    tool_name: echo
    input_schema: { x: str }
    output_schema: { y: invalid_type }
"#;

#[test]
fn validate_accepts_a_valid_blueprint() {
    let file = blueprint_file(VALID_BLUEPRINT);

    Command::cargo_bin("strata")
        .unwrap()
        .args(["validate", file.path().to_str().unwrap()])
        .assert()
        .success()
        .stdout(predicate::str::contains("Valid:"))
        .stdout(predicate::str::contains("2 nodes"));
}

#[test]
fn validate_rejects_and_names_the_field() {
    let file = blueprint_file(INVALID_BLUEPRINT);

    Command::cargo_bin("strata")
        .unwrap()
        .args(["validate", file.path().to_str().unwrap()])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("output_schema.y"));
}

#[test]
fn run_executes_a_blueprint() {
    let file = blueprint_file(VALID_BLUEPRINT);

    Command::cargo_bin("strata")
        .unwrap()
        .args(["run", file.path().to_str().unwrap()])
        .assert()
        .success()
        .stdout(predicate::str::contains("Run succeeded"))
        .stdout(predicate::str::contains("shout"));
}

#[test]
fn run_reports_node_failures() {
    let file = blueprint_file(
        r#"
nodes:
  - id: boom
    kind: tool
    tool_name: fail
    input_schema: { x: str }
    output_schema: { x: str }
"#,
    );

    Command::cargo_bin("strata")
        .unwrap()
        .args(["run", file.path().to_str().unwrap()])
        .assert()
        .code(1)
        .stdout(predicate::str::contains("Run failed"));
}

#[test]
fn run_emits_events_when_asked() {
    let file = blueprint_file(VALID_BLUEPRINT);

    Command::cargo_bin("strata")
        .unwrap()
        .args(["run", file.path().to_str().unwrap(), "--events"])
        .assert()
        .success()
        .stderr(predicate::str::contains("run_start"))
        .stderr(predicate::str::contains("node_end"));
}

#[test]
fn missing_file_is_an_io_error() {
    Command::cargo_bin("strata")
        .unwrap()
        .args(["validate", "does-not-exist.yaml"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("Error:"));
}
