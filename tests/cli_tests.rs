//! # CLI Integration Tests
//!
//! These tests run the compiled `node_test` binary against the in-process mock
//! MQTT broker (`--mqtt-factory mock`), so no external broker is needed. The
//! filter cases use a loopback topic (input and output topics coincide) so the
//! tester observes its own publication.
//!
//! ## Test Fixtures
//!
//! Stored in `tests/fixtures/`:
//! - `filter_loopback.json5` - Filter parameters over a custom message type
//! - `service_unanswered.json5` - A cataloged service that nobody serves
//! - `malformed.json5` - Truncated parameter file
//! - `msgs/tutorial_msgs/` - `.msg` and `.srv` definitions used by the above

use std::process::Command;

/// Helper function to run the CLI with given arguments and return output
fn run_cli(args: &[&str]) -> std::process::Output {
    Command::new(env!("CARGO_BIN_EXE_node_test"))
        .args(args)
        .output()
        .expect("Failed to run CLI")
}

/// Helper function to get fixture file path
fn fixture_path(filename: &str) -> String {
    format!("tests/fixtures/{}", filename)
}

fn stdout(output: &std::process::Output) -> String {
    String::from_utf8_lossy(&output.stdout).to_string()
}

#[test]
fn test_filter_loopback_passes() {
    let output = run_cli(&[
        "--params",
        &fixture_path("filter_loopback.json5"),
        "--msg-path",
        &fixture_path("msgs"),
        "--mqtt-factory",
        "mock",
        "--mqtt-uri",
        "mock://cli-filter-pass",
        "filter",
    ]);
    assert_eq!(
        output.status.code(),
        Some(0),
        "CLI command failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    let stdout = stdout(&output);
    assert!(stdout.contains("[node_test] filterTest ... ok"), "{}", stdout);
    assert!(stdout.trim_end().ends_with("filterTest exiting"), "{}", stdout);
}

#[test]
fn test_filter_mismatch_fails() {
    let output = run_cli(&[
        "--params",
        &fixture_path("filter_loopback.json5"),
        "--param",
        "msg_out={value: 3.5}",
        "--msg-path",
        &fixture_path("msgs"),
        "--mqtt-factory",
        "mock",
        "--mqtt-uri",
        "mock://cli-filter-fail",
        "filter",
    ]);
    assert_eq!(output.status.code(), Some(1));
    let stdout = stdout(&output);
    assert!(stdout.contains("[node_test] filterTest ... FAIL"), "{}", stdout);
    assert!(stdout.contains("Received message differs"), "{}", stdout);
}

#[test]
fn test_strict_mode_rejects_partial_messages() {
    let output = run_cli(&[
        "--params",
        &fixture_path("filter_loopback.json5"),
        "--msg-path",
        &fixture_path("msgs"),
        "--mqtt-factory",
        "mock",
        "--strict",
        "filter",
    ]);
    assert_eq!(output.status.code(), Some(1));
    assert!(stdout(&output).contains("Missing fields"));
}

#[test]
fn test_unknown_type_without_msg_path() {
    let output = run_cli(&[
        "--params",
        &fixture_path("filter_loopback.json5"),
        "--mqtt-factory",
        "mock",
        "filter",
    ]);
    assert_eq!(output.status.code(), Some(1));
    assert!(stdout(&output).contains("Unknown message type [tutorial_msgs/Reading]"));
}

#[test]
fn test_missing_parameters_report_resolved_name() {
    let output = run_cli(&["--mqtt-factory", "mock", "--node-name", "checker", "service"]);
    assert_eq!(output.status.code(), Some(1));
    let stdout = stdout(&output);
    assert!(stdout.contains("service_test not initialized properly"));
    assert!(stdout.contains("Caller ID: [/checker] Resolved name: [/checker/service_name]"));
    assert!(stdout.trim_end().ends_with("servicetest exiting"));
}

#[test]
fn test_unanswered_service_writes_report() {
    let dir = tempfile::tempdir().unwrap();
    let report_path = dir.path().join("report.json");
    let output = run_cli(&[
        "--params",
        &fixture_path("service_unanswered.json5"),
        "--msg-path",
        &fixture_path("msgs"),
        "--mqtt-factory",
        "mock",
        "--report",
        report_path.to_str().unwrap(),
        "service",
    ]);
    assert_eq!(output.status.code(), Some(1));

    let report: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&report_path).unwrap()).unwrap();
    assert_eq!(report["name"], "servicetest");
    assert_eq!(report["outcome"]["status"], "failed");
    let message = report["outcome"]["message"].as_str().unwrap();
    assert!(message.starts_with("Service proxy error:"), "{}", message);
}

#[test]
fn test_malformed_params_is_a_setup_error() {
    let output = run_cli(&[
        "--params",
        &fixture_path("malformed.json5"),
        "--mqtt-factory",
        "mock",
        "filter",
    ]);
    assert_eq!(output.status.code(), Some(2));
    assert!(String::from_utf8_lossy(&output.stderr).contains("could not be parsed"));
}

#[test]
fn test_missing_case_is_a_usage_error() {
    let output = run_cli(&["--mqtt-factory", "mock"]);
    assert_eq!(output.status.code(), Some(2));
}
