//! Integration tests for the `tether` binary

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

use super::common::CodeFixture;

const WORKFLOW: &str = "\
import durable

@durable.activity
def double(x):
    return x * 2

def main(event):
    print('doubling', event)
    return double(event)
";

/// Command with an isolated data directory and stderr logging
fn tether(data_dir: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("tether").expect("binary should build");
    cmd.arg("--data-dir").arg(data_dir.path()).arg("--log-stderr");
    cmd
}

#[test]
fn test_instrument_routes_calls_through_the_hook() {
    let data = TempDir::new().unwrap();
    let code = CodeFixture::new().with_file("wf.flow", WORKFLOW);

    tether(&data)
        .arg("instrument")
        .arg(code.path().join("wf.flow"))
        .assert()
        .success()
        .stdout(predicate::str::contains("__hook__(double, event)"))
        .stdout(predicate::str::contains("__hook__(print").not());
}

#[test]
fn test_check_accepts_a_defined_entry_point() {
    let data = TempDir::new().unwrap();
    let code = CodeFixture::new().with_file("wf.flow", WORKFLOW);

    tether(&data)
        .args(["check", "wf.flow:main", "--code-dir"])
        .arg(code.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("ok: wf.flow:main"));
}

#[test]
fn test_check_rejects_a_missing_function() {
    let data = TempDir::new().unwrap();
    let code = CodeFixture::new().with_file("wf.flow", WORKFLOW);

    tether(&data)
        .args(["check", "wf.flow:absent", "--code-dir"])
        .arg(code.path())
        .assert()
        .failure()
        .stderr(predicate::str::contains("absent"));
}

#[test]
fn test_run_executes_activities_locally() {
    let data = TempDir::new().unwrap();
    let code = CodeFixture::new().with_file("wf.flow", WORKFLOW);

    tether(&data)
        .args(["run", "wf.flow:main", "--event", "21", "--code-dir"])
        .arg(code.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("doubling 21"))
        .stdout(predicate::str::contains("42"));

    // First run writes the example config into the data directory
    assert!(data.path().join("config.toml").exists());
}

#[test]
fn test_run_exits_nonzero_when_the_workflow_raises() {
    let data = TempDir::new().unwrap();
    let code = CodeFixture::new().with_file(
        "wf.flow",
        "def main(event):\n    raise KeyError('missing order')\n",
    );

    tether(&data)
        .args(["run", "wf.flow:main", "--code-dir"])
        .arg(code.path())
        .assert()
        .failure()
        .stderr(predicate::str::contains("missing order"));
}

#[test]
fn test_run_rejects_malformed_events() {
    let data = TempDir::new().unwrap();
    let code = CodeFixture::new().with_file("wf.flow", WORKFLOW);

    tether(&data)
        .args(["run", "wf.flow:main", "--event", "{not json", "--code-dir"])
        .arg(code.path())
        .assert()
        .failure()
        .stderr(predicate::str::contains("--event is not valid JSON"));
}
