//! Tests for the `run` command.

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

/// Test running from an artifact that does not exist.
#[test]
fn test_run_missing_artifact() {
    let dir = TempDir::new().unwrap();

    let mut cmd = Command::cargo_bin("astrohost").unwrap();
    cmd.arg("run")
        .arg(dir.path().join("libnothing.so"))
        .arg("entry");

    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("libnothing"));
}

/// Test that only known return types are accepted.
#[test]
fn test_run_rejects_unknown_return_type() {
    let mut cmd = Command::cargo_bin("astrohost").unwrap();
    cmd.arg("run")
        .arg("libfoo.so")
        .arg("entry")
        .arg("--returns")
        .arg("string");

    cmd.assert()
        .failure()
        .code(2)
        .stderr(predicate::str::contains("--returns"));
}
