//! Tests for the `script` command.

use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use tempfile::TempDir;

fn math_script(dir: &TempDir) -> std::path::PathBuf {
    let path = dir.path().join("math.js");
    fs::write(
        &path,
        "function add(a, b) { return a + b; }\nfunction greet(name) { return 'hello ' + name; }\n",
    )
    .unwrap();
    path
}

/// Test calling a script function with JSON arguments.
#[test]
fn test_script_call_prints_result() {
    let dir = TempDir::new().unwrap();
    let path = math_script(&dir);

    let mut cmd = Command::cargo_bin("astrohost").unwrap();
    cmd.arg("script")
        .arg(&path)
        .arg("add")
        .arg("--args")
        .arg("[40, 2]");

    cmd.assert().success().stdout(predicate::str::contains("42"));
}

/// Test that string results are printed as JSON.
#[test]
fn test_script_string_result() {
    let dir = TempDir::new().unwrap();
    let path = math_script(&dir);

    let mut cmd = Command::cargo_bin("astrohost").unwrap();
    cmd.arg("script")
        .arg(&path)
        .arg("greet")
        .arg("--args")
        .arg(r#"["sky"]"#);

    cmd.assert()
        .success()
        .stdout(predicate::str::contains("\"hello sky\""));
}

/// Test that malformed arguments are rejected before loading.
#[test]
fn test_script_rejects_non_array_args() {
    let dir = TempDir::new().unwrap();
    let path = math_script(&dir);

    let mut cmd = Command::cargo_bin("astrohost").unwrap();
    cmd.arg("script")
        .arg(&path)
        .arg("add")
        .arg("--args")
        .arg("{\"a\": 1}");

    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("JSON array"));
}

/// Test calling a function the script does not define.
#[test]
fn test_script_unknown_function() {
    let dir = TempDir::new().unwrap();
    let path = math_script(&dir);

    let mut cmd = Command::cargo_bin("astrohost").unwrap();
    cmd.arg("script").arg(&path).arg("subtract");

    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("subtract"));
}
