//! Tests for the `modules` command.

use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use tempfile::TempDir;

/// Test listing discovered scripts and artifacts.
#[test]
fn test_modules_lists_both_kinds() {
    let dir = TempDir::new().unwrap();
    let modules = dir.path().join("modules");
    let scripts = dir.path().join("scripts");
    fs::create_dir_all(&modules).unwrap();
    fs::create_dir_all(&scripts).unwrap();
    fs::write(
        modules.join(format!("camera{}", std::env::consts::DLL_SUFFIX)),
        b"",
    )
    .unwrap();
    fs::write(scripts.join("focuser.js"), "function move() {}\n").unwrap();

    let mut cmd = Command::cargo_bin("astrohost").unwrap();
    cmd.arg("modules")
        .arg("--modules-dir")
        .arg(&modules)
        .arg("--scripts-dir")
        .arg(&scripts);

    cmd.assert()
        .success()
        .stdout(predicate::str::contains("native"))
        .stdout(predicate::str::contains("camera"))
        .stdout(predicate::str::contains("script"))
        .stdout(predicate::str::contains("focuser"));
}

/// Test JSON output.
#[test]
fn test_modules_json_output() {
    let dir = TempDir::new().unwrap();
    let scripts = dir.path().join("scripts");
    fs::create_dir_all(&scripts).unwrap();
    fs::write(scripts.join("guide.js"), "function start() {}\n").unwrap();

    let mut cmd = Command::cargo_bin("astrohost").unwrap();
    cmd.arg("modules")
        .arg("--modules-dir")
        .arg(dir.path().join("missing"))
        .arg("--scripts-dir")
        .arg(&scripts)
        .arg("--json");

    cmd.assert()
        .success()
        .stdout(predicate::str::contains("\"kind\": \"script\""))
        .stdout(predicate::str::contains("\"name\": \"guide\""));
}

/// Test the message for empty directories.
#[test]
fn test_modules_empty() {
    let dir = TempDir::new().unwrap();

    let mut cmd = Command::cargo_bin("astrohost").unwrap();
    cmd.arg("modules")
        .arg("--modules-dir")
        .arg(dir.path())
        .arg("--scripts-dir")
        .arg(dir.path());

    cmd.assert()
        .success()
        .stdout(predicate::str::contains("No modules found"));
}
