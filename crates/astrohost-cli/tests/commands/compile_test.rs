//! Tests for the `compile` command.

use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use tempfile::TempDir;

/// Test that module and function are required.
#[test]
fn test_compile_requires_identity() {
    let mut cmd = Command::cargo_bin("astrohost").unwrap();
    cmd.arg("compile").arg("source.cpp");

    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("--module"));
}

/// Test a missing source file.
#[test]
fn test_compile_missing_source() {
    let mut cmd = Command::cargo_bin("astrohost").unwrap();
    cmd.arg("compile")
        .arg("/nonexistent/source.cpp")
        .arg("--module")
        .arg("m1")
        .arg("--function")
        .arg("f");

    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("Failed to read source"));
}

/// Test a toolchain that cannot be started.
#[test]
fn test_compile_with_missing_toolchain() {
    let dir = TempDir::new().unwrap();
    let source = dir.path().join("f.cpp");
    fs::write(&source, "extern \"C\" int f() { return 1; }\n").unwrap();

    let mut cmd = Command::cargo_bin("astrohost").unwrap();
    cmd.env("ASTROHOST_TOOLCHAIN", "astrohost-missing-toolchain")
        .env("ASTROHOST_OUTPUT_DIR", dir.path().join("out"))
        .current_dir(dir.path())
        .arg("compile")
        .arg(&source)
        .arg("--module")
        .arg("m1")
        .arg("--function")
        .arg("f");

    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("syntax check"));
}
