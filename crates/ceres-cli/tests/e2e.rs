//! End-to-end tests for ceres CLI commands.

#![allow(deprecated)] // Allow deprecated Command::cargo_bin for tests

use std::fs;
use std::path::PathBuf;

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

/// A temporary directory holding one notebook file.
struct TestNotebook {
    _temp_dir: TempDir,
    path: PathBuf,
}

impl TestNotebook {
    fn new(cells: &[(&str, &str)]) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let path = temp_dir.path().join("test.ipynb");

        let cells: Vec<serde_json::Value> = cells
            .iter()
            .map(|(kind, source)| match *kind {
                "code" => serde_json::json!({
                    "cell_type": "code",
                    "metadata": {},
                    "source": source,
                    "outputs": [],
                    "execution_count": null,
                }),
                _ => serde_json::json!({
                    "cell_type": "markdown",
                    "metadata": {},
                    "source": source,
                }),
            })
            .collect();
        let notebook = serde_json::json!({
            "metadata": {},
            "nbformat": 4,
            "nbformat_minor": 5,
            "cells": cells,
        });
        fs::write(&path, notebook.to_string()).expect("Failed to write notebook");

        Self {
            _temp_dir: temp_dir,
            path,
        }
    }

    fn stored(&self) -> serde_json::Value {
        let content = fs::read_to_string(&self.path).expect("Failed to read notebook");
        serde_json::from_str(&content).expect("Invalid notebook JSON")
    }
}

fn ceres() -> Command {
    Command::cargo_bin("ceres").expect("Binary not built")
}

#[test]
fn test_help_lists_commands() {
    ceres()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("serve"))
        .stdout(predicate::str::contains("run"));
}

#[test]
fn test_run_missing_notebook() {
    ceres()
        .args(["run", "/definitely/not/here.ipynb"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Failed to open"));
}

#[test]
fn test_run_with_missing_interpreter() {
    let notebook = TestNotebook::new(&[("code", "1")]);
    ceres()
        .arg("run")
        .arg(&notebook.path)
        .args(["--python", "/definitely/not/python3"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("kernel failed to start"));
}

#[test]
fn test_conflicting_timeout_flags() {
    ceres()
        .args(["run", "x.ipynb", "--timeout", "3", "--no-timeout"])
        .assert()
        .failure();
}

#[test]
#[ignore = "Requires python3"]
fn test_run_executes_and_saves_outputs() {
    let notebook = TestNotebook::new(&[
        ("markdown", "# Title"),
        ("code", "x = 20\nprint('hello')"),
        ("code", "x + 22"),
    ]);

    ceres()
        .arg("run")
        .arg(&notebook.path)
        .assert()
        .success()
        .stdout(predicate::str::contains("hello"))
        .stdout(predicate::str::contains("42"))
        .stdout(predicate::str::contains("Completed"));

    let stored = notebook.stored();
    let cells = stored["cells"].as_array().unwrap();
    assert!(cells.iter().all(|c| c["id"].is_string()));
    assert_eq!(cells[2]["outputs"][0]["output_type"], "execute_result");
    assert_eq!(cells[2]["outputs"][0]["data"]["text/plain"], "42");
    assert_eq!(cells[2]["execution_count"], 2);
}

#[test]
#[ignore = "Requires python3"]
fn test_run_stops_at_error() {
    let notebook = TestNotebook::new(&[
        ("code", "raise RuntimeError('nope')"),
        ("code", "print('unreachable')"),
    ]);

    ceres()
        .arg("run")
        .arg(&notebook.path)
        .assert()
        .failure()
        .stdout(predicate::str::contains("RuntimeError: nope"))
        .stdout(predicate::str::contains("unreachable").not());

    let stored = notebook.stored();
    assert_eq!(stored["cells"][0]["outputs"][0]["output_type"], "error");
}

#[test]
#[ignore = "Requires python3"]
fn test_run_times_out() {
    let notebook = TestNotebook::new(&[("code", "import time\ntime.sleep(30)")]);

    ceres()
        .arg("run")
        .arg(&notebook.path)
        .args(["--timeout", "1"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("timed out"));
}
