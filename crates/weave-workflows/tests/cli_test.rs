// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Tests for the `weave-compile` binary.

mod common;

use common::*;
use std::fs;
use std::process::Command;
use weave_dsl::code::{CodeStmt, Expr};

fn weave_compile() -> Command {
    let mut command = Command::new(env!("CARGO_BIN_EXE_weave-compile"));
    for var in [
        "WEAVE_ORACLE_CMD",
        "WEAVE_REFERENCES",
        "WEAVE_MAX_EXPR_DEPTH",
        "WEAVE_DEBUG",
    ] {
        command.env_remove(var);
    }
    command
}

#[test]
fn test_compile_file_to_output() {
    let dir = tempfile::tempdir().unwrap();
    let input_path = dir.path().join("orders.json");
    let output_path = dir.path().join("orders.graph.json");

    let input = program_with_main(activity("Main", call("C")));
    fs::write(&input_path, serde_json::to_string(&input.program).unwrap()).unwrap();

    let output = weave_compile()
        .arg("--input")
        .arg(&input_path)
        .arg("--output")
        .arg(&output_path)
        .output()
        .unwrap();
    assert!(
        output.status.success(),
        "stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    assert_eq!(
        String::from_utf8_lossy(&output.stdout).trim(),
        output_path.display().to_string()
    );

    let written: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(&output_path).unwrap()).unwrap();
    assert_eq!(written["activities"].as_array().unwrap().len(), 4);
    assert_eq!(written["checksum"].as_str().unwrap().len(), 64);
    assert!(written.get("model").is_none());
}

#[test]
fn test_debug_flag_includes_model() {
    let dir = tempfile::tempdir().unwrap();
    let input_path = dir.path().join("orders.json");
    let input = program_with_main(activity("Main", call("C")));
    fs::write(&input_path, serde_json::to_string(&input.program).unwrap()).unwrap();

    let output = weave_compile()
        .arg("--input")
        .arg(&input_path)
        .arg("--debug")
        .output()
        .unwrap();
    assert!(output.status.success());
    let written: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(written["model"].as_array().unwrap().len(), 1);
}

#[test]
fn test_compile_errors_fail() {
    let dir = tempfile::tempdir().unwrap();
    let input_path = dir.path().join("broken.json");
    let main = code(vec![CodeStmt::expr(Expr::assign(Expr::name("total"), Expr::int(1)))]);
    let input = program_with_main(activity("Main", main));
    fs::write(&input_path, serde_json::to_string(&input.program).unwrap()).unwrap();

    let output = weave_compile().arg("--input").arg(&input_path).output().unwrap();
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("Compilation failed"));
}

#[test]
fn test_missing_input_argument() {
    let output = weave_compile().output().unwrap();
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("--input is required"));
}

#[test]
fn test_schema_flag() {
    let output = weave_compile().arg("--schema").output().unwrap();
    assert!(output.status.success());
    let schema: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert!(schema.get("x-statement-labels").is_some());
}
