// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Shared parse-tree builders for integration tests.

#![allow(dead_code)]

pub mod interpreter;

use weave_dsl::code::{CodeStmt, Expr};
use weave_dsl::tree::{ParseNode, ParseProgram, ParseUnit};
use weave_workflows::{CompilationInput, CompilationOutput, CompileFailure, CompilerConfig};

/// An activity with an empty body and an optional result type.
pub fn callee(name: &str, result: Option<&str>) -> ParseNode {
    let mut node = ParseNode::new("activity")
        .with_text(name)
        .with_member("body", ParseNode::new("sequence"));
    if let Some(result) = result {
        node = node.with_member("result", ParseNode::type_name(result));
    }
    node
}

pub fn activity(name: &str, body: ParseNode) -> ParseNode {
    ParseNode::new("activity").with_text(name).with_member("body", body)
}

/// A sequence declaring `vars` as `(name, type)` pairs.
pub fn sequence_with_vars(vars: &[(&str, &str)]) -> ParseNode {
    let mut decls = ParseNode::new("variables");
    for (name, ty) in vars {
        decls = decls.with_item(
            ParseNode::new("var")
                .with_text(*name)
                .with_member("type", ParseNode::type_name(*ty)),
        );
    }
    ParseNode::new("sequence").with_member("variables", decls)
}

pub fn code(body: Vec<CodeStmt>) -> ParseNode {
    ParseNode::code_block(body)
}

pub fn call(name: &str) -> ParseNode {
    code(vec![CodeStmt::expr(Expr::invoke(name, vec![]))])
}

/// An activity taking one `int` parameter named `tag`.
pub fn tagged_callee(name: &str, result: &str) -> ParseNode {
    callee(name, Some(result)).with_member(
        "parameters",
        ParseNode::new("parameters").with_item(
            ParseNode::new("parameter")
                .with_text("tag")
                .with_member("type", ParseNode::type_name("int")),
        ),
    )
}

/// A single unit in namespace `Orders`.
pub fn program(activities: Vec<ParseNode>) -> CompilationInput {
    CompilationInput {
        program: ParseProgram {
            units: vec![ParseUnit {
                namespace: Some("Orders".to_string()),
                activities,
                ..Default::default()
            }],
        },
        references: Vec::new(),
    }
}

/// Callees `A: int`, `B: bool` and `C` followed by `main`.
pub fn program_with_main(main: ParseNode) -> CompilationInput {
    program(vec![
        callee("A", Some("int")),
        callee("B", Some("bool")),
        callee("C", None),
        main,
    ])
}

pub fn compile(input: &CompilationInput) -> Result<CompilationOutput, CompileFailure> {
    weave_workflows::compile_with_config(input, &CompilerConfig::default())
}

/// Codes of every compile error in a failure.
pub fn error_codes(failure: &CompileFailure) -> Vec<&'static str> {
    failure
        .errors()
        .map(|errors| errors.iter().map(|e| e.kind.code()).collect())
        .unwrap_or_default()
}
