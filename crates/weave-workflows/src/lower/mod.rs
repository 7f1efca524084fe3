// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Impl pass: lower resolved activities to runtime node graphs.
//!
//! Runs after the oracle has analyzed the model output. Per activity, the
//! [`emitter`] walks the statement tree and the [`rewriter`] rewrites each
//! fragment run and value slot against the activity context.

pub mod context;
pub mod emitter;
pub mod rewriter;
pub mod steps;

use tracing::{debug, info};
use weave_dsl::ast::{Activity, CompilationUnit};
use weave_dsl::error::{CompileErrors, Diagnostics};

pub use context::LowerContext;
use emitter::Emitter;

use crate::graph::{ArgumentDecl, NodeGraph};
use crate::oracle::SemanticIndex;

/// Default recursion limit of the expression rewriter.
pub const DEFAULT_MAX_EXPR_DEPTH: usize = 64;

/// Lower one activity. Errors are reported into `diagnostics`.
pub fn lower_activity(
    activity: &Activity,
    namespace: Option<&str>,
    semantics: &SemanticIndex,
    max_depth: usize,
    diagnostics: &mut Diagnostics,
) -> NodeGraph {
    let mut emitter = Emitter::new(LowerContext::new(activity, semantics, max_depth));
    let body = emitter.root();

    let mut arguments = Vec::with_capacity(activity.parameters.len() + 1);
    for id in activity.parameters.iter().chain(activity.result.iter()) {
        let store = activity.store(*id);
        arguments.push(ArgumentDecl {
            name: store.name.clone(),
            ty: emitter.ctx.store_type(*id),
            direction: store.kind.direction(),
        });
    }

    let errors = emitter.ctx.diagnostics.checkpoint().err();
    debug!(
        activity = %activity.name,
        arguments = arguments.len(),
        errors = errors.as_ref().map_or(0, CompileErrors::len),
        "Lowered activity"
    );
    if let Some(errors) = errors {
        diagnostics.extend(errors);
    }

    NodeGraph {
        name: activity.name.clone(),
        namespace: namespace.map(str::to_string),
        arguments,
        body,
    }
}

/// Lower every activity of a unit, failing with all lowering errors.
pub fn lower_unit(
    unit: &CompilationUnit,
    semantics: &SemanticIndex,
    max_depth: usize,
) -> Result<Vec<NodeGraph>, CompileErrors> {
    let start = std::time::Instant::now();
    let mut diagnostics = Diagnostics::new();
    let graphs: Vec<NodeGraph> = unit
        .activities
        .iter()
        .map(|act| {
            lower_activity(
                act,
                unit.namespace.as_deref(),
                semantics,
                max_depth,
                &mut diagnostics,
            )
        })
        .collect();
    diagnostics.checkpoint()?;

    info!(
        unit = unit.index,
        activities = graphs.len(),
        lower_duration_ms = start.elapsed().as_millis() as u64,
        "Impl pass complete"
    );
    Ok(graphs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::NodeKind;
    use crate::model::emit_model;
    use crate::oracle::{ScopeOracle, SemanticOracle};
    use weave_dsl::ast::IdAllocator;
    use weave_dsl::build::build_unit;
    use weave_dsl::code::{CodeStmt, Direction, Expr};
    use weave_dsl::tree::{ParseNode, ParseUnit};

    fn analyze(unit: &CompilationUnit) -> SemanticIndex {
        let model = emit_model(std::slice::from_ref(unit), vec![]);
        SemanticIndex::new(ScopeOracle::new().analyze(&model.units, &[]).unwrap())
    }

    #[test]
    fn test_graph_arguments_include_result() {
        let parsed = ParseUnit {
            namespace: Some("Orders".to_string()),
            activities: vec![
                ParseNode::new("activity")
                    .with_text("Total")
                    .with_member(
                        "parameters",
                        ParseNode::new("parameters").with_item(
                            ParseNode::new("parameter")
                                .with_text("count")
                                .with_member("type", ParseNode::type_name("int")),
                        ),
                    )
                    .with_member("result", ParseNode::type_name("int"))
                    .with_member(
                        "body",
                        ParseNode::code_block(vec![CodeStmt::expr(Expr::assign(
                            Expr::name("Result"),
                            Expr::name("count"),
                        ))]),
                    ),
            ],
            ..Default::default()
        };
        let mut ids = IdAllocator::new();
        let unit = build_unit(&mut ids, 0, &parsed).unwrap();
        let graphs = lower_unit(&unit, &analyze(&unit), DEFAULT_MAX_EXPR_DEPTH).unwrap();

        let graph = &graphs[0];
        assert_eq!(graph.namespace.as_deref(), Some("Orders"));
        assert_eq!(graph.arguments.len(), 2);
        assert_eq!(graph.arguments[0].direction, Direction::In);
        assert_eq!(graph.arguments[1].name, "Result");
        assert_eq!(graph.arguments[1].direction, Direction::Out);
        let NodeKind::Code { body } = &graph.body.kind else {
            panic!("expected code body");
        };
        assert_eq!(
            weave_dsl::code::render_body(body),
            "Result.Set(__ctx, count.Get(__ctx));"
        );
    }

    #[test]
    fn test_lowering_errors_collected_across_activities() {
        let bad = |name: &str| {
            ParseNode::new("activity").with_text(name).with_member(
                "body",
                ParseNode::new("sequence")
                    .with_member(
                        "variables",
                        ParseNode::new("variables").with_item(
                            ParseNode::new("var")
                                .with_text("x")
                                .with_member("type", ParseNode::type_name("int")),
                        ),
                    )
                    .with_item(ParseNode::code_block(vec![CodeStmt::expr(Expr::call(
                        Expr::member(Expr::name("Tasks"), "Run"),
                        vec![weave_dsl::code::Argument::value(Expr::lambda(
                            vec![],
                            Expr::name("x"),
                        ))],
                    ))])),
            )
        };
        let parsed = ParseUnit {
            activities: vec![bad("One"), bad("Two")],
            ..Default::default()
        };
        let mut ids = IdAllocator::new();
        let unit = build_unit(&mut ids, 0, &parsed).unwrap();
        let errors = lower_unit(&unit, &analyze(&unit), DEFAULT_MAX_EXPR_DEPTH).unwrap_err();
        assert_eq!(errors.len(), 2);
        assert!(errors.contains_code("W050"));
    }
}
