// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Compilation orchestration.
//!
//! Runs the passes in order, with an error barrier after each:
//!
//! 1. construction of the statement tree of every unit
//! 2. structural resolution (flowcharts, state machines, correlation)
//! 3. discovery of imported node types and the model pass
//! 4. one oracle call over all model units
//! 5. the impl pass of every unit
//!
//! The output is one node graph per activity plus the support
//! declarations emitted with unit 0.

use serde::Serialize;
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::{debug, error, info};
use weave_dsl::ast::{CompilationUnit, IdAllocator};
use weave_dsl::build::build_unit;
use weave_dsl::error::{CompileError, CompileErrors, Diagnostics, ErrorKind};
use weave_dsl::span::SourceSpan;
use weave_dsl::tree::ParseProgram;

use crate::config::{CompilerConfig, ConfigError};
use crate::graph::{NodeGraph, SupportDecl, support_declarations};
use crate::lower::lower_unit;
use crate::model::{ModelOutput, ModelUnit, emit_model, synthesize_external_types};
use crate::oracle::{
    Diagnostic, OracleError, ProcessOracle, ScopeOracle, SemanticIndex, SemanticOracle,
};
use crate::resolve::resolve_unit;

/// Input for compilation.
#[derive(Debug, Clone, Default)]
pub struct CompilationInput {
    /// Parsed compilation units, in unit order.
    pub program: ParseProgram,
    /// References handed to the oracle, in addition to configured ones.
    pub references: Vec<String>,
}

/// A lowered activity and the unit it came from.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompiledActivity {
    pub unit: u32,
    pub name: String,
    pub graph: NodeGraph,
}

/// Result of compiling a program.
#[derive(Debug, Clone, Serialize)]
pub struct CompilationOutput {
    pub activities: Vec<CompiledActivity>,
    /// Global declarations emitted once, with unit 0.
    pub support: Vec<SupportDecl>,
    /// SHA-256 of the serialized activities.
    pub checksum: String,
    /// Model programs handed to the oracle, in debug mode.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<Vec<ModelUnit>>,
}

impl CompilationOutput {
    pub fn activity(&self, name: &str) -> Option<&CompiledActivity> {
        self.activities.iter().find(|a| a.name == name)
    }
}

/// Why compilation stopped.
#[derive(Debug, Error)]
pub enum CompileFailure {
    #[error(transparent)]
    Errors(#[from] CompileErrors),

    #[error("semantic oracle failed: {0}")]
    Oracle(#[from] OracleError),

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("failed to encode output: {0}")]
    Encode(#[from] serde_json::Error),
}

impl CompileFailure {
    /// Compile errors carried by this failure, if any.
    pub fn errors(&self) -> Option<&CompileErrors> {
        match self {
            CompileFailure::Errors(errors) => Some(errors),
            _ => None,
        }
    }
}

/// Compile with the oracle selected by `config`.
pub fn compile_with_config(
    input: &CompilationInput,
    config: &CompilerConfig,
) -> Result<CompilationOutput, CompileFailure> {
    match &config.oracle_command {
        Some(command) => {
            let mut oracle = ProcessOracle::new(command)?;
            compile_program(input, &mut oracle, config)
        }
        None => compile_program(input, &mut ScopeOracle::new(), config),
    }
}

/// Compile a program against `oracle`.
pub fn compile_program(
    input: &CompilationInput,
    oracle: &mut dyn SemanticOracle,
    config: &CompilerConfig,
) -> Result<CompilationOutput, CompileFailure> {
    let compilation_start = std::time::Instant::now();
    let mut ids = IdAllocator::new();
    let mut diagnostics = Diagnostics::new();
    let references: Vec<String> = config
        .references
        .iter()
        .chain(&input.references)
        .cloned()
        .collect();

    // Construction
    let phase_start = std::time::Instant::now();
    let mut units = Vec::with_capacity(input.program.units.len());
    for (index, parsed) in input.program.units.iter().enumerate() {
        match build_unit(&mut ids, index as u32, parsed) {
            Ok(unit) => units.push(unit),
            Err(errors) => diagnostics.extend(errors),
        }
    }
    barrier(&mut diagnostics, "construction")?;
    info!(
        units = units.len(),
        activities = units.iter().map(|u| u.activities.len()).sum::<usize>(),
        build_duration_ms = phase_start.elapsed().as_millis() as u64,
        "Construction complete"
    );

    // Resolution
    let phase_start = std::time::Instant::now();
    for unit in &mut units {
        resolve_unit(unit, &mut ids, &mut diagnostics);
    }
    barrier(&mut diagnostics, "resolution")?;
    info!(
        resolve_duration_ms = phase_start.elapsed().as_millis() as u64,
        "Resolution complete"
    );

    // Model pass
    let imports = collect_imports(&units);
    let external = if imports.is_empty() {
        Vec::new()
    } else {
        let discovered = oracle
            .discover_node_types(&imports, &references)
            .map_err(|e| oracle_failure(e, None))?;
        debug!(discovered = discovered.len(), "Discovered node types");
        synthesize_external_types(&discovered)
    };
    let model = emit_model(&units, external);

    // Semantic analysis
    let phase_start = std::time::Instant::now();
    let semantics = oracle
        .analyze(&model.units, &references)
        .map_err(|e| oracle_failure(e, Some(&model)))?;
    let semantics = SemanticIndex::new(semantics);
    check_markers(&model, &semantics, &mut diagnostics);
    barrier(&mut diagnostics, "semantic analysis")?;
    info!(
        fragments = model.fragment_markers.len(),
        analyze_duration_ms = phase_start.elapsed().as_millis() as u64,
        "Semantic analysis complete"
    );

    // Impl pass
    let mut activities = Vec::new();
    for unit in &units {
        match lower_unit(unit, &semantics, config.max_expr_depth) {
            Ok(graphs) => activities.extend(graphs.into_iter().map(|graph| CompiledActivity {
                unit: unit.index,
                name: graph.name.clone(),
                graph,
            })),
            Err(errors) => diagnostics.extend(errors),
        }
    }
    barrier(&mut diagnostics, "lowering")?;

    let encoded = serde_json::to_vec(&activities)?;
    let checksum = format!("{:x}", Sha256::digest(&encoded));

    info!(
        activities = activities.len(),
        output_bytes = encoded.len(),
        compilation_duration_ms = compilation_start.elapsed().as_millis() as u64,
        "Program compiled successfully"
    );

    Ok(CompilationOutput {
        activities,
        support: support_declarations(),
        checksum,
        model: config.debug.then_some(model.units),
    })
}

fn barrier(diagnostics: &mut Diagnostics, phase: &str) -> Result<(), CompileErrors> {
    diagnostics.checkpoint().inspect_err(|errors| {
        error!(phase, errors = errors.len(), "Compilation failed");
    })
}

/// Imports of every unit, deduplicated in first-seen order.
fn collect_imports(units: &[CompilationUnit]) -> Vec<String> {
    let mut imports: Vec<String> = Vec::new();
    for import in units.iter().flat_map(|u| &u.imports) {
        if !imports.contains(import) {
            imports.push(import.clone());
        }
    }
    imports
}

/// Oracle diagnostics become compile errors at the span they name, or at
/// the span of their marker.
fn oracle_failure(err: OracleError, model: Option<&ModelOutput>) -> CompileFailure {
    match err {
        OracleError::Diagnostics(diagnostics) => {
            error!(count = diagnostics.len(), "Semantic analysis reported errors");
            let errors = diagnostics
                .into_iter()
                .map(|d| semantic_error(d, model))
                .collect();
            CompileFailure::Errors(CompileErrors(errors))
        }
        other => {
            error!(error = %other, "Semantic oracle failed");
            CompileFailure::Oracle(other)
        }
    }
}

fn semantic_error(diagnostic: Diagnostic, model: Option<&ModelOutput>) -> CompileError {
    let span = diagnostic
        .span
        .or_else(|| {
            let marker = diagnostic.marker?;
            model.and_then(|m| m.spans.get(&marker).copied())
        })
        .unwrap_or_default();
    ErrorKind::Semantic {
        message: diagnostic.message,
    }
    .at(span)
}

/// Every fragment emitted by the model pass must come back analyzed.
fn check_markers(model: &ModelOutput, semantics: &SemanticIndex, diagnostics: &mut Diagnostics) {
    for marker in &model.fragment_markers {
        if !semantics.has_fragment(*marker) {
            let span = model
                .spans
                .get(marker)
                .copied()
                .unwrap_or_else(SourceSpan::default);
            diagnostics.report(
                ErrorKind::internal(format!("fragment {} missing from the semantic model", marker)),
                span,
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ExternalNodeType;
    use crate::oracle::SemanticModel;
    use weave_dsl::code::{CodeStmt, Expr};
    use weave_dsl::tree::{ParseNode, ParseUnit};

    fn program(activities: Vec<ParseNode>) -> CompilationInput {
        CompilationInput {
            program: ParseProgram {
                units: vec![ParseUnit {
                    activities,
                    ..Default::default()
                }],
            },
            references: Vec::new(),
        }
    }

    fn code(body: Vec<CodeStmt>) -> ParseNode {
        ParseNode::code_block(body)
    }

    fn activity(name: &str, body: ParseNode) -> ParseNode {
        ParseNode::new("activity").with_text(name).with_member("body", body)
    }

    /// Oracle that answers with canned diagnostics.
    struct RejectingOracle;

    impl SemanticOracle for RejectingOracle {
        fn discover_node_types(
            &mut self,
            _imports: &[String],
            _references: &[String],
        ) -> Result<Vec<ExternalNodeType>, OracleError> {
            Ok(Vec::new())
        }

        fn analyze(
            &mut self,
            _units: &[ModelUnit],
            _references: &[String],
        ) -> Result<SemanticModel, OracleError> {
            Err(OracleError::Diagnostics(vec![Diagnostic {
                message: "cannot convert 'string' to 'int'".to_string(),
                marker: None,
                span: Some(SourceSpan::at(4, 2)),
            }]))
        }
    }

    /// Oracle that loses every fragment.
    struct ForgetfulOracle;

    impl SemanticOracle for ForgetfulOracle {
        fn discover_node_types(
            &mut self,
            _imports: &[String],
            _references: &[String],
        ) -> Result<Vec<ExternalNodeType>, OracleError> {
            Ok(Vec::new())
        }

        fn analyze(
            &mut self,
            _units: &[ModelUnit],
            _references: &[String],
        ) -> Result<SemanticModel, OracleError> {
            Ok(SemanticModel::default())
        }
    }

    #[test]
    fn test_compile_simple_program() {
        let input = program(vec![activity(
            "Hello",
            code(vec![CodeStmt::expr(Expr::method_call(
                Expr::name("Console"),
                "WriteLine",
                vec![Expr::string("hello")],
            ))]),
        )]);
        let output = compile_with_config(&input, &CompilerConfig::default()).unwrap();
        assert_eq!(output.activities.len(), 1);
        assert_eq!(output.checksum.len(), 64);
        assert!(!output.support.is_empty());
        assert!(output.model.is_none());
        assert!(output.activity("Hello").is_some());
    }

    #[test]
    fn test_checksum_is_deterministic() {
        let input = program(vec![activity(
            "Hello",
            code(vec![CodeStmt::expr(Expr::method_call(
                Expr::name("Console"),
                "WriteLine",
                vec![Expr::string("hello")],
            ))]),
        )]);
        let config = CompilerConfig::default();
        let a = compile_with_config(&input, &config).unwrap();
        let b = compile_with_config(&input, &config).unwrap();
        assert_eq!(a.checksum, b.checksum);
    }

    #[test]
    fn test_debug_includes_model() {
        let input = program(vec![activity("Empty", ParseNode::new("sequence"))]);
        let config = CompilerConfig {
            debug: true,
            ..Default::default()
        };
        let output = compile_with_config(&input, &config).unwrap();
        let model = output.model.unwrap();
        assert_eq!(model[0].types[0].name, "Empty");
    }

    #[test]
    fn test_oracle_diagnostics_become_semantic_errors() {
        let input = program(vec![activity("Empty", ParseNode::new("sequence"))]);
        let err = compile_program(&input, &mut RejectingOracle, &CompilerConfig::default())
            .unwrap_err();
        let errors = err.errors().unwrap();
        assert!(errors.contains_code("W040"));
        assert_eq!(errors.0[0].span, SourceSpan::at(4, 2));
    }

    #[test]
    fn test_missing_fragment_is_internal_error() {
        let input = program(vec![activity(
            "Hello",
            code(vec![CodeStmt::expr(Expr::int(1))]),
        )]);
        let err = compile_program(&input, &mut ForgetfulOracle, &CompilerConfig::default())
            .unwrap_err();
        assert!(err.errors().unwrap().contains_code("W090"));
    }

    #[test]
    fn test_unknown_name_rejected_by_scope_oracle() {
        let input = program(vec![activity(
            "Broken",
            code(vec![CodeStmt::expr(Expr::assign(
                Expr::name("missing"),
                Expr::int(1),
            ))]),
        )]);
        let err = compile_with_config(&input, &CompilerConfig::default()).unwrap_err();
        let errors = err.errors().unwrap();
        assert!(errors.contains_code("W040"));
        assert!(errors.to_string().contains("'missing'"));
    }

    #[test]
    fn test_construction_errors_stop_before_oracle() {
        let input = program(vec![ParseNode::new("activity").with_text("NoBody")]);
        let err = compile_program(&input, &mut RejectingOracle, &CompilerConfig::default())
            .unwrap_err();
        assert!(err.errors().unwrap().contains_code("W003"));
    }

    #[test]
    fn test_blank_oracle_command_is_transport_error() {
        let input = program(vec![activity("Empty", ParseNode::new("sequence"))]);
        let config = CompilerConfig {
            oracle_command: Some(" ".to_string()),
            ..Default::default()
        };
        let err = compile_with_config(&input, &config).unwrap_err();
        assert!(matches!(err, CompileFailure::Oracle(OracleError::Transport(_))));
    }
}
