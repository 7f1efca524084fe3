// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Weave Workflows - compiler passes for W activities
//!
//! This crate lowers activities built by `weave-dsl` into node graphs that
//! the workflow runtime schedules and resumes.
//!
//! # Architecture
//!
//! ```text
//!     ┌─────────────┐      ┌─────────────┐      ┌─────────────┐
//!     │ Parse tree  │      │  Statement  │      │    Model    │
//!     │   (JSON)    │─────▶│    tree     │─────▶│   program   │
//!     └─────────────┘      └─────────────┘      └─────────────┘
//!                                                      │
//!                                                      ▼
//!     ┌─────────────┐      ┌─────────────┐      ┌─────────────┐
//!     │ Node graphs │◀─────│  Impl pass  │◀─────│   Oracle    │
//!     └─────────────┘      └─────────────┘      └─────────────┘
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use weave_workflows::{CompilationInput, CompilerConfig, compile_with_config};
//!
//! let program = weave_dsl::parse_program_str(&json)?;
//! let input = CompilationInput { program, references: vec![] };
//! let output = compile_with_config(&input, &CompilerConfig::from_env()?)?;
//! for activity in &output.activities {
//!     println!("{}: {:?}", activity.name, activity.graph.body.kind);
//! }
//! ```
//!
//! # Modules
//!
//! - [`resolve`]: name resolution for flowcharts, state machines and messaging
//! - [`model`]: the model pass, one program per unit for the oracle
//! - [`oracle`]: semantic analysis behind the [`SemanticOracle`] trait
//! - [`lower`]: the impl pass, statement trees to node graphs
//! - [`graph`]: the node graph produced for the runtime
//! - [`compile`]: pass orchestration

/// Compilation orchestration.
pub mod compile;

/// Configuration from environment variables.
pub mod config;

pub mod graph;
pub mod lower;
pub mod model;
pub mod oracle;
pub mod resolve;

pub use compile::{
    CompilationInput, CompilationOutput, CompileFailure, CompiledActivity, compile_program,
    compile_with_config,
};
pub use config::{CompilerConfig, ConfigError};
pub use graph::{Node, NodeGraph, NodeKind};
pub use oracle::{OracleError, ProcessOracle, ScopeOracle, SemanticIndex, SemanticOracle};

// Re-export front-end types for convenience
pub use weave_dsl::{CompileErrors, ParseProgram};
