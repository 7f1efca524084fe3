// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! W language front-end data model
//!
//! This crate defines what the compiler passes work on:
//! - the generic labeled parse tree handed over by the external parser
//! - the embedded fragment language (expressions and statements)
//! - the statement tree and store model of each activity
//! - construction of statement trees from parse trees
//! - compile errors and the diagnostics sink

pub mod ast;
pub mod build;
pub mod code;
pub mod error;
pub mod span;
pub mod spec;
pub mod store;
pub mod tree;

pub use ast::{Activity, CompilationUnit, IdAllocator, Marker, StmtId, StmtKind, StmtTag};
pub use code::{CodeStmt, Direction, Expr, ExprId, ExprKind, TypeRef};
pub use error::{CompileError, CompileErrors, CompileResult, Diagnostics, ErrorKind};
pub use span::SourceSpan;
pub use store::{Store, StoreHost, StoreId, StoreKind};
pub use tree::{ParseNode, ParseProgram, ParseUnit};

/// Version of the parse-tree input format.
pub const LANGUAGE_VERSION: &str = "1.0.0";

/// Parse a program from a JSON value.
pub fn parse_program(json: &serde_json::Value) -> Result<ParseProgram, String> {
    serde_json::from_value(json.clone()).map_err(|e| format!("Failed to parse program: {}", e))
}

/// Parse a program from JSON text. A bare unit is accepted as a one-unit program.
pub fn parse_program_str(text: &str) -> Result<ParseProgram, String> {
    let json: serde_json::Value =
        serde_json::from_str(text).map_err(|e| format!("Invalid JSON: {}", e))?;
    if json.get("units").is_some() {
        parse_program(&json)
    } else {
        let unit: ParseUnit = serde_json::from_value(json)
            .map_err(|e| format!("Failed to parse unit: {}", e))?;
        Ok(ParseProgram { units: vec![unit] })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_program_str_accepts_bare_unit() {
        let program = parse_program_str(r#"{"activities": []}"#).unwrap();
        assert_eq!(program.units.len(), 1);

        let program = parse_program_str(r#"{"units": [{}, {}]}"#).unwrap();
        assert_eq!(program.units.len(), 2);

        assert!(parse_program_str("not json").is_err());
    }
}
