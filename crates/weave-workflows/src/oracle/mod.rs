// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Semantic oracle interface.
//!
//! Name binding, overload resolution and typing of embedded code are
//! delegated to an external frontend. The compiler hands it the model
//! programs of every unit in one call and gets back, per fragment marker,
//! the symbol and static type of each expression node plus the inferred
//! type of each store declaration.

mod process;
mod scope;

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use weave_dsl::ast::Marker;
use weave_dsl::code::{ExprId, TypeRef};
use weave_dsl::span::SourceSpan;

use crate::model::{ExternalNodeType, ModelUnit, ScheduledParameter, SchedulingAttribute};

pub use process::ProcessOracle;
pub use scope::ScopeOracle;

/// A diagnostic reported by the oracle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Diagnostic {
    pub message: String,
    /// Fragment or declaration the diagnostic belongs to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub marker: Option<Marker>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub span: Option<SourceSpan>,
}

#[derive(Debug, Error)]
pub enum OracleError {
    #[error("semantic analysis reported {} diagnostic(s)", .0.len())]
    Diagnostics(Vec<Diagnostic>),

    #[error("oracle transport failed: {0}")]
    Transport(String),

    #[error("oracle protocol error: {0}")]
    Protocol(String),
}

/// A method an expression binds to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MethodSymbol {
    pub name: String,
    /// Qualified name of the declaring type.
    pub container: String,
    #[serde(default)]
    pub parameters: Vec<ScheduledParameter>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub return_type: Option<TypeRef>,
    /// Present when calling the method schedules a node.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scheduling: Option<SchedulingAttribute>,
}

/// What an expression node binds to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "symbol", rename_all = "camelCase")]
pub enum Symbol {
    /// A store, identified by its declaration marker.
    Store { declaration: Marker },
    /// A local of the fragment itself or a lambda parameter.
    Local,
    Method(MethodSymbol),
    Type { name: String },
    Other,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExprAnnotation {
    pub expr: ExprId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub symbol: Option<Symbol>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ty: Option<TypeRef>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnnotatedFragment {
    pub marker: Marker,
    pub exprs: Vec<ExprAnnotation>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeclarationType {
    pub marker: Marker,
    pub ty: TypeRef,
}

/// Oracle answer for a whole program.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SemanticModel {
    pub fragments: Vec<AnnotatedFragment>,
    pub declarations: Vec<DeclarationType>,
}

/// Frontend resolving the model programs.
pub trait SemanticOracle {
    /// Node types available in the imported namespaces.
    fn discover_node_types(
        &mut self,
        imports: &[String],
        references: &[String],
    ) -> Result<Vec<ExternalNodeType>, OracleError>;

    /// Bind and type every fragment of `units`.
    fn analyze(
        &mut self,
        units: &[ModelUnit],
        references: &[String],
    ) -> Result<SemanticModel, OracleError>;
}

/// Lookup tables over a [`SemanticModel`].
#[derive(Debug, Default)]
pub struct SemanticIndex {
    exprs: HashMap<ExprId, (Option<Symbol>, Option<TypeRef>)>,
    declarations: HashMap<Marker, TypeRef>,
    fragments: HashSet<Marker>,
}

impl SemanticIndex {
    pub fn new(model: SemanticModel) -> Self {
        let mut index = Self::default();
        for fragment in model.fragments {
            index.fragments.insert(fragment.marker);
            for annotation in fragment.exprs {
                index
                    .exprs
                    .insert(annotation.expr, (annotation.symbol, annotation.ty));
            }
        }
        for decl in model.declarations {
            index.declarations.insert(decl.marker, decl.ty);
        }
        index
    }

    pub fn symbol(&self, id: Option<ExprId>) -> Option<&Symbol> {
        id.and_then(|id| self.exprs.get(&id))
            .and_then(|(symbol, _)| symbol.as_ref())
    }

    pub fn ty(&self, id: Option<ExprId>) -> Option<&TypeRef> {
        id.and_then(|id| self.exprs.get(&id))
            .and_then(|(_, ty)| ty.as_ref())
    }

    /// Declaration marker of the store `id` binds to.
    pub fn store_marker(&self, id: Option<ExprId>) -> Option<Marker> {
        match self.symbol(id) {
            Some(Symbol::Store { declaration }) => Some(*declaration),
            _ => None,
        }
    }

    /// Scheduling attribute of the method `id` calls.
    pub fn scheduling(&self, id: Option<ExprId>) -> Option<&SchedulingAttribute> {
        match self.symbol(id) {
            Some(Symbol::Method(method)) => method.scheduling.as_ref(),
            _ => None,
        }
    }

    pub fn declaration_type(&self, marker: Marker) -> Option<&TypeRef> {
        self.declarations.get(&marker)
    }

    pub fn has_fragment(&self, marker: Marker) -> bool {
        self.fragments.contains(&marker)
    }
}
