// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Generic labeled parse tree.
//!
//! The external W parser produces one [`ParseUnit`] per source file. Every
//! construct is a [`ParseNode`] identified by its `label`, with named
//! `members`, ordered `items`, an optional `text` (names, type names) and
//! already-parsed embedded code.

use std::collections::BTreeMap;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::code::{CodeStmt, Expr, TypeRef};
use crate::error::{CompileResult, ErrorKind};
use crate::span::SourceSpan;

/// A node of the parse tree.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ParseNode {
    /// Construct label, e.g. `sequence`, `if`, `receive`.
    pub label: String,
    #[serde(default)]
    pub span: SourceSpan,
    /// Named children.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub members: BTreeMap<String, ParseNode>,
    /// Ordered children.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub items: Vec<ParseNode>,
    /// Identifier or type text carried by the node.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    /// Embedded statements, for `code` nodes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<Vec<CodeStmt>>,
    /// Embedded expression, for expression-valued members.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expr: Option<Expr>,
}

impl ParseNode {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            ..Default::default()
        }
    }

    /// An expression-valued node.
    pub fn expression(expr: Expr) -> Self {
        Self::new("expr").with_expr(expr)
    }

    /// A type-name node.
    pub fn type_name(ty: impl Into<String>) -> Self {
        Self::new("type").with_text(ty)
    }

    /// A name-reference node (jump targets, request names, compensation targets).
    pub fn reference(name: impl Into<String>) -> Self {
        Self::new("ref").with_text(name)
    }

    /// A `code` statement node.
    pub fn code_block(body: Vec<CodeStmt>) -> Self {
        let mut node = Self::new("code");
        node.code = Some(body);
        node
    }

    pub fn with_span(mut self, span: SourceSpan) -> Self {
        self.span = span;
        self
    }

    pub fn with_member(mut self, name: impl Into<String>, node: ParseNode) -> Self {
        self.members.insert(name.into(), node);
        self
    }

    /// Mark a boolean flag by presence of an empty member.
    pub fn with_flag(self, name: impl Into<String>) -> Self {
        self.with_member(name, ParseNode::new("flag"))
    }

    pub fn with_item(mut self, node: ParseNode) -> Self {
        self.items.push(node);
        self
    }

    pub fn with_items(mut self, nodes: impl IntoIterator<Item = ParseNode>) -> Self {
        self.items.extend(nodes);
        self
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into());
        self
    }

    pub fn with_expr(mut self, expr: Expr) -> Self {
        self.expr = Some(expr);
        self
    }

    pub fn member(&self, name: &str) -> Option<&ParseNode> {
        self.members.get(name)
    }

    pub fn has_flag(&self, name: &str) -> bool {
        self.members.contains_key(name)
    }

    pub fn items(&self) -> &[ParseNode] {
        &self.items
    }

    pub fn text(&self) -> Option<&str> {
        self.text.as_deref()
    }

    /// A member that must be present.
    pub fn require(&self, name: &str) -> CompileResult<&ParseNode> {
        self.member(name).ok_or_else(|| {
            ErrorKind::MissingMember {
                label: self.label.clone(),
                member: name.to_string(),
            }
            .at(self.span)
        })
    }

    /// The node's own text, which must be present.
    pub fn require_text(&self) -> CompileResult<&str> {
        self.text().ok_or_else(|| {
            ErrorKind::MissingMember {
                label: self.label.clone(),
                member: "text".to_string(),
            }
            .at(self.span)
        })
    }

    /// The text of a named member, if present.
    pub fn member_text(&self, name: &str) -> Option<&str> {
        self.member(name).and_then(|m| m.text())
    }

    /// The type named by a member, or `var` when absent.
    pub fn member_type(&self, name: &str) -> TypeRef {
        self.member_text(name)
            .map(TypeRef::new)
            .unwrap_or_else(TypeRef::inferred)
    }

    /// The embedded expression of a required member.
    pub fn require_expr(&self, name: &str) -> CompileResult<&Expr> {
        let node = self.require(name)?;
        node.expr.as_ref().ok_or_else(|| {
            ErrorKind::InvalidValue {
                label: self.label.clone(),
                detail: format!("member '{}' must be an expression", name),
            }
            .at(node.span)
        })
    }

    /// The embedded expression of an optional member.
    pub fn optional_expr(&self, name: &str) -> CompileResult<Option<&Expr>> {
        match self.member(name) {
            None => Ok(None),
            Some(_) => self.require_expr(name).map(Some),
        }
    }
}

/// One parsed source file.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ParseUnit {
    /// Source path, used in logs only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    /// Imported namespaces.
    #[serde(default)]
    pub imports: Vec<String>,
    /// `activity` nodes.
    #[serde(default)]
    pub activities: Vec<ParseNode>,
}

/// A whole program: every unit compiled together.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ParseProgram {
    pub units: Vec<ParseUnit>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_and_accessors() {
        let node = ParseNode::new("foreach")
            .with_text("item")
            .with_member("type", ParseNode::type_name("int"))
            .with_member("values", ParseNode::expression(Expr::name("xs")))
            .with_flag("ordered");

        assert_eq!(node.text(), Some("item"));
        assert_eq!(node.member_type("type"), TypeRef::int());
        assert_eq!(node.member_type("missing"), TypeRef::inferred());
        assert!(node.has_flag("ordered"));
        assert_eq!(node.require_expr("values").unwrap(), &Expr::name("xs"));
        assert!(node.optional_expr("until").unwrap().is_none());
    }

    #[test]
    fn test_missing_member_error() {
        let node = ParseNode::new("if").with_span(SourceSpan::at(4, 1));
        let err = node.require("condition").unwrap_err();
        assert_eq!(err.kind.code(), "W003");
        assert_eq!(err.span, SourceSpan::at(4, 1));
    }

    #[test]
    fn test_non_expression_member() {
        let node = ParseNode::new("while").with_member("condition", ParseNode::new("sequence"));
        let err = node.require_expr("condition").unwrap_err();
        assert_eq!(err.kind.code(), "W004");
    }

    #[test]
    fn test_deserialize_unit() {
        let json = r#"{
            "namespace": "Orders",
            "imports": ["Shipping"],
            "activities": [
                {"label": "activity", "text": "Main",
                 "members": {"body": {"label": "sequence", "items": [{"label": "persist"}]}}}
            ]
        }"#;
        let unit: ParseUnit = serde_json::from_str(json).unwrap();
        assert_eq!(unit.namespace.as_deref(), Some("Orders"));
        let body = unit.activities[0].member("body").unwrap();
        assert_eq!(body.items()[0].label, "persist");
    }
}
