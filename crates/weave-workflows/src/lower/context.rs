// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Lowering context: per-activity state shared by the emitter and rewriter.

use weave_dsl::ast::Activity;
use weave_dsl::code::{Expr, TypeRef};
use weave_dsl::error::{Diagnostics, ErrorKind};
use weave_dsl::span::SourceSpan;
use weave_dsl::store::{Store, StoreId};

use crate::graph::Location;
use crate::oracle::SemanticIndex;

/// Context threaded through the impl pass of one activity.
pub struct LowerContext<'a> {
    pub activity: &'a Activity,
    pub semantics: &'a SemanticIndex,

    /// Recursion limit of the expression rewriter.
    pub max_depth: usize,

    pub diagnostics: Diagnostics,

    /// Counter for generating unique variable names
    counter: usize,
}

impl<'a> LowerContext<'a> {
    pub fn new(activity: &'a Activity, semantics: &'a SemanticIndex, max_depth: usize) -> Self {
        Self {
            activity,
            semantics,
            max_depth,
            diagnostics: Diagnostics::new(),
            counter: 0,
        }
    }

    /// Sanitize a string to be a valid identifier.
    pub fn sanitize_ident(s: &str) -> String {
        let mut result = String::with_capacity(s.len());
        for (i, c) in s.chars().enumerate() {
            if c.is_ascii_alphanumeric() || c == '_' {
                if i == 0 && c.is_ascii_digit() {
                    result.push('_');
                }
                result.push(c);
            } else {
                result.push('_');
            }
        }
        if result.is_empty() {
            result.push_str("_empty");
        }
        result
    }

    /// Fresh compiler-generated variable name.
    pub fn temp_var(&mut self, prefix: &str) -> String {
        self.counter += 1;
        format!("__{}{}", Self::sanitize_ident(prefix), self.counter)
    }

    pub fn report(&mut self, kind: ErrorKind, span: SourceSpan) {
        self.diagnostics.report(kind, span);
    }

    pub fn store(&self, id: StoreId) -> &'a Store {
        self.activity.store(id)
    }

    /// Store an expression node binds to, per the oracle.
    pub fn store_for(&self, expr: &Expr) -> Option<StoreId> {
        let marker = self.semantics.store_marker(expr.id)?;
        self.activity.store_by_marker(marker)
    }

    /// Declared type of a store, or the oracle's inference for `var`.
    pub fn store_type(&mut self, id: StoreId) -> TypeRef {
        let store = self.activity.store(id);
        if !store.ty.is_inferred() {
            return store.ty.clone();
        }
        match self.semantics.declaration_type(store.marker) {
            Some(ty) if !ty.is_inferred() => ty.clone(),
            _ => {
                self.report(
                    ErrorKind::UninferredStoreType {
                        name: store.name.clone(),
                    },
                    store.span,
                );
                TypeRef::object()
            }
        }
    }

    /// Location slot for a store.
    pub fn location(&mut self, id: StoreId) -> Location {
        let ty = self.store_type(id);
        Location::new(Some(ty), self.store(id).handle())
    }

    /// Static type of an expression, when the oracle reported one.
    pub fn expr_type(&self, expr: &Expr) -> Option<TypeRef> {
        self.semantics.ty(expr.id).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use weave_dsl::ast::Marker;
    use weave_dsl::store::{StoreHost, StoreKind};

    #[test]
    fn test_sanitize_ident() {
        assert_eq!(LowerContext::sanitize_ident("hello"), "hello");
        assert_eq!(LowerContext::sanitize_ident("hello-world"), "hello_world");
        assert_eq!(LowerContext::sanitize_ident("Send Order"), "Send_Order");
        assert_eq!(LowerContext::sanitize_ident("123abc"), "_123abc");
        assert_eq!(LowerContext::sanitize_ident(""), "_empty");
    }

    #[test]
    fn test_temp_var_unique() {
        let act = Activity::new("Main", SourceSpan::default());
        let index = SemanticIndex::default();
        let mut ctx = LowerContext::new(&act, &index, 8);
        assert_eq!(ctx.temp_var("r"), "__r1");
        assert_eq!(ctx.temp_var("step"), "__step2");
    }

    #[test]
    fn test_uninferred_store_type_reported() {
        let mut act = Activity::new("Main", SourceSpan::default());
        let id = act
            .declare(
                StoreHost::Activity,
                "x",
                TypeRef::inferred(),
                StoreKind::Local,
                Marker(1),
                SourceSpan::at(2, 3),
            )
            .unwrap();
        let index = SemanticIndex::default();
        let mut ctx = LowerContext::new(&act, &index, 8);
        assert_eq!(ctx.store_type(id), TypeRef::object());
        let errors = ctx.diagnostics.checkpoint().unwrap_err();
        assert!(errors.contains_code("W055"));
    }
}
