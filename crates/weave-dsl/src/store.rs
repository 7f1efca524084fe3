// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Store model: typed, named locations visible to embedded code.
//!
//! Stores live in the owning [`Activity`]'s store table. Each store records
//! its host (the activity itself or the innermost declaring statement), and
//! name lookup walks from a host up through enclosing statements to the
//! activity.

use serde::Serialize;
use strum::{AsRefStr, Display};

use crate::ast::{Activity, Marker, StmtId};
use crate::code::{Direction, Expr, TypeRef};
use crate::error::{CompileResult, ErrorKind};
use crate::span::SourceSpan;

/// Index of a store in its activity's store table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct StoreId(pub u32);

/// Role of a store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Display, AsRefStr)]
#[strum(serialize_all = "lowercase")]
pub enum StoreKind {
    /// Input parameter.
    In,
    /// Output parameter.
    Out,
    /// In/out parameter.
    Ref,
    /// Variable local to a statement or the activity.
    Local,
    /// The activity's implicit result.
    Result,
}

impl StoreKind {
    /// Whether the store is part of the activity signature.
    pub fn is_argument(&self) -> bool {
        !matches!(self, StoreKind::Local)
    }

    /// Argument direction of an activity-level store.
    pub fn direction(&self) -> Direction {
        match self {
            StoreKind::In | StoreKind::Local => Direction::In,
            StoreKind::Out | StoreKind::Result => Direction::Out,
            StoreKind::Ref => Direction::Ref,
        }
    }
}

/// Where a store is declared.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum StoreHost {
    Activity,
    Statement(StmtId),
}

/// A typed, named location.
#[derive(Debug, Clone, PartialEq)]
pub struct Store {
    pub name: String,
    /// Declared type, possibly `var` until the oracle infers it.
    pub ty: TypeRef,
    pub kind: StoreKind,
    /// Declaration marker in the model output.
    pub marker: Marker,
    pub host: StoreHost,
    pub span: SourceSpan,
    /// Declared together with its initializer by a `Code` statement.
    pub initialized: bool,
    rewrite: Option<Expr>,
}

impl Store {
    pub fn new(
        name: impl Into<String>,
        ty: TypeRef,
        kind: StoreKind,
        marker: Marker,
        host: StoreHost,
        span: SourceSpan,
    ) -> Self {
        Self {
            name: name.into(),
            ty,
            kind,
            marker,
            host,
            span,
            initialized: false,
            rewrite: None,
        }
    }

    /// Redirect accesses to this store through `expr`. Allowed once.
    pub fn attach_rewrite(&mut self, expr: Expr) -> CompileResult<()> {
        if self.rewrite.is_some() {
            return Err(ErrorKind::RewriteAlreadyAttached {
                store: self.name.clone(),
            }
            .at(self.span));
        }
        self.rewrite = Some(expr);
        Ok(())
    }

    pub fn rewrite(&self) -> Option<&Expr> {
        self.rewrite.as_ref()
    }

    /// Expression that designates the runtime location of this store.
    pub fn handle(&self) -> Expr {
        self.rewrite
            .clone()
            .unwrap_or_else(|| Expr::name(self.name.clone()))
    }
}

impl Activity {
    /// Declare a store on `host`, rejecting names visible on the host chain.
    pub fn declare(
        &mut self,
        host: StoreHost,
        name: &str,
        ty: TypeRef,
        kind: StoreKind,
        marker: Marker,
        span: SourceSpan,
    ) -> CompileResult<StoreId> {
        if self.lookup(host, name).is_some() {
            return Err(ErrorKind::DuplicateName {
                name: name.to_string(),
            }
            .at(span));
        }
        let id = StoreId(self.stores.len() as u32);
        self.stores
            .push(Store::new(name, ty, kind, marker, host, span));
        match host {
            StoreHost::Activity => self.activity_stores.push(id),
            StoreHost::Statement(stmt) => self.stmt_mut(stmt).stores.push(id),
        }
        tracing::trace!(activity = %self.name, store = name, kind = %kind, "declared store");
        Ok(id)
    }

    /// Find the store named `name` visible from `from`.
    pub fn lookup(&self, from: StoreHost, name: &str) -> Option<StoreId> {
        let find = |ids: &[StoreId]| {
            ids.iter()
                .copied()
                .find(|id| self.store(*id).name == name)
        };
        if let StoreHost::Statement(start) = from {
            let mut current = Some(start);
            while let Some(id) = current {
                let stmt = self.stmt(id);
                if let Some(found) = find(&stmt.stores) {
                    return Some(found);
                }
                current = stmt.parent;
            }
        }
        find(&self.activity_stores)
    }

    pub fn store(&self, id: StoreId) -> &Store {
        &self.stores[id.0 as usize]
    }

    pub fn store_mut(&mut self, id: StoreId) -> &mut Store {
        &mut self.stores[id.0 as usize]
    }

    /// Find a store by its declaration marker.
    pub fn store_by_marker(&self, marker: Marker) -> Option<StoreId> {
        self.stores
            .iter()
            .position(|s| s.marker == marker)
            .map(|i| StoreId(i as u32))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{StmtKind, StmtTag};

    fn activity() -> Activity {
        let mut activity = Activity::new("Main", SourceSpan::default());
        let root = activity.alloc(StmtTag::Sequence, None, SourceSpan::default());
        activity.root = root;
        activity
    }

    #[test]
    fn test_duplicate_along_chain() {
        let mut act = activity();
        let root = act.root;
        act.declare(
            StoreHost::Activity,
            "x",
            TypeRef::int(),
            StoreKind::In,
            Marker(1),
            SourceSpan::default(),
        )
        .unwrap();

        let inner = act.alloc(StmtTag::Sequence, Some(root), SourceSpan::default());
        act.set_kind(inner, StmtKind::Sequence { members: vec![] });
        let err = act
            .declare(
                StoreHost::Statement(inner),
                "x",
                TypeRef::int(),
                StoreKind::Local,
                Marker(2),
                SourceSpan::at(3, 1),
            )
            .unwrap_err();
        assert_eq!(err.kind.code(), "W001");
    }

    #[test]
    fn test_siblings_may_reuse_names() {
        let mut act = activity();
        let root = act.root;
        let a = act.alloc(StmtTag::Sequence, Some(root), SourceSpan::default());
        let b = act.alloc(StmtTag::Sequence, Some(root), SourceSpan::default());
        let x1 = act
            .declare(
                StoreHost::Statement(a),
                "x",
                TypeRef::int(),
                StoreKind::Local,
                Marker(1),
                SourceSpan::default(),
            )
            .unwrap();
        let x2 = act
            .declare(
                StoreHost::Statement(b),
                "x",
                TypeRef::string(),
                StoreKind::Local,
                Marker(2),
                SourceSpan::default(),
            )
            .unwrap();
        assert_eq!(act.lookup(StoreHost::Statement(a), "x"), Some(x1));
        assert_eq!(act.lookup(StoreHost::Statement(b), "x"), Some(x2));
        assert_eq!(act.lookup(StoreHost::Statement(root), "x"), None);
        assert_eq!(act.store_by_marker(Marker(2)), Some(x2));
    }

    #[test]
    fn test_attach_rewrite_once() {
        let mut store = Store::new(
            "item",
            TypeRef::int(),
            StoreKind::Local,
            Marker(1),
            StoreHost::Activity,
            SourceSpan::default(),
        );
        assert_eq!(store.handle(), Expr::name("item"));
        store.attach_rewrite(Expr::name("__item_arg")).unwrap();
        assert_eq!(store.handle(), Expr::name("__item_arg"));
        let err = store.attach_rewrite(Expr::name("other")).unwrap_err();
        assert_eq!(err.kind.code(), "W091");
        assert_eq!(store.handle(), Expr::name("__item_arg"));
    }

    #[test]
    fn test_kind_directions() {
        assert_eq!(StoreKind::Result.direction(), Direction::Out);
        assert_eq!(StoreKind::Ref.direction(), Direction::Ref);
        assert!(!StoreKind::Local.is_argument());
        assert_eq!(StoreKind::Local.to_string(), "local");
    }
}
