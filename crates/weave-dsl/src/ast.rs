// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Statement tree of a W activity.
//!
//! Statements are stored in an arena owned by their [`Activity`]. Children
//! are referenced by [`StmtId`] from their parent's [`StmtKind`], and every
//! statement records its parent index for ancestor queries (nearest store
//! host, nearest catch, enclosing no-persist scope).

use serde::Serialize;
use strum::{AsRefStr, Display, EnumDiscriminants};

use crate::code::{CodeStmt, Expr, ExprId, TypeRef};
use crate::span::SourceSpan;
use crate::store::{Store, StoreHost, StoreId};

// ============================================================================
// Identifiers
// ============================================================================

/// Index of a statement in its activity's arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct StmtId(pub u32);

/// Write-once token tying a fragment or store declaration to its model-pass
/// counterpart.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    serde::Serialize,
    serde::Deserialize,
    schemars::JsonSchema,
)]
#[serde(transparent)]
pub struct Marker(pub u32);

impl std::fmt::Display for Marker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "__wm{}", self.0)
    }
}

/// Compilation-wide allocator for markers and expression ids.
#[derive(Debug, Default)]
pub struct IdAllocator {
    next_marker: u32,
    next_expr: u32,
}

impl IdAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn marker(&mut self) -> Marker {
        self.next_marker += 1;
        Marker(self.next_marker)
    }

    pub fn expr_id(&mut self) -> ExprId {
        self.next_expr += 1;
        ExprId(self.next_expr)
    }

    /// Give every node of `expr` a fresh id, replacing any the parser set.
    pub fn number_expr(&mut self, expr: &mut Expr) {
        expr.walk_mut(&mut |e| e.id = Some(self.expr_id()));
    }

    pub fn number_code(&mut self, body: &mut [CodeStmt]) {
        for stmt in body {
            stmt.walk_exprs_mut(&mut |e| e.id = Some(self.expr_id()));
        }
    }

    /// Number of markers handed out so far.
    pub fn markers_issued(&self) -> u32 {
        self.next_marker
    }
}

// ============================================================================
// Fragments
// ============================================================================

/// An embedded statement list.
#[derive(Debug, Clone, PartialEq)]
pub struct CodeFragment {
    pub marker: Marker,
    pub span: SourceSpan,
    pub body: Vec<CodeStmt>,
}

/// An embedded expression occupying a value slot of a W statement.
#[derive(Debug, Clone, PartialEq)]
pub struct ExprFragment {
    pub marker: Marker,
    pub span: SourceSpan,
    pub expr: Expr,
}

/// A by-name reference to a flowchart node or state.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeRef {
    pub name: String,
    pub span: SourceSpan,
    /// Filled in by resolution.
    pub resolved: Option<StmtId>,
}

impl NodeRef {
    pub fn new(name: impl Into<String>, span: SourceSpan) -> Self {
        Self {
            name: name.into(),
            span,
            resolved: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SwitchCase {
    pub key: ExprFragment,
    pub body: StmtId,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FlowCase {
    pub key: ExprFragment,
    pub target: NodeRef,
}

// ============================================================================
// Service operations
// ============================================================================

/// The four messaging operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, AsRefStr)]
pub enum ServiceKind {
    Receive,
    Send,
    SendReply,
    ReceiveReply,
}

/// Which end of a conversation an operation belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    /// The workflow is the service (receive, then send a reply).
    Service,
    /// The workflow is the client (send, then receive a reply).
    Client,
}

impl ServiceKind {
    pub fn side(&self) -> Side {
        match self {
            ServiceKind::Receive | ServiceKind::SendReply => Side::Service,
            ServiceKind::Send | ServiceKind::ReceiveReply => Side::Client,
        }
    }

    pub fn is_reply(&self) -> bool {
        matches!(self, ServiceKind::SendReply | ServiceKind::ReceiveReply)
    }

    /// Operations that receive data into stores.
    pub fn is_inbound(&self) -> bool {
        matches!(self, ServiceKind::Receive | ServiceKind::ReceiveReply)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ContentParameter {
    pub name: String,
    pub value: ExprFragment,
}

/// Message payload: a single value or named parameters.
#[derive(Debug, Clone, PartialEq)]
pub enum Content {
    Message(ExprFragment),
    Parameters(Vec<ContentParameter>),
}

impl Content {
    pub fn fragments(&self) -> Vec<&ExprFragment> {
        match self {
            Content::Message(f) => vec![f],
            Content::Parameters(params) => params.iter().map(|p| &p.value).collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ServiceOperation {
    pub kind: ServiceKind,
    /// Name other operations use to refer to this one.
    pub name: Option<String>,
    /// Service contract type. Replies inherit their request's.
    pub contract: Option<TypeRef>,
    pub operation: Option<String>,
    /// Outbound values, or inbound target locations.
    pub content: Option<Content>,
    /// Correlation handle this operation follows.
    pub correlates_with: Option<ExprFragment>,
    pub can_create_instance: bool,
    pub endpoint: Option<ExprFragment>,
    /// For replies: explicit request name.
    pub request_name: Option<String>,
    /// For replies: resolved request.
    pub request: Option<StmtId>,
    /// For requests: the reply that claimed it.
    pub reply: Option<StmtId>,
    /// For claimed requests: synthesized correlation handle store.
    pub correlation_store: Option<StoreId>,
}

impl ServiceOperation {
    /// Name used in diagnostics.
    pub fn display_name(&self) -> String {
        match (&self.name, &self.operation) {
            (Some(name), _) => name.clone(),
            (None, Some(op)) => format!("{} {}", self.kind, op),
            (None, None) => self.kind.to_string(),
        }
    }
}

// ============================================================================
// Statements
// ============================================================================

/// Statement variants.
#[derive(Debug, Clone, PartialEq, EnumDiscriminants)]
#[strum_discriminants(name(StmtTag), derive(Hash, Display, AsRefStr))]
pub enum StmtKind {
    Code {
        fragment: CodeFragment,
        /// Next sibling fragment lowered in the same run.
        chained: Option<StmtId>,
        /// Store this statement declares and initializes.
        initializes: Option<StoreId>,
    },
    Empty,
    Sequence {
        members: Vec<StmtId>,
    },
    If {
        condition: ExprFragment,
        then: StmtId,
        otherwise: Option<StmtId>,
    },
    While {
        condition: ExprFragment,
        body: StmtId,
        do_while: bool,
    },
    Switch {
        value: ExprFragment,
        cases: Vec<SwitchCase>,
        default: Option<StmtId>,
    },
    /// `None` rethrows the caught exception.
    Throw {
        exception: Option<ExprFragment>,
    },
    Try {
        body: StmtId,
        catches: Vec<StmtId>,
        finally: Option<StmtId>,
    },
    Catch {
        exception_type: TypeRef,
        variable: Option<StoreId>,
        body: StmtId,
    },
    ForEach {
        item: StoreId,
        values: ExprFragment,
        body: StmtId,
        parallel: bool,
        completion: Option<ExprFragment>,
    },
    Delay {
        duration: ExprFragment,
    },
    Parallel {
        branches: Vec<StmtId>,
        completion: Option<ExprFragment>,
    },
    Pick {
        branches: Vec<StmtId>,
    },
    PickBranch {
        trigger: StmtId,
        action: Option<StmtId>,
    },
    StateMachine {
        states: Vec<StmtId>,
        start: Option<NodeRef>,
        resolved_start: Option<StmtId>,
    },
    State {
        name: String,
        is_final: bool,
        entry: Option<StmtId>,
        exit: Option<StmtId>,
        transitions: Vec<StmtId>,
    },
    Transition {
        trigger: Option<StmtId>,
        bodies: Vec<StmtId>,
    },
    TransitionBody {
        condition: Option<ExprFragment>,
        action: Option<StmtId>,
        target: NodeRef,
    },
    Flow {
        nodes: Vec<StmtId>,
        start: Option<StmtId>,
    },
    FlowStep {
        name: Option<String>,
        action: StmtId,
        next: Option<NodeRef>,
        /// Explicit target or the following node.
        resolved_next: Option<StmtId>,
    },
    FlowIf {
        name: Option<String>,
        condition: ExprFragment,
        on_true: Option<NodeRef>,
        on_false: Option<NodeRef>,
    },
    FlowSwitch {
        name: Option<String>,
        value: ExprFragment,
        cases: Vec<FlowCase>,
        default: Option<NodeRef>,
    },
    Transacted {
        body: StmtId,
        timeout: Option<ExprFragment>,
    },
    Cancellable {
        body: StmtId,
        handler: Option<StmtId>,
    },
    Compensable {
        body: StmtId,
        token: Option<StoreId>,
        compensation: Option<StmtId>,
        confirmation: Option<StmtId>,
        cancellation: Option<StmtId>,
    },
    Confirm {
        target: Option<ExprFragment>,
    },
    Compensate {
        target: Option<ExprFragment>,
    },
    Persist,
    NoPersist {
        body: StmtId,
    },
    Terminate {
        reason: Option<ExprFragment>,
        exception: Option<ExprFragment>,
    },
    Service(ServiceOperation),
    ContentCorrelation {
        handle: ExprFragment,
        data: Vec<ContentParameter>,
    },
    TransactedReceive {
        request: StmtId,
        body: StmtId,
    },
}

impl StmtTag {
    /// Statements that may declare stores.
    pub fn is_store_host(&self) -> bool {
        matches!(
            self,
            StmtTag::Sequence
                | StmtTag::StateMachine
                | StmtTag::Flow
                | StmtTag::PickBranch
                | StmtTag::TransactedReceive
                | StmtTag::Catch
                | StmtTag::ForEach
        )
    }

    /// Nodes of a flowchart.
    pub fn is_flow_node(&self) -> bool {
        matches!(self, StmtTag::FlowStep | StmtTag::FlowIf | StmtTag::FlowSwitch)
    }
}

impl StmtKind {
    /// Child statements in source order.
    pub fn children(&self) -> Vec<StmtId> {
        let mut out = Vec::new();
        let opt = |out: &mut Vec<StmtId>, id: &Option<StmtId>| {
            if let Some(id) = id {
                out.push(*id);
            }
        };
        match self {
            StmtKind::Code { .. }
            | StmtKind::Empty
            | StmtKind::Throw { .. }
            | StmtKind::Delay { .. }
            | StmtKind::FlowIf { .. }
            | StmtKind::FlowSwitch { .. }
            | StmtKind::Confirm { .. }
            | StmtKind::Compensate { .. }
            | StmtKind::Persist
            | StmtKind::Terminate { .. }
            | StmtKind::Service(_)
            | StmtKind::ContentCorrelation { .. } => {}
            StmtKind::Sequence { members } => out.extend(members),
            StmtKind::If {
                then, otherwise, ..
            } => {
                out.push(*then);
                opt(&mut out, otherwise);
            }
            StmtKind::While { body, .. }
            | StmtKind::Catch { body, .. }
            | StmtKind::ForEach { body, .. }
            | StmtKind::NoPersist { body }
            | StmtKind::Transacted { body, .. } => out.push(*body),
            StmtKind::Switch { cases, default, .. } => {
                out.extend(cases.iter().map(|c| c.body));
                opt(&mut out, default);
            }
            StmtKind::Try {
                body,
                catches,
                finally,
            } => {
                out.push(*body);
                out.extend(catches);
                opt(&mut out, finally);
            }
            StmtKind::Parallel { branches, .. } | StmtKind::Pick { branches } => {
                out.extend(branches)
            }
            StmtKind::PickBranch { trigger, action } => {
                out.push(*trigger);
                opt(&mut out, action);
            }
            StmtKind::StateMachine { states, .. } => out.extend(states),
            StmtKind::State {
                entry,
                exit,
                transitions,
                ..
            } => {
                opt(&mut out, entry);
                opt(&mut out, exit);
                out.extend(transitions);
            }
            StmtKind::Transition { trigger, bodies } => {
                opt(&mut out, trigger);
                out.extend(bodies);
            }
            StmtKind::TransitionBody { action, .. } => opt(&mut out, action),
            StmtKind::Flow { nodes, .. } => out.extend(nodes),
            StmtKind::FlowStep { action, .. } => out.push(*action),
            StmtKind::Cancellable { body, handler } => {
                out.push(*body);
                opt(&mut out, handler);
            }
            StmtKind::Compensable {
                body,
                compensation,
                confirmation,
                cancellation,
                ..
            } => {
                out.push(*body);
                opt(&mut out, compensation);
                opt(&mut out, confirmation);
                opt(&mut out, cancellation);
            }
            StmtKind::TransactedReceive { request, body } => {
                out.push(*request);
                out.push(*body);
            }
        }
        out
    }

    /// Name of a flowchart node or state.
    pub fn node_name(&self) -> Option<&str> {
        match self {
            StmtKind::State { name, .. } => Some(name),
            StmtKind::FlowStep { name, .. }
            | StmtKind::FlowIf { name, .. }
            | StmtKind::FlowSwitch { name, .. } => name.as_deref(),
            _ => None,
        }
    }
}

/// A statement in the arena.
#[derive(Debug, Clone, PartialEq)]
pub struct Stmt {
    pub parent: Option<StmtId>,
    pub span: SourceSpan,
    pub tag: StmtTag,
    pub kind: StmtKind,
    /// Stores declared by this statement.
    pub stores: Vec<StoreId>,
}

// ============================================================================
// Activity
// ============================================================================

/// A workflow definition: signature, statement arena and store table.
#[derive(Debug, Clone)]
pub struct Activity {
    pub name: String,
    pub span: SourceSpan,
    pub stmts: Vec<Stmt>,
    pub stores: Vec<Store>,
    /// Parameter stores in declaration order.
    pub parameters: Vec<StoreId>,
    pub result: Option<StoreId>,
    /// Stores hosted by the activity itself.
    pub activity_stores: Vec<StoreId>,
    pub root: StmtId,
    /// Service operations in document order.
    pub service_operations: Vec<StmtId>,
    temp_counter: u32,
}

impl Activity {
    pub fn new(name: impl Into<String>, span: SourceSpan) -> Self {
        Self {
            name: name.into(),
            span,
            stmts: Vec::new(),
            stores: Vec::new(),
            parameters: Vec::new(),
            result: None,
            activity_stores: Vec::new(),
            root: StmtId(0),
            service_operations: Vec::new(),
            temp_counter: 0,
        }
    }

    /// Reserve an arena slot. The kind is filled in once children exist.
    pub fn alloc(&mut self, tag: StmtTag, parent: Option<StmtId>, span: SourceSpan) -> StmtId {
        let id = StmtId(self.stmts.len() as u32);
        self.stmts.push(Stmt {
            parent,
            span,
            tag,
            kind: StmtKind::Empty,
            stores: Vec::new(),
        });
        id
    }

    pub fn set_kind(&mut self, id: StmtId, kind: StmtKind) {
        let stmt = self.stmt_mut(id);
        debug_assert_eq!(stmt.tag, StmtTag::from(&kind));
        stmt.kind = kind;
    }

    pub fn stmt(&self, id: StmtId) -> &Stmt {
        &self.stmts[id.0 as usize]
    }

    pub fn stmt_mut(&mut self, id: StmtId) -> &mut Stmt {
        &mut self.stmts[id.0 as usize]
    }

    pub fn kind(&self, id: StmtId) -> &StmtKind {
        &self.stmt(id).kind
    }

    pub fn parent(&self, id: StmtId) -> Option<StmtId> {
        self.stmt(id).parent
    }

    /// Proper ancestors of `id`, innermost first.
    pub fn ancestors(&self, id: StmtId) -> impl Iterator<Item = StmtId> + '_ {
        std::iter::successors(self.parent(id), move |p| self.parent(*p))
    }

    /// Nearest proper ancestor satisfying `pred`.
    pub fn nearest_ancestor(
        &self,
        id: StmtId,
        pred: impl Fn(&Stmt) -> bool,
    ) -> Option<StmtId> {
        self.ancestors(id).find(|a| pred(self.stmt(*a)))
    }

    /// Nearest ancestor (or `id` itself) with one of the given tags.
    pub fn nearest_with_tag(&self, id: StmtId, tags: &[StmtTag]) -> Option<StmtId> {
        std::iter::once(id)
            .chain(self.ancestors(id))
            .find(|a| tags.contains(&self.stmt(*a).tag))
    }

    /// Store host for declarations made at `id`.
    pub fn store_host(&self, id: StmtId) -> StoreHost {
        std::iter::once(id)
            .chain(self.ancestors(id))
            .find(|a| self.stmt(*a).tag.is_store_host())
            .map(StoreHost::Statement)
            .unwrap_or(StoreHost::Activity)
    }

    /// Fresh temporary name, unique within this activity.
    pub fn next_temp(&mut self, prefix: &str) -> String {
        self.temp_counter += 1;
        format!("__{}{}", prefix, self.temp_counter)
    }

    /// Type of the result store, if the activity has one.
    pub fn result_type(&self) -> Option<&TypeRef> {
        self.result.map(|id| &self.store(id).ty)
    }

    /// Pre-order traversal of the statement tree from `root`.
    pub fn preorder(&self) -> Vec<StmtId> {
        let mut out = Vec::with_capacity(self.stmts.len());
        let mut stack = vec![self.root];
        while let Some(id) = stack.pop() {
            out.push(id);
            let children = self.kind(id).children();
            stack.extend(children.into_iter().rev());
        }
        out
    }

    /// The service operation at `id`, if it is one.
    pub fn service(&self, id: StmtId) -> Option<&ServiceOperation> {
        match self.kind(id) {
            StmtKind::Service(op) => Some(op),
            _ => None,
        }
    }

    pub fn service_mut(&mut self, id: StmtId) -> Option<&mut ServiceOperation> {
        match &mut self.stmt_mut(id).kind {
            StmtKind::Service(op) => Some(op),
            _ => None,
        }
    }
}

/// The statement trees built from one source file.
#[derive(Debug, Clone)]
pub struct CompilationUnit {
    pub index: u32,
    pub path: Option<String>,
    pub namespace: Option<String>,
    pub imports: Vec<String>,
    pub activities: Vec<Activity>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::code::CodeStmt;

    fn tree() -> (Activity, StmtId, StmtId, StmtId) {
        let mut act = Activity::new("Main", SourceSpan::default());
        let root = act.alloc(StmtTag::Sequence, None, SourceSpan::default());
        let cond = act.alloc(StmtTag::If, Some(root), SourceSpan::default());
        let then = act.alloc(StmtTag::Persist, Some(cond), SourceSpan::default());
        act.set_kind(then, StmtKind::Persist);
        act.set_kind(
            cond,
            StmtKind::If {
                condition: ExprFragment {
                    marker: Marker(1),
                    span: SourceSpan::default(),
                    expr: Expr::boolean(true),
                },
                then,
                otherwise: None,
            },
        );
        act.set_kind(root, StmtKind::Sequence { members: vec![cond] });
        act.root = root;
        (act, root, cond, then)
    }

    #[test]
    fn test_ancestor_queries() {
        let (act, root, cond, then) = tree();
        assert_eq!(act.ancestors(then).collect::<Vec<_>>(), vec![cond, root]);
        assert_eq!(
            act.nearest_ancestor(then, |s| s.tag == StmtTag::Sequence),
            Some(root)
        );
        assert_eq!(act.nearest_with_tag(cond, &[StmtTag::If]), Some(cond));
        assert_eq!(act.store_host(then), StoreHost::Statement(root));
        assert_eq!(act.preorder(), vec![root, cond, then]);
    }

    #[test]
    fn test_temp_names_are_unique() {
        let mut act = Activity::new("Main", SourceSpan::default());
        assert_eq!(act.next_temp("r"), "__r1");
        assert_eq!(act.next_temp("step"), "__step2");
    }

    #[test]
    fn test_id_allocator_numbers_all_nodes() {
        let mut ids = IdAllocator::new();
        let mut body = vec![CodeStmt::expr(Expr::assign(
            Expr::name("x"),
            Expr::invoke("A", vec![]),
        ))];
        ids.number_code(&mut body);
        let mut seen = Vec::new();
        body[0].walk_exprs(&mut |e| seen.push(e.id));
        assert_eq!(seen.len(), 5);
        assert!(seen.iter().all(|id| id.is_some()));
        assert_eq!(ids.marker(), Marker(1));
        assert_eq!(Marker(7).to_string(), "__wm7");
    }

    #[test]
    fn test_service_sides() {
        assert_eq!(ServiceKind::Receive.side(), Side::Service);
        assert_eq!(ServiceKind::ReceiveReply.side(), Side::Client);
        assert!(ServiceKind::SendReply.is_reply());
        assert!(ServiceKind::ReceiveReply.is_inbound());
    }
}
