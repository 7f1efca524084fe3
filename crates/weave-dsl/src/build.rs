// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Statement tree construction from the parse tree.
//!
//! One depth-first pass in source order per activity. The pass binds store
//! names (rejecting duplicates along the host chain), numbers every embedded
//! expression, assigns markers, runs the structural checks that need only
//! ancestors, and registers service operations in document order.
//!
//! Construction is fail-fast per activity: the first error aborts that
//! activity. [`build_unit`] collects one error per failing activity so the
//! caller can report them together at the construction barrier.

use std::collections::HashSet;

use tracing::debug;

use crate::ast::{
    Activity, CodeFragment, CompilationUnit, Content, ContentParameter, ExprFragment, FlowCase, IdAllocator,
    NodeRef, ServiceKind, ServiceOperation, StmtId, StmtKind, StmtTag, SwitchCase,
};
use crate::code::{CodeStmt, Direction, Expr, TypeRef};
use crate::error::{CompileError, CompileErrors, CompileResult, Diagnostics, ErrorKind};
use crate::span::SourceSpan;
use crate::store::{StoreHost, StoreId, StoreKind};
use crate::tree::{ParseNode, ParseUnit};

/// Name of the implicit result store.
pub const RESULT_STORE: &str = "Result";

/// Type of compensation token stores.
pub const COMPENSATION_TOKEN_TYPE: &str = "CompensationToken";

/// Default type of a catch clause.
pub const EXCEPTION_TYPE: &str = "System.Exception";

/// Build every activity of a parsed unit.
pub fn build_unit(
    ids: &mut IdAllocator,
    index: u32,
    unit: &ParseUnit,
) -> Result<CompilationUnit, CompileErrors> {
    let mut diags = Diagnostics::new();
    let mut activities = Vec::with_capacity(unit.activities.len());
    let mut names = HashSet::new();

    for node in &unit.activities {
        match build_activity(ids, index, node) {
            Ok(activity) => {
                if !names.insert(activity.name.clone()) {
                    diags.report(
                        ErrorKind::DuplicateName {
                            name: activity.name.clone(),
                        },
                        activity.span,
                    );
                    continue;
                }
                activities.push(activity);
            }
            Err(e) => diags.push(e),
        }
    }
    diags.checkpoint()?;

    Ok(CompilationUnit {
        index,
        path: unit.path.clone(),
        namespace: unit.namespace.clone(),
        imports: unit.imports.clone(),
        activities,
    })
}

/// Build a single `activity` node.
pub fn build_activity(ids: &mut IdAllocator, unit: u32, node: &ParseNode) -> CompileResult<Activity> {
    if node.label != "activity" {
        return Err(ErrorKind::UnknownStatement {
            label: node.label.clone(),
        }
        .at(node.span.in_unit(unit)));
    }
    let name = node.require_text()?;
    let mut builder = ActivityBuilder {
        act: Activity::new(name, node.span.in_unit(unit)),
        ids,
        unit,
    };
    builder.signature(node)?;

    let body = node.require("body")?;
    let root = if body.label == "sequence" {
        builder.sequence(body, None)?
    } else {
        let root = builder
            .act
            .alloc(StmtTag::Sequence, None, builder.span(body));
        let member = builder.stmt(body, root)?;
        let members = member.into_iter().collect();
        builder.act.set_kind(root, StmtKind::Sequence { members });
        root
    };
    builder.act.root = root;

    let act = builder.act;
    debug!(
        activity = %act.name,
        statements = act.stmts.len(),
        stores = act.stores.len(),
        service_operations = act.service_operations.len(),
        "Built activity"
    );
    Ok(act)
}

struct ActivityBuilder<'a> {
    act: Activity,
    ids: &'a mut IdAllocator,
    unit: u32,
}

impl ActivityBuilder<'_> {
    fn span(&self, node: &ParseNode) -> SourceSpan {
        node.span.in_unit(self.unit)
    }

    fn invalid(&self, node: &ParseNode, detail: impl Into<String>) -> CompileError {
        ErrorKind::InvalidValue {
            label: node.label.clone(),
            detail: detail.into(),
        }
        .at(self.span(node))
    }

    // ------------------------------------------------------------------
    // Fragments
    // ------------------------------------------------------------------

    fn prepare_expr(&mut self, mut expr: Expr) -> Expr {
        let unit = self.unit;
        self.ids.number_expr(&mut expr);
        expr.walk_mut(&mut |e| e.span = e.span.in_unit(unit));
        expr
    }

    fn fragment_of(&mut self, node: &ParseNode, expr: &Expr) -> ExprFragment {
        let expr = self.prepare_expr(expr.clone());
        ExprFragment {
            marker: self.ids.marker(),
            span: self.span(node),
            expr,
        }
    }

    fn expr_member(&mut self, node: &ParseNode, member: &str) -> CompileResult<ExprFragment> {
        let expr = node.require_expr(member)?;
        let holder = node.require(member)?;
        Ok(self.fragment_of(holder, expr))
    }

    fn optional_expr_member(
        &mut self,
        node: &ParseNode,
        member: &str,
    ) -> CompileResult<Option<ExprFragment>> {
        match node.optional_expr(member)? {
            Some(expr) => {
                let holder = node.require(member)?;
                Ok(Some(self.fragment_of(holder, expr)))
            }
            None => Ok(None),
        }
    }

    fn node_ref(&self, node: &ParseNode, member: &str) -> CompileResult<Option<NodeRef>> {
        match node.member(member) {
            Some(target) => {
                let name = target.require_text()?;
                Ok(Some(NodeRef::new(name, self.span(target))))
            }
            None => Ok(None),
        }
    }

    // ------------------------------------------------------------------
    // Signature and stores
    // ------------------------------------------------------------------

    fn signature(&mut self, node: &ParseNode) -> CompileResult<()> {
        if let Some(params) = node.member("parameters") {
            for param in params.items() {
                let name = param.require_text()?;
                let ty = TypeRef::new(param.require("type")?.require_text()?);
                let direction = match param.member_text("direction") {
                    None => Direction::In,
                    Some(text) => text
                        .parse::<Direction>()
                        .map_err(|_| self.invalid(param, format!("unknown direction '{}'", text)))?,
                };
                let kind = match direction {
                    Direction::In => StoreKind::In,
                    Direction::Out => StoreKind::Out,
                    Direction::Ref => StoreKind::Ref,
                };
                let marker = self.ids.marker();
                let span = self.span(param);
                let id = self
                    .act
                    .declare(StoreHost::Activity, name, ty, kind, marker, span)?;
                self.act.parameters.push(id);
            }
        }
        if let Some(result) = node.member("result") {
            let ty = TypeRef::new(result.require_text()?);
            let marker = self.ids.marker();
            let span = self.span(result);
            let id = self.act.declare(
                StoreHost::Activity,
                RESULT_STORE,
                ty,
                StoreKind::Result,
                marker,
                span,
            )?;
            self.act.result = Some(id);
        }
        Ok(())
    }

    /// Declare the `var` nodes listed under `variables` on `host`.
    fn host_variables(&mut self, node: &ParseNode, host: StmtId) -> CompileResult<()> {
        let Some(vars) = node.member("variables") else {
            return Ok(());
        };
        for var in vars.items() {
            if var.member("init").is_some() {
                return Err(self.invalid(var, "host variables cannot have initializers"));
            }
            self.declare_var(var, StoreHost::Statement(host))?;
        }
        Ok(())
    }

    fn declare_var(&mut self, var: &ParseNode, host: StoreHost) -> CompileResult<StoreId> {
        let name = var.require_text()?;
        let ty = var.member_type("type");
        if ty.is_inferred() && var.member("init").is_none() {
            return Err(ErrorKind::UninferredStoreType {
                name: name.to_string(),
            }
            .at(self.span(var)));
        }
        let marker = self.ids.marker();
        let span = self.span(var);
        self.act.declare(host, name, ty, StoreKind::Local, marker, span)
    }

    // ------------------------------------------------------------------
    // Statements
    // ------------------------------------------------------------------

    fn required_stmt(
        &mut self,
        node: &ParseNode,
        member: &str,
        parent: StmtId,
    ) -> CompileResult<StmtId> {
        let child = node.require(member)?;
        self.stmt_or_empty(child, parent)
    }

    fn optional_stmt(
        &mut self,
        node: &ParseNode,
        member: &str,
        parent: StmtId,
    ) -> CompileResult<Option<StmtId>> {
        match node.member(member) {
            Some(child) => self.stmt_or_empty(child, parent).map(Some),
            None => Ok(None),
        }
    }

    /// Build a statement in a slot that must hold one.
    fn stmt_or_empty(&mut self, node: &ParseNode, parent: StmtId) -> CompileResult<StmtId> {
        match self.stmt(node, parent)? {
            Some(id) => Ok(id),
            None => Ok(self.act.alloc(StmtTag::Empty, Some(parent), self.span(node))),
        }
    }

    fn sequence(&mut self, node: &ParseNode, parent: Option<StmtId>) -> CompileResult<StmtId> {
        let id = self.act.alloc(StmtTag::Sequence, parent, self.span(node));
        self.host_variables(node, id)?;

        let mut members = Vec::with_capacity(node.items().len());
        for item in node.items() {
            if let Some(member) = self.stmt(item, id)? {
                members.push(member);
            }
        }
        self.chain_code(&members);
        self.act.set_kind(id, StmtKind::Sequence { members });
        Ok(id)
    }

    /// Link each `Code` member to an immediately following `Code` sibling.
    fn chain_code(&mut self, members: &[StmtId]) {
        for pair in members.windows(2) {
            if self.act.stmt(pair[1]).tag != StmtTag::Code {
                continue;
            }
            if let StmtKind::Code { chained, .. } = &mut self.act.stmt_mut(pair[0]).kind {
                *chained = Some(pair[1]);
            }
        }
    }

    /// Build one statement. `var` without initializer yields no statement.
    fn stmt(&mut self, node: &ParseNode, parent: StmtId) -> CompileResult<Option<StmtId>> {
        let span = self.span(node);
        let tag = match node.label.as_str() {
            "var" => return self.var_statement(node, parent),
            "sequence" => return self.sequence(node, Some(parent)).map(Some),
            "code" => StmtTag::Code,
            "empty" => StmtTag::Empty,
            "if" => StmtTag::If,
            "while" | "do-while" => StmtTag::While,
            "switch" => StmtTag::Switch,
            "throw" => StmtTag::Throw,
            "try" => StmtTag::Try,
            "foreach" | "parallel-foreach" => StmtTag::ForEach,
            "delay" => StmtTag::Delay,
            "parallel" => StmtTag::Parallel,
            "pick" => StmtTag::Pick,
            "statemachine" => StmtTag::StateMachine,
            "flow" => StmtTag::Flow,
            "transacted" => StmtTag::Transacted,
            "cancellable" => StmtTag::Cancellable,
            "compensable" => StmtTag::Compensable,
            "confirm" => StmtTag::Confirm,
            "compensate" => StmtTag::Compensate,
            "persist" => StmtTag::Persist,
            "nopersist" => StmtTag::NoPersist,
            "terminate" => StmtTag::Terminate,
            "receive" | "send" | "send-reply" | "receive-reply" => StmtTag::Service,
            "content-correlation" => StmtTag::ContentCorrelation,
            "transacted-receive" => StmtTag::TransactedReceive,
            other => {
                return Err(ErrorKind::UnknownStatement {
                    label: other.to_string(),
                }
                .at(span));
            }
        };

        let id = self.act.alloc(tag, Some(parent), span);
        let kind = match tag {
            StmtTag::Code => {
                let body = node
                    .code
                    .clone()
                    .ok_or_else(|| self.invalid(node, "code statement without a body"))?;
                self.code(body, span, None)
            }
            StmtTag::Empty => StmtKind::Empty,
            StmtTag::If => StmtKind::If {
                condition: self.expr_member(node, "condition")?,
                then: self.required_stmt(node, "then", id)?,
                otherwise: self.optional_stmt(node, "else", id)?,
            },
            StmtTag::While => StmtKind::While {
                condition: self.expr_member(node, "condition")?,
                body: self.required_stmt(node, "body", id)?,
                do_while: node.label == "do-while",
            },
            StmtTag::Switch => self.switch(node, id)?,
            StmtTag::Throw => {
                let exception = self.optional_expr_member(node, "exception")?;
                if exception.is_none()
                    && self.act.nearest_with_tag(parent, &[StmtTag::Catch]).is_none()
                {
                    return Err(ErrorKind::RethrowOutsideCatch.at(span));
                }
                StmtKind::Throw { exception }
            }
            StmtTag::Try => self.try_catch(node, id)?,
            StmtTag::ForEach => self.foreach(node, id)?,
            StmtTag::Delay => StmtKind::Delay {
                duration: self.expr_member(node, "duration")?,
            },
            StmtTag::Parallel => {
                let mut branches = Vec::new();
                for item in node.items() {
                    branches.push(self.stmt_or_empty(item, id)?);
                }
                StmtKind::Parallel {
                    branches,
                    completion: self.optional_expr_member(node, "until")?,
                }
            }
            StmtTag::Pick => self.pick(node, id)?,
            StmtTag::StateMachine => self.state_machine(node, id)?,
            StmtTag::Flow => self.flow(node, id)?,
            StmtTag::Transacted => StmtKind::Transacted {
                body: self.required_stmt(node, "body", id)?,
                timeout: self.optional_expr_member(node, "timeout")?,
            },
            StmtTag::Cancellable => StmtKind::Cancellable {
                body: self.required_stmt(node, "body", id)?,
                handler: self.optional_stmt(node, "handler", id)?,
            },
            StmtTag::Compensable => self.compensable(node, id, parent)?,
            StmtTag::Confirm => StmtKind::Confirm {
                target: self.optional_expr_member(node, "target")?,
            },
            StmtTag::Compensate => StmtKind::Compensate {
                target: self.optional_expr_member(node, "target")?,
            },
            StmtTag::Persist => {
                if self
                    .act
                    .nearest_with_tag(parent, &[StmtTag::NoPersist])
                    .is_some()
                {
                    return Err(ErrorKind::PersistInsideNoPersist.at(span));
                }
                StmtKind::Persist
            }
            StmtTag::NoPersist => StmtKind::NoPersist {
                body: self.required_stmt(node, "body", id)?,
            },
            StmtTag::Terminate => StmtKind::Terminate {
                reason: self.optional_expr_member(node, "reason")?,
                exception: self.optional_expr_member(node, "exception")?,
            },
            StmtTag::Service => {
                let op = self.service(node)?;
                self.act.service_operations.push(id);
                StmtKind::Service(op)
            }
            StmtTag::ContentCorrelation => StmtKind::ContentCorrelation {
                handle: self.expr_member(node, "handle")?,
                data: self.parameters(node)?,
            },
            StmtTag::TransactedReceive => {
                self.host_variables(node, id)?;
                let request = node.require("request")?;
                if request.label != "receive" {
                    return Err(self.invalid(request, "request must be a receive operation"));
                }
                StmtKind::TransactedReceive {
                    request: self.stmt_or_empty(request, id)?,
                    body: self.required_stmt(node, "body", id)?,
                }
            }
            StmtTag::Sequence
            | StmtTag::Catch
            | StmtTag::PickBranch
            | StmtTag::State
            | StmtTag::Transition
            | StmtTag::TransitionBody
            | StmtTag::FlowStep
            | StmtTag::FlowIf
            | StmtTag::FlowSwitch => {
                return Err(ErrorKind::internal(format!("{} built out of context", tag)).at(span));
            }
        };
        self.act.set_kind(id, kind);
        Ok(Some(id))
    }

    fn code(
        &mut self,
        mut body: Vec<CodeStmt>,
        span: SourceSpan,
        initializes: Option<StoreId>,
    ) -> StmtKind {
        let unit = self.unit;
        self.ids.number_code(&mut body);
        for stmt in &mut body {
            stmt.walk_exprs_mut(&mut |e| e.span = e.span.in_unit(unit));
        }
        StmtKind::Code {
            fragment: CodeFragment {
                marker: self.ids.marker(),
                span,
                body,
            },
            chained: None,
            initializes,
        }
    }

    /// `var name [: type] [= init];`
    fn var_statement(&mut self, node: &ParseNode, parent: StmtId) -> CompileResult<Option<StmtId>> {
        let host = self.act.store_host(parent);
        let store = self.declare_var(node, host)?;
        let Some(init) = node.optional_expr("init")? else {
            return Ok(None);
        };
        self.act.store_mut(store).initialized = true;

        let span = self.span(node);
        let name = self.act.store(store).name.clone();
        let assign = Expr::assign(Expr::name(name).with_span(span), init.clone()).with_span(span);
        let id = self.act.alloc(StmtTag::Code, Some(parent), span);
        let kind = self.code(vec![CodeStmt::expr(assign)], span, Some(store));
        self.act.set_kind(id, kind);
        Ok(Some(id))
    }

    fn switch(&mut self, node: &ParseNode, id: StmtId) -> CompileResult<StmtKind> {
        let value = self.expr_member(node, "value")?;
        let mut cases = Vec::with_capacity(node.items().len());
        for case in node.items() {
            if case.label != "case" {
                return Err(self.invalid(case, "switch items must be cases"));
            }
            cases.push(SwitchCase {
                key: self.expr_member(case, "key")?,
                body: self.required_stmt(case, "body", id)?,
            });
        }
        Ok(StmtKind::Switch {
            value,
            cases,
            default: self.optional_stmt(node, "default", id)?,
        })
    }

    fn try_catch(&mut self, node: &ParseNode, id: StmtId) -> CompileResult<StmtKind> {
        let body = self.required_stmt(node, "body", id)?;
        let mut catches = Vec::with_capacity(node.items().len());
        for clause in node.items() {
            if clause.label != "catch" {
                return Err(self.invalid(clause, "try items must be catch clauses"));
            }
            let span = self.span(clause);
            let catch = self.act.alloc(StmtTag::Catch, Some(id), span);
            let exception_type = clause
                .member_text("type")
                .map(TypeRef::new)
                .unwrap_or_else(|| TypeRef::new(EXCEPTION_TYPE));

            let variable = match clause.text() {
                Some(name) => {
                    let marker = self.ids.marker();
                    let store = self.act.declare(
                        StoreHost::Statement(catch),
                        name,
                        exception_type.clone(),
                        StoreKind::Local,
                        marker,
                        span,
                    )?;
                    self.act
                        .store_mut(store)
                        .attach_rewrite(Expr::name(format!("__arg_{}", name)))?;
                    Some(store)
                }
                None => None,
            };
            let catch_body = self.required_stmt(clause, "body", catch)?;
            self.act.set_kind(
                catch,
                StmtKind::Catch {
                    exception_type,
                    variable,
                    body: catch_body,
                },
            );
            catches.push(catch);
        }
        let finally = self.optional_stmt(node, "finally", id)?;
        if catches.is_empty() && finally.is_none() {
            return Err(self.invalid(node, "try needs at least one catch or a finally"));
        }
        Ok(StmtKind::Try {
            body,
            catches,
            finally,
        })
    }

    fn foreach(&mut self, node: &ParseNode, id: StmtId) -> CompileResult<StmtKind> {
        let parallel = node.label == "parallel-foreach";
        let name = node.require_text()?;
        let values = self.expr_member(node, "values")?;
        let completion = self.optional_expr_member(node, "until")?;
        if completion.is_some() && !parallel {
            return Err(self.invalid(node, "only parallel foreach accepts a completion condition"));
        }

        let marker = self.ids.marker();
        let span = self.span(node);
        let item = self.act.declare(
            StoreHost::Statement(id),
            name,
            node.member_type("type"),
            StoreKind::Local,
            marker,
            span,
        )?;
        self.act
            .store_mut(item)
            .attach_rewrite(Expr::name(format!("__arg_{}", name)))?;

        Ok(StmtKind::ForEach {
            item,
            values,
            body: self.required_stmt(node, "body", id)?,
            parallel,
            completion,
        })
    }

    fn pick(&mut self, node: &ParseNode, id: StmtId) -> CompileResult<StmtKind> {
        let mut branches = Vec::with_capacity(node.items().len());
        for branch in node.items() {
            if branch.label != "branch" {
                return Err(self.invalid(branch, "pick items must be branches"));
            }
            let bid = self.act.alloc(StmtTag::PickBranch, Some(id), self.span(branch));
            self.host_variables(branch, bid)?;
            let trigger = self.required_stmt(branch, "trigger", bid)?;
            let action = self.optional_stmt(branch, "action", bid)?;
            self.act
                .set_kind(bid, StmtKind::PickBranch { trigger, action });
            branches.push(bid);
        }
        Ok(StmtKind::Pick { branches })
    }

    fn state_machine(&mut self, node: &ParseNode, id: StmtId) -> CompileResult<StmtKind> {
        self.host_variables(node, id)?;
        let start = self.node_ref(node, "start")?;
        let mut names = HashSet::new();
        let mut states = Vec::with_capacity(node.items().len());

        for state in node.items() {
            let is_final = match state.label.as_str() {
                "state" => false,
                "final-state" => true,
                _ => return Err(self.invalid(state, "state machine items must be states")),
            };
            let name = state.require_text()?;
            let span = self.span(state);
            if !names.insert(name.to_string()) {
                return Err(ErrorKind::DuplicateNodeName {
                    name: name.to_string(),
                }
                .at(span));
            }
            if is_final && (!state.items().is_empty() || state.member("exit").is_some()) {
                return Err(ErrorKind::FinalStateHasTransitions {
                    state: name.to_string(),
                }
                .at(span));
            }

            let sid = self.act.alloc(StmtTag::State, Some(id), span);
            let entry = self.optional_stmt(state, "entry", sid)?;
            let exit = self.optional_stmt(state, "exit", sid)?;
            let mut transitions = Vec::with_capacity(state.items().len());
            for transition in state.items() {
                transitions.push(self.transition(transition, sid)?);
            }
            self.act.set_kind(
                sid,
                StmtKind::State {
                    name: name.to_string(),
                    is_final,
                    entry,
                    exit,
                    transitions,
                },
            );
            states.push(sid);
        }

        Ok(StmtKind::StateMachine {
            states,
            start,
            resolved_start: None,
        })
    }

    /// A transition groups the bodies sharing one trigger. A transition node
    /// with its own `target` is shorthand for a single body.
    fn transition(&mut self, node: &ParseNode, state: StmtId) -> CompileResult<StmtId> {
        if node.label != "transition" {
            return Err(self.invalid(node, "state items must be transitions"));
        }
        let tid = self.act.alloc(StmtTag::Transition, Some(state), self.span(node));
        let trigger = self.optional_stmt(node, "trigger", tid)?;
        let mut bodies = Vec::new();
        if node.member("target").is_some() {
            bodies.push(self.transition_body(node, tid)?);
        }
        for body in node.items() {
            if body.label != "transition-body" {
                return Err(self.invalid(body, "transition items must be transition bodies"));
            }
            bodies.push(self.transition_body(body, tid)?);
        }
        if bodies.is_empty() {
            return Err(ErrorKind::MissingMember {
                label: node.label.clone(),
                member: "target".to_string(),
            }
            .at(self.span(node)));
        }
        self.act
            .set_kind(tid, StmtKind::Transition { trigger, bodies });
        Ok(tid)
    }

    fn transition_body(&mut self, node: &ParseNode, transition: StmtId) -> CompileResult<StmtId> {
        let bid = self
            .act
            .alloc(StmtTag::TransitionBody, Some(transition), self.span(node));
        let condition = self.optional_expr_member(node, "condition")?;
        let action = self.optional_stmt(node, "action", bid)?;
        let target = match self.node_ref(node, "target")? {
            Some(target) => target,
            None => {
                return Err(ErrorKind::MissingMember {
                    label: node.label.clone(),
                    member: "target".to_string(),
                }
                .at(self.span(node)));
            }
        };
        self.act.set_kind(
            bid,
            StmtKind::TransitionBody {
                condition,
                action,
                target,
            },
        );
        Ok(bid)
    }

    fn flow(&mut self, node: &ParseNode, id: StmtId) -> CompileResult<StmtKind> {
        self.host_variables(node, id)?;
        let mut names = HashSet::new();
        let mut nodes = Vec::with_capacity(node.items().len());

        for item in node.items() {
            let span = self.span(item);
            let name = item.text().map(str::to_string);
            if let Some(name) = &name {
                if !names.insert(name.clone()) {
                    return Err(ErrorKind::DuplicateNodeName { name: name.clone() }.at(span));
                }
            }
            let kind = match item.label.as_str() {
                "flow-step" => {
                    let nid = self.act.alloc(StmtTag::FlowStep, Some(id), span);
                    let action = self.required_stmt(item, "action", nid)?;
                    let next = self.node_ref(item, "next")?;
                    nodes.push(nid);
                    (
                        nid,
                        StmtKind::FlowStep {
                            name,
                            action,
                            next,
                            resolved_next: None,
                        },
                    )
                }
                "flow-if" => {
                    let nid = self.act.alloc(StmtTag::FlowIf, Some(id), span);
                    nodes.push(nid);
                    (
                        nid,
                        StmtKind::FlowIf {
                            name,
                            condition: self.expr_member(item, "condition")?,
                            on_true: self.node_ref(item, "true")?,
                            on_false: self.node_ref(item, "false")?,
                        },
                    )
                }
                "flow-switch" => {
                    let nid = self.act.alloc(StmtTag::FlowSwitch, Some(id), span);
                    nodes.push(nid);
                    let value = self.expr_member(item, "value")?;
                    let mut cases = Vec::with_capacity(item.items().len());
                    for case in item.items() {
                        let Some(target) = self.node_ref(case, "target")? else {
                            return Err(ErrorKind::MissingMember {
                                label: case.label.clone(),
                                member: "target".to_string(),
                            }
                            .at(self.span(case)));
                        };
                        cases.push(FlowCase {
                            key: self.expr_member(case, "key")?,
                            target,
                        });
                    }
                    (
                        nid,
                        StmtKind::FlowSwitch {
                            name,
                            value,
                            cases,
                            default: self.node_ref(item, "default")?,
                        },
                    )
                }
                _ => return Err(self.invalid(item, "flow items must be flow nodes")),
            };
            self.act.set_kind(kind.0, kind.1);
        }

        Ok(StmtKind::Flow { nodes, start: None })
    }

    fn compensable(&mut self, node: &ParseNode, id: StmtId, parent: StmtId) -> CompileResult<StmtKind> {
        let token = match node.text() {
            Some(name) => {
                let host = self.act.store_host(parent);
                let marker = self.ids.marker();
                let span = self.span(node);
                Some(self.act.declare(
                    host,
                    name,
                    TypeRef::new(COMPENSATION_TOKEN_TYPE),
                    StoreKind::Local,
                    marker,
                    span,
                )?)
            }
            None => None,
        };
        Ok(StmtKind::Compensable {
            body: self.required_stmt(node, "body", id)?,
            token,
            compensation: self.optional_stmt(node, "compensation", id)?,
            confirmation: self.optional_stmt(node, "confirmation", id)?,
            cancellation: self.optional_stmt(node, "cancellation", id)?,
        })
    }

    fn parameters(&mut self, node: &ParseNode) -> CompileResult<Vec<ContentParameter>> {
        let mut params = Vec::with_capacity(node.items().len());
        for param in node.items() {
            if param.label != "parameter" {
                return Err(self.invalid(param, "expected parameter"));
            }
            let name = param.require_text()?.to_string();
            let expr = param
                .expr
                .as_ref()
                .ok_or_else(|| self.invalid(param, "parameter without a value"))?;
            params.push(ContentParameter {
                name,
                value: self.fragment_of(param, expr),
            });
        }
        Ok(params)
    }

    fn service(&mut self, node: &ParseNode) -> CompileResult<ServiceOperation> {
        let kind = match node.label.as_str() {
            "receive" => ServiceKind::Receive,
            "send" => ServiceKind::Send,
            "send-reply" => ServiceKind::SendReply,
            _ => ServiceKind::ReceiveReply,
        };
        let contract = node.member_text("contract").map(TypeRef::new);
        let operation = node.member_text("operation").map(str::to_string);
        if !kind.is_reply() {
            node.require("contract")?;
            node.require("operation")?;
        }
        let can_create_instance = node.has_flag("create-instance");
        if can_create_instance && kind != ServiceKind::Receive {
            return Err(self.invalid(node, "only receive can create an instance"));
        }
        let request_name = node.member_text("request").map(str::to_string);
        if request_name.is_some() && !kind.is_reply() {
            return Err(self.invalid(node, "only replies name a request"));
        }

        let content = match node.member("content") {
            None => None,
            Some(content) => match content.label.as_str() {
                "message" => {
                    let expr = content
                        .expr
                        .as_ref()
                        .ok_or_else(|| self.invalid(content, "message without a value"))?;
                    Some(Content::Message(self.fragment_of(content, expr)))
                }
                "parameters" => Some(Content::Parameters(self.parameters(content)?)),
                _ => return Err(self.invalid(content, "content must be a message or parameters")),
            },
        };

        Ok(ServiceOperation {
            kind,
            name: node.text().map(str::to_string),
            contract,
            operation,
            content,
            correlates_with: self.optional_expr_member(node, "correlates-with")?,
            can_create_instance,
            endpoint: self.optional_expr_member(node, "endpoint")?,
            request_name,
            request: None,
            reply: None,
            correlation_store: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::code::BinaryOp;

    fn activity(body: ParseNode) -> ParseNode {
        ParseNode::new("activity")
            .with_text("Main")
            .with_member("body", body)
    }

    fn var(name: &str, init: Expr) -> ParseNode {
        ParseNode::new("var")
            .with_text(name)
            .with_member("init", ParseNode::expression(init))
    }

    fn code(expr: Expr) -> ParseNode {
        ParseNode::code_block(vec![CodeStmt::expr(expr)])
    }

    fn build(node: ParseNode) -> CompileResult<Activity> {
        let mut ids = IdAllocator::new();
        build_activity(&mut ids, 0, &node)
    }

    #[test]
    fn test_var_with_initializer_becomes_code() {
        let act = build(activity(
            ParseNode::new("sequence")
                .with_item(var("x", Expr::invoke("A", vec![])))
                .with_item(code(Expr::invoke("B", vec![]))),
        ))
        .unwrap();

        let StmtKind::Sequence { members } = act.kind(act.root) else {
            panic!("root must be a sequence");
        };
        assert_eq!(members.len(), 2);
        let StmtKind::Code {
            initializes,
            chained,
            fragment,
        } = act.kind(members[0])
        else {
            panic!("initializer must be code");
        };
        let store = initializes.unwrap();
        assert!(act.store(store).initialized);
        assert!(act.store(store).ty.is_inferred());
        assert_eq!(*chained, Some(members[1]));
        assert_eq!(fragment.body[0].to_string(), "x = A.Invoke();");
        assert_eq!(act.lookup(StoreHost::Statement(act.root), "x"), Some(store));
    }

    #[test]
    fn test_untyped_var_without_initializer() {
        let err = build(activity(
            ParseNode::new("sequence").with_item(ParseNode::new("var").with_text("x")),
        ))
        .unwrap_err();
        assert_eq!(err.kind.code(), "W055");
    }

    #[test]
    fn test_duplicate_in_nested_sequence() {
        let inner = ParseNode::new("sequence").with_item(var("x", Expr::int(2)));
        let err = build(activity(
            ParseNode::new("sequence")
                .with_item(var("x", Expr::int(1)))
                .with_item(inner),
        ))
        .unwrap_err();
        assert_eq!(err.kind.code(), "W001");
    }

    #[test]
    fn test_parameter_clash_with_result() {
        let node = activity(ParseNode::new("sequence"))
            .with_member(
                "parameters",
                ParseNode::new("parameters").with_item(
                    ParseNode::new("parameter")
                        .with_text("Result")
                        .with_member("type", ParseNode::type_name("int")),
                ),
            )
            .with_member("result", ParseNode::type_name("int"));
        assert_eq!(build(node).unwrap_err().kind.code(), "W001");
    }

    #[test]
    fn test_rethrow_only_inside_catch() {
        let err = build(activity(
            ParseNode::new("sequence").with_item(ParseNode::new("throw")),
        ))
        .unwrap_err();
        assert_eq!(err.kind, ErrorKind::RethrowOutsideCatch);

        let ok = build(activity(
            ParseNode::new("try")
                .with_member("body", ParseNode::new("empty"))
                .with_item(
                    ParseNode::new("catch")
                        .with_text("e")
                        .with_member("body", ParseNode::new("throw")),
                ),
        ))
        .unwrap();
        let catch_var = ok
            .stores
            .iter()
            .find(|s| s.name == "e")
            .expect("catch variable");
        assert_eq!(catch_var.ty.as_str(), EXCEPTION_TYPE);
        assert_eq!(catch_var.handle(), Expr::name("__arg_e"));
    }

    #[test]
    fn test_persist_inside_nopersist() {
        let err = build(activity(ParseNode::new("nopersist").with_member(
            "body",
            ParseNode::new("sequence").with_item(ParseNode::new("persist")),
        )))
        .unwrap_err();
        assert_eq!(err.kind, ErrorKind::PersistInsideNoPersist);
    }

    #[test]
    fn test_final_state_with_transitions() {
        let machine = ParseNode::new("statemachine").with_item(
            ParseNode::new("final-state").with_text("Done").with_item(
                ParseNode::new("transition").with_member("target", ParseNode::reference("Done")),
            ),
        );
        let err = build(activity(machine)).unwrap_err();
        assert_eq!(err.kind.code(), "W013");
    }

    #[test]
    fn test_duplicate_flow_node() {
        let step = |name: &str| {
            ParseNode::new("flow-step")
                .with_text(name)
                .with_member("action", ParseNode::new("persist"))
        };
        let err = build(activity(
            ParseNode::new("flow").with_item(step("a")).with_item(step("a")),
        ))
        .unwrap_err();
        assert_eq!(err.kind.code(), "W012");
    }

    #[test]
    fn test_unknown_label() {
        let err = build(activity(ParseNode::new("goto"))).unwrap_err();
        assert_eq!(
            err.kind,
            ErrorKind::UnknownStatement {
                label: "goto".to_string()
            }
        );
    }

    #[test]
    fn test_service_operations_in_document_order() {
        let send = ParseNode::new("send")
            .with_text("ask")
            .with_member("contract", ParseNode::type_name("IQuote"))
            .with_member("operation", ParseNode::reference("Ask"));
        let reply = ParseNode::new("receive-reply");
        let act = build(activity(
            ParseNode::new("sequence")
                .with_item(ParseNode::new("parallel").with_item(send))
                .with_item(reply),
        ))
        .unwrap();
        let kinds: Vec<_> = act
            .service_operations
            .iter()
            .map(|id| act.service(*id).unwrap().kind)
            .collect();
        assert_eq!(kinds, vec![ServiceKind::Send, ServiceKind::ReceiveReply]);
    }

    #[test]
    fn test_send_requires_contract() {
        let err = build(activity(ParseNode::new("send"))).unwrap_err();
        assert_eq!(err.kind.code(), "W003");
    }

    #[test]
    fn test_expressions_are_numbered_and_marked() {
        let cond = Expr::binary(BinaryOp::Gt, Expr::name("x"), Expr::int(0));
        let act = build(activity(
            ParseNode::new("if")
                .with_member("condition", ParseNode::expression(cond))
                .with_member("then", ParseNode::new("persist")),
        ))
        .unwrap();
        let StmtKind::Sequence { members } = act.kind(act.root) else {
            panic!("root must be a sequence");
        };
        let StmtKind::If { condition, .. } = act.kind(members[0]) else {
            panic!("expected if");
        };
        assert!(!condition.expr.any(&|e| e.id.is_none()));
    }

    #[test]
    fn test_build_unit_reports_each_failing_activity() {
        let unit = ParseUnit {
            activities: vec![
                activity(ParseNode::new("goto")),
                ParseNode::new("activity")
                    .with_text("Other")
                    .with_member("body", ParseNode::new("throw")),
            ],
            ..Default::default()
        };
        let mut ids = IdAllocator::new();
        let errors = build_unit(&mut ids, 0, &unit).unwrap_err();
        assert_eq!(errors.len(), 2);
    }
}
