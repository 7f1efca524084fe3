// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Expression rewriter and control-flow linearizer.
//!
//! One traversal per fragment run or value expression:
//! - store-bound identifiers become `handle.Get(__ctx)`, assignments and
//!   increments become `handle.Set(__ctx, ..)`
//! - calls whose method carries a scheduling attribute become `Invoke`
//!   steps, their consumed results read back from a temporary
//! - `&&`, `||`, `??` and `?:` whose skippable side schedules a call are
//!   linearized into skip steps over an indexed step list
//! - non-scheduled calls passing a store by `ref`/`out` go through a local
//!   copied in and back

use tracing::trace;
use weave_dsl::code::{
    Argument, AssignOp, BinaryOp, CodeStmt, Direction, Expr, ExprKind, TypeRef,
};
use weave_dsl::error::{CompileResult, ErrorKind};
use weave_dsl::span::SourceSpan;
use weave_dsl::store::StoreId;

use super::context::LowerContext;
use super::steps::StepList;
use crate::graph::{ArgumentValue, Location, Node, NodeArgument, NodeKind, ValueExpr, VariableDecl};
use crate::model::initializer_value;

/// Where the result of a scheduled call goes.
#[derive(Debug, Clone, Copy)]
enum CallResult {
    Discard,
    Into(StoreId),
    Temp,
}

pub struct Rewriter<'c, 'a> {
    ctx: &'c mut LowerContext<'a>,
    steps: StepList,
    /// Fallback span for synthesized nodes.
    span: SourceSpan,
    /// Set for slots that reject scheduled calls.
    slot: Option<&'static str>,
    depth: usize,
    lambda_depth: usize,
    nested_depth: usize,
    /// Fragment locals with the step count at their declaration.
    locals: Vec<Vec<(String, usize)>>,
    /// Top-level locals used by the statement being lowered, with the
    /// step of their declaration.
    references: Vec<(String, usize, SourceSpan)>,
}

impl<'c, 'a> Rewriter<'c, 'a> {
    pub fn new(ctx: &'c mut LowerContext<'a>, span: SourceSpan) -> Self {
        Self {
            ctx,
            steps: StepList::new(),
            span,
            slot: None,
            depth: 0,
            lambda_depth: 0,
            nested_depth: 0,
            locals: vec![Vec::new()],
            references: Vec::new(),
        }
    }

    /// Rewriter for a slot the engine evaluates repeatedly or concurrently.
    pub fn restricted(ctx: &'c mut LowerContext<'a>, span: SourceSpan, slot: &'static str) -> Self {
        let mut rewriter = Self::new(ctx, span);
        rewriter.slot = Some(slot);
        rewriter
    }

    /// Lower one code fragment. `initializes` marks a `var` initializer.
    pub fn code(&mut self, body: &[CodeStmt], initializes: Option<StoreId>) -> CompileResult<()> {
        if let (Some(store), Some(value)) = (initializes, initializer_value(body)) {
            return self.initializer(store, value);
        }
        for stmt in body {
            self.stmt(stmt)?;
            self.check_references()?;
        }
        Ok(())
    }

    /// Lower a value expression, returning what the consumer evaluates.
    pub fn value(&mut self, expr: &Expr) -> CompileResult<Expr> {
        let value = self.expr(expr)?;
        self.steps.flush();
        Ok(value)
    }

    pub fn finish(self) -> Option<Node> {
        self.steps.finish()
    }

    pub fn into_parts(self) -> (Vec<VariableDecl>, Vec<Node>) {
        self.steps.into_parts()
    }

    // ------------------------------------------------------------------
    // Helpers
    // ------------------------------------------------------------------

    fn span_of(&self, expr: &Expr) -> SourceSpan {
        if expr.span.is_unknown() {
            self.span
        } else {
            expr.span
        }
    }

    fn can_schedule(&self) -> bool {
        self.slot.is_none() && self.lambda_depth == 0 && self.nested_depth == 0
    }

    fn is_scheduled(&self, expr: &Expr) -> bool {
        matches!(expr.kind, ExprKind::Call { .. })
            && self.ctx.semantics.scheduling(expr.id).is_some()
    }

    fn contains_scheduled(&self, expr: &Expr) -> bool {
        let semantics = self.ctx.semantics;
        expr.any(&|e| {
            matches!(e.kind, ExprKind::Call { .. }) && semantics.scheduling(e.id).is_some()
        })
    }

    fn handle(&self, store: StoreId) -> Expr {
        self.ctx.store(store).handle()
    }

    fn check_lambda_store(&self, expr: &Expr, store: StoreId) -> CompileResult<()> {
        if self.lambda_depth > 0 {
            return Err(ErrorKind::StoreReferenceInLambda {
                name: self.ctx.store(store).name.clone(),
            }
            .at(self.span_of(expr)));
        }
        Ok(())
    }

    fn declare_local(&mut self, name: &str) {
        let at = self.steps.len();
        if let Some(scope) = self.locals.last_mut() {
            scope.push((name.to_string(), at));
        }
    }

    /// Record a use of a top-level local. Locals of nested scopes never
    /// straddle a step.
    fn note_local(&mut self, name: &str, span: SourceSpan) {
        let binding = self
            .locals
            .iter()
            .enumerate()
            .rev()
            .find_map(|(level, scope)| {
                scope
                    .iter()
                    .rev()
                    .find(|(n, _)| n == name)
                    .map(|(_, at)| (level, *at))
            });
        if let Some((0, at)) = binding {
            self.references.push((name.to_string(), at, span));
        }
    }

    /// Every top-level local the last statement used must live in the
    /// step that statement's plain code lands in.
    fn check_references(&mut self) -> CompileResult<()> {
        let lands = self.steps.len();
        let references = std::mem::take(&mut self.references);
        match references.into_iter().find(|(_, at, _)| *at != lands) {
            Some((name, _, span)) => Err(ErrorKind::LocalAcrossScheduledCall { name }.at(span)),
            None => Ok(()),
        }
    }

    fn temp(&mut self, prefix: &str, ty: TypeRef) -> String {
        let name = self.ctx.temp_var(prefix);
        self.steps.declare(VariableDecl::new(name.clone(), ty));
        name
    }

    // ------------------------------------------------------------------
    // Statements
    // ------------------------------------------------------------------

    fn initializer(&mut self, store: StoreId, value: &Expr) -> CompileResult<()> {
        if self.is_scheduled(value) {
            return self.scheduled_call(value, CallResult::Into(store)).map(|_| ());
        }
        let value = self.expr(value)?;
        let handle = self.handle(store);
        self.steps
            .push_plain(CodeStmt::expr(Expr::store_set(handle, value)));
        Ok(())
    }

    fn stmt(&mut self, stmt: &CodeStmt) -> CompileResult<()> {
        match stmt {
            CodeStmt::Expr { expr } => self.expr_stmt(expr),
            CodeStmt::Local {
                name,
                ty,
                init,
                span,
            } => {
                let init = init.as_ref().map(|e| self.expr(e)).transpose()?;
                self.declare_local(name);
                self.steps.push_plain(CodeStmt::Local {
                    name: name.clone(),
                    ty: ty.clone(),
                    init,
                    span: *span,
                });
                Ok(())
            }
            CodeStmt::If {
                condition,
                then,
                otherwise,
            } => {
                let condition = self.expr(condition)?;
                let then = Box::new(self.nested(then)?);
                let otherwise = match otherwise {
                    Some(stmt) => Some(Box::new(self.nested(stmt)?)),
                    None => None,
                };
                self.steps.push_plain(CodeStmt::If {
                    condition,
                    then,
                    otherwise,
                });
                Ok(())
            }
            CodeStmt::Block { .. } | CodeStmt::While { .. } => {
                let stmt = self.nested(stmt)?;
                self.steps.push_plain(stmt);
                Ok(())
            }
        }
    }

    fn expr_stmt(&mut self, expr: &Expr) -> CompileResult<()> {
        if self.can_schedule() {
            if self.is_scheduled(expr) {
                return self.scheduled_call(expr, CallResult::Discard).map(|_| ());
            }
            if let ExprKind::Assign {
                op: AssignOp::Assign,
                target,
                value,
            } = &expr.kind
            {
                if let (true, Some(store)) = (self.is_scheduled(value), self.ctx.store_for(target)) {
                    return self.scheduled_call(value, CallResult::Into(store)).map(|_| ());
                }
            }
        }
        let expr = self.call_or_expr(expr, true)?;
        self.steps.push_plain(CodeStmt::expr(expr));
        Ok(())
    }

    /// Statements below the top level of a fragment. Nothing here may
    /// schedule a call.
    fn nested(&mut self, stmt: &CodeStmt) -> CompileResult<CodeStmt> {
        self.nested_depth += 1;
        self.locals.push(Vec::new());
        let result = self.nested_stmt(stmt);
        self.locals.pop();
        self.nested_depth -= 1;
        result
    }

    fn nested_stmt(&mut self, stmt: &CodeStmt) -> CompileResult<CodeStmt> {
        Ok(match stmt {
            CodeStmt::Expr { expr } => CodeStmt::expr(self.call_or_expr(expr, true)?),
            CodeStmt::Local {
                name,
                ty,
                init,
                span,
            } => {
                let init = init.as_ref().map(|e| self.expr(e)).transpose()?;
                self.declare_local(name);
                CodeStmt::Local {
                    name: name.clone(),
                    ty: ty.clone(),
                    init,
                    span: *span,
                }
            }
            CodeStmt::Block { body } => {
                self.locals.push(Vec::new());
                let body: CompileResult<Vec<CodeStmt>> =
                    body.iter().map(|s| self.nested_stmt(s)).collect();
                self.locals.pop();
                CodeStmt::Block { body: body? }
            }
            CodeStmt::If {
                condition,
                then,
                otherwise,
            } => CodeStmt::If {
                condition: self.expr(condition)?,
                then: Box::new(self.nested(then)?),
                otherwise: match otherwise {
                    Some(stmt) => Some(Box::new(self.nested(stmt)?)),
                    None => None,
                },
            },
            CodeStmt::While { condition, body } => CodeStmt::While {
                condition: self.expr(condition)?,
                body: Box::new(self.nested(body)?),
            },
        })
    }

    // ------------------------------------------------------------------
    // Expressions
    // ------------------------------------------------------------------

    fn expr(&mut self, expr: &Expr) -> CompileResult<Expr> {
        self.depth += 1;
        if self.depth > self.ctx.max_depth {
            self.depth -= 1;
            return Err(ErrorKind::ExpressionTooDeep {
                limit: self.ctx.max_depth,
            }
            .at(self.span_of(expr)));
        }
        let result = self.expr_inner(expr);
        self.depth -= 1;
        result
    }

    fn expr_inner(&mut self, expr: &Expr) -> CompileResult<Expr> {
        let kind = match &expr.kind {
            ExprKind::Literal { .. } => return Ok(expr.clone()),
            ExprKind::Name { name } => {
                if let Some(store) = self.ctx.store_for(expr) {
                    self.check_lambda_store(expr, store)?;
                    return Ok(Expr::store_get(self.handle(store)).with_span(expr.span));
                }
                let span = self.span_of(expr);
                self.note_local(name, span);
                return Ok(expr.clone());
            }
            ExprKind::Member { target, name } => ExprKind::Member {
                target: Box::new(self.expr(target)?),
                name: name.clone(),
            },
            ExprKind::Call { .. } => return self.call_or_expr(expr, false),
            ExprKind::New { ty, args } => ExprKind::New {
                ty: ty.clone(),
                args: args
                    .iter()
                    .map(|a| {
                        Ok(Argument {
                            direction: a.direction,
                            value: self.expr(&a.value)?,
                        })
                    })
                    .collect::<CompileResult<_>>()?,
            },
            ExprKind::Unary { op, operand } => {
                if let (Some(step), Some(store)) = (op.step_op(), self.ctx.store_for(operand)) {
                    self.check_lambda_store(operand, store)?;
                    let handle = self.handle(store);
                    let set = Expr::store_set(
                        handle.clone(),
                        Expr::binary(step, Expr::store_get(handle), Expr::int(1)),
                    );
                    if !op.is_postfix() {
                        return Ok(set);
                    }
                    let undo = match step {
                        BinaryOp::Add => BinaryOp::Sub,
                        _ => BinaryOp::Add,
                    };
                    return Ok(Expr::binary(undo, set, Expr::int(1)));
                }
                ExprKind::Unary {
                    op: *op,
                    operand: Box::new(self.expr(operand)?),
                }
            }
            ExprKind::Binary { op, lhs, rhs } => {
                if op.is_short_circuit() && self.can_schedule() && self.contains_scheduled(rhs) {
                    return self.short_circuit(expr, *op, lhs, rhs);
                }
                ExprKind::Binary {
                    op: *op,
                    lhs: Box::new(self.expr(lhs)?),
                    rhs: Box::new(self.expr(rhs)?),
                }
            }
            ExprKind::Conditional {
                condition,
                then,
                otherwise,
            } => {
                if self.can_schedule()
                    && (self.contains_scheduled(then) || self.contains_scheduled(otherwise))
                {
                    return self.conditional(expr, condition, then, otherwise);
                }
                ExprKind::Conditional {
                    condition: Box::new(self.expr(condition)?),
                    then: Box::new(self.expr(then)?),
                    otherwise: Box::new(self.expr(otherwise)?),
                }
            }
            ExprKind::Assign { op, target, value } => {
                if let Some(store) = self.ctx.store_for(target) {
                    self.check_lambda_store(target, store)?;
                    let handle = self.handle(store);
                    let value = self.expr(value)?;
                    let value = match op.binary() {
                        Some(bin) => Expr::binary(bin, Expr::store_get(handle.clone()), value),
                        None => value,
                    };
                    return Ok(Expr::store_set(handle, value).with_span(expr.span));
                }
                ExprKind::Assign {
                    op: *op,
                    target: Box::new(self.expr(target)?),
                    value: Box::new(self.expr(value)?),
                }
            }
            ExprKind::Lambda { params, body } => {
                self.lambda_depth += 1;
                let at = self.steps.len();
                self.locals
                    .push(params.iter().map(|p| (p.clone(), at)).collect());
                let body = self.expr(body);
                self.locals.pop();
                self.lambda_depth -= 1;
                ExprKind::Lambda {
                    params: params.clone(),
                    body: Box::new(body?),
                }
            }
            ExprKind::Cast { ty, operand } => ExprKind::Cast {
                ty: ty.clone(),
                operand: Box::new(self.expr(operand)?),
            },
            ExprKind::Index { target, index } => ExprKind::Index {
                target: Box::new(self.expr(target)?),
                index: Box::new(self.expr(index)?),
            },
            ExprKind::Block { body, value } => {
                self.nested_depth += 1;
                self.locals.push(Vec::new());
                let result = self.block(body, value.as_deref());
                self.locals.pop();
                self.nested_depth -= 1;
                let (body, value) = result?;
                ExprKind::Block {
                    body,
                    value: value.map(Box::new),
                }
            }
        };
        Ok(Expr {
            id: expr.id,
            span: expr.span,
            kind,
        })
    }

    fn block(
        &mut self,
        body: &[CodeStmt],
        value: Option<&Expr>,
    ) -> CompileResult<(Vec<CodeStmt>, Option<Expr>)> {
        let body = body
            .iter()
            .map(|s| self.nested_stmt(s))
            .collect::<CompileResult<Vec<_>>>()?;
        let value = value.map(|v| self.expr(v)).transpose()?;
        Ok((body, value))
    }

    // ------------------------------------------------------------------
    // Calls
    // ------------------------------------------------------------------

    fn call_or_expr(&mut self, expr: &Expr, discard: bool) -> CompileResult<Expr> {
        if !matches!(expr.kind, ExprKind::Call { .. }) {
            return self.expr(expr);
        }
        if self.is_scheduled(expr) {
            let result = if discard {
                CallResult::Discard
            } else {
                CallResult::Temp
            };
            return Ok(self
                .scheduled_call(expr, result)?
                .unwrap_or_else(Expr::null));
        }
        self.plain_call(expr, discard)
    }

    /// Turn a scheduled call into an `Invoke` step. Returns the read of
    /// the result temporary, if one was allocated.
    fn scheduled_call(&mut self, expr: &Expr, result: CallResult) -> CompileResult<Option<Expr>> {
        let span = self.span_of(expr);
        let (ExprKind::Call { args, .. }, Some(attr)) =
            (&expr.kind, self.ctx.semantics.scheduling(expr.id))
        else {
            return Err(ErrorKind::internal("scheduled call without scheduling attribute").at(span));
        };
        let attr = attr.clone();

        if self.lambda_depth > 0 || self.nested_depth > 0 {
            return Err(ErrorKind::ScheduledCallInNestedScope {
                node_type: attr.node_type,
            }
            .at(span));
        }
        if let Some(slot) = self.slot {
            return Err(ErrorKind::ScheduledCallNotAllowedHere {
                node_type: attr.node_type,
                slot: slot.to_string(),
            }
            .at(span));
        }

        let mut arguments = Vec::with_capacity(args.len());
        for (i, arg) in args.iter().enumerate() {
            let param = attr.parameters.get(i);
            let name = param
                .map(|p| p.name.clone())
                .unwrap_or_else(|| format!("Argument{}", i + 1));
            let expected = param.map(|p| p.direction).unwrap_or(arg.direction);
            let invalid = |direction: Direction| {
                ErrorKind::InvalidOutArgument {
                    node_type: attr.node_type.clone(),
                    argument: name.clone(),
                    direction: direction.to_string(),
                }
                .at(span)
            };
            if arg.direction != expected {
                return Err(invalid(expected));
            }
            let value = match arg.direction {
                Direction::In => {
                    let ty = param.map(|p| p.ty.clone()).filter(|t| !t.is_inferred());
                    ArgumentValue::Value(ValueExpr::new(ty, self.expr(&arg.value)?))
                }
                Direction::Out | Direction::Ref => {
                    let store = arg
                        .value
                        .as_name()
                        .and_then(|_| self.ctx.store_for(&arg.value))
                        .ok_or_else(|| invalid(arg.direction))?;
                    ArgumentValue::Location(self.ctx.location(store))
                }
            };
            arguments.push(NodeArgument {
                name,
                direction: arg.direction,
                value,
            });
        }

        let (location, read) = match (result, attr.result.clone()) {
            (CallResult::Discard, _) => (None, None),
            (CallResult::Into(store), Some(_)) => (Some(self.ctx.location(store)), None),
            (CallResult::Into(_), None) => (None, None),
            (CallResult::Temp, Some(ty)) => {
                let temp = self.temp("r", ty.clone());
                (
                    Some(Location::new(Some(ty), Expr::name(temp.clone()))),
                    Some(Expr::store_get(Expr::name(temp))),
                )
            }
            (CallResult::Temp, None) => (None, Some(Expr::null())),
        };

        let display = attr
            .node_type
            .rsplit('.')
            .next()
            .unwrap_or(attr.node_type.as_str())
            .to_string();
        trace!(node_type = %attr.node_type, arguments = arguments.len(), "Scheduling call");
        self.steps.push_node(
            Node::new(NodeKind::Invoke {
                node_type: attr.node_type,
                arguments,
                result: location,
            })
            .named(display),
        );
        Ok(read)
    }

    /// A call the engine does not schedule. Stores passed by `ref`/`out`
    /// are copied through locals.
    fn plain_call(&mut self, expr: &Expr, discard: bool) -> CompileResult<Expr> {
        let ExprKind::Call { callee, args } = &expr.kind else {
            return self.expr(expr);
        };
        let callee = self.expr(callee)?;
        let mut prologue = Vec::new();
        let mut epilogue = Vec::new();
        let mut lowered = Vec::with_capacity(args.len());

        for arg in args {
            let store = match arg.direction {
                Direction::In => None,
                Direction::Out | Direction::Ref => arg
                    .value
                    .as_name()
                    .and_then(|_| self.ctx.store_for(&arg.value)),
            };
            let Some(store) = store else {
                lowered.push(Argument {
                    direction: arg.direction,
                    value: self.expr(&arg.value)?,
                });
                continue;
            };
            self.check_lambda_store(&arg.value, store)?;
            let local = self.ctx.temp_var("v");
            let handle = self.handle(store);
            let ty = self.ctx.store_type(store);
            let init = (arg.direction == Direction::Ref).then(|| Expr::store_get(handle.clone()));
            prologue.push(CodeStmt::local(local.clone(), ty, init));
            epilogue.push(CodeStmt::expr(Expr::store_set(handle, Expr::name(local.clone()))));
            lowered.push(Argument {
                direction: arg.direction,
                value: Expr::name(local),
            });
        }

        let call = Expr {
            id: expr.id,
            span: expr.span,
            kind: ExprKind::Call {
                callee: Box::new(callee),
                args: lowered,
            },
        };
        if prologue.is_empty() {
            return Ok(call);
        }
        let mut body = prologue;
        if discard {
            body.push(CodeStmt::expr(call));
            body.extend(epilogue);
            return Ok(Expr::block(body, None));
        }
        let result = self.ctx.temp_var("v");
        body.push(CodeStmt::local(result.clone(), TypeRef::inferred(), Some(call)));
        body.extend(epilogue);
        Ok(Expr::block(body, Some(Expr::name(result))))
    }

    // ------------------------------------------------------------------
    // Linearization
    // ------------------------------------------------------------------

    /// `L && R`, `L || R`, `L ?? R` with a scheduled call in `R`.
    fn short_circuit(&mut self, expr: &Expr, op: BinaryOp, lhs: &Expr, rhs: &Expr) -> CompileResult<Expr> {
        let left = self.expr(lhs)?;
        self.steps.ensure_index(self.ctx);
        let ty = match op {
            BinaryOp::Coalesce => self.ctx.expr_type(expr).unwrap_or_else(TypeRef::object),
            _ => TypeRef::boolean(),
        };
        let result = self.temp("r", ty.clone());
        let read = || Expr::store_get(Expr::name(result.clone()));
        let set = |value: Expr| CodeStmt::expr(Expr::store_set(Expr::name(result.clone()), value));

        let (prefix, condition, on_skip) = match op {
            BinaryOp::AndAlso => (vec![set(left)], Expr::not(read()), vec![]),
            BinaryOp::OrElse => (vec![set(left)], read(), vec![]),
            _ => {
                let held = self.ctx.temp_var("l");
                let held_ty = self.ctx.expr_type(lhs).unwrap_or_else(TypeRef::object);
                (
                    vec![CodeStmt::local(held.clone(), held_ty, Some(left))],
                    Expr::binary(BinaryOp::Ne, Expr::name(held.clone()), Expr::null()),
                    vec![set(Expr::cast(ty, Expr::name(held)))],
                )
            }
        };
        let skip = self.steps.push_skip(prefix, Some(condition), on_skip);

        let right = self.expr(rhs)?;
        self.steps.push_plain(set(right));
        self.steps.flush();
        self.steps.patch_skip(skip, self.steps.len() - skip - 1);
        Ok(read())
    }

    /// `C ? A : B` with a scheduled call in `A` or `B`.
    fn conditional(
        &mut self,
        expr: &Expr,
        condition: &Expr,
        then: &Expr,
        otherwise: &Expr,
    ) -> CompileResult<Expr> {
        let condition = self.expr(condition)?;
        self.steps.ensure_index(self.ctx);
        let ty = self
            .ctx
            .expr_type(expr)
            .or_else(|| self.ctx.expr_type(then))
            .or_else(|| self.ctx.expr_type(otherwise))
            .unwrap_or_else(TypeRef::object);
        let result = self.temp("r", ty);
        let set = |value: Expr| CodeStmt::expr(Expr::store_set(Expr::name(result.clone()), value));

        let to_else = self.steps.push_skip(Vec::new(), Some(Expr::not(condition)), Vec::new());
        let a = self.expr(then)?;
        let to_end = self.steps.push_skip(vec![set(a)], None, Vec::new());
        self.steps.patch_skip(to_else, to_end - to_else);

        let b = self.expr(otherwise)?;
        self.steps.push_plain(set(b));
        self.steps.flush();
        self.steps.patch_skip(to_end, self.steps.len() - to_end - 1);
        Ok(Expr::store_get(Expr::name(result)))
    }
}
