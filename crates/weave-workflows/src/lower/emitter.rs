// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Statement lowering for the impl pass.
//!
//! Each statement kind maps to one node shape. Value slots are rewritten
//! through a [`Rewriter`]; steps a slot needs before its consumer runs are
//! hoisted into a sequence wrapping the consuming node.

use std::collections::{HashMap, HashSet};

use tracing::debug;
use weave_dsl::ast::{
    Content, ExprFragment, NodeRef, ServiceKind, ServiceOperation, StmtId, StmtKind,
};
use weave_dsl::code::{CodeStmt, Expr, TypeRef};
use weave_dsl::error::ErrorKind;
use weave_dsl::span::SourceSpan;
use weave_dsl::store::{StoreId, StoreKind};

use super::context::LowerContext;
use super::rewriter::Rewriter;
use crate::graph::{
    ArgumentValue, CatchNode, FlowNode, FlowSwitchCase, MessageContent, MessagingNode, Node,
    NodeKind, PickBranchNode, StateNode, SwitchCaseNode, TransitionNode, ValueExpr, VariableDecl,
};
use crate::model::{COMPENSATION_TOKEN_TYPE, CORRELATION_HANDLE_TYPE, EXCEPTION_TYPE, TIMESPAN_TYPE};

/// Slots the engine evaluates repeatedly or concurrently.
const TRANSITION_CONDITION: &str = "transition condition";
const FLOW_DECISION: &str = "flowchart decision";
const FLOW_SWITCH: &str = "flowchart switch";
const SWITCH_CASE: &str = "switch case key";
const COMPLETION_CONDITION: &str = "completion condition";
const MESSAGE_CONTENT: &str = "message content";
const CORRELATION: &str = "correlation expression";
const ENDPOINT: &str = "endpoint";

/// Steps hoisted out of value slots, run before the consuming node.
#[derive(Default)]
struct Hoisted {
    variables: Vec<VariableDecl>,
    nodes: Vec<Node>,
}

impl Hoisted {
    fn wrap(mut self, consumer: Node) -> Node {
        if self.variables.is_empty() && self.nodes.is_empty() {
            return consumer;
        }
        self.nodes.push(consumer);
        Node::sequence(self.variables, self.nodes)
    }
}

pub(crate) struct Emitter<'a> {
    pub ctx: LowerContext<'a>,
}

impl<'a> Emitter<'a> {
    pub fn new(ctx: LowerContext<'a>) -> Self {
        Self { ctx }
    }

    /// Lower the activity body, declaring activity-level locals on it.
    pub fn root(&mut self) -> Node {
        let act = self.ctx.activity;
        let locals: Vec<StoreId> = act
            .activity_stores
            .iter()
            .copied()
            .filter(|id| act.store(*id).kind == StoreKind::Local)
            .collect();
        let mut variables = self.variables(&locals);
        let body = self.stmt(act.root);
        match (variables.is_empty(), body) {
            (true, Some(body)) => body,
            (_, Some(Node {
                display_name: None,
                kind:
                    NodeKind::Sequence {
                        variables: inner,
                        activities,
                    },
            })) => {
                variables.extend(inner);
                Node::sequence(variables, activities)
            }
            (_, Some(body)) => Node::sequence(variables, vec![body]),
            (_, None) => Node::sequence(variables, Vec::new()),
        }
    }

    // ------------------------------------------------------------------
    // Helpers
    // ------------------------------------------------------------------

    fn variables(&mut self, stores: &[StoreId]) -> Vec<VariableDecl> {
        stores
            .iter()
            .map(|id| {
                let ty = self.ctx.store_type(*id);
                VariableDecl::new(self.ctx.store(*id).name.clone(), ty)
            })
            .collect()
    }

    fn boxed(&mut self, id: StmtId) -> Option<Box<Node>> {
        self.stmt(id).map(Box::new)
    }

    fn optional(&mut self, id: Option<StmtId>) -> Option<Box<Node>> {
        id.and_then(|id| self.boxed(id))
    }

    /// Lower `id` and declare `stores` on a sequence around it.
    fn hosted(&mut self, id: StmtId, stores: &[StoreId]) -> Option<Node> {
        let body = self.stmt(id);
        if stores.is_empty() {
            return body;
        }
        let variables = self.variables(stores);
        Some(Node::sequence(variables, body.into_iter().collect()))
    }

    fn slot_type(&self, fragment: &ExprFragment, ty: Option<TypeRef>) -> Option<TypeRef> {
        ty.or_else(|| self.ctx.expr_type(&fragment.expr))
    }

    /// A value slot evaluated once, before its consumer. Steps go to `hoisted`.
    fn value(&mut self, fragment: &ExprFragment, ty: Option<TypeRef>, hoisted: &mut Hoisted) -> ValueExpr {
        let ty = self.slot_type(fragment, ty);
        let mut rewriter = Rewriter::new(&mut self.ctx, fragment.span);
        let expr = rewriter.value(&fragment.expr);
        let (variables, nodes) = rewriter.into_parts();
        match self.ctx.diagnostics.absorb(expr) {
            Some(expr) => {
                hoisted.variables.extend(variables);
                hoisted.nodes.extend(nodes);
                ValueExpr::new(ty, expr)
            }
            None => ValueExpr::new(ty, Expr::null()),
        }
    }

    fn optional_value(
        &mut self,
        fragment: &Option<ExprFragment>,
        ty: Option<TypeRef>,
        hoisted: &mut Hoisted,
    ) -> Option<ValueExpr> {
        fragment.as_ref().map(|f| self.value(f, ty, hoisted))
    }

    /// A value slot that must not schedule calls.
    fn restricted(&mut self, fragment: &ExprFragment, ty: Option<TypeRef>, slot: &'static str) -> ValueExpr {
        let ty = self.slot_type(fragment, ty);
        let mut rewriter = Rewriter::restricted(&mut self.ctx, fragment.span, slot);
        let expr = rewriter.value(&fragment.expr);
        let expr = self.ctx.diagnostics.absorb(expr).unwrap_or_else(Expr::null);
        ValueExpr::new(ty, expr)
    }

    fn optional_restricted(
        &mut self,
        fragment: &Option<ExprFragment>,
        ty: Option<TypeRef>,
        slot: &'static str,
    ) -> Option<ValueExpr> {
        fragment.as_ref().map(|f| self.restricted(f, ty, slot))
    }

    fn target(&self, reference: &NodeRef, index: &HashMap<StmtId, usize>) -> Option<usize> {
        reference.resolved.and_then(|id| index.get(&id).copied())
    }

    // ------------------------------------------------------------------
    // Statements
    // ------------------------------------------------------------------

    pub fn stmt(&mut self, id: StmtId) -> Option<Node> {
        let act = self.ctx.activity;
        let stmt = act.stmt(id);
        let mut hoisted = Hoisted::default();
        let node = match &stmt.kind {
            StmtKind::Code { .. } => return self.code_run(id),
            StmtKind::Empty => return None,
            StmtKind::Sequence { members } => return self.sequence(members, &stmt.stores),
            StmtKind::If {
                condition,
                then,
                otherwise,
            } => {
                let condition = self.value(condition, Some(TypeRef::boolean()), &mut hoisted);
                NodeKind::If {
                    condition,
                    then: self.boxed(*then),
                    otherwise: self.optional(*otherwise),
                }
            }
            StmtKind::While {
                condition,
                body,
                do_while,
            } => return self.while_loop(condition, *body, *do_while),
            StmtKind::Switch {
                value,
                cases,
                default,
            } => {
                let value = self.value(value, None, &mut hoisted);
                let key_ty = value.ty.clone();
                let cases = cases
                    .iter()
                    .map(|case| SwitchCaseNode {
                        key: self.restricted(&case.key, key_ty.clone(), SWITCH_CASE),
                        body: self.stmt(case.body),
                    })
                    .collect();
                NodeKind::Switch {
                    value,
                    cases,
                    default: self.optional(*default),
                }
            }
            StmtKind::Throw { exception } => match exception {
                Some(exception) => NodeKind::Throw {
                    exception: self.value(exception, Some(TypeRef::new(EXCEPTION_TYPE)), &mut hoisted),
                },
                None => NodeKind::Rethrow,
            },
            StmtKind::Try {
                body,
                catches,
                finally,
            } => NodeKind::TryCatch {
                body: self.boxed(*body),
                catches: catches.iter().filter_map(|c| self.catch(*c)).collect(),
                finally: self.optional(*finally),
            },
            StmtKind::Catch { .. } => {
                // Catches are lowered by their try.
                self.ctx.report(
                    ErrorKind::internal("catch outside try"),
                    stmt.span,
                );
                return None;
            }
            StmtKind::ForEach {
                item,
                values,
                body,
                parallel,
                completion,
            } => {
                let values = self.value(values, None, &mut hoisted);
                let item_type = self.ctx.store_type(*item);
                let item_argument = argument_name(self.ctx.store(*item).handle());
                let others: Vec<StoreId> =
                    stmt.stores.iter().copied().filter(|s| s != item).collect();
                NodeKind::ForEach {
                    item_type,
                    item_argument,
                    values,
                    body: self.hosted(*body, &others).map(Box::new),
                    parallel: *parallel,
                    completion: self.optional_restricted(
                        completion,
                        Some(TypeRef::boolean()),
                        COMPLETION_CONDITION,
                    ),
                }
            }
            StmtKind::Delay { duration } => NodeKind::Delay {
                duration: self.value(duration, Some(TypeRef::new(TIMESPAN_TYPE)), &mut hoisted),
            },
            StmtKind::Parallel {
                branches,
                completion,
            } => NodeKind::Parallel {
                branches: branches.iter().filter_map(|b| self.stmt(*b)).collect(),
                completion: self.optional_restricted(
                    completion,
                    Some(TypeRef::boolean()),
                    COMPLETION_CONDITION,
                ),
            },
            StmtKind::Pick { branches } => NodeKind::Pick {
                branches: branches.iter().filter_map(|b| self.pick_branch(*b)).collect(),
            },
            StmtKind::PickBranch { .. } => {
                self.ctx.report(
                    ErrorKind::internal("pick branch outside pick"),
                    stmt.span,
                );
                return None;
            }
            StmtKind::StateMachine {
                states,
                resolved_start,
                ..
            } => self.state_machine(states, *resolved_start, &stmt.stores, stmt.span),
            StmtKind::State { .. } | StmtKind::Transition { .. } | StmtKind::TransitionBody { .. } => {
                self.ctx.report(
                    ErrorKind::internal("state outside state machine"),
                    stmt.span,
                );
                return None;
            }
            StmtKind::Flow { nodes, start } => self.flowchart(nodes, *start, &stmt.stores),
            StmtKind::FlowStep { .. } | StmtKind::FlowIf { .. } | StmtKind::FlowSwitch { .. } => {
                self.ctx.report(
                    ErrorKind::internal("flow node outside flowchart"),
                    stmt.span,
                );
                return None;
            }
            StmtKind::Transacted { body, timeout } => NodeKind::TransactionScope {
                timeout: self.optional_value(timeout, Some(TypeRef::new(TIMESPAN_TYPE)), &mut hoisted),
                body: self.boxed(*body),
            },
            StmtKind::Cancellable { body, handler } => NodeKind::CancellationScope {
                body: self.boxed(*body),
                handler: self.optional(*handler),
            },
            StmtKind::Compensable {
                body,
                token,
                compensation,
                confirmation,
                cancellation,
            } => NodeKind::Compensable {
                token: token.map(|t| self.ctx.location(t)),
                body: self.boxed(*body),
                compensation: self.optional(*compensation),
                confirmation: self.optional(*confirmation),
                cancellation: self.optional(*cancellation),
            },
            StmtKind::Confirm { target } => NodeKind::Confirm {
                target: self.optional_value(
                    target,
                    Some(TypeRef::new(COMPENSATION_TOKEN_TYPE)),
                    &mut hoisted,
                ),
            },
            StmtKind::Compensate { target } => NodeKind::Compensate {
                target: self.optional_value(
                    target,
                    Some(TypeRef::new(COMPENSATION_TOKEN_TYPE)),
                    &mut hoisted,
                ),
            },
            StmtKind::Persist => NodeKind::Persist,
            StmtKind::NoPersist { body } => NodeKind::NoPersistScope {
                body: self.boxed(*body),
            },
            StmtKind::Terminate { reason, exception } => NodeKind::Terminate {
                reason: self.optional_value(reason, Some(TypeRef::string()), &mut hoisted),
                exception: self.optional_value(
                    exception,
                    Some(TypeRef::new(EXCEPTION_TYPE)),
                    &mut hoisted,
                ),
            },
            StmtKind::Service(op) => return Some(self.messaging(id, op)),
            StmtKind::ContentCorrelation { handle, data } => NodeKind::InitializeCorrelation {
                handle: self.restricted(
                    handle,
                    Some(TypeRef::new(CORRELATION_HANDLE_TYPE)),
                    CORRELATION,
                ),
                data: data
                    .iter()
                    .map(|p| (p.name.clone(), self.restricted(&p.value, None, CORRELATION)))
                    .collect(),
            },
            StmtKind::TransactedReceive { request, body } => {
                let variables = self.variables(&stmt.stores);
                let Some(request) = self.stmt(*request) else {
                    self.ctx.report(
                        ErrorKind::internal("transacted receive without request"),
                        stmt.span,
                    );
                    return None;
                };
                NodeKind::TransactedReceiveScope {
                    variables,
                    request: Box::new(request),
                    body: self.boxed(*body),
                }
            }
        };
        Some(hoisted.wrap(Node::new(node)))
    }

    /// Lower a code statement together with the code statements chained to it.
    fn code_run(&mut self, first: StmtId) -> Option<Node> {
        let act = self.ctx.activity;
        let span = act.stmt(first).span;
        let mut rewriter = Rewriter::new(&mut self.ctx, span);
        let mut next = Some(first);
        let mut fragments = 0usize;
        let mut result = Ok(());
        while let Some(id) = next {
            let StmtKind::Code {
                fragment,
                chained,
                initializes,
            } = act.kind(id)
            else {
                break;
            };
            fragments += 1;
            result = rewriter.code(&fragment.body, *initializes);
            if result.is_err() {
                break;
            }
            next = *chained;
        }
        let node = rewriter.finish();
        debug!(activity = %act.name, fragments, "Lowered code run");
        self.ctx.diagnostics.absorb(result)?;
        node
    }

    fn sequence(&mut self, members: &[StmtId], stores: &[StoreId]) -> Option<Node> {
        let act = self.ctx.activity;
        let variables = self.variables(stores);
        let chained: HashSet<StmtId> = members
            .iter()
            .filter_map(|m| match act.kind(*m) {
                StmtKind::Code {
                    chained: Some(next),
                    ..
                } => Some(*next),
                _ => None,
            })
            .collect();

        let mut activities = Vec::with_capacity(members.len());
        for member in members {
            if chained.contains(member) {
                continue;
            }
            if let Some(node) = self.stmt(*member) {
                activities.push(node);
            }
        }

        if variables.is_empty() && activities.len() <= 1 {
            return activities.pop();
        }
        Some(Node::sequence(variables, activities))
    }

    /// `while` whose condition needs steps: the steps run before the first
    /// test and again at the end of every iteration, storing the outcome in
    /// a condition variable.
    fn while_loop(&mut self, condition: &ExprFragment, body: StmtId, do_while: bool) -> Option<Node> {
        let mut hoisted = Hoisted::default();
        let value = self.value(condition, Some(TypeRef::boolean()), &mut hoisted);
        let body = self.stmt(body);
        if hoisted.variables.is_empty() && hoisted.nodes.is_empty() {
            return Some(Node::new(NodeKind::While {
                condition: value,
                body: body.map(Box::new),
                do_while,
            }));
        }

        let flag = self.ctx.temp_var("c");
        let mut steps = hoisted.nodes;
        steps.push(Node::code(vec![CodeStmt::expr(Expr::store_set(
            Expr::name(flag.clone()),
            value.expr,
        ))]));
        let evaluate = Node::sequence(hoisted.variables, steps);

        let mut iteration: Vec<Node> = body.into_iter().collect();
        iteration.push(evaluate.clone());
        let loop_node = Node::new(NodeKind::While {
            condition: ValueExpr::new(
                Some(TypeRef::boolean()),
                Expr::store_get(Expr::name(flag.clone())),
            ),
            body: Some(Box::new(Node::sequence(Vec::new(), iteration))),
            do_while,
        });

        let mut activities = Vec::with_capacity(2);
        if !do_while {
            activities.push(evaluate);
        }
        activities.push(loop_node);
        Some(Node::sequence(
            vec![VariableDecl::new(flag, TypeRef::boolean())],
            activities,
        ))
    }

    fn catch(&mut self, id: StmtId) -> Option<CatchNode> {
        let act = self.ctx.activity;
        let stmt = act.stmt(id);
        let StmtKind::Catch {
            exception_type,
            variable,
            body,
        } = &stmt.kind
        else {
            return None;
        };
        let others: Vec<StoreId> = stmt
            .stores
            .iter()
            .copied()
            .filter(|s| Some(*s) != *variable)
            .collect();
        Some(CatchNode {
            exception_type: exception_type.clone(),
            argument: variable.map(|v| argument_name(self.ctx.store(v).handle())),
            body: self.hosted(*body, &others),
        })
    }

    fn pick_branch(&mut self, id: StmtId) -> Option<PickBranchNode> {
        let act = self.ctx.activity;
        let stmt = act.stmt(id);
        let StmtKind::PickBranch { trigger, action } = &stmt.kind else {
            return None;
        };
        Some(PickBranchNode {
            variables: self.variables(&stmt.stores),
            trigger: self.stmt(*trigger),
            action: action.and_then(|a| self.stmt(a)),
        })
    }

    fn state_machine(
        &mut self,
        states: &[StmtId],
        start: Option<StmtId>,
        stores: &[StoreId],
        span: SourceSpan,
    ) -> NodeKind {
        let act = self.ctx.activity;
        let index: HashMap<StmtId, usize> =
            states.iter().enumerate().map(|(i, s)| (*s, i)).collect();
        let variables = self.variables(stores);

        let mut lowered = Vec::with_capacity(states.len());
        for state in states {
            let StmtKind::State {
                name,
                is_final,
                entry,
                exit,
                transitions,
            } = act.kind(*state)
            else {
                continue;
            };
            let mut node = StateNode {
                name: name.clone(),
                is_final: *is_final,
                entry: entry.and_then(|e| self.stmt(e)),
                exit: exit.and_then(|e| self.stmt(e)),
                triggers: Vec::new(),
                transitions: Vec::new(),
            };
            for transition in transitions {
                let StmtKind::Transition { trigger, bodies } = act.kind(*transition) else {
                    continue;
                };
                let trigger = trigger.and_then(|t| self.stmt(t)).map(|t| {
                    node.triggers.push(t);
                    node.triggers.len() - 1
                });
                for body in bodies {
                    let StmtKind::TransitionBody {
                        condition,
                        action,
                        target,
                    } = act.kind(*body)
                    else {
                        continue;
                    };
                    let Some(to) = self.target(target, &index) else {
                        self.ctx.report(
                            ErrorKind::internal(format!(
                                "unresolved transition target '{}'",
                                target.name
                            )),
                            target.span,
                        );
                        continue;
                    };
                    node.transitions.push(TransitionNode {
                        trigger,
                        condition: self.optional_restricted(
                            condition,
                            Some(TypeRef::boolean()),
                            TRANSITION_CONDITION,
                        ),
                        action: action.and_then(|a| self.stmt(a)),
                        to,
                    });
                }
            }
            lowered.push(node);
        }

        let initial_state = match start.and_then(|s| index.get(&s).copied()) {
            Some(i) => i,
            None => {
                self.ctx.report(
                    ErrorKind::internal("state machine start was not resolved"),
                    span,
                );
                0
            }
        };
        NodeKind::StateMachine {
            variables,
            states: lowered,
            initial_state,
        }
    }

    fn flowchart(&mut self, nodes: &[StmtId], start: Option<StmtId>, stores: &[StoreId]) -> NodeKind {
        let act = self.ctx.activity;
        let index: HashMap<StmtId, usize> =
            nodes.iter().enumerate().map(|(i, n)| (*n, i)).collect();
        let variables = self.variables(stores);

        let mut lowered = Vec::with_capacity(nodes.len());
        for id in nodes {
            let node = match act.kind(*id) {
                StmtKind::FlowStep {
                    name,
                    action,
                    resolved_next,
                    ..
                } => FlowNode::Step {
                    name: name.clone(),
                    action: self.stmt(*action),
                    next: resolved_next.and_then(|n| index.get(&n).copied()),
                },
                StmtKind::FlowIf {
                    name,
                    condition,
                    on_true,
                    on_false,
                } => FlowNode::Decision {
                    name: name.clone(),
                    condition: self.restricted(condition, Some(TypeRef::boolean()), FLOW_DECISION),
                    on_true: on_true.as_ref().and_then(|r| self.target(r, &index)),
                    on_false: on_false.as_ref().and_then(|r| self.target(r, &index)),
                },
                StmtKind::FlowSwitch {
                    name,
                    value,
                    cases,
                    default,
                } => {
                    let value = self.restricted(value, None, FLOW_SWITCH);
                    let key_ty = value.ty.clone();
                    let mut lowered_cases = Vec::with_capacity(cases.len());
                    for case in cases {
                        let key = self.restricted(&case.key, key_ty.clone(), FLOW_SWITCH);
                        if let Some(target) = self.target(&case.target, &index) {
                            lowered_cases.push(FlowSwitchCase { key, target });
                        }
                    }
                    FlowNode::Switch {
                        name: name.clone(),
                        value,
                        cases: lowered_cases,
                        default: default.as_ref().and_then(|r| self.target(r, &index)),
                    }
                }
                _ => continue,
            };
            lowered.push(node);
        }

        NodeKind::Flowchart {
            variables,
            nodes: lowered,
            start: start.and_then(|s| index.get(&s).copied()),
        }
    }

    // ------------------------------------------------------------------
    // Messaging
    // ------------------------------------------------------------------

    fn messaging_id(&self, id: StmtId, op: &ServiceOperation) -> String {
        match &op.name {
            Some(name) => LowerContext::sanitize_ident(name),
            None => format!(
                "{}_{}",
                LowerContext::sanitize_ident(&op.display_name()),
                id.0
            ),
        }
    }

    fn messaging(&mut self, id: StmtId, op: &ServiceOperation) -> Node {
        let act = self.ctx.activity;
        let request = op
            .request
            .and_then(|r| act.service(r).map(|request| self.messaging_id(r, request)));
        let content = op.content.as_ref().map(|c| self.content(op.kind, c));
        let correlation_initializers = op
            .correlation_store
            .map(|store| vec![self.ctx.location(store)])
            .unwrap_or_default();
        let endpoint = match op.kind {
            ServiceKind::Send => self.optional_restricted(&op.endpoint, None, ENDPOINT),
            _ => None,
        };

        let node = MessagingNode {
            id: self.messaging_id(id, op),
            contract: op.contract.clone(),
            operation: op.operation.clone(),
            request,
            content,
            correlates_with: self.optional_restricted(
                &op.correlates_with,
                Some(TypeRef::new(CORRELATION_HANDLE_TYPE)),
                CORRELATION,
            ),
            correlation_initializers,
            can_create_instance: op.can_create_instance,
            endpoint,
        };
        let kind = match op.kind {
            ServiceKind::Receive => NodeKind::Receive(node),
            ServiceKind::Send => NodeKind::Send(node),
            ServiceKind::SendReply => NodeKind::SendReply(node),
            ServiceKind::ReceiveReply => NodeKind::ReceiveReply(node),
        };
        Node::new(kind).named(op.display_name())
    }

    fn content(&mut self, kind: ServiceKind, content: &Content) -> MessageContent {
        match content {
            Content::Message(fragment) => MessageContent::Message {
                value: self.content_value(kind, fragment),
            },
            Content::Parameters(params) => MessageContent::Parameters {
                parameters: params
                    .iter()
                    .map(|p| (p.name.clone(), self.content_value(kind, &p.value)))
                    .collect(),
            },
        }
    }

    /// Outbound content is a value; inbound content names the store that
    /// receives it.
    fn content_value(&mut self, kind: ServiceKind, fragment: &ExprFragment) -> ArgumentValue {
        if !kind.is_inbound() {
            return ArgumentValue::Value(self.restricted(fragment, None, MESSAGE_CONTENT));
        }
        let store = fragment
            .expr
            .as_name()
            .and_then(|_| self.ctx.store_for(&fragment.expr));
        match store {
            Some(store) => ArgumentValue::Location(self.ctx.location(store)),
            None => {
                self.ctx.report(
                    ErrorKind::InvalidValue {
                        label: kind.to_string(),
                        detail: "received content must name a workflow variable".to_string(),
                    },
                    fragment.span,
                );
                ArgumentValue::Value(ValueExpr::new(None, Expr::null()))
            }
        }
    }
}

/// Delegate argument name bound by a store's rewrite.
fn argument_name(handle: Expr) -> String {
    match handle.as_name() {
        Some(name) => name.to_string(),
        None => handle.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::emit_model;
    use crate::oracle::{ScopeOracle, SemanticIndex, SemanticOracle};
    use crate::resolve::resolve_unit;
    use weave_dsl::ast::{CompilationUnit, IdAllocator};
    use weave_dsl::build::build_unit;
    use weave_dsl::code::{BinaryOp, CodeStmt};
    use weave_dsl::error::Diagnostics;
    use weave_dsl::tree::{ParseNode, ParseUnit};

    fn callee(name: &str, result: Option<&str>) -> ParseNode {
        let mut node = ParseNode::new("activity")
            .with_text(name)
            .with_member("body", ParseNode::new("sequence"));
        if let Some(result) = result {
            node = node.with_member("result", ParseNode::type_name(result));
        }
        node
    }

    fn build(body: ParseNode) -> CompilationUnit {
        let parsed = ParseUnit {
            activities: vec![
                callee("A", Some("int")),
                callee("B", Some("bool")),
                callee("C", None),
                ParseNode::new("activity").with_text("Main").with_member("body", body),
            ],
            ..Default::default()
        };
        let mut ids = IdAllocator::new();
        let mut unit = build_unit(&mut ids, 0, &parsed).unwrap();
        let mut diagnostics = Diagnostics::new();
        resolve_unit(&mut unit, &mut ids, &mut diagnostics);
        diagnostics.checkpoint().unwrap();
        unit
    }

    fn lower(body: ParseNode) -> (Node, Diagnostics) {
        let unit = build(body);
        let model = emit_model(std::slice::from_ref(&unit), vec![]);
        let semantics = SemanticIndex::new(ScopeOracle::new().analyze(&model.units, &[]).unwrap());
        let ctx = LowerContext::new(&unit.activities[3], &semantics, 64);
        let mut emitter = Emitter::new(ctx);
        let node = emitter.root();
        (node, emitter.ctx.diagnostics)
    }

    fn expr(e: Expr) -> ParseNode {
        ParseNode::expression(e)
    }

    fn call(name: &str) -> ParseNode {
        ParseNode::code_block(vec![CodeStmt::expr(Expr::invoke(name, vec![]))])
    }

    #[test]
    fn test_single_member_sequence_is_member() {
        let (node, _) = lower(ParseNode::new("sequence").with_item(call("C")));
        assert!(matches!(node.kind, NodeKind::Invoke { .. }));
        let (nested, _) = lower(
            ParseNode::new("sequence").with_item(ParseNode::new("sequence").with_item(call("C"))),
        );
        assert_eq!(node, nested);
    }

    #[test]
    fn test_chained_code_lowered_as_one_run() {
        let (node, _) = lower(
            ParseNode::new("sequence")
                .with_item(call("C"))
                .with_item(call("C")),
        );
        let NodeKind::Sequence { activities, .. } = &node.kind else {
            panic!("expected sequence");
        };
        assert_eq!(activities.len(), 2);
        assert!(activities.iter().all(|a| matches!(a.kind, NodeKind::Invoke { .. })));
    }

    #[test]
    fn test_if_condition_with_scheduled_call_is_hoisted() {
        let (node, diagnostics) = lower(
            ParseNode::new("if")
                .with_member("condition", expr(Expr::invoke("B", vec![])))
                .with_member("then", call("C")),
        );
        assert!(diagnostics.is_empty());
        let NodeKind::Sequence {
            variables,
            activities,
        } = &node.kind
        else {
            panic!("expected hoisting sequence");
        };
        assert_eq!(variables.len(), 1);
        assert!(matches!(activities[0].kind, NodeKind::Invoke { .. }));
        let NodeKind::If { condition, then, .. } = &activities[1].kind else {
            panic!("expected if");
        };
        assert_eq!(
            condition.expr.to_string(),
            format!("{}.Get(__ctx)", variables[0].name)
        );
        assert!(then.is_some());
    }

    #[test]
    fn test_while_condition_reevaluated_each_iteration() {
        let (node, diagnostics) = lower(
            ParseNode::new("while")
                .with_member("condition", expr(Expr::invoke("B", vec![])))
                .with_member("body", call("C")),
        );
        assert!(diagnostics.is_empty());
        let NodeKind::Sequence {
            variables,
            activities,
        } = &node.kind
        else {
            panic!("expected sequence");
        };
        assert_eq!(variables[0].ty, TypeRef::boolean());
        assert_eq!(activities.len(), 2);
        let NodeKind::While { body, .. } = &activities[1].kind else {
            panic!("expected while");
        };
        let body = body.as_ref().unwrap();
        let NodeKind::Sequence { activities: inner, .. } = &body.kind else {
            panic!("expected iteration sequence");
        };
        assert_eq!(inner.last(), Some(&activities[0]));
        assert_eq!(body.invoked_types(), vec!["C", "B"]);
    }

    #[test]
    fn test_transition_condition_rejects_scheduled_call() {
        let machine = ParseNode::new("statemachine")
            .with_item(
                ParseNode::new("state").with_text("S1").with_item(
                    ParseNode::new("transition")
                        .with_member("condition", expr(Expr::invoke("B", vec![])))
                        .with_member("target", ParseNode::reference("S2")),
                ),
            )
            .with_item(ParseNode::new("final-state").with_text("S2"));
        let (_, mut diagnostics) = lower(machine);
        let errors = diagnostics.checkpoint().unwrap_err();
        assert!(errors.contains_code("W053"));
    }

    #[test]
    fn test_state_machine_indices() {
        let machine = ParseNode::new("statemachine")
            .with_item(
                ParseNode::new("state").with_text("S1").with_item(
                    ParseNode::new("transition").with_member("target", ParseNode::reference("S2")),
                ),
            )
            .with_item(ParseNode::new("final-state").with_text("S2"));
        let (node, diagnostics) = lower(machine);
        assert!(diagnostics.is_empty());
        let NodeKind::StateMachine {
            states,
            initial_state,
            ..
        } = &node.kind
        else {
            panic!("expected state machine");
        };
        assert_eq!(*initial_state, 0);
        assert_eq!(states[0].transitions[0].to, 1);
        assert!(states[1].is_final);
    }

    #[test]
    fn test_catch_argument_uses_rewrite() {
        let body = ParseNode::new("try")
            .with_member("body", call("C"))
            .with_item(
                ParseNode::new("catch").with_text("e").with_member(
                    "body",
                    ParseNode::new("throw").with_member("exception", expr(Expr::name("e"))),
                ),
            );
        let (node, diagnostics) = lower(body);
        assert!(diagnostics.is_empty());
        let NodeKind::TryCatch { catches, .. } = &node.kind else {
            panic!("expected try");
        };
        assert_eq!(catches[0].argument.as_deref(), Some("__arg_e"));
        let Some(Node {
            kind: NodeKind::Throw { exception },
            ..
        }) = &catches[0].body
        else {
            panic!("expected throw");
        };
        assert_eq!(exception.expr.to_string(), "__arg_e.Get(__ctx)");
    }

    #[test]
    fn test_comparison_condition_stays_inline() {
        let body = ParseNode::new("sequence")
            .with_member(
                "variables",
                ParseNode::new("variables").with_item(
                    ParseNode::new("var")
                        .with_text("n")
                        .with_member("type", ParseNode::type_name("int")),
                ),
            )
            .with_item(
                ParseNode::new("if")
                    .with_member(
                        "condition",
                        expr(Expr::binary(BinaryOp::Gt, Expr::name("n"), Expr::int(0))),
                    )
                    .with_member("then", call("C")),
            );
        let (node, _) = lower(body);
        let NodeKind::Sequence {
            variables,
            activities,
        } = &node.kind
        else {
            panic!("expected sequence");
        };
        assert_eq!(variables[0].name, "n");
        let NodeKind::If { condition, .. } = &activities[0].kind else {
            panic!("expected if");
        };
        assert_eq!(condition.expr.to_string(), "n.Get(__ctx) > 0");
    }
}
