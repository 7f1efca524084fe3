// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Structural resolution.
//!
//! Runs after construction over every activity of a unit: flowchart jumps,
//! state machine targets and start states, and request/reply correlation of
//! service operations. Errors accumulate into the caller's [`Diagnostics`];
//! the caller checkpoints once every unit has been resolved.

use std::collections::HashMap;

use tracing::debug;
use weave_dsl::ast::{Activity, CompilationUnit, IdAllocator, NodeRef, StmtId, StmtKind, StmtTag};
use weave_dsl::code::TypeRef;
use weave_dsl::error::{Diagnostics, ErrorKind};
use weave_dsl::store::{StoreHost, StoreKind};

use crate::model::CORRELATION_HANDLE_TYPE;

/// Resolve every activity of `unit`.
pub fn resolve_unit(unit: &mut CompilationUnit, ids: &mut IdAllocator, diags: &mut Diagnostics) {
    for activity in &mut unit.activities {
        let before = diags.len();
        resolve_activity(activity, ids, diags);
        debug!(
            activity = %activity.name,
            errors = diags.len() - before,
            "Resolved activity"
        );
    }
}

pub fn resolve_activity(act: &mut Activity, ids: &mut IdAllocator, diags: &mut Diagnostics) {
    for id in act.preorder() {
        match act.stmt(id).tag {
            StmtTag::Flow => resolve_flow(act, id, diags),
            StmtTag::StateMachine => resolve_state_machine(act, id, diags),
            _ => {}
        }
    }
    correlate(act, ids, diags);
}

fn node_names(act: &Activity, nodes: &[StmtId]) -> HashMap<String, StmtId> {
    nodes
        .iter()
        .filter_map(|id| act.kind(*id).node_name().map(|n| (n.to_string(), *id)))
        .collect()
}

fn resolve_ref(target: &mut NodeRef, names: &HashMap<String, StmtId>, diags: &mut Diagnostics) {
    match names.get(&target.name) {
        Some(id) => target.resolved = Some(*id),
        None => diags.report(
            ErrorKind::UnresolvedReference {
                name: target.name.clone(),
            },
            target.span,
        ),
    }
}

fn resolve_opt(target: &mut Option<NodeRef>, names: &HashMap<String, StmtId>, diags: &mut Diagnostics) {
    if let Some(target) = target {
        resolve_ref(target, names, diags);
    }
}

// ============================================================================
// Flowcharts
// ============================================================================

fn resolve_flow(act: &mut Activity, flow: StmtId, diags: &mut Diagnostics) {
    let StmtKind::Flow { nodes, .. } = act.kind(flow).clone() else {
        return;
    };
    let names = node_names(act, &nodes);

    for (i, node) in nodes.iter().enumerate() {
        let fallthrough = nodes.get(i + 1).copied();
        match &mut act.stmt_mut(*node).kind {
            StmtKind::FlowStep {
                next,
                resolved_next,
                ..
            } => match next {
                Some(target) => {
                    resolve_ref(target, &names, diags);
                    *resolved_next = target.resolved;
                }
                None => *resolved_next = fallthrough,
            },
            StmtKind::FlowIf {
                on_true, on_false, ..
            } => {
                resolve_opt(on_true, &names, diags);
                resolve_opt(on_false, &names, diags);
            }
            StmtKind::FlowSwitch { cases, default, .. } => {
                for case in cases.iter_mut() {
                    resolve_ref(&mut case.target, &names, diags);
                }
                resolve_opt(default, &names, diags);
            }
            _ => {}
        }
    }

    if let StmtKind::Flow { start, .. } = &mut act.stmt_mut(flow).kind {
        *start = nodes.first().copied();
    }
}

// ============================================================================
// State machines
// ============================================================================

fn resolve_state_machine(act: &mut Activity, machine: StmtId, diags: &mut Diagnostics) {
    let StmtKind::StateMachine { states, start, .. } = act.kind(machine).clone() else {
        return;
    };
    let names = node_names(act, &states);
    let is_final = |act: &Activity, id: StmtId| {
        matches!(act.kind(id), StmtKind::State { is_final: true, .. })
    };

    let resolved_start = match start {
        Some(mut target) => {
            resolve_ref(&mut target, &names, diags);
            if let Some(id) = target.resolved {
                if is_final(act, id) {
                    diags.report(
                        ErrorKind::StartStateIsFinal {
                            state: target.name.clone(),
                        },
                        target.span,
                    );
                }
            }
            target.resolved
        }
        None => {
            let first = states.iter().copied().find(|s| !is_final(act, *s));
            if first.is_none() {
                diags.report(ErrorKind::NoStartState, act.stmt(machine).span);
            }
            first
        }
    };
    if !states.iter().any(|s| is_final(act, *s)) {
        diags.report(ErrorKind::MissingFinalState, act.stmt(machine).span);
    }

    for state in &states {
        let StmtKind::State {
            name, transitions, ..
        } = act.kind(*state).clone()
        else {
            continue;
        };
        let mut untriggered_unconditioned = Vec::new();
        for transition in &transitions {
            let StmtKind::Transition { trigger, bodies } = act.kind(*transition).clone() else {
                continue;
            };
            let mut unconditioned = Vec::new();
            for body in &bodies {
                if let StmtKind::TransitionBody {
                    condition, target, ..
                } = &mut act.stmt_mut(*body).kind
                {
                    resolve_ref(target, &names, diags);
                    if condition.is_none() {
                        unconditioned.push(*body);
                    }
                }
            }
            if trigger.is_some() {
                ambiguous(act, &name, &unconditioned, diags);
            } else {
                untriggered_unconditioned.extend(unconditioned);
            }
        }
        ambiguous(act, &name, &untriggered_unconditioned, diags);
    }

    if let StmtKind::StateMachine {
        resolved_start: slot,
        ..
    } = &mut act.stmt_mut(machine).kind
    {
        *slot = resolved_start;
    }
}

/// Several bodies that would all fire unconditionally at once.
fn ambiguous(act: &Activity, state: &str, bodies: &[StmtId], diags: &mut Diagnostics) {
    if bodies.len() < 2 {
        return;
    }
    for body in bodies {
        diags.report(
            ErrorKind::TransitionConditionRequired {
                state: state.to_string(),
            },
            act.stmt(*body).span,
        );
    }
}

// ============================================================================
// Correlation
// ============================================================================

/// Pair every reply with its request.
fn correlate(act: &mut Activity, ids: &mut IdAllocator, diags: &mut Diagnostics) {
    let ops = act.service_operations.clone();
    for (position, reply_id) in ops.iter().enumerate() {
        let Some(reply) = act.service(*reply_id).cloned() else {
            continue;
        };
        if !reply.kind.is_reply() {
            continue;
        }
        let side = reply.kind.side();
        let is_request = |id: &StmtId| {
            act.service(*id)
                .is_some_and(|op| !op.kind.is_reply() && op.kind.side() == side)
        };

        let request_id = match &reply.request_name {
            Some(name) => ops.iter().copied().filter(|id| is_request(id)).find(|id| {
                act.service(*id)
                    .is_some_and(|op| op.name.as_deref() == Some(name.as_str()))
            }),
            None => ops[..position].iter().rev().copied().find(|id| is_request(id)),
        };
        let span = act.stmt(*reply_id).span;
        let Some(request_id) = request_id else {
            diags.report(
                ErrorKind::RequestNotFound {
                    reply: reply.display_name(),
                },
                span,
            );
            continue;
        };
        let Some(request) = act.service(request_id).cloned() else {
            continue;
        };
        if request.reply.is_some() {
            diags.report(
                ErrorKind::RequestAlreadyReferencedByAnotherReply {
                    request: request.display_name(),
                },
                span,
            );
            continue;
        }

        let name = act.next_temp("handle");
        let marker = ids.marker();
        let request_span = act.stmt(request_id).span;
        let Some(handle) = diags.absorb(act.declare(
            StoreHost::Activity,
            &name,
            TypeRef::new(CORRELATION_HANDLE_TYPE),
            StoreKind::Local,
            marker,
            request_span,
        )) else {
            continue;
        };

        if let Some(op) = act.service_mut(request_id) {
            op.reply = Some(*reply_id);
            op.correlation_store = Some(handle);
        }
        if let Some(op) = act.service_mut(*reply_id) {
            op.request = Some(request_id);
            if op.contract.is_none() {
                op.contract = request.contract.clone();
            }
            if op.operation.is_none() {
                op.operation = request.operation.clone();
            }
        }
        debug!(
            activity = %act.name,
            request = %request.display_name(),
            reply = %reply.display_name(),
            handle = %name,
            "Correlated reply with request"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use weave_dsl::build::build_activity;
    use weave_dsl::code::Expr;
    use weave_dsl::error::CompileErrors;
    use weave_dsl::tree::ParseNode;

    fn resolve(body: ParseNode) -> Result<Activity, CompileErrors> {
        let node = ParseNode::new("activity").with_text("Main").with_member("body", body);
        let mut ids = IdAllocator::new();
        let mut act = build_activity(&mut ids, 0, &node).unwrap();
        let mut diags = Diagnostics::new();
        resolve_activity(&mut act, &mut ids, &mut diags);
        diags.checkpoint().map(|_| act)
    }

    fn find(act: &Activity, tag: StmtTag) -> StmtId {
        act.preorder()
            .into_iter()
            .find(|id| act.stmt(*id).tag == tag)
            .unwrap()
    }

    fn state(name: &str, target: Option<&str>) -> ParseNode {
        let mut node = ParseNode::new("state").with_text(name);
        if let Some(target) = target {
            node = node.with_item(
                ParseNode::new("transition").with_member("target", ParseNode::reference(target)),
            );
        }
        node
    }

    fn final_state(name: &str) -> ParseNode {
        ParseNode::new("final-state").with_text(name)
    }

    #[test]
    fn test_single_non_final_state_is_start() {
        let act = resolve(
            ParseNode::new("statemachine")
                .with_item(state("Open", Some("Done")))
                .with_item(final_state("Done")),
        )
        .unwrap();
        let machine = find(&act, StmtTag::StateMachine);
        let StmtKind::StateMachine {
            states,
            resolved_start,
            ..
        } = act.kind(machine)
        else {
            unreachable!()
        };
        assert_eq!(*resolved_start, Some(states[0]));
    }

    #[test]
    fn test_missing_final_state() {
        let err = resolve(ParseNode::new("statemachine").with_item(state("Open", Some("Open"))))
            .unwrap_err();
        assert!(err.contains_code("W021"));
    }

    #[test]
    fn test_final_start_state() {
        let err = resolve(
            ParseNode::new("statemachine")
                .with_member("start", ParseNode::reference("Done"))
                .with_item(state("Open", Some("Done")))
                .with_item(final_state("Done")),
        )
        .unwrap_err();
        assert!(err.contains_code("W022"));
    }

    #[test]
    fn test_no_start_state() {
        let err = resolve(ParseNode::new("statemachine").with_item(final_state("Done")))
            .unwrap_err();
        assert!(err.contains_code("W023"));
    }

    #[test]
    fn test_unconditioned_transitions_are_ambiguous() {
        let open = state("Open", Some("Done")).with_item(
            ParseNode::new("transition").with_member("target", ParseNode::reference("Open")),
        );
        let err = resolve(
            ParseNode::new("statemachine")
                .with_item(open)
                .with_item(final_state("Done")),
        )
        .unwrap_err();
        assert_eq!(err.len(), 2);
        assert!(err.iter().all(|e| e.kind.code() == "W024"));
    }

    #[test]
    fn test_conditioned_transition_is_not_ambiguous() {
        let open = state("Open", Some("Done")).with_item(
            ParseNode::new("transition")
                .with_member("condition", ParseNode::expression(Expr::boolean(true)))
                .with_member("target", ParseNode::reference("Open")),
        );
        assert!(
            resolve(
                ParseNode::new("statemachine")
                    .with_item(open)
                    .with_item(final_state("Done")),
            )
            .is_ok()
        );
    }

    #[test]
    fn test_unknown_transition_target() {
        let err = resolve(
            ParseNode::new("statemachine")
                .with_item(state("Open", Some("Nowhere")))
                .with_item(final_state("Done")),
        )
        .unwrap_err();
        assert!(err.contains_code("W020"));
    }

    fn step(name: &str, next: Option<&str>) -> ParseNode {
        let mut node = ParseNode::new("flow-step")
            .with_text(name)
            .with_member("action", ParseNode::new("persist"));
        if let Some(next) = next {
            node = node.with_member("next", ParseNode::reference(next));
        }
        node
    }

    #[test]
    fn test_flow_fallthrough_and_jumps() {
        let act = resolve(
            ParseNode::new("flow")
                .with_item(step("a", None))
                .with_item(step("b", Some("a")))
                .with_item(step("c", None)),
        )
        .unwrap();
        let flow = find(&act, StmtTag::Flow);
        let StmtKind::Flow { nodes, start } = act.kind(flow) else {
            unreachable!()
        };
        assert_eq!(*start, Some(nodes[0]));
        let next = |i: usize| match act.kind(nodes[i]) {
            StmtKind::FlowStep { resolved_next, .. } => *resolved_next,
            _ => unreachable!(),
        };
        assert_eq!(next(0), Some(nodes[1]));
        assert_eq!(next(1), Some(nodes[0]));
        assert_eq!(next(2), None);
    }

    #[test]
    fn test_flow_unknown_jump() {
        let err = resolve(ParseNode::new("flow").with_item(step("a", Some("zz")))).unwrap_err();
        assert!(err.contains_code("W020"));
    }

    fn send() -> ParseNode {
        ParseNode::new("send")
            .with_member("contract", ParseNode::type_name("IOrders"))
            .with_member("operation", ParseNode::new("op").with_text("Submit"))
    }

    #[test]
    fn test_send_then_receive_reply_correlates() {
        let act = resolve(
            ParseNode::new("sequence")
                .with_item(send())
                .with_item(ParseNode::new("receive-reply")),
        )
        .unwrap();
        let request = act.service_operations[0];
        let reply = act.service_operations[1];
        let req = act.service(request).unwrap();
        assert_eq!(req.reply, Some(reply));
        let handle = req.correlation_store.unwrap();
        assert_eq!(act.store(handle).ty.as_str(), CORRELATION_HANDLE_TYPE);
        assert!(act.activity_stores.contains(&handle));

        let rep = act.service(reply).unwrap();
        assert_eq!(rep.request, Some(request));
        assert_eq!(rep.operation.as_deref(), Some("Submit"));
    }

    #[test]
    fn test_second_reply_reusing_request_fails() {
        let err = resolve(
            ParseNode::new("sequence")
                .with_item(send())
                .with_item(ParseNode::new("receive-reply"))
                .with_item(ParseNode::new("receive-reply")),
        )
        .unwrap_err();
        assert!(err.contains_code("W031"));
    }

    #[test]
    fn test_reply_without_request() {
        let err = resolve(ParseNode::new("sequence").with_item(ParseNode::new("send-reply")))
            .unwrap_err();
        assert!(err.contains_code("W030"));
    }

    #[test]
    fn test_reply_by_name_skips_other_side() {
        let receive = ParseNode::new("receive")
            .with_text("order")
            .with_member("contract", ParseNode::type_name("IOrders"))
            .with_member("operation", ParseNode::new("op").with_text("Place"));
        let act = resolve(
            ParseNode::new("sequence")
                .with_item(receive)
                .with_item(send())
                .with_item(
                    ParseNode::new("send-reply").with_member("request", ParseNode::new("ref").with_text("order")),
                ),
        )
        .unwrap();
        let reply = act.service(act.service_operations[2]).unwrap();
        assert_eq!(reply.request, Some(act.service_operations[0]));
        assert!(act.service(act.service_operations[1]).unwrap().reply.is_none());
    }
}
