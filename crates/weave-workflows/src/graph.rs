// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Runtime node graph.
//!
//! This is what the impl pass hands to the external serializer: one
//! [`NodeGraph`] per activity, made of scheduling nodes whose value slots
//! hold rewritten expressions evaluated against the activity context
//! (`__ctx`), and whose location slots name variables or arguments.

use serde::{Deserialize, Serialize};
use weave_dsl::code::{CodeStmt, Direction, Expr, TypeRef};

/// A lowered activity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeGraph {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    pub arguments: Vec<ArgumentDecl>,
    pub body: Node,
}

/// An activity argument.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArgumentDecl {
    pub name: String,
    pub ty: TypeRef,
    pub direction: Direction,
}

/// A node-local variable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariableDecl {
    pub name: String,
    pub ty: TypeRef,
    /// Initial value, evaluated each time the hosting node starts.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Expr>,
}

impl VariableDecl {
    pub fn new(name: impl Into<String>, ty: TypeRef) -> Self {
        Self {
            name: name.into(),
            ty,
            default: None,
        }
    }

    pub fn with_default(mut self, default: Expr) -> Self {
        self.default = Some(default);
        self
    }
}

/// An expression evaluated by the engine to produce a value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValueExpr {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ty: Option<TypeRef>,
    pub expr: Expr,
}

impl ValueExpr {
    pub fn new(ty: Option<TypeRef>, expr: Expr) -> Self {
        Self { ty, expr }
    }
}

/// A writable location: a variable or argument handle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Location {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ty: Option<TypeRef>,
    pub handle: Expr,
}

impl Location {
    pub fn new(ty: Option<TypeRef>, handle: Expr) -> Self {
        Self { ty, handle }
    }

    /// Name of the handle, when it is a plain identifier.
    pub fn name(&self) -> Option<&str> {
        self.handle.as_name()
    }
}

/// Value bound to an `Invoke` argument.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "binding", rename_all = "camelCase")]
pub enum ArgumentValue {
    Value(ValueExpr),
    Location(Location),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeArgument {
    pub name: String,
    pub direction: Direction,
    pub value: ArgumentValue,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SwitchCaseNode {
    pub key: ValueExpr,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<Node>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CatchNode {
    pub exception_type: TypeRef,
    /// Delegate argument exposing the caught exception.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub argument: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<Node>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PickBranchNode {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub variables: Vec<VariableDecl>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trigger: Option<Node>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<Node>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransitionNode {
    /// Index into the state's `triggers`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trigger: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<ValueExpr>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<Node>,
    /// Index of the target state.
    pub to: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StateNode {
    pub name: String,
    pub is_final: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entry: Option<Node>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit: Option<Node>,
    /// Trigger nodes shared by the transitions that reference them.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub triggers: Vec<Node>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub transitions: Vec<TransitionNode>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowSwitchCase {
    pub key: ValueExpr,
    pub target: usize,
}

/// A flowchart node. Targets are indices into the flowchart's node list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "flowNode", rename_all = "camelCase")]
pub enum FlowNode {
    Step {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        name: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        action: Option<Node>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        next: Option<usize>,
    },
    Decision {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        name: Option<String>,
        condition: ValueExpr,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        on_true: Option<usize>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        on_false: Option<usize>,
    },
    Switch {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        name: Option<String>,
        value: ValueExpr,
        cases: Vec<FlowSwitchCase>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        default: Option<usize>,
    },
}

/// Message payload of a messaging node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "content", rename_all = "camelCase")]
pub enum MessageContent {
    Message { value: ArgumentValue },
    Parameters { parameters: Vec<(String, ArgumentValue)> },
}

/// Shared shape of the four messaging nodes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessagingNode {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contract: Option<TypeRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operation: Option<String>,
    /// For replies: id of the request node.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<MessageContent>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlates_with: Option<ValueExpr>,
    /// Handles initialized when the request completes.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub correlation_initializers: Vec<Location>,
    #[serde(default)]
    pub can_create_instance: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<ValueExpr>,
}

/// A scheduling node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Node {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    pub kind: NodeKind,
}

type Child = Option<Box<Node>>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "node", rename_all = "camelCase")]
pub enum NodeKind {
    Sequence {
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        variables: Vec<VariableDecl>,
        activities: Vec<Node>,
    },
    If {
        condition: ValueExpr,
        then: Child,
        otherwise: Child,
    },
    While {
        condition: ValueExpr,
        body: Child,
        do_while: bool,
    },
    Switch {
        value: ValueExpr,
        cases: Vec<SwitchCaseNode>,
        default: Child,
    },
    Throw {
        exception: ValueExpr,
    },
    Rethrow,
    TryCatch {
        body: Child,
        catches: Vec<CatchNode>,
        finally: Child,
    },
    ForEach {
        item_type: TypeRef,
        item_argument: String,
        values: ValueExpr,
        body: Child,
        parallel: bool,
        completion: Option<ValueExpr>,
    },
    Delay {
        duration: ValueExpr,
    },
    Parallel {
        branches: Vec<Node>,
        completion: Option<ValueExpr>,
    },
    Pick {
        branches: Vec<PickBranchNode>,
    },
    StateMachine {
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        variables: Vec<VariableDecl>,
        states: Vec<StateNode>,
        initial_state: usize,
    },
    Flowchart {
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        variables: Vec<VariableDecl>,
        nodes: Vec<FlowNode>,
        start: Option<usize>,
    },
    TransactionScope {
        body: Child,
        timeout: Option<ValueExpr>,
    },
    CancellationScope {
        body: Child,
        handler: Child,
    },
    Compensable {
        token: Option<Location>,
        body: Child,
        compensation: Child,
        confirmation: Child,
        cancellation: Child,
    },
    Confirm {
        target: Option<ValueExpr>,
    },
    Compensate {
        target: Option<ValueExpr>,
    },
    Persist,
    NoPersistScope {
        body: Child,
    },
    Terminate {
        reason: Option<ValueExpr>,
        exception: Option<ValueExpr>,
    },
    Receive(MessagingNode),
    Send(MessagingNode),
    SendReply(MessagingNode),
    ReceiveReply(MessagingNode),
    InitializeCorrelation {
        handle: ValueExpr,
        data: Vec<(String, ValueExpr)>,
    },
    TransactedReceiveScope {
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        variables: Vec<VariableDecl>,
        request: Box<Node>,
        body: Child,
    },
    /// Schedules a child activity.
    Invoke {
        node_type: String,
        arguments: Vec<NodeArgument>,
        result: Option<Location>,
    },
    /// Runs plain code against the activity context.
    Code {
        body: Vec<CodeStmt>,
    },
}

impl Node {
    pub fn new(kind: NodeKind) -> Self {
        Self {
            display_name: None,
            kind,
        }
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.display_name = Some(name.into());
        self
    }

    pub fn sequence(variables: Vec<VariableDecl>, activities: Vec<Node>) -> Self {
        Self::new(NodeKind::Sequence {
            variables,
            activities,
        })
    }

    pub fn code(body: Vec<CodeStmt>) -> Self {
        Self::new(NodeKind::Code { body })
    }

    /// Direct children, in slot order.
    pub fn children(&self) -> Vec<&Node> {
        fn push<'a>(out: &mut Vec<&'a Node>, child: &'a Child) {
            if let Some(child) = child {
                out.push(child);
            }
        }
        let mut out = Vec::new();
        match &self.kind {
            NodeKind::Sequence { activities, .. } => out.extend(activities),
            NodeKind::If {
                then, otherwise, ..
            } => {
                push(&mut out, then);
                push(&mut out, otherwise);
            }
            NodeKind::While { body, .. }
            | NodeKind::ForEach { body, .. }
            | NodeKind::NoPersistScope { body }
            | NodeKind::TransactionScope { body, .. } => push(&mut out, body),
            NodeKind::Switch { cases, default, .. } => {
                out.extend(cases.iter().filter_map(|c| c.body.as_ref()));
                push(&mut out, default);
            }
            NodeKind::TryCatch {
                body,
                catches,
                finally,
            } => {
                push(&mut out, body);
                out.extend(catches.iter().filter_map(|c| c.body.as_ref()));
                push(&mut out, finally);
            }
            NodeKind::Parallel { branches, .. } => out.extend(branches),
            NodeKind::Pick { branches } => {
                for branch in branches {
                    out.extend(branch.trigger.as_ref());
                    out.extend(branch.action.as_ref());
                }
            }
            NodeKind::StateMachine { states, .. } => {
                for state in states {
                    out.extend(state.entry.as_ref());
                    out.extend(state.exit.as_ref());
                    out.extend(&state.triggers);
                    out.extend(state.transitions.iter().filter_map(|t| t.action.as_ref()));
                }
            }
            NodeKind::Flowchart { nodes, .. } => {
                for node in nodes {
                    if let FlowNode::Step {
                        action: Some(action),
                        ..
                    } = node
                    {
                        out.push(action);
                    }
                }
            }
            NodeKind::CancellationScope { body, handler } => {
                push(&mut out, body);
                push(&mut out, handler);
            }
            NodeKind::Compensable {
                body,
                compensation,
                confirmation,
                cancellation,
                ..
            } => {
                push(&mut out, body);
                push(&mut out, compensation);
                push(&mut out, confirmation);
                push(&mut out, cancellation);
            }
            NodeKind::TransactedReceiveScope { request, body, .. } => {
                out.push(request);
                push(&mut out, body);
            }
            NodeKind::Throw { .. }
            | NodeKind::Rethrow
            | NodeKind::Delay { .. }
            | NodeKind::Confirm { .. }
            | NodeKind::Compensate { .. }
            | NodeKind::Persist
            | NodeKind::Terminate { .. }
            | NodeKind::Receive(_)
            | NodeKind::Send(_)
            | NodeKind::SendReply(_)
            | NodeKind::ReceiveReply(_)
            | NodeKind::InitializeCorrelation { .. }
            | NodeKind::Invoke { .. }
            | NodeKind::Code { .. } => {}
        }
        out
    }

    /// Pre-order visit of this node and its descendants.
    pub fn walk<'a>(&'a self, f: &mut dyn FnMut(&'a Node)) {
        f(self);
        for child in self.children() {
            child.walk(f);
        }
    }

    /// Node types of every `Invoke` below this node, in pre-order.
    pub fn invoked_types(&self) -> Vec<&str> {
        let mut out = Vec::new();
        self.walk(&mut |n| {
            if let NodeKind::Invoke { node_type, .. } = &n.kind {
                out.push(node_type.as_str());
            }
        });
        out
    }
}

/// Kind of a global support declaration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SupportKind {
    Attribute,
    Extensions,
}

/// A global declaration emitted once, with unit 0.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SupportDecl {
    pub name: String,
    pub kind: SupportKind,
    pub members: Vec<String>,
}

/// Support declarations every lowered program relies on.
pub fn support_declarations() -> Vec<SupportDecl> {
    vec![
        SupportDecl {
            name: "ScheduledAttribute".to_string(),
            kind: SupportKind::Attribute,
            members: vec![
                "string NodeType".to_string(),
                "string[] Directions".to_string(),
                "string Result".to_string(),
            ],
        },
        SupportDecl {
            name: "LocationAccessors".to_string(),
            kind: SupportKind::Extensions,
            members: vec![
                "T Get<T>(this Location<T> location, ActivityContext context)".to_string(),
                "T Set<T>(this Location<T> location, ActivityContext context, T value)".to_string(),
            ],
        },
    ]
}
