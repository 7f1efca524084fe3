// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Step list built while lowering one fragment run or value expression.
//!
//! Plain statements accumulate until a scheduled node is pushed, at which
//! point they are flushed into a `Code` node. Once a short-circuit operator
//! or conditional needs to skip a range of steps, the list switches to
//! indexed form: a `__step` variable selects which step runs, and skip
//! steps move it forward over the steps of the side not taken.

use weave_dsl::code::{BinaryOp, CodeStmt, Expr, TypeRef};

use crate::graph::{Node, NodeKind, ValueExpr, VariableDecl};

use super::context::LowerContext;

#[derive(Debug, Clone)]
enum Step {
    Node(Node),
    /// Runs `prefix`, then advances past the next `over` steps when
    /// `condition` holds (always, when it is `None`), running `on_skip`.
    Skip {
        prefix: Vec<CodeStmt>,
        condition: Option<Expr>,
        on_skip: Vec<CodeStmt>,
        over: usize,
    },
}

#[derive(Debug, Default)]
pub struct StepList {
    steps: Vec<Step>,
    pending: Vec<CodeStmt>,
    variables: Vec<VariableDecl>,
    index: Option<String>,
}

impl StepList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Committed steps. Pending statements are not counted.
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty() && self.pending.is_empty()
    }

    pub fn push_plain(&mut self, stmt: CodeStmt) {
        self.pending.push(stmt);
    }

    pub fn push_node(&mut self, node: Node) {
        self.flush();
        self.steps.push(Step::Node(node));
    }

    /// Commit pending statements as one `Code` step.
    pub fn flush(&mut self) {
        if !self.pending.is_empty() {
            let body = std::mem::take(&mut self.pending);
            self.steps.push(Step::Node(Node::code(body)));
        }
    }

    /// Push a skip step with `over` still unknown. Returns its position.
    pub fn push_skip(
        &mut self,
        prefix: Vec<CodeStmt>,
        condition: Option<Expr>,
        on_skip: Vec<CodeStmt>,
    ) -> usize {
        self.flush();
        self.steps.push(Step::Skip {
            prefix,
            condition,
            on_skip,
            over: 0,
        });
        self.steps.len() - 1
    }

    pub fn patch_skip(&mut self, at: usize, distance: usize) {
        if let Some(Step::Skip { over, .. }) = self.steps.get_mut(at) {
            *over = distance;
        }
    }

    pub fn declare(&mut self, variable: VariableDecl) {
        self.variables.push(variable);
    }

    /// Allocate the step-index variable on first use.
    pub fn ensure_index(&mut self, ctx: &mut LowerContext<'_>) {
        if self.index.is_none() {
            let name = ctx.temp_var("step");
            self.variables
                .insert(0, VariableDecl::new(name.clone(), TypeRef::int()).with_default(Expr::int(0)));
            self.index = Some(name);
        }
    }

    /// Variables and nodes, for wrapping together with a consumer node.
    pub fn into_parts(mut self) -> (Vec<VariableDecl>, Vec<Node>) {
        self.flush();
        let nodes = match self.index.take() {
            None => self
                .steps
                .into_iter()
                .filter_map(|step| match step {
                    Step::Node(node) => Some(node),
                    Step::Skip { .. } => None,
                })
                .collect(),
            Some(index) => self
                .steps
                .into_iter()
                .enumerate()
                .map(|(i, step)| indexed(&index, i, step))
                .collect(),
        };
        (self.variables, nodes)
    }

    /// The lowered form: nothing, a single node, or a generated sequence.
    pub fn finish(self) -> Option<Node> {
        let (variables, mut nodes) = self.into_parts();
        match (variables.is_empty(), nodes.len()) {
            (true, 0) => None,
            (true, 1) => nodes.pop(),
            _ => Some(Node::sequence(variables, nodes)),
        }
    }
}

fn read(index: &str) -> Expr {
    Expr::store_get(Expr::name(index))
}

/// `__step.Set(__ctx, __step.Get(__ctx) + by)`
fn advance(index: &str, by: usize) -> CodeStmt {
    CodeStmt::expr(Expr::store_set(
        Expr::name(index),
        Expr::binary(BinaryOp::Add, read(index), Expr::int(by as i64)),
    ))
}

fn guard(index: &str, position: usize) -> Expr {
    Expr::binary(BinaryOp::Eq, read(index), Expr::int(position as i64))
}

fn indexed(index: &str, position: usize, step: Step) -> Node {
    match step {
        Step::Node(Node {
            kind: NodeKind::Code { mut body },
            ..
        }) => {
            body.push(advance(index, 1));
            Node::code(vec![CodeStmt::If {
                condition: guard(index, position),
                then: Box::new(CodeStmt::Block { body }),
                otherwise: None,
            }])
        }
        Step::Node(node) => Node::new(NodeKind::If {
            condition: ValueExpr::new(Some(TypeRef::boolean()), guard(index, position)),
            then: Some(Box::new(Node::sequence(
                Vec::new(),
                vec![node, Node::code(vec![advance(index, 1)])],
            ))),
            otherwise: None,
        }),
        Step::Skip {
            mut prefix,
            condition,
            mut on_skip,
            over,
        } => {
            on_skip.push(advance(index, over + 1));
            match condition {
                Some(condition) => prefix.push(CodeStmt::If {
                    condition,
                    then: Box::new(CodeStmt::Block { body: on_skip }),
                    otherwise: Some(Box::new(advance(index, 1))),
                }),
                None => prefix.extend(on_skip),
            }
            Node::code(vec![CodeStmt::If {
                condition: guard(index, position),
                then: Box::new(CodeStmt::Block { body: prefix }),
                otherwise: None,
            }])
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oracle::SemanticIndex;
    use weave_dsl::ast::Activity;
    use weave_dsl::span::SourceSpan;

    fn invoke(name: &str) -> Node {
        Node::new(NodeKind::Invoke {
            node_type: name.to_string(),
            arguments: vec![],
            result: None,
        })
    }

    #[test]
    fn test_plain_statements_become_one_code_node() {
        let mut steps = StepList::new();
        assert!(steps.is_empty());
        steps.push_plain(CodeStmt::expr(Expr::int(1)));
        steps.push_plain(CodeStmt::expr(Expr::int(2)));
        assert!(!steps.is_empty());
        assert_eq!(steps.len(), 0);
        let node = steps.finish().unwrap();
        assert!(matches!(&node.kind, NodeKind::Code { body } if body.len() == 2));
    }

    #[test]
    fn test_single_node_is_returned_alone() {
        let mut steps = StepList::new();
        steps.push_node(invoke("A"));
        let node = steps.finish().unwrap();
        assert!(matches!(node.kind, NodeKind::Invoke { .. }));
        assert!(StepList::new().finish().is_none());
    }

    #[test]
    fn test_pending_flushed_before_node() {
        let mut steps = StepList::new();
        steps.push_plain(CodeStmt::expr(Expr::int(1)));
        steps.push_node(invoke("A"));
        steps.push_plain(CodeStmt::expr(Expr::int(2)));
        let NodeKind::Sequence { activities, .. } = steps.finish().unwrap().kind else {
            panic!("expected a sequence");
        };
        assert_eq!(activities.len(), 3);
        assert!(matches!(activities[1].kind, NodeKind::Invoke { .. }));
    }

    #[test]
    fn test_indexed_form_guards_every_step() {
        let act = Activity::new("Main", SourceSpan::default());
        let index = SemanticIndex::default();
        let mut ctx = LowerContext::new(&act, &index, 8);

        let mut steps = StepList::new();
        steps.ensure_index(&mut ctx);
        let skip = steps.push_skip(vec![], Some(Expr::boolean(true)), vec![]);
        steps.push_node(invoke("A"));
        steps.flush();
        steps.patch_skip(skip, steps.len() - skip - 1);

        let NodeKind::Sequence {
            variables,
            activities,
        } = steps.finish().unwrap().kind
        else {
            panic!("expected a sequence");
        };
        assert_eq!(variables[0].name, "__step1");
        assert_eq!(variables[0].default, Some(Expr::int(0)));
        assert_eq!(activities.len(), 2);
        let NodeKind::Code { body } = &activities[0].kind else {
            panic!("skip step should be code");
        };
        let text = weave_dsl::code::render_body(body);
        assert!(text.contains("__step1.Set(__ctx, __step1.Get(__ctx) + 2)"), "{}", text);
        assert!(matches!(activities[1].kind, NodeKind::If { .. }));
    }
}
