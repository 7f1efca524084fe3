// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Minimal executor for lowered node graphs.
//!
//! Covers the node and expression shapes the rewriter produces for code
//! fragments: sequences, guarded steps, invokes and store accessors.
//! Scheduled calls are answered by a callback and recorded in a trace.

use std::collections::HashMap;
use weave_dsl::code::{BinaryOp, CodeStmt, Expr, ExprKind, Literal, UnaryOp};
use weave_workflows::graph::ArgumentValue;
use weave_workflows::{Node, NodeKind};

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
}

impl Value {
    pub fn as_bool(&self) -> bool {
        match self {
            Value::Bool(b) => *b,
            other => panic!("expected bool, got {:?}", other),
        }
    }

    pub fn as_int(&self) -> i64 {
        match self {
            Value::Int(i) => *i,
            other => panic!("expected int, got {:?}", other),
        }
    }
}

/// A scheduled call as observed by the interpreter.
#[derive(Debug, Clone, PartialEq)]
pub struct Scheduled {
    pub node_type: String,
    pub arguments: Vec<Value>,
}

pub struct Interpreter<F> {
    pub vars: HashMap<String, Value>,
    pub trace: Vec<Scheduled>,
    schedule: F,
}

impl<F: FnMut(&str, &[Value]) -> Value> Interpreter<F> {
    pub fn new(schedule: F) -> Self {
        Self {
            vars: HashMap::new(),
            trace: Vec::new(),
            schedule,
        }
    }

    pub fn run(&mut self, node: &Node) {
        match &node.kind {
            NodeKind::Sequence {
                variables,
                activities,
            } => {
                for var in variables {
                    match &var.default {
                        Some(default) => {
                            let value = self.eval(default);
                            self.vars.insert(var.name.clone(), value);
                        }
                        None => {
                            self.vars.entry(var.name.clone()).or_insert(Value::Null);
                        }
                    }
                }
                for activity in activities {
                    self.run(activity);
                }
            }
            NodeKind::Code { body } => {
                for stmt in body {
                    self.exec(stmt);
                }
            }
            NodeKind::If {
                condition,
                then,
                otherwise,
            } => {
                let branch = if self.eval(&condition.expr).as_bool() {
                    then
                } else {
                    otherwise
                };
                if let Some(branch) = branch {
                    self.run(branch);
                }
            }
            NodeKind::Invoke {
                node_type,
                arguments,
                result,
            } => {
                let values: Vec<Value> = arguments
                    .iter()
                    .map(|arg| match &arg.value {
                        ArgumentValue::Value(value) => self.eval(&value.expr),
                        ArgumentValue::Location(location) => {
                            self.var(location.name().expect("location name"))
                        }
                    })
                    .collect();
                let value = (self.schedule)(node_type.as_str(), &values);
                self.trace.push(Scheduled {
                    node_type: node_type.clone(),
                    arguments: values,
                });
                if let Some(location) = result {
                    let name = location.name().expect("location name").to_string();
                    self.vars.insert(name, value);
                }
            }
            other => panic!("unsupported node: {:?}", other),
        }
    }

    fn var(&self, name: &str) -> Value {
        self.vars
            .get(name)
            .cloned()
            .unwrap_or_else(|| panic!("unbound variable {}", name))
    }

    fn exec(&mut self, stmt: &CodeStmt) {
        match stmt {
            CodeStmt::Expr { expr } => {
                self.eval(expr);
            }
            CodeStmt::Local { name, init, .. } => {
                let value = init.as_ref().map_or(Value::Null, |e| self.eval(e));
                self.vars.insert(name.clone(), value);
            }
            CodeStmt::Block { body } => {
                for stmt in body {
                    self.exec(stmt);
                }
            }
            CodeStmt::If {
                condition,
                then,
                otherwise,
            } => {
                if self.eval(condition).as_bool() {
                    self.exec(then);
                } else if let Some(otherwise) = otherwise {
                    self.exec(otherwise);
                }
            }
            CodeStmt::While { condition, body } => {
                while self.eval(condition).as_bool() {
                    self.exec(body);
                }
            }
        }
    }

    fn eval(&mut self, expr: &Expr) -> Value {
        match &expr.kind {
            ExprKind::Literal { value } => match value {
                Literal::Null => Value::Null,
                Literal::Bool(b) => Value::Bool(*b),
                Literal::Int(i) => Value::Int(*i),
                other => panic!("unsupported literal {:?}", other),
            },
            ExprKind::Name { name } => self.var(name),
            ExprKind::Call { callee, args } => {
                let ExprKind::Member { target, name } = &callee.kind else {
                    panic!("unsupported call {}", expr);
                };
                let handle = target.as_name().expect("store handle").to_string();
                match name.as_str() {
                    "Get" => self.var(&handle),
                    "Set" => {
                        let value = self.eval(&args[1].value);
                        self.vars.insert(handle, value.clone());
                        value
                    }
                    _ => panic!("unsupported call {}", expr),
                }
            }
            ExprKind::Unary { op, operand } => {
                let value = self.eval(operand);
                match op {
                    UnaryOp::Not => Value::Bool(!value.as_bool()),
                    UnaryOp::Neg => Value::Int(-value.as_int()),
                    _ => panic!("unsupported unary {}", expr),
                }
            }
            ExprKind::Binary { op, lhs, rhs } => match op {
                BinaryOp::AndAlso => {
                    Value::Bool(self.eval(lhs).as_bool() && self.eval(rhs).as_bool())
                }
                BinaryOp::OrElse => {
                    Value::Bool(self.eval(lhs).as_bool() || self.eval(rhs).as_bool())
                }
                BinaryOp::Coalesce => match self.eval(lhs) {
                    Value::Null => self.eval(rhs),
                    value => value,
                },
                _ => {
                    let l = self.eval(lhs);
                    let r = self.eval(rhs);
                    match op {
                        BinaryOp::Add => Value::Int(l.as_int() + r.as_int()),
                        BinaryOp::Sub => Value::Int(l.as_int() - r.as_int()),
                        BinaryOp::Eq => Value::Bool(l == r),
                        BinaryOp::Ne => Value::Bool(l != r),
                        BinaryOp::Lt => Value::Bool(l.as_int() < r.as_int()),
                        BinaryOp::Le => Value::Bool(l.as_int() <= r.as_int()),
                        BinaryOp::Gt => Value::Bool(l.as_int() > r.as_int()),
                        BinaryOp::Ge => Value::Bool(l.as_int() >= r.as_int()),
                        _ => panic!("unsupported binary {}", expr),
                    }
                }
            },
            ExprKind::Conditional {
                condition,
                then,
                otherwise,
            } => {
                if self.eval(condition).as_bool() {
                    self.eval(then)
                } else {
                    self.eval(otherwise)
                }
            }
            ExprKind::Cast { operand, .. } => self.eval(operand),
            ExprKind::Block { body, value } => {
                for stmt in body {
                    self.exec(stmt);
                }
                value.as_ref().map_or(Value::Null, |v| self.eval(v))
            }
            _ => panic!("unsupported expression {}", expr),
        }
    }
}
