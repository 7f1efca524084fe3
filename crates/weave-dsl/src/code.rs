// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Embedded fragment language.
//!
//! W embeds ordinary imperative expressions and statements inside its
//! workflow constructs. The external parser hands them over already parsed
//! into the trees defined here; the compiler never looks at fragment text.
//!
//! The same trees are used for the rewritten, executable form produced by
//! the impl pass: store reads become `handle.Get(__ctx)` calls, writes become
//! `handle.Set(__ctx, value)` calls, and so on. `Display` renders a compact
//! C#-like form used in logs and tests.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};

use crate::span::SourceSpan;

/// Name of the activity-context parameter every generated expression closes over.
pub const CONTEXT_IDENT: &str = "__ctx";

/// Accessor used for store reads.
pub const GET_ACCESSOR: &str = "Get";

/// Accessor used for store writes. Returns the stored value.
pub const SET_ACCESSOR: &str = "Set";

// ============================================================================
// Identifiers and types
// ============================================================================

/// Compilation-wide identity of an expression node.
///
/// Assigned during statement construction; the semantic oracle keys its
/// per-node annotations (symbols, static types) by this id.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, JsonSchema,
)]
#[serde(transparent)]
pub struct ExprId(pub u32);

impl std::fmt::Display for ExprId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A type as written in source or reported by the oracle.
///
/// Types are opaque to the compiler: it only compares them and passes them
/// through. The special name `var` requests inference by the oracle.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct TypeRef(pub String);

impl TypeRef {
    /// Placeholder for an inferred type.
    pub const VAR: &'static str = "var";

    /// Create a type reference from its name.
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// The inferred-type placeholder.
    pub fn inferred() -> Self {
        Self(Self::VAR.to_string())
    }

    pub fn boolean() -> Self {
        Self::new("bool")
    }

    pub fn int() -> Self {
        Self::new("int")
    }

    pub fn string() -> Self {
        Self::new("string")
    }

    pub fn object() -> Self {
        Self::new("object")
    }

    /// Returns true when the type must be inferred.
    pub fn is_inferred(&self) -> bool {
        self.0 == Self::VAR
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for TypeRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Data flow direction of a parameter, argument or store.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Default,
    Serialize,
    Deserialize,
    JsonSchema,
    Display,
    EnumString,
    AsRefStr,
)]
#[serde(rename_all = "camelCase")]
#[strum(serialize_all = "lowercase")]
pub enum Direction {
    #[default]
    In,
    Out,
    Ref,
}

// ============================================================================
// Operators
// ============================================================================

/// Prefix and postfix operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema, AsRefStr)]
#[serde(rename_all = "camelCase")]
pub enum UnaryOp {
    Not,
    Neg,
    PreIncrement,
    PreDecrement,
    PostIncrement,
    PostDecrement,
}

impl UnaryOp {
    /// Returns true for `++`/`--` in either position.
    pub fn is_step(&self) -> bool {
        !matches!(self, UnaryOp::Not | UnaryOp::Neg)
    }

    /// Returns true for `x++` / `x--`.
    pub fn is_postfix(&self) -> bool {
        matches!(self, UnaryOp::PostIncrement | UnaryOp::PostDecrement)
    }

    /// The arithmetic operator a `++`/`--` applies.
    pub fn step_op(&self) -> Option<BinaryOp> {
        match self {
            UnaryOp::PreIncrement | UnaryOp::PostIncrement => Some(BinaryOp::Add),
            UnaryOp::PreDecrement | UnaryOp::PostDecrement => Some(BinaryOp::Sub),
            UnaryOp::Not | UnaryOp::Neg => None,
        }
    }

    fn symbol(&self) -> &'static str {
        match self {
            UnaryOp::Not => "!",
            UnaryOp::Neg => "-",
            UnaryOp::PreIncrement | UnaryOp::PostIncrement => "++",
            UnaryOp::PreDecrement | UnaryOp::PostDecrement => "--",
        }
    }
}

/// Binary operators, including the short-circuiting ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema, Display)]
#[serde(rename_all = "camelCase")]
pub enum BinaryOp {
    #[strum(serialize = "+")]
    Add,
    #[strum(serialize = "-")]
    Sub,
    #[strum(serialize = "*")]
    Mul,
    #[strum(serialize = "/")]
    Div,
    #[strum(serialize = "%")]
    Rem,
    #[strum(serialize = "==")]
    Eq,
    #[strum(serialize = "!=")]
    Ne,
    #[strum(serialize = "<")]
    Lt,
    #[strum(serialize = "<=")]
    Le,
    #[strum(serialize = ">")]
    Gt,
    #[strum(serialize = ">=")]
    Ge,
    #[strum(serialize = "&")]
    BitAnd,
    #[strum(serialize = "|")]
    BitOr,
    #[strum(serialize = "&&")]
    AndAlso,
    #[strum(serialize = "||")]
    OrElse,
    #[strum(serialize = "??")]
    Coalesce,
}

impl BinaryOp {
    /// Operators whose right operand is evaluated conditionally.
    pub fn is_short_circuit(&self) -> bool {
        matches!(self, BinaryOp::AndAlso | BinaryOp::OrElse | BinaryOp::Coalesce)
    }

    /// Operators producing `bool` regardless of operand types.
    pub fn is_boolean(&self) -> bool {
        matches!(
            self,
            BinaryOp::Eq
                | BinaryOp::Ne
                | BinaryOp::Lt
                | BinaryOp::Le
                | BinaryOp::Gt
                | BinaryOp::Ge
                | BinaryOp::AndAlso
                | BinaryOp::OrElse
        )
    }
}

/// Simple and compound assignment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema, Display)]
#[serde(rename_all = "camelCase")]
pub enum AssignOp {
    #[strum(serialize = "=")]
    Assign,
    #[strum(serialize = "+=")]
    Add,
    #[strum(serialize = "-=")]
    Sub,
    #[strum(serialize = "*=")]
    Mul,
    #[strum(serialize = "/=")]
    Div,
    #[strum(serialize = "%=")]
    Rem,
}

impl AssignOp {
    /// The arithmetic operator of a compound assignment.
    pub fn binary(&self) -> Option<BinaryOp> {
        match self {
            AssignOp::Assign => None,
            AssignOp::Add => Some(BinaryOp::Add),
            AssignOp::Sub => Some(BinaryOp::Sub),
            AssignOp::Mul => Some(BinaryOp::Mul),
            AssignOp::Div => Some(BinaryOp::Div),
            AssignOp::Rem => Some(BinaryOp::Rem),
        }
    }
}

// ============================================================================
// Expressions
// ============================================================================

/// Literal constants.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "type", content = "value", rename_all = "camelCase")]
pub enum Literal {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
}

/// A call or constructor argument.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Argument {
    /// `In` for plain arguments, `Ref`/`Out` for `ref`/`out` arguments.
    #[serde(default)]
    pub direction: Direction,
    pub value: Expr,
}

impl Argument {
    pub fn value(value: Expr) -> Self {
        Self {
            direction: Direction::In,
            value,
        }
    }

    pub fn by_ref(value: Expr) -> Self {
        Self {
            direction: Direction::Ref,
            value,
        }
    }

    pub fn out(value: Expr) -> Self {
        Self {
            direction: Direction::Out,
            value,
        }
    }
}

/// An expression node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Expr {
    /// Assigned during construction. Synthesized nodes carry none.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<ExprId>,
    #[serde(default, skip_serializing_if = "SourceSpan::is_unknown")]
    pub span: SourceSpan,
    pub kind: ExprKind,
}

/// The shape of an expression node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "expr", rename_all = "camelCase")]
pub enum ExprKind {
    Literal {
        value: Literal,
    },
    Name {
        name: String,
    },
    Member {
        target: Box<Expr>,
        name: String,
    },
    Call {
        callee: Box<Expr>,
        #[serde(default)]
        args: Vec<Argument>,
    },
    New {
        ty: TypeRef,
        #[serde(default)]
        args: Vec<Argument>,
    },
    Unary {
        op: UnaryOp,
        operand: Box<Expr>,
    },
    Binary {
        op: BinaryOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    Conditional {
        condition: Box<Expr>,
        then: Box<Expr>,
        otherwise: Box<Expr>,
    },
    Assign {
        op: AssignOp,
        target: Box<Expr>,
        value: Box<Expr>,
    },
    Lambda {
        #[serde(default)]
        params: Vec<String>,
        body: Box<Expr>,
    },
    Cast {
        ty: TypeRef,
        operand: Box<Expr>,
    },
    Index {
        target: Box<Expr>,
        index: Box<Expr>,
    },
    /// Immediately evaluated block: runs `body`, then yields `value`.
    Block {
        body: Vec<CodeStmt>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        value: Option<Box<Expr>>,
    },
}

impl Expr {
    pub fn new(kind: ExprKind) -> Self {
        Self {
            id: None,
            span: SourceSpan::default(),
            kind,
        }
    }

    pub fn with_span(mut self, span: SourceSpan) -> Self {
        self.span = span;
        self
    }

    pub fn literal(value: Literal) -> Self {
        Self::new(ExprKind::Literal { value })
    }

    pub fn int(value: i64) -> Self {
        Self::literal(Literal::Int(value))
    }

    pub fn boolean(value: bool) -> Self {
        Self::literal(Literal::Bool(value))
    }

    pub fn null() -> Self {
        Self::literal(Literal::Null)
    }

    pub fn string(value: impl Into<String>) -> Self {
        Self::literal(Literal::Str(value.into()))
    }

    pub fn name(name: impl Into<String>) -> Self {
        Self::new(ExprKind::Name { name: name.into() })
    }

    pub fn member(target: Expr, name: impl Into<String>) -> Self {
        Self::new(ExprKind::Member {
            target: Box::new(target),
            name: name.into(),
        })
    }

    pub fn call(callee: Expr, args: Vec<Argument>) -> Self {
        Self::new(ExprKind::Call {
            callee: Box::new(callee),
            args,
        })
    }

    /// `target.name(args...)` with plain arguments.
    pub fn method_call(target: Expr, name: impl Into<String>, args: Vec<Expr>) -> Self {
        Self::call(
            Self::member(target, name),
            args.into_iter().map(Argument::value).collect(),
        )
    }

    /// `Type.Invoke(args...)`, the call form of a workflow node.
    pub fn invoke(type_name: impl Into<String>, args: Vec<Argument>) -> Self {
        Self::call(Self::member(Self::name(type_name), "Invoke"), args)
    }

    pub fn unary(op: UnaryOp, operand: Expr) -> Self {
        Self::new(ExprKind::Unary {
            op,
            operand: Box::new(operand),
        })
    }

    pub fn not(operand: Expr) -> Self {
        Self::unary(UnaryOp::Not, operand)
    }

    pub fn binary(op: BinaryOp, lhs: Expr, rhs: Expr) -> Self {
        Self::new(ExprKind::Binary {
            op,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
        })
    }

    pub fn conditional(condition: Expr, then: Expr, otherwise: Expr) -> Self {
        Self::new(ExprKind::Conditional {
            condition: Box::new(condition),
            then: Box::new(then),
            otherwise: Box::new(otherwise),
        })
    }

    pub fn assign(target: Expr, value: Expr) -> Self {
        Self::compound_assign(AssignOp::Assign, target, value)
    }

    pub fn compound_assign(op: AssignOp, target: Expr, value: Expr) -> Self {
        Self::new(ExprKind::Assign {
            op,
            target: Box::new(target),
            value: Box::new(value),
        })
    }

    pub fn lambda(params: Vec<String>, body: Expr) -> Self {
        Self::new(ExprKind::Lambda {
            params,
            body: Box::new(body),
        })
    }

    pub fn cast(ty: TypeRef, operand: Expr) -> Self {
        Self::new(ExprKind::Cast {
            ty,
            operand: Box::new(operand),
        })
    }

    pub fn block(body: Vec<CodeStmt>, value: Option<Expr>) -> Self {
        Self::new(ExprKind::Block {
            body,
            value: value.map(Box::new),
        })
    }

    /// `handle.Get(__ctx)`
    pub fn store_get(handle: Expr) -> Self {
        Self::method_call(handle, GET_ACCESSOR, vec![Self::name(CONTEXT_IDENT)])
    }

    /// `handle.Set(__ctx, value)`
    pub fn store_set(handle: Expr, value: Expr) -> Self {
        Self::method_call(handle, SET_ACCESSOR, vec![Self::name(CONTEXT_IDENT), value])
    }

    /// The identifier if this is a bare name.
    pub fn as_name(&self) -> Option<&str> {
        match &self.kind {
            ExprKind::Name { name } => Some(name),
            _ => None,
        }
    }

    /// Visit this node and every node below it, including expressions inside
    /// block statements and lambda bodies, in pre-order.
    pub fn walk<'a>(&'a self, f: &mut dyn FnMut(&'a Expr)) {
        f(self);
        match &self.kind {
            ExprKind::Literal { .. } | ExprKind::Name { .. } => {}
            ExprKind::Member { target, .. } => target.walk(f),
            ExprKind::Call { callee, args } => {
                callee.walk(f);
                for arg in args {
                    arg.value.walk(f);
                }
            }
            ExprKind::New { args, .. } => {
                for arg in args {
                    arg.value.walk(f);
                }
            }
            ExprKind::Unary { operand, .. } | ExprKind::Cast { operand, .. } => operand.walk(f),
            ExprKind::Binary { lhs, rhs, .. } => {
                lhs.walk(f);
                rhs.walk(f);
            }
            ExprKind::Conditional {
                condition,
                then,
                otherwise,
            } => {
                condition.walk(f);
                then.walk(f);
                otherwise.walk(f);
            }
            ExprKind::Assign { target, value, .. } => {
                target.walk(f);
                value.walk(f);
            }
            ExprKind::Lambda { body, .. } => body.walk(f),
            ExprKind::Index { target, index } => {
                target.walk(f);
                index.walk(f);
            }
            ExprKind::Block { body, value } => {
                for stmt in body {
                    stmt.walk_exprs(f);
                }
                if let Some(value) = value {
                    value.walk(f);
                }
            }
        }
    }

    /// Mutable pre-order traversal with the same reach as [`Expr::walk`].
    pub fn walk_mut(&mut self, f: &mut dyn FnMut(&mut Expr)) {
        f(self);
        match &mut self.kind {
            ExprKind::Literal { .. } | ExprKind::Name { .. } => {}
            ExprKind::Member { target, .. } => target.walk_mut(f),
            ExprKind::Call { callee, args } => {
                callee.walk_mut(f);
                for arg in args {
                    arg.value.walk_mut(f);
                }
            }
            ExprKind::New { args, .. } => {
                for arg in args {
                    arg.value.walk_mut(f);
                }
            }
            ExprKind::Unary { operand, .. } | ExprKind::Cast { operand, .. } => {
                operand.walk_mut(f)
            }
            ExprKind::Binary { lhs, rhs, .. } => {
                lhs.walk_mut(f);
                rhs.walk_mut(f);
            }
            ExprKind::Conditional {
                condition,
                then,
                otherwise,
            } => {
                condition.walk_mut(f);
                then.walk_mut(f);
                otherwise.walk_mut(f);
            }
            ExprKind::Assign { target, value, .. } => {
                target.walk_mut(f);
                value.walk_mut(f);
            }
            ExprKind::Lambda { body, .. } => body.walk_mut(f),
            ExprKind::Index { target, index } => {
                target.walk_mut(f);
                index.walk_mut(f);
            }
            ExprKind::Block { body, value } => {
                for stmt in body {
                    stmt.walk_exprs_mut(f);
                }
                if let Some(value) = value {
                    value.walk_mut(f);
                }
            }
        }
    }

    /// Returns true if any node in this tree satisfies `pred`.
    pub fn any(&self, pred: &dyn Fn(&Expr) -> bool) -> bool {
        let mut found = false;
        self.walk(&mut |e| {
            if !found && pred(e) {
                found = true;
            }
        });
        found
    }

    fn is_atomic(&self) -> bool {
        matches!(
            self.kind,
            ExprKind::Literal { .. }
                | ExprKind::Name { .. }
                | ExprKind::Member { .. }
                | ExprKind::Call { .. }
                | ExprKind::Index { .. }
                | ExprKind::New { .. }
        )
    }
}

// ============================================================================
// Statements
// ============================================================================

/// A statement inside a code fragment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "stmt", rename_all = "camelCase")]
pub enum CodeStmt {
    Expr {
        expr: Expr,
    },
    Local {
        name: String,
        ty: TypeRef,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        init: Option<Expr>,
        #[serde(default, skip_serializing_if = "SourceSpan::is_unknown")]
        span: SourceSpan,
    },
    Block {
        body: Vec<CodeStmt>,
    },
    If {
        condition: Expr,
        then: Box<CodeStmt>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        otherwise: Option<Box<CodeStmt>>,
    },
    While {
        condition: Expr,
        body: Box<CodeStmt>,
    },
}

impl CodeStmt {
    pub fn expr(expr: Expr) -> Self {
        CodeStmt::Expr { expr }
    }

    pub fn local(name: impl Into<String>, ty: TypeRef, init: Option<Expr>) -> Self {
        CodeStmt::Local {
            name: name.into(),
            ty,
            init,
            span: SourceSpan::default(),
        }
    }

    /// Visit every expression tree held by this statement.
    pub fn walk_exprs<'a>(&'a self, f: &mut dyn FnMut(&'a Expr)) {
        match self {
            CodeStmt::Expr { expr } => expr.walk(f),
            CodeStmt::Local { init, .. } => {
                if let Some(init) = init {
                    init.walk(f);
                }
            }
            CodeStmt::Block { body } => {
                for stmt in body {
                    stmt.walk_exprs(f);
                }
            }
            CodeStmt::If {
                condition,
                then,
                otherwise,
            } => {
                condition.walk(f);
                then.walk_exprs(f);
                if let Some(otherwise) = otherwise {
                    otherwise.walk_exprs(f);
                }
            }
            CodeStmt::While { condition, body } => {
                condition.walk(f);
                body.walk_exprs(f);
            }
        }
    }

    pub fn walk_exprs_mut(&mut self, f: &mut dyn FnMut(&mut Expr)) {
        match self {
            CodeStmt::Expr { expr } => expr.walk_mut(f),
            CodeStmt::Local { init, .. } => {
                if let Some(init) = init {
                    init.walk_mut(f);
                }
            }
            CodeStmt::Block { body } => {
                for stmt in body {
                    stmt.walk_exprs_mut(f);
                }
            }
            CodeStmt::If {
                condition,
                then,
                otherwise,
            } => {
                condition.walk_mut(f);
                then.walk_exprs_mut(f);
                if let Some(otherwise) = otherwise {
                    otherwise.walk_exprs_mut(f);
                }
            }
            CodeStmt::While { condition, body } => {
                condition.walk_mut(f);
                body.walk_exprs_mut(f);
            }
        }
    }
}

// ============================================================================
// Rendering
// ============================================================================

struct Operand<'a>(&'a Expr);

impl std::fmt::Display for Operand<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.0.is_atomic() {
            write!(f, "{}", self.0)
        } else {
            write!(f, "({})", self.0)
        }
    }
}

fn write_args(f: &mut std::fmt::Formatter<'_>, args: &[Argument]) -> std::fmt::Result {
    for (i, arg) in args.iter().enumerate() {
        if i > 0 {
            f.write_str(", ")?;
        }
        match arg.direction {
            Direction::In => {}
            Direction::Out => f.write_str("out ")?,
            Direction::Ref => f.write_str("ref ")?,
        }
        write!(f, "{}", arg.value)?;
    }
    Ok(())
}

impl std::fmt::Display for Literal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Literal::Null => f.write_str("null"),
            Literal::Bool(b) => write!(f, "{}", b),
            Literal::Int(i) => write!(f, "{}", i),
            Literal::Float(x) => write!(f, "{:?}", x),
            Literal::Str(s) => write!(f, "{:?}", s),
        }
    }
}

impl std::fmt::Display for Expr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.kind {
            ExprKind::Literal { value } => write!(f, "{}", value),
            ExprKind::Name { name } => f.write_str(name),
            ExprKind::Member { target, name } => write!(f, "{}.{}", Operand(target), name),
            ExprKind::Call { callee, args } => {
                write!(f, "{}(", Operand(callee))?;
                write_args(f, args)?;
                f.write_str(")")
            }
            ExprKind::New { ty, args } => {
                write!(f, "new {}(", ty)?;
                write_args(f, args)?;
                f.write_str(")")
            }
            ExprKind::Unary { op, operand } => {
                if op.is_postfix() {
                    write!(f, "{}{}", Operand(operand), op.symbol())
                } else {
                    write!(f, "{}{}", op.symbol(), Operand(operand))
                }
            }
            ExprKind::Binary { op, lhs, rhs } => {
                write!(f, "{} {} {}", Operand(lhs), op, Operand(rhs))
            }
            ExprKind::Conditional {
                condition,
                then,
                otherwise,
            } => write!(
                f,
                "{} ? {} : {}",
                Operand(condition),
                Operand(then),
                Operand(otherwise)
            ),
            ExprKind::Assign { op, target, value } => {
                write!(f, "{} {} {}", Operand(target), op, Operand(value))
            }
            ExprKind::Lambda { params, body } => {
                write!(f, "({}) => {}", params.join(", "), Operand(body))
            }
            ExprKind::Cast { ty, operand } => write!(f, "({}){}", ty, Operand(operand)),
            ExprKind::Index { target, index } => write!(f, "{}[{}]", Operand(target), index),
            ExprKind::Block { body, value } => {
                f.write_str("{")?;
                for stmt in body {
                    write!(f, " {}", stmt)?;
                }
                if let Some(value) = value {
                    write!(f, " => {}", value)?;
                }
                f.write_str(" }")
            }
        }
    }
}

impl std::fmt::Display for CodeStmt {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CodeStmt::Expr { expr } => write!(f, "{};", expr),
            CodeStmt::Local { name, ty, init, .. } => match init {
                Some(init) => write!(f, "{} {} = {};", ty, name, init),
                None => write!(f, "{} {};", ty, name),
            },
            CodeStmt::Block { body } => {
                f.write_str("{")?;
                for stmt in body {
                    write!(f, " {}", stmt)?;
                }
                f.write_str(" }")
            }
            CodeStmt::If {
                condition,
                then,
                otherwise,
            } => {
                write!(f, "if ({}) {}", condition, then)?;
                if let Some(otherwise) = otherwise {
                    write!(f, " else {}", otherwise)?;
                }
                Ok(())
            }
            CodeStmt::While { condition, body } => write!(f, "while ({}) {}", condition, body),
        }
    }
}

/// Render a statement list on one line, separated by spaces.
pub fn render_body(body: &[CodeStmt]) -> String {
    body.iter()
        .map(|s| s.to_string())
        .collect::<Vec<_>>()
        .join(" ")
}
