// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! In-process lexical oracle.
//!
//! Resolves names through nested scopes and types literals, declarations,
//! operators and method results. It is not a type checker: member access on
//! values is left untyped, and unknown capitalized names are taken to be
//! types. Good enough for offline compilation and tests; a real frontend is
//! plugged in through [`super::ProcessOracle`].

use std::collections::HashMap;

use tracing::debug;
use weave_dsl::ast::Marker;
use weave_dsl::code::{BinaryOp, CodeStmt, Expr, ExprKind, Literal, TypeRef, UnaryOp};

use super::{
    AnnotatedFragment, DeclarationType, Diagnostic, ExprAnnotation, MethodSymbol, OracleError,
    SemanticModel, SemanticOracle, Symbol,
};
use crate::model::{ExternalNodeType, ModelStmt, ModelType, ModelUnit};

/// Lexical resolver over the model programs.
#[derive(Debug, Default)]
pub struct ScopeOracle {
    catalog: Vec<ExternalNodeType>,
}

impl ScopeOracle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Node types offered to [`SemanticOracle::discover_node_types`].
    pub fn with_catalog(catalog: Vec<ExternalNodeType>) -> Self {
        Self { catalog }
    }
}

impl SemanticOracle for ScopeOracle {
    fn discover_node_types(
        &mut self,
        imports: &[String],
        references: &[String],
    ) -> Result<Vec<ExternalNodeType>, OracleError> {
        let found: Vec<ExternalNodeType> = self
            .catalog
            .iter()
            .filter(|t| imports.contains(&t.namespace) || references.contains(&t.namespace))
            .cloned()
            .collect();
        debug!(
            imports = imports.len(),
            catalog = self.catalog.len(),
            found = found.len(),
            "Discovered node types"
        );
        Ok(found)
    }

    fn analyze(
        &mut self,
        units: &[ModelUnit],
        _references: &[String],
    ) -> Result<SemanticModel, OracleError> {
        let mut types: HashMap<String, &ModelType> = HashMap::new();
        for ty in units.iter().flat_map(|u| &u.types) {
            types.insert(ty.qualified_name(), ty);
            types.entry(ty.name.clone()).or_insert(ty);
        }

        let mut analyzer = Analyzer {
            types,
            scopes: Vec::new(),
            current: None,
            model: SemanticModel::default(),
            diagnostics: Vec::new(),
        };
        for ty in units.iter().flat_map(|u| &u.types) {
            for method in &ty.methods {
                let Some(body) = &method.body else {
                    continue;
                };
                analyzer.push();
                for param in &method.parameters {
                    let binding = match param.marker {
                        Some(marker) => Binding::Store {
                            marker,
                            ty: param.ty.clone(),
                        },
                        None => Binding::Local {
                            ty: Some(param.ty.clone()),
                        },
                    };
                    analyzer.bind(&param.name, binding);
                }
                for stmt in body {
                    analyzer.model_stmt(stmt);
                }
                analyzer.pop();
            }
        }

        if analyzer.diagnostics.is_empty() {
            Ok(analyzer.model)
        } else {
            Err(OracleError::Diagnostics(analyzer.diagnostics))
        }
    }
}

#[derive(Debug, Clone)]
enum Binding {
    Store { marker: Marker, ty: TypeRef },
    Local { ty: Option<TypeRef> },
}

impl Binding {
    fn ty(&self) -> Option<TypeRef> {
        match self {
            Binding::Store { ty, .. } => Some(ty.clone()),
            Binding::Local { ty } => ty.clone(),
        }
    }
}

struct Analyzer<'a> {
    types: HashMap<String, &'a ModelType>,
    scopes: Vec<HashMap<String, Binding>>,
    current: Option<AnnotatedFragment>,
    model: SemanticModel,
    diagnostics: Vec<Diagnostic>,
}

impl Analyzer<'_> {
    fn push(&mut self) {
        self.scopes.push(HashMap::new());
    }

    fn pop(&mut self) {
        self.scopes.pop();
    }

    fn bind(&mut self, name: &str, binding: Binding) {
        if let Some(scope) = self.scopes.last_mut() {
            scope.insert(name.to_string(), binding);
        }
    }

    fn lookup(&self, name: &str) -> Option<&Binding> {
        self.scopes.iter().rev().find_map(|s| s.get(name))
    }

    fn begin(&mut self, marker: Option<Marker>) {
        self.current = marker.map(|marker| AnnotatedFragment {
            marker,
            exprs: Vec::new(),
        });
    }

    fn end(&mut self) {
        if let Some(fragment) = self.current.take() {
            self.model.fragments.push(fragment);
        }
    }

    fn annotate(&mut self, expr: &Expr, symbol: Option<Symbol>, ty: Option<TypeRef>) {
        if let (Some(fragment), Some(id)) = (self.current.as_mut(), expr.id) {
            fragment.exprs.push(ExprAnnotation {
                expr: id,
                symbol,
                ty,
            });
        }
    }

    fn declare(&mut self, marker: Marker, ty: TypeRef) {
        self.model.declarations.push(DeclarationType { marker, ty });
    }

    // ------------------------------------------------------------------
    // Model statements
    // ------------------------------------------------------------------

    fn model_stmt(&mut self, stmt: &ModelStmt) {
        match stmt {
            ModelStmt::Declare {
                marker,
                name,
                ty,
                like,
                init,
            } => {
                let init_ty = match init {
                    Some(init) => {
                        self.begin(init.marker);
                        let ty = self.expr(&init.expr);
                        self.end();
                        ty
                    }
                    None => None,
                };
                let resolved = match like {
                    Some(other) => self.lookup(other).and_then(Binding::ty),
                    None if ty.is_inferred() => init_ty,
                    None => Some(ty.clone()),
                }
                .unwrap_or_else(TypeRef::object);
                match marker {
                    Some(marker) => {
                        self.declare(*marker, resolved.clone());
                        self.bind(
                            name,
                            Binding::Store {
                                marker: *marker,
                                ty: resolved,
                            },
                        );
                    }
                    None => self.bind(
                        name,
                        Binding::Local {
                            ty: Some(resolved),
                        },
                    ),
                }
            }
            ModelStmt::Eval { expr } => {
                self.begin(expr.marker);
                self.expr(&expr.expr);
                self.end();
            }
            ModelStmt::Fragment { marker, body } => {
                self.begin(Some(*marker));
                for stmt in body {
                    self.code_stmt(stmt);
                }
                self.end();
            }
            ModelStmt::Block { body } => {
                self.push();
                for stmt in body {
                    self.model_stmt(stmt);
                }
                self.pop();
            }
            ModelStmt::ForEach {
                marker,
                name,
                ty,
                values,
                body,
            } => {
                self.begin(values.marker);
                let values_ty = self.expr(&values.expr);
                self.end();
                let item_ty = if ty.is_inferred() {
                    values_ty
                        .as_ref()
                        .map(element_type)
                        .unwrap_or_else(TypeRef::object)
                } else {
                    ty.clone()
                };
                self.declare(*marker, item_ty.clone());
                self.push();
                self.bind(
                    name,
                    Binding::Store {
                        marker: *marker,
                        ty: item_ty,
                    },
                );
                for stmt in body {
                    self.model_stmt(stmt);
                }
                self.pop();
            }
        }
    }

    // ------------------------------------------------------------------
    // Fragment statements
    // ------------------------------------------------------------------

    fn code_stmt(&mut self, stmt: &CodeStmt) {
        match stmt {
            CodeStmt::Expr { expr } => {
                self.expr(expr);
            }
            CodeStmt::Local { name, ty, init, .. } => {
                let init_ty = init.as_ref().and_then(|e| self.expr(e));
                let ty = if ty.is_inferred() {
                    init_ty
                } else {
                    Some(ty.clone())
                };
                self.bind(name, Binding::Local { ty });
            }
            CodeStmt::Block { body } => {
                self.push();
                for stmt in body {
                    self.code_stmt(stmt);
                }
                self.pop();
            }
            CodeStmt::If {
                condition,
                then,
                otherwise,
            } => {
                self.expr(condition);
                self.scoped(then);
                if let Some(otherwise) = otherwise {
                    self.scoped(otherwise);
                }
            }
            CodeStmt::While { condition, body } => {
                self.expr(condition);
                self.scoped(body);
            }
        }
    }

    fn scoped(&mut self, stmt: &CodeStmt) {
        self.push();
        self.code_stmt(stmt);
        self.pop();
    }

    // ------------------------------------------------------------------
    // Expressions
    // ------------------------------------------------------------------

    /// Dotted type path of `expr` when it names a type rather than a value.
    fn type_path(&self, expr: &Expr) -> Option<String> {
        match &expr.kind {
            ExprKind::Name { name } if self.lookup(name).is_none() => {
                let is_type = self.types.contains_key(name)
                    || name.chars().next().is_some_and(char::is_uppercase);
                is_type.then(|| name.clone())
            }
            ExprKind::Member { target, name } => {
                self.type_path(target).map(|p| format!("{}.{}", p, name))
            }
            _ => None,
        }
    }

    fn expr(&mut self, expr: &Expr) -> Option<TypeRef> {
        let (symbol, ty) = match &expr.kind {
            ExprKind::Literal { value } => (None, literal_type(value)),
            ExprKind::Name { name } => match self.lookup(name).cloned() {
                Some(Binding::Store { marker, ty }) => {
                    (Some(Symbol::Store { declaration: marker }), Some(ty))
                }
                Some(Binding::Local { ty }) => (Some(Symbol::Local), ty),
                None if self.type_path(expr).is_some() => {
                    (Some(Symbol::Type { name: name.clone() }), None)
                }
                None => {
                    self.unknown_name(expr, name);
                    (None, None)
                }
            },
            ExprKind::Member { target, .. } => match self.type_path(expr) {
                Some(path) if self.types.contains_key(&path) => {
                    self.expr(target);
                    (Some(Symbol::Type { name: path }), None)
                }
                _ => {
                    self.expr(target);
                    (Some(Symbol::Other), None)
                }
            },
            ExprKind::Call { callee, args } => {
                let method = self.method(callee);
                self.expr(callee);
                if let Some(method) = &method {
                    // The callee node carries the method too.
                    self.reannotate(callee, Symbol::Method(method.clone()));
                }
                for arg in args {
                    self.expr(&arg.value);
                }
                let ty = method.as_ref().and_then(|m| m.return_type.clone());
                (method.map(Symbol::Method), ty)
            }
            ExprKind::New { ty, args } => {
                for arg in args {
                    self.expr(&arg.value);
                }
                (None, Some(ty.clone()))
            }
            ExprKind::Unary { op, operand } => {
                let operand_ty = self.expr(operand);
                let ty = match op {
                    UnaryOp::Not => Some(TypeRef::boolean()),
                    _ => operand_ty,
                };
                (None, ty)
            }
            ExprKind::Binary { op, lhs, rhs } => {
                let l = self.expr(lhs);
                let r = self.expr(rhs);
                (None, binary_type(*op, l, r))
            }
            ExprKind::Conditional {
                condition,
                then,
                otherwise,
            } => {
                self.expr(condition);
                let a = self.expr(then);
                let b = self.expr(otherwise);
                (None, a.or(b))
            }
            ExprKind::Assign { target, value, .. } => {
                let t = self.expr(target);
                let v = self.expr(value);
                (None, t.or(v))
            }
            ExprKind::Lambda { params, body } => {
                self.push();
                for param in params {
                    self.bind(param, Binding::Local { ty: None });
                }
                self.expr(body);
                self.pop();
                (None, None)
            }
            ExprKind::Cast { ty, operand } => {
                self.expr(operand);
                (None, Some(ty.clone()))
            }
            ExprKind::Index { target, index } => {
                let t = self.expr(target);
                self.expr(index);
                (None, t.as_ref().map(element_type))
            }
            ExprKind::Block { body, value } => {
                self.push();
                for stmt in body {
                    self.code_stmt(stmt);
                }
                let ty = value.as_ref().and_then(|v| self.expr(v));
                self.pop();
                (None, ty)
            }
        };
        self.annotate(expr, symbol, ty.clone());
        ty
    }

    /// Method a callee binds to, for `Type.Method` callees.
    fn method(&self, callee: &Expr) -> Option<MethodSymbol> {
        let ExprKind::Member { target, name } = &callee.kind else {
            return None;
        };
        let container = self.type_path(target)?;
        match self.types.get(&container) {
            Some(ty) => ty.method(name).map(|m| MethodSymbol {
                name: m.name.clone(),
                container: ty.qualified_name(),
                parameters: m
                    .scheduling
                    .as_ref()
                    .map(|s| s.parameters.clone())
                    .unwrap_or_default(),
                return_type: m.return_type.clone(),
                scheduling: m.scheduling.clone(),
            }),
            None => Some(MethodSymbol {
                name: name.clone(),
                container,
                parameters: Vec::new(),
                return_type: None,
                scheduling: None,
            }),
        }
    }

    fn reannotate(&mut self, expr: &Expr, symbol: Symbol) {
        let (Some(fragment), Some(id)) = (self.current.as_mut(), expr.id) else {
            return;
        };
        if let Some(annotation) = fragment.exprs.iter_mut().rev().find(|a| a.expr == id) {
            annotation.symbol = Some(symbol);
        }
    }

    fn unknown_name(&mut self, expr: &Expr, name: &str) {
        self.diagnostics.push(Diagnostic {
            message: format!("The name '{}' does not exist in the current context", name),
            marker: self.current.as_ref().map(|f| f.marker),
            span: (!expr.span.is_unknown()).then_some(expr.span),
        });
    }
}

fn literal_type(value: &Literal) -> Option<TypeRef> {
    match value {
        Literal::Null => None,
        Literal::Bool(_) => Some(TypeRef::boolean()),
        Literal::Int(_) => Some(TypeRef::int()),
        Literal::Float(_) => Some(TypeRef::new("double")),
        Literal::Str(_) => Some(TypeRef::string()),
    }
}

fn binary_type(op: BinaryOp, lhs: Option<TypeRef>, rhs: Option<TypeRef>) -> Option<TypeRef> {
    if op.is_boolean() {
        return Some(TypeRef::boolean());
    }
    match op {
        BinaryOp::Coalesce => lhs.or(rhs),
        BinaryOp::Add if lhs.as_ref() == Some(&TypeRef::string())
            || rhs.as_ref() == Some(&TypeRef::string()) =>
        {
            Some(TypeRef::string())
        }
        _ => match (lhs, rhs) {
            (Some(l), Some(r)) if l == r => Some(l),
            (Some(l), Some(r)) if is_numeric(&l) && is_numeric(&r) => Some(TypeRef::new("double")),
            (l, r) => l.or(r),
        },
    }
}

fn is_numeric(ty: &TypeRef) -> bool {
    matches!(ty.as_str(), "int" | "long" | "double" | "float" | "decimal")
}

/// Element type of a collection type.
fn element_type(ty: &TypeRef) -> TypeRef {
    let name = ty.as_str();
    if let Some(inner) = name.strip_suffix("[]") {
        return TypeRef::new(inner);
    }
    for prefix in ["List<", "IEnumerable<", "IList<", "ICollection<"] {
        if let Some(inner) = name.strip_prefix(prefix).and_then(|s| s.strip_suffix('>')) {
            return TypeRef::new(inner);
        }
    }
    TypeRef::object()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{BODY_METHOD, ModelExpr, ModelMethod, ModelParameter};
    use weave_dsl::code::{Argument, Direction, ExprId};

    fn numbered(mut expr: Expr, next: &mut u32) -> Expr {
        expr.walk_mut(&mut |e| {
            *next += 1;
            e.id = Some(ExprId(*next));
        });
        expr
    }

    fn unit(body: Vec<ModelStmt>) -> ModelUnit {
        ModelUnit {
            index: 0,
            namespace: None,
            imports: vec![],
            types: vec![
                ModelType {
                    name: "A".to_string(),
                    namespace: None,
                    synthesized: false,
                    methods: vec![ModelMethod {
                        name: "Invoke".to_string(),
                        is_static: true,
                        parameters: vec![],
                        return_type: Some(TypeRef::int()),
                        scheduling: Some(crate::model::SchedulingAttribute {
                            node_type: "A".to_string(),
                            parameters: vec![],
                            result: Some(TypeRef::int()),
                        }),
                        body: None,
                    }],
                },
                ModelType {
                    name: "Main".to_string(),
                    namespace: None,
                    synthesized: false,
                    methods: vec![ModelMethod {
                        name: BODY_METHOD.to_string(),
                        is_static: false,
                        parameters: vec![ModelParameter {
                            name: "n".to_string(),
                            ty: TypeRef::int(),
                            direction: Direction::In,
                            marker: Some(Marker(1)),
                        }],
                        return_type: None,
                        scheduling: None,
                        body: Some(body),
                    }],
                },
            ],
        }
    }

    #[test]
    fn test_infers_declaration_from_scheduled_call() {
        let mut next = 0;
        let call = numbered(Expr::invoke("A", vec![]), &mut next);
        let call_id = call.id;
        let body = vec![ModelStmt::Declare {
            marker: Some(Marker(2)),
            name: "x".to_string(),
            ty: TypeRef::inferred(),
            like: None,
            init: Some(ModelExpr {
                marker: Some(Marker(3)),
                expr: call,
            }),
        }];
        let model = ScopeOracle::new().analyze(&[unit(body)], &[]).unwrap();
        assert_eq!(model.declarations[0].ty, TypeRef::int());
        let index = super::super::SemanticIndex::new(model);
        assert_eq!(index.scheduling(call_id).unwrap().node_type, "A");
        assert_eq!(index.ty(call_id), Some(&TypeRef::int()));
    }

    #[test]
    fn test_binds_parameters_and_locals() {
        let mut next = 0;
        let body = vec![CodeStmt::local("t", TypeRef::inferred(), Some(Expr::string("a")))];
        let use_n = numbered(
            Expr::binary(BinaryOp::Add, Expr::name("t"), Expr::name("n")),
            &mut next,
        );
        let mut all = body;
        all.push(CodeStmt::expr(use_n.clone()));
        let stmts = vec![ModelStmt::Fragment {
            marker: Marker(4),
            body: all,
        }];
        let model = ScopeOracle::new().analyze(&[unit(stmts)], &[]).unwrap();
        let index = super::super::SemanticIndex::new(model);
        let ExprKind::Binary { lhs, rhs, .. } = &use_n.kind else {
            unreachable!()
        };
        assert_eq!(index.symbol(lhs.id), Some(&Symbol::Local));
        assert_eq!(index.store_marker(rhs.id), Some(Marker(1)));
        assert_eq!(index.ty(use_n.id), Some(&TypeRef::string()));
    }

    #[test]
    fn test_unknown_lowercase_name_is_diagnosed() {
        let mut next = 0;
        let expr = numbered(
            Expr::call(Expr::member(Expr::name("Log"), "Write"), vec![Argument::value(Expr::name("missing"))]),
            &mut next,
        );
        let stmts = vec![ModelStmt::Eval {
            expr: ModelExpr {
                marker: Some(Marker(9)),
                expr,
            },
        }];
        let err = ScopeOracle::new().analyze(&[unit(stmts)], &[]).unwrap_err();
        match err {
            OracleError::Diagnostics(diags) => {
                assert_eq!(diags.len(), 1);
                assert_eq!(diags[0].marker, Some(Marker(9)));
                assert!(diags[0].message.contains("'missing'"));
            }
            other => panic!("unexpected error: {}", other),
        }
    }

    #[test]
    fn test_foreach_item_type_from_collection() {
        let stmts = vec![
            ModelStmt::Declare {
                marker: Some(Marker(5)),
                name: "xs".to_string(),
                ty: TypeRef::new("List<string>"),
                like: None,
                init: None,
            },
            ModelStmt::ForEach {
                marker: Marker(6),
                name: "x".to_string(),
                ty: TypeRef::inferred(),
                values: ModelExpr {
                    marker: Some(Marker(7)),
                    expr: Expr::name("xs"),
                },
                body: vec![],
            },
        ];
        let model = ScopeOracle::new().analyze(&[unit(stmts)], &[]).unwrap();
        let index = super::super::SemanticIndex::new(model);
        assert_eq!(index.declaration_type(Marker(6)), Some(&TypeRef::string()));
    }

    #[test]
    fn test_discovery_filters_by_namespace() {
        let ty = ExternalNodeType {
            name: "Ship".to_string(),
            namespace: "Shipping".to_string(),
            is_public: true,
            is_abstract: false,
            has_default_constructor: true,
            base: crate::model::NodeBase::Activity,
            arguments: vec![],
        };
        let mut oracle = ScopeOracle::with_catalog(vec![ty]);
        assert_eq!(
            oracle
                .discover_node_types(&["Shipping".to_string()], &[])
                .unwrap()
                .len(),
            1
        );
        assert!(
            oracle
                .discover_node_types(&["Billing".to_string()], &[])
                .unwrap()
                .is_empty()
        );
    }

    #[test]
    fn test_element_types() {
        assert_eq!(element_type(&TypeRef::new("int[]")), TypeRef::int());
        assert_eq!(element_type(&TypeRef::new("IEnumerable<bool>")), TypeRef::boolean());
        assert_eq!(element_type(&TypeRef::new("string")), TypeRef::object());
    }
}
