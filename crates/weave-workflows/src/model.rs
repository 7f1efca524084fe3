// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Model pass.
//!
//! Emits, per compilation unit, an ordinary program that exists only so the
//! semantic oracle can resolve every embedded expression. Fragments are
//! copied verbatim with their markers; every other statement contributes
//! just the shape needed for typing (a `bool` temporary for a condition,
//! a `System.TimeSpan` temporary for a delay, both branches of an `if` one
//! after the other). Nothing here is ever executed.
//!
//! Each activity becomes a model type with a signature-only `Invoke` method
//! carrying the scheduling attribute, plus a body method holding the shaped
//! statements.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use weave_dsl::ast::{
    Activity, CompilationUnit, ExprFragment, Marker, ServiceKind, StmtId, StmtKind,
};
use weave_dsl::code::{CodeStmt, Direction, Expr, TypeRef, render_body};
use weave_dsl::span::SourceSpan;
use weave_dsl::store::StoreId;

/// Name of the scheduled entry point of every node type.
pub const INVOKE_METHOD: &str = "Invoke";

/// Name of the method holding an activity's shaped body.
pub const BODY_METHOD: &str = "__Body";

pub const TIMESPAN_TYPE: &str = "System.TimeSpan";
pub const EXCEPTION_TYPE: &str = "System.Exception";
pub const CORRELATION_HANDLE_TYPE: &str = "CorrelationHandle";
pub const COMPENSATION_TOKEN_TYPE: &str = "CompensationToken";
pub const ENDPOINT_TYPE: &str = "Endpoint";

// ============================================================================
// Model program
// ============================================================================

/// Parameter of a scheduled node type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduledParameter {
    pub name: String,
    pub ty: TypeRef,
    #[serde(default)]
    pub direction: Direction,
}

/// Attribute marking a method as a scheduled node.
///
/// Encodes the argument directions and result shape the impl pass needs to
/// build an `Invoke` node from a call site.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SchedulingAttribute {
    pub node_type: String,
    pub parameters: Vec<ScheduledParameter>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<TypeRef>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelParameter {
    pub name: String,
    pub ty: TypeRef,
    #[serde(default)]
    pub direction: Direction,
    /// Store declaration marker, for body-method parameters.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub marker: Option<Marker>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelMethod {
    pub name: String,
    #[serde(default)]
    pub is_static: bool,
    pub parameters: Vec<ModelParameter>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub return_type: Option<TypeRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scheduling: Option<SchedulingAttribute>,
    /// `None` for signature-only methods.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<Vec<ModelStmt>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelType {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    /// Synthesized for an externally discovered node type.
    #[serde(default)]
    pub synthesized: bool,
    pub methods: Vec<ModelMethod>,
}

impl ModelType {
    /// Namespace-qualified name.
    pub fn qualified_name(&self) -> String {
        qualify(self.namespace.as_deref(), &self.name)
    }

    pub fn method(&self, name: &str) -> Option<&ModelMethod> {
        self.methods.iter().find(|m| m.name == name)
    }
}

pub(crate) fn qualify(namespace: Option<&str>, name: &str) -> String {
    match namespace {
        Some(ns) if !ns.is_empty() => format!("{}.{}", ns, name),
        _ => name.to_string(),
    }
}

/// An expression copied into the model, tagged with its fragment marker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelExpr {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub marker: Option<Marker>,
    pub expr: Expr,
}

impl ModelExpr {
    fn marked(fragment: &ExprFragment) -> Self {
        Self {
            marker: Some(fragment.marker),
            expr: fragment.expr.clone(),
        }
    }
}

/// Statements of a model body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "stmt", rename_all = "camelCase")]
pub enum ModelStmt {
    /// A variable. `marker` is set for store declarations.
    Declare {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        marker: Option<Marker>,
        name: String,
        ty: TypeRef,
        /// Declare with the type of this other variable instead of `ty`.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        like: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        init: Option<ModelExpr>,
    },
    Eval {
        expr: ModelExpr,
    },
    /// A verbatim code fragment.
    Fragment {
        marker: Marker,
        body: Vec<CodeStmt>,
    },
    Block {
        body: Vec<ModelStmt>,
    },
    ForEach {
        marker: Marker,
        name: String,
        ty: TypeRef,
        values: ModelExpr,
        body: Vec<ModelStmt>,
    },
}

/// Model program of one compilation unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelUnit {
    pub index: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    #[serde(default)]
    pub imports: Vec<String>,
    pub types: Vec<ModelType>,
}

/// Output of the model pass over every unit.
#[derive(Debug, Clone, Default)]
pub struct ModelOutput {
    pub units: Vec<ModelUnit>,
    /// Every fragment marker present in the output.
    pub fragment_markers: BTreeSet<Marker>,
    /// Store declarations whose type the oracle must infer.
    pub inferred_declarations: BTreeSet<Marker>,
    /// Source location of every marker, for re-reporting oracle diagnostics.
    pub spans: BTreeMap<Marker, SourceSpan>,
}

// ============================================================================
// External node types
// ============================================================================

/// Base shape of an external type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "base", rename_all = "camelCase")]
pub enum NodeBase {
    /// `Activity`: no result.
    Activity,
    /// `Activity<T>`: result `T`.
    ActivityOf { result: TypeRef },
    /// Anything else.
    Other { name: String },
}

/// A type found in a referenced namespace.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExternalNodeType {
    pub name: String,
    pub namespace: String,
    pub is_public: bool,
    pub is_abstract: bool,
    pub has_default_constructor: bool,
    pub base: NodeBase,
    #[serde(default)]
    pub arguments: Vec<ScheduledParameter>,
}

impl ExternalNodeType {
    /// Why the type cannot be scheduled, if it cannot.
    pub fn ineligibility(&self) -> Option<&'static str> {
        if !self.is_public {
            Some("not public")
        } else if self.is_abstract {
            Some("abstract")
        } else if !self.has_default_constructor {
            Some("no public parameterless constructor")
        } else if matches!(self.base, NodeBase::Other { .. }) {
            Some("not derived from Activity or Activity<T>")
        } else {
            None
        }
    }
}

fn invoke_signature(
    node_type: String,
    parameters: Vec<ScheduledParameter>,
    result: Option<TypeRef>,
) -> ModelMethod {
    ModelMethod {
        name: INVOKE_METHOD.to_string(),
        is_static: true,
        parameters: parameters
            .iter()
            .map(|p| ModelParameter {
                name: p.name.clone(),
                ty: p.ty.clone(),
                direction: p.direction,
                marker: None,
            })
            .collect(),
        return_type: result.clone(),
        scheduling: Some(SchedulingAttribute {
            node_type,
            parameters,
            result,
        }),
        body: None,
    }
}

/// Synthesize static model types for the eligible external node types.
pub fn synthesize_external_types(discovered: &[ExternalNodeType]) -> Vec<ModelType> {
    let mut out = Vec::new();
    for ext in discovered {
        if let Some(reason) = ext.ineligibility() {
            debug!(node_type = %ext.name, namespace = %ext.namespace, reason, "Skipping external type");
            continue;
        }
        let result = match &ext.base {
            NodeBase::ActivityOf { result } => Some(result.clone()),
            _ => None,
        };
        out.push(ModelType {
            name: ext.name.clone(),
            namespace: Some(ext.namespace.clone()),
            synthesized: true,
            methods: vec![invoke_signature(
                qualify(Some(&ext.namespace), &ext.name),
                ext.arguments.clone(),
                result,
            )],
        });
    }
    out
}

// ============================================================================
// Emission
// ============================================================================

/// Emit model programs for every unit. `external` lands in unit 0.
pub fn emit_model(units: &[CompilationUnit], external: Vec<ModelType>) -> ModelOutput {
    let start = std::time::Instant::now();
    let mut output = ModelOutput::default();
    let mut external = Some(external);

    for unit in units {
        let mut types = Vec::with_capacity(unit.activities.len());
        for activity in &unit.activities {
            let mut emitter = ModelEmitter {
                activity,
                output: &mut output,
                temps: 0,
            };
            types.push(emitter.activity_type(unit.namespace.as_deref()));
        }
        if unit.index == 0 {
            types.extend(external.take().unwrap_or_default());
        }
        output.units.push(ModelUnit {
            index: unit.index,
            namespace: unit.namespace.clone(),
            imports: unit.imports.clone(),
            types,
        });
    }

    info!(
        units = output.units.len(),
        fragments = output.fragment_markers.len(),
        model_duration_ms = start.elapsed().as_millis() as u64,
        "Model pass complete"
    );
    output
}

struct ModelEmitter<'a> {
    activity: &'a Activity,
    output: &'a mut ModelOutput,
    temps: u32,
}

impl ModelEmitter<'_> {
    fn temp(&mut self) -> String {
        self.temps += 1;
        format!("__t{}", self.temps)
    }

    fn activity_type(&mut self, namespace: Option<&str>) -> ModelType {
        let act = self.activity;
        let signature: Vec<ScheduledParameter> = act
            .parameters
            .iter()
            .map(|id| {
                let store = act.store(*id);
                ScheduledParameter {
                    name: store.name.clone(),
                    ty: store.ty.clone(),
                    direction: store.kind.direction(),
                }
            })
            .collect();
        let result = act.result_type().cloned();
        let invoke = invoke_signature(qualify(namespace, &act.name), signature, result.clone());

        let parameters = act
            .parameters
            .iter()
            .map(|id| {
                let store = act.store(*id);
                self.output.spans.insert(store.marker, store.span);
                ModelParameter {
                    name: store.name.clone(),
                    ty: store.ty.clone(),
                    direction: store.kind.direction(),
                    marker: Some(store.marker),
                }
            })
            .collect();

        let mut body = Vec::new();
        let hosted: Vec<StoreId> = act
            .activity_stores
            .iter()
            .copied()
            .filter(|id| !act.parameters.contains(id))
            .collect();
        self.declare_stores(&hosted, &mut body);
        self.stmt(act.root, &mut body);

        debug!(activity = %act.name, statements = body.len(), "Emitted model type");
        ModelType {
            name: act.name.clone(),
            namespace: namespace.map(str::to_string),
            synthesized: false,
            methods: vec![
                invoke,
                ModelMethod {
                    name: BODY_METHOD.to_string(),
                    is_static: false,
                    parameters,
                    return_type: None,
                    scheduling: None,
                    body: Some(body),
                },
            ],
        }
    }

    fn declare_store(&mut self, id: StoreId, init: Option<ModelExpr>, out: &mut Vec<ModelStmt>) {
        let store = self.activity.store(id);
        self.output.spans.insert(store.marker, store.span);
        if store.ty.is_inferred() {
            self.output.inferred_declarations.insert(store.marker);
        }
        out.push(ModelStmt::Declare {
            marker: Some(store.marker),
            name: store.name.clone(),
            ty: store.ty.clone(),
            like: None,
            init,
        });
    }

    /// Declarations for stores not declared by their initializer.
    fn declare_stores(&mut self, ids: &[StoreId], out: &mut Vec<ModelStmt>) {
        for id in ids {
            if !self.activity.store(*id).initialized {
                self.declare_store(*id, None, out);
            }
        }
    }

    fn marked(&mut self, fragment: &ExprFragment) -> ModelExpr {
        self.output.fragment_markers.insert(fragment.marker);
        self.output.spans.insert(fragment.marker, fragment.span);
        ModelExpr::marked(fragment)
    }

    /// `ty __tN = <fragment>;`
    fn temp_of(&mut self, ty: TypeRef, fragment: &ExprFragment, out: &mut Vec<ModelStmt>) -> String {
        let name = self.temp();
        let init = self.marked(fragment);
        out.push(ModelStmt::Declare {
            marker: None,
            name: name.clone(),
            ty,
            like: None,
            init: Some(init),
        });
        name
    }

    fn optional_temp(&mut self, ty: &str, fragment: &Option<ExprFragment>, out: &mut Vec<ModelStmt>) {
        if let Some(fragment) = fragment {
            self.temp_of(TypeRef::new(ty), fragment, out);
        }
    }

    fn block(&mut self, id: StmtId) -> ModelStmt {
        let mut body = Vec::new();
        self.stmt(id, &mut body);
        ModelStmt::Block { body }
    }

    fn optional_block(&mut self, id: Option<StmtId>, out: &mut Vec<ModelStmt>) {
        if let Some(id) = id {
            let block = self.block(id);
            out.push(block);
        }
    }

    fn stmt(&mut self, id: StmtId, out: &mut Vec<ModelStmt>) {
        let act = self.activity;
        let stmt = act.stmt(id);
        match &stmt.kind {
            StmtKind::Code {
                fragment,
                initializes,
                ..
            } => {
                self.output.fragment_markers.insert(fragment.marker);
                self.output.spans.insert(fragment.marker, fragment.span);
                match (initializes, initializer_value(&fragment.body)) {
                    (Some(store), Some(value)) => {
                        let init = ModelExpr {
                            marker: Some(fragment.marker),
                            expr: value.clone(),
                        };
                        self.declare_store(*store, Some(init), out);
                    }
                    _ => out.push(ModelStmt::Fragment {
                        marker: fragment.marker,
                        body: fragment.body.clone(),
                    }),
                }
            }
            StmtKind::Empty | StmtKind::Persist => {}
            StmtKind::Sequence { members } => {
                let mut body = Vec::new();
                self.declare_stores(&stmt.stores, &mut body);
                for member in members {
                    self.stmt(*member, &mut body);
                }
                out.push(ModelStmt::Block { body });
            }
            StmtKind::If {
                condition,
                then,
                otherwise,
            } => {
                self.temp_of(TypeRef::boolean(), condition, out);
                out.push(self.block(*then));
                self.optional_block(*otherwise, out);
            }
            StmtKind::While {
                condition, body, ..
            } => {
                self.temp_of(TypeRef::boolean(), condition, out);
                out.push(self.block(*body));
            }
            StmtKind::Switch {
                value,
                cases,
                default,
            } => {
                let subject = self.temp_of(TypeRef::inferred(), value, out);
                for case in cases {
                    let name = self.temp();
                    let init = self.marked(&case.key);
                    out.push(ModelStmt::Declare {
                        marker: None,
                        name,
                        ty: TypeRef::inferred(),
                        like: Some(subject.clone()),
                        init: Some(init),
                    });
                    out.push(self.block(case.body));
                }
                self.optional_block(*default, out);
            }
            StmtKind::Throw { exception } => {
                self.optional_temp(EXCEPTION_TYPE, exception, out);
            }
            StmtKind::Try {
                body,
                catches,
                finally,
            } => {
                out.push(self.block(*body));
                for catch in catches {
                    self.stmt(*catch, out);
                }
                self.optional_block(*finally, out);
            }
            StmtKind::Catch { body, .. } => {
                let mut block = Vec::new();
                self.declare_stores(&stmt.stores, &mut block);
                self.stmt(*body, &mut block);
                out.push(ModelStmt::Block { body: block });
            }
            StmtKind::ForEach {
                item,
                values,
                body,
                completion,
                ..
            } => {
                let store = act.store(*item);
                self.output.spans.insert(store.marker, store.span);
                if store.ty.is_inferred() {
                    self.output.inferred_declarations.insert(store.marker);
                }
                let values = self.marked(values);
                let others: Vec<StoreId> =
                    stmt.stores.iter().copied().filter(|id| id != item).collect();
                let mut inner = Vec::new();
                self.declare_stores(&others, &mut inner);
                self.stmt(*body, &mut inner);
                out.push(ModelStmt::ForEach {
                    marker: store.marker,
                    name: store.name.clone(),
                    ty: store.ty.clone(),
                    values,
                    body: inner,
                });
                self.optional_temp("bool", completion, out);
            }
            StmtKind::Delay { duration } => {
                self.temp_of(TypeRef::new(TIMESPAN_TYPE), duration, out);
            }
            StmtKind::Parallel {
                branches,
                completion,
            } => {
                for branch in branches {
                    out.push(self.block(*branch));
                }
                self.optional_temp("bool", completion, out);
            }
            StmtKind::Pick { branches } => {
                for branch in branches {
                    self.stmt(*branch, out);
                }
            }
            StmtKind::PickBranch { trigger, action } => {
                let mut block = Vec::new();
                self.declare_stores(&stmt.stores, &mut block);
                self.stmt(*trigger, &mut block);
                if let Some(action) = action {
                    self.stmt(*action, &mut block);
                }
                out.push(ModelStmt::Block { body: block });
            }
            StmtKind::StateMachine { states, .. } => {
                let mut block = Vec::new();
                self.declare_stores(&stmt.stores, &mut block);
                for state in states {
                    self.stmt(*state, &mut block);
                }
                out.push(ModelStmt::Block { body: block });
            }
            StmtKind::State {
                entry,
                exit,
                transitions,
                ..
            } => {
                self.optional_block(*entry, out);
                self.optional_block(*exit, out);
                for transition in transitions {
                    self.stmt(*transition, out);
                }
            }
            StmtKind::Transition { trigger, bodies } => {
                self.optional_block(*trigger, out);
                for body in bodies {
                    self.stmt(*body, out);
                }
            }
            StmtKind::TransitionBody {
                condition, action, ..
            } => {
                self.optional_temp("bool", condition, out);
                self.optional_block(*action, out);
            }
            StmtKind::Flow { nodes, .. } => {
                let mut block = Vec::new();
                self.declare_stores(&stmt.stores, &mut block);
                for node in nodes {
                    self.stmt(*node, &mut block);
                }
                out.push(ModelStmt::Block { body: block });
            }
            StmtKind::FlowStep { action, .. } => out.push(self.block(*action)),
            StmtKind::FlowIf { condition, .. } => {
                self.temp_of(TypeRef::boolean(), condition, out);
            }
            StmtKind::FlowSwitch { value, cases, .. } => {
                let subject = self.temp_of(TypeRef::inferred(), value, out);
                for case in cases {
                    let name = self.temp();
                    let init = self.marked(&case.key);
                    out.push(ModelStmt::Declare {
                        marker: None,
                        name,
                        ty: TypeRef::inferred(),
                        like: Some(subject.clone()),
                        init: Some(init),
                    });
                }
            }
            StmtKind::Transacted { body, timeout } => {
                out.push(self.block(*body));
                self.optional_temp(TIMESPAN_TYPE, timeout, out);
            }
            StmtKind::Cancellable { body, handler } => {
                out.push(self.block(*body));
                self.optional_block(*handler, out);
            }
            StmtKind::Compensable {
                body,
                compensation,
                confirmation,
                cancellation,
                ..
            } => {
                out.push(self.block(*body));
                self.optional_block(*compensation, out);
                self.optional_block(*confirmation, out);
                self.optional_block(*cancellation, out);
            }
            StmtKind::Confirm { target } | StmtKind::Compensate { target } => {
                self.optional_temp(COMPENSATION_TOKEN_TYPE, target, out);
            }
            StmtKind::NoPersist { body } => out.push(self.block(*body)),
            StmtKind::Terminate { reason, exception } => {
                self.optional_temp("string", reason, out);
                self.optional_temp(EXCEPTION_TYPE, exception, out);
            }
            StmtKind::Service(op) => {
                let mut block = Vec::new();
                let contract = op.contract.clone().or_else(|| {
                    op.request
                        .and_then(|r| act.service(r))
                        .and_then(|r| r.contract.clone())
                });
                if let (Some(contract), Some(operation)) = (contract, &op.operation) {
                    let svc = self.temp();
                    block.push(ModelStmt::Declare {
                        marker: None,
                        name: svc.clone(),
                        ty: contract,
                        like: None,
                        init: None,
                    });
                    block.push(ModelStmt::Eval {
                        expr: ModelExpr {
                            marker: None,
                            expr: Expr::member(Expr::name(svc), operation.clone()),
                        },
                    });
                }
                if let Some(content) = &op.content {
                    for fragment in content.fragments() {
                        if op.kind.is_inbound() {
                            let expr = self.marked(fragment);
                            block.push(ModelStmt::Eval { expr });
                        } else {
                            self.temp_of(TypeRef::inferred(), fragment, &mut block);
                        }
                    }
                }
                self.optional_temp(CORRELATION_HANDLE_TYPE, &op.correlates_with, &mut block);
                if op.kind == ServiceKind::Send {
                    self.optional_temp(ENDPOINT_TYPE, &op.endpoint, &mut block);
                }
                out.push(ModelStmt::Block { body: block });
            }
            StmtKind::ContentCorrelation { handle, data } => {
                self.temp_of(TypeRef::new(CORRELATION_HANDLE_TYPE), handle, out);
                for param in data {
                    self.temp_of(TypeRef::inferred(), &param.value, out);
                }
            }
            StmtKind::TransactedReceive { request, body } => {
                let mut block = Vec::new();
                self.declare_stores(&stmt.stores, &mut block);
                self.stmt(*request, &mut block);
                self.stmt(*body, &mut block);
                out.push(ModelStmt::Block { body: block });
            }
        }
    }
}

/// The value assigned by an initializer fragment (`x = value;`).
pub(crate) fn initializer_value(body: &[CodeStmt]) -> Option<&Expr> {
    match body {
        [CodeStmt::Expr { expr }] => match &expr.kind {
            weave_dsl::code::ExprKind::Assign { value, .. } => Some(value),
            _ => None,
        },
        _ => None,
    }
}

// ============================================================================
// Rendering
// ============================================================================

impl ModelStmt {
    fn render(&self, indent: usize, out: &mut String) {
        let pad = "    ".repeat(indent);
        match self {
            ModelStmt::Declare {
                marker,
                name,
                ty,
                like,
                init,
            } => {
                let ty = match like {
                    Some(other) => format!("typeof({})", other),
                    None => ty.to_string(),
                };
                let tag = marker.map(|m| format!(" /*{}*/", m)).unwrap_or_default();
                match init {
                    Some(init) => out.push_str(&format!(
                        "{}{} {}{} = {}{};\n",
                        pad,
                        ty,
                        name,
                        tag,
                        render_marker(init.marker),
                        init.expr
                    )),
                    None => out.push_str(&format!("{}{} {}{};\n", pad, ty, name, tag)),
                }
            }
            ModelStmt::Eval { expr } => {
                out.push_str(&format!("{}{}{};\n", pad, render_marker(expr.marker), expr.expr))
            }
            ModelStmt::Fragment { marker, body } => {
                out.push_str(&format!("{}/*{}*/ {}\n", pad, marker, render_body(body)))
            }
            ModelStmt::Block { body } => {
                out.push_str(&format!("{}{{\n", pad));
                for stmt in body {
                    stmt.render(indent + 1, out);
                }
                out.push_str(&format!("{}}}\n", pad));
            }
            ModelStmt::ForEach {
                marker,
                name,
                ty,
                values,
                body,
            } => {
                out.push_str(&format!(
                    "{}foreach ({} {} /*{}*/ in {}{}) {{\n",
                    pad,
                    ty,
                    name,
                    marker,
                    render_marker(values.marker),
                    values.expr
                ));
                for stmt in body {
                    stmt.render(indent + 1, out);
                }
                out.push_str(&format!("{}}}\n", pad));
            }
        }
    }
}

fn render_marker(marker: Option<Marker>) -> String {
    marker.map(|m| format!("/*{}*/ ", m)).unwrap_or_default()
}

impl ModelUnit {
    /// C#-like text of the unit, for debug output.
    pub fn render(&self) -> String {
        let mut out = String::new();
        for import in &self.imports {
            out.push_str(&format!("using {};\n", import));
        }
        for ty in &self.types {
            out.push_str(&format!("class {} {{\n", ty.qualified_name()));
            for method in &ty.methods {
                let params = method
                    .parameters
                    .iter()
                    .map(|p| match p.direction {
                        Direction::In => format!("{} {}", p.ty, p.name),
                        d => format!("{} {} {}", d, p.ty, p.name),
                    })
                    .collect::<Vec<_>>()
                    .join(", ");
                if let Some(attr) = &method.scheduling {
                    out.push_str(&format!("    [Scheduled(\"{}\")]\n", attr.node_type));
                }
                let ret = method
                    .return_type
                    .as_ref()
                    .map(|t| t.to_string())
                    .unwrap_or_else(|| "void".to_string());
                match &method.body {
                    None => out.push_str(&format!("    {} {}({});\n", ret, method.name, params)),
                    Some(body) => {
                        out.push_str(&format!("    {} {}({}) {{\n", ret, method.name, params));
                        for stmt in body {
                            stmt.render(2, &mut out);
                        }
                        out.push_str("    }\n");
                    }
                }
            }
            out.push_str("}\n");
        }
        out
    }
}
