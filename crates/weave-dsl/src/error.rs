// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Compile errors and the diagnostics sink.
//!
//! Every error kind has a stable `[Wnnn]` code in its message so tools can
//! match on it without parsing prose. Codes are grouped:
//! - W001-W009: construction (names, labels, members)
//! - W010-W019: illegal nesting and structure
//! - W020-W039: resolution (flowcharts, state machines, correlation)
//! - W040-W049: delegated semantic errors
//! - W050-W059: lowering
//! - W090-W099: internal

use thiserror::Error;

use crate::span::SourceSpan;

/// Result alias for fail-fast paths.
pub type CompileResult<T> = Result<T, CompileError>;

/// The kind of a compile error, with its message arguments.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ErrorKind {
    // === Construction ===
    #[error("[W001] '{name}' is already declared in an enclosing scope")]
    DuplicateName { name: String },

    #[error("[W002] unknown statement '{label}'")]
    UnknownStatement { label: String },

    #[error("[W003] '{label}' is missing required member '{member}'")]
    MissingMember { label: String, member: String },

    #[error("[W004] invalid value for '{label}': {detail}")]
    InvalidValue { label: String, detail: String },

    // === Nesting and structure ===
    #[error("[W010] rethrow is only allowed inside a catch block")]
    RethrowOutsideCatch,

    #[error("[W011] persist is not allowed inside a no-persist scope")]
    PersistInsideNoPersist,

    #[error("[W012] node name '{name}' is used more than once")]
    DuplicateNodeName { name: String },

    #[error("[W013] final state '{state}' cannot have transitions or an exit action")]
    FinalStateHasTransitions { state: String },

    // === Resolution ===
    #[error("[W020] '{name}' does not name a node in this graph")]
    UnresolvedReference { name: String },

    #[error("[W021] state machine has no final state")]
    MissingFinalState,

    #[error("[W022] start state '{state}' is a final state")]
    StartStateIsFinal { state: String },

    #[error("[W023] state machine has no start state")]
    NoStartState,

    #[error(
        "[W024] state '{state}' has more than one unconditioned transition; each one requires a condition"
    )]
    TransitionConditionRequired { state: String },

    #[error("[W030] no request operation found for reply '{reply}'")]
    RequestNotFound { reply: String },

    #[error("[W031] request '{request}' is already referenced by another reply")]
    RequestAlreadyReferencedByAnotherReply { request: String },

    // === Delegated ===
    #[error("[W040] {message}")]
    Semantic { message: String },

    // === Lowering ===
    #[error("[W050] '{name}' cannot be referenced inside a lambda")]
    StoreReferenceInLambda { name: String },

    #[error("[W051] call to '{node_type}' cannot be scheduled from inside a nested lambda or block")]
    ScheduledCallInNestedScope { node_type: String },

    #[error("[W052] {direction} argument '{argument}' of '{node_type}' must be a workflow variable")]
    InvalidOutArgument {
        node_type: String,
        argument: String,
        direction: String,
    },

    #[error("[W053] call to '{node_type}' cannot be scheduled in a {slot}")]
    ScheduledCallNotAllowedHere { node_type: String, slot: String },

    #[error("[W054] expression nesting exceeds the limit of {limit}")]
    ExpressionTooDeep { limit: usize },

    #[error("[W055] type of '{name}' could not be inferred")]
    UninferredStoreType { name: String },

    #[error(
        "[W057] local '{name}' is used after a scheduled call; declare it as a workflow variable"
    )]
    LocalAcrossScheduledCall { name: String },

    // === Internal ===
    #[error("[W090] internal compiler error: {message}")]
    Internal { message: String },

    #[error("[W091] internal compiler error: rewrite already attached to '{store}'")]
    RewriteAlreadyAttached { store: String },
}

impl ErrorKind {
    /// The stable `Wnnn` code of this kind.
    pub fn code(&self) -> &'static str {
        match self {
            ErrorKind::DuplicateName { .. } => "W001",
            ErrorKind::UnknownStatement { .. } => "W002",
            ErrorKind::MissingMember { .. } => "W003",
            ErrorKind::InvalidValue { .. } => "W004",
            ErrorKind::RethrowOutsideCatch => "W010",
            ErrorKind::PersistInsideNoPersist => "W011",
            ErrorKind::DuplicateNodeName { .. } => "W012",
            ErrorKind::FinalStateHasTransitions { .. } => "W013",
            ErrorKind::UnresolvedReference { .. } => "W020",
            ErrorKind::MissingFinalState => "W021",
            ErrorKind::StartStateIsFinal { .. } => "W022",
            ErrorKind::NoStartState => "W023",
            ErrorKind::TransitionConditionRequired { .. } => "W024",
            ErrorKind::RequestNotFound { .. } => "W030",
            ErrorKind::RequestAlreadyReferencedByAnotherReply { .. } => "W031",
            ErrorKind::Semantic { .. } => "W040",
            ErrorKind::StoreReferenceInLambda { .. } => "W050",
            ErrorKind::ScheduledCallInNestedScope { .. } => "W051",
            ErrorKind::InvalidOutArgument { .. } => "W052",
            ErrorKind::ScheduledCallNotAllowedHere { .. } => "W053",
            ErrorKind::ExpressionTooDeep { .. } => "W054",
            ErrorKind::UninferredStoreType { .. } => "W055",
            ErrorKind::LocalAcrossScheduledCall { .. } => "W057",
            ErrorKind::Internal { .. } => "W090",
            ErrorKind::RewriteAlreadyAttached { .. } => "W091",
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        ErrorKind::Internal {
            message: message.into(),
        }
    }

    /// Attach a span.
    pub fn at(self, span: SourceSpan) -> CompileError {
        CompileError { kind: self, span }
    }
}

/// A single error with the source location it refers to.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{span}: {kind}")]
pub struct CompileError {
    pub kind: ErrorKind,
    pub span: SourceSpan,
}

impl CompileError {
    pub fn new(kind: ErrorKind, span: SourceSpan) -> Self {
        Self { kind, span }
    }
}

/// A non-empty batch of errors reported at a barrier.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("compilation failed with {} error(s):\n{}", .0.len(), render(.0))]
pub struct CompileErrors(pub Vec<CompileError>);

fn render(errors: &[CompileError]) -> String {
    errors
        .iter()
        .map(|e| format!("  {}", e))
        .collect::<Vec<_>>()
        .join("\n")
}

impl CompileErrors {
    pub fn iter(&self) -> impl Iterator<Item = &CompileError> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Returns true if any error has the given code.
    pub fn contains_code(&self, code: &str) -> bool {
        self.0.iter().any(|e| e.kind.code() == code)
    }
}

impl From<CompileError> for CompileErrors {
    fn from(error: CompileError) -> Self {
        CompileErrors(vec![error])
    }
}

/// Accumulating error sink.
///
/// Passes that need to see a whole batch before failing push into this sink
/// and call [`Diagnostics::checkpoint`] at their barrier.
#[derive(Debug, Default)]
pub struct Diagnostics {
    errors: Vec<CompileError>,
}

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, error: CompileError) {
        tracing::debug!(code = error.kind.code(), span = %error.span, "{}", error.kind);
        self.errors.push(error);
    }

    /// Record an error of the given kind at `span`.
    pub fn report(&mut self, kind: ErrorKind, span: SourceSpan) {
        self.push(CompileError::new(kind, span));
    }

    /// Record the error of a fail-fast result and turn it into `None`.
    pub fn absorb<T>(&mut self, result: CompileResult<T>) -> Option<T> {
        match result {
            Ok(value) => Some(value),
            Err(error) => {
                self.push(error);
                None
            }
        }
    }

    pub fn extend(&mut self, errors: CompileErrors) {
        for error in errors.0 {
            self.push(error);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn len(&self) -> usize {
        self.errors.len()
    }

    /// Abort with every accumulated error, if there are any.
    pub fn checkpoint(&mut self) -> Result<(), CompileErrors> {
        if self.errors.is_empty() {
            Ok(())
        } else {
            Err(CompileErrors(std::mem::take(&mut self.errors)))
        }
    }
}
