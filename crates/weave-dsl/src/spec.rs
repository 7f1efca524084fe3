// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Parse tree schema generation
//!
//! Generates the JSON Schema of the parse-tree input from the Rust type
//! definitions, annotated with the statement labels the compiler accepts.

use schemars::schema_for;
use serde_json::{Value, json};

use crate::LANGUAGE_VERSION;
use crate::tree::ParseProgram;

/// Metadata about a statement label.
#[derive(Debug, Clone, Copy)]
pub struct LabelInfo {
    pub label: &'static str,
    pub category: &'static str,
    /// Members the label reads, `?` marking optional ones.
    pub members: &'static str,
    pub description: &'static str,
}

/// Every statement label accepted by construction.
pub const STATEMENT_LABELS: &[LabelInfo] = &[
    LabelInfo { label: "sequence", category: "control", members: "variables?", description: "Runs items in order" },
    LabelInfo { label: "var", category: "control", members: "type? init?", description: "Declares a workflow variable on the enclosing scope" },
    LabelInfo { label: "code", category: "control", members: "", description: "Embedded statements" },
    LabelInfo { label: "empty", category: "control", members: "", description: "Does nothing" },
    LabelInfo { label: "if", category: "control", members: "condition then else?", description: "Two-way branch" },
    LabelInfo { label: "while", category: "control", members: "condition body", description: "Loop testing before each iteration" },
    LabelInfo { label: "do-while", category: "control", members: "condition body", description: "Loop testing after each iteration" },
    LabelInfo { label: "switch", category: "control", members: "value default?", description: "Multi-way branch over case items" },
    LabelInfo { label: "foreach", category: "control", members: "type? values body", description: "Iterates a collection" },
    LabelInfo { label: "parallel-foreach", category: "concurrency", members: "type? values body until?", description: "Iterates a collection concurrently" },
    LabelInfo { label: "parallel", category: "concurrency", members: "until?", description: "Runs item branches concurrently" },
    LabelInfo { label: "pick", category: "concurrency", members: "", description: "Runs the branch whose trigger completes first" },
    LabelInfo { label: "delay", category: "timing", members: "duration", description: "Waits for a duration" },
    LabelInfo { label: "throw", category: "errors", members: "exception?", description: "Throws, or rethrows inside a catch" },
    LabelInfo { label: "try", category: "errors", members: "body finally?", description: "Handles exceptions with catch items" },
    LabelInfo { label: "terminate", category: "errors", members: "reason? exception?", description: "Ends the workflow instance" },
    LabelInfo { label: "statemachine", category: "graphs", members: "start? variables?", description: "State machine over state items" },
    LabelInfo { label: "flow", category: "graphs", members: "variables?", description: "Flowchart over flow-step, flow-if and flow-switch items" },
    LabelInfo { label: "transacted", category: "scopes", members: "body timeout?", description: "Runs the body in a transaction" },
    LabelInfo { label: "cancellable", category: "scopes", members: "body handler?", description: "Runs the body with a cancellation handler" },
    LabelInfo { label: "compensable", category: "scopes", members: "body compensation? confirmation? cancellation?", description: "Runs the body with compensation logic" },
    LabelInfo { label: "confirm", category: "scopes", members: "target?", description: "Confirms a compensable activity" },
    LabelInfo { label: "compensate", category: "scopes", members: "target?", description: "Compensates a compensable activity" },
    LabelInfo { label: "persist", category: "scopes", members: "", description: "Persists the workflow instance" },
    LabelInfo { label: "nopersist", category: "scopes", members: "body", description: "Runs the body without persistence points" },
    LabelInfo { label: "receive", category: "services", members: "contract operation content? correlates-with? create-instance?", description: "Receives a request message" },
    LabelInfo { label: "send", category: "services", members: "contract operation content? correlates-with? endpoint?", description: "Sends a request message" },
    LabelInfo { label: "send-reply", category: "services", members: "request? content?", description: "Replies to a received request" },
    LabelInfo { label: "receive-reply", category: "services", members: "request? content?", description: "Receives the reply to a sent request" },
    LabelInfo { label: "content-correlation", category: "services", members: "handle", description: "Initializes a correlation handle from parameter items" },
    LabelInfo { label: "transacted-receive", category: "services", members: "request body variables?", description: "Receives a request inside a transaction" },
];

/// Look up a statement label.
pub fn label_info(label: &str) -> Option<&'static LabelInfo> {
    STATEMENT_LABELS.iter().find(|info| info.label == label)
}

/// Generate the parse-tree schema with statement label metadata.
pub fn generate_parse_tree_schema() -> Value {
    let schema = schema_for!(ParseProgram);
    let mut schema_json = serde_json::to_value(&schema).unwrap_or(Value::Null);

    let mut labels: Vec<Value> = STATEMENT_LABELS
        .iter()
        .map(|info| {
            json!({
                "label": info.label,
                "category": info.category,
                "members": info.members.split_whitespace().collect::<Vec<_>>(),
                "description": info.description,
            })
        })
        .collect();
    labels.sort_by(|a, b| {
        let a = a.get("label").and_then(|v| v.as_str()).unwrap_or("");
        let b = b.get("label").and_then(|v| v.as_str()).unwrap_or("");
        a.cmp(b)
    });

    if let Value::Object(ref mut map) = schema_json {
        map.insert("x-statement-labels".to_string(), Value::Array(labels));
        map.insert(
            "x-language-version".to_string(),
            Value::String(LANGUAGE_VERSION.to_string()),
        );
    }
    schema_json
}
