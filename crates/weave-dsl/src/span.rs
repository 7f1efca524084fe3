// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Source spans attached to parse nodes, statements and diagnostics.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// A region of W source text, 1-based lines and columns.
///
/// Spans are produced by the external parser and carried unchanged through
/// every pass so that errors found late (oracle diagnostics, lowering errors)
/// still point at the user's text.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, JsonSchema,
)]
#[serde(rename_all = "camelCase")]
pub struct SourceSpan {
    /// Index of the compilation unit the span belongs to.
    #[serde(default)]
    pub unit: u32,
    /// First line of the region.
    pub line: u32,
    /// First column of the region.
    pub column: u32,
    /// Last line of the region.
    #[serde(default)]
    pub end_line: u32,
    /// Column just past the region on `end_line`.
    #[serde(default)]
    pub end_column: u32,
}

impl SourceSpan {
    /// Create a span covering a single position.
    pub fn at(line: u32, column: u32) -> Self {
        Self {
            unit: 0,
            line,
            column,
            end_line: line,
            end_column: column,
        }
    }

    /// Returns true for the default span used by synthesized nodes.
    pub fn is_unknown(&self) -> bool {
        self.line == 0 && self.column == 0
    }

    /// Return a copy of this span attributed to another compilation unit.
    pub fn in_unit(mut self, unit: u32) -> Self {
        self.unit = unit;
        self
    }
}

impl std::fmt::Display for SourceSpan {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_unknown() {
            write!(f, "unit {}", self.unit)
        } else {
            write!(f, "unit {}:{}:{}", self.unit, self.line, self.column)
        }
    }
}
