// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Oracle backed by an external frontend process.
//!
//! Each request spawns the configured command, writes one JSON request to
//! its stdin and reads one JSON response from its stdout:
//!
//! ```text
//! -> {"method": "analyze", "units": [...], "references": [...]}
//! <- {"result": {...}}            on success
//! <- {"diagnostics": [...]}       when the program does not check
//! ```

use std::io::Write;
use std::process::{Command, Stdio};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info};

use super::{Diagnostic, OracleError, SemanticModel, SemanticOracle};
use crate::model::{ExternalNodeType, ModelUnit};

#[derive(Debug, Serialize)]
#[serde(tag = "method", rename_all = "camelCase")]
enum OracleRequest<'a> {
    DiscoverNodeTypes {
        imports: &'a [String],
        references: &'a [String],
    },
    Analyze {
        units: &'a [ModelUnit],
        references: &'a [String],
    },
}

#[derive(Debug, Deserialize)]
struct OracleResponse<T> {
    result: Option<T>,
    #[serde(default)]
    diagnostics: Vec<Diagnostic>,
}

/// Runs an external frontend for every oracle request.
#[derive(Debug, Clone)]
pub struct ProcessOracle {
    program: String,
    args: Vec<String>,
}

impl ProcessOracle {
    /// Create from a whitespace-separated command line.
    pub fn new(command: &str) -> Result<Self, OracleError> {
        let mut parts = command.split_whitespace().map(str::to_string);
        let program = parts
            .next()
            .ok_or_else(|| OracleError::Transport("empty oracle command".to_string()))?;
        Ok(Self {
            program,
            args: parts.collect(),
        })
    }

    fn call<T: DeserializeOwned>(&self, request: &OracleRequest<'_>) -> Result<T, OracleError> {
        let payload = serde_json::to_vec(request)
            .map_err(|e| OracleError::Protocol(format!("failed to encode request: {}", e)))?;

        let start = std::time::Instant::now();
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| {
                OracleError::Transport(format!("failed to start '{}': {}", self.program, e))
            })?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(&payload)
                .map_err(|e| OracleError::Transport(format!("failed to write request: {}", e)))?;
        }
        let output = child
            .wait_with_output()
            .map_err(|e| OracleError::Transport(format!("failed to read response: {}", e)))?;

        info!(
            program = %self.program,
            request_bytes = payload.len(),
            response_bytes = output.stdout.len(),
            oracle_duration_ms = start.elapsed().as_millis() as u64,
            "Oracle call completed"
        );

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            error!(program = %self.program, status = %output.status, stderr = %stderr, "Oracle process failed");
            return Err(OracleError::Transport(format!(
                "'{}' exited with {}: {}",
                self.program,
                output.status,
                stderr.trim()
            )));
        }

        let response: OracleResponse<T> = serde_json::from_slice(&output.stdout)
            .map_err(|e| OracleError::Protocol(format!("invalid response: {}", e)))?;
        if !response.diagnostics.is_empty() {
            debug!(count = response.diagnostics.len(), "Oracle returned diagnostics");
            return Err(OracleError::Diagnostics(response.diagnostics));
        }
        response.result.ok_or_else(|| {
            OracleError::Protocol("response has neither a result nor diagnostics".to_string())
        })
    }
}

impl SemanticOracle for ProcessOracle {
    fn discover_node_types(
        &mut self,
        imports: &[String],
        references: &[String],
    ) -> Result<Vec<ExternalNodeType>, OracleError> {
        self.call(&OracleRequest::DiscoverNodeTypes {
            imports,
            references,
        })
    }

    fn analyze(
        &mut self,
        units: &[ModelUnit],
        references: &[String],
    ) -> Result<SemanticModel, OracleError> {
        self.call(&OracleRequest::Analyze { units, references })
    }
}
