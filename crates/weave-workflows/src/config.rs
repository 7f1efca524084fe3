// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Configuration loading from environment variables.

use crate::lower::DEFAULT_MAX_EXPR_DEPTH;

/// Compiler configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompilerConfig {
    /// External frontend command. `None` uses the in-process resolver.
    pub oracle_command: Option<String>,
    /// Reference assemblies or namespaces passed to the oracle
    pub references: Vec<String>,
    /// Recursion limit of the expression rewriter
    pub max_expr_depth: usize,
    /// Include the model output in compilation results
    pub debug: bool,
}

impl Default for CompilerConfig {
    fn default() -> Self {
        Self {
            oracle_command: None,
            references: Vec::new(),
            max_expr_depth: DEFAULT_MAX_EXPR_DEPTH,
            debug: false,
        }
    }
}

impl CompilerConfig {
    /// Load configuration from environment variables.
    ///
    /// Optional (with defaults):
    /// - `WEAVE_ORACLE_CMD`: frontend command line (default: in-process resolver)
    /// - `WEAVE_REFERENCES`: `:`-separated references (default: none)
    /// - `WEAVE_MAX_EXPR_DEPTH`: rewriter recursion limit (default: 64)
    /// - `WEAVE_DEBUG`: `true`/`false`/`1`/`0` (default: false)
    pub fn from_env() -> Result<Self, ConfigError> {
        let oracle_command = match std::env::var("WEAVE_ORACLE_CMD") {
            Ok(cmd) if cmd.trim().is_empty() => {
                return Err(ConfigError::Missing("WEAVE_ORACLE_CMD"));
            }
            Ok(cmd) => Some(cmd),
            Err(_) => None,
        };

        let references = std::env::var("WEAVE_REFERENCES")
            .map(|refs| {
                refs.split(':')
                    .map(str::trim)
                    .filter(|r| !r.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();

        let max_expr_depth: usize = std::env::var("WEAVE_MAX_EXPR_DEPTH")
            .unwrap_or_else(|_| DEFAULT_MAX_EXPR_DEPTH.to_string())
            .parse()
            .ok()
            .filter(|depth| *depth > 0)
            .ok_or(ConfigError::Invalid(
                "WEAVE_MAX_EXPR_DEPTH",
                "must be a positive integer",
            ))?;

        let debug = match std::env::var("WEAVE_DEBUG") {
            Err(_) => false,
            Ok(value) => match value.to_ascii_lowercase().as_str() {
                "1" | "true" => true,
                "0" | "false" | "" => false,
                _ => {
                    return Err(ConfigError::Invalid(
                        "WEAVE_DEBUG",
                        "must be true, false, 1 or 0",
                    ));
                }
            },
        };

        Ok(Self {
            oracle_command,
            references,
            max_expr_depth,
            debug,
        })
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A variable is set but carries no value.
    #[error("missing value for environment variable: {0}")]
    Missing(&'static str),

    /// An environment variable has an invalid value.
    #[error("invalid value for {0}: {1}")]
    Invalid(&'static str, &'static str),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;
    use std::sync::Mutex;

    // Mutex to serialize tests that modify environment variables
    static ENV_MUTEX: Mutex<()> = Mutex::new(());

    /// Helper to set env vars for a test and restore them after
    struct EnvGuard {
        vars: Vec<(String, Option<String>)>,
    }

    impl EnvGuard {
        fn new() -> Self {
            let mut guard = Self { vars: Vec::new() };
            for key in [
                "WEAVE_ORACLE_CMD",
                "WEAVE_REFERENCES",
                "WEAVE_MAX_EXPR_DEPTH",
                "WEAVE_DEBUG",
            ] {
                guard.remove(key);
            }
            guard
        }

        fn set(&mut self, key: &str, value: &str) {
            let old = env::var(key).ok();
            self.vars.push((key.to_string(), old));
            // SAFETY: Tests are serialized via ENV_MUTEX, so no concurrent access
            unsafe { env::set_var(key, value) };
        }

        fn remove(&mut self, key: &str) {
            let old = env::var(key).ok();
            self.vars.push((key.to_string(), old));
            // SAFETY: Tests are serialized via ENV_MUTEX, so no concurrent access
            unsafe { env::remove_var(key) };
        }
    }

    impl Drop for EnvGuard {
        fn drop(&mut self) {
            for (key, value) in self.vars.drain(..).rev() {
                // SAFETY: Tests are serialized via ENV_MUTEX, so no concurrent access
                unsafe {
                    match value {
                        Some(v) => env::set_var(&key, v),
                        None => env::remove_var(&key),
                    }
                }
            }
        }
    }

    #[test]
    fn test_config_defaults() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let _guard = EnvGuard::new();

        let config = CompilerConfig::from_env().unwrap();
        assert_eq!(config, CompilerConfig::default());
        assert_eq!(config.max_expr_depth, 64);
    }

    #[test]
    fn test_config_all_custom() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let mut guard = EnvGuard::new();

        guard.set("WEAVE_ORACLE_CMD", "weave-frontend --stdio");
        guard.set("WEAVE_REFERENCES", "System:System.Linq::Orders.Contracts");
        guard.set("WEAVE_MAX_EXPR_DEPTH", "128");
        guard.set("WEAVE_DEBUG", "TRUE");

        let config = CompilerConfig::from_env().unwrap();
        assert_eq!(config.oracle_command.as_deref(), Some("weave-frontend --stdio"));
        assert_eq!(
            config.references,
            vec!["System", "System.Linq", "Orders.Contracts"]
        );
        assert_eq!(config.max_expr_depth, 128);
        assert!(config.debug);
    }

    #[test]
    fn test_config_blank_oracle_command() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let mut guard = EnvGuard::new();

        guard.set("WEAVE_ORACLE_CMD", "  ");

        let err = CompilerConfig::from_env().unwrap_err();
        assert!(matches!(err, ConfigError::Missing("WEAVE_ORACLE_CMD")));
        assert!(err.to_string().contains("WEAVE_ORACLE_CMD"));
    }

    #[test]
    fn test_config_invalid_depth() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let mut guard = EnvGuard::new();

        for value in ["abc", "0", "-3"] {
            guard.set("WEAVE_MAX_EXPR_DEPTH", value);
            let err = CompilerConfig::from_env().unwrap_err();
            assert!(matches!(err, ConfigError::Invalid("WEAVE_MAX_EXPR_DEPTH", _)));
        }
    }

    #[test]
    fn test_config_invalid_debug_flag() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let mut guard = EnvGuard::new();

        guard.set("WEAVE_DEBUG", "sometimes");

        let err = CompilerConfig::from_env().unwrap_err();
        assert!(matches!(err, ConfigError::Invalid("WEAVE_DEBUG", _)));
    }
}
