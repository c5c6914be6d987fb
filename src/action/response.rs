//! Action call and response types

use crate::core::ActionRef;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

/// Error types for action execution
#[derive(Debug, Error)]
pub enum ActionError {
    #[error("exited with code {code}: {stderr}")]
    Failed { code: i32, stderr: String },

    #[error("Timeout after {0} seconds")]
    Timeout(u64),

    #[error("No handler for action '{0}'")]
    UnknownAction(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// A fully rendered step invocation
#[derive(Debug, Clone)]
pub struct ActionCall {
    /// Name of the step making the call
    pub step: String,

    /// Action with placeholders already rendered
    pub action: ActionRef,

    /// Rendered `with:` parameters
    pub params: HashMap<String, String>,

    /// Complete environment for the action
    pub env: HashMap<String, String>,

    pub timeout_secs: u64,
}

/// Result of a successful action
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ActionOutput {
    /// Captured output
    pub output: String,

    /// Variables exported to later steps of the same instance
    pub exports: HashMap<String, String>,

    /// Raw LCOV coverage report, if the action produced one
    pub coverage: Option<String>,

    /// Coverage report the step asked for but could not be read
    pub missing_coverage: Option<String>,
}

impl ActionOutput {
    pub fn new(output: impl Into<String>) -> Self {
        Self {
            output: output.into(),
            ..Default::default()
        }
    }

    pub fn with_export(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.exports.insert(key.into(), value.into());
        self
    }

    pub fn with_coverage(mut self, report: impl Into<String>) -> Self {
        self.coverage = Some(report.into());
        self
    }
}

/// Parse `name=value` lines written to the exports file. Blank lines and
/// lines without `=` are ignored.
pub fn parse_exports(content: &str) -> HashMap<String, String> {
    content
        .lines()
        .filter_map(|line| {
            let (key, value) = line.split_once('=')?;
            let key = key.trim();
            (!key.is_empty()).then(|| (key.to_string(), value.to_string()))
        })
        .collect()
}
