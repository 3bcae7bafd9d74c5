// SPDX-License-Identifier: MIT

//! Typed error handling for iev-engine
//!
//! `IevError` is the single error type flowing out of nodes and workflows.
//! Four of its variants form the halting taxonomy of a pipeline run
//! (precondition, execution, recovery, validation); the rest cover
//! construction-time and ambient failures.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::schema::Violation;
use crate::state::StateError;

/// Top-level error type for iev-engine
#[derive(Debug, Error)]
pub enum IevError {
    /// A required state key is missing or has the wrong shape
    #[error("node '{node}' is missing required state keys: {missing:?}")]
    Precondition { node: String, missing: Vec<String> },

    /// The node's main work failed (usually a provider call)
    #[error("node '{node}' failed to execute: {message}")]
    Execution { node: String, message: String },

    /// Every repair strategy was exhausted during extraction
    #[error("node '{node}' could not recover structured output ({reason}); excerpt: {excerpt:?}")]
    Recovery {
        node: String,
        reason: String,
        excerpt: String,
    },

    /// Schema violations survived the selected validation mode
    #[error("node '{node}' rejected record: {}", format_violations(.violations))]
    Validation {
        node: String,
        violations: Vec<Violation>,
    },

    /// Invalid workflow graph, raised at construction time
    #[error("Topology error: {0}")]
    Topology(#[from] TopologyError),

    /// Append-only state law was broken
    #[error("State error: {0}")]
    State(#[from] StateError),

    /// Caller cancelled the invocation
    #[error("Invocation cancelled before node '{before}'")]
    Cancelled { before: String },

    /// Invocation deadline elapsed
    #[error("Invocation timed out after {elapsed_ms} ms before node '{before}'")]
    TimedOut { before: String, elapsed_ms: u64 },

    /// Configuration errors (missing env vars, invalid pipeline file)
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O errors
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error(transparent)]
    Json(#[from] serde_json::Error),

    /// YAML parsing errors
    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),
}

/// Coarse classification of an [`IevError`], recorded in metrics
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Precondition,
    Execution,
    Recovery,
    Validation,
    Topology,
    State,
    Cancelled,
    TimedOut,
    Config,
    Io,
    Serialization,
}

/// Workflow graph errors
#[derive(Debug, Error, Clone, PartialEq)]
pub enum TopologyError {
    /// The workflow has no nodes at all
    #[error("Workflow has no nodes")]
    Empty,

    /// Two nodes share a name
    #[error("Duplicate node name: {0}")]
    DuplicateNode(String),

    /// An edge references a node that was never registered
    #[error("Edge {from} -> {to} references unknown node '{missing}'")]
    UnknownNode {
        from: String,
        to: String,
        missing: String,
    },

    /// Edge points from a node to itself
    #[error("Self-loop on node '{0}'")]
    SelfLoop(String),

    /// Circular dependency detected in the graph
    #[error("Circular dependency detected: {0:?}")]
    CircularDependency(Vec<String>),

    /// Zero or more than one node without incoming edges. In an acyclic
    /// graph a single entry also means every node is reachable from it.
    #[error("Expected exactly one entry node, found {0:?}")]
    EntryNode(Vec<String>),
}

/// Errors surfaced by LLM provider implementations
#[derive(Debug, Error)]
pub enum ProviderError {
    /// API key not configured
    #[error("API key not configured for provider: {0}")]
    ApiKeyMissing(String),

    /// Rate limit exceeded
    #[error("Rate limit exceeded, retry after {retry_after_secs:?} seconds")]
    RateLimited { retry_after_secs: Option<u64> },

    /// Non-success response from the backend
    #[error("API error from {provider}: {message}")]
    Api { provider: String, message: String },

    /// Invalid response from model
    #[error("Invalid response from model: {0}")]
    InvalidResponse(String),

    /// The call did not finish within its deadline
    #[error("Provider call timed out after {0} ms")]
    Timeout(u64),

    /// The backend is not reachable
    #[error("Provider unavailable: {0}")]
    Unavailable(String),

    /// HTTP request errors
    #[error(transparent)]
    Http(#[from] reqwest::Error),
}

impl IevError {
    /// Create a precondition error
    pub fn precondition(node: impl Into<String>, missing: Vec<String>) -> Self {
        Self::Precondition {
            node: node.into(),
            missing,
        }
    }

    /// Create an execution error
    pub fn execution(node: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Execution {
            node: node.into(),
            message: message.into(),
        }
    }

    /// Create a recovery error, truncating the malformed text
    pub fn recovery(node: impl Into<String>, reason: impl Into<String>, raw: &str) -> Self {
        Self::Recovery {
            node: node.into(),
            reason: reason.into(),
            excerpt: excerpt(raw, EXCERPT_CHARS),
        }
    }

    /// Create a validation error
    pub fn validation(node: impl Into<String>, violations: Vec<Violation>) -> Self {
        Self::Validation {
            node: node.into(),
            violations,
        }
    }

    /// Create a config error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Classify this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Precondition { .. } => ErrorKind::Precondition,
            Self::Execution { .. } => ErrorKind::Execution,
            Self::Recovery { .. } => ErrorKind::Recovery,
            Self::Validation { .. } => ErrorKind::Validation,
            Self::Topology(_) => ErrorKind::Topology,
            Self::State(_) => ErrorKind::State,
            Self::Cancelled { .. } => ErrorKind::Cancelled,
            Self::TimedOut { .. } => ErrorKind::TimedOut,
            Self::Config(_) => ErrorKind::Config,
            Self::Io(_) => ErrorKind::Io,
            Self::Json(_) | Self::Yaml(_) => ErrorKind::Serialization,
        }
    }

    /// Name of the node that raised this error, if it came from a node
    pub fn node(&self) -> Option<&str> {
        match self {
            Self::Precondition { node, .. }
            | Self::Execution { node, .. }
            | Self::Recovery { node, .. }
            | Self::Validation { node, .. } => Some(node),
            Self::Cancelled { before } | Self::TimedOut { before, .. } => Some(before),
            _ => None,
        }
    }
}

/// Maximum characters of malformed text carried by a recovery error
pub const EXCERPT_CHARS: usize = 200;

/// Truncate text on a char boundary, marking the cut with an ellipsis
pub fn excerpt(text: &str, max_chars: usize) -> String {
    let mut chars = text.chars();
    let head: String = chars.by_ref().take(max_chars).collect();
    if chars.next().is_some() {
        format!("{}...", head)
    } else {
        head
    }
}

fn format_violations(violations: &[Violation]) -> String {
    violations
        .iter()
        .map(|v| v.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_excerpt_short_text_untouched() {
        assert_eq!(excerpt("abc", 10), "abc");
    }

    #[test]
    fn test_excerpt_truncates_on_char_boundary() {
        let text = "é".repeat(300);
        let cut = excerpt(&text, EXCERPT_CHARS);
        assert!(cut.ends_with("..."));
        assert_eq!(cut.chars().count(), EXCERPT_CHARS + 3);
    }

    #[test]
    fn test_error_kinds() {
        assert_eq!(
            IevError::precondition("n", vec!["k".into()]).kind(),
            ErrorKind::Precondition
        );
        assert_eq!(IevError::execution("n", "boom").kind(), ErrorKind::Execution);
        assert_eq!(IevError::recovery("n", "bad", "").kind(), ErrorKind::Recovery);
        assert_eq!(IevError::validation("n", vec![]).kind(), ErrorKind::Validation);
        assert_eq!(
            IevError::from(TopologyError::Empty).kind(),
            ErrorKind::Topology
        );
    }

    #[test]
    fn test_error_node_name() {
        let err = IevError::execution("intelligence", "timeout");
        assert_eq!(err.node(), Some("intelligence"));
        assert_eq!(IevError::config("x").node(), None);
    }

    #[test]
    fn test_precondition_message_names_keys() {
        let err = IevError::precondition("extraction", vec!["analysis".into()]);
        assert!(err.to_string().contains("analysis"));
        assert!(err.to_string().contains("extraction"));
    }
}
