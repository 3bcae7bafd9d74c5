// SPDX-License-Identifier: MIT

//! Per-invocation execution metrics
//!
//! A fresh `WorkflowMetrics` is built for every invocation and handed back to
//! the caller with the result or the error. Nothing here is global.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{ErrorKind, IevError};

/// Outcome of a single node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeStatus {
    NotRun,
    Succeeded,
    Failed,
}

impl NodeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeStatus::NotRun => "not run",
            NodeStatus::Succeeded => "succeeded",
            NodeStatus::Failed => "failed",
        }
    }
}

/// Outcome of a whole invocation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    Running,
    Succeeded,
    Failed,
    Cancelled,
}

/// Metrics for one node execution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeMetrics {
    pub node: String,
    pub status: NodeStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub duration_ms: u64,
    /// State keys the node added
    pub keys_added: Vec<String>,
    pub warnings: Vec<String>,
    pub llm_calls: u32,
    pub error: Option<String>,
    pub error_kind: Option<ErrorKind>,
}

impl NodeMetrics {
    /// Marker for a node that has not executed
    pub fn not_run(node: impl Into<String>) -> Self {
        Self {
            node: node.into(),
            status: NodeStatus::NotRun,
            started_at: None,
            duration_ms: 0,
            keys_added: Vec::new(),
            warnings: Vec::new(),
            llm_calls: 0,
            error: None,
            error_kind: None,
        }
    }

    pub(crate) fn started(node: impl Into<String>) -> Self {
        Self {
            started_at: Some(Utc::now()),
            ..Self::not_run(node)
        }
    }

    pub(crate) fn succeed(&mut self, elapsed: Duration, keys_added: Vec<String>) {
        self.status = NodeStatus::Succeeded;
        self.duration_ms = elapsed.as_millis() as u64;
        self.keys_added = keys_added;
    }

    pub(crate) fn fail(&mut self, elapsed: Duration, error: &IevError) {
        self.status = NodeStatus::Failed;
        self.duration_ms = elapsed.as_millis() as u64;
        self.error = Some(error.to_string());
        self.error_kind = Some(error.kind());
    }

    pub fn has_run(&self) -> bool {
        self.status != NodeStatus::NotRun
    }

    pub fn duration(&self) -> Duration {
        Duration::from_millis(self.duration_ms)
    }
}

/// Aggregate metrics for one workflow invocation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowMetrics {
    pub invocation_id: String,
    pub workflow: String,
    pub status: WorkflowStatus,
    pub started_at: DateTime<Utc>,
    pub total_duration_ms: u64,
    /// One entry per node, in execution order
    pub nodes: Vec<NodeMetrics>,
}

impl WorkflowMetrics {
    pub(crate) fn start(
        invocation_id: impl Into<String>,
        workflow: impl Into<String>,
        order: &[String],
    ) -> Self {
        Self {
            invocation_id: invocation_id.into(),
            workflow: workflow.into(),
            status: WorkflowStatus::Running,
            started_at: Utc::now(),
            total_duration_ms: 0,
            nodes: order.iter().map(NodeMetrics::not_run).collect(),
        }
    }

    pub(crate) fn record(&mut self, metrics: NodeMetrics) {
        match self.nodes.iter_mut().find(|m| m.node == metrics.node) {
            Some(slot) => *slot = metrics,
            None => self.nodes.push(metrics),
        }
    }

    pub(crate) fn finish(&mut self, status: WorkflowStatus, elapsed: Duration) {
        self.status = status;
        self.total_duration_ms = elapsed.as_millis() as u64;
    }

    pub fn node(&self, name: &str) -> Option<&NodeMetrics> {
        self.nodes.iter().find(|m| m.node == name)
    }

    /// The node that halted the invocation, if any
    pub fn failed_node(&self) -> Option<&NodeMetrics> {
        self.nodes.iter().find(|m| m.status == NodeStatus::Failed)
    }

    /// All warnings as (node, warning) pairs
    pub fn warnings(&self) -> impl Iterator<Item = (&str, &str)> {
        self.nodes.iter().flat_map(|m| {
            m.warnings
                .iter()
                .map(move |w| (m.node.as_str(), w.as_str()))
        })
    }

    pub fn warning_count(&self) -> usize {
        self.nodes.iter().map(|m| m.warnings.len()).sum()
    }

    pub fn llm_calls(&self) -> u32 {
        self.nodes.iter().map(|m| m.llm_calls).sum()
    }

    pub fn total_duration(&self) -> Duration {
        Duration::from_millis(self.total_duration_ms)
    }

    /// Plain-text report, one line per node followed by warnings
    pub fn report(&self) -> String {
        let mut lines = vec![format!(
            "workflow {} [{}] {:?} in {} ms ({} llm calls, {} warnings)",
            self.workflow,
            self.invocation_id,
            self.status,
            self.total_duration_ms,
            self.llm_calls(),
            self.warning_count()
        )];
        for m in &self.nodes {
            let mut line = format!("  {:<16} {:<9} {:>6} ms", m.node, m.status.as_str(), m.duration_ms);
            if !m.keys_added.is_empty() {
                line.push_str(&format!("  +{}", m.keys_added.join(", +")));
            }
            if let Some(error) = &m.error {
                line.push_str(&format!("  error: {}", error));
            }
            lines.push(line);
            for warning in &m.warnings {
                lines.push(format!("    warning: {}", warning));
            }
        }
        lines.join("\n")
    }
}
