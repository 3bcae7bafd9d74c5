// SPDX-License-Identifier: MIT

//! Cache fabric boundary
//!
//! A deployment may share prompt templates and execution outcomes between
//! processes through a key/value store. The engine only reads templates by key
//! and records outcomes by invocation id; both go through the injected
//! `CacheFabric` handle, never through global state.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::RwLock;

use crate::workflow::metrics::{WorkflowMetrics, WorkflowStatus};

#[derive(Debug, Error)]
pub enum FabricError {
    #[error("Cache fabric unavailable: {0}")]
    Unavailable(String),
}

/// Summary of an invocation written to the fabric
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvocationOutcome {
    pub workflow: String,
    pub status: WorkflowStatus,
    pub total_duration_ms: u64,
    pub warnings: usize,
    pub failed_node: Option<String>,
    pub error: Option<String>,
}

impl InvocationOutcome {
    pub fn from_metrics(metrics: &WorkflowMetrics) -> Self {
        let failed = metrics.failed_node();
        Self {
            workflow: metrics.workflow.clone(),
            status: metrics.status,
            total_duration_ms: metrics.total_duration_ms,
            warnings: metrics.warning_count(),
            failed_node: failed.map(|m| m.node.clone()),
            error: failed.and_then(|m| m.error.clone()),
        }
    }
}

/// Process-wide key/value store consulted between invocations
#[async_trait]
pub trait CacheFabric: Send + Sync {
    /// Current value of a template or system message
    async fn read_template(&self, key: &str) -> Result<Option<String>, FabricError>;

    /// Record how an invocation ended
    async fn record_outcome(
        &self,
        invocation_id: &str,
        outcome: &InvocationOutcome,
    ) -> Result<(), FabricError>;
}

/// In-process fabric backed by a shared map
#[derive(Clone, Default)]
pub struct InMemoryFabric {
    templates: Arc<RwLock<HashMap<String, String>>>,
    outcomes: Arc<RwLock<HashMap<String, InvocationOutcome>>>,
}

impl InMemoryFabric {
    pub fn new() -> Self {
        Self::default()
    }

    /// Hot-swap a template value
    pub async fn set_template(&self, key: impl Into<String>, value: impl Into<String>) {
        let mut templates = self.templates.write().await;
        templates.insert(key.into(), value.into());
    }

    pub async fn outcome(&self, invocation_id: &str) -> Option<InvocationOutcome> {
        let outcomes = self.outcomes.read().await;
        outcomes.get(invocation_id).cloned()
    }

    pub async fn outcome_count(&self) -> usize {
        self.outcomes.read().await.len()
    }
}

#[async_trait]
impl CacheFabric for InMemoryFabric {
    async fn read_template(&self, key: &str) -> Result<Option<String>, FabricError> {
        let templates = self.templates.read().await;
        Ok(templates.get(key).cloned())
    }

    async fn record_outcome(
        &self,
        invocation_id: &str,
        outcome: &InvocationOutcome,
    ) -> Result<(), FabricError> {
        let mut outcomes = self.outcomes.write().await;
        outcomes.insert(invocation_id.to_string(), outcome.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_template_hot_swap() {
        let fabric = InMemoryFabric::new();
        assert_eq!(fabric.read_template("prompt").await.unwrap(), None);

        fabric.set_template("prompt", "v1 {event}").await;
        assert_eq!(
            fabric.read_template("prompt").await.unwrap().as_deref(),
            Some("v1 {event}")
        );

        fabric.set_template("prompt", "v2 {event}").await;
        assert_eq!(
            fabric.read_template("prompt").await.unwrap().as_deref(),
            Some("v2 {event}")
        );
    }

    #[tokio::test]
    async fn test_record_outcome() {
        let fabric = InMemoryFabric::new();
        let outcome = InvocationOutcome {
            workflow: "wf".to_string(),
            status: WorkflowStatus::Succeeded,
            total_duration_ms: 3,
            warnings: 0,
            failed_node: None,
            error: None,
        };
        fabric.record_outcome("inv-1", &outcome).await.unwrap();

        assert_eq!(fabric.outcome("inv-1").await, Some(outcome));
        assert_eq!(fabric.outcome_count().await, 1);
    }

    #[tokio::test]
    async fn test_clones_share_storage() {
        let fabric = InMemoryFabric::new();
        let clone = fabric.clone();
        clone.set_template("k", "v").await;
        assert!(fabric.read_template("k").await.unwrap().is_some());
    }
}
