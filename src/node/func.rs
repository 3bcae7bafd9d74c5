// SPDX-License-Identifier: MIT

//! Custom node backed by an async closure
//!
//! The closure receives a snapshot of the state and returns only the keys it
//! adds; the node merges them in under the append-only rules and checks that
//! every declared output was produced.

use async_trait::async_trait;
use futures::future::BoxFuture;
use futures::FutureExt;
use serde_json::{Map, Value};
use std::future::Future;
use std::sync::Arc;

use super::{ensure_input, MetricsSlot, Node, NodeContext};
use crate::error::IevError;
use crate::state::State;
use crate::workflow::metrics::NodeMetrics;

/// Keys added by a custom node
pub type Additions = Map<String, Value>;

type NodeFn = dyn Fn(State) -> BoxFuture<'static, Result<Additions, IevError>> + Send + Sync;

pub struct FnNode {
    name: String,
    description: String,
    required: Vec<String>,
    outputs: Vec<String>,
    func: Arc<NodeFn>,
    metrics: MetricsSlot,
}

impl FnNode {
    pub fn new<F, Fut>(name: impl Into<String>, func: F) -> Self
    where
        F: Fn(State) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Additions, IevError>> + Send + 'static,
    {
        Self {
            name: name.into(),
            description: "Custom node".to_string(),
            required: Vec::new(),
            outputs: Vec::new(),
            func: Arc::new(move |state| func(state).boxed()),
            metrics: MetricsSlot::default(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn requires<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.required = keys.into_iter().map(Into::into).collect();
        self
    }

    pub fn produces<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.outputs = keys.into_iter().map(Into::into).collect();
        self
    }
}

#[async_trait]
impl Node for FnNode {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn required_keys(&self) -> &[String] {
        &self.required
    }

    fn output_keys(&self) -> &[String] {
        &self.outputs
    }

    async fn execute(&self, state: &State, _cx: &mut NodeContext) -> Result<State, IevError> {
        ensure_input(self, state)?;
        let additions = (self.func)(state.clone()).await?;

        let missing: Vec<&String> = self
            .outputs
            .iter()
            .filter(|k| !additions.contains_key(k.as_str()) && !state.contains_key(k))
            .collect();
        if !missing.is_empty() {
            return Err(IevError::execution(
                &self.name,
                format!("declared outputs not produced: {:?}", missing),
            ));
        }

        let mut next = state.clone();
        for (key, value) in additions {
            next.insert(key, value)?;
        }
        Ok(next)
    }

    fn get_metrics(&self) -> NodeMetrics {
        self.metrics.snapshot(&self.name)
    }

    fn record_metrics(&self, metrics: &NodeMetrics) {
        self.metrics.store(metrics);
    }
}
