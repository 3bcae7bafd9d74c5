// SPDX-License-Identifier: MIT

//! Workflow executor
//!
//! Runs nodes one at a time in topological order. Each node sees the merged
//! output of its predecessors (the entry node sees the initial state). Any
//! error halts the invocation and is returned together with the metrics
//! gathered so far.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::graph::Topology;
use super::metrics::{NodeMetrics, WorkflowMetrics, WorkflowStatus};
use super::visualize;
use crate::error::{ErrorKind, IevError, TopologyError};
use crate::fabric::{CacheFabric, InvocationOutcome};
use crate::node::{ensure_input, Node, NodeContext};
use crate::state::State;

/// Per-invocation controls
#[derive(Debug, Clone, Default)]
pub struct InvokeOptions {
    /// Checked before every node
    pub cancel: CancellationToken,
    /// Deadline for the whole invocation, checked before every node
    pub timeout: Option<Duration>,
    /// Caller-supplied id; a UUID is generated otherwise
    pub invocation_id: Option<String>,
}

impl InvokeOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_cancel(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_invocation_id(mut self, id: impl Into<String>) -> Self {
        self.invocation_id = Some(id.into());
        self
    }
}

/// Successful invocation result
#[derive(Debug, Clone)]
pub struct FinalState {
    /// Merge of every terminal node's output
    pub state: State,
    /// Output of each terminal node
    pub by_terminal: BTreeMap<String, State>,
    pub metrics: WorkflowMetrics,
}

impl FinalState {
    pub fn get(&self, key: &str) -> Option<&serde_json::Value> {
        self.state.get(key)
    }

    pub fn terminal(&self, node: &str) -> Option<&State> {
        self.by_terminal.get(node)
    }
}

/// Failed invocation: the halting error plus partial metrics
#[derive(Debug, Error)]
#[error("{error}")]
pub struct InvocationError {
    #[source]
    pub error: IevError,
    pub metrics: WorkflowMetrics,
}

impl InvocationError {
    pub fn kind(&self) -> ErrorKind {
        self.error.kind()
    }

    /// Node that raised the error, or the node the invocation stopped before
    pub fn node(&self) -> Option<&str> {
        self.metrics
            .failed_node()
            .map(|m| m.node.as_str())
            .or_else(|| self.error.node())
    }
}

/// A validated DAG of nodes
pub struct Workflow {
    name: String,
    /// Nodes in execution order
    nodes: Vec<Arc<dyn Node>>,
    topology: Topology,
    fabric: Option<Arc<dyn CacheFabric>>,
    last_metrics: Mutex<Option<WorkflowMetrics>>,
}

impl Workflow {
    /// Build and validate a workflow; edges are `(from, to)` node names
    pub fn new<I, A, B>(
        name: impl Into<String>,
        nodes: Vec<Arc<dyn Node>>,
        edges: I,
    ) -> Result<Self, TopologyError>
    where
        I: IntoIterator<Item = (A, B)>,
        A: Into<String>,
        B: Into<String>,
    {
        let name = name.into();
        let names: Vec<String> = nodes.iter().map(|n| n.name().to_string()).collect();
        let edges: Vec<(String, String)> = edges
            .into_iter()
            .map(|(from, to)| (from.into(), to.into()))
            .collect();

        let topology = Topology::build(&names, &edges).map_err(|e| {
            log::error!("Workflow '{}' rejected: {}", name, e);
            e
        })?;

        let mut by_name: HashMap<String, Arc<dyn Node>> = nodes
            .into_iter()
            .map(|n| (n.name().to_string(), n))
            .collect();
        let ordered: Vec<Arc<dyn Node>> = topology
            .order()
            .iter()
            .filter_map(|n| by_name.remove(n))
            .collect();

        log::info!(
            "Workflow '{}' built with {} nodes: {}",
            name,
            ordered.len(),
            topology.order().join(" -> ")
        );

        Ok(Self {
            name,
            nodes: ordered,
            topology,
            fabric: None,
            last_metrics: Mutex::new(None),
        })
    }

    /// Attach a cache fabric for template reads and outcome records
    pub fn with_fabric(mut self, fabric: Arc<dyn CacheFabric>) -> Self {
        self.fabric = Some(fabric);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn topology(&self) -> &Topology {
        &self.topology
    }

    pub fn node(&self, name: &str) -> Option<&Arc<dyn Node>> {
        self.nodes.iter().find(|n| n.name() == name)
    }

    pub async fn invoke(&self, initial: State) -> Result<FinalState, InvocationError> {
        self.invoke_with(initial, InvokeOptions::default()).await
    }

    pub async fn invoke_with(
        &self,
        initial: State,
        options: InvokeOptions,
    ) -> Result<FinalState, InvocationError> {
        let invocation_id = options
            .invocation_id
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        let started = Instant::now();
        let mut metrics = WorkflowMetrics::start(&invocation_id, &self.name, self.topology.order());
        log::info!("Invoking workflow '{}' [{}]", self.name, invocation_id);

        let result = self
            .run(&invocation_id, initial, &options, started, &mut metrics)
            .await;

        let status = match &result {
            Ok(_) => WorkflowStatus::Succeeded,
            Err(IevError::Cancelled { .. }) | Err(IevError::TimedOut { .. }) => WorkflowStatus::Cancelled,
            Err(_) => WorkflowStatus::Failed,
        };
        metrics.finish(status, started.elapsed());
        log::info!(
            "Workflow '{}' [{}] finished {:?} in {} ms with {} warning(s)",
            self.name,
            invocation_id,
            status,
            metrics.total_duration_ms,
            metrics.warning_count()
        );

        self.remember(&metrics);
        self.record_outcome(&invocation_id, &metrics).await;

        match result {
            Ok((state, by_terminal)) => Ok(FinalState {
                state,
                by_terminal,
                metrics,
            }),
            Err(error) => Err(InvocationError { error, metrics }),
        }
    }

    async fn run(
        &self,
        invocation_id: &str,
        initial: State,
        options: &InvokeOptions,
        started: Instant,
        metrics: &mut WorkflowMetrics,
    ) -> Result<(State, BTreeMap<String, State>), IevError> {
        let mut outputs: HashMap<String, State> = HashMap::with_capacity(self.nodes.len());

        for node in &self.nodes {
            let name = node.name();
            if options.cancel.is_cancelled() {
                log::warn!("Invocation {} cancelled before '{}'", invocation_id, name);
                return Err(IevError::Cancelled {
                    before: name.to_string(),
                });
            }
            if let Some(limit) = options.timeout {
                let elapsed = started.elapsed();
                if elapsed >= limit {
                    log::warn!("Invocation {} timed out before '{}'", invocation_id, name);
                    return Err(IevError::TimedOut {
                        before: name.to_string(),
                        elapsed_ms: elapsed.as_millis() as u64,
                    });
                }
            }

            let input = self.input_for(name, &initial, &outputs)?;
            let output = self
                .run_node(node.as_ref(), &input, invocation_id, &options.cancel, metrics)
                .await?;
            outputs.insert(name.to_string(), output);
        }

        let mut by_terminal = BTreeMap::new();
        let mut merged: Option<State> = None;
        for terminal in self.topology.terminals() {
            if let Some(state) = outputs.remove(terminal) {
                match merged.as_mut() {
                    Some(acc) => acc.merge(&state)?,
                    None => merged = Some(state.clone()),
                }
                by_terminal.insert(terminal.clone(), state);
            }
        }
        Ok((merged.unwrap_or(initial), by_terminal))
    }

    /// Merge of the predecessors' outputs, or the initial state for the entry
    fn input_for(
        &self,
        node: &str,
        initial: &State,
        outputs: &HashMap<String, State>,
    ) -> Result<State, IevError> {
        let mut predecessors = self
            .topology
            .predecessors(node)
            .iter()
            .filter_map(|p| outputs.get(p));
        let Some(first) = predecessors.next() else {
            return Ok(initial.clone());
        };
        let mut input = first.clone();
        for other in predecessors {
            input.merge(other)?;
        }
        Ok(input)
    }

    async fn run_node(
        &self,
        node: &dyn Node,
        input: &State,
        invocation_id: &str,
        cancel: &CancellationToken,
        metrics: &mut WorkflowMetrics,
    ) -> Result<State, IevError> {
        let name = node.name();
        let mut cx = NodeContext::new(invocation_id, name)
            .with_fabric(self.fabric.clone())
            .with_cancellation(cancel.clone());
        let mut node_metrics = NodeMetrics::started(name);
        let clock = Instant::now();
        log::info!("Executing node: {}", name);

        let result = match ensure_input(node, input) {
            Err(e) => Err(e),
            Ok(()) => match node.execute(input, &mut cx).await {
                Ok(output) => Ok(output),
                Err(e) => {
                    log::warn!("Node {} failed, handing to on_error: {}", name, e);
                    node.on_error(e, input, &mut cx).await
                }
            },
        };
        let result = result.and_then(|output| {
            if output.extends(input) {
                Ok(output)
            } else {
                Err(IevError::execution(
                    name,
                    "node output removed or changed existing state keys",
                ))
            }
        });

        let (warnings, llm_calls) = cx.into_parts();
        node_metrics.warnings = warnings;
        node_metrics.llm_calls = llm_calls;
        match &result {
            Ok(output) => {
                node_metrics.succeed(clock.elapsed(), output.added_keys(input));
                log::info!("Node {} completed in {} ms", name, node_metrics.duration_ms);
            }
            Err(e) => {
                node_metrics.fail(clock.elapsed(), e);
                log::error!("Node {} failed: {}", name, e);
            }
        }
        node.record_metrics(&node_metrics);
        metrics.record(node_metrics);
        result
    }

    fn remember(&self, metrics: &WorkflowMetrics) {
        let mut last = self.last_metrics.lock().unwrap_or_else(|e| e.into_inner());
        *last = Some(metrics.clone());
    }

    async fn record_outcome(&self, invocation_id: &str, metrics: &WorkflowMetrics) {
        let Some(fabric) = &self.fabric else {
            return;
        };
        let outcome = InvocationOutcome::from_metrics(metrics);
        if let Err(e) = fabric.record_outcome(invocation_id, &outcome).await {
            log::warn!("Failed to record outcome of {} in cache fabric: {}", invocation_id, e);
        }
    }

    /// Metrics of the most recently completed invocation
    pub fn get_metrics(&self) -> Option<WorkflowMetrics> {
        self.last_metrics
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Last-run metrics reported by a node, `None` for an unknown name
    pub fn node_metrics(&self, name: &str) -> Option<NodeMetrics> {
        self.node(name).map(|n| n.get_metrics())
    }

    /// Text rendering of the DAG annotated with the last invocation's results
    pub fn visualize(&self) -> String {
        let last = self.get_metrics();
        visualize::render(&self.name, &self.topology, last.as_ref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fabric::InMemoryFabric;
    use crate::node::FnNode;
    use crate::workflow::metrics::NodeStatus;
    use serde_json::{json, Map, Value};

    /// Custom node adding `{name}: true` and recording what it saw
    fn marker(name: &'static str) -> Arc<dyn Node> {
        Arc::new(
            FnNode::new(name, move |state: State| async move {
                let mut out = Map::new();
                out.insert(name.to_string(), json!(state.keys().cloned().collect::<Vec<_>>()));
                Ok::<_, IevError>(out)
            })
            .produces([name]),
        )
    }

    fn failing(name: &'static str) -> Arc<dyn Node> {
        Arc::new(FnNode::new(name, move |_state: State| async move {
            Err::<Map<String, Value>, _>(IevError::execution(name, "provider down"))
        }))
    }

    fn input() -> State {
        State::new().with("event", json!("Patent X")).unwrap()
    }

    #[tokio::test]
    async fn test_linear_execution_threads_state() {
        let wf = Workflow::new(
            "linear",
            vec![marker("a"), marker("b"), marker("c")],
            [("a", "b"), ("b", "c")],
        )
        .unwrap();

        let result = wf.invoke(input()).await.unwrap();
        assert_eq!(result.get("a"), Some(&json!(["event"])));
        assert_eq!(result.get("b"), Some(&json!(["event", "a"])));
        assert_eq!(result.get("c"), Some(&json!(["event", "a", "b"])));
        assert_eq!(result.metrics.status, WorkflowStatus::Succeeded);
        assert_eq!(result.metrics.node("b").unwrap().keys_added, vec!["b".to_string()]);
    }

    #[tokio::test]
    async fn test_join_node_sees_both_branches() {
        let wf = Workflow::new(
            "diamond",
            vec![marker("root"), marker("left"), marker("right"), marker("join")],
            [("root", "left"), ("root", "right"), ("left", "join"), ("right", "join")],
        )
        .unwrap();

        let result = wf.invoke(input()).await.unwrap();
        let seen = result.get("join").and_then(Value::as_array).unwrap();
        assert!(seen.contains(&json!("left")));
        assert!(seen.contains(&json!("right")));
        assert_eq!(result.by_terminal.len(), 1);
    }

    #[tokio::test]
    async fn test_multiple_terminals() {
        let wf = Workflow::new(
            "fan-out",
            vec![marker("root"), marker("x"), marker("y")],
            [("root", "x"), ("root", "y")],
        )
        .unwrap();

        let result = wf.invoke(input()).await.unwrap();
        assert!(result.terminal("x").unwrap().contains_key("x"));
        assert!(!result.terminal("x").unwrap().contains_key("y"));
        assert!(result.state.contains_key("x") && result.state.contains_key("y"));
    }

    #[tokio::test]
    async fn test_failure_halts_with_partial_metrics() {
        let wf = Workflow::new(
            "failing",
            vec![marker("a"), failing("b"), marker("c")],
            [("a", "b"), ("b", "c")],
        )
        .unwrap();

        let err = wf.invoke(input()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Execution);
        assert_eq!(err.node(), Some("b"));
        assert_eq!(err.metrics.status, WorkflowStatus::Failed);
        assert_eq!(err.metrics.node("a").unwrap().status, NodeStatus::Succeeded);
        assert_eq!(err.metrics.node("c").unwrap().status, NodeStatus::NotRun);
        assert_eq!(wf.node_metrics("c").unwrap().status, NodeStatus::NotRun);
        assert_eq!(wf.node_metrics("b").unwrap().status, NodeStatus::Failed);
    }

    #[tokio::test]
    async fn test_precondition_checked_by_executor() {
        let needs = Arc::new(FnNode::new("needs", |_state: State| async move {
            Ok::<_, IevError>(Map::new())
        })
        .requires(["missing"])) as Arc<dyn Node>;
        let wf = Workflow::new("pre", vec![needs], Vec::<(String, String)>::new()).unwrap();

        let err = wf.invoke(input()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Precondition);
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let wf = Workflow::new("c", vec![marker("a"), marker("b")], [("a", "b")]).unwrap();
        let token = CancellationToken::new();
        token.cancel();

        let err = wf
            .invoke_with(input(), InvokeOptions::new().with_cancel(token))
            .await
            .unwrap_err();
        assert!(matches!(err.error, IevError::Cancelled { ref before } if before == "a"));
        assert_eq!(err.metrics.status, WorkflowStatus::Cancelled);
        assert!(err.metrics.nodes.iter().all(|m| !m.has_run()));
    }

    #[tokio::test]
    async fn test_timeout_at_node_boundary() {
        let slow = Arc::new(FnNode::new("slow", |_state: State| async move {
            tokio::time::sleep(Duration::from_millis(30)).await;
            let mut out = Map::new();
            out.insert("slow".to_string(), json!(true));
            Ok::<_, IevError>(out)
        })) as Arc<dyn Node>;
        let wf = Workflow::new("t", vec![slow, marker("after")], [("slow", "after")]).unwrap();

        let err = wf
            .invoke_with(input(), InvokeOptions::new().with_timeout(Duration::from_millis(5)))
            .await
            .unwrap_err();
        assert!(matches!(err.error, IevError::TimedOut { ref before, .. } if before == "after"));
        // The node already in flight was allowed to finish
        assert_eq!(err.metrics.node("slow").unwrap().status, NodeStatus::Succeeded);
    }

    #[test]
    fn test_cycle_rejected_at_construction() {
        let err = Workflow::new(
            "cyclic",
            vec![marker("a"), marker("b")],
            [("a", "b"), ("b", "a")],
        )
        .err()
        .unwrap();
        assert!(matches!(err, TopologyError::CircularDependency(_)));
    }

    #[tokio::test]
    async fn test_metrics_are_per_invocation() {
        let wf = Workflow::new("m", vec![marker("a")], Vec::<(&str, &str)>::new()).unwrap();
        assert!(wf.get_metrics().is_none());

        let first = wf
            .invoke_with(input(), InvokeOptions::new().with_invocation_id("one"))
            .await
            .unwrap();
        let second = wf
            .invoke_with(input(), InvokeOptions::new().with_invocation_id("two"))
            .await
            .unwrap();

        assert_eq!(first.metrics.invocation_id, "one");
        assert_eq!(second.metrics.invocation_id, "two");
        assert_eq!(wf.get_metrics().unwrap().invocation_id, "two");
        assert!(wf.visualize().contains("[a] ok"));
    }

    #[tokio::test]
    async fn test_outcome_recorded_in_fabric() {
        let fabric = InMemoryFabric::new();
        let wf = Workflow::new("f", vec![marker("a"), failing("b")], [("a", "b")])
            .unwrap()
            .with_fabric(Arc::new(fabric.clone()));

        let err = wf
            .invoke_with(input(), InvokeOptions::new().with_invocation_id("inv-1"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Execution);

        let outcome = fabric.outcome("inv-1").await.unwrap();
        assert_eq!(outcome.status, WorkflowStatus::Failed);
        assert_eq!(outcome.failed_node.as_deref(), Some("b"));
    }

    struct Clobber;

    #[async_trait::async_trait]
    impl Node for Clobber {
        fn name(&self) -> &str {
            "clobber"
        }

        fn description(&self) -> &str {
            "drops every key"
        }

        fn required_keys(&self) -> &[String] {
            &[]
        }

        fn output_keys(&self) -> &[String] {
            &[]
        }

        async fn execute(&self, _state: &State, _cx: &mut NodeContext) -> Result<State, IevError> {
            Ok(State::new())
        }
    }

    #[tokio::test]
    async fn test_dropping_keys_is_rejected() {
        let wf = Workflow::new("bad", vec![Arc::new(Clobber) as Arc<dyn Node>], Vec::<(&str, &str)>::new())
            .unwrap();
        let err = wf.invoke(input()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Execution);
        assert_eq!(err.node(), Some("clobber"));
    }
}
