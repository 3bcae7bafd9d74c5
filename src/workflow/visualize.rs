// SPDX-License-Identifier: MIT

//! Plain-text DAG rendering with per-node status from the last invocation

use super::graph::Topology;
use super::metrics::{NodeMetrics, NodeStatus, WorkflowMetrics};

pub(crate) fn render(name: &str, topology: &Topology, last: Option<&WorkflowMetrics>) -> String {
    let mut lines = vec![match last {
        Some(metrics) => format!(
            "Workflow: {} ({} nodes, last run {:?} in {} ms)",
            name,
            topology.order().len(),
            metrics.status,
            metrics.total_duration_ms
        ),
        None => format!("Workflow: {} ({} nodes, not yet run)", name, topology.order().len()),
    }];

    for node in topology.order() {
        let mut line = format!("  [{}] {}", node, annotation(last.and_then(|m| m.node(node))));
        if node == topology.entry() {
            line.push_str("  (entry)");
        }
        if topology.successors(node).is_empty() {
            line.push_str("  (terminal)");
        }
        lines.push(line);
        for next in topology.successors(node) {
            lines.push(format!("     └─> {}", next));
        }
    }
    lines.join("\n")
}

fn annotation(metrics: Option<&NodeMetrics>) -> String {
    let Some(m) = metrics else {
        return "pending".to_string();
    };
    let mut text = match m.status {
        NodeStatus::NotRun => return "not run".to_string(),
        NodeStatus::Succeeded => format!("ok {} ms", m.duration_ms),
        NodeStatus::Failed => format!("FAILED {} ms", m.duration_ms),
    };
    if !m.warnings.is_empty() {
        let plural = if m.warnings.len() == 1 { "" } else { "s" };
        text.push_str(&format!(", {} warning{}", m.warnings.len(), plural));
    }
    if let Some(kind) = m.error_kind {
        text.push_str(&format!(", {:?} error", kind));
    }
    text
}
