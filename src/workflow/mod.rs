// SPDX-License-Identifier: MIT

//! Workflow module - DAG construction and execution
//!
//! This module provides:
//! - `Workflow` - validated node graph with sequential topological execution
//! - `Topology` - cycle, entry and reachability checks with a stable order
//! - `WorkflowMetrics` / `NodeMetrics` - per-invocation execution records

mod executor;
mod graph;
pub mod metrics;
mod visualize;

pub use executor::{FinalState, InvocationError, InvokeOptions, Workflow};
pub use graph::Topology;
pub use metrics::{NodeMetrics, NodeStatus, WorkflowMetrics, WorkflowStatus};
