// SPDX-License-Identifier: MIT

//! Workflow topology: validation and deterministic ordering
//!
//! Built once when a workflow is constructed. Checks run in this order so the
//! most specific error wins: empty graph, duplicate names, unknown endpoints,
//! self-loops, cycles, entry count.

use std::collections::{BTreeSet, HashMap, HashSet};

use crate::error::TopologyError;

/// Validated DAG over node names
#[derive(Debug, Clone, PartialEq)]
pub struct Topology {
    /// Names in registration order
    nodes: Vec<String>,
    edges: Vec<(String, String)>,
    /// Topological order; ties broken by registration order
    order: Vec<String>,
    predecessors: HashMap<String, Vec<String>>,
    successors: HashMap<String, Vec<String>>,
    entry: String,
    terminals: Vec<String>,
}

impl Topology {
    pub fn build(nodes: &[String], edges: &[(String, String)]) -> Result<Self, TopologyError> {
        if nodes.is_empty() {
            return Err(TopologyError::Empty);
        }

        let mut index: HashMap<&str, usize> = HashMap::with_capacity(nodes.len());
        for (i, name) in nodes.iter().enumerate() {
            if index.insert(name.as_str(), i).is_some() {
                return Err(TopologyError::DuplicateNode(name.clone()));
            }
        }

        let mut unique_edges: Vec<(String, String)> = Vec::with_capacity(edges.len());
        let mut seen: HashSet<(&str, &str)> = HashSet::new();
        for (from, to) in edges {
            for endpoint in [from, to] {
                if !index.contains_key(endpoint.as_str()) {
                    return Err(TopologyError::UnknownNode {
                        from: from.clone(),
                        to: to.clone(),
                        missing: endpoint.clone(),
                    });
                }
            }
            if from == to {
                return Err(TopologyError::SelfLoop(from.clone()));
            }
            if seen.insert((from.as_str(), to.as_str())) {
                unique_edges.push((from.clone(), to.clone()));
            }
        }

        let mut predecessors: HashMap<String, Vec<String>> =
            nodes.iter().map(|n| (n.clone(), Vec::new())).collect();
        let mut successors = predecessors.clone();
        for (from, to) in &unique_edges {
            if let Some(list) = successors.get_mut(from) {
                list.push(to.clone());
            }
            if let Some(list) = predecessors.get_mut(to) {
                list.push(from.clone());
            }
        }

        let order = kahn_order(nodes, &index, &predecessors, &successors)?;

        let entries: Vec<String> = nodes
            .iter()
            .filter(|n| predecessors.get(*n).map_or(true, |p| p.is_empty()))
            .cloned()
            .collect();
        let entry = match entries.as_slice() {
            [single] => single.clone(),
            _ => return Err(TopologyError::EntryNode(entries)),
        };

        let terminals = order
            .iter()
            .filter(|n| successors.get(*n).map_or(true, |s| s.is_empty()))
            .cloned()
            .collect();

        Ok(Self {
            nodes: nodes.to_vec(),
            edges: unique_edges,
            order,
            predecessors,
            successors,
            entry,
            terminals,
        })
    }

    pub fn nodes(&self) -> &[String] {
        &self.nodes
    }

    pub fn edges(&self) -> &[(String, String)] {
        &self.edges
    }

    pub fn order(&self) -> &[String] {
        &self.order
    }

    pub fn entry(&self) -> &str {
        &self.entry
    }

    /// Nodes without outgoing edges, in execution order
    pub fn terminals(&self) -> &[String] {
        &self.terminals
    }

    pub fn predecessors(&self, node: &str) -> &[String] {
        self.predecessors.get(node).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn successors(&self, node: &str) -> &[String] {
        self.successors.get(node).map(Vec::as_slice).unwrap_or(&[])
    }
}

/// Kahn's algorithm with a min-index ready set, so the order depends only on
/// registration order and edges
fn kahn_order(
    nodes: &[String],
    index: &HashMap<&str, usize>,
    predecessors: &HashMap<String, Vec<String>>,
    successors: &HashMap<String, Vec<String>>,
) -> Result<Vec<String>, TopologyError> {
    let mut in_degree: Vec<usize> = nodes
        .iter()
        .map(|n| predecessors.get(n).map_or(0, Vec::len))
        .collect();
    let mut ready: BTreeSet<usize> = in_degree
        .iter()
        .enumerate()
        .filter(|(_, d)| **d == 0)
        .map(|(i, _)| i)
        .collect();

    let mut order = Vec::with_capacity(nodes.len());
    while let Some(i) = ready.pop_first() {
        let name = &nodes[i];
        order.push(name.clone());
        for next in successors.get(name).into_iter().flatten() {
            if let Some(&j) = index.get(next.as_str()) {
                in_degree[j] -= 1;
                if in_degree[j] == 0 {
                    ready.insert(j);
                }
            }
        }
    }

    if order.len() == nodes.len() {
        return Ok(order);
    }

    let remaining: HashSet<usize> = (0..nodes.len()).filter(|&i| in_degree[i] > 0).collect();
    Err(TopologyError::CircularDependency(find_cycle(
        nodes,
        index,
        predecessors,
        &remaining,
    )))
}

/// One cycle among the nodes Kahn's algorithm could not order, as a closed
/// path `[a, b, ..., a]`
///
/// Every remaining node has a remaining predecessor, so walking backwards
/// must revisit a node.
fn find_cycle(
    nodes: &[String],
    index: &HashMap<&str, usize>,
    predecessors: &HashMap<String, Vec<String>>,
    remaining: &HashSet<usize>,
) -> Vec<String> {
    let Some(&start) = remaining.iter().min() else {
        return Vec::new();
    };

    let mut path: Vec<usize> = vec![start];
    let mut position: HashMap<usize, usize> = HashMap::from([(start, 0)]);
    let mut current = start;
    loop {
        let previous = predecessors
            .get(&nodes[current])
            .into_iter()
            .flatten()
            .filter_map(|p| index.get(p.as_str()).copied())
            .filter(|p| remaining.contains(p))
            .min();
        let Some(previous) = previous else {
            break;
        };
        if let Some(&at) = position.get(&previous) {
            // Forward direction, starting from the earliest registered node
            let mut cycle: Vec<usize> = path[at..].iter().rev().copied().collect();
            if let Some(lowest) = cycle.iter().enumerate().min_by_key(|(_, i)| **i).map(|(pos, _)| pos) {
                cycle.rotate_left(lowest);
            }
            if let Some(&first) = cycle.first() {
                cycle.push(first);
            }
            return cycle.iter().map(|&i| nodes[i].clone()).collect();
        }
        position.insert(previous, path.len());
        path.push(previous);
        current = previous;
    }
    path.iter().map(|&i| nodes[i].clone()).collect()
}
