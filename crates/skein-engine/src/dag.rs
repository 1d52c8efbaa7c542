use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap, HashSet};

use skein_core::error::{Result, SkeinError};
use skein_core::types::{AgentId, EdgeConfig, Workflow};

/// A node of the materialized dependency graph.
#[derive(Debug, Clone)]
pub struct DagNode {
    pub id: String,
    pub agent_id: AgentId,
    /// Upstream node ids, sorted lexicographically. The order is part of
    /// the input-aggregation contract.
    pub depends_on: Vec<String>,
    /// Downstream node ids, sorted lexicographically.
    pub downstream: Vec<String>,
}

/// The workflow as a directed acyclic graph.
///
/// Built eagerly from a workflow's node and edge lists; construction fails
/// fast on unknown edge endpoints and on cycles, and no partial graph is
/// ever returned. Immutable afterwards, so readers need no synchronization.
#[derive(Debug)]
pub struct Dag {
    nodes: HashMap<String, DagNode>,
    /// Verbatim copy of the workflow's edge list, reproduced in snapshots.
    edges: Vec<EdgeConfig>,
    in_degrees: HashMap<String, usize>,
}

impl Dag {
    /// Materialize the graph from workflow configuration.
    pub fn from_workflow(workflow: &Workflow) -> Result<Self> {
        let mut nodes: HashMap<String, DagNode> = HashMap::with_capacity(workflow.nodes.len());
        let mut in_degrees: HashMap<String, usize> = HashMap::with_capacity(workflow.nodes.len());

        for config in &workflow.nodes {
            if nodes.contains_key(&config.id) {
                return Err(SkeinError::InvalidGraph(format!(
                    "duplicate node id `{}`",
                    config.id
                )));
            }
            nodes.insert(
                config.id.clone(),
                DagNode {
                    id: config.id.clone(),
                    agent_id: config.agent_id.clone(),
                    depends_on: vec![],
                    downstream: vec![],
                },
            );
            in_degrees.insert(config.id.clone(), 0);
        }

        // Duplicate edges by (source, target) count once in the adjacency
        let mut seen: HashSet<(&str, &str)> = HashSet::with_capacity(workflow.edges.len());
        for edge in &workflow.edges {
            for endpoint in [&edge.source, &edge.target] {
                if !nodes.contains_key(endpoint) {
                    return Err(SkeinError::InvalidGraph(format!(
                        "edge `{}` references unknown node `{}`",
                        edge.id, endpoint
                    )));
                }
            }
            if !seen.insert((&edge.source, &edge.target)) {
                continue;
            }
            if let Some(source) = nodes.get_mut(&edge.source) {
                source.downstream.push(edge.target.clone());
            }
            if let Some(target) = nodes.get_mut(&edge.target) {
                target.depends_on.push(edge.source.clone());
            }
            if let Some(degree) = in_degrees.get_mut(&edge.target) {
                *degree += 1;
            }
        }

        for node in nodes.values_mut() {
            node.depends_on.sort();
            node.downstream.sort();
        }

        let dag = Self {
            nodes,
            edges: workflow.edges.clone(),
            in_degrees,
        };
        dag.validate()?;
        Ok(dag)
    }

    /// Reject cyclic graphs via depth-first traversal with two coloring
    /// (visited + on-current-path).
    fn validate(&self) -> Result<()> {
        let mut visited: HashSet<&str> = HashSet::with_capacity(self.nodes.len());
        let mut stack: HashSet<&str> = HashSet::new();

        let mut ids: Vec<&str> = self.nodes.keys().map(|s| s.as_str()).collect();
        ids.sort_unstable();

        for id in ids {
            if !visited.contains(id) && self.has_cycle(id, &mut visited, &mut stack) {
                return Err(SkeinError::CycleDetected);
            }
        }
        Ok(())
    }

    fn has_cycle<'a>(
        &'a self,
        id: &'a str,
        visited: &mut HashSet<&'a str>,
        stack: &mut HashSet<&'a str>,
    ) -> bool {
        visited.insert(id);
        stack.insert(id);

        if let Some(node) = self.nodes.get(id) {
            for next in &node.downstream {
                if !visited.contains(next.as_str()) {
                    if self.has_cycle(next, visited, stack) {
                        return true;
                    }
                } else if stack.contains(next.as_str()) {
                    return true;
                }
            }
        }

        stack.remove(id);
        false
    }

    /// Topological order via Kahn's algorithm.
    ///
    /// Ties between simultaneously ready nodes resolve lexicographically by
    /// node id, so the order is deterministic across runs; the snapshot's
    /// node ordering relies on this.
    pub fn topological_sort(&self) -> Vec<String> {
        let mut in_degrees = self.in_degrees.clone();
        let mut ready: BinaryHeap<Reverse<&str>> = self
            .in_degrees
            .iter()
            .filter(|(_, degree)| **degree == 0)
            .map(|(id, _)| Reverse(id.as_str()))
            .collect();

        let mut order = Vec::with_capacity(self.nodes.len());
        while let Some(Reverse(id)) = ready.pop() {
            order.push(id.to_string());
            if let Some(node) = self.nodes.get(id) {
                for next in &node.downstream {
                    if let Some(degree) = in_degrees.get_mut(next) {
                        *degree -= 1;
                        if *degree == 0 {
                            ready.push(Reverse(next.as_str()));
                        }
                    }
                }
            }
        }
        order
    }

    /// Every non-completed node whose entire dependency set is contained in
    /// `completed`. O(|V| + |E|) fallback; the scheduler's hot path walks
    /// downstream lists instead.
    pub fn ready_nodes(&self, completed: &HashSet<String>) -> Vec<String> {
        let mut ready: Vec<String> = self
            .nodes
            .values()
            .filter(|node| !completed.contains(&node.id))
            .filter(|node| node.depends_on.iter().all(|dep| completed.contains(dep)))
            .map(|node| node.id.clone())
            .collect();
        ready.sort();
        ready
    }

    /// Nodes with no dependencies, sorted lexicographically.
    pub fn entry_nodes(&self) -> Vec<String> {
        let mut entries: Vec<String> = self
            .in_degrees
            .iter()
            .filter(|(_, degree)| **degree == 0)
            .map(|(id, _)| id.clone())
            .collect();
        entries.sort();
        entries
    }

    pub fn node(&self, id: &str) -> Option<&DagNode> {
        self.nodes.get(id)
    }

    pub fn edges(&self) -> &[EdgeConfig] {
        &self.edges
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}
