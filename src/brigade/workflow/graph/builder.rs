// SPDX-License-Identifier: MIT

//! Graph builder - collects nodes and edges and validates them into a `Graph`

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use super::types::{Edge, Graph, Guard, NodeSpec, END, START};
use crate::adk::error::GraphError;
use crate::brigade::workflow::state::WorkflowState;

/// Collects nodes and edges; `compile` checks the structural invariants.
#[derive(Default)]
pub struct GraphBuilder {
    nodes: Vec<NodeSpec>,
    edges: Vec<Edge>,
    default_timeout: Option<Duration>,
}

impl GraphBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_node(&mut self, node: NodeSpec) -> &mut Self {
        self.nodes.push(node);
        self
    }

    /// Unconditional edge
    pub fn add_edge(&mut self, from: &str, to: &str) -> &mut Self {
        self.push_edge(from, to, Guard::Always)
    }

    /// Edge taken only when `predicate` holds for the state `from` produced
    pub fn add_conditional_edge<P>(&mut self, from: &str, to: &str, predicate: P) -> &mut Self
    where
        P: Fn(&WorkflowState) -> bool + Send + Sync + 'static,
    {
        self.push_edge(from, to, Guard::When(Arc::new(predicate)))
    }

    /// Router edge selected by `label`
    pub fn add_route(&mut self, from: &str, label: &str, to: &str) -> &mut Self {
        self.push_edge(from, to, Guard::Route(label.to_string()))
    }

    /// Timeout for nodes that don't set their own
    pub fn default_timeout(&mut self, timeout: Duration) -> &mut Self {
        self.default_timeout = Some(timeout);
        self
    }

    fn push_edge(&mut self, from: &str, to: &str, guard: Guard) -> &mut Self {
        self.edges.push(Edge {
            from: from.to_string(),
            to: to.to_string(),
            guard,
        });
        self
    }

    /// Validate and freeze the graph
    pub fn compile(self) -> Result<Graph, GraphError> {
        let mut index = HashMap::new();
        for (i, node) in self.nodes.iter().enumerate() {
            if node.id == START || node.id == END {
                return Err(GraphError::ReservedId(node.id.clone()));
            }
            if index.insert(node.id.clone(), i).is_some() {
                return Err(GraphError::DuplicateNode(node.id.clone()));
            }
        }

        let mut outgoing: HashMap<String, Vec<usize>> = HashMap::new();
        let mut incoming: HashMap<String, Vec<usize>> = HashMap::new();
        for (i, edge) in self.edges.iter().enumerate() {
            if edge.from == END || edge.to == START {
                return Err(GraphError::MisplacedMarker(format!(
                    "{} -> {}",
                    edge.from, edge.to
                )));
            }
            if edge.from != START && !index.contains_key(&edge.from) {
                return Err(GraphError::UnknownNode(edge.from.clone()));
            }
            if edge.to != END && !index.contains_key(&edge.to) {
                return Err(GraphError::UnknownNode(edge.to.clone()));
            }
            outgoing.entry(edge.from.clone()).or_default().push(i);
            incoming.entry(edge.to.clone()).or_default().push(i);
        }

        if outgoing.get(START).map_or(true, Vec::is_empty) {
            return Err(GraphError::NoEntry);
        }
        if let Some(&e) = outgoing
            .get(START)
            .and_then(|out| out.iter().find(|&&e| self.edges[e].guard.label().is_some()))
        {
            return Err(GraphError::LabelOnNonRouter(self.edges[e].from.clone()));
        }

        for node in &self.nodes {
            let out = outgoing.get(&node.id).map(Vec::as_slice).unwrap_or(&[]);
            if out.is_empty() {
                return Err(GraphError::NoExit(node.id.clone()));
            }
            check_routes(node, out, &self.edges)?;
        }

        if let Some(cycle) = find_cycle(&self.nodes, &self.edges, &outgoing) {
            return Err(GraphError::Cycle(cycle));
        }

        let warnings = unreachable_nodes(&self.nodes, &self.edges, &outgoing)
            .into_iter()
            .map(|id| {
                log::warn!("Node '{}' is unreachable from the start marker", id);
                format!("node '{}' is unreachable", id)
            })
            .collect();

        Ok(Graph {
            nodes: self.nodes,
            index,
            edges: self.edges,
            outgoing,
            incoming,
            default_timeout: self.default_timeout,
            warnings,
        })
    }
}

/// Labeled edges only leave routers, and a router's labels map one-to-one
/// onto its edges.
fn check_routes(node: &NodeSpec, out: &[usize], edges: &[Edge]) -> Result<(), GraphError> {
    let Some(route) = &node.route else {
        if out.iter().any(|&e| edges[e].guard.label().is_some()) {
            return Err(GraphError::LabelOnNonRouter(node.id.clone()));
        }
        return Ok(());
    };

    let mut seen = HashSet::new();
    for &e in out {
        let Some(label) = edges[e].guard.label() else {
            return Err(GraphError::UnlabeledRouterEdge(node.id.clone()));
        };
        if !route.labels.iter().any(|l| l == label) {
            return Err(GraphError::UndeclaredRoute {
                node: node.id.clone(),
                label: label.to_string(),
            });
        }
        if !seen.insert(label) {
            return Err(GraphError::DuplicateRoute {
                node: node.id.clone(),
                label: label.to_string(),
            });
        }
    }

    if let Some(missing) = route.labels.iter().find(|l| !seen.contains(l.as_str())) {
        return Err(GraphError::MissingRoute {
            node: node.id.clone(),
            label: missing.clone(),
        });
    }
    Ok(())
}

/// Depth-first search for a back edge; returns the cycle's node path
fn find_cycle(
    nodes: &[NodeSpec],
    edges: &[Edge],
    outgoing: &HashMap<String, Vec<usize>>,
) -> Option<Vec<String>> {
    #[derive(Clone, Copy, PartialEq)]
    enum Mark {
        Unvisited,
        OnStack,
        Done,
    }

    fn visit<'a>(
        id: &'a str,
        edges: &'a [Edge],
        outgoing: &'a HashMap<String, Vec<usize>>,
        marks: &mut HashMap<&'a str, Mark>,
        stack: &mut Vec<&'a str>,
    ) -> Option<Vec<String>> {
        marks.insert(id, Mark::OnStack);
        stack.push(id);

        for &e in outgoing.get(id).map(Vec::as_slice).unwrap_or(&[]) {
            let next = edges[e].to.as_str();
            if next == END {
                continue;
            }
            match marks.get(next).copied().unwrap_or(Mark::Unvisited) {
                Mark::OnStack => {
                    let pos = stack.iter().position(|n| *n == next).unwrap_or(0);
                    let mut cycle: Vec<String> =
                        stack[pos..].iter().map(|s| s.to_string()).collect();
                    cycle.push(next.to_string());
                    return Some(cycle);
                }
                Mark::Unvisited => {
                    if let Some(cycle) = visit(next, edges, outgoing, marks, stack) {
                        return Some(cycle);
                    }
                }
                Mark::Done => {}
            }
        }

        stack.pop();
        marks.insert(id, Mark::Done);
        None
    }

    let mut marks: HashMap<&str, Mark> = HashMap::new();
    for node in nodes {
        if marks.get(node.id.as_str()).copied().unwrap_or(Mark::Unvisited) == Mark::Unvisited {
            let mut stack = Vec::new();
            if let Some(cycle) = visit(&node.id, edges, outgoing, &mut marks, &mut stack) {
                return Some(cycle);
            }
        }
    }
    None
}

fn unreachable_nodes(
    nodes: &[NodeSpec],
    edges: &[Edge],
    outgoing: &HashMap<String, Vec<usize>>,
) -> Vec<String> {
    let mut reached: HashSet<&str> = HashSet::from([START]);
    let mut queue = VecDeque::from([START]);
    while let Some(id) = queue.pop_front() {
        for &e in outgoing.get(id).map(Vec::as_slice).unwrap_or(&[]) {
            let next = edges[e].to.as_str();
            if reached.insert(next) {
                queue.push_back(next);
            }
        }
    }

    nodes
        .iter()
        .filter(|n| !reached.contains(n.id.as_str()))
        .map(|n| n.id.clone())
        .collect()
}
