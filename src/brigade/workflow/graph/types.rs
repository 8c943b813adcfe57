// SPDX-License-Identifier: MIT

//! Graph workflow type definitions
//!
//! Nodes carry a `Work` implementation plus scheduling metadata. Edges carry
//! a guard: always taken, taken when a predicate holds, or taken when the
//! source router selected the edge's label.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use crate::adk::error::NodeError;
use crate::brigade::workflow::state::{StateUpdate, WorkflowState};

/// Marker for the entry of every graph
pub const START: &str = "__start__";
/// Marker for the exit of every graph
pub const END: &str = "__end__";

/// The unit of work behind a node
#[async_trait]
pub trait Work: Send + Sync {
    async fn run(&self, state: &WorkflowState) -> Result<StateUpdate, NodeError>;
}

/// Synchronous closure adapter, see [`work_fn`]
pub struct FnWork<F>(F);

#[async_trait]
impl<F> Work for FnWork<F>
where
    F: Fn(&WorkflowState) -> Result<StateUpdate, NodeError> + Send + Sync,
{
    async fn run(&self, state: &WorkflowState) -> Result<StateUpdate, NodeError> {
        (self.0)(state)
    }
}

/// Wrap a plain function as node work
pub fn work_fn<F>(f: F) -> Arc<dyn Work>
where
    F: Fn(&WorkflowState) -> Result<StateUpdate, NodeError> + Send + Sync + 'static,
{
    Arc::new(FnWork(f))
}

/// Async closure adapter, see [`async_work_fn`]
pub struct AsyncFnWork<F>(F);

#[async_trait]
impl<F, Fut> Work for AsyncFnWork<F>
where
    F: Fn(WorkflowState) -> Fut + Send + Sync,
    Fut: Future<Output = Result<StateUpdate, NodeError>> + Send,
{
    async fn run(&self, state: &WorkflowState) -> Result<StateUpdate, NodeError> {
        (self.0)(state.clone()).await
    }
}

/// Wrap an async closure as node work. The closure receives its own copy of
/// the input snapshot.
pub fn async_work_fn<F, Fut>(f: F) -> Arc<dyn Work>
where
    F: Fn(WorkflowState) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<StateUpdate, NodeError>> + Send + 'static,
{
    Arc::new(AsyncFnWork(f))
}

/// Work that writes nothing
pub struct Passthrough;

#[async_trait]
impl Work for Passthrough {
    async fn run(&self, _state: &WorkflowState) -> Result<StateUpdate, NodeError> {
        Ok(StateUpdate::new())
    }
}

/// Role of a node in the graph
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    Task,
    Router,
    Join,
    Gate,
    Supervisor,
}

/// How a router picks its outgoing edge: the string value of `field` in
/// the state the router produced must be one of `labels`.
#[derive(Debug, Clone, PartialEq)]
pub struct RouteSpec {
    pub field: String,
    pub labels: Vec<String>,
}

/// A node before compilation
#[derive(Clone)]
pub struct NodeSpec {
    pub id: String,
    pub kind: NodeKind,
    pub work: Arc<dyn Work>,
    pub route: Option<RouteSpec>,
    /// Overrides the graph-wide default
    pub timeout: Option<Duration>,
    /// Treat a timeout as fatal instead of retryable
    pub timeout_is_fatal: bool,
}

impl NodeSpec {
    pub fn new(id: &str, kind: NodeKind, work: Arc<dyn Work>) -> Self {
        Self {
            id: id.to_string(),
            kind,
            work,
            route: None,
            timeout: None,
            timeout_is_fatal: false,
        }
    }

    pub fn task(id: &str, work: Arc<dyn Work>) -> Self {
        Self::new(id, NodeKind::Task, work)
    }

    /// A node that waits for several branches and merges them
    pub fn join(id: &str, work: Arc<dyn Work>) -> Self {
        Self::new(id, NodeKind::Join, work)
    }

    /// A node whose outgoing edge is selected by the value of `field`
    pub fn router(id: &str, work: Arc<dyn Work>, field: &str, labels: &[&str]) -> Self {
        Self::new(id, NodeKind::Router, work).routed_by(field, labels)
    }

    pub fn routed_by(mut self, field: &str, labels: &[&str]) -> Self {
        self.route = Some(RouteSpec {
            field: field.to_string(),
            labels: labels.iter().map(|l| l.to_string()).collect(),
        });
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn fatal_on_timeout(mut self) -> Self {
        self.timeout_is_fatal = true;
        self
    }

    pub fn is_router(&self) -> bool {
        self.route.is_some()
    }
}

impl fmt::Debug for NodeSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeSpec")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("route", &self.route)
            .field("timeout", &self.timeout)
            .finish()
    }
}

pub type Predicate = Arc<dyn Fn(&WorkflowState) -> bool + Send + Sync>;

/// Condition under which an edge is taken
#[derive(Clone)]
pub enum Guard {
    Always,
    When(Predicate),
    Route(String),
}

impl Guard {
    pub fn label(&self) -> Option<&str> {
        match self {
            Guard::Route(label) => Some(label),
            _ => None,
        }
    }
}

impl fmt::Debug for Guard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Guard::Always => write!(f, "Always"),
            Guard::When(_) => write!(f, "When(..)"),
            Guard::Route(label) => write!(f, "Route({label})"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Edge {
    pub from: String,
    pub to: String,
    pub guard: Guard,
}

/// A validated, immutable graph. Build one with `GraphBuilder`.
pub struct Graph {
    pub(super) nodes: Vec<NodeSpec>,
    pub(super) index: HashMap<String, usize>,
    pub(super) edges: Vec<Edge>,
    pub(super) outgoing: HashMap<String, Vec<usize>>,
    pub(super) incoming: HashMap<String, Vec<usize>>,
    pub(super) default_timeout: Option<Duration>,
    pub(super) warnings: Vec<String>,
}

impl Graph {
    /// Nodes in declaration order
    pub fn nodes(&self) -> &[NodeSpec] {
        &self.nodes
    }

    pub fn node(&self, id: &str) -> Option<&NodeSpec> {
        self.index.get(id).map(|&i| &self.nodes[i])
    }

    /// Edges in declaration order
    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    /// Indices into `edges()` leaving `id`
    pub fn outgoing(&self, id: &str) -> &[usize] {
        self.outgoing.get(id).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Indices into `edges()` entering `id`
    pub fn incoming(&self, id: &str) -> &[usize] {
        self.incoming.get(id).map(Vec::as_slice).unwrap_or(&[])
    }

    /// `(label, target)` pairs of a router, in declaration order
    pub fn routes(&self, id: &str) -> Vec<(&str, &str)> {
        self.outgoing(id)
            .iter()
            .filter_map(|&e| {
                let edge = &self.edges[e];
                edge.guard.label().map(|l| (l, edge.to.as_str()))
            })
            .collect()
    }

    pub fn default_timeout(&self) -> Option<Duration> {
        self.default_timeout
    }

    /// Non-fatal findings from compilation, such as unreachable nodes
    pub fn warnings(&self) -> &[String] {
        &self.warnings
    }
}

impl fmt::Debug for Graph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Graph")
            .field("nodes", &self.nodes)
            .field("edges", &self.edges)
            .finish()
    }
}
