// SPDX-License-Identifier: MIT

//! Graph workflow executor
//!
//! Runs in supersteps. Each iteration collects the nodes whose incoming
//! edges are all resolved, runs them concurrently on their own snapshots,
//! waits for every one of them, then applies their updates and resolves
//! their outgoing edges in declaration order. A node whose incoming edges
//! were all skipped by routing is skipped in turn.
//!
//! A failed node poisons its outgoing edges and everything downstream of
//! them, but sibling branches keep running until nothing else is runnable.
//! The run then reports the first failure, in the order the branches were
//! declared.

use futures::future::join_all;
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::AbortHandle;

use super::types::{Graph, Guard, NodeSpec, END, START};
use crate::adk::error::{FlowError, NodeError};
use crate::brigade::workflow::state::{merge_branches, Branch, StateUpdate, WorkflowState};

/// Progress notifications published while a run executes
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum RunEvent {
    NodeStarted { node: String },
    NodeCompleted { node: String, update: Value },
    NodeSkipped { node: String },
    NodeFailed { node: String, error: String },
    RouteChosen { node: String, label: String, target: String },
    RunFinished { state: Value },
    RunFailed { error: String },
}

/// A run that stopped on an error, with the last state it reached
#[derive(Debug)]
pub struct Halted {
    pub error: FlowError,
    pub state: WorkflowState,
}

#[derive(Debug, Clone)]
enum Slot {
    Pending,
    Taken(Branch),
    Skipped,
    /// Downstream of a failed node
    Poisoned,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum NodeStatus {
    Waiting,
    Done,
    Skipped,
    Failed,
}

/// Executes a compiled graph against an initial state
pub struct Executor<'g> {
    graph: &'g Graph,
    events: Option<mpsc::Sender<RunEvent>>,
}

impl<'g> Executor<'g> {
    pub fn new(graph: &'g Graph) -> Self {
        Self {
            graph,
            events: None,
        }
    }

    /// Publish `RunEvent`s on `tx` while running
    pub fn with_events(mut self, tx: mpsc::Sender<RunEvent>) -> Self {
        self.events = Some(tx);
        self
    }

    async fn emit(&self, event: RunEvent) {
        if let Some(tx) = &self.events {
            // a closed receiver only means nobody is listening
            let _ = tx.send(event).await;
        }
    }

    /// Run the graph to completion
    pub async fn run(&self, initial: WorkflowState) -> Result<WorkflowState, Halted> {
        let mut latest = initial.clone();
        match self.drive(initial, &mut latest).await {
            Ok(state) => {
                self.emit(RunEvent::RunFinished {
                    state: state.to_json(),
                })
                .await;
                Ok(state)
            }
            Err(error) => {
                log::error!("Graph run failed: {}", error);
                self.emit(RunEvent::RunFailed {
                    error: error.to_string(),
                })
                .await;
                Err(Halted {
                    error,
                    state: latest,
                })
            }
        }
    }

    async fn drive(
        &self,
        initial: WorkflowState,
        latest: &mut WorkflowState,
    ) -> Result<WorkflowState, FlowError> {
        let graph = self.graph;
        let mut slots = vec![Slot::Pending; graph.edges().len()];
        let mut status: HashMap<&str, NodeStatus> = graph
            .nodes()
            .iter()
            .map(|n| (n.id.as_str(), NodeStatus::Waiting))
            .collect();

        let root = Branch::root(initial);
        for &e in graph.outgoing(START) {
            slots[e] = match &graph.edges()[e].guard {
                Guard::When(predicate) if !predicate(&root.state) => Slot::Skipped,
                _ => Slot::Taken(root.clone()),
            };
        }

        let mut failure: Option<FlowError> = None;
        let mut iteration = 0;
        loop {
            let resolved: Vec<&NodeSpec> = graph
                .nodes()
                .iter()
                .filter(|n| status[n.id.as_str()] == NodeStatus::Waiting)
                .filter(|n| {
                    graph
                        .incoming(&n.id)
                        .iter()
                        .all(|&e| !matches!(slots[e], Slot::Pending))
                })
                .collect();

            if resolved.is_empty() {
                break;
            }

            let (poisoned, rest): (Vec<&NodeSpec>, Vec<&NodeSpec>) =
                resolved.into_iter().partition(|n| {
                    graph
                        .incoming(&n.id)
                        .iter()
                        .any(|&e| matches!(slots[e], Slot::Poisoned))
                });
            let (dead, mut ready): (Vec<&NodeSpec>, Vec<&NodeSpec>) =
                rest.into_iter().partition(|n| {
                    graph
                        .incoming(&n.id)
                        .iter()
                        .all(|&e| matches!(slots[e], Slot::Skipped))
                });

            for node in poisoned {
                log::debug!("Not running node {}: an upstream node failed", node.id);
                for &e in graph.outgoing(&node.id) {
                    slots[e] = Slot::Poisoned;
                }
                status.insert(node.id.as_str(), NodeStatus::Skipped);
                self.emit(RunEvent::NodeSkipped {
                    node: node.id.clone(),
                })
                .await;
            }

            for node in dead {
                log::debug!("Skipping node {}: every incoming edge was skipped", node.id);
                for &e in graph.outgoing(&node.id) {
                    slots[e] = Slot::Skipped;
                }
                status.insert(node.id.as_str(), NodeStatus::Skipped);
                self.emit(RunEvent::NodeSkipped {
                    node: node.id.clone(),
                })
                .await;
            }

            // branch declaration order: the earliest edge that delivered state
            ready.sort_by_key(|n| {
                graph
                    .incoming(&n.id)
                    .iter()
                    .copied()
                    .filter(|&e| matches!(slots[e], Slot::Taken(_)))
                    .min()
                    .unwrap_or(usize::MAX)
            });

            if ready.is_empty() {
                continue;
            }

            iteration += 1;
            log::info!(
                "Graph iteration {}: executing {} nodes: {:?}",
                iteration,
                ready.len(),
                ready.iter().map(|n| n.id.as_str()).collect::<Vec<_>>()
            );

            let mut inputs = Vec::with_capacity(ready.len());
            for node in &ready {
                let taken: Vec<Branch> = graph
                    .incoming(&node.id)
                    .iter()
                    .filter_map(|&e| match &slots[e] {
                        Slot::Taken(branch) => Some(branch.clone()),
                        _ => None,
                    })
                    .collect();
                inputs.push(merge_branches(&node.id, taken)?);
            }

            let mut handles = Vec::with_capacity(ready.len());
            for (node, input) in ready.iter().zip(&inputs) {
                self.emit(RunEvent::NodeStarted {
                    node: node.id.clone(),
                })
                .await;
                handles.push(self.spawn_node(node, input.state.clone()));
            }
            let _abort = AbortOnDrop(handles.iter().map(|h| h.abort_handle()).collect());
            let results = join_all(handles).await;

            // every sibling has finished; failed nodes poison what follows them
            let mut updates = Vec::with_capacity(results.len());
            for (node, (joined, input)) in ready.iter().zip(results.into_iter().zip(&inputs)) {
                let result = joined.unwrap_or_else(|e| {
                    Err(NodeError::fatal(format!("node task aborted: {}", e)))
                });
                match result {
                    Ok(update) => updates.push(Some(update)),
                    Err(source) => {
                        log::error!("Node {} failed: {}", node.id, source);
                        self.emit(RunEvent::NodeFailed {
                            node: node.id.clone(),
                            error: source.to_string(),
                        })
                        .await;
                        for &e in graph.outgoing(&node.id) {
                            slots[e] = Slot::Poisoned;
                        }
                        status.insert(node.id.as_str(), NodeStatus::Failed);
                        if failure.is_none() {
                            *latest = input.state.clone();
                            failure = Some(FlowError::Node {
                                node: node.id.clone(),
                                source,
                            });
                        }
                        updates.push(None);
                    }
                }
            }

            for ((node, input), update) in ready.iter().zip(inputs).zip(updates) {
                let Some(update) = update else {
                    continue;
                };
                let mut state = input.state.clone();
                state
                    .apply(&update, &node.id)
                    .map_err(|source| FlowError::State {
                        node: node.id.clone(),
                        source,
                    })?;
                *latest = state.clone();

                let branch = input.extend(&node.id, state);
                self.resolve_edges(node, &branch, &mut slots).await?;

                status.insert(node.id.as_str(), NodeStatus::Done);
                log::info!("Node {} completed", node.id);
                self.emit(RunEvent::NodeCompleted {
                    node: node.id.clone(),
                    update: update.to_json(),
                })
                .await;
            }
        }

        if let Some(error) = failure {
            return Err(error);
        }

        let finished: Vec<Branch> = graph
            .incoming(END)
            .iter()
            .filter_map(|&e| match &slots[e] {
                Slot::Taken(branch) => Some(branch.clone()),
                _ => None,
            })
            .collect();

        if finished.is_empty() {
            return Err(FlowError::NoTerminalState);
        }
        let merged = merge_branches(END, finished)?;
        *latest = merged.state.clone();
        Ok(merged.state)
    }

    fn spawn_node(
        &self,
        node: &NodeSpec,
        state: WorkflowState,
    ) -> tokio::task::JoinHandle<Result<StateUpdate, NodeError>> {
        let work = node.work.clone();
        let limit = node.timeout.or(self.graph.default_timeout());
        let fatal = node.timeout_is_fatal;

        tokio::spawn(async move {
            let run = work.run(&state);
            let Some(limit) = limit else {
                return run.await;
            };
            match tokio::time::timeout(limit, run).await {
                Ok(result) => result,
                Err(_) if fatal => Err(timeout_as_fatal(limit)),
                Err(_) => Err(NodeError::Timeout(limit)),
            }
        })
    }

    /// Mark the outgoing edges of a finished node as taken or skipped
    async fn resolve_edges(
        &self,
        node: &NodeSpec,
        branch: &Branch,
        slots: &mut [Slot],
    ) -> Result<(), FlowError> {
        let graph = self.graph;
        let outgoing = graph.outgoing(&node.id);

        if let Some(route) = &node.route {
            let label = branch
                .state
                .get_str(&route.field)
                .unwrap_or_default()
                .to_string();
            let chosen = outgoing
                .iter()
                .copied()
                .find(|&e| graph.edges()[e].guard.label() == Some(label.as_str()))
                .ok_or_else(|| FlowError::Routing {
                    node: node.id.clone(),
                    label: label.clone(),
                })?;

            for &e in outgoing {
                slots[e] = if e == chosen {
                    Slot::Taken(branch.clone())
                } else {
                    Slot::Skipped
                };
            }

            let target = graph.edges()[chosen].to.clone();
            log::info!("Router {} chose '{}' -> {}", node.id, label, target);
            self.emit(RunEvent::RouteChosen {
                node: node.id.clone(),
                label,
                target,
            })
            .await;
            return Ok(());
        }

        let mut any_taken = false;
        for &e in outgoing {
            let take = match &graph.edges()[e].guard {
                Guard::Always => true,
                Guard::When(predicate) => predicate(&branch.state),
                // rejected at compile time
                Guard::Route(_) => false,
            };
            slots[e] = if take {
                any_taken = true;
                Slot::Taken(branch.clone())
            } else {
                Slot::Skipped
            };
        }

        if !any_taken {
            return Err(FlowError::DeadEnd {
                node: node.id.clone(),
            });
        }
        Ok(())
    }
}

/// Aborts the node tasks of a superstep if the run is dropped before they
/// finish. Aborting a finished task does nothing.
struct AbortOnDrop(Vec<AbortHandle>);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        for handle in &self.0 {
            handle.abort();
        }
    }
}

fn timeout_as_fatal(limit: Duration) -> NodeError {
    NodeError::Fatal {
        message: format!("timed out after {:?}", limit),
        diagnostic: json!({ "timeout_ms": limit.as_millis() as u64 }),
    }
}

/// Run `graph` from `initial` without event reporting
pub async fn execute(graph: &Graph, initial: WorkflowState) -> Result<WorkflowState, FlowError> {
    Executor::new(graph).run(initial).await.map_err(|h| h.error)
}
