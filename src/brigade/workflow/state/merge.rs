// SPDX-License-Identifier: MIT

//! Join semantics for parallel branches
//!
//! Each branch carries the state it produced plus its lineage, the set of
//! nodes that state has passed through. When two branches disagree on a
//! field, lineage decides: if one branch already saw the other's writer, its
//! value is the later one. Only writes that neither branch has seen from the
//! other are concurrent. Concurrent writes to an overwrite field must agree;
//! fields with any other reducer are combined through it.

use serde_json::Value;
use std::collections::{BTreeSet, HashMap};

use super::schema::ReducerType;
use super::store::{reduce, WorkflowState};
use crate::adk::error::FlowError;
use crate::brigade::workflow::graph::START;

/// State flowing along one taken edge
#[derive(Debug, Clone)]
pub struct Branch {
    /// Node that produced this state
    pub origin: String,
    pub state: WorkflowState,
    pub lineage: BTreeSet<String>,
}

impl Branch {
    /// The branch leaving the start marker
    pub fn root(state: WorkflowState) -> Self {
        Self {
            origin: START.to_string(),
            state,
            lineage: BTreeSet::from([START.to_string()]),
        }
    }

    /// Continue this lineage through `node`
    pub fn extend(&self, node: &str, state: WorkflowState) -> Self {
        let mut lineage = self.lineage.clone();
        lineage.insert(node.to_string());
        Self {
            origin: node.to_string(),
            state,
            lineage,
        }
    }
}

/// Merge the branches entering `join`, in edge declaration order.
pub fn merge_branches(join: &str, branches: Vec<Branch>) -> Result<Branch, FlowError> {
    let mut branches = branches.into_iter();
    let Some(mut acc) = branches.next() else {
        return Err(FlowError::NoTerminalState);
    };

    // which incoming branch the accumulated value of each field came from
    let mut sources: HashMap<String, String> = acc
        .state
        .keys()
        .map(|k| (k.clone(), acc.origin.clone()))
        .collect();

    for other in branches {
        for key in other.state.keys() {
            let Some(theirs) = other.state.get(key) else {
                continue;
            };
            let their_writer = other.state.writer_of(key).unwrap_or(START);

            let Some(ours) = acc.state.get(key) else {
                acc.state.adopt(key, theirs.clone(), their_writer);
                sources.insert(key.clone(), other.origin.clone());
                continue;
            };
            let our_writer = acc.state.writer_of(key).unwrap_or(START);

            if our_writer == their_writer || acc.lineage.contains(their_writer) {
                continue;
            }
            if other.lineage.contains(our_writer) {
                acc.state.adopt(key, theirs.clone(), their_writer);
                sources.insert(key.clone(), other.origin.clone());
                continue;
            }
            if ours == theirs {
                continue;
            }
            let reducer = acc.state.schema().reducer(key);
            if let Some(combined) = combine_concurrent(ours, theirs, reducer) {
                acc.state.adopt(key, combined, join);
                sources.insert(key.clone(), join.to_string());
                continue;
            }
            return Err(FlowError::MergeConflict {
                node: join.to_string(),
                field: key.clone(),
                left: sources
                    .get(key)
                    .cloned()
                    .unwrap_or_else(|| acc.origin.clone()),
                right: other.origin.clone(),
            });
        }
        acc.lineage.extend(other.lineage);
    }

    acc.origin = join.to_string();
    Ok(acc)
}

/// Combine two concurrent writes through `reducer`. Overwrite fields have no
/// combination, so they conflict.
fn combine_concurrent(ours: &Value, theirs: &Value, reducer: ReducerType) -> Option<Value> {
    match (reducer, ours, theirs) {
        // both sides extended the same inherited list: keep the shared front
        // once and add what the other branch appended
        (ReducerType::Append, Value::Array(a), Value::Array(b)) => {
            let shared = a.iter().zip(b).take_while(|(x, y)| x == y).count();
            Some(reduce(Some(ours), Value::Array(b[shared..].to_vec()), reducer))
        }
        (ReducerType::Max | ReducerType::Min, Value::Number(_), Value::Number(_))
        | (ReducerType::Merge, Value::Object(_), Value::Object(_)) => {
            Some(reduce(Some(ours), theirs.clone(), reducer))
        }
        _ => None,
    }
}
