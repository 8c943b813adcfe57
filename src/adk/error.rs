// SPDX-License-Identifier: MIT

//! Typed error handling for brigade-rs
//!
//! The engine distinguishes errors that end a run (routing, merge, dead ends,
//! fatal node failures) from failures a supervisor is allowed to absorb
//! (retryable node failures and timeouts). Everything here is built with
//! thiserror; the binary wraps it in anyhow at the top level.

use serde_json::Value;
use std::time::Duration;
use thiserror::Error;

use crate::brigade::workflow::state::FieldType;

/// Top-level error type for brigade-rs
#[derive(Debug, Error)]
pub enum BrigadeError {
    /// Configuration errors (missing env vars, invalid config)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Unknown workflow name
    #[error("Workflow '{name}' not found")]
    WorkflowNotFound { name: String },

    /// Graph construction or execution errors
    #[error("Workflow error: {0}")]
    Flow(#[from] FlowError),

    /// Graph validation errors
    #[error("Graph error: {0}")]
    Graph(#[from] GraphError),

    /// Text generation errors
    #[error("Model error: {0}")]
    Model(#[from] ModelError),

    /// I/O errors
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error(transparent)]
    Json(#[from] serde_json::Error),

    /// YAML parsing errors
    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),

    /// HTTP request errors
    #[error(transparent)]
    Http(#[from] reqwest::Error),

    /// Generic error wrapper
    #[error("{0}")]
    Other(String),
}

impl BrigadeError {
    /// Create a config error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Create a workflow not found error
    pub fn workflow_not_found(name: impl Into<String>) -> Self {
        Self::WorkflowNotFound { name: name.into() }
    }

    /// Create from a generic error
    pub fn other(message: impl Into<String>) -> Self {
        Self::Other(message.into())
    }
}

impl From<&str> for BrigadeError {
    fn from(s: &str) -> Self {
        Self::Other(s.to_string())
    }
}

impl From<String> for BrigadeError {
    fn from(s: String) -> Self {
        Self::Other(s)
    }
}

/// Errors that end a workflow run
#[derive(Debug, Error)]
pub enum FlowError {
    /// A router produced a label with no matching edge
    #[error("Routing error at node '{node}': no edge for label '{label}'")]
    Routing { node: String, label: String },

    /// Two joined branches wrote the same field with different values
    #[error(
        "Merge conflict at node '{node}': field '{field}' written differently by '{left}' and '{right}'"
    )]
    MergeConflict {
        node: String,
        field: String,
        left: String,
        right: String,
    },

    /// A node failed and nothing absorbed the failure
    #[error("Node '{node}' failed: {source}")]
    Node {
        node: String,
        #[source]
        source: NodeError,
    },

    /// A completed node had no outgoing edge whose guard held
    #[error("Node '{node}' has no satisfiable outgoing edge")]
    DeadEnd { node: String },

    /// No branch reached the end marker
    #[error("No branch reached the end of the graph")]
    NoTerminalState,

    /// State could not accept a node's output
    #[error("Node '{node}' produced invalid state: {source}")]
    State {
        node: String,
        #[source]
        source: StateError,
    },
}

/// Failures reported by a node's work function
#[derive(Debug, Error)]
pub enum NodeError {
    /// Recoverable fault, e.g. a measurement outside tolerance
    #[error("retryable failure: {message}")]
    Retryable { message: String, diagnostic: Value },

    /// Explicitly non-recoverable fault
    #[error("fatal failure: {message}")]
    Fatal { message: String, diagnostic: Value },

    /// The node exceeded its time budget
    #[error("timed out after {0:?}")]
    Timeout(Duration),

    /// The node could not read or build state
    #[error(transparent)]
    State(#[from] StateError),

    /// The gate could not obtain a decision
    #[error(transparent)]
    Approval(#[from] ApprovalError),
}

impl NodeError {
    /// Create a retryable failure with no diagnostic payload
    pub fn retryable(message: impl Into<String>) -> Self {
        Self::Retryable {
            message: message.into(),
            diagnostic: Value::Null,
        }
    }

    /// Create a fatal failure with no diagnostic payload
    pub fn fatal(message: impl Into<String>) -> Self {
        Self::Fatal {
            message: message.into(),
            diagnostic: Value::Null,
        }
    }

    /// Whether a supervisor may retry after this failure
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Retryable { .. } | Self::Timeout(_))
    }

    /// Diagnostic payload attached to the failure, if any
    pub fn diagnostic(&self) -> Value {
        match self {
            Self::Retryable { diagnostic, .. } | Self::Fatal { diagnostic, .. } => {
                diagnostic.clone()
            }
            Self::Timeout(after) => serde_json::json!({ "timeout_ms": after.as_millis() as u64 }),
            _ => Value::Null,
        }
    }
}

/// Graph validation errors, raised by `GraphBuilder::compile`
#[derive(Debug, Error, PartialEq)]
pub enum GraphError {
    #[error("Duplicate node id: {0}")]
    DuplicateNode(String),

    #[error("Node id '{0}' is reserved")]
    ReservedId(String),

    #[error("Edge references unknown node: {0}")]
    UnknownNode(String),

    #[error("Edges may not enter the start marker or leave the end marker ({0})")]
    MisplacedMarker(String),

    #[error("Graph has no entry edge from the start marker")]
    NoEntry,

    #[error("Node '{0}' has no outgoing edge")]
    NoExit(String),

    /// Circular dependency detected in the graph
    #[error("Circular dependency detected: {0:?}")]
    Cycle(Vec<String>),

    #[error("Router '{node}' declares label '{label}' but no edge carries it")]
    MissingRoute { node: String, label: String },

    #[error("Router '{node}' has more than one edge for label '{label}'")]
    DuplicateRoute { node: String, label: String },

    #[error("Router '{node}' has an edge with undeclared label '{label}'")]
    UndeclaredRoute { node: String, label: String },

    #[error("Node '{0}' is not a router but has a labeled edge")]
    LabelOnNonRouter(String),

    #[error("Router '{0}' has an unlabeled outgoing edge")]
    UnlabeledRouterEdge(String),
}

/// State store errors
#[derive(Debug, Error)]
pub enum StateError {
    #[error("field '{field}' expects {expected:?}, got {found}")]
    FieldType {
        field: String,
        expected: FieldType,
        found: String,
    },

    #[error("state input must be a JSON object, got {0}")]
    NotAnObject(String),

    #[error("could not decode state record: {0}")]
    Record(#[from] serde_json::Error),
}

/// Text generation errors
#[derive(Debug, Error)]
pub enum ModelError {
    /// API key not configured
    #[error("API key not configured for provider: {0}")]
    ApiKeyMissing(String),

    /// Transport or HTTP status failure
    #[error("Request to {provider} failed: {message}")]
    Request { provider: String, message: String },

    /// Invalid response from model
    #[error("Invalid response from model: {0}")]
    InvalidResponse(String),
}

impl From<reqwest::Error> for ModelError {
    fn from(err: reqwest::Error) -> Self {
        Self::Request {
            provider: "http".to_string(),
            message: err.to_string(),
        }
    }
}

/// Human-decision errors
#[derive(Debug, Error)]
pub enum ApprovalError {
    /// The decision channel closed before an answer arrived
    #[error("approval request '{0}' was dropped before a decision")]
    Dropped(String),

    /// Nobody answered within the broker's timeout
    #[error("approval request '{0}' timed out")]
    TimedOut(String),

    /// Input ended before a valid answer was given
    #[error("approval input closed before a valid decision")]
    InputClosed,

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
