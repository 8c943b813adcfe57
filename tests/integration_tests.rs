//! Integration tests for the workflow engine and kitchen workflows
//!
//! These tests drive complete runs through the public API with mock
//! collaborators in place of the model, the oven and the approver.

use async_trait::async_trait;
use brigade_rs::adk::approval::{ApprovalBroker, ApprovalRequest, Decision, DecisionSource};
use brigade_rs::adk::error::{
    ApprovalError, BrigadeError, FlowError, GraphError, ModelError, NodeError,
};
use brigade_rs::adk::extract::{extract, INVALID_JSON};
use brigade_rs::adk::model::TextGenerator;
use brigade_rs::brigade::kitchen::{self, Kitchen};
use brigade_rs::brigade::workflow::config::RunConfig;
use brigade_rs::brigade::workflow::graph::{
    execute, work_fn, Executor, GraphBuilder, NodeSpec, Passthrough, RunEvent, END, START,
};
use brigade_rs::brigade::workflow::loader::ConfigLoader;
use brigade_rs::brigade::workflow::process::Probe;
use brigade_rs::brigade::workflow::retry::{
    AttemptOutcome, RetryPolicy, RetrySupervisor, SupervisorState,
};
use brigade_rs::brigade::workflow::state::{
    FieldType, ReducerType, StateSchema, StateUpdate, WorkflowState,
};
use brigade_rs::brigade::workflow::RunStatus;
use once_cell::sync::Lazy;
use serde_json::json;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

// ============================================================================
// Mock Components
// ============================================================================

/// Generator that returns one canned reply for every prompt
struct MockGenerator {
    reply: Option<&'static str>,
}

#[async_trait]
impl TextGenerator for MockGenerator {
    async fn generate(&self, _prompt: &str) -> Result<String, ModelError> {
        self.reply
            .map(str::to_string)
            .ok_or_else(|| ModelError::Request {
                provider: "mock".to_string(),
                message: "offline".to_string(),
            })
    }
}

/// Oven that runs cold at the second stage until `recover_on`
struct FlakyOven {
    recover_on: u32,
    reads: AtomicU32,
}

#[async_trait]
impl Probe for FlakyOven {
    async fn read(&self, stage: &str, setpoint: f64, attempt: u32) -> Option<f64> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        if stage == "load" && attempt < self.recover_on {
            Some(setpoint - 30.0)
        } else {
            Some(setpoint + 2.0)
        }
    }
}

struct Approve;

#[async_trait]
impl DecisionSource for Approve {
    async fn request_approval(&self, _request: ApprovalRequest) -> Result<Decision, ApprovalError> {
        Ok(Decision::approve("looks right"))
    }
}

/// Run configuration with no waiting anywhere
static FAST_CONFIG: Lazy<RunConfig> = Lazy::new(|| {
    ConfigLoader::parse_yaml(
        r#"
bakery:
  retry:
    max_attempts: 3
    delay_ms: 0
  stage_latency_ms: 0
"#,
    )
    .expect("fixture config parses")
});

fn kitchen_with(reply: Option<&'static str>, approver: Arc<dyn DecisionSource>) -> Kitchen {
    Kitchen::new(Arc::new(MockGenerator { reply }), approver, FAST_CONFIG.clone())
}

fn state(input: serde_json::Value) -> WorkflowState {
    WorkflowState::from_input(Default::default(), input).unwrap()
}

// ============================================================================
// Engine Tests
// ============================================================================

#[tokio::test]
async fn test_fan_out_join_unions_branch_outputs() {
    let mut b = GraphBuilder::new();
    b.add_node(NodeSpec::task("a", work_fn(|_| Ok(StateUpdate::new().set("a", 1)))))
        .add_node(NodeSpec::task("b", work_fn(|_| Ok(StateUpdate::new().set("b", 2)))))
        .add_node(NodeSpec::task("c", work_fn(|_| Ok(StateUpdate::new().set("c", 3)))))
        .add_node(NodeSpec::join("join", Arc::new(Passthrough)));
    for id in ["a", "b", "c"] {
        b.add_edge(START, id).add_edge(id, "join");
    }
    b.add_edge("join", END);
    let graph = b.compile().unwrap();

    let result = execute(&graph, state(json!({}))).await.unwrap();
    assert_eq!(result.to_json(), json!({"a": 1, "b": 2, "c": 3}));
}

fn conflicting_graph(left: i64, right: i64) -> brigade_rs::brigade::workflow::graph::Graph {
    let mut b = GraphBuilder::new();
    b.add_node(NodeSpec::task("left", work_fn(move |_| Ok(StateUpdate::new().set("x", left)))))
        .add_node(NodeSpec::task("right", work_fn(move |_| Ok(StateUpdate::new().set("x", right)))))
        .add_node(NodeSpec::join("join", Arc::new(Passthrough)))
        .add_edge(START, "left")
        .add_edge(START, "right")
        .add_edge("left", "join")
        .add_edge("right", "join")
        .add_edge("join", END);
    b.compile().unwrap()
}

#[tokio::test]
async fn test_concurrent_writes_conflict_only_when_different() {
    let err = execute(&conflicting_graph(1, 2), state(json!({})))
        .await
        .unwrap_err();
    match err {
        FlowError::MergeConflict { node, field, .. } => {
            assert_eq!(node, "join");
            assert_eq!(field, "x");
        }
        other => panic!("expected merge conflict, got {}", other),
    }

    let merged = execute(&conflicting_graph(5, 5), state(json!({}))).await.unwrap();
    assert_eq!(merged.get("x"), Some(&json!(5)));
}

#[tokio::test]
async fn test_appending_branches_combine_at_join() {
    let mut b = GraphBuilder::new();
    b.add_node(NodeSpec::task("x", work_fn(|_| Ok(StateUpdate::new().set("log", "x")))))
        .add_node(NodeSpec::task("y", work_fn(|_| Ok(StateUpdate::new().set("log", "y")))))
        .add_node(NodeSpec::join("j", Arc::new(Passthrough)))
        .add_edge(START, "x")
        .add_edge(START, "y")
        .add_edge("x", "j")
        .add_edge("y", "j")
        .add_edge("j", END);
    let graph = b.compile().unwrap();

    let schema = StateSchema::new().reduced_field("log", FieldType::Array, ReducerType::Append);
    let initial = WorkflowState::from_input(Arc::new(schema), json!({})).unwrap();

    let merged = execute(&graph, initial).await.unwrap();
    assert_eq!(merged.get("log"), Some(&json!(["x", "y"])));
}

#[tokio::test]
async fn test_failed_branch_does_not_abandon_its_sibling() {
    let mut b = GraphBuilder::new();
    b.add_node(NodeSpec::task("a", work_fn(|_| Err(NodeError::fatal("a broke")))))
        .add_node(NodeSpec::task("b", work_fn(|_| Ok(StateUpdate::new().set("b", 1)))))
        .add_node(NodeSpec::task("c", work_fn(|_| Ok(StateUpdate::new().set("c", 2)))))
        .add_node(NodeSpec::join("join", Arc::new(Passthrough)))
        .add_edge(START, "a")
        .add_edge(START, "b")
        .add_edge("b", "c")
        .add_edge("a", "join")
        .add_edge("c", "join")
        .add_edge("join", END);
    let graph = b.compile().unwrap();

    let halted = Executor::new(&graph).run(state(json!({}))).await.unwrap_err();
    assert!(matches!(halted.error, FlowError::Node { ref node, .. } if node == "a"));
    assert_eq!(halted.state.get("c"), Some(&json!(2)));
}

#[tokio::test]
async fn test_router_label_without_edge_fails() {
    let mut b = GraphBuilder::new();
    b.add_node(NodeSpec::router(
        "pick",
        work_fn(|_| Ok(StateUpdate::new().set("lane", "up"))),
        "lane",
        &["left", "right"],
    ))
    .add_node(NodeSpec::task("l", Arc::new(Passthrough)))
    .add_node(NodeSpec::task("r", Arc::new(Passthrough)))
    .add_edge(START, "pick")
    .add_route("pick", "left", "l")
    .add_route("pick", "right", "r")
    .add_edge("l", END)
    .add_edge("r", END);
    let graph = b.compile().unwrap();

    let err = execute(&graph, state(json!({}))).await.unwrap_err();
    assert!(matches!(err, FlowError::Routing { ref label, .. } if label == "up"));
}

#[test]
fn test_every_router_label_needs_an_edge() {
    let mut b = GraphBuilder::new();
    b.add_node(NodeSpec::router(
        "pick",
        Arc::new(Passthrough),
        "lane",
        &["left", "right"],
    ))
    .add_node(NodeSpec::task("l", Arc::new(Passthrough)))
    .add_edge(START, "pick")
    .add_route("pick", "left", "l")
    .add_edge("l", END);

    let err = b.compile().unwrap_err();
    assert!(matches!(err, GraphError::MissingRoute { .. }));
}

#[tokio::test]
async fn test_events_stream_in_order() {
    let mut b = GraphBuilder::new();
    b.add_node(NodeSpec::task("only", work_fn(|_| Ok(StateUpdate::new().set("done", true)))))
        .add_edge(START, "only")
        .add_edge("only", END);
    let graph = b.compile().unwrap();

    let (tx, mut rx) = mpsc::channel(16);
    Executor::new(&graph)
        .with_events(tx)
        .run(state(json!({})))
        .await
        .unwrap();

    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    assert!(matches!(events.first(), Some(RunEvent::NodeStarted { node }) if node == "only"));
    assert!(matches!(events.last(), Some(RunEvent::RunFinished { .. })));
}

#[tokio::test]
async fn test_retry_bound_is_exact() {
    let calls = AtomicU32::new(0);
    let supervisor = RetrySupervisor::new(RetryPolicy::new(4).unwrap());

    let result = supervisor
        .supervise(|_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { AttemptOutcome::<()>::from(Err(NodeError::retryable("still cold"))) }
        })
        .await;

    assert_eq!(calls.load(Ordering::SeqCst), 4);
    assert_eq!(result.state, SupervisorState::Aborted);
    assert_eq!(result.attempts.len(), 4);
}

#[test]
fn test_extraction_examples() {
    assert_eq!(extract("here you go {\"x\":1} thanks").unwrap(), json!({"x": 1}));
    assert_eq!(extract("no braces here").unwrap_err().reason, INVALID_JSON);

    let minimal = "{\"x\":1}";
    assert_eq!(extract(minimal).unwrap(), extract(minimal).unwrap());
}

// ============================================================================
// Kitchen Workflow Tests
// ============================================================================

#[tokio::test]
async fn test_bakery_recovers_on_final_attempt() {
    let oven = Arc::new(FlakyOven {
        recover_on: 3,
        reads: AtomicU32::new(0),
    });
    let kitchen = kitchen_with(None, Arc::new(Approve)).with_oven(oven.clone());
    let workflow = kitchen::build("bakery", &kitchen).unwrap();

    let report = workflow.run(kitchen::sample_input("bakery").unwrap()).await;

    assert_eq!(report.status, RunStatus::Completed);
    assert_eq!(report.state["attempts"], 3);
    assert_eq!(report.state["attempt_log"][2]["outcome"], "success");
    assert_eq!(report.state["peak_oven_c"], 232.0);
    assert_eq!(oven.reads.load(Ordering::SeqCst), 2 + 2 + 4);
    assert_eq!(report.state["heartbeats"].as_array().unwrap().len(), 8);
    assert!(!report.reason.is_empty());
}

#[tokio::test]
async fn test_bakery_aborts_when_oven_never_recovers() {
    let oven = Arc::new(FlakyOven {
        recover_on: u32::MAX,
        reads: AtomicU32::new(0),
    });
    let kitchen = kitchen_with(None, Arc::new(Approve)).with_oven(oven);
    let workflow = kitchen::build("bakery", &kitchen).unwrap();

    let report = workflow.run(kitchen::sample_input("bakery").unwrap()).await;

    assert_eq!(report.status, RunStatus::Aborted);
    assert_eq!(report.state["status"], "aborted");
    assert!(report.reason.contains("load"));
    // preheat and load from each of the three attempts
    assert_eq!(report.state["heartbeats"].as_array().unwrap().len(), 6);
}

#[tokio::test]
async fn test_dinner_snapshot_survives_prose_answers() {
    let kitchen = kitchen_with(Some("Sorry, I can't check that right now."), Arc::new(Approve));
    let workflow = kitchen::build("dinner_snapshot", &kitchen).unwrap();

    let report = workflow.run(json!({"service_area": "Downtown"})).await;

    assert_eq!(report.status, RunStatus::Completed);
    assert_eq!(report.state["overall"], "calm");
    for section in ["inventory", "floor", "delivery"] {
        assert_eq!(report.state[section]["error"], "invalid_json");
    }
}

#[tokio::test]
async fn test_catering_waits_for_broker_decision() {
    let broker = Arc::new(ApprovalBroker::new());
    let kitchen = kitchen_with(None, broker.clone());
    let workflow = kitchen::build("catering", &kitchen).unwrap();

    let run = tokio::spawn(async move {
        workflow
            .run(json!({
                "event_date": "2025-11-12",
                "headcount": 40,
                "menu": ["paneer tikka", "naan"]
            }))
            .await
    });

    let request = loop {
        if let Some(r) = broker.pending_requests().await.into_iter().next() {
            break r;
        }
        tokio::task::yield_now().await;
    };
    assert_eq!(request.context["complexity"], "low");
    assert_eq!(request.context["quote"]["total"], 1120);
    assert!(broker.respond(&request.id, Decision::reject("date is fully booked")).await);

    let report = run.await.unwrap();
    assert_eq!(report.status, RunStatus::NeedsRevision);
    assert_eq!(report.reason, "date is fully booked");
    assert_eq!(report.state["quote"], json!({}));
}

#[tokio::test]
async fn test_order_router_follows_generator() {
    let kitchen = kitchen_with(Some(r#"{"route": "takeout"}"#), Arc::new(Approve));
    let workflow = kitchen::build("order_router", &kitchen).unwrap();

    let report = workflow
        .run(json!({"order_type": "takeout", "items": ["ramen"]}))
        .await;

    assert_eq!(report.status, RunStatus::Completed);
    assert_eq!(report.state["prep_eta_min"], 12);
    assert_eq!(report.reason, "Pickup label printed");
}

// ============================================================================
// Configuration and Error Tests
// ============================================================================

#[test]
fn test_fixture_config() {
    assert_eq!(FAST_CONFIG.bakery.retry.max_attempts, 3);
    assert_eq!(FAST_CONFIG.bakery.stage_latency_ms, 0);
    assert_eq!(FAST_CONFIG.snapshot.busy_threshold, 35.0);
}

#[test]
fn test_unknown_workflow_error() {
    let kitchen = kitchen_with(None, Arc::new(Approve));
    let err = kitchen::build("brunch", &kitchen).err().unwrap();
    assert_eq!(err.to_string(), "Workflow 'brunch' not found");
}

#[test]
fn test_brigade_error_conversions() {
    let err: BrigadeError = "bad things".into();
    assert!(matches!(err, BrigadeError::Other(_)));

    let err = BrigadeError::config("missing GOOGLE_API_KEY");
    assert!(err.to_string().contains("missing GOOGLE_API_KEY"));

    let err: BrigadeError = FlowError::NoTerminalState.into();
    assert!(matches!(err, BrigadeError::Flow(_)));
}
