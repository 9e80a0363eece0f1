use async_trait::async_trait;
use graphcore::{
    EdgeStatus, ExecutionEvent, ExecutionStatus, GraphNode, LogLevel, NodeContext, NodeError,
    NodeHandler, NodeKind, NodeOutput, NodeStatus, RunError, RunRequest, RuntimeConfig,
    ValidationError, WorkflowGraph,
};
use graphruntime::{
    ExecutionStore, GraphRuntime, NodeRegistry, RegistryExecutor, RunOptions, RunOutcome,
    WorkflowOrchestrator,
};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

/// Echoes its node id around the gathered input text. Config `fail` makes it
/// fail, `delayMs` makes it wait, `branch` picks a conditional's port.
struct ScriptedHandler {
    kind: NodeKind,
}

#[async_trait]
impl NodeHandler for ScriptedHandler {
    fn kind(&self) -> NodeKind {
        self.kind
    }

    async fn execute(&self, ctx: NodeContext) -> Result<NodeOutput, NodeError> {
        let delay = ctx
            .node
            .config
            .get("delayMs")
            .and_then(Value::as_u64)
            .unwrap_or(0);
        ctx.delay(Duration::from_millis(delay)).await?;

        if let Some(message) = ctx.node.config_str("fail") {
            return Err(NodeError::ExecutionFailed(message.to_string()));
        }

        let text = ctx.input_text();
        let mut output = NodeOutput::new()
            .with_output("output", format!("{}<{}>", ctx.node.id, text))
            .with_output("inputs", Value::Object(ctx.inputs.clone()));
        match self.kind {
            NodeKind::Conditional => {
                let branch = ctx.node.config_str("branch").unwrap_or("true").to_string();
                output = output.with_output(branch, text);
            }
            NodeKind::Output => {
                output = output.with_output("answer", text);
            }
            _ => {}
        }
        Ok(output)
    }
}

fn scripted_registry() -> Arc<NodeRegistry> {
    let mut registry = NodeRegistry::new();
    for kind in NodeKind::ALL {
        registry.register(Arc::new(ScriptedHandler { kind }));
    }
    Arc::new(registry)
}

fn create_test_orchestrator() -> WorkflowOrchestrator {
    WorkflowOrchestrator::new(Arc::new(RegistryExecutor::new(scripted_registry())))
}

fn diamond() -> WorkflowGraph {
    let mut graph = WorkflowGraph::with_id("diamond");
    graph.add_node(GraphNode::new("A", NodeKind::Input).with_label("Query"));
    graph.add_node(GraphNode::new("B", NodeKind::Transform));
    graph.add_node(GraphNode::new("C", NodeKind::Transform));
    graph.add_node(GraphNode::new("D", NodeKind::Output));
    graph.connect("A", "B");
    graph.connect("A", "C");
    graph.connect("B", "D");
    graph.connect("C", "D");
    graph
}

fn chain(middle: GraphNode) -> WorkflowGraph {
    let middle_id = middle.id.clone();
    let mut graph = WorkflowGraph::with_id("chain");
    graph.add_node(GraphNode::new("A", NodeKind::Input));
    graph.add_node(middle);
    graph.add_node(GraphNode::new("O", NodeKind::Output));
    graph.connect("A", &middle_id);
    graph.connect(&middle_id, "O");
    graph
}

fn drain(events: &mut broadcast::Receiver<ExecutionEvent>) -> Vec<ExecutionEvent> {
    let mut collected = Vec::new();
    while let Ok(event) = events.try_recv() {
        collected.push(event);
    }
    collected
}

fn index_of(events: &[ExecutionEvent], wanted: impl Fn(&ExecutionEvent) -> bool) -> usize {
    events
        .iter()
        .position(|e| wanted(e))
        .expect("event should have been emitted")
}

async fn wait_until_running(store_reader: &graphruntime::StoreReader, node_id: &str) {
    for _ in 0..400 {
        if store_reader.node_status(node_id) == Some(NodeStatus::Running) {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("node {} never started", node_id);
}

#[tokio::test]
async fn test_diamond_runs_to_completion() {
    let orchestrator = create_test_orchestrator();
    let mut store = ExecutionStore::default();
    let reader = store.reader();
    let mut events = reader.subscribe();

    let outcome = orchestrator
        .run(&mut store, RunRequest::new(diamond(), "what is rust"))
        .await;

    let RunOutcome::Success { answer, raw, .. } = &outcome else {
        panic!("expected success, got {:?}", outcome);
    };
    assert!(answer.contains("B<A<what is rust>>"), "answer should carry B's output");
    assert!(answer.contains("C<A<what is rust>>"), "answer should carry C's output");
    assert!(raw.get("D").is_some(), "simulated raw result holds node outputs");

    let started: Vec<String> = drain(&mut events)
        .into_iter()
        .filter_map(|e| match e {
            ExecutionEvent::NodeStatusChanged {
                node_id,
                status: NodeStatus::Running,
                ..
            } => Some(node_id),
            _ => None,
        })
        .collect();
    assert_eq!(started, vec!["A", "B", "C", "D"]);

    let execution = reader.snapshot().unwrap();
    assert_eq!(execution.status, ExecutionStatus::Completed);
    assert_eq!(execution.progress.completed, 4);
    assert_eq!(execution.progress.percentage, 100);
    assert!(execution.progress.current_node.is_none());
    assert!(execution.running_nodes().next().is_none());
    assert_eq!(execution.result.as_ref().unwrap()["answer"], json!(answer));

    let messages: Vec<&str> = execution.logs.iter().map(|l| l.message.as_str()).collect();
    assert_eq!(messages.first(), Some(&"Workflow execution started"));
    assert!(messages.contains(&"Starting node: Query"));
    assert_eq!(messages.last(), Some(&"Workflow execution completed"));
}

#[tokio::test]
async fn test_cycle_rejected_before_any_state() {
    let orchestrator = create_test_orchestrator();
    let mut store = ExecutionStore::default();
    let reader = store.reader();
    let mut events = reader.subscribe();

    let mut graph = WorkflowGraph::new();
    graph.add_node(GraphNode::new("A", NodeKind::Transform));
    graph.add_node(GraphNode::new("B", NodeKind::Transform));
    graph.connect("A", "B");
    graph.connect("B", "A");

    let outcome = orchestrator.run(&mut store, RunRequest::new(graph, "q")).await;

    match outcome {
        RunOutcome::Failure {
            execution_id: None,
            error: RunError::Validation(ValidationError::CyclicDependency { cycles }),
        } => assert_eq!(cycles, vec![vec!["A".to_string(), "B".to_string()]]),
        other => panic!("expected cycle rejection, got {:?}", other),
    }
    assert!(reader.snapshot().is_none(), "no execution should be created");
    assert!(drain(&mut events).is_empty(), "no node should ever run");
}

#[tokio::test]
async fn test_missing_query_rejected() {
    let orchestrator = create_test_orchestrator();
    let mut store = ExecutionStore::default();
    let outcome = orchestrator
        .run(&mut store, RunRequest::new(diamond(), "  "))
        .await;
    assert!(matches!(
        outcome.error(),
        Some(RunError::Validation(ValidationError::MissingQuery))
    ));

    let mut graph = diamond();
    graph.nodes[0] = GraphNode::new("A", NodeKind::Input).with_config("userQuery", "from node");
    let outcome = orchestrator.run(&mut store, RunRequest::new(graph, "")).await;
    assert!(outcome.is_success(), "query should come from the input node");
}

#[tokio::test]
async fn test_unregistered_kind_is_invalid_config() {
    let mut registry = NodeRegistry::new();
    registry.register(Arc::new(ScriptedHandler {
        kind: NodeKind::Input,
    }));
    assert_eq!(registry.missing_kinds().len(), NodeKind::ALL.len() - 1);

    let orchestrator = WorkflowOrchestrator::new(Arc::new(RegistryExecutor::new(Arc::new(registry))));
    let result = orchestrator.validate(&RunRequest::new(diamond(), "q"));
    match result {
        Err(ValidationError::InvalidConfig { node_id, .. }) => assert_eq!(node_id, "B"),
        other => panic!("expected invalid config, got {:?}", other.map(|p| p.query)),
    }
}

#[tokio::test]
async fn test_critical_failure_aborts_run() {
    let orchestrator = create_test_orchestrator();
    let mut store = ExecutionStore::default();
    let reader = store.reader();

    let graph = chain(GraphNode::new("M", NodeKind::ModelCall).with_config("fail", "quota exceeded"));
    let outcome = orchestrator.run(&mut store, RunRequest::new(graph, "q")).await;

    let error = outcome.error().expect("run should fail");
    assert_eq!(error.node_id(), Some("M"));
    assert!(error.to_string().contains("quota exceeded"));

    let execution = reader.snapshot().unwrap();
    assert_eq!(execution.status, ExecutionStatus::Failed);
    assert_eq!(execution.node("M").unwrap().status, NodeStatus::Error);
    assert_eq!(execution.node("O").unwrap().status, NodeStatus::Pending);
    assert!(execution.error.as_deref().unwrap().contains("M"));
    assert_eq!(reader.edge_status("e-A-M"), Some(EdgeStatus::Completed));
    assert_eq!(reader.edge_status("e-M-O"), Some(EdgeStatus::Idle));

    let last = execution.logs.last().unwrap();
    assert_eq!(last.level, LogLevel::Error);
    assert_eq!(last.message, "Workflow execution failed");
    assert!(execution
        .logs
        .iter()
        .any(|l| l.message == "Node execution failed: Execution failed: quota exceeded"
            && l.node_id.as_deref() == Some("M")));
}

#[tokio::test]
async fn test_non_critical_failure_continues() {
    let orchestrator = create_test_orchestrator();
    let mut store = ExecutionStore::default();
    let reader = store.reader();

    let graph = chain(GraphNode::new("T", NodeKind::Transform).with_config("fail", "bad template"));
    let outcome = orchestrator.run(&mut store, RunRequest::new(graph, "fallback")).await;

    assert!(outcome.is_success(), "transform failure must not abort");
    let execution = reader.snapshot().unwrap();
    assert_eq!(execution.status, ExecutionStatus::Completed);
    assert_eq!(execution.node("T").unwrap().status, NodeStatus::Error);
    assert_eq!(
        execution.node("T").unwrap().error.as_deref(),
        Some("Execution failed: bad template")
    );
    assert_eq!(execution.node("O").unwrap().status, NodeStatus::Success);
    assert_eq!(execution.progress.percentage, 100);

    // The failed node contributes no input, so the output falls back to the query
    if let RunOutcome::Success { answer, .. } = outcome {
        assert_eq!(answer, "fallback");
    }
}

#[tokio::test]
async fn test_cancellation_freezes_node_states() {
    let orchestrator = create_test_orchestrator();
    let mut store = ExecutionStore::default();
    let reader = store.reader();
    let token = CancellationToken::new();

    let graph = chain(GraphNode::new("S", NodeKind::Transform).with_config("delayMs", 10_000));
    let options = RunOptions {
        execution_id: Some("cancel-me".into()),
        cancellation: Some(token.clone()),
    };

    let canceller = async {
        wait_until_running(&reader, "S").await;
        token.cancel();
    };
    let (outcome, _) = tokio::join!(
        orchestrator.run_with_options(&mut store, RunRequest::new(graph, "q"), options),
        canceller
    );

    assert!(outcome.error().map_or(false, RunError::is_cancelled));
    assert_eq!(outcome.execution_id(), Some("cancel-me"));

    let execution = reader.snapshot().unwrap();
    assert_eq!(execution.status, ExecutionStatus::Cancelled);
    assert_eq!(execution.node("A").unwrap().status, NodeStatus::Success);
    assert_eq!(execution.node("S").unwrap().status, NodeStatus::Running);
    assert_eq!(execution.node("O").unwrap().status, NodeStatus::Pending);
    assert!(execution.progress.current_node.is_none());
    assert!(!orchestrator.is_running());
}

#[tokio::test]
async fn test_cancel_through_orchestrator() {
    let orchestrator = create_test_orchestrator();
    assert!(!orchestrator.cancel(), "nothing to cancel while idle");

    let mut store = ExecutionStore::default();
    let reader = store.reader();
    let graph = chain(GraphNode::new("M", NodeKind::ModelCall).with_config("delayMs", 10_000));

    let canceller = async {
        wait_until_running(&reader, "M").await;
        assert!(orchestrator.cancel());
    };
    let (outcome, _) = tokio::join!(
        orchestrator.run(&mut store, RunRequest::new(graph, "q")),
        canceller
    );

    assert!(matches!(outcome.error(), Some(RunError::Cancelled)));
    assert_eq!(reader.status(), Some(ExecutionStatus::Cancelled));
    assert_eq!(
        reader.logs().last().map(|l| l.message.clone()).as_deref(),
        Some("Workflow execution cancelled")
    );
}

#[tokio::test]
async fn test_progress_and_single_running_node() {
    let orchestrator = create_test_orchestrator();
    let mut store = ExecutionStore::default();
    let mut events = store.reader().subscribe();

    let graph = chain(GraphNode::new("T", NodeKind::Transform).with_config("fail", "x"));
    orchestrator.run(&mut store, RunRequest::new(graph, "q")).await;

    let mut statuses: HashMap<String, NodeStatus> = HashMap::new();
    let mut changes = 0;
    for event in drain(&mut events) {
        if let ExecutionEvent::NodeStatusChanged {
            node_id,
            status,
            progress,
            ..
        } = event
        {
            changes += 1;
            statuses.insert(node_id, status);
            let expected = (100.0 * progress.completed as f64 / progress.total as f64).round() as u8;
            assert_eq!(progress.percentage, expected);
            assert!(progress.percentage <= 100);

            let running = statuses.values().filter(|s| **s == NodeStatus::Running).count();
            assert!(running <= 1, "at most one node may run at a time");
            assert_eq!(progress.current_node.is_some(), running == 1);
        }
    }
    assert_eq!(changes, 6, "running + finished for each of three nodes");
}

#[tokio::test]
async fn test_incoming_edges_complete_before_success() {
    let orchestrator = create_test_orchestrator();
    let mut store = ExecutionStore::default();
    let mut events = store.reader().subscribe();

    orchestrator
        .run(&mut store, RunRequest::new(diamond(), "q"))
        .await;

    let events = drain(&mut events);
    let d_success = index_of(&events, |e| {
        matches!(e, ExecutionEvent::NodeStatusChanged { node_id, status: NodeStatus::Success, .. } if node_id == "D")
    });
    for edge in ["e-B-D", "e-C-D"] {
        let active = index_of(&events, |e| {
            matches!(e, ExecutionEvent::EdgeStatusChanged { edge_id, status: EdgeStatus::Active, .. } if edge_id == edge)
        });
        let completed = index_of(&events, |e| {
            matches!(e, ExecutionEvent::EdgeStatusChanged { edge_id, status: EdgeStatus::Completed, .. } if edge_id == edge)
        });
        assert!(active < completed);
        assert!(completed < d_success, "edge {} must complete before D succeeds", edge);
    }
}

#[tokio::test]
async fn test_conditional_skips_untaken_branch() {
    let orchestrator = create_test_orchestrator();
    let mut store = ExecutionStore::default();
    let reader = store.reader();

    let mut graph = WorkflowGraph::with_id("branching");
    graph.add_node(GraphNode::new("A", NodeKind::Input));
    graph.add_node(GraphNode::new("C", NodeKind::Conditional).with_config("branch", "true"));
    graph.add_node(GraphNode::new("Y", NodeKind::Transform));
    graph.add_node(GraphNode::new("N", NodeKind::Transform));
    graph.add_node(GraphNode::new("Z", NodeKind::Output));
    graph.connect("A", "C");
    let yes = graph.connect_ports("C", Some("true"), "Y", None);
    let no = graph.connect_ports("C", Some("false"), "N", None);
    graph.connect("N", "Z");

    let outcome = orchestrator.run(&mut store, RunRequest::new(graph, "q")).await;
    assert!(outcome.is_success());

    assert_eq!(reader.node_status("Y"), Some(NodeStatus::Success));
    assert_eq!(reader.node_status("N"), Some(NodeStatus::Skipped));
    assert_eq!(reader.node_status("Z"), Some(NodeStatus::Skipped));
    assert_eq!(reader.edge_status(&yes), Some(EdgeStatus::Completed));
    assert_eq!(reader.edge_status(&no), Some(EdgeStatus::Idle));

    let progress = reader.progress().unwrap();
    assert_eq!(progress.completed, 5);
    assert_eq!(progress.percentage, 100);
    assert!(reader
        .logs()
        .iter()
        .any(|l| l.message == "Skipping node: N"));
}

#[tokio::test]
async fn test_input_keys_follow_ports() {
    let orchestrator = create_test_orchestrator();
    let mut store = ExecutionStore::default();
    let reader = store.reader();

    let mut graph = WorkflowGraph::new();
    graph.add_node(GraphNode::new("A", NodeKind::Input));
    graph.add_node(GraphNode::new("B", NodeKind::Transform));
    graph.add_node(GraphNode::new("C", NodeKind::Transform));
    graph.connect("A", "B");
    graph.connect_ports("A", None, "C", Some("text"));

    orchestrator.run(&mut store, RunRequest::new(graph, "q")).await;

    let execution = reader.snapshot().unwrap();
    let inputs_of = |id: &str| execution.node(id).unwrap().output.as_ref().unwrap()["inputs"].clone();
    assert_eq!(inputs_of("B"), json!({"A": "A<q>"}));
    assert_eq!(inputs_of("C"), json!({"text": "A<q>"}));
}

#[tokio::test]
async fn test_runtime_keeps_bounded_history() {
    let config = RuntimeConfig {
        history_limit: 2,
        ..RuntimeConfig::default()
    };
    let runtime = GraphRuntime::with_registry(scripted_registry(), config);
    let mut store = runtime.new_store();
    let reader = store.reader();
    let mut events = runtime.subscribe_events();

    for i in 0..3 {
        let request = RunRequest::new(diamond(), format!("run {}", i));
        assert!(runtime.execute(&mut store, request).await.is_success());
    }

    assert_eq!(reader.history().len(), 2);
    let finished = drain(&mut events)
        .into_iter()
        .filter(|e| matches!(e, ExecutionEvent::ExecutionFinished { .. }))
        .count();
    assert_eq!(finished, 3);
}
