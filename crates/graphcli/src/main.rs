use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use graphcore::config::StreamConfig;
use graphcore::{
    ExecutionEvent, ExecutionLog, GraphNode, LogFilter, LogLevel, LogQuery, NodeKind, NodeStatus,
    RunRequest, RuntimeConfig, WorkflowGraph,
};
use graphruntime::{GraphAnalyzer, GraphRuntime, RunOutcome};
use graphstream::{
    ApiClient, ConnectionState, HttpPushTransport, LogBuffer, LogStreamClient, StreamEnd,
    StreamHandler,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "graphrun")]
#[command(about = "Run and observe processing graphs", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute a graph file
    Run {
        /// Path to graph JSON file
        #[arg(short, long)]
        file: PathBuf,

        /// Query to run; overrides the one in the file
        #[arg(short, long)]
        query: Option<String>,

        /// Send the graph to a remote execution backend
        #[arg(long)]
        remote: Option<String>,

        /// Runtime config file (JSON)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Show verbose output
        #[arg(short, long)]
        verbose: bool,
    },

    /// Validate a graph file
    Validate {
        /// Path to graph JSON file
        file: PathBuf,
    },

    /// List available node kinds
    Nodes,

    /// Create a new example graph
    Init {
        /// Output file path
        #[arg(short, long, default_value = "graph.json")]
        output: PathBuf,
    },

    /// Show the logs of an execution on a server
    Logs {
        /// Execution id
        execution: String,

        /// Server base URL
        #[arg(short, long, default_value = "http://localhost:3000")]
        server: String,

        /// Only this level
        #[arg(short, long)]
        level: Option<LogLevel>,

        /// Only this node
        #[arg(short, long)]
        node: Option<String>,

        /// Only messages containing this text
        #[arg(long)]
        search: Option<String>,

        /// Print the recorded history and exit instead of following
        #[arg(long)]
        no_follow: bool,

        /// Runtime config file (JSON), for stream retry settings
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default)))
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            file,
            query,
            remote,
            config,
            verbose,
        } => {
            init_tracing(verbose);
            run_graph(file, query, remote, config).await?;
        }

        Commands::Validate { file } => {
            validate_graph(&file)?;
        }

        Commands::Nodes => {
            list_nodes();
        }

        Commands::Init { output } => {
            create_example_graph(output)?;
        }

        Commands::Logs {
            execution,
            server,
            level,
            node,
            search,
            no_follow,
            config,
        } => {
            init_tracing(false);
            let filter = LogFilter {
                level,
                node_id: node,
                text: search,
            };
            let config = RuntimeConfig::load(config.as_deref())?;
            if no_follow {
                print_history(&server, &execution, filter).await?;
            } else {
                follow_logs(&server, &execution, filter, config.stream).await?;
            }
        }
    }

    Ok(())
}

fn load_request(file: &Path) -> Result<RunRequest> {
    let raw = std::fs::read_to_string(file)
        .with_context(|| format!("failed to read {}", file.display()))?;
    let request: RunRequest =
        serde_json::from_str(&raw).with_context(|| format!("invalid graph file {}", file.display()))?;
    Ok(request)
}

async fn run_graph(
    file: PathBuf,
    query: Option<String>,
    remote: Option<String>,
    config: Option<PathBuf>,
) -> Result<()> {
    println!("🚀 Loading graph from: {}", file.display());

    let mut request = load_request(&file)?;
    if let Some(query) = query {
        request.query = query;
    }

    println!("📋 Graph: {}", request.graph.id);
    println!("   Nodes: {}", request.graph.nodes.len());
    println!("   Edges: {}", request.graph.edges.len());
    println!();

    let mut config = RuntimeConfig::load(config.as_deref())?;
    if remote.is_some() {
        config.remote.endpoint = remote;
    }
    let executor = graphnodes::executor_from_config(&config)?;
    let runtime = GraphRuntime::new(executor, config);

    let mut events = runtime.subscribe_events();
    let event_task = tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            match event {
                ExecutionEvent::ExecutionStarted { total_nodes, .. } => {
                    println!("▶️  Execution started ({} nodes)", total_nodes);
                }
                ExecutionEvent::NodeStatusChanged {
                    node_id,
                    status,
                    progress,
                    ..
                } => match status {
                    NodeStatus::Running => println!("  ⚡ Starting node: {}", node_id),
                    NodeStatus::Success => {
                        println!("  ✅ Node {} completed ({}%)", node_id, progress.percentage)
                    }
                    NodeStatus::Error => println!("  ❌ Node {} failed", node_id),
                    NodeStatus::Skipped => println!("  ⏭️  Node {} skipped", node_id),
                    _ => {}
                },
                ExecutionEvent::LogAppended { log, .. } => {
                    if log.level >= LogLevel::Warning {
                        println!("     ⚠️  {}", log.message);
                    }
                }
                ExecutionEvent::ExecutionFinished {
                    status, duration_ms, ..
                } => {
                    println!("✨ Execution {} in {}ms", status, duration_ms);
                    break;
                }
                ExecutionEvent::EdgeStatusChanged { .. } => {}
            }
        }
    });

    let mut store = runtime.new_store();
    let outcome = runtime.execute(&mut store, request).await;

    // Let the printer drain; it stops on its own at the finish event
    let _ = tokio::time::timeout(std::time::Duration::from_millis(500), event_task).await;

    println!();
    println!("📊 Execution Summary:");
    match &outcome {
        RunOutcome::Success {
            execution_id,
            answer,
            ..
        } => {
            println!("   Execution ID: {}", execution_id);
            if let Some(progress) = store.reader().progress() {
                println!("   Completed: {}/{} nodes", progress.completed, progress.total);
            }
            println!();
            println!("📤 Answer:");
            println!("{}", answer);
            Ok(())
        }
        RunOutcome::Failure {
            execution_id,
            error,
        } => {
            if let Some(id) = execution_id {
                println!("   Execution ID: {}", id);
            }
            bail!("run failed: {}", error)
        }
    }
}

fn validate_graph(file: &Path) -> Result<()> {
    println!("🔍 Validating graph: {}", file.display());

    let request = load_request(file)?;
    let plan = GraphAnalyzer::validate(&request.graph)?;
    let query = request.resolve_query();

    println!("✅ Graph is valid:");
    println!("   Nodes: {}", request.graph.nodes.len());
    println!("   Edges: {}", request.graph.edges.len());
    println!("   Order: {}", plan.order.join(" → "));
    match query {
        Some(query) => println!("   Query: {}", query),
        None => println!("   ⚠️  No query: pass one with `graphrun run --query`"),
    }

    Ok(())
}

fn list_nodes() {
    println!("📦 Available Node Kinds:");
    println!();

    let registry = graphnodes::simulated_registry(&Default::default());

    for kind in registry.list_kinds() {
        let critical = if kind.is_critical() { ", critical" } else { "" };
        if let Some(metadata) = registry.get_metadata(kind) {
            println!("  • {} ({}{})", kind, metadata.category, critical);
            println!("    {}", metadata.description);
        } else {
            println!("  • {}", kind);
        }
    }
}

fn create_example_graph(output: PathBuf) -> Result<()> {
    let mut graph = WorkflowGraph::with_id("example-rag");

    graph.add_node(GraphNode::new("query", NodeKind::Input).with_label("User Query"));
    graph.add_node(
        GraphNode::new("kb", NodeKind::Retrieval)
            .with_label("Knowledge Base")
            .with_config("topK", 3),
    );
    graph.add_node(
        GraphNode::new("llm", NodeKind::ModelCall)
            .with_label("LLM")
            .with_config("provider", "google")
            .with_config("model", "gemini-2.0-flash")
            .with_config("temperature", 0.7),
    );
    graph.add_node(GraphNode::new("out", NodeKind::Output).with_label("Answer"));

    graph.connect("query", "kb");
    graph.connect("kb", "llm");
    graph.connect("llm", "out");

    let request = RunRequest::new(graph, "What is ownership in Rust?");
    let json = serde_json::to_string_pretty(&request)?;
    std::fs::write(&output, json)?;

    println!("✨ Created example graph: {}", output.display());
    println!();
    println!("Run it with:");
    println!("  graphrun run --file {}", output.display());

    Ok(())
}

fn print_log(log: &ExecutionLog) {
    let node = log
        .node_id
        .as_deref()
        .map(|id| format!(" [{}]", id))
        .unwrap_or_default();
    println!(
        "{} {:<8}{} {}",
        log.timestamp.format("%H:%M:%S%.3f"),
        log.level.as_str().to_uppercase(),
        node,
        log.message
    );
}

async fn print_history(server: &str, execution_id: &str, filter: LogFilter) -> Result<()> {
    let api = ApiClient::new(server)?;
    let status = api.fetch_status(execution_id).await?;
    println!(
        "📊 {} {} ({}/{} nodes, {}%)",
        execution_id,
        status.status,
        status.progress.completed_nodes,
        status.progress.total_nodes,
        status.progress.percentage
    );

    let mut buffer = LogBuffer::with_filter(filter);
    let mut query = LogQuery {
        limit: graphcore::log::MAX_PAGE_LIMIT,
        ..LogQuery::default()
    };
    loop {
        let page = api.fetch_logs(execution_id, &query).await?;
        let fetched = page.logs.len();
        buffer.extend(page.logs);
        query.offset += fetched;
        if fetched == 0 || query.offset >= page.total {
            break;
        }
    }

    for log in buffer.visible() {
        print_log(log);
    }
    Ok(())
}

/// Prints logs as they arrive, skipping replays and filtered ones
struct PrintingHandler {
    buffer: LogBuffer,
}

impl StreamHandler for PrintingHandler {
    fn on_log(&mut self, log: ExecutionLog) {
        let visible = self.buffer.filter().matches(&log);
        if self.buffer.push(log.clone()) && visible {
            print_log(&log);
        }
    }

    fn on_state_change(&mut self, state: ConnectionState) {
        if let ConnectionState::Retrying { attempt, delay } = state {
            eprintln!("🔌 Connection lost, retry {} in {:?}", attempt, delay);
        }
    }
}

async fn follow_logs(
    server: &str,
    execution_id: &str,
    filter: LogFilter,
    stream: StreamConfig,
) -> Result<()> {
    let transport = HttpPushTransport::new(server)?;
    let client = LogStreamClient::new(Arc::new(transport), stream);
    let handler = PrintingHandler {
        buffer: LogBuffer::with_filter(filter),
    };

    let subscription = client.subscribe(execution_id, handler);
    let end = tokio::select! {
        end = subscription.closed() => end,
        _ = tokio::signal::ctrl_c() => StreamEnd::Unsubscribed,
    };

    match end {
        StreamEnd::Completed(payload) => {
            let took = payload
                .duration_seconds
                .map(|s| format!(" in {:.2}s", s))
                .unwrap_or_default();
            println!("✨ Execution {}{}", payload.status, took);
            Ok(())
        }
        StreamEnd::Failed(e) => bail!("log stream failed: {}", e),
        StreamEnd::Unsubscribed => Ok(()),
    }
}
