//! `flowgraph` CLI entry-point.
//!
//! Available sub-commands:
//! - `migrate`: run pending database migrations.
//! - `validate`: check an exported workflow JSON file.
//! - `run`: import a workflow file and run it once with a payload.
//! - `simulate`: import a workflow file and run it up to one node.
//!
//! Node types that are not built in are registered on the fly: an unknown
//! entry node becomes an event trigger, any other unknown type a dry-run
//! action that logs its settings and hands them back as its result.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use clap::{Args, Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use engine::export::{import_workflow, ExportedWorkflow, IdMapping};
use engine::{
    validate_graph, GraphStore, HistoryStatus, MemoryGraphStore, NodeId, RunControlConfig,
    RunController, RunRequest, SqlGraphStore,
    Workflow, WorkflowId,
};
use nodes::trigger::EventTriggerType;
use nodes::{DispatchContext, DispatchResult, NodeError, NodeTypeRegistry, Service, ServiceDescriptor};
use queue::{RunQueue, RunWorker, DEFAULT_CAPACITY};

#[derive(Parser)]
#[command(name = "flowgraph", about = "Workflow node-graph engine", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run pending database migrations.
    Migrate {
        #[arg(long, env = "DATABASE_URL")]
        database_url: String,
    },
    /// Validate an exported workflow JSON file.
    Validate {
        /// Path to the workflow JSON file.
        path: PathBuf,
    },
    /// Import a workflow file and run it once.
    Run {
        path: PathBuf,
        /// Event payload handed to the trigger (JSON).
        #[arg(long, default_value = "{}")]
        payload: String,
        #[command(flatten)]
        store: StoreArgs,
        #[command(flatten)]
        run_control: RunControlArgs,
    },
    /// Import a workflow file and run it up to (and including) one node.
    Simulate {
        path: PathBuf,
        /// Id of the node to stop at, as written in the file.
        #[arg(long)]
        until: Uuid,
        #[arg(long, default_value = "{}")]
        payload: String,
        #[command(flatten)]
        store: StoreArgs,
        #[command(flatten)]
        run_control: RunControlArgs,
    },
}

#[derive(Args)]
struct StoreArgs {
    #[arg(long, env = "DATABASE_URL", default_value = "sqlite::memory:")]
    database_url: String,
}

#[derive(Args)]
struct RunControlArgs {
    #[arg(long, env = "FLOWGRAPH_RATE_LIMIT_WINDOW_SECS", default_value_t = 60)]
    rate_limit_window_secs: u64,
    #[arg(long, env = "FLOWGRAPH_RATE_LIMIT_MAX_RUNS", default_value_t = 10)]
    rate_limit_max_runs: usize,
    #[arg(long, env = "FLOWGRAPH_MAX_CONSECUTIVE_ERRORS", default_value_t = 5)]
    max_consecutive_errors: usize,
    #[arg(long, env = "FLOWGRAPH_TEST_RUN_MINUTES", default_value_t = 10)]
    test_run_minutes: i64,
}

impl From<RunControlArgs> for RunControlConfig {
    fn from(args: RunControlArgs) -> Self {
        Self {
            rate_limit_window_secs: args.rate_limit_window_secs,
            rate_limit_max_runs: args.rate_limit_max_runs,
            max_consecutive_errors: args.max_consecutive_errors,
            test_run_minutes: args.test_run_minutes,
        }
    }
}

// ---------------------------------------------------------------------------
// Dry-run actions
// ---------------------------------------------------------------------------

struct DryRunService {
    type_name: String,
}

#[async_trait]
impl Service for DryRunService {
    async fn dispatch(
        &self,
        service: &ServiceDescriptor,
        ctx: &DispatchContext,
    ) -> Result<DispatchResult, NodeError> {
        info!(node_type = %self.type_name, run_id = %ctx.run_id, settings = %service.settings, "dry-run action");
        Ok(DispatchResult::new(service.settings.clone()))
    }
}

fn registry_for(exported: &ExportedWorkflow) -> NodeTypeRegistry {
    let mut registry = NodeTypeRegistry::with_builtins();
    for node in &exported.nodes {
        if registry.contains(&node.node_type) {
            continue;
        }
        if node.previous_node_id.is_none() && node.parent_node_id.is_none() {
            registry.register(EventTriggerType::new(node.node_type.clone()));
        } else {
            let service = Arc::new(DryRunService { type_name: node.node_type.clone() });
            registry.register_action(node.node_type.clone(), service);
        }
    }
    registry
}

fn read_workflow(path: &Path) -> Result<ExportedWorkflow> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("cannot read file {}", path.display()))?;
    serde_json::from_str(&content).with_context(|| format!("invalid workflow JSON in {}", path.display()))
}

async fn open_store(database_url: &str) -> Result<Arc<dyn GraphStore>> {
    let pool = db::pool::create_pool(database_url, 5)
        .await
        .context("failed to connect to database")?;
    db::pool::run_migrations(&pool).await.context("migration failed")?;
    Ok(Arc::new(SqlGraphStore::new(pool)))
}

// ---------------------------------------------------------------------------
// Commands
// ---------------------------------------------------------------------------

async fn validate(path: &Path) -> Result<()> {
    let exported = read_workflow(path)?;
    let registry = registry_for(&exported);

    let store = MemoryGraphStore::new();
    let workflow = Workflow::new(Uuid::nil(), exported.name.clone(), 1);
    let mut mapping = IdMapping::new();
    let (_, nodes) = import_workflow(&store, &registry, workflow, &exported, &mut mapping).await?;

    match validate_graph(&nodes, &registry) {
        Ok(order) => {
            let reverse: HashMap<NodeId, NodeId> =
                mapping.nodes.iter().map(|(old, new)| (*new, *old)).collect();
            let order: Vec<NodeId> = order.iter().filter_map(|id| reverse.get(id).copied()).collect();
            println!("Workflow is valid. Walk order: {order:?}");
            Ok(())
        }
        Err(e) => bail!("validation failed: {e}"),
    }
}

/// Import the file, push one run through the queue and wait for it.
async fn run_once(
    path: &Path,
    payload: &str,
    until: Option<Uuid>,
    store_args: StoreArgs,
    config: RunControlConfig,
) -> Result<()> {
    let exported = read_workflow(path)?;
    let payload: serde_json::Value = serde_json::from_str(payload).context("invalid --payload JSON")?;
    let registry = Arc::new(registry_for(&exported));
    let store = open_store(&store_args.database_url).await?;

    let workflow = Workflow::new(Uuid::new_v4(), exported.name.clone(), 1);
    let mut mapping = IdMapping::new();
    let (workflow, _) = import_workflow(store.as_ref(), &registry, workflow, &exported, &mut mapping).await?;
    let simulate_until = match until {
        Some(old) => Some(
            *mapping
                .nodes
                .get(&old)
                .with_context(|| format!("node {old} is not part of the workflow"))?,
        ),
        None => None,
    };

    let (run_queue, receiver) = RunQueue::new(DEFAULT_CAPACITY);
    let controller = Arc::new(RunController::new(store.clone(), registry, Arc::new(run_queue.clone()), config));
    let (worker, shutdown) = RunWorker::new(receiver, controller.clone());
    let worker = tokio::spawn(worker.run());

    run_queue
        .enqueue(RunRequest { workflow_id: workflow.id, payload: Some(payload), simulate_until })
        .await?;
    shutdown.trigger();
    worker.await.context("run worker panicked")?;

    report(store.as_ref(), &controller, workflow.id, simulate_until).await
}

async fn report(
    store: &dyn GraphStore,
    controller: &RunController,
    workflow_id: WorkflowId,
    simulate_until: Option<NodeId>,
) -> Result<()> {
    if let Some(target) = simulate_until {
        let node = store.get_node(target).await?;
        match node.service.sample_data {
            Some(sample) => println!("Sample data of {}: {}", node.id, serde_json::to_string_pretty(&sample)?),
            None => bail!("simulation did not reach node {target}"),
        }
        return Ok(());
    }

    let history = controller.history_of(workflow_id, 1).await?;
    let Some(entry) = history.first() else {
        bail!("no run was recorded");
    };
    println!("Run {}: {} {}", entry.id, entry.status, entry.message);
    if entry.status != HistoryStatus::Success {
        bail!("run ended with status {}", entry.status);
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Migrate { database_url } => {
            info!("Running migrations against {database_url}");
            let pool = db::pool::create_pool(&database_url, 2)
                .await
                .context("failed to connect to database")?;
            db::pool::run_migrations(&pool).await.context("migration failed")?;
            info!("Migrations applied successfully");
        }
        Command::Validate { path } => validate(&path).await?,
        Command::Run { path, payload, store, run_control } => {
            run_once(&path, &payload, None, store, run_control.into()).await?;
        }
        Command::Simulate { path, until, payload, store, run_control } => {
            run_once(&path, &payload, Some(until), store, run_control.into()).await?;
        }
    }

    Ok(())
}
