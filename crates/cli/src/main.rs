//! `flowrunner` CLI entry-point.
//!
//! Available sub-commands:
//! - `serve`         — start the webhook and push server.
//! - `execute`       — run one workflow and print its result.
//! - `execute-batch` — regression-run many workflows.
//! - `migrate`       — run pending database migrations.
//! - `validate`      — validate a workflow JSON file.
//! - `worker`        — (internal) execution worker speaking JSON lines on stdio.

mod stack;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use clap::{Args, Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use batch::{BatchConfig, BatchRunner, SupervisorExecutor};
use engine::{ExecutionMode, ExecutorConfig, Workflow};
use nodes::NodeTypes;
use runner::{StartRequest, Worker};

use crate::stack::{StoreArgs, SupervisorArgs};

#[derive(Parser)]
#[command(name = "flowrunner", about = "Workflow execution and webhook runtime", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Serve production and test webhooks plus the push stream.
    Serve {
        #[arg(long, default_value = "0.0.0.0:5678")]
        bind: String,
        #[command(flatten)]
        store: StoreArgs,
        #[command(flatten)]
        supervisor: SupervisorArgs,
        /// Seconds an armed test webhook waits for its request.
        #[arg(long, env = "FLOWRUNNER_TEST_WEBHOOK_TTL", default_value_t = 120)]
        test_webhook_ttl: u64,
    },
    /// Run a single workflow and print the execution result as JSON.
    Execute {
        /// Id of a stored workflow.
        #[arg(long, conflicts_with = "file", required_unless_present = "file")]
        id: Option<String>,
        /// Path to a workflow JSON file.
        #[arg(long)]
        file: Option<PathBuf>,
        #[command(flatten)]
        store: StoreArgs,
        #[command(flatten)]
        supervisor: SupervisorArgs,
    },
    /// Run many workflows with bounded concurrency, retries and snapshots.
    ExecuteBatch(BatchArgs),
    /// Run pending database migrations.
    Migrate {
        #[arg(long, env = "DATABASE_URL")]
        database_url: String,
    },
    /// Validate a workflow definition JSON file.
    Validate {
        /// Path to the workflow JSON file.
        path: PathBuf,
    },
    /// Execution worker; spawned by the supervisor.
    #[command(hide = true)]
    Worker,
}

#[derive(Args)]
struct BatchArgs {
    /// Comma-separated workflow ids; all workflows when omitted.
    #[arg(long)]
    ids: Option<String>,
    /// File with comma-separated ids to leave out.
    #[arg(long)]
    skip_list: Option<PathBuf>,
    #[arg(long, default_value_t = 1)]
    concurrency: usize,
    #[arg(long, default_value_t = 1)]
    retries: u32,
    /// Seconds before a single run is abandoned as a warning.
    #[arg(long, default_value_t = 180)]
    run_timeout: u64,
    /// Write the JSON summary here.
    #[arg(long)]
    output: Option<PathBuf>,
    /// Directory to write snapshots to.
    #[arg(long)]
    snapshot: Option<PathBuf>,
    /// Directory to compare against.
    #[arg(long)]
    compare: Option<PathBuf>,
    #[arg(long)]
    shallow: bool,
    /// Omit successful runs from the summary's execution list.
    #[arg(long)]
    short_output: bool,
    #[command(flatten)]
    store: StoreArgs,
    #[command(flatten)]
    supervisor: SupervisorArgs,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Serve { bind, store, supervisor, test_webhook_ttl } => {
            let stack = stack::Stack::build(&store, &supervisor).await?;
            stack.serve(&bind, Duration::from_secs(test_webhook_ttl)).await?;
        }
        Command::Execute { id, file, store, supervisor } => {
            let stack = stack::Stack::build(&store, &supervisor).await?;
            let workflow = match (id, file) {
                (Some(id), _) => stack
                    .stores
                    .workflows
                    .find_by_id(&id)
                    .await?
                    .with_context(|| format!("workflow '{id}' not found"))?,
                (None, Some(path)) => read_workflow(&path).await?,
                (None, None) => bail!("either --id or --file is required"),
            };
            info!(workflow_id = %workflow.id, "executing workflow");

            let result = stack.supervisor.run(StartRequest::new(workflow, ExecutionMode::Cli)).await?;
            println!("{}", serde_json::to_string_pretty(&result)?);
            if let Some(error) = result.error() {
                warn!("execution failed: {}", error.message);
                std::process::exit(1);
            }
        }
        Command::ExecuteBatch(args) => {
            let code = execute_batch(args).await?;
            std::process::exit(code);
        }
        Command::Migrate { database_url } => {
            info!("Running migrations against {database_url}");
            let pool = db::pool::create_pool(&database_url, db::pool::PoolConfig::single_use()).await.context("failed to connect to database")?;
            db::pool::run_migrations(&pool).await.context("migration failed")?;
            info!("Migrations applied successfully");
        }
        Command::Validate { path } => {
            let workflow = read_workflow(&path).await?;
            match engine::validate_dag(&workflow) {
                Ok(order) => println!("Workflow is valid. Execution order: {order:?}"),
                Err(e) => {
                    eprintln!("Validation failed: {e}");
                    std::process::exit(1);
                }
            }
        }
        Command::Worker => {
            let worker = Worker::new(NodeTypes::with_builtins(), ExecutorConfig::default());
            let code = match runner::run_stdio(worker).await {
                Ok(()) => 0,
                Err(e) => {
                    tracing::error!("worker failed: {e}");
                    1
                }
            };
            // The stdin reader would otherwise keep the runtime alive.
            std::process::exit(code);
        }
    }
    Ok(())
}

async fn execute_batch(args: BatchArgs) -> anyhow::Result<i32> {
    let mut skip = Vec::new();
    if let Some(path) = &args.skip_list {
        skip = batch::read_skip_list(path).await?;
    }
    let config = BatchConfig {
        ids: args.ids.as_deref().map(batch::parse_ids).transpose()?,
        skip,
        concurrency: args.concurrency,
        retries: args.retries,
        run_timeout: Duration::from_secs(args.run_timeout),
        snapshot_dir: args.snapshot,
        compare_dir: args.compare,
        shallow: args.shallow,
        short_output: args.short_output,
        output: args.output,
        progress: true,
    };

    let stack = stack::Stack::build(&args.store, &args.supervisor).await?;
    let workflows = batch::select_workflows(stack.stores.workflows.as_ref(), &config).await?;
    info!(workflows = workflows.len(), concurrency = config.concurrency, "starting batch");

    let output = config.output.clone();
    let runner = BatchRunner::new(Arc::new(SupervisorExecutor::new(stack.supervisor.clone())), config);
    let cancel = runner.cancel_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupted, finishing running workflows");
            cancel.cancel();
        }
    });

    let summary = runner.run(workflows).await;
    if let Some(path) = output {
        summary.write_json(&path).await?;
        info!("summary written to {}", path.display());
    }
    println!(
        "{} succeeded, {} warnings, {} failed ({:?})",
        summary.successful_executions, summary.warning_executions, summary.failed_executions, summary.signal
    );
    for failure in &summary.failures {
        println!(
            "  {:?} {} ({}): {}",
            failure.status,
            failure.workflow_id,
            failure.workflow_name,
            failure.message.as_deref().unwrap_or("-")
        );
    }
    Ok(summary.exit_code())
}

async fn read_workflow(path: &std::path::Path) -> anyhow::Result<Workflow> {
    let content = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("cannot read file {}", path.display()))?;
    serde_json::from_str(&content).context("invalid workflow JSON")
}
