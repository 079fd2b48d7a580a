//! Wiring of stores, supervisor and webhook lifecycles from CLI arguments.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Args;
use serde_json::Value;
use tracing::{info, warn};

use api::{AppState, PushHub};
use engine::postgres::PgStore;
use engine::{CredentialsResolver, MemoryStore, NoCredentials, StaticCredentials};
use nodes::NodeTypes;
use runner::{ProcessLauncher, Stores, Supervisor, SupervisorConfig, UiSink};
use webhooks::{ActiveWorkflows, PushUiSink, TestWebhookConfig, TestWebhooks, WebhookRegistry};

#[derive(Args, Clone)]
pub struct StoreArgs {
    /// Postgres connection string; takes precedence over the workflow directory.
    #[arg(long, env = "DATABASE_URL")]
    pub database_url: Option<String>,
    /// Directory of workflow JSON files used when no database is configured.
    #[arg(long, env = "FLOWRUNNER_WORKFLOW_DIR")]
    pub workflow_dir: Option<PathBuf>,
    /// JSON object of decrypted credentials keyed by credential name.
    #[arg(long, env = "FLOWRUNNER_CREDENTIALS_FILE")]
    pub credentials: Option<PathBuf>,
}

#[derive(Args, Clone)]
pub struct SupervisorArgs {
    /// Default execution timeout in seconds; -1 disables it.
    #[arg(long, env = "FLOWRUNNER_EXECUTION_TIMEOUT", default_value_t = -1, allow_negative_numbers = true)]
    pub execution_timeout: i64,
    /// Upper bound for any execution timeout, in seconds.
    #[arg(long, env = "FLOWRUNNER_MAX_EXECUTION_TIMEOUT", default_value_t = 3600)]
    pub max_execution_timeout: u64,
}

impl SupervisorArgs {
    fn config(&self) -> SupervisorConfig {
        SupervisorConfig {
            execution_timeout: self.execution_timeout,
            max_execution_timeout: Duration::from_secs(self.max_execution_timeout),
            ..SupervisorConfig::default()
        }
    }
}

pub struct Stack {
    pub stores: Stores,
    pub supervisor: Supervisor,
    node_types: NodeTypes,
    push: Arc<PushHub>,
}

impl Stack {
    pub async fn build(store: &StoreArgs, supervisor: &SupervisorArgs) -> anyhow::Result<Self> {
        let stores = open_stores(store).await?;
        let node_types = NodeTypes::with_builtins();
        let push = Arc::new(PushHub::new());
        let ui: Arc<dyn UiSink> = Arc::new(PushUiSink(push.clone()));
        let supervisor = Supervisor::with_ui(
            Arc::new(ProcessLauncher::current_exe()?),
            node_types.clone(),
            stores.clone(),
            supervisor.config(),
            Some(ui),
        );
        Ok(Self { stores, supervisor, node_types, push })
    }

    /// Activate stored workflows and serve HTTP until Ctrl-C.
    pub async fn serve(self, bind: &str, test_webhook_ttl: Duration) -> anyhow::Result<()> {
        let registry = WebhookRegistry::new();
        let active = Arc::new(ActiveWorkflows::new(
            registry.clone(),
            self.stores.workflows.clone(),
            self.node_types.clone(),
            self.supervisor.clone(),
        ));
        active.init().await?;

        let tests = TestWebhooks::new(
            registry,
            self.node_types.clone(),
            self.supervisor.clone(),
            self.push.clone(),
            TestWebhookConfig { ttl: test_webhook_ttl },
        );
        let state = AppState {
            workflows: self.stores.workflows.clone(),
            supervisor: self.supervisor.clone(),
            active: active.clone(),
            tests,
            push: self.push.clone(),
        };

        api::serve(bind, state, async {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutting down");
        })
        .await?;

        active.remove_all();
        Ok(())
    }
}

async fn open_stores(args: &StoreArgs) -> anyhow::Result<Stores> {
    let credentials: Arc<dyn CredentialsResolver> = match &args.credentials {
        Some(path) => {
            let raw = tokio::fs::read_to_string(path)
                .await
                .with_context(|| format!("cannot read credentials {}", path.display()))?;
            let values: HashMap<String, Value> =
                serde_json::from_str(&raw).context("credentials file must be a JSON object")?;
            Arc::new(StaticCredentials(values))
        }
        None => Arc::new(NoCredentials),
    };

    if let Some(url) = &args.database_url {
        let pool = db::pool::create_pool(url, db::pool::PoolConfig::default()).await.context("failed to connect to database")?;
        let store = Arc::new(PgStore::new(pool));
        return Ok(Stores { workflows: store.clone(), executions: store, credentials });
    }
    if let Some(dir) = &args.workflow_dir {
        let store = Arc::new(MemoryStore::load_dir(dir).await?);
        return Ok(Stores { workflows: store.clone(), executions: store, credentials });
    }
    warn!("no DATABASE_URL or FLOWRUNNER_WORKFLOW_DIR configured, using an empty in-memory store");
    let store = Arc::new(MemoryStore::new());
    Ok(Stores { workflows: store.clone(), executions: store, credentials })
}
