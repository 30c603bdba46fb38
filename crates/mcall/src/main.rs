mod cli;
mod cron;
mod shutdown;

use std::sync::Arc;

use anyhow::Context as _;
use clap::Parser;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing_subscriber::EnvFilter;

use mcall_cluster::{
    Distributor, Elector, ElectorConfig, KubeStore, TaskWorker, lease_name_from_env,
};
use mcall_core::{Batch, Config, Context, RequestConfig, console_items};
use mcall_engine::{EngineConfig, execute_batch};
use mcall_server::{AppState, Credentials};

use crate::cli::Cli;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let mut config = match &cli.config {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };
    apply_cli_overrides(&mut config, &cli);

    let ctx = Arc::new(Context::from_config(&config));
    let engine = EngineConfig::from_config(&config);
    let shutdown = shutdown::listen()?;

    let distributed = std::env::var("LEADER_ELECTION")
        .map(|value| value == "true")
        .unwrap_or(false);

    if config.webserver.enable || distributed {
        run_daemon(config, ctx, engine, shutdown, distributed).await
    } else {
        run_once(&config, ctx, &engine).await
    }
}

fn apply_cli_overrides(config: &mut Config, cli: &Cli) {
    if let Some(format) = cli.format {
        config.response.format = format.into();
    }
    if let Some(encoding) = cli.encoding {
        config.response.encoding.kind = encoding.into();
    }
    if let Some(port) = cli.port {
        config.webserver.port = port;
    }
    if cli.web {
        config.webserver.enable = true;
    }
    if let Some(input) = &cli.input {
        config.request.input = input.clone();
        config.request.kind = cli.kind.into();
    }
    if let Some(name) = &cli.name {
        config.request.name = name.clone();
    }
}

fn batch_from_request(request: &RequestConfig) -> Batch {
    let name = if request.name.is_empty() {
        None
    } else {
        Some(request.name.as_str())
    };
    Batch::new(console_items(&request.input, request.kind, name))
}

async fn run_once(config: &Config, ctx: Arc<Context>, engine: &EngineConfig) -> anyhow::Result<()> {
    if config.request.input.is_empty() {
        anyhow::bail!("no input: pass -i <input> or configure request.input");
    }

    let batch = batch_from_request(&config.request);
    let exit_on_failure = batch.exit_on_failure;
    let output = execute_batch(ctx, engine, batch).await?;
    println!("{}", output.rendered);

    if exit_on_failure && output.any_failed {
        std::process::exit(1);
    }
    Ok(())
}

async fn run_daemon(
    config: Config,
    ctx: Arc<Context>,
    engine: EngineConfig,
    shutdown: watch::Receiver<bool>,
    distributed: bool,
) -> anyhow::Result<()> {
    let mut background = JoinSet::new();

    if distributed {
        let store = Arc::new(KubeStore::connect().await.context("coordination store")?);
        let identity = ctx.hostname.clone();

        let elector = Elector::new(
            store.clone(),
            ElectorConfig::new(lease_name_from_env(), identity.clone()),
        );
        let leadership = elector.leadership();
        let sd = shutdown.clone();
        background.spawn(async move { elector.run(sd).await });

        let items = if config.request.input.is_empty() {
            Vec::new()
        } else {
            batch_from_request(&config.request).items
        };
        let distributor = Distributor::new(store.clone(), identity.clone(), items);
        let sd = shutdown.clone();
        background.spawn(async move { distributor.run(leadership, sd).await });

        let task_worker = TaskWorker::new(store, identity, ctx.clone(), engine.clone());
        let sd = shutdown.clone();
        background.spawn(async move { task_worker.run(sd).await });
    }

    if config.request.cronjob {
        let batch = batch_from_request(&config.request);
        let rule = config.request.rule.clone();
        let cron_ctx = ctx.clone();
        let cron_engine = engine.clone();
        let sd = shutdown.clone();
        background.spawn(async move {
            if let Err(err) = cron::run(cron_ctx, cron_engine, batch, &rule, sd).await {
                tracing::error!(error = %err, "cron scheduler stopped");
            }
        });
    }

    if config.webserver.enable {
        let auth = match &config.webserver.auth {
            Some(path) => Some(Arc::new(Credentials::load(path)?)),
            None => None,
        };
        let state = AppState {
            ctx,
            engine,
            auth,
        };
        mcall_server::serve(state, &config.webserver.host, config.webserver.port, shutdown).await?;
    } else {
        let mut shutdown = shutdown;
        let _ = shutdown.changed().await;
    }

    background.shutdown().await;
    Ok(())
}
