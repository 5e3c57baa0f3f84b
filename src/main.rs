use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use std::{sync::Arc, time::Duration};
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, fmt};

use cube::{
    config::{EngineKind, ManagerConfig, WorkerConfig},
    manager::{Manager, manager_server, process_tasks, sync_tasks},
    scheduler::{SchedulerKind, new_scheduler},
    tasks::{docker::DockerEngine, engine::ContainerEngine, memory::InMemoryEngine, types::DockerClient},
    worker::{Worker, collect_stats, run_tasks, worker_server},
};

#[derive(Debug, Parser)]
#[command(name = "cube", version, about = "Minimal container task orchestrator")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run tasks on this host.
    Worker(WorkerArgs),
    /// Accept task events and place them on workers.
    Manager(ManagerArgs),
}

#[derive(Debug, Args)]
struct WorkerArgs {
    #[arg(long, default_value = "worker-1")]
    name: String,

    #[arg(long, env = "CUBE_WORKER_HOST", default_value = "127.0.0.1")]
    address: String,

    #[arg(long, env = "CUBE_WORKER_PORT", default_value_t = 5555)]
    port: u16,

    /// Container engine to drive.
    #[arg(long, value_enum, default_value_t = EngineKind::Docker)]
    engine: EngineKind,

    #[arg(long, default_value_t = 300)]
    pull_timeout_secs: u64,

    #[arg(long, default_value_t = 30)]
    log_timeout_secs: u64,

    #[arg(long, default_value_t = 15)]
    stats_interval_secs: u64,
}

#[derive(Debug, Args)]
struct ManagerArgs {
    #[arg(long, env = "CUBE_MANAGER_HOST", default_value = "127.0.0.1")]
    address: String,

    #[arg(long, env = "CUBE_MANAGER_PORT", default_value_t = 5556)]
    port: u16,

    /// Worker APIs as host:port, comma separated.
    #[arg(long, env = "CUBE_WORKERS", value_delimiter = ',', required = true)]
    workers: Vec<String>,

    #[arg(long, value_enum, default_value_t = SchedulerKind::RoundRobin)]
    scheduler: SchedulerKind,

    #[arg(long, default_value_t = 10)]
    send_interval_secs: u64,

    #[arg(long, default_value_t = 15)]
    update_interval_secs: u64,
}

impl From<WorkerArgs> for WorkerConfig {
    fn from(args: WorkerArgs) -> Self {
        WorkerConfig {
            name: args.name,
            address: args.address,
            port: args.port,
            engine: args.engine,
            pull_timeout: Duration::from_secs(args.pull_timeout_secs),
            log_timeout: Duration::from_secs(args.log_timeout_secs),
            stats_interval: Duration::from_secs(args.stats_interval_secs),
        }
    }
}

impl From<ManagerArgs> for ManagerConfig {
    fn from(args: ManagerArgs) -> Self {
        ManagerConfig {
            address: args.address,
            port: args.port,
            workers: args.workers,
            scheduler: args.scheduler,
            send_interval: Duration::from_secs(args.send_interval_secs),
            update_interval: Duration::from_secs(args.update_interval_secs),
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    fmt()
        .with_target(false)
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::Worker(args) => run_worker(args.into()).await,
        Command::Manager(args) => run_manager(args.into()).await,
    }
}

async fn run_worker(config: WorkerConfig) -> anyhow::Result<()> {
    info!(?config, "starting cube worker");
    match config.engine {
        EngineKind::Docker => {
            let engine = DockerEngine::connect().context("connecting to the docker daemon")?;
            serve_worker(engine, config).await
        }
        EngineKind::Memory => serve_worker(InMemoryEngine::new(), config).await,
    }
}

async fn serve_worker<E: ContainerEngine + 'static>(
    engine: E,
    config: WorkerConfig,
) -> anyhow::Result<()> {
    let runtime =
        DockerClient::new(engine).with_timeouts(config.pull_timeout, config.log_timeout);
    let worker = Arc::new(Worker::new(&config.name, runtime));

    tokio::spawn(run_tasks(worker.clone()));
    tokio::spawn(collect_stats(worker.clone(), config.stats_interval));

    worker_server(worker, &config.address, config.port)
        .start_server(shutdown_signal())
        .await
        .with_context(|| format!("serving worker API on {}:{}", config.address, config.port))
}

async fn run_manager(config: ManagerConfig) -> anyhow::Result<()> {
    info!(?config, "starting cube manager");
    let manager = Arc::new(Manager::new(
        config.workers.clone(),
        new_scheduler(config.scheduler),
    ));

    tokio::spawn(process_tasks(manager.clone(), config.send_interval));
    tokio::spawn(sync_tasks(manager.clone(), config.update_interval));

    manager_server(manager, &config.address, config.port)
        .start_server(shutdown_signal())
        .await
        .with_context(|| format!("serving manager API on {}:{}", config.address, config.port))
}

async fn shutdown_signal() {
    if let Err(err) = signal::ctrl_c().await {
        warn!(error = %err, "could not listen for ctrl-c");
        std::future::pending::<()>().await;
    }
    info!("shutdown requested");
}
