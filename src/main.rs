//! shardscan - sharded, resumable database scan workers

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use serde_json::json;
use shardscan::cli::{Cli, Commands, ConfigCommands};
use shardscan::config::{format_config, load_config, validate_config, ConfigSources, ShardscanConfig};
use shardscan::metrics::MetricsRecorder;
use shardscan::models::{
    EntityKind, JobId, JobSpec, ProcessorSpec, ScanStatistics, StatusSnapshot, StopFlavor, WorkPhase,
    WorkShard, ENTITY_ID_MAX_VALUE,
};
use shardscan::processor::{ProcessorRegistry, TOUCH_PROCESSOR_KIND};
use shardscan::storage::{MemoryDatabase, MemoryWorkerStore, StorageError};
use shardscan::worker::{
    shutdown_signal, spawn_worker, wait_for_shutdown_signal, ScanWorker, StatusReport, WorkerDeps,
    WorkerHandle,
};
use shardscan::WorkerError;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing_subscriber::EnvFilter;

/// Displays an error with suggestions if the error type has them.
fn display_error(err: &anyhow::Error) {
    for cause in err.chain() {
        if let Some(worker_err) = cause.downcast_ref::<WorkerError>() {
            eprintln!("{}", worker_err.display_rich());
            return;
        }
        if let Some(storage_err) = cause.downcast_ref::<StorageError>() {
            eprintln!("{}", storage_err.display_rich());
            return;
        }
    }
    eprintln!("Error: {err:#}");
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    if let Err(e) = run().await {
        display_error(&e);
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let cli = Cli::parse_args();
    let sources = ConfigSources::discover().with_custom_config(cli.config.clone());
    let mut config = load_config(&sources)?;

    match cli.command {
        Commands::Config { command } => {
            match command {
                ConfigCommands::Show => print!("{}", format_config(&config, &sources)),
                ConfigCommands::Validate => {
                    let errors = validate_config(&config);
                    if errors.is_empty() {
                        println!("Configuration is valid.");
                    } else {
                        eprintln!("Configuration errors:");
                        for error in &errors {
                            eprintln!("  - {error}");
                        }
                        std::process::exit(1);
                    }
                }
            }
            Ok(())
        }
        Commands::Demo {
            workers,
            db_shards,
            entities,
            kind,
            batch_size,
            restart,
        } => {
            if let Some(workers) = workers {
                config.demo.num_workers = workers;
            }
            if let Some(db_shards) = db_shards {
                config.demo.num_db_shards = db_shards;
            }
            if let Some(entities) = entities {
                config.demo.num_entities = entities;
            }
            let errors = validate_config(&config);
            if !errors.is_empty() {
                bail!("invalid configuration: {}", errors.join("; "));
            }
            run_demo(&config, EntityKind::new(kind), batch_size, restart).await
        }
    }
}

/// A set of spawned workers sharing one shutdown channel.
struct WorkerSet {
    handles: Vec<WorkerHandle>,
    tasks: Vec<JoinHandle<Result<(), WorkerError>>>,
    shutdown_tx: watch::Sender<bool>,
}

impl WorkerSet {
    async fn load(config: &ShardscanConfig, deps: &WorkerDeps) -> Result<Self> {
        let (shutdown_tx, shutdown_rx) = shutdown_signal();
        let mut handles = Vec::new();
        let mut tasks = Vec::new();
        for index in 0..config.demo.num_workers {
            let worker = ScanWorker::load(worker_id(index), deps.clone(), config.worker.clone())
                .await
                .with_context(|| format!("failed to load worker {index}"))?;
            let (handle, task) = spawn_worker(worker, shutdown_rx.clone());
            handles.push(handle);
            tasks.push(task);
        }
        Ok(Self {
            handles,
            tasks,
            shutdown_tx,
        })
    }

    async fn shutdown(self) -> Result<()> {
        self.shutdown_tx.send(true).ok();
        for task in self.tasks {
            task.await.context("worker task panicked")??;
        }
        Ok(())
    }
}

fn worker_id(index: u32) -> String {
    format!("DatabaseScanWorker:{index}")
}

#[allow(clippy::too_many_lines)]
async fn run_demo(config: &ShardscanConfig, kind: EntityKind, batch_size: usize, restart: bool) -> Result<()> {
    let demo = &config.demo;
    let database = Arc::new(MemoryDatabase::new(demo.num_db_shards));
    let step = (ENTITY_ID_MAX_VALUE / demo.num_entities.max(1)).max(1);
    database
        .populate(&kind, (0..demo.num_entities).map(|i| i * step + 1))
        .await;
    let num_entities = database.count(&kind).await;

    let (status_tx, mut status_rx) = mpsc::unbounded_channel::<StatusReport>();
    let deps = WorkerDeps {
        database: database.clone(),
        store: Arc::new(MemoryWorkerStore::new()),
        registry: Arc::new(ProcessorRegistry::with_builtin()),
        metrics: Arc::new(MetricsRecorder),
        status_sender: Some(status_tx),
    };

    let (signal_tx, mut signal_rx) = shutdown_signal();
    tokio::spawn(wait_for_shutdown_signal(signal_tx));

    let mut workers = WorkerSet::load(config, &deps).await?;
    let job_id = JobId::new();
    let spec = JobSpec::range_scan(
        kind.clone(),
        ProcessorSpec::new(TOUCH_PROCESSOR_KIND).with_params(json!({ "batch_size": batch_size })),
    );
    tracing::info!(
        job_id = %job_id,
        entity_kind = %kind,
        num_entities,
        num_workers = demo.num_workers,
        num_db_shards = demo.num_db_shards,
        "Starting scan job"
    );

    for (index, handle) in (0..demo.num_workers).zip(&workers.handles) {
        let work_shard = WorkShard::new(index, demo.num_workers);
        handle.ensure_initialized(job_id, spec.clone(), work_shard).await?;
    }
    for handle in &workers.handles {
        handle.ensure_resumed().await?;
    }

    let mut latest: HashMap<String, StatusSnapshot> = HashMap::new();
    let mut restarted = !restart;
    let mut cancelled = false;
    loop {
        tokio::select! {
            report = status_rx.recv() => {
                let Some(report) = report else {
                    bail!("status report channel closed");
                };
                record_report(&mut latest, report);
            }
            _ = signal_rx.changed() => {
                cancelled = true;
                break;
            }
        }

        let statuses: Vec<&ScanStatistics> = latest.values().map(|s| &s.scan_statistics).collect();
        let progress = ScanStatistics::aggregate(statuses);
        tracing::info!(
            items_scanned = progress.num_items_scanned,
            ratio = f64::from(progress.scanned_ratio_estimate),
            "Progress"
        );

        let all_finished = latest.len() == workers.handles.len()
            && latest.values().all(|s| s.phase == WorkPhase::Finished);
        if all_finished {
            break;
        }
        if !restarted && progress.scanned_ratio_estimate >= 0.5 {
            tracing::info!("Restarting all workers from their persisted state");
            workers.shutdown().await?;
            workers = WorkerSet::load(config, &deps).await?;
            restarted = true;
        }
    }

    let flavor = if cancelled { StopFlavor::Cancel } else { StopFlavor::Finished };
    let mut final_stats = Vec::new();
    for handle in &workers.handles {
        if let Some(status) = handle.ensure_stopped(flavor).await? {
            final_stats.push(status.scan_statistics);
        }
    }
    workers.shutdown().await?;

    let total = ScanStatistics::aggregate(&final_stats);
    println!("Job {job_id} {}", if cancelled { "cancelled" } else { "finished" });
    println!("  entities in database: {num_entities}");
    println!("  items scanned:        {}", total.num_items_scanned);
    println!("  persists:             {}", total.worker_persist_count);
    println!("  persisted bytes:      {}", total.worker_persist_total_bytes);
    println!("  recreations:          {}", total.num_work_processor_recreations);
    println!("  database queries:     {}", database.num_queries());
    Ok(())
}

/// Keeps the newest report per worker.
fn record_report(latest: &mut HashMap<String, StatusSnapshot>, report: StatusReport) {
    let newer = latest.get(&report.worker_id).map_or(true, |current| {
        current.job_id != report.status.job_id
            || current.status_observation_index < report.status.status_observation_index
    });
    if newer {
        latest.insert(report.worker_id, report.status);
    }
}
