//! Lingo ingestion worker binary.
//!
//! Usage: `lingo-worker <manifest.json>` where the manifest is a JSON list of
//! `{ "kind": ..., "input": { ... } }` entries.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{bail, Context};
use futures_util::StreamExt;
use serde::Deserialize;
use tokio::task::JoinSet;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use lingo_ai::DefaultEngineFactory;
use lingo_models::{TaskInput, TaskKind, TaskState};
use lingo_queue::RedisProgressRelay;
use lingo_store::MemoryGateway;
use lingo_worker::{Orchestrator, WorkerConfig};

#[derive(Debug, Deserialize)]
struct ManifestEntry {
    kind: TaskKind,
    input: TaskInput,
}

fn init_tracing() {
    let use_json = std::env::var("LOG_FORMAT")
        .map(|v| v.to_lowercase() == "json")
        .unwrap_or(false);

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,lingo=info"));

    if use_json {
        tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(env_filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(
                fmt::layer()
                    .with_ansi(true)
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_file(false)
                    .with_line_number(false),
            )
            .with(env_filter)
            .init();
    }
}

fn load_manifest(path: &str) -> anyhow::Result<Vec<ManifestEntry>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read manifest {}", path))?;
    serde_json::from_str(&raw).with_context(|| format!("invalid manifest {}", path))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    let Some(manifest_path) = std::env::args().nth(1) else {
        bail!("usage: lingo-worker <manifest.json>");
    };
    let entries = load_manifest(&manifest_path)?;

    if let Ok(addr) = std::env::var("METRICS_ADDR") {
        let addr: SocketAddr = addr
            .parse()
            .with_context(|| format!("invalid METRICS_ADDR {}", addr))?;
        lingo_worker::metrics::install_prometheus(addr).context("failed to install metrics exporter")?;
        info!(%addr, "Serving Prometheus metrics");
    }

    info!("Starting lingo-worker");
    let config = WorkerConfig::from_env();
    info!("Worker config: {:?}", config);

    let gateway = Arc::new(MemoryGateway::new());
    let engines = Arc::new(DefaultEngineFactory::from_env());
    let orchestrator = match RedisProgressRelay::from_env()? {
        Some(relay) => {
            info!("Relaying progress through Redis");
            Orchestrator::with_progress_relay(config, gateway, engines, relay)
        }
        None => Orchestrator::new(config, gateway, engines),
    };
    let orchestrator = Arc::new(orchestrator);
    orchestrator.start().await;

    let mut watchers = JoinSet::new();
    for entry in entries {
        let task_id = match orchestrator.submit_task(entry.kind, entry.input).await {
            Ok(task_id) => task_id,
            Err(e) => {
                error!(kind = entry.kind.as_str(), "Submission rejected: {}", e);
                continue;
            }
        };
        let Some(mut updates) = orchestrator.subscribe(&task_id).await else {
            continue;
        };
        watchers.spawn(async move {
            let mut last = None;
            while let Some(status) = updates.next().await {
                info!(
                    task_id = %status.task_id,
                    state = %status.state,
                    progress = status.progress,
                    attempt = status.attempt,
                    "{}", status.message
                );
                last = Some(status);
            }
            last
        });
    }

    let finished = async {
        let (mut succeeded, mut failed) = (0usize, 0usize);
        while let Some(joined) = watchers.join_next().await {
            match joined {
                Ok(Some(status)) if status.state == TaskState::Success => succeeded += 1,
                Ok(Some(status)) => {
                    if let Some(err) = &status.error {
                        warn!(
                            task_id = %status.task_id,
                            kind = err.kind.as_str(),
                            "Task failed: {}", err.message
                        );
                    }
                    failed += 1;
                }
                Ok(None) => failed += 1,
                Err(e) => {
                    error!("Status watcher panicked: {}", e);
                    failed += 1;
                }
            }
        }
        (succeeded, failed)
    };

    tokio::select! {
        (succeeded, failed) = finished => {
            info!(succeeded, failed, "All tasks finished");
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal");
        }
    }

    orchestrator.shutdown().await;
    info!("Worker shutdown complete");
    Ok(())
}
