use std::{sync::Arc, time::Duration};

use anyhow::{Context, Result};
use dotenvy::dotenv;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use docnorm::{
    config::{AppConfig, load_config},
    init_registry,
    pipeline::{EnrichmentOptions, Enricher, ExtractionOptions, Intake, Worker, WorkerConfig},
    storage::{JsonTaskStore, JsonTaskStoreConfig, Retention, TaskStore},
};

#[tokio::main]
async fn main() {
    if let Err(err) = run().await {
        error!(error = %err, "Worker crashed");
        for (depth, cause) in err.chain().skip(1).enumerate() {
            error!(cause_depth = depth + 1, cause = %cause, "caused by");
        }
        eprintln!("Worker crashed: {err:#}");
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    init_tracing();
    if let Err(err) = dotenv() {
        if !err.not_found() {
            return Err(err).context("Problem loading .env file");
        }
    }

    let config = load_config()
        .await
        .context("Failed to load application configuration")?;
    let workspace = config.resolved_workspace();

    let registry = Arc::new(init_registry(&config).context("Failed to initialize registry")?);
    info!(
        parsers = ?registry.registered_parsers(),
        enhancers = ?registry.registered_enhancers(),
        "Registry initialized"
    );

    let store = Arc::new(JsonTaskStore::new(JsonTaskStoreConfig {
        working_dir: config.working_dir.clone(),
        namespace: config.store.namespace.clone(),
        workspace: workspace.clone(),
        retention: Retention {
            status_ttl: Duration::from_secs(config.store.status_ttl_secs),
            result_ttl: Duration::from_secs(config.store.result_ttl_secs),
        },
    }));
    store
        .initialize()
        .await
        .context("Failed to initialize task store")?;

    let worker = build_worker(&config, registry, store.clone()).await?;

    let shutdown = CancellationToken::new();
    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        signal_token.cancel();
    });

    let result = worker.run(shutdown).await;

    if let Err(err) = store.finalize().await {
        warn!(error = %err, "Failed to finalize task store");
    }
    result.context("Worker loop failed")
}

async fn build_worker(
    config: &AppConfig,
    registry: Arc<docnorm::Registry>,
    store: Arc<dyn TaskStore>,
) -> Result<Worker> {
    let enricher = Enricher::new(
        registry.clone(),
        EnrichmentOptions {
            max_concurrency: config.enrichment.max_concurrency,
            enhance_timeout: Duration::from_secs(config.enrichment.enhance_timeout_secs),
        },
    );
    let extraction = ExtractionOptions {
        conversion_timeout: config.worker.conversion_timeout(),
    };
    let worker_config = WorkerConfig {
        poll_timeout: config.worker.poll_timeout(),
        idle_sleep: config.worker.idle_sleep(),
    };

    let mut worker = Worker::new(registry, store, enricher, extraction, worker_config);
    if config.worker.intake {
        let input_dir = config.workspace_dir().join("input");
        let intake = Intake::new(&input_dir)
            .await
            .with_context(|| format!("Failed to prepare intake at {}", input_dir.display()))?;
        info!(dir = %input_dir.display(), "Watching input directory");
        worker = worker.with_intake(intake);
    }
    Ok(worker)
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .compact()
        .init();
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            error!(error = %err, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = sigterm(tokio::signal::unix::signal(
        tokio::signal::unix::SignalKind::terminate(),
    ));

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received termination signal (Ctrl+C)");
        }
        _ = terminate => {
            info!("Received termination signal (SIGTERM)");
        }
    }
}

/// Resolves on SIGTERM. Without a handler it never resolves, leaving Ctrl+C
/// as the only way out.
#[cfg(unix)]
async fn sigterm(handler: std::io::Result<tokio::signal::unix::Signal>) {
    match handler {
        Ok(mut stream) => {
            if stream.recv().await.is_some() {
                info!("Received SIGTERM");
            }
        }
        Err(err) => {
            warn!(error = %err, "Failed to install SIGTERM handler");
            std::future::pending::<()>().await;
        }
    }
}
