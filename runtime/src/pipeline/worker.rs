use std::{path::Path, sync::Arc, time::Duration};

use anyhow::Result;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::enrichment::Enricher;
use super::extraction::ExtractionOptions;
use super::intake::Intake;
use crate::model::Document;
use crate::registry::Registry;
use crate::storage::{Task, TaskStatus, TaskStore};

const PURGE_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub poll_timeout: Duration,
    pub idle_sleep: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            poll_timeout: Duration::from_secs(1),
            idle_sleep: Duration::from_secs(1),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskOutcome {
    Completed,
    Failed,
    /// No parser for the file extension; reported as failed.
    Unsupported,
}

pub struct Worker {
    registry: Arc<Registry>,
    store: Arc<dyn TaskStore>,
    enricher: Enricher,
    extraction: ExtractionOptions,
    config: WorkerConfig,
    intake: Option<Intake>,
}

impl Worker {
    pub fn new(
        registry: Arc<Registry>,
        store: Arc<dyn TaskStore>,
        enricher: Enricher,
        extraction: ExtractionOptions,
        config: WorkerConfig,
    ) -> Self {
        Self {
            registry,
            store,
            enricher,
            extraction,
            config,
            intake: None,
        }
    }

    pub fn with_intake(mut self, intake: Intake) -> Self {
        self.intake = Some(intake);
        self
    }

    /// Polls until `shutdown` is cancelled. A task in progress is finished
    /// before the loop observes cancellation.
    pub async fn run(&self, shutdown: CancellationToken) -> Result<()> {
        info!(
            parsers = ?self.registry.supported_extensions(),
            poll_ms = self.config.poll_timeout.as_millis() as u64,
            "worker started"
        );
        let mut last_purge = Instant::now();

        while !shutdown.is_cancelled() {
            if let Some(intake) = &self.intake {
                if let Err(err) = intake.scan(self.store.as_ref()).await {
                    warn!(error = %err, dir = %intake.input_dir().display(), "input scan failed");
                }
            }

            let polled = tokio::select! {
                _ = shutdown.cancelled() => break,
                polled = self.store.pop_next_task(self.config.poll_timeout) => polled,
            };

            match polled {
                Ok(Some(task)) => {
                    self.process_task(task).await;
                    continue;
                }
                Ok(None) => {
                    if last_purge.elapsed() >= PURGE_INTERVAL {
                        last_purge = Instant::now();
                        match self.store.purge_expired().await {
                            Ok(0) => {}
                            Ok(purged) => debug!(purged, "purged expired task entries"),
                            Err(err) => warn!(error = %err, "failed to purge expired entries"),
                        }
                    }
                }
                Err(err) => error!(error = %err, "failed to poll task queue"),
            }

            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(self.config.idle_sleep) => {}
            }
        }

        info!("worker stopped");
        Ok(())
    }

    pub async fn process_task(&self, task: Task) -> TaskOutcome {
        let task_id = task.task_id.as_str();
        let path = task.file_path.as_path();

        let Some(parser) = self.registry.resolve_parser(path) else {
            let message = format!("unsupported file format: {}", describe_extension(path));
            warn!(task_id, path = %path.display(), "no parser registered, failing task");
            self.finish(task_id, TaskStatus::Failed, &Document::failed(message, 0.0))
                .await;
            return TaskOutcome::Unsupported;
        };

        info!(
            task_id,
            path = %path.display(),
            parser = parser.extension(),
            "processing task"
        );
        self.set_status(task_id, TaskStatus::Processing).await;

        let document = parser.parse_with(path, &self.extraction).await;
        if !document.success {
            error!(
                task_id,
                error = document.error_message.as_deref().unwrap_or("unknown error"),
                "failed to process document"
            );
            self.finish(task_id, TaskStatus::Failed, &document).await;
            return TaskOutcome::Failed;
        }

        let document = self.enricher.enrich(document).await;
        if let Err(err) = document.validate() {
            warn!(task_id, error = %err, "document failed validation");
        }

        self.finish(task_id, TaskStatus::Completed, &document).await;
        info!(
            task_id,
            chunks = document.chunk_count(),
            elapsed = document.processing_time,
            "task completed"
        );
        TaskOutcome::Completed
    }

    /// Stores the result first so a terminal status always has one.
    async fn finish(&self, task_id: &str, status: TaskStatus, document: &Document) {
        if let Err(err) = self.store.store_result(task_id, document).await {
            error!(task_id, error = %err, "failed to store task result");
            for (depth, cause) in err.chain().skip(1).enumerate() {
                error!(
                    task_id,
                    cause_depth = depth + 1,
                    cause = %cause,
                    "caused by"
                );
            }
        }
        self.set_status(task_id, status).await;
    }

    async fn set_status(&self, task_id: &str, status: TaskStatus) {
        if let Err(err) = self.store.set_status(task_id, status).await {
            error!(task_id, %status, error = %err, "failed to update task status");
        }
    }
}

fn describe_extension(path: &Path) -> String {
    match path.extension() {
        Some(ext) => format!(".{}", ext.to_string_lossy().to_lowercase()),
        None => "(none)".to_string(),
    }
}
