use std::{path::Path, sync::Arc, time::Duration};

use anyhow::{Result, anyhow};
use tokio::{task, time::Instant};
use tracing::{debug, error, info, warn};

use super::raw::RawDocument;
use super::stages;
use crate::backends::Backend;
use crate::model::{Chunk, ChunkLists, ChunkType, Document};

#[derive(Debug, Clone)]
pub struct ExtractionOptions {
    /// Upper bound for one backend conversion.
    pub conversion_timeout: Duration,
}

impl Default for ExtractionOptions {
    fn default() -> Self {
        Self {
            conversion_timeout: Duration::from_secs(3600),
        }
    }
}

/// Converts `path` with `backend` and normalizes the result.
///
/// Only a failed, panicking or timed-out conversion fails the document. A
/// failing modality stage leaves its list empty and the rest intact.
pub async fn extract_document(
    backend: Arc<dyn Backend>,
    path: &Path,
    options: &ExtractionOptions,
) -> Document {
    let started = Instant::now();
    let backend_name = backend.name();

    let raw = match convert(backend, path, options.conversion_timeout).await {
        Ok(raw) => raw,
        Err(err) => {
            error!(
                backend = backend_name,
                path = %path.display(),
                error = %format!("{err:#}"),
                "document conversion failed"
            );
            return Document::failed(format!("{err:#}"), started.elapsed().as_secs_f64());
        }
    };

    let document = assemble(raw).await;
    let document = Document {
        processing_time: started.elapsed().as_secs_f64(),
        ..document
    };
    info!(
        backend = backend_name,
        path = %path.display(),
        texts = document.texts.len(),
        tables = document.tables.len(),
        images = document.images.len(),
        formulas = document.formulas.len(),
        elapsed = document.processing_time,
        "document extracted"
    );
    document
}

async fn convert(backend: Arc<dyn Backend>, path: &Path, limit: Duration) -> Result<RawDocument> {
    let owned = path.to_path_buf();
    let deadline = std::time::Instant::now().checked_add(limit);
    let handle = task::spawn_blocking(move || match deadline {
        Some(deadline) => backend.convert_until(&owned, deadline),
        None => backend.convert(&owned),
    });

    match tokio::time::timeout(limit, handle).await {
        Ok(Ok(result)) => result,
        Ok(Err(join_err)) => Err(anyhow!("conversion task aborted: {join_err}")),
        // backends honoring the deadline stop on their own; others finish unobserved
        Err(_) => Err(anyhow!("conversion timed out after {}s", limit.as_secs_f64())),
    }
}

/// Runs the four modality stages concurrently over one raw document.
pub async fn assemble(raw: RawDocument) -> Document {
    let title = raw.extract_title();
    let partition = raw.partition();

    let (texts, tables, images, formulas) = tokio::join!(
        run_stage(ChunkType::Text, partition.texts, stages::text_chunks),
        run_stage(ChunkType::Table, partition.tables, stages::table_chunks),
        run_stage(ChunkType::Image, partition.images, stages::image_chunks),
        run_stage(ChunkType::Formula, partition.formulas, stages::formula_chunks),
    );

    Document::succeeded(
        title,
        ChunkLists {
            texts,
            tables,
            images,
            formulas,
        },
        0.0,
    )
}

async fn run_stage<T, F>(kind: ChunkType, items: Vec<T>, stage: F) -> Vec<Chunk>
where
    T: Send + 'static,
    F: FnOnce(Vec<T>) -> Result<Vec<Chunk>> + Send + 'static,
{
    if items.is_empty() {
        return Vec::new();
    }
    let count = items.len();

    match task::spawn_blocking(move || stage(items)).await {
        Ok(Ok(chunks)) => {
            debug!(modality = %kind, items = count, chunks = chunks.len(), "stage finished");
            chunks
        }
        Ok(Err(err)) => {
            warn!(modality = %kind, error = %format!("{err:#}"), "stage failed, dropping modality");
            Vec::new()
        }
        Err(join_err) => {
            warn!(modality = %kind, error = %join_err, "stage panicked, dropping modality");
            Vec::new()
        }
    }
}
