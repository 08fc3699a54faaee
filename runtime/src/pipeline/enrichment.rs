use std::{sync::Arc, time::Duration};

use futures::future::join_all;
use tokio::{sync::Semaphore, task::JoinHandle};
use tracing::{debug, error, warn};

use crate::enhancers::Enhancer;
use crate::model::{Chunk, ChunkLists, Document};
use crate::registry::Registry;

pub const DEFAULT_MAX_CONCURRENCY: usize = 10;

#[derive(Debug, Clone)]
pub struct EnrichmentOptions {
    pub max_concurrency: usize,
    pub enhance_timeout: Duration,
}

impl Default for EnrichmentOptions {
    fn default() -> Self {
        Self {
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
            enhance_timeout: Duration::from_secs(120),
        }
    }
}

/// Applies each chunk's modality enhancer with at most `max_concurrency`
/// calls in flight.
pub struct Enricher {
    registry: Arc<Registry>,
    limiter: Arc<Semaphore>,
    options: EnrichmentOptions,
}

enum Pending {
    Ready(Chunk),
    Running { original: Chunk, handle: JoinHandle<Chunk> },
}

impl Enricher {
    pub fn new(registry: Arc<Registry>, options: EnrichmentOptions) -> Self {
        let limiter = Arc::new(Semaphore::new(options.max_concurrency.max(1)));
        Self {
            registry,
            limiter,
            options,
        }
    }

    pub fn options(&self) -> &EnrichmentOptions {
        &self.options
    }

    /// Returns a document of the same shape. A chunk whose enhancement fails,
    /// times out or changes its type is kept as it was.
    pub async fn enrich(&self, mut document: Document) -> Document {
        if !document.success {
            return document;
        }

        let (flat, lengths) = document.take_lists().flatten();
        let total = flat.len();

        let pending: Vec<Pending> = flat
            .into_iter()
            .map(|chunk| match self.registry.resolve_enhancer_for(chunk.chunk_type()) {
                None => Pending::Ready(chunk),
                Some(enhancer) => {
                    let handle = tokio::spawn(enhance_one(
                        enhancer,
                        self.limiter.clone(),
                        self.options.enhance_timeout,
                        chunk.clone(),
                    ));
                    Pending::Running {
                        original: chunk,
                        handle,
                    }
                }
            })
            .collect();

        // join_all yields in input order regardless of completion order
        let enriched = join_all(pending.into_iter().map(|entry| async move {
            match entry {
                Pending::Ready(chunk) => chunk,
                Pending::Running { original, handle } => match handle.await {
                    Ok(chunk) => chunk,
                    Err(join_err) => {
                        warn!(chunk = %original.name, error = %join_err, "enhancer task panicked, keeping chunk");
                        original
                    }
                },
            }
        }))
        .await;

        match ChunkLists::from_flat(enriched, lengths) {
            Ok(lists) => document.set_lists(lists),
            Err(err) => error!(error = %err, "failed to re-partition enriched chunks"),
        }
        debug!(chunks = total, "document enriched");
        document
    }
}

async fn enhance_one(
    enhancer: Arc<dyn Enhancer>,
    limiter: Arc<Semaphore>,
    limit: Duration,
    chunk: Chunk,
) -> Chunk {
    let Ok(_permit) = limiter.acquire_owned().await else {
        return chunk;
    };

    let kind = chunk.chunk_type();
    match tokio::time::timeout(limit, enhancer.enhance(chunk.clone())).await {
        Ok(Ok(mut enhanced)) if enhanced.chunk_type() == kind => {
            enhanced.name = chunk.name;
            enhanced
        }
        Ok(Ok(enhanced)) => {
            warn!(
                chunk = %chunk.name,
                enhancer = enhancer.name(),
                expected = %kind,
                returned = %enhanced.chunk_type(),
                "enhancer changed chunk type, keeping original"
            );
            chunk
        }
        Ok(Err(err)) => {
            warn!(
                chunk = %chunk.name,
                enhancer = enhancer.name(),
                error = %format!("{err:#}"),
                "enhancement failed, keeping original"
            );
            chunk
        }
        Err(_) => {
            warn!(
                chunk = %chunk.name,
                enhancer = enhancer.name(),
                timeout_secs = limit.as_secs_f64(),
                "enhancement timed out, keeping original"
            );
            chunk
        }
    }
}
