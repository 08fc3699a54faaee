use anyhow::Result;
use async_trait::async_trait;

use crate::model::Chunk;

pub mod describe;

pub use describe::DescriptionEnhancer;

/// Post-processor for one modality. Must return a chunk of the same type.
#[async_trait]
pub trait Enhancer: Send + Sync {
    fn name(&self) -> &'static str;

    async fn enhance(&self, chunk: Chunk) -> Result<Chunk>;
}

/// Returns chunks unchanged.
#[derive(Debug, Clone, Copy, Default)]
pub struct PassthroughEnhancer;

#[async_trait]
impl Enhancer for PassthroughEnhancer {
    fn name(&self) -> &'static str {
        "passthrough"
    }

    async fn enhance(&self, chunk: Chunk) -> Result<Chunk> {
        Ok(chunk)
    }
}
