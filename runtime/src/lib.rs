//! Document normalization pipeline.
//!
//! Files are dispatched by extension to a conversion backend, normalized
//! into typed text, table, image and formula chunks, enriched per modality,
//! and reported to a task store.

pub mod ai;
pub mod backends;
pub mod config;
pub mod enhancers;
pub mod grid;
pub mod model;
pub mod pipeline;
pub mod registry;
pub mod storage;

pub use model::{Chunk, ChunkContent, ChunkType, Document};
pub use registry::{Parser, Registry, RegistryBuilder, init_registry};
