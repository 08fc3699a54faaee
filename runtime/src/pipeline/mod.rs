pub mod enrichment;
pub mod extraction;
pub mod intake;
pub mod raw;
pub mod stages;
pub mod worker;

pub use enrichment::{EnrichmentOptions, Enricher};
pub use extraction::{ExtractionOptions, extract_document};
pub use intake::{FileRepository, FsFileRepository, Intake};
pub use raw::{RawDocument, RawItem};
pub use worker::{TaskOutcome, Worker, WorkerConfig};
