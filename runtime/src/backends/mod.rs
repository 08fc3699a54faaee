//! Format conversion backends.
//!
//! A backend turns a file into a [`RawDocument`]. Conversion is blocking and
//! may take minutes; callers run it on the blocking thread pool.

use std::{path::Path, time::Instant};

use anyhow::Result;

use crate::pipeline::raw::RawDocument;

pub mod content_list;
pub mod docx;
pub mod html;
pub mod pdf;
pub mod xlsx;

pub use docx::DocxBackend;
pub use html::HtmlBackend;
pub use pdf::{PdfBackend, PdfEngine, PdfOptions};
pub use xlsx::XlsxBackend;

pub trait Backend: Send + Sync {
    fn name(&self) -> &'static str;

    fn convert(&self, path: &Path) -> Result<RawDocument>;

    /// Conversion that has to give up by `deadline`. Backends driving an
    /// external process override this to stop it; the rest just convert.
    fn convert_until(&self, path: &Path, _deadline: Instant) -> Result<RawDocument> {
        self.convert(path)
    }
}
