//! Extension to parser and modality to enhancer lookup.
//!
//! Both maps are filled once through [`RegistryBuilder`] and are read-only
//! afterwards, so a built [`Registry`] can be shared without locking.

use std::{
    collections::{BTreeMap, HashMap},
    path::Path,
    sync::Arc,
};

use anyhow::{Context, Result};
use tracing::{info, warn};

use crate::ai::ChatClient;
use crate::backends::{Backend, DocxBackend, HtmlBackend, PdfBackend, XlsxBackend};
use crate::config::AppConfig;
use crate::enhancers::{DescriptionEnhancer, Enhancer, PassthroughEnhancer};
use crate::model::{ChunkType, Document};
use crate::pipeline::extraction::{ExtractionOptions, extract_document};

pub type ParserFactory = Arc<dyn Fn() -> Arc<dyn Backend> + Send + Sync>;
pub type EnhancerFactory = Arc<dyn Fn() -> Arc<dyn Enhancer> + Send + Sync>;

/// Lowercases and strips a leading `.` so `.DOCX`, `docx` and ` Docx` match.
pub fn normalize_key(raw: &str) -> String {
    raw.trim().trim_start_matches('.').to_lowercase()
}

/// A backend resolved for one file extension.
#[derive(Clone)]
pub struct Parser {
    extension: String,
    backend: Arc<dyn Backend>,
}

impl Parser {
    pub fn extension(&self) -> &str {
        &self.extension
    }

    pub fn backend(&self) -> Arc<dyn Backend> {
        self.backend.clone()
    }

    pub async fn parse(&self, path: &Path) -> Document {
        self.parse_with(path, &ExtractionOptions::default()).await
    }

    pub async fn parse_with(&self, path: &Path, options: &ExtractionOptions) -> Document {
        extract_document(self.backend.clone(), path, options).await
    }
}

#[derive(Default)]
pub struct RegistryBuilder {
    parsers: HashMap<String, (String, ParserFactory)>,
    enhancers: HashMap<String, (String, EnhancerFactory)>,
}

impl RegistryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Maps every extension to `factory`. A duplicate extension replaces the
    /// earlier mapping.
    pub fn register_parser<I, S, F>(&mut self, extensions: I, label: &str, factory: F) -> &mut Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
        F: Fn() -> Arc<dyn Backend> + Send + Sync + 'static,
    {
        let factory: ParserFactory = Arc::new(factory);
        for ext in extensions {
            let key = normalize_key(ext.as_ref());
            if let Some((previous, _)) = self.parsers.get(&key) {
                warn!(extension = %key, previous = %previous, parser = label, "overwriting registered parser");
            }
            info!(extension = %key, parser = label, "registered parser");
            self.parsers.insert(key, (label.to_string(), factory.clone()));
        }
        self
    }

    pub fn register_enhancer<I, S, F>(&mut self, modalities: I, label: &str, factory: F) -> &mut Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
        F: Fn() -> Arc<dyn Enhancer> + Send + Sync + 'static,
    {
        let factory: EnhancerFactory = Arc::new(factory);
        for modality in modalities {
            let key = normalize_key(modality.as_ref());
            if let Some((previous, _)) = self.enhancers.get(&key) {
                warn!(modality = %key, previous = %previous, enhancer = label, "overwriting registered enhancer");
            }
            info!(modality = %key, enhancer = label, "registered enhancer");
            self.enhancers.insert(key, (label.to_string(), factory.clone()));
        }
        self
    }

    pub fn build(self) -> Registry {
        Registry {
            parsers: self.parsers,
            enhancers: self.enhancers,
        }
    }
}

pub struct Registry {
    parsers: HashMap<String, (String, ParserFactory)>,
    enhancers: HashMap<String, (String, EnhancerFactory)>,
}

impl Registry {
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::new()
    }

    pub fn resolve_parser(&self, path: &Path) -> Option<Parser> {
        let extension = normalize_key(&path.extension()?.to_string_lossy());
        self.resolve_extension(&extension)
    }

    pub fn resolve_extension(&self, extension: &str) -> Option<Parser> {
        let key = normalize_key(extension);
        let (_, factory) = self.parsers.get(&key)?;
        Some(Parser {
            backend: factory(),
            extension: key,
        })
    }

    pub fn resolve_enhancer(&self, modality: &str) -> Option<Arc<dyn Enhancer>> {
        let (_, factory) = self.enhancers.get(&normalize_key(modality))?;
        Some(factory())
    }

    pub fn resolve_enhancer_for(&self, kind: ChunkType) -> Option<Arc<dyn Enhancer>> {
        self.resolve_enhancer(kind.as_str())
    }

    pub fn supported_extensions(&self) -> Vec<String> {
        let mut extensions: Vec<String> = self.parsers.keys().cloned().collect();
        extensions.sort();
        extensions
    }

    /// Extension to parser label.
    pub fn registered_parsers(&self) -> BTreeMap<String, String> {
        self.parsers
            .iter()
            .map(|(ext, (label, _))| (ext.clone(), label.clone()))
            .collect()
    }

    pub fn registered_enhancers(&self) -> BTreeMap<String, String> {
        self.enhancers
            .iter()
            .map(|(modality, (label, _))| (modality.clone(), label.clone()))
            .collect()
    }
}

/// Registers every built-in backend and one enhancer per enrichable modality.
///
/// Text chunks get no enhancer. Without an `llm` section the others pass
/// through unchanged.
pub fn init_registry(config: &AppConfig) -> Result<Registry> {
    let mut builder = Registry::builder();

    builder
        .register_parser(["docx"], "docx", || Arc::new(DocxBackend))
        .register_parser(["xlsx", "xlsm"], "xlsx", || Arc::new(XlsxBackend))
        .register_parser(["html", "htm"], "html", || Arc::new(HtmlBackend));

    let pdf_options = config.pdf.clone();
    builder.register_parser(["pdf"], "pdf", move || {
        Arc::new(PdfBackend::new(pdf_options.clone()))
    });

    let modalities = [ChunkType::Table, ChunkType::Formula, ChunkType::Image].map(|kind| kind.as_str());
    match &config.llm {
        Some(llm) => {
            let client = ChatClient::new(llm.api_key(), llm.base_url.clone())
                .context("failed to create LLM client")?
                .with_max_attempts(llm.max_attempts);
            let enhancer: Arc<dyn Enhancer> = Arc::new(
                DescriptionEnhancer::new(Arc::new(client), llm.model.clone())
                    .with_vision_model(llm.vision_model.clone()),
            );
            builder.register_enhancer(modalities, "description", move || enhancer.clone());
        }
        None => {
            builder.register_enhancer(modalities, "passthrough", || Arc::new(PassthroughEnhancer));
        }
    }

    Ok(builder.build())
}
