use std::{path::Path, sync::Arc};

use anyhow::Result;

use docnorm::{
    ChunkType, Registry,
    backends::{Backend, HtmlBackend, XlsxBackend},
    config::AppConfig,
    enhancers::{Enhancer, PassthroughEnhancer},
    init_registry,
    pipeline::RawDocument,
};

struct LabelledBackend(&'static str);

impl Backend for LabelledBackend {
    fn name(&self) -> &'static str {
        self.0
    }

    fn convert(&self, path: &Path) -> Result<RawDocument> {
        Ok(RawDocument::for_path(path))
    }
}

#[test]
fn default_registry_covers_builtin_formats() -> Result<()> {
    let registry = init_registry(&AppConfig::default())?;

    assert_eq!(
        registry.supported_extensions(),
        ["docx", "htm", "html", "pdf", "xlsm", "xlsx"]
    );
    assert!(registry.resolve_parser(Path::new("report.csv")).is_none());
    assert!(registry.resolve_parser(Path::new("README")).is_none());

    for kind in [ChunkType::Table, ChunkType::Image, ChunkType::Formula] {
        let enhancer = registry
            .resolve_enhancer_for(kind)
            .expect("enrichable modality has an enhancer");
        assert_eq!(enhancer.name(), "passthrough");
    }
    assert!(registry.resolve_enhancer_for(ChunkType::Text).is_none());
    Ok(())
}

#[test]
fn extension_lookup_ignores_case_and_dot() {
    let registry = init_registry(&AppConfig::default()).unwrap();

    let upper = registry.resolve_parser(Path::new("/in/Budget.XLSX")).unwrap();
    assert_eq!(upper.extension(), "xlsx");
    assert_eq!(upper.backend().name(), "xlsx");

    let dotted = registry.resolve_extension(".Htm").unwrap();
    assert_eq!(dotted.backend().name(), "html");

    let pdf = registry.resolve_extension("pdf").unwrap();
    assert_eq!(pdf.backend().name(), "pdf-text");
}

#[test]
fn later_registration_replaces_earlier() {
    let mut builder = Registry::builder();
    builder
        .register_parser(["txt", "md"], "first", || Arc::new(LabelledBackend("first")))
        .register_parser([".TXT"], "second", || Arc::new(LabelledBackend("second")));
    let registry = builder.build();

    let parser = registry.resolve_parser(Path::new("notes.txt")).unwrap();
    assert_eq!(parser.backend().name(), "second");
    let parser = registry.resolve_parser(Path::new("notes.md")).unwrap();
    assert_eq!(parser.backend().name(), "first");

    let labels = registry.registered_parsers();
    assert_eq!(labels.get("txt").map(String::as_str), Some("second"));
    assert_eq!(labels.get("md").map(String::as_str), Some("first"));
}

#[test]
fn enhancer_keys_are_normalized() {
    let mut builder = Registry::builder();
    builder.register_enhancer(["Table", " image"], "noop", || {
        Arc::new(PassthroughEnhancer) as Arc<dyn Enhancer>
    });
    builder.register_parser(["xlsx"], "xlsx", || Arc::new(XlsxBackend));
    builder.register_parser(["html"], "html", || Arc::new(HtmlBackend));
    let registry = builder.build();

    assert!(registry.resolve_enhancer("TABLE").is_some());
    assert!(registry.resolve_enhancer_for(ChunkType::Image).is_some());
    assert!(registry.resolve_enhancer("formula").is_none());
    assert!(registry.resolve_enhancer("audio").is_none());
    assert_eq!(registry.registered_enhancers().len(), 2);
}

#[test]
fn llm_section_switches_to_description_enhancer() -> Result<()> {
    let config: AppConfig = serde_yaml::from_str(
        r#"
llm:
  base_url: "http://127.0.0.1:9"
  model: "small"
"#,
    )?;
    let registry = init_registry(&config)?;
    let enhancer = registry.resolve_enhancer("formula").unwrap();
    assert_eq!(enhancer.name(), "description");
    Ok(())
}
