use std::{
    fs::File,
    path::{Path, PathBuf},
    process::{Command, Stdio},
    time::{Duration, Instant},
};

use anyhow::{Context, Result, anyhow, bail};
use serde::Deserialize;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{Backend, content_list};
use crate::pipeline::raw::{ImageSource, RawDocument, RawItem, source_name};
use crate::pipeline::stages::mime_for_path;

const MINERU_POLL_INTERVAL: Duration = Duration::from_millis(50);
const MINERU_LOG: &str = "mineru.log";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PdfEngine {
    /// Embedded text layer only.
    #[default]
    Text,
    /// External MinerU layout analysis.
    Mineru,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PdfOptions {
    #[serde(default)]
    pub engine: PdfEngine,
    #[serde(default = "default_mineru_command")]
    pub mineru_command: String,
    #[serde(default = "default_method")]
    pub method: String,
    #[serde(default = "default_lang")]
    pub lang: String,
    /// Scratch directory for MinerU output; the system temp dir when unset.
    #[serde(default)]
    pub output_dir: Option<PathBuf>,
    /// Keep MinerU output on disk and reference images by path.
    #[serde(default)]
    pub keep_output: bool,
}

fn default_mineru_command() -> String {
    "mineru".to_string()
}

fn default_method() -> String {
    "auto".to_string()
}

fn default_lang() -> String {
    "ch".to_string()
}

impl Default for PdfOptions {
    fn default() -> Self {
        Self {
            engine: PdfEngine::default(),
            mineru_command: default_mineru_command(),
            method: default_method(),
            lang: default_lang(),
            output_dir: None,
            keep_output: false,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct PdfBackend {
    options: PdfOptions,
}

impl PdfBackend {
    pub fn new(options: PdfOptions) -> Self {
        Self { options }
    }

    fn convert_text_layer(&self, path: &Path) -> Result<RawDocument> {
        let text = pdf_extract::extract_text(path)
            .map_err(|err| anyhow!("failed to extract text from {}: {err}", path.display()))?;

        let mut raw = RawDocument::for_path(path);
        for paragraph in split_paragraphs(&text) {
            raw.push_text(paragraph, None);
        }
        debug!(path = %path.display(), paragraphs = raw.items.len(), "extracted pdf text layer");
        Ok(raw)
    }

    fn convert_mineru(&self, path: &Path, deadline: Option<Instant>) -> Result<RawDocument> {
        let stem = source_name(path);
        let scratch = self
            .options
            .output_dir
            .clone()
            .unwrap_or_else(std::env::temp_dir)
            .join(format!("docnorm-mineru-{}", Uuid::new_v4()));

        let result = self
            .run_mineru(path, &scratch, deadline)
            .and_then(|()| self.read_content_list(&scratch, &stem));

        if !self.options.keep_output {
            if let Err(err) = std::fs::remove_dir_all(&scratch) {
                if err.kind() != std::io::ErrorKind::NotFound {
                    warn!(error = %err, dir = %scratch.display(), "failed to clean mineru output");
                }
            }
        }
        result
    }

    /// Runs MinerU into `scratch`, killing it once `deadline` passes.
    fn run_mineru(&self, path: &Path, scratch: &Path, deadline: Option<Instant>) -> Result<()> {
        std::fs::create_dir_all(scratch)
            .with_context(|| format!("failed to create {}", scratch.display()))?;
        let log_path = scratch.join(MINERU_LOG);
        let log = File::create(&log_path)
            .with_context(|| format!("failed to create {}", log_path.display()))?;

        info!(
            path = %path.display(),
            method = %self.options.method,
            "running mineru"
        );
        let mut child = Command::new(&self.options.mineru_command)
            .arg("-p")
            .arg(path)
            .arg("-o")
            .arg(scratch)
            .arg("-m")
            .arg(&self.options.method)
            .arg("-l")
            .arg(&self.options.lang)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(log)
            .spawn()
            .with_context(|| format!("failed to launch {}", self.options.mineru_command))?;

        let status = loop {
            if let Some(status) = child.try_wait().context("failed to poll mineru")? {
                break status;
            }
            if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
                warn!(pid = child.id(), path = %path.display(), "killing mineru at deadline");
                if let Err(err) = child.kill().and_then(|()| child.wait().map(drop)) {
                    warn!(error = %err, "failed to stop mineru");
                }
                bail!("mineru did not finish before the conversion deadline");
            }
            std::thread::sleep(MINERU_POLL_INTERVAL);
        };

        if !status.success() {
            let stderr = std::fs::read_to_string(&log_path).unwrap_or_default();
            let tail: String = stderr.lines().rev().take(5).collect::<Vec<_>>().join(" | ");
            bail!("mineru exited with {status}: {tail}");
        }
        Ok(())
    }

    fn read_content_list(&self, scratch: &Path, stem: &str) -> Result<RawDocument> {
        let base_dir = scratch.join(stem).join(&self.options.method);
        let list_path = base_dir.join(format!("{stem}_content_list.json"));
        let json = std::fs::read_to_string(&list_path)
            .with_context(|| format!("mineru produced no {}", list_path.display()))?;

        let mut raw = content_list::decode(&json, &base_dir, stem)?;
        if !self.options.keep_output {
            inline_image_files(&mut raw)?;
        }
        Ok(raw)
    }
}

impl Backend for PdfBackend {
    fn name(&self) -> &'static str {
        match self.options.engine {
            PdfEngine::Text => "pdf-text",
            PdfEngine::Mineru => "pdf-mineru",
        }
    }

    fn convert(&self, path: &Path) -> Result<RawDocument> {
        self.convert_checked(path, None)
    }

    fn convert_until(&self, path: &Path, deadline: Instant) -> Result<RawDocument> {
        self.convert_checked(path, Some(deadline))
    }
}

impl PdfBackend {
    fn convert_checked(&self, path: &Path, deadline: Option<Instant>) -> Result<RawDocument> {
        if !path.is_file() {
            bail!("{} is not a file", path.display());
        }
        match self.options.engine {
            PdfEngine::Text => self.convert_text_layer(path),
            PdfEngine::Mineru => self.convert_mineru(path, deadline),
        }
    }
}

/// Reads file-backed images into memory so scratch output can be removed.
fn inline_image_files(raw: &mut RawDocument) -> Result<()> {
    for item in &mut raw.items {
        if let RawItem::Image(image) = item {
            if let ImageSource::File(path) = &image.source {
                let data = std::fs::read(path)
                    .with_context(|| format!("failed to read image {}", path.display()))?;
                image.source = ImageSource::Inline {
                    mime: mime_for_path(path).to_string(),
                    data,
                };
            }
        }
    }
    Ok(())
}

/// Blank lines and form feeds separate paragraphs; line breaks inside one
/// are folded into spaces.
pub fn split_paragraphs(text: &str) -> Vec<String> {
    let normalized = text.replace('\u{c}', "\n\n");
    let mut paragraphs = Vec::new();
    let mut current: Vec<&str> = Vec::new();

    for line in normalized.lines() {
        let line = line.trim();
        if line.is_empty() {
            if !current.is_empty() {
                paragraphs.push(current.join(" "));
                current.clear();
            }
        } else {
            current.push(line);
        }
    }
    if !current.is_empty() {
        paragraphs.push(current.join(" "));
    }
    paragraphs
}
