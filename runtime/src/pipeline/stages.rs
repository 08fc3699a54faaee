//! Per-modality mapping from raw backend items to named chunks.
//!
//! Each stage numbers its own chunks; no stage depends on another.

use std::path::Path;

use anyhow::{Context, Result};
use base64::{Engine as _, engine::general_purpose::STANDARD};

use super::raw::{ImageSource, RawFormula, RawImage, RawTable, RawText, TableLayout};
use crate::grid::{self, span::html_table_caption};
use crate::model::{
    Chunk, ChunkContent, ChunkType, FormulaContent, ImageContent, TextContent, ordinal_name,
};

pub fn text_chunks(items: Vec<RawText>) -> Result<Vec<Chunk>> {
    let chunks = items
        .into_iter()
        .filter(|item| !item.text.trim().is_empty())
        .enumerate()
        .map(|(idx, item)| {
            Chunk::new(
                ordinal_name(ChunkType::Text, idx),
                ChunkContent::Text(TextContent {
                    text: item.text.trim().to_string(),
                    level: item.level,
                }),
            )
        })
        .collect();
    Ok(chunks)
}

pub fn table_chunks(items: Vec<RawTable>) -> Result<Vec<Chunk>> {
    let mut chunks = Vec::with_capacity(items.len());
    for (idx, item) in items.into_iter().enumerate() {
        let name = ordinal_name(ChunkType::Table, idx);
        let RawTable {
            layout,
            mut caption,
            footnote,
        } = item;

        let table = match layout {
            TableLayout::Markup(html) => {
                let rows = grid::parse_html_table(&html)
                    .with_context(|| format!("failed to decode {name}"))?;
                if caption.is_empty() {
                    caption.extend(html_table_caption(&html));
                }
                grid::reconstruct_spans(&rows)
            }
            TableLayout::Spans(rows) => grid::reconstruct_spans(&rows),
            TableLayout::Sheet(cells) => grid::reconstruct_sheet(&cells),
        };

        chunks.push(Chunk::new(
            name,
            ChunkContent::Table(table.into_content(caption, footnote)),
        ));
    }
    Ok(chunks)
}

pub fn image_chunks(items: Vec<RawImage>) -> Result<Vec<Chunk>> {
    let mut chunks = Vec::with_capacity(items.len());
    for (idx, item) in items.into_iter().enumerate() {
        let uri = match item.source {
            ImageSource::Uri(uri) => uri,
            ImageSource::Inline { mime, data } => data_uri(&mime, &data),
            ImageSource::File(path) => {
                let data = std::fs::read(&path)
                    .with_context(|| format!("failed to read image {}", path.display()))?;
                data_uri(mime_for_path(&path), &data)
            }
        };

        chunks.push(Chunk::new(
            ordinal_name(ChunkType::Image, idx),
            ChunkContent::Image(ImageContent {
                uri,
                caption: item.caption,
                footnote: item.footnote,
            }),
        ));
    }
    Ok(chunks)
}

pub fn formula_chunks(items: Vec<RawFormula>) -> Result<Vec<Chunk>> {
    let chunks = items
        .into_iter()
        .enumerate()
        .map(|(idx, item)| {
            Chunk::new(
                ordinal_name(ChunkType::Formula, idx),
                ChunkContent::Formula(FormulaContent {
                    text: item.text,
                    format: item.format.filter(|format| !format.trim().is_empty()),
                }),
            )
        })
        .collect();
    Ok(chunks)
}

pub fn data_uri(mime: &str, data: &[u8]) -> String {
    format!("data:{mime};base64,{}", STANDARD.encode(data))
}

/// Image MIME type from the file extension; JPEG when unknown.
pub fn mime_for_path(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .map(|ext| ext.to_string_lossy().to_ascii_lowercase())
        .unwrap_or_default();
    mime_for_extension(&ext)
}

pub fn mime_for_extension(ext: &str) -> &'static str {
    match ext.trim_start_matches('.') {
        "png" => "image/png",
        "gif" => "image/gif",
        "bmp" => "image/bmp",
        "webp" => "image/webp",
        "svg" => "image/svg+xml",
        "tif" | "tiff" => "image/tiff",
        "emf" => "image/emf",
        "wmf" => "image/wmf",
        _ => "image/jpeg",
    }
}
