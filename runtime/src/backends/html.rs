use std::path::Path;

use anyhow::{Context, Result, anyhow};
use scraper::{ElementRef, Html, Selector};

use super::Backend;
use crate::grid::normalize_cell_text;
use crate::pipeline::raw::{ImageSource, RawDocument, RawImage, RawItem, RawTable, TableLayout};

const BLOCKS: &str = "h1, h2, h3, h4, h5, h6, p, li, blockquote, pre, table, img, math";

#[derive(Debug, Clone, Default)]
pub struct HtmlBackend;

impl Backend for HtmlBackend {
    fn name(&self) -> &'static str {
        "html"
    }

    fn convert(&self, path: &Path) -> Result<RawDocument> {
        let bytes = std::fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
        let mut raw = convert_markup(&String::from_utf8_lossy(&bytes))?;
        raw.source_name = crate::pipeline::raw::source_name(path);
        Ok(raw)
    }
}

/// Converts an HTML page into raw items in document order.
pub fn convert_markup(html: &str) -> Result<RawDocument> {
    let document = Html::parse_document(html);
    let selector = Selector::parse(BLOCKS).map_err(|err| anyhow!("invalid block selector: {err}"))?;
    let mut raw = RawDocument::default();

    for element in document.select(&selector) {
        let name = element.value().name();
        match name {
            "table" => {
                if has_ancestor(element, |n| n == "table") {
                    continue;
                }
                raw.push(RawItem::Table(RawTable {
                    layout: TableLayout::Markup(element.html()),
                    caption: Vec::new(),
                    footnote: Vec::new(),
                }));
            }
            "img" => {
                if has_ancestor(element, |n| n == "table") {
                    continue;
                }
                let Some(src) = element.value().attr("src").filter(|s| !s.trim().is_empty()) else {
                    continue;
                };
                let caption = element
                    .value()
                    .attr("alt")
                    .map(normalize_cell_text)
                    .filter(|alt| !alt.is_empty())
                    .into_iter()
                    .collect();
                raw.push(RawItem::Image(RawImage {
                    source: ImageSource::Uri(src.trim().to_string()),
                    caption,
                    footnote: Vec::new(),
                }));
            }
            "math" => {
                if has_ancestor(element, |n| n == "table" || n == "math") {
                    continue;
                }
                raw.push(RawItem::Formula {
                    text: element.html(),
                    format: Some("mathml".to_string()),
                });
            }
            _ => {
                if has_ancestor(element, is_text_container) {
                    continue;
                }
                let text = normalize_cell_text(&element.text().collect::<String>());
                if text.is_empty() {
                    continue;
                }
                raw.push_text(text, heading_level(name));
            }
        }
    }

    Ok(raw)
}

fn heading_level(name: &str) -> Option<u32> {
    name.strip_prefix('h')
        .and_then(|level| level.parse::<u32>().ok())
        .filter(|level| (1..=6).contains(level))
}

fn is_text_container(name: &str) -> bool {
    matches!(
        name,
        "table" | "p" | "li" | "blockquote" | "pre" | "h1" | "h2" | "h3" | "h4" | "h5" | "h6"
    )
}

fn has_ancestor(element: ElementRef<'_>, pred: impl Fn(&str) -> bool) -> bool {
    element
        .ancestors()
        .filter_map(ElementRef::wrap)
        .any(|ancestor| pred(ancestor.value().name()))
}
