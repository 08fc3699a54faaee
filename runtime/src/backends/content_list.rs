//! Decoding of MinerU `content_list.json` output.

use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;
use tracing::warn;

use crate::pipeline::raw::{ImageSource, RawDocument, RawImage, RawItem, RawTable, TableLayout};

pub const DEFAULT_FORMULA_FORMAT: &str = "latex";

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ContentItem {
    Text {
        #[serde(default)]
        text: String,
        #[serde(default)]
        text_level: Option<u32>,
    },
    Table {
        #[serde(default)]
        table_body: Option<String>,
        #[serde(default)]
        table_caption: Vec<String>,
        #[serde(default)]
        table_footnote: Vec<String>,
    },
    Image {
        #[serde(default)]
        img_path: Option<String>,
        #[serde(default, alias = "image_caption")]
        img_caption: Vec<String>,
        #[serde(default, alias = "image_footnote")]
        img_footnote: Vec<String>,
    },
    Equation {
        #[serde(default)]
        text: String,
        #[serde(default)]
        text_format: Option<String>,
    },
    #[serde(other)]
    Other,
}

/// Image paths are resolved against `base_dir`.
pub fn decode(json: &str, base_dir: &Path, source_name: &str) -> Result<RawDocument> {
    let items: Vec<ContentItem> =
        serde_json::from_str(json).context("failed to decode content list")?;
    let mut raw = RawDocument::new(source_name);

    for item in items {
        match item {
            ContentItem::Text { text, text_level } => raw.push_text(text, text_level),
            ContentItem::Table {
                table_body,
                table_caption,
                table_footnote,
            } => {
                let Some(body) = table_body.filter(|body| !body.trim().is_empty()) else {
                    warn!(source = source_name, "skipping table without recognized body");
                    continue;
                };
                raw.push(RawItem::Table(RawTable {
                    layout: TableLayout::Markup(body),
                    caption: table_caption,
                    footnote: table_footnote,
                }));
            }
            ContentItem::Image {
                img_path,
                img_caption,
                img_footnote,
            } => {
                let Some(img_path) = img_path.filter(|p| !p.trim().is_empty()) else {
                    warn!(source = source_name, "skipping image without a path");
                    continue;
                };
                raw.push(RawItem::Image(RawImage {
                    source: ImageSource::File(base_dir.join(img_path)),
                    caption: img_caption,
                    footnote: img_footnote,
                }));
            }
            ContentItem::Equation { text, text_format } => raw.push(RawItem::Formula {
                text,
                format: Some(
                    text_format
                        .filter(|format| !format.is_empty())
                        .unwrap_or_else(|| DEFAULT_FORMULA_FORMAT.to_string()),
                ),
            }),
            ContentItem::Other => {}
        }
    }

    Ok(raw)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_items_are_skipped() -> Result<()> {
        let raw = decode(
            r#"[
                {"type": "text", "text": "Title", "text_level": 1, "page_idx": 0},
                {"type": "discarded", "text": "page 1"},
                {"type": "equation", "text": "a^2"},
                {"type": "image", "img_path": "images/a.jpg", "image_caption": ["Fig"]}
            ]"#,
            Path::new("/out"),
            "paper",
        )?;
        assert_eq!(raw.items.len(), 3);
        assert!(matches!(
            &raw.items[1],
            RawItem::Formula { format: Some(format), .. } if format == "latex"
        ));
        match &raw.items[2] {
            RawItem::Image(image) => {
                assert!(
                    matches!(&image.source, ImageSource::File(path) if path == Path::new("/out/images/a.jpg"))
                );
                assert_eq!(image.caption, ["Fig"]);
            }
            other => panic!("unexpected item {other:?}"),
        }
        Ok(())
    }
}
