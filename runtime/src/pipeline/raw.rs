use std::path::{Path, PathBuf};

use crate::grid::{SheetCells, SpanCell};

/// Backend output before normalization: items in source reading order.
#[derive(Debug, Clone, Default)]
pub struct RawDocument {
    /// File stem of the converted source, used as the title fallback.
    pub source_name: String,
    pub items: Vec<RawItem>,
}

#[derive(Debug, Clone)]
pub enum RawItem {
    Text { text: String, level: Option<u32> },
    Formula { text: String, format: Option<String> },
    Image(RawImage),
    Table(RawTable),
}

#[derive(Debug, Clone)]
pub enum ImageSource {
    Uri(String),
    Inline { mime: String, data: Vec<u8> },
    File(PathBuf),
}

#[derive(Debug, Clone)]
pub struct RawImage {
    pub source: ImageSource,
    pub caption: Vec<String>,
    pub footnote: Vec<String>,
}

#[derive(Debug, Clone)]
pub enum TableLayout {
    /// An HTML `<table>` fragment.
    Markup(String),
    Spans(Vec<Vec<SpanCell>>),
    Sheet(SheetCells),
}

#[derive(Debug, Clone)]
pub struct RawTable {
    pub layout: TableLayout,
    pub caption: Vec<String>,
    pub footnote: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RawText {
    pub text: String,
    pub level: Option<u32>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RawFormula {
    pub text: String,
    pub format: Option<String>,
}

/// Disjoint per-modality slices of a [`RawDocument`], each in source order.
#[derive(Debug, Clone, Default)]
pub struct RawPartition {
    pub texts: Vec<RawText>,
    pub tables: Vec<RawTable>,
    pub images: Vec<RawImage>,
    pub formulas: Vec<RawFormula>,
}

impl RawDocument {
    pub fn new(source_name: impl Into<String>) -> Self {
        Self {
            source_name: source_name.into(),
            items: Vec::new(),
        }
    }

    pub fn for_path(path: &Path) -> Self {
        Self::new(source_name(path))
    }

    pub fn push(&mut self, item: RawItem) {
        self.items.push(item);
    }

    pub fn push_text(&mut self, text: impl Into<String>, level: Option<u32>) {
        self.items.push(RawItem::Text {
            text: text.into(),
            level,
        });
    }

    /// First non-empty level-1 heading, else the source name.
    pub fn extract_title(&self) -> Option<String> {
        self.items
            .iter()
            .find_map(|item| match item {
                RawItem::Text {
                    text,
                    level: Some(1),
                } if !text.trim().is_empty() => Some(text.trim().to_string()),
                _ => None,
            })
            .or_else(|| {
                let name = self.source_name.trim();
                (!name.is_empty()).then(|| name.to_string())
            })
    }

    pub fn partition(self) -> RawPartition {
        let mut partition = RawPartition::default();
        for item in self.items {
            match item {
                RawItem::Text { text, level } => partition.texts.push(RawText { text, level }),
                RawItem::Formula { text, format } => {
                    partition.formulas.push(RawFormula { text, format })
                }
                RawItem::Image(image) => partition.images.push(image),
                RawItem::Table(table) => partition.tables.push(table),
            }
        }
        partition
    }
}

pub fn source_name(path: &Path) -> String {
    path.file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_default()
}
