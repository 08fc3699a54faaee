//! Normalized document schema shared by every backend, stage and enhancer.

use std::{collections::HashSet, fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChunkType {
    Text,
    Image,
    Table,
    Formula,
}

impl ChunkType {
    /// Flattening order used by [`ChunkLists::flatten`].
    pub const ALL: [ChunkType; 4] = [
        ChunkType::Text,
        ChunkType::Table,
        ChunkType::Image,
        ChunkType::Formula,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ChunkType::Text => "text",
            ChunkType::Image => "image",
            ChunkType::Table => "table",
            ChunkType::Formula => "formula",
        }
    }

    pub fn plural(&self) -> &'static str {
        match self {
            ChunkType::Text => "texts",
            ChunkType::Image => "images",
            ChunkType::Table => "tables",
            ChunkType::Formula => "formulas",
        }
    }
}

impl fmt::Display for ChunkType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChunkType {
    type Err = ModelError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let key = raw.trim().trim_start_matches('.').to_ascii_lowercase();
        match key.as_str() {
            "text" => Ok(ChunkType::Text),
            "image" => Ok(ChunkType::Image),
            "table" => Ok(ChunkType::Table),
            "formula" => Ok(ChunkType::Formula),
            _ => Err(ModelError::UnknownModality(raw.to_string())),
        }
    }
}

/// Locator of the `index`-th chunk of a modality, e.g. `#/tables/2`.
pub fn ordinal_name(kind: ChunkType, index: usize) -> String {
    format!("#/{}/{}", kind.plural(), index)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextContent {
    pub text: String,
    /// Heading depth; `None` for body text.
    #[serde(default)]
    pub level: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FormulaContent {
    pub text: String,
    /// Notation such as `latex`; `None` means plain text.
    #[serde(default)]
    pub format: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageContent {
    pub uri: String,
    #[serde(default)]
    pub caption: Vec<String>,
    #[serde(default)]
    pub footnote: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct TableContent {
    pub rows: usize,
    pub columns: usize,
    pub grid: Vec<Vec<String>>,
    #[serde(default)]
    pub row_headers: Vec<String>,
    #[serde(default)]
    pub column_headers: Vec<String>,
    #[serde(default)]
    pub caption: Vec<String>,
    #[serde(default)]
    pub footnote: Vec<String>,
}

impl TableContent {
    pub fn is_rectangular(&self) -> bool {
        self.grid.len() == self.rows && self.grid.iter().all(|row| row.len() == self.columns)
    }
}

/// Content of a chunk. The variant decides the chunk's [`ChunkType`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "content", rename_all = "lowercase")]
pub enum ChunkContent {
    Text(TextContent),
    Image(ImageContent),
    Table(TableContent),
    Formula(FormulaContent),
}

impl ChunkContent {
    pub fn chunk_type(&self) -> ChunkType {
        match self {
            ChunkContent::Text(_) => ChunkType::Text,
            ChunkContent::Image(_) => ChunkType::Image,
            ChunkContent::Table(_) => ChunkType::Table,
            ChunkContent::Formula(_) => ChunkType::Formula,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub name: String,
    #[serde(flatten)]
    pub content: ChunkContent,
    #[serde(default)]
    pub description: Option<String>,
}

impl Chunk {
    pub fn new(name: impl Into<String>, content: ChunkContent) -> Self {
        Self {
            name: name.into(),
            content,
            description: None,
        }
    }

    pub fn chunk_type(&self) -> ChunkType {
        self.content.chunk_type()
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

/// Per-modality sizes remembered while chunks are flattened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ModalityLengths {
    pub texts: usize,
    pub tables: usize,
    pub images: usize,
    pub formulas: usize,
}

impl ModalityLengths {
    pub fn total(&self) -> usize {
        self.texts + self.tables + self.images + self.formulas
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct ChunkLists {
    pub texts: Vec<Chunk>,
    pub tables: Vec<Chunk>,
    pub images: Vec<Chunk>,
    pub formulas: Vec<Chunk>,
}

impl ChunkLists {
    pub fn is_empty(&self) -> bool {
        self.lengths().total() == 0
    }

    pub fn lengths(&self) -> ModalityLengths {
        ModalityLengths {
            texts: self.texts.len(),
            tables: self.tables.len(),
            images: self.images.len(),
            formulas: self.formulas.len(),
        }
    }

    /// Concatenates texts, tables, images and formulas, in that order.
    pub fn flatten(self) -> (Vec<Chunk>, ModalityLengths) {
        let lengths = self.lengths();
        let mut flat = Vec::with_capacity(lengths.total());
        flat.extend(self.texts);
        flat.extend(self.tables);
        flat.extend(self.images);
        flat.extend(self.formulas);
        (flat, lengths)
    }

    /// Inverse of [`ChunkLists::flatten`].
    pub fn from_flat(flat: Vec<Chunk>, lengths: ModalityLengths) -> Result<Self, ModelError> {
        if flat.len() != lengths.total() {
            return Err(ModelError::LengthMismatch {
                expected: lengths.total(),
                actual: flat.len(),
            });
        }

        let mut rest = flat.into_iter();
        let texts = rest.by_ref().take(lengths.texts).collect();
        let tables = rest.by_ref().take(lengths.tables).collect();
        let images = rest.by_ref().take(lengths.images).collect();
        let formulas = rest.take(lengths.formulas).collect();

        Ok(Self {
            texts,
            tables,
            images,
            formulas,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub texts: Vec<Chunk>,
    #[serde(default)]
    pub tables: Vec<Chunk>,
    #[serde(default)]
    pub images: Vec<Chunk>,
    #[serde(default)]
    pub formulas: Vec<Chunk>,
    pub processing_time: f64,
    pub success: bool,
    #[serde(default)]
    pub error_message: Option<String>,
}

impl Document {
    pub fn succeeded(title: Option<String>, lists: ChunkLists, processing_time: f64) -> Self {
        let ChunkLists {
            texts,
            tables,
            images,
            formulas,
        } = lists;
        Self {
            title,
            texts,
            tables,
            images,
            formulas,
            processing_time: processing_time.max(0.0),
            success: true,
            error_message: None,
        }
    }

    pub fn failed(message: impl Into<String>, processing_time: f64) -> Self {
        Self {
            title: None,
            texts: Vec::new(),
            tables: Vec::new(),
            images: Vec::new(),
            formulas: Vec::new(),
            processing_time: processing_time.max(0.0),
            success: false,
            error_message: Some(message.into()),
        }
    }

    pub fn chunks(&self, kind: ChunkType) -> &[Chunk] {
        match kind {
            ChunkType::Text => &self.texts,
            ChunkType::Table => &self.tables,
            ChunkType::Image => &self.images,
            ChunkType::Formula => &self.formulas,
        }
    }

    pub fn chunk_count(&self) -> usize {
        self.texts.len() + self.tables.len() + self.images.len() + self.formulas.len()
    }

    /// Moves the four lists out, leaving them empty.
    pub fn take_lists(&mut self) -> ChunkLists {
        ChunkLists {
            texts: std::mem::take(&mut self.texts),
            tables: std::mem::take(&mut self.tables),
            images: std::mem::take(&mut self.images),
            formulas: std::mem::take(&mut self.formulas),
        }
    }

    pub fn set_lists(&mut self, lists: ChunkLists) {
        self.texts = lists.texts;
        self.tables = lists.tables;
        self.images = lists.images;
        self.formulas = lists.formulas;
    }

    pub fn validate(&self) -> Result<(), ModelError> {
        if self.success {
            if self.error_message.is_some() {
                return Err(ModelError::UnexpectedErrorMessage);
            }
        } else {
            if self.error_message.is_none() {
                return Err(ModelError::MissingErrorMessage);
            }
            if self.chunk_count() > 0 {
                return Err(ModelError::ChunksOnFailure(self.chunk_count()));
            }
        }

        for kind in ChunkType::ALL {
            let mut seen = HashSet::new();
            for chunk in self.chunks(kind) {
                if chunk.chunk_type() != kind {
                    return Err(ModelError::WrongList {
                        name: chunk.name.clone(),
                        found: chunk.chunk_type(),
                        list: kind,
                    });
                }
                if !seen.insert(chunk.name.as_str()) {
                    return Err(ModelError::DuplicateName(chunk.name.clone()));
                }
                if let ChunkContent::Table(table) = &chunk.content {
                    if !table.is_rectangular() {
                        return Err(ModelError::RaggedTable(chunk.name.clone()));
                    }
                }
            }
        }

        Ok(())
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ModelError {
    #[error("unknown modality `{0}`")]
    UnknownModality(String),
    #[error("expected {expected} chunks to re-partition, got {actual}")]
    LengthMismatch { expected: usize, actual: usize },
    #[error("successful document carries an error message")]
    UnexpectedErrorMessage,
    #[error("failed document has no error message")]
    MissingErrorMessage,
    #[error("failed document still holds {0} chunks")]
    ChunksOnFailure(usize),
    #[error("chunk {name} of type {found} is stored in the {list} list")]
    WrongList {
        name: String,
        found: ChunkType,
        list: ChunkType,
    },
    #[error("chunk name {0} is not unique within its list")]
    DuplicateName(String),
    #[error("table {0} is not rectangular")]
    RaggedTable(String),
}
