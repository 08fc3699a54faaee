use std::{
    collections::HashMap,
    fs::File,
    io::{Read, Seek},
    path::Path,
};

use anyhow::{Context, Result};
use quick_xml::{Reader, events::BytesStart, events::Event};
use tracing::warn;
use zip::{ZipArchive, result::ZipError};

use super::Backend;
use crate::grid::SpanCell;
use crate::pipeline::raw::{ImageSource, RawDocument, RawImage, RawItem, RawTable, TableLayout};
use crate::pipeline::stages::mime_for_path;

const DOCUMENT_PART: &str = "word/document.xml";
const STYLES_PART: &str = "word/styles.xml";
const RELS_PART: &str = "word/_rels/document.xml.rels";

/// WordprocessingML backend reading the package parts directly.
#[derive(Debug, Clone, Default)]
pub struct DocxBackend;

impl Backend for DocxBackend {
    fn name(&self) -> &'static str {
        "docx"
    }

    fn convert(&self, path: &Path) -> Result<RawDocument> {
        let file = File::open(path).with_context(|| format!("failed to open {}", path.display()))?;
        let mut archive = ZipArchive::new(file)
            .with_context(|| format!("{} is not a docx package", path.display()))?;

        let document = read_part(&mut archive, DOCUMENT_PART)?
            .with_context(|| format!("package has no {DOCUMENT_PART}"))?;
        let styles = match read_part(&mut archive, STYLES_PART)? {
            Some(xml) => parse_styles(&xml)?,
            None => HashMap::new(),
        };
        let relationships = match read_part(&mut archive, RELS_PART)? {
            Some(xml) => parse_relationships(&xml)?,
            None => HashMap::new(),
        };

        let mut walker = Walker::new(&styles);
        walker.walk(&document)?;

        let mut raw = RawDocument::for_path(path);
        for block in walker.blocks {
            let item = match block {
                Block::Text { text, level } => RawItem::Text { text, level },
                Block::Formula(text) => RawItem::Formula { text, format: None },
                Block::Table { rows, caption } => RawItem::Table(RawTable {
                    layout: TableLayout::Spans(rows),
                    caption,
                    footnote: Vec::new(),
                }),
                Block::Image { rel_id, caption } => {
                    match resolve_image(&mut archive, &relationships, &rel_id)? {
                        Some(source) => RawItem::Image(RawImage {
                            source,
                            caption,
                            footnote: Vec::new(),
                        }),
                        None => continue,
                    }
                }
            };
            raw.push(item);
        }

        Ok(raw)
    }
}

fn read_part<R: Read + Seek>(archive: &mut ZipArchive<R>, name: &str) -> Result<Option<String>> {
    Ok(read_bytes(archive, name)?.map(|bytes| String::from_utf8_lossy(&bytes).into_owned()))
}

fn read_bytes<R: Read + Seek>(archive: &mut ZipArchive<R>, name: &str) -> Result<Option<Vec<u8>>> {
    let mut entry = match archive.by_name(name) {
        Ok(entry) => entry,
        Err(ZipError::FileNotFound) => return Ok(None),
        Err(err) => return Err(err).with_context(|| format!("failed to open part {name}")),
    };
    let mut bytes = Vec::new();
    entry
        .read_to_end(&mut bytes)
        .with_context(|| format!("failed to read part {name}"))?;
    Ok(Some(bytes))
}

#[derive(Debug, Clone)]
struct Relationship {
    target: String,
    external: bool,
}

fn resolve_image<R: Read + Seek>(
    archive: &mut ZipArchive<R>,
    relationships: &HashMap<String, Relationship>,
    rel_id: &str,
) -> Result<Option<ImageSource>> {
    let Some(rel) = relationships.get(rel_id) else {
        warn!(rel_id, "image relationship not found");
        return Ok(None);
    };
    if rel.external {
        return Ok(Some(ImageSource::Uri(rel.target.clone())));
    }

    let part = part_name(&rel.target);
    match read_bytes(archive, &part)? {
        Some(data) => Ok(Some(ImageSource::Inline {
            mime: mime_for_path(Path::new(&part)).to_string(),
            data,
        })),
        None => {
            warn!(part = %part, "embedded image part missing");
            Ok(None)
        }
    }
}

/// Resolves a relationship target against the `word/` directory.
fn part_name(target: &str) -> String {
    if let Some(absolute) = target.strip_prefix('/') {
        return absolute.to_string();
    }
    let mut segments = vec!["word"];
    for segment in target.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop();
            }
            other => segments.push(other),
        }
    }
    segments.join("/")
}

fn attr(e: &BytesStart<'_>, key: &[u8]) -> Option<String> {
    e.attributes()
        .flatten()
        .find(|attr| attr.key.local_name().as_ref() == key)
        .and_then(|attr| attr.unescape_value().ok().map(|value| value.into_owned()))
}

fn parse_relationships(xml: &str) -> Result<HashMap<String, Relationship>> {
    let mut reader = Reader::from_str(xml);
    let mut relationships = HashMap::new();
    loop {
        match reader.read_event().context("malformed relationships part")? {
            Event::Start(e) | Event::Empty(e) if e.local_name().as_ref() == b"Relationship" => {
                if let (Some(id), Some(target)) = (attr(&e, b"Id"), attr(&e, b"Target")) {
                    let external = attr(&e, b"TargetMode").is_some_and(|mode| mode == "External");
                    relationships.insert(id, Relationship { target, external });
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }
    Ok(relationships)
}

#[derive(Debug, Clone, Default)]
struct StyleInfo {
    name: String,
    outline_level: Option<u32>,
}

fn parse_styles(xml: &str) -> Result<HashMap<String, StyleInfo>> {
    let mut reader = Reader::from_str(xml);
    let mut styles = HashMap::new();
    let mut current: Option<(String, StyleInfo)> = None;
    loop {
        match reader.read_event().context("malformed styles part")? {
            Event::Start(e) | Event::Empty(e) => match e.local_name().as_ref() {
                b"style" => current = attr(&e, b"styleId").map(|id| (id, StyleInfo::default())),
                b"name" => {
                    if let (Some((_, style)), Some(name)) = (current.as_mut(), attr(&e, b"val")) {
                        style.name = name;
                    }
                }
                b"outlineLvl" => {
                    if let Some((_, style)) = current.as_mut() {
                        style.outline_level = attr(&e, b"val").and_then(|v| v.parse().ok());
                    }
                }
                _ => {}
            },
            Event::End(e) if e.local_name().as_ref() == b"style" => {
                if let Some((id, style)) = current.take() {
                    styles.insert(id, style);
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }
    Ok(styles)
}

/// Outline level 9 is body text.
fn outline_to_level(outline: u32) -> Option<u32> {
    (outline < 9).then_some(outline + 1)
}

fn heading_level(
    style_id: Option<&str>,
    direct_outline: Option<u32>,
    styles: &HashMap<String, StyleInfo>,
) -> Option<u32> {
    if let Some(outline) = direct_outline {
        return outline_to_level(outline);
    }
    let id = style_id?;
    let style = styles.get(id);
    if let Some(outline) = style.and_then(|s| s.outline_level) {
        return outline_to_level(outline);
    }

    let name = style
        .map(|s| s.name.as_str())
        .filter(|name| !name.is_empty())
        .unwrap_or(id)
        .to_ascii_lowercase();
    if name == "title" {
        return Some(1);
    }
    name.strip_prefix("heading")
        .and_then(|rest| rest.trim().parse::<u32>().ok())
        .filter(|level| (1..=9).contains(level))
}

fn is_caption_style(style_id: Option<&str>, styles: &HashMap<String, StyleInfo>) -> bool {
    let Some(id) = style_id else {
        return false;
    };
    let name = styles.get(id).map(|s| s.name.as_str()).unwrap_or(id);
    name.eq_ignore_ascii_case("caption") || id.eq_ignore_ascii_case("caption")
}

#[derive(Debug)]
enum Block {
    Text { text: String, level: Option<u32> },
    Formula(String),
    Table { rows: Vec<Vec<SpanCell>>, caption: Vec<String> },
    Image { rel_id: String, caption: Vec<String> },
}

#[derive(Debug, Default)]
struct ParagraphState {
    style: Option<String>,
    outline: Option<u32>,
    text: String,
    formulas: Vec<String>,
    images: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum VerticalMerge {
    Restart,
    Continue,
}

#[derive(Debug)]
struct CellState {
    text: String,
    grid_span: usize,
    vertical_merge: Option<VerticalMerge>,
}

impl CellState {
    fn new() -> Self {
        Self {
            text: String::new(),
            grid_span: 1,
            vertical_merge: None,
        }
    }

    fn append(&mut self, text: &str) {
        let text = text.trim();
        if text.is_empty() {
            return;
        }
        if !self.text.is_empty() {
            self.text.push('\n');
        }
        self.text.push_str(text);
    }
}

#[derive(Debug, Default)]
struct RowState {
    header: bool,
    /// Grid columns skipped before the first cell (`w:gridBefore`).
    grid_before: usize,
    cells: Vec<CellState>,
}

#[derive(Debug, Default)]
struct TableState {
    rows: Vec<RowState>,
    row: Option<RowState>,
    cell: Option<CellState>,
    /// Images found inside cells, emitted after the table.
    media: Vec<Block>,
}

impl TableState {
    fn current_cell(&mut self) -> &mut CellState {
        self.cell.get_or_insert_with(CellState::new)
    }
}

struct Walker<'a> {
    styles: &'a HashMap<String, StyleInfo>,
    blocks: Vec<Block>,
    paragraphs: Vec<ParagraphState>,
    tables: Vec<TableState>,
    in_text: bool,
    math_depth: usize,
    math: String,
}

impl<'a> Walker<'a> {
    fn new(styles: &'a HashMap<String, StyleInfo>) -> Self {
        Self {
            styles,
            blocks: Vec::new(),
            paragraphs: Vec::new(),
            tables: Vec::new(),
            in_text: false,
            math_depth: 0,
            math: String::new(),
        }
    }

    fn walk(&mut self, xml: &str) -> Result<()> {
        let mut reader = Reader::from_str(xml);
        loop {
            match reader
                .read_event()
                .with_context(|| format!("malformed {DOCUMENT_PART}"))?
            {
                Event::Start(e) => self.open(&e),
                Event::Empty(e) => {
                    self.open(&e);
                    self.close(e.local_name().as_ref());
                }
                Event::End(e) => self.close(e.local_name().as_ref()),
                Event::Text(e) if self.in_text => {
                    let text = e.unescape().context("invalid text escape")?;
                    self.push_text(&text);
                }
                Event::Eof => break,
                _ => {}
            }
        }

        while !self.tables.is_empty() {
            self.finish_table();
        }
        Ok(())
    }

    fn open(&mut self, e: &BytesStart<'_>) {
        match e.local_name().as_ref() {
            b"p" => self.paragraphs.push(ParagraphState::default()),
            b"pStyle" => {
                if let Some(paragraph) = self.paragraphs.last_mut() {
                    paragraph.style = attr(e, b"val");
                }
            }
            b"outlineLvl" => {
                if let Some(paragraph) = self.paragraphs.last_mut() {
                    paragraph.outline = attr(e, b"val").and_then(|v| v.parse().ok());
                }
            }
            b"t" => self.in_text = true,
            // run tabs carry no attributes; tab stops in paragraph properties do
            b"tab" if attr(e, b"val").is_none() => self.push_text("\t"),
            b"br" | b"cr" => self.push_text("\n"),
            b"oMath" => {
                self.math_depth += 1;
                if self.math_depth == 1 {
                    self.math.clear();
                }
            }
            b"blip" => {
                if let Some(rel_id) = attr(e, b"embed").or_else(|| attr(e, b"link")) {
                    self.push_image(rel_id);
                }
            }
            b"imagedata" => {
                if let Some(rel_id) = attr(e, b"id") {
                    self.push_image(rel_id);
                }
            }
            b"tbl" => self.tables.push(TableState::default()),
            b"tr" => {
                if let Some(table) = self.tables.last_mut() {
                    table.row = Some(RowState::default());
                }
            }
            b"tblHeader" => {
                let on = attr(e, b"val").is_none_or(|v| v != "0" && v != "false");
                if let Some(row) = self.tables.last_mut().and_then(|t| t.row.as_mut()) {
                    row.header = on;
                }
            }
            b"gridBefore" => {
                let skipped = attr(e, b"val").and_then(|v| v.parse::<usize>().ok());
                if let (Some(row), Some(skipped)) =
                    (self.tables.last_mut().and_then(|t| t.row.as_mut()), skipped)
                {
                    row.grid_before = skipped;
                }
            }
            b"tc" => {
                if let Some(table) = self.tables.last_mut() {
                    table.cell = Some(CellState::new());
                }
            }
            b"gridSpan" => {
                let span = attr(e, b"val").and_then(|v| v.parse::<usize>().ok());
                if let (Some(cell), Some(span)) =
                    (self.tables.last_mut().and_then(|t| t.cell.as_mut()), span)
                {
                    cell.grid_span = span.max(1);
                }
            }
            b"vMerge" => {
                let merge = match attr(e, b"val").as_deref() {
                    Some("restart") => VerticalMerge::Restart,
                    _ => VerticalMerge::Continue,
                };
                if let Some(cell) = self.tables.last_mut().and_then(|t| t.cell.as_mut()) {
                    cell.vertical_merge = Some(merge);
                }
            }
            _ => {}
        }
    }

    fn close(&mut self, name: &[u8]) {
        match name {
            b"t" => self.in_text = false,
            b"oMath" => {
                self.math_depth = self.math_depth.saturating_sub(1);
                if self.math_depth == 0 {
                    let formula = self.math.split_whitespace().collect::<Vec<_>>().join(" ");
                    self.math.clear();
                    self.push_formula(formula);
                }
            }
            b"p" => self.finish_paragraph(),
            b"tc" => {
                if let Some(table) = self.tables.last_mut() {
                    if let Some(cell) = table.cell.take() {
                        table.row.get_or_insert_with(RowState::default).cells.push(cell);
                    }
                }
            }
            b"tr" => {
                if let Some(table) = self.tables.last_mut() {
                    if let Some(row) = table.row.take() {
                        table.rows.push(row);
                    }
                }
            }
            b"tbl" => self.finish_table(),
            _ => {}
        }
    }

    fn push_text(&mut self, text: &str) {
        if self.math_depth > 0 {
            self.math.push_str(text);
        } else if let Some(paragraph) = self.paragraphs.last_mut() {
            paragraph.text.push_str(text);
        } else if let Some(table) = self.tables.last_mut() {
            table.current_cell().text.push_str(text);
        }
    }

    fn push_image(&mut self, rel_id: String) {
        if let Some(paragraph) = self.paragraphs.last_mut() {
            paragraph.images.push(rel_id);
        } else if let Some(table) = self.tables.last_mut() {
            table.media.push(Block::Image {
                rel_id,
                caption: Vec::new(),
            });
        } else {
            self.blocks.push(Block::Image {
                rel_id,
                caption: Vec::new(),
            });
        }
    }

    fn push_formula(&mut self, formula: String) {
        if formula.is_empty() {
            return;
        }
        match (self.paragraphs.last_mut(), self.tables.is_empty()) {
            // inside tables, math stays part of the cell text
            (Some(paragraph), false) => {
                paragraph.text.push(' ');
                paragraph.text.push_str(&formula);
            }
            (Some(paragraph), true) => paragraph.formulas.push(formula),
            (None, _) => self.blocks.push(Block::Formula(formula)),
        }
    }

    fn finish_paragraph(&mut self) {
        let Some(paragraph) = self.paragraphs.pop() else {
            return;
        };

        if let Some(parent) = self.paragraphs.last_mut() {
            if !paragraph.text.trim().is_empty() {
                parent.text.push(' ');
                parent.text.push_str(paragraph.text.trim());
            }
            parent.formulas.extend(paragraph.formulas);
            parent.images.extend(paragraph.images);
            return;
        }

        if let Some(table) = self.tables.last_mut() {
            table.current_cell().append(&paragraph.text);
            table
                .media
                .extend(paragraph.images.into_iter().map(|rel_id| Block::Image {
                    rel_id,
                    caption: Vec::new(),
                }));
            return;
        }

        let text = paragraph.text.trim().to_string();
        let style = paragraph.style.as_deref();

        if !text.is_empty() && is_caption_style(style, self.styles) {
            if let Some(Block::Table { caption, .. } | Block::Image { caption, .. }) =
                self.blocks.last_mut()
            {
                caption.push(text);
                self.push_paragraph_media(paragraph.formulas, paragraph.images);
                return;
            }
        }

        if !text.is_empty() {
            let level = heading_level(style, paragraph.outline, self.styles);
            self.blocks.push(Block::Text { text, level });
        }
        self.push_paragraph_media(paragraph.formulas, paragraph.images);
    }

    fn push_paragraph_media(&mut self, formulas: Vec<String>, images: Vec<String>) {
        self.blocks.extend(formulas.into_iter().map(Block::Formula));
        self.blocks.extend(images.into_iter().map(|rel_id| Block::Image {
            rel_id,
            caption: Vec::new(),
        }));
    }

    fn finish_table(&mut self) {
        let Some(mut table) = self.tables.pop() else {
            return;
        };
        if let Some(cell) = table.cell.take() {
            table.row.get_or_insert_with(RowState::default).cells.push(cell);
        }
        if let Some(row) = table.row.take() {
            table.rows.push(row);
        }
        let rows = resolve_vertical_merges(table.rows);

        if let Some(outer) = self.tables.last_mut() {
            let text = rows
                .iter()
                .flatten()
                .filter_map(|cell| cell.text.as_deref())
                .map(str::trim)
                .filter(|text| !text.is_empty())
                .collect::<Vec<_>>()
                .join(" ");
            outer.current_cell().append(&text);
            outer.media.extend(table.media);
            return;
        }

        self.blocks.push(Block::Table {
            rows,
            caption: Vec::new(),
        });
        self.blocks.extend(table.media);
    }
}

/// Turns `vMerge` continuation cells into row spans on the restarting cell.
/// Columns skipped by `gridBefore` become one empty cell so later cells keep
/// their grid position; `gridAfter` gaps are left to grid padding.
fn resolve_vertical_merges(rows: Vec<RowState>) -> Vec<Vec<SpanCell>> {
    let mut out: Vec<Vec<SpanCell>> = Vec::with_capacity(rows.len());
    let mut anchors: HashMap<usize, (usize, usize)> = HashMap::new();

    for (row_idx, row) in rows.into_iter().enumerate() {
        let mut cells = Vec::with_capacity(row.cells.len() + 1);
        let mut col = row.grid_before;
        if row.grid_before > 0 {
            for skipped in 0..row.grid_before {
                anchors.remove(&skipped);
            }
            cells.push(SpanCell {
                text: Some(String::new()),
                rowspan: 1,
                colspan: row.grid_before,
                header: false,
            });
        }
        for cell in row.cells {
            let span = cell.grid_span.max(1);
            let anchor = anchors.get(&col).copied();
            let continued = match (cell.vertical_merge, anchor) {
                (Some(VerticalMerge::Continue), Some((r, c))) => out
                    .get_mut(r)
                    .and_then(|anchor_row| anchor_row.get_mut(c))
                    .map(|anchor_cell| anchor_cell.rowspan += 1)
                    .is_some(),
                _ => false,
            };

            if !continued {
                if cell.vertical_merge == Some(VerticalMerge::Restart) {
                    anchors.insert(col, (row_idx, cells.len()));
                } else {
                    anchors.remove(&col);
                }
                cells.push(SpanCell {
                    text: Some(cell.text),
                    rowspan: 1,
                    colspan: span,
                    header: row.header,
                });
            }
            col += span;
        }
        out.push(cells);
    }

    out
}
