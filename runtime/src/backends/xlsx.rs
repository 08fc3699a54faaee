use std::path::Path;

use anyhow::{Context, Result};
use calamine::{Data, Reader, Xlsx, open_workbook};
use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use tracing::debug;

use super::Backend;
use crate::grid::{CellValue, MergeRange, SheetCells};
use crate::pipeline::raw::{ImageSource, RawDocument, RawImage, RawItem, RawTable, TableLayout};
use crate::pipeline::stages::mime_for_extension;

/// Spreadsheet backend: one heading and one merged-cell table per sheet.
#[derive(Debug, Clone, Default)]
pub struct XlsxBackend;

impl Backend for XlsxBackend {
    fn name(&self) -> &'static str {
        "xlsx"
    }

    fn convert(&self, path: &Path) -> Result<RawDocument> {
        let mut workbook: Xlsx<_> = open_workbook(path)
            .with_context(|| format!("failed to open workbook {}", path.display()))?;
        workbook
            .load_merged_regions()
            .context("failed to read merged cell regions")?;

        let mut raw = RawDocument::for_path(path);

        for (index, sheet_name) in workbook.sheet_names().into_iter().enumerate() {
            let range = workbook
                .worksheet_range(&sheet_name)
                .with_context(|| format!("failed to read sheet {sheet_name}"))?;

            let mut cells = SheetCells::new();
            if let Some((start_row, start_col)) = range.start() {
                for (row, col, value) in range.used_cells() {
                    let row = start_row + row as u32 + 1;
                    let col = start_col + col as u32 + 1;
                    cells.set(row, col, cell_value(value));
                }
            }
            for (_, _, dims) in workbook.merged_regions_by_sheet(&sheet_name) {
                cells.merge(MergeRange::new(
                    dims.start.0 + 1,
                    dims.start.1 + 1,
                    dims.end.0 + 1,
                    dims.end.1 + 1,
                ));
            }
            debug!(
                sheet = %sheet_name,
                rows = cells.max_row,
                columns = cells.max_col,
                merges = cells.merges.len(),
                "read worksheet"
            );

            raw.push_text(format!("Sheet {}: {}", index + 1, sheet_name), Some(2));
            raw.push(RawItem::Table(RawTable {
                layout: TableLayout::Sheet(cells),
                caption: vec![sheet_name],
                footnote: Vec::new(),
            }));
        }

        for (ext, data) in workbook.pictures().unwrap_or_default() {
            raw.push(RawItem::Image(RawImage {
                source: ImageSource::Inline {
                    mime: mime_for_extension(&ext.to_ascii_lowercase()).to_string(),
                    data,
                },
                caption: Vec::new(),
                footnote: Vec::new(),
            }));
        }

        Ok(raw)
    }
}

/// Midnight date-times are reported as plain dates.
pub fn cell_value(data: &Data) -> CellValue {
    match data {
        Data::Empty => CellValue::Empty,
        Data::String(text) => CellValue::Text(text.clone()),
        Data::Int(value) => CellValue::Int(*value),
        Data::Float(value) => CellValue::Float(*value),
        Data::Bool(value) => CellValue::Bool(*value),
        Data::DateTime(value) => {
            if value.is_duration() {
                return CellValue::Other(value.to_string());
            }
            match value.as_datetime() {
                Some(datetime) => temporal(datetime),
                None => CellValue::Other(value.to_string()),
            }
        }
        Data::DateTimeIso(text) => parse_iso(text).unwrap_or_else(|| CellValue::Other(text.clone())),
        Data::DurationIso(text) => CellValue::Other(text.clone()),
        Data::Error(err) => CellValue::Other(err.to_string()),
    }
}

fn temporal(datetime: NaiveDateTime) -> CellValue {
    if datetime.time() == NaiveTime::MIN {
        CellValue::Date(datetime.date())
    } else {
        CellValue::DateTime(datetime)
    }
}

fn parse_iso(text: &str) -> Option<CellValue> {
    if let Ok(datetime) = NaiveDateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%S%.f") {
        return Some(temporal(datetime));
    }
    NaiveDate::parse_from_str(text, "%Y-%m-%d")
        .ok()
        .map(CellValue::Date)
}
