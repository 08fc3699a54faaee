use std::collections::HashMap;

use chrono::{NaiveDate, NaiveDateTime};

use super::TableGrid;

pub const DATE_FORMAT: &str = "%Y-%m-%d";
pub const DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Typed spreadsheet cell value, before rendering.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum CellValue {
    #[default]
    Empty,
    Text(String),
    Int(i64),
    Float(f64),
    Bool(bool),
    Date(NaiveDate),
    DateTime(NaiveDateTime),
    Other(String),
}

impl CellValue {
    pub fn render(&self) -> String {
        match self {
            CellValue::Empty => String::new(),
            CellValue::Text(text) | CellValue::Other(text) => text.clone(),
            CellValue::Int(value) => value.to_string(),
            CellValue::Float(value) => render_float(*value),
            CellValue::Bool(value) => value.to_string(),
            CellValue::Date(date) => date.format(DATE_FORMAT).to_string(),
            CellValue::DateTime(datetime) => datetime.format(DATETIME_FORMAT).to_string(),
        }
    }
}

fn render_float(value: f64) -> String {
    if value.is_finite() && value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{}", value as i64)
    } else {
        value.to_string()
    }
}

/// Inclusive, 1-based rectangle of merged cells.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MergeRange {
    pub first_row: u32,
    pub first_col: u32,
    pub last_row: u32,
    pub last_col: u32,
}

impl MergeRange {
    pub fn new(first_row: u32, first_col: u32, last_row: u32, last_col: u32) -> Self {
        Self {
            first_row: first_row.min(last_row),
            first_col: first_col.min(last_col),
            last_row: first_row.max(last_row),
            last_col: first_col.max(last_col),
        }
    }

    pub fn anchor(&self) -> (u32, u32) {
        (self.first_row, self.first_col)
    }

    fn coordinates(&self) -> impl Iterator<Item = (u32, u32)> + '_ {
        (self.first_row..=self.last_row)
            .flat_map(move |row| (self.first_col..=self.last_col).map(move |col| (row, col)))
    }
}

/// Sparse sheet contents with 1-based coordinates.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SheetCells {
    pub max_row: u32,
    pub max_col: u32,
    pub values: HashMap<(u32, u32), CellValue>,
    pub merges: Vec<MergeRange>,
}

impl SheetCells {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores a value; row and column 0 are ignored.
    pub fn set(&mut self, row: u32, col: u32, value: CellValue) {
        if row == 0 || col == 0 {
            return;
        }
        self.max_row = self.max_row.max(row);
        self.max_col = self.max_col.max(col);
        self.values.insert((row, col), value);
    }

    pub fn merge(&mut self, range: MergeRange) {
        if range.first_row == 0 || range.first_col == 0 {
            return;
        }
        self.max_row = self.max_row.max(range.last_row);
        self.max_col = self.max_col.max(range.last_col);
        self.merges.push(range);
    }

    pub fn get(&self, row: u32, col: u32) -> Option<&CellValue> {
        self.values.get(&(row, col))
    }
}

/// Walks `(1,1)..=(max_row,max_col)` resolving merged positions to the
/// value of their range's top-left cell. Later merges win on overlap.
pub fn reconstruct_sheet(sheet: &SheetCells) -> TableGrid {
    let mut merged: HashMap<(u32, u32), String> = HashMap::new();
    for range in &sheet.merges {
        let (row, col) = range.anchor();
        let value = sheet.get(row, col).map(CellValue::render).unwrap_or_default();
        for coordinate in range.coordinates() {
            merged.insert(coordinate, value.clone());
        }
    }

    let grid: Vec<Vec<String>> = (1..=sheet.max_row)
        .map(|row| {
            (1..=sheet.max_col)
                .map(|col| match merged.get(&(row, col)) {
                    Some(value) => value.clone(),
                    None => sheet.get(row, col).map(CellValue::render).unwrap_or_default(),
                })
                .collect()
        })
        .collect();

    let rows = grid.len();
    let columns = if rows == 0 { 0 } else { sheet.max_col as usize };
    // spreadsheets have no header markup; the first row serves as column headers
    let header_mask: Vec<Vec<bool>> = (0..rows).map(|row| vec![row == 0; columns]).collect();

    TableGrid {
        rows,
        columns,
        grid,
        header_mask,
    }
}
