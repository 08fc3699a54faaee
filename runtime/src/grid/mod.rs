//! Table grid reconstruction.
//!
//! Both variants flatten spanned or merged cells into a dense rectangular
//! matrix in which every covered position repeats the originating value.

pub mod sheet;
pub mod span;

pub use sheet::{CellValue, MergeRange, SheetCells, reconstruct_sheet};
pub use span::{SpanCell, normalize_cell_text, parse_html_table, reconstruct_spans};

use crate::model::TableContent;

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TableGrid {
    pub rows: usize,
    pub columns: usize,
    pub grid: Vec<Vec<String>>,
    /// Parallel to `grid`; marks positions written by header cells.
    pub header_mask: Vec<Vec<bool>>,
}

impl TableGrid {
    pub fn is_empty(&self) -> bool {
        self.rows == 0
    }

    /// The first row, when every cell in it is a header cell.
    pub fn column_headers(&self) -> Vec<String> {
        match (self.grid.first(), self.header_mask.first()) {
            (Some(row), Some(mask)) if !mask.is_empty() && mask.iter().all(|h| *h) => row.clone(),
            _ => Vec::new(),
        }
    }

    /// First-column header cells below the header row.
    pub fn row_headers(&self) -> Vec<String> {
        self.grid
            .iter()
            .zip(&self.header_mask)
            .skip(1)
            .filter_map(|(row, mask)| match (row.first(), mask.first()) {
                (Some(text), Some(true)) => Some(text.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn into_content(self, caption: Vec<String>, footnote: Vec<String>) -> TableContent {
        let column_headers = self.column_headers();
        let row_headers = self.row_headers();
        TableContent {
            rows: self.rows,
            columns: self.columns,
            grid: self.grid,
            row_headers,
            column_headers,
            caption,
            footnote,
        }
    }
}
