use anyhow::Result;
use chrono::NaiveDate;

use docnorm::grid::{
    CellValue, MergeRange, SheetCells, SpanCell, parse_html_table, reconstruct_sheet,
    reconstruct_spans,
};

fn grid_of(rows: &[&[&str]]) -> Vec<Vec<String>> {
    rows.iter()
        .map(|row| row.iter().map(|cell| cell.to_string()).collect())
        .collect()
}

#[test]
fn row_span_fills_cell_below() {
    let rows = vec![
        vec![SpanCell::spanning("H", 2, 1), SpanCell::new("A")],
        vec![SpanCell::new("B")],
    ];
    let table = reconstruct_spans(&rows);

    assert_eq!(table.rows, 2);
    assert_eq!(table.columns, 2);
    assert_eq!(table.grid, grid_of(&[&["H", "A"], &["H", "B"]]));
}

#[test]
fn two_by_two_span_replicates_text() {
    let rows = vec![
        vec![SpanCell::spanning("X", 2, 2), SpanCell::new("a")],
        vec![SpanCell::new("b")],
        vec![SpanCell::new("c"), SpanCell::new("d")],
    ];
    let table = reconstruct_spans(&rows);

    assert_eq!(
        table.grid,
        grid_of(&[&["X", "X", "a"], &["X", "X", "b"], &["c", "d", ""]])
    );
    assert_eq!((table.rows, table.columns), (3, 3));
}

#[test]
fn short_rows_are_padded_to_widest_row() {
    let rows = vec![
        vec![SpanCell::new("a"), SpanCell::new("b"), SpanCell::new("c")],
        vec![SpanCell::new("d")],
        vec![],
    ];
    let table = reconstruct_spans(&rows);

    assert_eq!(
        table.grid,
        grid_of(&[&["a", "b", "c"], &["d", "", ""], &["", "", ""]])
    );
}

#[test]
fn empty_table_has_no_rows_or_columns() {
    let table = reconstruct_spans(&[]);
    assert_eq!(table.rows, 0);
    assert_eq!(table.columns, 0);
    assert!(table.grid.is_empty());
}

#[test]
fn overlapping_span_overwrites_earlier_value() {
    let rows = vec![
        vec![SpanCell::new("a"), SpanCell::spanning("b", 2, 1)],
        vec![SpanCell::spanning("c", 1, 3)],
    ];
    let table = reconstruct_spans(&rows);

    assert_eq!(table.grid, grid_of(&[&["a", "b", ""], &["c", "c", "c"]]));
}

#[test]
fn cell_text_is_whitespace_collapsed() {
    let rows = vec![vec![
        SpanCell::new("  two\n  words "),
        SpanCell {
            text: None,
            rowspan: 0,
            colspan: 0,
            header: false,
        },
    ]];
    let table = reconstruct_spans(&rows);
    assert_eq!(table.grid, grid_of(&[&["two words", ""]]));
}

#[test]
fn random_spans_always_produce_rectangles() {
    let mut rng = fastrand::Rng::with_seed(7);
    for _ in 0..200 {
        let rows: Vec<Vec<SpanCell>> = (0..rng.usize(0..6))
            .map(|r| {
                (0..rng.usize(0..5))
                    .map(|c| SpanCell::spanning(format!("{r}.{c}"), rng.usize(1..4), rng.usize(1..4)))
                    .collect()
            })
            .collect();
        let table = reconstruct_spans(&rows);

        assert_eq!(table.grid.len(), table.rows);
        assert!(table.grid.iter().all(|row| row.len() == table.columns));
        assert_eq!(table.header_mask.len(), table.rows);
    }
}

#[test]
fn html_table_with_header_row() -> Result<()> {
    let rows = parse_html_table(
        r#"<table>
            <tr><th>Item</th><th colspan="2">Price</th></tr>
            <tr><th rowspan="2">Pens</th><td> 1 </td><td>2</td></tr>
            <tr><td>3</td><td>4</td></tr>
        </table>"#,
    )?;
    let table = reconstruct_spans(&rows);

    assert_eq!(
        table.grid,
        grid_of(&[
            &["Item", "Price", "Price"],
            &["Pens", "1", "2"],
            &["Pens", "3", "4"]
        ])
    );
    assert_eq!(table.column_headers(), ["Item", "Price", "Price"]);
    assert_eq!(table.row_headers(), ["Pens", "Pens"]);
    Ok(())
}

#[test]
fn markup_without_table_is_an_error() {
    assert!(parse_html_table("<p>no table here</p>").is_err());
}

fn budget_sheet() -> SheetCells {
    let mut sheet = SheetCells::new();
    sheet.set(1, 1, CellValue::Text("Budget".into()));
    sheet.set(2, 1, CellValue::Text("Paper".into()));
    sheet.set(2, 2, CellValue::Float(12.0));
    sheet.set(2, 3, CellValue::Bool(true));
    sheet.set(
        3,
        1,
        CellValue::Date(NaiveDate::from_ymd_opt(2024, 5, 1).unwrap()),
    );
    sheet.set(
        3,
        2,
        CellValue::DateTime(
            NaiveDate::from_ymd_opt(2024, 5, 1)
                .unwrap()
                .and_hms_opt(8, 30, 0)
                .unwrap(),
        ),
    );
    sheet.merge(MergeRange::new(1, 1, 1, 3));
    sheet
}

#[test]
fn sheet_merges_repeat_top_left_value() {
    let table = reconstruct_sheet(&budget_sheet());

    assert_eq!((table.rows, table.columns), (3, 3));
    assert_eq!(
        table.grid,
        grid_of(&[
            &["Budget", "Budget", "Budget"],
            &["Paper", "12", "true"],
            &["2024-05-01", "2024-05-01 08:30:00", ""]
        ])
    );
    assert_eq!(table.column_headers(), ["Budget", "Budget", "Budget"]);
    assert!(table.row_headers().is_empty());
}

#[test]
fn merge_extends_sheet_extents() {
    let mut sheet = SheetCells::new();
    sheet.set(1, 1, CellValue::Int(5));
    sheet.merge(MergeRange::new(1, 1, 2, 2));
    let table = reconstruct_sheet(&sheet);
    assert_eq!(table.grid, grid_of(&[&["5", "5"], &["5", "5"]]));
}

#[test]
fn sheet_reconstruction_is_idempotent() {
    let sheet = budget_sheet();
    let first = reconstruct_sheet(&sheet);
    let second = reconstruct_sheet(&sheet);
    assert_eq!(
        serde_json::to_vec(&first.grid).unwrap(),
        serde_json::to_vec(&second.grid).unwrap()
    );
}
