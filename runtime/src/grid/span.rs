use anyhow::{Result, anyhow};
use scraper::{ElementRef, Html, Selector};

use super::TableGrid;

/// Upper bound for a single `rowspan`/`colspan` attribute.
pub const MAX_SPAN: usize = 1000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpanCell {
    pub text: Option<String>,
    pub rowspan: usize,
    pub colspan: usize,
    pub header: bool,
}

impl SpanCell {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            rowspan: 1,
            colspan: 1,
            header: false,
        }
    }

    pub fn spanning(text: impl Into<String>, rowspan: usize, colspan: usize) -> Self {
        Self {
            rowspan,
            colspan,
            ..Self::new(text)
        }
    }

    pub fn header(mut self) -> Self {
        self.header = true;
        self
    }
}

/// Collapses whitespace runs into one space and trims both ends.
pub fn normalize_cell_text(raw: &str) -> String {
    raw.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn clamp_span(span: usize) -> usize {
    span.clamp(1, MAX_SPAN)
}

#[derive(Clone)]
struct Slot {
    text: String,
    header: bool,
}

/// Lays out source rows of spanned cells on a rectangular grid.
///
/// Cells are placed left to right in the first slot not already taken by a
/// row span from above. Overlapping spans overwrite earlier writes.
pub fn reconstruct_spans(rows: &[Vec<SpanCell>]) -> TableGrid {
    let mut slots: Vec<Vec<Option<Slot>>> = Vec::new();

    for (row_idx, cells) in rows.iter().enumerate() {
        if slots.len() <= row_idx {
            slots.resize_with(row_idx + 1, Vec::new);
        }
        let mut col_idx = 0;

        for cell in cells {
            let rowspan = clamp_span(cell.rowspan);
            let colspan = clamp_span(cell.colspan);
            let text = cell
                .text
                .as_deref()
                .map(normalize_cell_text)
                .unwrap_or_default();

            while slots[row_idx].get(col_idx).is_some_and(Option::is_some) {
                col_idx += 1;
            }

            let last_row = row_idx + rowspan;
            if slots.len() < last_row {
                slots.resize_with(last_row, Vec::new);
            }
            for row in &mut slots[row_idx..last_row] {
                if row.len() < col_idx + colspan {
                    row.resize(col_idx + colspan, None);
                }
                for slot in &mut row[col_idx..col_idx + colspan] {
                    *slot = Some(Slot {
                        text: text.clone(),
                        header: cell.header,
                    });
                }
            }

            col_idx += colspan;
        }
    }

    let columns = slots.iter().map(Vec::len).max().unwrap_or(0);
    let mut grid = Vec::with_capacity(slots.len());
    let mut header_mask = Vec::with_capacity(slots.len());

    for row in slots {
        let mut texts = Vec::with_capacity(columns);
        let mut mask = Vec::with_capacity(columns);
        for slot in row {
            match slot {
                Some(slot) => {
                    texts.push(slot.text);
                    mask.push(slot.header);
                }
                None => {
                    texts.push(String::new());
                    mask.push(false);
                }
            }
        }
        texts.resize(columns, String::new());
        mask.resize(columns, false);
        grid.push(texts);
        header_mask.push(mask);
    }

    TableGrid {
        rows: grid.len(),
        columns,
        grid,
        header_mask,
    }
}

/// Decodes the first `<table>` of an HTML fragment into span rows.
///
/// Rows of nested tables stay inside their enclosing cell's text.
pub fn parse_html_table(html: &str) -> Result<Vec<Vec<SpanCell>>> {
    let fragment = Html::parse_fragment(html);
    let selector =
        Selector::parse("table").map_err(|err| anyhow!("invalid table selector: {err}"))?;
    let table = fragment
        .select(&selector)
        .next()
        .ok_or_else(|| anyhow!("markup contains no <table> element"))?;

    let mut rows = Vec::new();
    for child in table.children().filter_map(ElementRef::wrap) {
        match child.value().name() {
            "tr" => rows.push(read_row(child)),
            "thead" | "tbody" | "tfoot" => {
                for tr in child
                    .children()
                    .filter_map(ElementRef::wrap)
                    .filter(|el| el.value().name() == "tr")
                {
                    rows.push(read_row(tr));
                }
            }
            _ => {}
        }
    }

    Ok(rows)
}

/// Text of the first `<caption>` of the first table, if any.
pub fn html_table_caption(html: &str) -> Option<String> {
    let fragment = Html::parse_fragment(html);
    let selector = Selector::parse("table > caption").ok()?;
    fragment
        .select(&selector)
        .next()
        .map(|caption| normalize_cell_text(&caption.text().collect::<String>()))
        .filter(|text| !text.is_empty())
}

fn read_row(tr: ElementRef<'_>) -> Vec<SpanCell> {
    tr.children()
        .filter_map(ElementRef::wrap)
        .filter(|el| matches!(el.value().name(), "td" | "th"))
        .map(|cell| {
            let element = cell.value();
            SpanCell {
                text: Some(cell.text().collect::<String>()),
                rowspan: span_attr(element.attr("rowspan")),
                colspan: span_attr(element.attr("colspan")),
                header: element.name() == "th",
            }
        })
        .collect()
}

fn span_attr(raw: Option<&str>) -> usize {
    raw.and_then(|value| value.trim().parse::<usize>().ok())
        .unwrap_or(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_whitespace_runs() {
        assert_eq!(normalize_cell_text("  a \n\t b  "), "a b");
        assert_eq!(normalize_cell_text(" \n "), "");
    }

    #[test]
    fn span_attributes_default_to_one() {
        assert_eq!(span_attr(None), 1);
        assert_eq!(span_attr(Some("x")), 1);
        assert_eq!(span_attr(Some(" 3 ")), 3);
        assert_eq!(clamp_span(0), 1);
        assert_eq!(clamp_span(usize::MAX), MAX_SPAN);
    }

    #[test]
    fn reads_rows_from_sections() -> Result<()> {
        let rows = parse_html_table(
            "<table><thead><tr><th>a</th><th colspan='2'>b</th></tr></thead>\
             <tbody><tr><td rowspan=\"2\">c</td><td>d</td></tr></tbody></table>",
        )?;
        assert_eq!(rows.len(), 2);
        assert!(rows[0][0].header);
        assert_eq!(rows[0][1].colspan, 2);
        assert_eq!(rows[1][0].rowspan, 2);
        assert!(!rows[1][1].header);
        Ok(())
    }

    #[test]
    fn caption_is_read_from_table() {
        let caption = html_table_caption("<table><caption> Q1  sales </caption><tr><td>1</td></tr></table>");
        assert_eq!(caption.as_deref(), Some("Q1 sales"));
        assert_eq!(html_table_caption("<table></table>"), None);
    }
}
