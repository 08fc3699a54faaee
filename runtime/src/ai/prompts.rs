use crate::model::{FormulaContent, ImageContent, TableContent};

pub const SYSTEM_PROMPT: &str = "You describe parts of business documents for a search index. \
Answer with a short factual description in plain prose. Do not invent values.";

/// Renders a table grid as a Markdown pipe table. The first row is the header.
pub fn render_markdown_table(table: &TableContent) -> String {
    if table.grid.is_empty() {
        return String::new();
    }

    let escape = |cell: &str| cell.replace('|', "\\|").replace('\n', " ");
    let mut out = String::new();
    for (idx, row) in table.grid.iter().enumerate() {
        let cells: Vec<String> = row.iter().map(|cell| escape(cell)).collect();
        out.push_str("| ");
        out.push_str(&cells.join(" | "));
        out.push_str(" |\n");
        if idx == 0 {
            out.push('|');
            out.push_str(&" --- |".repeat(table.columns.max(1)));
            out.push('\n');
        }
    }
    out
}

pub fn table_prompt(table: &TableContent) -> String {
    let mut prompt = String::from("Describe what the following table contains.\n");
    if !table.caption.is_empty() {
        prompt.push_str(&format!("Caption: {}\n", table.caption.join(" ")));
    }
    prompt.push('\n');
    prompt.push_str(&render_markdown_table(table));
    if !table.footnote.is_empty() {
        prompt.push_str(&format!("\nNotes: {}\n", table.footnote.join(" ")));
    }
    prompt
}

pub fn formula_prompt(formula: &FormulaContent) -> String {
    let notation = formula.format.as_deref().unwrap_or("plain text");
    format!(
        "Explain in one or two sentences what this formula ({notation}) expresses:\n\n{}",
        formula.text
    )
}

pub fn image_prompt(image: &ImageContent) -> String {
    let mut prompt = String::from("Describe this image from a document.");
    if !image.caption.is_empty() {
        prompt.push_str(&format!(" Its caption reads: {}.", image.caption.join(" ")));
    }
    prompt
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn markdown_table_has_separator_after_first_row() {
        let table = TableContent {
            rows: 2,
            columns: 2,
            grid: vec![
                vec!["Name".into(), "Qty".into()],
                vec!["a|b".into(), "3".into()],
            ],
            ..Default::default()
        };
        assert_eq!(
            render_markdown_table(&table),
            "| Name | Qty |\n| --- | --- |\n| a\\|b | 3 |\n"
        );
    }
}
