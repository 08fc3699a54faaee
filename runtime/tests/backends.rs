use std::{
    fs::File,
    io::Write,
    path::{Path, PathBuf},
};

use anyhow::Result;
use tempfile::TempDir;
use zip::{ZipWriter, write::SimpleFileOptions};

use docnorm::{
    ChunkContent, Document, config::AppConfig, init_registry,
};

const PNG_BYTES: &[u8] = b"\x89PNG\r\n\x1a\nnot really an image";

fn write_package(path: &Path, parts: &[(&str, &[u8])]) -> Result<()> {
    let mut writer = ZipWriter::new(File::create(path)?);
    for (name, bytes) in parts {
        writer.start_file(*name, SimpleFileOptions::default())?;
        writer.write_all(bytes)?;
    }
    writer.finish()?;
    Ok(())
}

async fn parse(path: &Path) -> Result<Document> {
    let registry = init_registry(&AppConfig::default())?;
    let parser = registry
        .resolve_parser(path)
        .ok_or_else(|| anyhow::anyhow!("no parser for {}", path.display()))?;
    Ok(parser.parse(path).await)
}

fn text_of(document: &Document, index: usize) -> (&str, Option<u32>) {
    match &document.texts[index].content {
        ChunkContent::Text(text) => (text.text.as_str(), text.level),
        other => panic!("expected text, found {other:?}"),
    }
}

const DOCX_DOCUMENT: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<w:document xmlns:w="http://schemas.openxmlformats.org/wordprocessingml/2006/main"
    xmlns:r="http://schemas.openxmlformats.org/officeDocument/2006/relationships"
    xmlns:a="http://schemas.openxmlformats.org/drawingml/2006/main"
    xmlns:m="http://schemas.openxmlformats.org/officeDocument/2006/math">
<w:body>
<w:p><w:pPr><w:pStyle w:val="Title"/></w:pPr><w:r><w:t>Quarterly Review</w:t></w:r></w:p>
<w:p><w:pPr><w:pStyle w:val="Heading2"/></w:pPr><w:r><w:t>Summary</w:t></w:r></w:p>
<w:p><w:r><w:t>Revenue grew.</w:t></w:r></w:p>
<w:p></w:p>
<w:tbl>
  <w:tr><w:trPr><w:tblHeader/></w:trPr>
    <w:tc><w:p><w:r><w:t>Region</w:t></w:r></w:p></w:tc>
    <w:tc><w:p><w:r><w:t>Q1</w:t></w:r></w:p></w:tc>
    <w:tc><w:p><w:r><w:t>Q2</w:t></w:r></w:p></w:tc>
  </w:tr>
  <w:tr>
    <w:tc><w:tcPr><w:vMerge w:val="restart"/></w:tcPr><w:p><w:r><w:t>North</w:t></w:r></w:p></w:tc>
    <w:tc><w:tcPr><w:gridSpan w:val="2"/></w:tcPr><w:p><w:r><w:t>10</w:t></w:r></w:p></w:tc>
  </w:tr>
  <w:tr>
    <w:tc><w:tcPr><w:vMerge/></w:tcPr><w:p/></w:tc>
    <w:tc><w:p><w:r><w:t>11</w:t></w:r></w:p></w:tc>
    <w:tc><w:p><w:r><w:t>12</w:t></w:r></w:p></w:tc>
  </w:tr>
</w:tbl>
<w:p><w:pPr><w:pStyle w:val="Caption"/></w:pPr><w:r><w:t>Table 1: Sales</w:t></w:r></w:p>
<w:p><w:r><w:drawing><a:graphic><a:graphicData><a:blip r:embed="rIdImg"/></a:graphicData></a:graphic></w:drawing></w:r></w:p>
<w:p><w:r><w:drawing><a:blip r:embed="rIdMissing"/></w:drawing></w:r></w:p>
<w:p><m:oMathPara><m:oMath><m:r><m:t>x = 1</m:t></m:r></m:oMath></m:oMathPara></w:p>
</w:body>
</w:document>"#;

const DOCX_RELS: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships">
  <Relationship Id="rIdImg" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/image" Target="media/image1.png"/>
</Relationships>"#;

#[tokio::test]
async fn docx_package_is_normalized() -> Result<()> {
    let dir = TempDir::new()?;
    let path = dir.path().join("review.docx");
    write_package(
        &path,
        &[
            ("word/document.xml", DOCX_DOCUMENT.as_bytes()),
            ("word/_rels/document.xml.rels", DOCX_RELS.as_bytes()),
            ("word/media/image1.png", PNG_BYTES),
        ],
    )?;

    let document = parse(&path).await?;
    assert!(document.success, "{:?}", document.error_message);
    document.validate()?;

    assert_eq!(document.title.as_deref(), Some("Quarterly Review"));
    assert_eq!(document.texts.len(), 3);
    assert_eq!(text_of(&document, 0), ("Quarterly Review", Some(1)));
    assert_eq!(text_of(&document, 1), ("Summary", Some(2)));
    assert_eq!(text_of(&document, 2), ("Revenue grew.", None));

    assert_eq!(document.tables.len(), 1);
    let ChunkContent::Table(table) = &document.tables[0].content else {
        panic!("table chunk expected");
    };
    assert_eq!(
        table.grid,
        [["Region", "Q1", "Q2"], ["North", "10", "10"], ["North", "11", "12"]]
    );
    assert_eq!(table.column_headers, ["Region", "Q1", "Q2"]);
    assert_eq!(table.caption, ["Table 1: Sales"]);

    // the dangling relationship is skipped
    assert_eq!(document.images.len(), 1);
    let ChunkContent::Image(image) = &document.images[0].content else {
        panic!("image chunk expected");
    };
    assert!(image.uri.starts_with("data:image/png;base64,"));

    assert_eq!(document.formulas.len(), 1);
    let ChunkContent::Formula(formula) = &document.formulas[0].content else {
        panic!("formula chunk expected");
    };
    assert_eq!(formula.text, "x = 1");
    Ok(())
}

#[tokio::test]
async fn corrupt_docx_fails_cleanly() -> Result<()> {
    let dir = TempDir::new()?;
    let path = dir.path().join("empty.docx");
    write_package(&path, &[("word/other.xml", "<x/>".as_bytes())])?;

    let document = parse(&path).await?;
    assert!(!document.success);
    assert!(
        document
            .error_message
            .as_deref()
            .is_some_and(|message| message.contains("word/document.xml"))
    );
    assert_eq!(document.chunk_count(), 0);
    Ok(())
}

const WORKBOOK: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<workbook xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main"
    xmlns:r="http://schemas.openxmlformats.org/officeDocument/2006/relationships">
  <sheets><sheet name="Budget" sheetId="1" r:id="rId1"/></sheets>
</workbook>"#;

const WORKBOOK_RELS: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships">
  <Relationship Id="rId1" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/worksheet" Target="worksheets/sheet1.xml"/>
</Relationships>"#;

const SHEET: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<worksheet xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main">
  <sheetData>
    <row r="1"><c r="A1" t="inlineStr"><is><t>Budget</t></is></c></row>
    <row r="2"><c r="A2" t="inlineStr"><is><t>Item</t></is></c><c r="B2" t="inlineStr"><is><t>Cost</t></is></c></row>
    <row r="3"><c r="A3" t="inlineStr"><is><t>Paper</t></is></c><c r="B3"><v>12</v></c></row>
    <row r="4"><c r="A4" t="b"><v>1</v></c><c r="B4"><v>2.5</v></c></row>
  </sheetData>
  <mergeCells count="1"><mergeCell ref="A1:B1"/></mergeCells>
</worksheet>"#;

const CONTENT_TYPES: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Types xmlns="http://schemas.openxmlformats.org/package/2006/content-types">
  <Default Extension="rels" ContentType="application/vnd.openxmlformats-package.relationships+xml"/>
  <Default Extension="xml" ContentType="application/xml"/>
  <Override PartName="/xl/workbook.xml" ContentType="application/vnd.openxmlformats-officedocument.spreadsheetml.sheet.main+xml"/>
  <Override PartName="/xl/worksheets/sheet1.xml" ContentType="application/vnd.openxmlformats-officedocument.spreadsheetml.worksheet+xml"/>
</Types>"#;

fn write_workbook(dir: &TempDir) -> Result<PathBuf> {
    let path = dir.path().join("budget.xlsx");
    write_package(
        &path,
        &[
            ("[Content_Types].xml", CONTENT_TYPES.as_bytes()),
            ("xl/workbook.xml", WORKBOOK.as_bytes()),
            ("xl/_rels/workbook.xml.rels", WORKBOOK_RELS.as_bytes()),
            ("xl/worksheets/sheet1.xml", SHEET.as_bytes()),
        ],
    )?;
    Ok(path)
}

#[tokio::test]
async fn xlsx_merged_cells_are_expanded() -> Result<()> {
    let dir = TempDir::new()?;
    let path = write_workbook(&dir)?;

    let document = parse(&path).await?;
    assert!(document.success, "{:?}", document.error_message);
    document.validate()?;

    assert_eq!(document.title.as_deref(), Some("budget"));
    assert_eq!(text_of(&document, 0), ("Sheet 1: Budget", Some(2)));

    assert_eq!(document.tables.len(), 1);
    let ChunkContent::Table(table) = &document.tables[0].content else {
        panic!("table chunk expected");
    };
    assert_eq!((table.rows, table.columns), (4, 2));
    assert_eq!(
        table.grid,
        [
            ["Budget", "Budget"],
            ["Item", "Cost"],
            ["Paper", "12"],
            ["true", "2.5"]
        ]
    );
    assert_eq!(table.caption, ["Budget"]);
    // the merged title row doubles as column headers; the grid keeps it
    assert_eq!(table.column_headers, ["Budget", "Budget"]);
    assert!(table.row_headers.is_empty());
    assert!(document.images.is_empty());
    Ok(())
}

#[tokio::test]
async fn html_file_keeps_reading_order() -> Result<()> {
    let dir = TempDir::new()?;
    let path = dir.path().join("Guide.HTM");
    tokio::fs::write(
        &path,
        r#"<html><head><title>ignored</title></head><body>
        <h2>Setup</h2>
        <ol><li>Install</li><li>Configure <b>carefully</b></li></ol>
        <math><mi>y</mi><mo>=</mo><mn>2</mn></math>
        <table><tr><td rowspan="2">A</td><td>B</td></tr><tr><td>C</td></tr></table>
        <p>   </p>
        </body></html>"#,
    )
    .await?;

    let document = parse(&path).await?;
    assert!(document.success);
    document.validate()?;

    assert_eq!(document.title.as_deref(), Some("Guide"));
    let texts: Vec<_> = (0..document.texts.len()).map(|i| text_of(&document, i)).collect();
    assert_eq!(
        texts,
        [
            ("Setup", Some(2)),
            ("Install", None),
            ("Configure carefully", None)
        ]
    );

    let ChunkContent::Formula(formula) = &document.formulas[0].content else {
        panic!("formula chunk expected");
    };
    assert_eq!(formula.format.as_deref(), Some("mathml"));
    assert!(formula.text.starts_with("<math"));

    let ChunkContent::Table(table) = &document.tables[0].content else {
        panic!("table chunk expected");
    };
    assert_eq!(table.grid, [["A", "B"], ["A", "C"]]);
    Ok(())
}
