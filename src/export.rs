use regex::Regex;
use rust_xlsxwriter::{Color, Format, FormatAlign, FormatBorder, Workbook, Worksheet, XlsxError};
use serde::Deserialize;
use std::collections::HashMap;
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use tracing::info;

use crate::error::{Result, ReviewError};
use crate::types::ReviewDocument;

const FILE_HEADER: &str = "Файл";
const MAX_COLUMN_WIDTH: usize = 60;
const MAX_SHEET_NAME: usize = 31;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    Xlsx,
    Csv,
}

impl ExportFormat {
    pub fn extension(self) -> &'static str {
        match self {
            ExportFormat::Xlsx => "xlsx",
            ExportFormat::Csv => "csv",
        }
    }
}

/// Header plus one row per document.
#[derive(Debug, Clone, PartialEq)]
pub struct ExportTable {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

/// First column is the file name, then one column per distinct field name in
/// first-seen order. `export_keys` renames headers (field name -> export key).
/// When a document repeats a name (table rows) the last value is exported.
pub fn build_export_rows(
    documents: &[ReviewDocument],
    export_keys: &HashMap<String, String>,
) -> Result<ExportTable> {
    if documents.is_empty() {
        return Err(ReviewError::Export("No documents to export".to_string()));
    }

    let mut names: Vec<&str> = Vec::new();
    for doc in documents {
        for field in &doc.extracted_fields {
            if !field.name.is_empty() && !names.contains(&field.name.as_str()) {
                names.push(&field.name);
            }
        }
    }

    let mut headers = vec![FILE_HEADER.to_string()];
    headers.extend(
        names
            .iter()
            .map(|n| export_keys.get(*n).cloned().unwrap_or_else(|| n.to_string())),
    );

    let rows = documents
        .iter()
        .map(|doc| {
            let values: HashMap<&str, &str> = doc
                .extracted_fields
                .iter()
                .map(|f| (f.name.as_str(), f.value.as_str()))
                .collect();
            let mut row = vec![doc.filename.clone()];
            row.extend(
                names
                    .iter()
                    .map(|n| values.get(n).map(|v| v.to_string()).unwrap_or_default()),
            );
            row
        })
        .collect();

    Ok(ExportTable { headers, rows })
}

/// Drops control chars (except tab, newline, CR) that corrupt sheet XML.
fn sanitize_cell(s: &str) -> String {
    s.chars()
        .filter(|&c| {
            let u = c as u32;
            c == '\t' || c == '\n' || c == '\r' || !(u < 0x20 || u == 0x7F || u == 0xFFFE || u == 0xFFFF)
        })
        .collect()
}

/// Keeps letters, digits, dot, dash, underscore and space.
pub fn safe_name(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| if c.is_alphanumeric() || "._- ".contains(c) { c } else { '_' })
        .collect();
    let cleaned = cleaned.trim().to_string();
    if cleaned.is_empty() {
        "export".to_string()
    } else {
        cleaned
    }
}

fn sheet_name(name: &str) -> String {
    safe_name(name).chars().take(MAX_SHEET_NAME).collect()
}

/// Amounts like "1 234,56" or "99.90". Identifiers without decimals stay text.
fn amount_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^-?(?:\d{1,3}(?:[ \u{a0}]\d{3})+|\d+)[.,]\d{2}$").expect("static regex")
    })
}

fn parse_amount(value: &str) -> Option<f64> {
    let v = value.trim();
    if !amount_pattern().is_match(v) {
        return None;
    }
    v.replace([' ', '\u{a0}'], "").replace(',', ".").parse().ok()
}

fn column_widths(table: &ExportTable) -> Vec<f64> {
    (0..table.headers.len())
        .map(|col| {
            let longest = table
                .rows
                .iter()
                .filter_map(|r| r.get(col))
                .chain(std::iter::once(&table.headers[col]))
                .map(|s| s.chars().count())
                .max()
                .unwrap_or(0);
            (longest + 4).min(MAX_COLUMN_WIDTH) as f64
        })
        .collect()
}

fn write_cell(
    worksheet: &mut Worksheet,
    row: u32,
    col: u16,
    value: &str,
    text_format: &Format,
    amount_format: &Format,
) -> std::result::Result<(), XlsxError> {
    match parse_amount(value) {
        Some(n) => worksheet.write_number_with_format(row, col, n, amount_format).map(|_| ()),
        None => worksheet
            .write_string_with_format(row, col, sanitize_cell(value), text_format)
            .map(|_| ()),
    }
}

pub fn export_xlsx(table: &ExportTable, sheet: &str, path: &Path) -> Result<()> {
    let mut workbook = Workbook::new();
    let worksheet = workbook.add_worksheet();
    worksheet.set_name(sheet_name(sheet))?;

    let border = Color::RGB(0xDEE2E6);
    let header_format = Format::new()
        .set_bold()
        .set_font_color(Color::RGB(0xFFFFFF))
        .set_background_color(Color::RGB(0x107572))
        .set_align(FormatAlign::Center)
        .set_align(FormatAlign::VerticalCenter)
        .set_text_wrap()
        .set_border(FormatBorder::Thin)
        .set_border_color(border);
    let text = Format::new()
        .set_align(FormatAlign::VerticalCenter)
        .set_text_wrap()
        .set_border(FormatBorder::Thin)
        .set_border_color(border);
    let text_alt = text.clone().set_background_color(Color::RGB(0xF8F9FA));
    let amount = text.clone().set_num_format("#,##0.00").set_align(FormatAlign::Right);
    let amount_alt = amount.clone().set_background_color(Color::RGB(0xF8F9FA));

    for (col, width) in column_widths(table).into_iter().enumerate() {
        worksheet.set_column_width(col as u16, width)?;
    }

    for (col, header) in table.headers.iter().enumerate() {
        worksheet.write_string_with_format(0, col as u16, sanitize_cell(header), &header_format)?;
    }

    for (i, values) in table.rows.iter().enumerate() {
        let row = (i + 1) as u32;
        // Sheet row 2, 4, ... get the alternate fill.
        let (text_format, amount_format) = if i % 2 == 0 {
            (&text_alt, &amount_alt)
        } else {
            (&text, &amount)
        };
        for (col, value) in values.iter().enumerate() {
            write_cell(worksheet, row, col as u16, value, text_format, amount_format)?;
        }
    }

    worksheet.set_freeze_panes(1, 0)?;
    workbook.save(path)?;
    info!(path = %path.display(), rows = table.rows.len(), "xlsx export written");
    Ok(())
}

pub fn export_csv(table: &ExportTable, path: &Path) -> Result<()> {
    let mut file = File::create(path)?;
    // BOM so Excel detects UTF-8.
    file.write_all("\u{feff}".as_bytes())?;
    let mut writer = csv::Writer::from_writer(file);
    writer.write_record(&table.headers)?;
    for row in &table.rows {
        writer.write_record(row)?;
    }
    writer.flush()?;
    info!(path = %path.display(), rows = table.rows.len(), "csv export written");
    Ok(())
}

/// `<dir>/<name>_<timestamp>.<ext>`, adding `_2`, `_3`, ... while the file exists.
pub fn default_export_path(dir: &Path, name: &str, format: ExportFormat) -> PathBuf {
    let stamp = chrono::Local::now().format("%Y%m%d_%H%M%S").to_string();
    let base = safe_name(name);
    let ext = format.extension();
    let mut path = dir.join(format!("{}_{}.{}", base, stamp, ext));
    let mut counter = 2u32;
    while path.exists() {
        path = dir.join(format!("{}_{}_{}.{}", base, stamp, counter, ext));
        counter += 1;
    }
    path
}

/// Normalize a user-chosen path: forces the format's extension.
pub fn with_extension(path: &str, format: ExportFormat) -> PathBuf {
    let mut pb = PathBuf::from(path.trim());
    if pb.extension().and_then(|e| e.to_str()) != Some(format.extension()) {
        pb.set_extension(format.extension());
    }
    pb
}

/// Write `documents` in `format` to `path`.
pub fn export_documents(
    documents: &[ReviewDocument],
    export_keys: &HashMap<String, String>,
    sheet: &str,
    format: ExportFormat,
    path: &Path,
) -> Result<()> {
    let table = build_export_rows(documents, export_keys)?;
    match format {
        ExportFormat::Xlsx => export_xlsx(&table, sheet, path),
        ExportFormat::Csv => export_csv(&table, path),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ExtractedField;

    fn doc(filename: &str, fields: Vec<ExtractedField>) -> ReviewDocument {
        ReviewDocument {
            id: filename.to_string(),
            filename: filename.to_string(),
            mime_type: None,
            status: "reviewed".to_string(),
            raw_text: None,
            preview_image: None,
            extracted_fields: fields,
        }
    }

    fn documents() -> Vec<ReviewDocument> {
        vec![
            doc(
                "a.pdf",
                vec![ExtractedField::new("number", "A-1"), ExtractedField::new("total", "10.00")],
            ),
            doc(
                "b.png",
                vec![ExtractedField::new("total", "1 250,50"), ExtractedField::new("inn", "7701")],
            ),
        ]
    }

    #[test]
    fn rows_follow_first_seen_field_order() {
        let mut keys = HashMap::new();
        keys.insert("total".to_string(), "Sum".to_string());
        let table = build_export_rows(&documents(), &keys).unwrap();
        assert_eq!(table.headers, vec!["Файл", "number", "Sum", "inn"]);
        assert_eq!(table.rows[0], vec!["a.pdf", "A-1", "10.00", ""]);
        assert_eq!(table.rows[1], vec!["b.png", "", "1 250,50", "7701"]);
    }

    #[test]
    fn empty_document_list_is_rejected() {
        assert!(build_export_rows(&[], &HashMap::new()).is_err());
    }

    #[test]
    fn amounts_are_detected_but_identifiers_are_not() {
        assert_eq!(parse_amount("1 250,50"), Some(1250.5));
        assert_eq!(parse_amount("99.90"), Some(99.9));
        assert_eq!(parse_amount("7701234567"), None);
        assert_eq!(parse_amount("022024"), None);
        assert_eq!(parse_amount("12,5"), None);
    }

    #[test]
    fn names_are_made_safe() {
        assert_eq!(safe_name("Счёт/фактура: 2024"), "Счёт_фактура_ 2024");
        assert_eq!(safe_name("  "), "export");
        assert_eq!(sheet_name(&"x".repeat(40)).chars().count(), 31);
        assert_eq!(sanitize_cell("a\u{1}b\nc"), "ab\nc");
    }

    #[test]
    fn column_width_is_capped() {
        let table = ExportTable {
            headers: vec!["h".into(), "header".into()],
            rows: vec![vec!["y".repeat(100), "ab".into()]],
        };
        assert_eq!(column_widths(&table), vec![60.0, 10.0]);
    }

    #[test]
    fn writes_xlsx_and_csv() {
        let dir = tempfile::tempdir().unwrap();
        let xlsx = dir.path().join("out.xlsx");
        let csv_path = dir.path().join("out.csv");

        export_documents(&documents(), &HashMap::new(), "Invoices", ExportFormat::Xlsx, &xlsx).unwrap();
        export_documents(&documents(), &HashMap::new(), "Invoices", ExportFormat::Csv, &csv_path).unwrap();

        let zip_magic = std::fs::read(&xlsx).unwrap();
        assert_eq!(&zip_magic[..2], b"PK");

        let csv_text = std::fs::read_to_string(&csv_path).unwrap();
        assert!(csv_text.starts_with('\u{feff}'));
        let mut lines = csv_text.trim_start_matches('\u{feff}').lines();
        assert_eq!(lines.next(), Some("Файл,number,total,inn"));
        assert_eq!(lines.next(), Some("a.pdf,A-1,10.00,"));
    }

    #[test]
    fn default_path_avoids_collisions() {
        let dir = tempfile::tempdir().unwrap();
        let first = default_export_path(dir.path(), "Invoices", ExportFormat::Csv);
        std::fs::write(&first, b"x").unwrap();
        let second = default_export_path(dir.path(), "Invoices", ExportFormat::Csv);
        assert_ne!(first, second);
        assert_eq!(second.extension().unwrap(), "csv");
    }

    #[test]
    fn chosen_path_gets_extension() {
        assert_eq!(with_extension("report", ExportFormat::Xlsx), PathBuf::from("report.xlsx"));
        assert_eq!(with_extension("r.xlsx", ExportFormat::Xlsx), PathBuf::from("r.xlsx"));
    }
}
