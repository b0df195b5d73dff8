//! Result rendering.
//!
//! Query results are flat lists of rows (column name to value, in column
//! order). They are limited, then rendered as an aligned text table, CSV,
//! or a pretty-printed JSON array. Notices go to stderr; rendered rows go to
//! stdout.

use serde::Deserialize;
use serde_json::Value;

use crate::models::ResultRow;

/// Widest a table column may get.
pub const MAX_COLUMN_WIDTH: usize = 80;

/// Rows sampled when sizing table columns.
const WIDTH_SAMPLE_ROWS: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Table,
    Csv,
    Json,
}

/// Keep at most `limit` rows; the notice is set when rows were dropped.
pub fn apply_limit(rows: &[ResultRow], limit: usize) -> (&[ResultRow], Option<String>) {
    if rows.len() > limit {
        let notice = format!("Showing first {} of {} results", limit, rows.len());
        (&rows[..limit], Some(notice))
    } else {
        (rows, None)
    }
}

/// Render `rows` in `format`. Empty input renders as an empty string.
pub fn render(rows: &[ResultRow], format: OutputFormat) -> String {
    match format {
        OutputFormat::Table => render_table(rows),
        OutputFormat::Csv => render_csv(rows),
        OutputFormat::Json => render_json(rows),
    }
}

/// Limit, render, and print results.
pub fn print_results(rows: &[ResultRow], format: OutputFormat, limit: usize) {
    if rows.is_empty() {
        eprintln!("No results found");
        return;
    }

    let (shown, notice) = apply_limit(rows, limit);
    if let Some(notice) = notice {
        eprintln!("{}", notice);
    }
    print!("{}", render(shown, format));
}

pub fn render_json(rows: &[ResultRow]) -> String {
    let mut out = serde_json::to_string_pretty(rows).unwrap_or_else(|_| "[]".to_string());
    out.push('\n');
    out
}

/// RFC 4180 CSV with the header taken from the first row's columns.
pub fn render_csv(rows: &[ResultRow]) -> String {
    let Some(first) = rows.first() else {
        return String::new();
    };
    let headers: Vec<&String> = first.keys().collect();

    let mut out = String::new();
    push_csv_record(&mut out, headers.iter().map(|h| h.to_string()));
    for row in rows {
        push_csv_record(
            &mut out,
            headers
                .iter()
                .map(|h| row.get(h.as_str()).map(cell_text).unwrap_or_default()),
        );
    }
    out
}

fn push_csv_record(out: &mut String, fields: impl Iterator<Item = String>) {
    let mut first = true;
    for field in fields {
        if !first {
            out.push(',');
        }
        first = false;
        if field.contains([',', '"', '\r', '\n']) {
            out.push('"');
            out.push_str(&field.replace('"', "\"\""));
            out.push('"');
        } else {
            out.push_str(&field);
        }
    }
    out.push_str("\r\n");
}

/// Aligned table with ` | ` separators and a dashed rule under the header.
///
/// Column widths come from the header and the first ten rows, capped at
/// [`MAX_COLUMN_WIDTH`]; longer cells are cut to the column width.
pub fn render_table(rows: &[ResultRow]) -> String {
    let Some(first) = rows.first() else {
        return String::new();
    };
    let headers: Vec<&String> = first.keys().collect();

    let widths: Vec<usize> = headers
        .iter()
        .map(|h| {
            let widest = rows
                .iter()
                .take(WIDTH_SAMPLE_ROWS)
                .map(|row| cell(row, h).chars().count())
                .max()
                .unwrap_or(0);
            h.chars().count().max(widest).min(MAX_COLUMN_WIDTH)
        })
        .collect();

    let header_line = join_cells(headers.iter().map(|h| h.to_string()), &widths);
    let mut out = String::new();
    out.push_str(&header_line);
    out.push('\n');
    out.push_str(&"-".repeat(header_line.chars().count()));
    out.push('\n');

    for row in rows {
        out.push_str(&join_cells(headers.iter().map(|h| cell(row, h)), &widths));
        out.push('\n');
    }
    out
}

fn join_cells(cells: impl Iterator<Item = String>, widths: &[usize]) -> String {
    cells
        .zip(widths)
        .map(|(text, &width)| {
            let cut: String = text.chars().take(width).collect();
            let pad = width - cut.chars().count();
            format!("{}{}", cut, " ".repeat(pad))
        })
        .collect::<Vec<_>>()
        .join(" | ")
}

fn cell(row: &ResultRow, column: &str) -> String {
    row.get(column).map(cell_text).unwrap_or_default()
}

/// Display text for one value: strings unquoted, null empty, the rest as JSON.
fn cell_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
