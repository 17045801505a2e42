//! Text, CSV and JSON renderings of a finished result for the console.
//! NULL cells print as `NULL` in tables, as empty fields in CSV and as
//! `null` in JSON.

use std::borrow::Cow;
use std::cmp::max;

use serde_json::{json, Map, Value};

use crate::model::QueryResult;

#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    Table,
    Csv,
    Json,
}

pub fn render(result: &QueryResult, format: OutputFormat) -> String {
    match format {
        OutputFormat::Table => format_as_table(result),
        OutputFormat::Csv => export_csv(result),
        OutputFormat::Json => {
            serde_json::to_string_pretty(&rows_to_json(result)).unwrap_or_else(|_| "[]".to_owned())
        }
    }
}

fn cell_text(v: &Value) -> Cow<'_, str> {
    match v {
        Value::Null => Cow::Borrowed("NULL"),
        Value::String(s) => Cow::Borrowed(s),
        other => Cow::Owned(other.to_string()),
    }
}

pub fn format_as_table(result: &QueryResult) -> String {
    let headers: Vec<&str> = result.columns.iter().map(|c| c.name.as_str()).collect();

    // Calculate column widths
    let mut widths: Vec<usize> = headers.iter().map(|h| h.chars().count()).collect();
    for row in &result.rows {
        for (i, cell) in row.iter().enumerate() {
            if i < widths.len() {
                widths[i] = max(widths[i], cell_text(cell).chars().count());
            }
        }
    }

    let mut output = String::new();

    // Header
    for (i, header) in headers.iter().enumerate() {
        if i > 0 { output.push_str(" | "); }
        output.push_str(&format!("{:<width$}", header, width = widths[i]));
    }
    output.push('\n');

    // Separator
    for (i, &width) in widths.iter().enumerate() {
        if i > 0 { output.push_str("-+-"); }
        output.push_str(&"-".repeat(width));
    }
    output.push('\n');

    // Rows
    for row in &result.rows {
        for (i, cell) in row.iter().enumerate().take(widths.len()) {
            if i > 0 { output.push_str(" | "); }
            output.push_str(&format!("{:<width$}", cell_text(cell), width = widths[i]));
        }
        output.push('\n');
    }

    output
}

/// RFC-4180 CSV escaping
pub fn escape_csv(field: &str) -> String {
    let needs_quotes = field.contains(',') || field.contains('"')
        || field.contains('\n') || field.contains('\r');
    if needs_quotes {
        let escaped = field.replace('"', "\"\"");
        format!("\"{escaped}\"")
    } else {
        field.to_owned()
    }
}

/// Whole result as CSV, header line first.
pub fn export_csv(result: &QueryResult) -> String {
    let mut csv_lines = Vec::with_capacity(result.rows.len() + 1);

    csv_lines.push(
        result.columns.iter()
            .map(|c| escape_csv(&c.name))
            .collect::<Vec<_>>()
            .join(","),
    );

    for row in &result.rows {
        csv_lines.push(
            row.iter()
                .map(|v| match v {
                    Value::Null => String::new(),
                    other => escape_csv(&cell_text(other)),
                })
                .collect::<Vec<_>>()
                .join(","),
        );
    }

    csv_lines.join("\r\n")
}

/// Rows as JSON objects keyed by column name.
pub fn rows_to_json(result: &QueryResult) -> Value {
    let rows: Vec<Value> = result
        .rows
        .iter()
        .map(|row| {
            let mut obj = Map::new();
            for (i, col) in result.columns.iter().enumerate() {
                obj.insert(col.name.clone(), row.get(i).cloned().unwrap_or(Value::Null));
            }
            Value::Object(obj)
        })
        .collect();
    json!(rows)
}

/// One-line footer: row count, server time and read volume.
pub fn summary_line(result: &QueryResult) -> String {
    let stats = &result.statistics;
    let mut line = format!(
        "{} row{} in {:.3}s (read {} rows, {} bytes)",
        result.row_count,
        if result.row_count == 1 { "" } else { "s" },
        stats.elapsed,
        stats.rows_read,
        stats.bytes_read,
    );
    if result.limit_reached {
        line.push_str(" [limit reached]");
    }
    line
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Column, QueryStatistics};

    fn sample() -> QueryResult {
        QueryResult {
            columns: vec![Column::new("id", "UInt8"), Column::new("name", "Nullable(String)")],
            rows: vec![vec![json!(1), json!("a, \"b\"")], vec![json!(22), Value::Null]],
            row_count: 2,
            statistics: QueryStatistics { elapsed: 0.0125, rows_read: 2, bytes_read: 16, memory_usage: None },
            limit_reached: false,
        }
    }

    #[test]
    fn table_layout() {
        let text = format_as_table(&sample());
        assert_eq!(
            text,
            "id | name  \n---+-------\n1  | a, \"b\"\n22 | NULL  \n"
        );
    }

    #[test]
    fn csv_escapes_and_blanks_nulls() {
        assert_eq!(export_csv(&sample()), "id,name\r\n1,\"a, \"\"b\"\"\"\r\n22,");
    }

    #[test]
    fn json_objects_keep_nulls() {
        assert_eq!(
            rows_to_json(&sample()),
            json!([{ "id": 1, "name": "a, \"b\"" }, { "id": 22, "name": null }])
        );
    }

    #[test]
    fn summary_mentions_limit() {
        let mut r = sample();
        assert_eq!(summary_line(&r), "2 rows in 0.013s (read 2 rows, 16 bytes)");
        r.limit_reached = true;
        assert!(summary_line(&r).ends_with("[limit reached]"));
    }
}
