//! Transaction loading using Polars
//!
//! Every column is read as text and parsed here, so the record types never
//! depend on Polars' schema inference (customer ids with gaps would
//! otherwise come back as floats).

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime};
use polars::prelude::*;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{CltvError, CltvResult};

/// One invoice line as read from the input table
#[derive(Debug, Clone, PartialEq)]
pub struct RawTransaction {
    pub invoice: Option<String>,
    pub stock_code: Option<String>,
    pub description: Option<String>,
    pub quantity: Option<i64>,
    pub invoice_date: Option<NaiveDateTime>,
    pub price: Option<f64>,
    pub customer_id: Option<String>,
    pub country: Option<String>,
}

/// Canonical column names and the normalized header spellings accepted for each
const COLUMN_ALIASES: [(&str, &[&str]); 8] = [
    ("invoice", &["invoice", "invoiceno", "invoiceid"]),
    ("stock_code", &["stockcode"]),
    ("description", &["description"]),
    ("quantity", &["quantity"]),
    ("invoice_date", &["invoicedate", "invoicetimestamp"]),
    ("price", &["price", "unitprice"]),
    ("customer_id", &["customerid"]),
    ("country", &["country"]),
];

const TIMESTAMP_FORMATS: [&str; 5] = [
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M",
    "%m/%d/%Y %H:%M",
    "%m/%d/%Y %H:%M:%S",
];

/// Load raw transactions from a CSV file.
///
/// # Arguments
/// * `path` - CSV file, or a directory holding one CSV per table
/// * `sheet` - Table name to pick from a directory (`<dir>/<sheet>.csv`)
///
/// # Returns
/// * All rows in file order. A header-only or zero-byte file yields an empty vector.
pub fn load_transactions<P: AsRef<Path>>(
    path: P,
    sheet: Option<&str>,
) -> CltvResult<Vec<RawTransaction>> {
    let file_path = resolve_table_path(path.as_ref(), sheet)?;

    let metadata = fs::metadata(&file_path)
        .map_err(|e| CltvError::file_access(file_path.display().to_string(), e))?;
    if metadata.len() == 0 {
        log::warn!("Input {} is empty", file_path.display());
        return Ok(Vec::new());
    }

    let df = read_csv_as_text(&file_path)?;
    log::info!(
        "Read {} rows x {} columns from {}",
        df.height(),
        df.width(),
        file_path.display()
    );

    let columns = map_columns(&df)?;
    extract_transactions(&df, &columns)
}

fn resolve_table_path(path: &Path, sheet: Option<&str>) -> CltvResult<PathBuf> {
    if !path.exists() {
        return Err(CltvError::file_access(
            path.display().to_string(),
            "file not found",
        ));
    }

    if path.is_dir() {
        let sheet = sheet.ok_or_else(|| {
            CltvError::file_access(
                path.display().to_string(),
                "directory input requires a sheet name",
            )
        })?;
        let table = path.join(format!("{}.csv", sheet));
        if !table.is_file() {
            return Err(CltvError::file_access(
                table.display().to_string(),
                format!("sheet '{}' not found", sheet),
            ));
        }
        return Ok(table);
    }

    if let Some(sheet) = sheet {
        log::debug!("Ignoring sheet '{}' for single-file input", sheet);
    }
    Ok(path.to_path_buf())
}

fn read_csv_as_text(path: &Path) -> CltvResult<DataFrame> {
    CsvReadOptions::default()
        .with_has_header(true)
        .with_infer_schema_length(Some(0))
        .try_into_reader_with_file_path(Some(path.to_path_buf()))
        .map_err(|e| CltvError::file_access(path.display().to_string(), e))?
        .finish()
        .map_err(|e| CltvError::file_access(path.display().to_string(), e))
}

/// Lower-case a header and strip everything but letters and digits
fn normalize_column_name(name: &str) -> String {
    name.chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .map(|c| c.to_ascii_lowercase())
        .collect()
}

/// Map each canonical column to the header actually present in the file
fn map_columns(df: &DataFrame) -> CltvResult<HashMap<&'static str, String>> {
    let present: HashMap<String, String> = df
        .get_column_names()
        .iter()
        .map(|name| (normalize_column_name(&name.to_string()), name.to_string()))
        .collect();

    let mut mapping = HashMap::new();
    for (canonical, aliases) in COLUMN_ALIASES {
        let actual = aliases
            .iter()
            .find_map(|alias| present.get(*alias))
            .ok_or_else(|| CltvError::schema(canonical))?;
        mapping.insert(canonical, actual.clone());
    }
    Ok(mapping)
}

fn text_column<'a>(
    df: &'a DataFrame,
    columns: &HashMap<&'static str, String>,
    canonical: &'static str,
) -> CltvResult<Vec<Option<&'a str>>> {
    let name = columns
        .get(canonical)
        .ok_or_else(|| CltvError::schema(canonical))?;
    let values = df.column(name)?.str()?;
    Ok(values
        .into_iter()
        .map(|v| v.map(str::trim).filter(|v| !v.is_empty()))
        .collect())
}

fn extract_transactions(
    df: &DataFrame,
    columns: &HashMap<&'static str, String>,
) -> CltvResult<Vec<RawTransaction>> {
    let invoices = text_column(df, columns, "invoice")?;
    let stock_codes = text_column(df, columns, "stock_code")?;
    let descriptions = text_column(df, columns, "description")?;
    let quantities = text_column(df, columns, "quantity")?;
    let dates = text_column(df, columns, "invoice_date")?;
    let prices = text_column(df, columns, "price")?;
    let customers = text_column(df, columns, "customer_id")?;
    let countries = text_column(df, columns, "country")?;

    let mut rows = Vec::with_capacity(df.height());
    for i in 0..df.height() {
        // Line number in the file, counting the header as line 1
        let line = i + 2;

        let quantity = quantities[i]
            .map(|v| parse_quantity(v).ok_or_else(|| format_error(line, "quantity", v)))
            .transpose()?;
        let price = prices[i]
            .map(|v| v.parse::<f64>().map_err(|_| format_error(line, "price", v)))
            .transpose()?;
        let invoice_date = dates[i]
            .map(|v| parse_timestamp(v).ok_or_else(|| format_error(line, "invoice_date", v)))
            .transpose()?;

        rows.push(RawTransaction {
            invoice: invoices[i].map(str::to_string),
            stock_code: stock_codes[i].map(str::to_string),
            description: descriptions[i].map(str::to_string),
            quantity,
            invoice_date,
            price,
            customer_id: customers[i].map(normalize_customer_id),
            country: countries[i].map(str::to_string),
        });
    }

    Ok(rows)
}

fn format_error(line: usize, column: &str, value: &str) -> CltvError {
    CltvError::Format {
        row: line,
        column: column.to_string(),
        value: value.to_string(),
    }
}

/// Accepts integral values, including spreadsheet exports such as `6.0`
fn parse_quantity(value: &str) -> Option<i64> {
    if let Ok(q) = value.parse::<i64>() {
        return Some(q);
    }
    let q = value.parse::<f64>().ok()?;
    if q.is_finite() && q.fract() == 0.0 {
        Some(q as i64)
    } else {
        None
    }
}

/// Numeric ids exported through a float column come back as `17850.0`
fn normalize_customer_id(value: &str) -> String {
    match value.strip_suffix(".0") {
        Some(stem) if !stem.is_empty() && stem.chars().all(|c| c.is_ascii_digit()) => {
            stem.to_string()
        }
        _ => value.to_string(),
    }
}

/// Parse an invoice timestamp in any of the formats seen in retail exports
pub fn parse_timestamp(value: &str) -> Option<NaiveDateTime> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Some(dt.naive_utc());
    }
    for format in TIMESTAMP_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(value, format) {
            return Some(dt);
        }
    }
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .ok()
        .map(|d| d.and_time(NaiveTime::MIN))
}
