//! Record parsing
//!
//! Turns raw response bodies into ordered, loosely typed records: JSON arrays
//! into any `Deserialize` type, CSV (header row first) into [`CsvRecord`]s.

use chrono::NaiveDate;
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::sync::Arc;

use crate::error::Result;

/// Date format used throughout the DfE exports: day/month/year.
pub const SIMPLE_DATE_FORMAT: &str = "%d/%m/%Y";

const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";

/// Decode a JSON array body.
pub fn parse_json_array<T: DeserializeOwned>(body: &[u8]) -> Result<Vec<T>> {
    Ok(serde_json::from_slice(body)?)
}

/// First element of a list, or the type's default when the list is empty.
///
/// Linked-data APIs wrap single values in arrays; an empty array means "no
/// value", never a decode failure.
pub fn first_or_default<T: Clone + Default>(list: &[T]) -> T {
    list.first().cloned().unwrap_or_default()
}

/// Parse a `DD/MM/YYYY` date; blank or malformed input yields `None`.
pub fn parse_simple_date(value: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(value.trim(), SIMPLE_DATE_FORMAT).ok()
}

/// One CSV data row, addressed by header name.
#[derive(Debug, Clone)]
pub struct CsvRecord {
    columns: Arc<HashMap<String, usize>>,
    values: Vec<String>,
}

impl CsvRecord {
    /// Raw cell value; missing columns read as an empty string.
    pub fn get(&self, column: &str) -> &str {
        self.columns
            .get(column)
            .and_then(|&index| self.values.get(index))
            .map(String::as_str)
            .unwrap_or("")
    }

    pub fn int(&self, column: &str) -> Option<i64> {
        self.get(column).trim().parse().ok()
    }

    /// Numeric cell, tolerating a trailing `%`. Suppression markers such as
    /// `SUPP` or `NE` read as `None`.
    pub fn float(&self, column: &str) -> Option<f64> {
        self.get(column)
            .trim()
            .trim_end_matches('%')
            .parse::<f64>()
            .ok()
            .filter(|value| value.is_finite())
    }

    pub fn date(&self, column: &str) -> Option<NaiveDate> {
        parse_simple_date(self.get(column))
    }
}

/// Decode a CSV body whose first row is the header.
///
/// The header row is never returned as data, and an empty body yields no
/// records. Rows whose field count differs from the header are rejected.
/// Cells that are not valid UTF-8 (older government exports are often
/// Windows-1252) are decoded lossily.
pub fn parse_csv(body: &[u8]) -> Result<Vec<CsvRecord>> {
    let body = body.strip_prefix(UTF8_BOM).unwrap_or(body);
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .from_reader(body);

    let columns: HashMap<String, usize> = reader
        .byte_headers()?
        .iter()
        .enumerate()
        .map(|(index, name)| (String::from_utf8_lossy(name).trim().to_string(), index))
        .collect();

    if columns.is_empty() {
        return Ok(Vec::new());
    }
    let columns = Arc::new(columns);

    let mut records = Vec::new();
    for row in reader.byte_records() {
        let row = row?;
        records.push(CsvRecord {
            columns: Arc::clone(&columns),
            values: row
                .iter()
                .map(|cell| String::from_utf8_lossy(cell).into_owned())
                .collect(),
        });
    }

    Ok(records)
}
