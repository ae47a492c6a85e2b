//! Column type inference over a bounded sample of an uploaded file.
//!
//! CSV columns are typed by voting over the first few data rows; JSON columns
//! take the runtime shape of the first element's values. The same pass counts
//! rows and decodes a small preview sample.

use crate::models::{
    preview::{MAX_PREVIEW_ROWS, PreviewRow},
    schema::{ColumnSchema, ColumnType},
    upload::ContentKind,
};
use chrono::{DateTime, NaiveDate, NaiveDateTime};
use serde_json::{Map, Number, Value};
use std::collections::HashSet;
use thiserror::Error;

/// Number of CSV data rows used to vote on column types.
pub const DEFAULT_SAMPLE_ROWS: usize = 20;

const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";

const DATE_FORMATS: &[&str] = &[
    "%Y-%m-%d",
    "%Y/%m/%d",
    "%m/%d/%Y",
    "%d.%m.%Y",
    "%b %d, %Y",
    "%d %b %Y",
];
const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M",
    "%m/%d/%Y %H:%M:%S",
    "%m/%d/%Y %H:%M",
];

#[derive(Debug, Error)]
pub enum InferenceError {
    #[error("schema inference is not supported for {0:?} files")]
    Unsupported(ContentKind),
    #[error("could not parse file: {0}")]
    Malformed(String),
}

impl From<csv::Error> for InferenceError {
    fn from(err: csv::Error) -> Self {
        InferenceError::Malformed(err.to_string())
    }
}

impl From<serde_json::Error> for InferenceError {
    fn from(err: serde_json::Error) -> Self {
        InferenceError::Malformed(err.to_string())
    }
}

/// Schema, row count, and preview rows decoded from one file.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Inference {
    pub schema: ColumnSchema,
    pub row_count: u64,
    pub preview_rows: Vec<PreviewRow>,
}

#[derive(Debug, Clone, Copy)]
pub struct SchemaInferencer {
    pub sample_rows: usize,
    pub preview_rows: usize,
}

impl Default for SchemaInferencer {
    fn default() -> Self {
        Self {
            sample_rows: DEFAULT_SAMPLE_ROWS,
            preview_rows: MAX_PREVIEW_ROWS,
        }
    }
}

impl SchemaInferencer {
    pub fn infer(&self, kind: ContentKind, bytes: &[u8]) -> Result<Inference, InferenceError> {
        let bytes = bytes.strip_prefix(UTF8_BOM).unwrap_or(bytes);
        match kind {
            ContentKind::Csv => self.infer_csv(bytes),
            ContentKind::Json => self.infer_json(bytes),
            ContentKind::Spreadsheet => Err(InferenceError::Unsupported(kind)),
        }
    }

    fn infer_csv(&self, bytes: &[u8]) -> Result<Inference, InferenceError> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .from_reader(bytes);

        let headers = unique_headers(reader.headers()?.iter());
        if headers.is_empty() {
            return Ok(Inference::default());
        }

        let keep = self.sample_rows.max(self.preview_rows);
        let mut kept: Vec<csv::StringRecord> = Vec::with_capacity(keep);
        let mut row_count: u64 = 0;
        for record in reader.records() {
            let record = record?;
            if record.iter().all(|field| field.trim().is_empty()) {
                continue;
            }
            row_count += 1;
            if kept.len() < keep {
                kept.push(record);
            }
        }

        let sample = &kept[..kept.len().min(self.sample_rows)];
        let schema: ColumnSchema = headers
            .iter()
            .enumerate()
            .map(|(idx, name)| {
                let values = sample
                    .iter()
                    .filter_map(|record| record.get(idx))
                    .map(str::trim)
                    .filter(|value| !value.is_empty());
                (name.clone(), vote_column_type(values))
            })
            .collect();

        let preview_rows = kept
            .iter()
            .take(self.preview_rows)
            .map(|record| {
                headers
                    .iter()
                    .enumerate()
                    .map(|(idx, name)| {
                        let raw = record.get(idx).unwrap_or_default();
                        let ty = schema.get(name).unwrap_or(ColumnType::String);
                        (name.clone(), typed_cell(raw, ty))
                    })
                    .collect::<Map<_, _>>()
            })
            .collect();

        Ok(Inference {
            schema,
            row_count,
            preview_rows,
        })
    }

    fn infer_json(&self, bytes: &[u8]) -> Result<Inference, InferenceError> {
        let elements = match serde_json::from_slice::<Value>(bytes)? {
            Value::Array(items) => items,
            single @ Value::Object(_) => vec![single],
            other => {
                return Err(InferenceError::Malformed(format!(
                    "expected an object or an array of objects, found {}",
                    json_kind(&other)
                )));
            }
        };

        let schema: ColumnSchema = match elements.first() {
            Some(Value::Object(first)) => first
                .iter()
                .map(|(key, value)| (key.clone(), json_value_type(value)))
                .collect(),
            Some(other) => {
                return Err(InferenceError::Malformed(format!(
                    "expected array elements to be objects, found {}",
                    json_kind(other)
                )));
            }
            None => ColumnSchema::new(),
        };

        let row_count = elements.len() as u64;
        let preview_rows = elements
            .into_iter()
            .take(self.preview_rows)
            .map(|element| match element {
                Value::Object(map) => map,
                other => {
                    let mut wrapped = Map::new();
                    wrapped.insert("value".to_string(), other);
                    wrapped
                }
            })
            .collect();

        Ok(Inference {
            schema,
            row_count,
            preview_rows,
        })
    }
}

/// Blank header cells become `column_N`; repeated names get a numeric suffix.
fn unique_headers<'a>(raw: impl Iterator<Item = &'a str>) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut headers = Vec::new();
    for (idx, name) in raw.enumerate() {
        let base = match name.trim() {
            "" => format!("column_{}", idx + 1),
            trimmed => trimmed.to_string(),
        };
        let mut candidate = base.clone();
        let mut suffix = 2;
        while !seen.insert(candidate.clone()) {
            candidate = format!("{}_{}", base, suffix);
            suffix += 1;
        }
        headers.push(candidate);
    }
    headers
}

/// Priority: number, boolean, date, string. A column with no non-empty
/// samples stays `Unknown`.
fn vote_column_type<'a>(values: impl Iterator<Item = &'a str> + Clone) -> ColumnType {
    if values.clone().next().is_none() {
        return ColumnType::Unknown;
    }
    if values.clone().all(is_number) {
        ColumnType::Number
    } else if values.clone().all(|v| v == "true" || v == "false") {
        ColumnType::Boolean
    } else if values.clone().all(is_date) {
        ColumnType::Date
    } else {
        ColumnType::String
    }
}

fn is_number(value: &str) -> bool {
    // f64::from_str also accepts "inf" and "NaN".
    value
        .chars()
        .all(|c| c.is_ascii_digit() || matches!(c, '-' | '+' | '.' | 'e' | 'E'))
        && value.parse::<f64>().is_ok_and(f64::is_finite)
}

fn is_date(value: &str) -> bool {
    DateTime::parse_from_rfc3339(value).is_ok()
        || DATE_FORMATS
            .iter()
            .any(|fmt| NaiveDate::parse_from_str(value, fmt).is_ok())
        || DATETIME_FORMATS
            .iter()
            .any(|fmt| NaiveDateTime::parse_from_str(value, fmt).is_ok())
}

/// `YYYY-MM-DD` at the start of the string.
fn has_iso_date_prefix(value: &str) -> bool {
    let bytes = value.as_bytes();
    bytes.len() >= 10
        && bytes[..4].iter().all(u8::is_ascii_digit)
        && bytes[4] == b'-'
        && bytes[5..7].iter().all(u8::is_ascii_digit)
        && bytes[7] == b'-'
        && bytes[8..10].iter().all(u8::is_ascii_digit)
}

fn json_value_type(value: &Value) -> ColumnType {
    match value {
        Value::Number(_) => ColumnType::Number,
        Value::Bool(_) => ColumnType::Boolean,
        Value::String(s) if has_iso_date_prefix(s) => ColumnType::Date,
        Value::String(_) => ColumnType::String,
        Value::Object(_) | Value::Array(_) => ColumnType::Object,
        Value::Null => ColumnType::Unknown,
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// Decode one CSV cell according to its column type, falling back to the raw
/// string when the cell disagrees with the column.
fn typed_cell(raw: &str, ty: ColumnType) -> Value {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Value::Null;
    }
    match ty {
        ColumnType::Number => trimmed
            .parse::<i64>()
            .map(Value::from)
            .ok()
            .or_else(|| {
                trimmed
                    .parse::<f64>()
                    .ok()
                    .and_then(Number::from_f64)
                    .map(Value::Number)
            })
            .unwrap_or_else(|| Value::String(raw.to_string())),
        ColumnType::Boolean => match trimmed {
            "true" => Value::Bool(true),
            "false" => Value::Bool(false),
            _ => Value::String(raw.to_string()),
        },
        _ => Value::String(raw.to_string()),
    }
}
