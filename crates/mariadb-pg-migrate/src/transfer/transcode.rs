//! Row transcoding into COPY text fields.
//!
//! A [`RowTranscoder`] is built once per load unit. It classifies every
//! column up front and then turns each [`SourceRow`] into a [`WireRecord`]
//! whose fields are already escaped for COPY text format. Values that
//! cannot be converted become NULL and are tallied per column; a bad value
//! never fails the row.

use std::collections::BTreeMap;

use tracing::debug;

use crate::core::report::Defect;
use crate::core::schema::{Column, Table};
use crate::core::value::{SourceRow, SourceValue};

/// Prefix of the sentinel zero date.
const ZERO_DATE: &str = "0000-00-00";

/// How values of a column are converted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueClass {
    /// Narrow flag mapped to boolean.
    Flag,
    /// Calendar date or timestamp; subject to zero-date suppression.
    Temporal,
    /// Bytes written as escaped bytea hex.
    Binary,
    /// Character data with COPY escaping.
    Text,
    /// Numbers and other values whose text form needs no escaping.
    Plain,
}

impl ValueClass {
    /// Classify a column by its mapped sink type.
    pub fn for_column(column: &Column) -> Self {
        if column.is_flag() {
            return ValueClass::Flag;
        }
        if column.is_temporal() {
            return ValueClass::Temporal;
        }
        let sink = column.sink_type.as_str();
        if sink == "bytea" {
            ValueClass::Binary
        } else if sink == "text"
            || sink == "jsonb"
            || sink == "time"
            || sink.starts_with("varchar")
        {
            ValueClass::Text
        } else {
            ValueClass::Plain
        }
    }
}

/// One transcoded row: a COPY-ready field per column, `None` for NULL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WireRecord {
    pub fields: Vec<Option<String>>,
}

impl WireRecord {
    /// Append this record as one COPY text line.
    pub fn write_line(&self, out: &mut String) {
        for (i, field) in self.fields.iter().enumerate() {
            if i > 0 {
                out.push('\t');
            }
            match field {
                Some(value) => out.push_str(value),
                None => out.push_str("\\N"),
            }
        }
        out.push('\n');
    }
}

#[derive(Debug, Default)]
struct Tally {
    count: u64,
    sample: String,
}

/// Converts source rows of one table into wire records.
#[derive(Debug)]
pub struct RowTranscoder {
    columns: Vec<(String, ValueClass)>,
    tallies: BTreeMap<usize, Tally>,
}

impl RowTranscoder {
    pub fn new(table: &Table) -> Self {
        Self::for_columns(&table.columns)
    }

    pub fn for_columns(columns: &[Column]) -> Self {
        Self {
            columns: columns
                .iter()
                .map(|c| (c.name.clone(), ValueClass::for_column(c)))
                .collect(),
            tallies: BTreeMap::new(),
        }
    }

    /// Transcode one row.
    ///
    /// Missing trailing values are treated as NULL so the record always
    /// has one field per column.
    pub fn transcode(&mut self, row: &SourceRow) -> WireRecord {
        let mut fields = Vec::with_capacity(self.columns.len());
        for ordinal in 0..self.columns.len() {
            let class = self.columns[ordinal].1;
            let value = row.get(ordinal).unwrap_or(&SourceValue::Null);
            let field = match convert(class, value) {
                Ok(field) => field,
                Err(reason) => {
                    self.record_failure(ordinal, reason);
                    None
                }
            };
            fields.push(field);
        }
        WireRecord { fields }
    }

    fn record_failure(&mut self, ordinal: usize, reason: String) {
        debug!(
            "Column {}: value replaced by NULL: {}",
            self.columns[ordinal].0, reason
        );
        let tally = self.tallies.entry(ordinal).or_default();
        if tally.count == 0 {
            tally.sample = reason;
        }
        tally.count += 1;
    }

    /// Drain the per-column tallies into defects, in column order.
    pub fn take_defects(&mut self) -> Vec<Defect> {
        std::mem::take(&mut self.tallies)
            .into_iter()
            .map(|(ordinal, tally)| Defect::ValueConversion {
                column: self.columns[ordinal].0.clone(),
                count: tally.count,
                sample: tally.sample,
            })
            .collect()
    }
}

/// Convert one value. `Ok(None)` is a legitimate NULL, `Err` a failure.
fn convert(class: ValueClass, value: &SourceValue) -> Result<Option<String>, String> {
    if value.is_null() {
        return Ok(None);
    }
    if let SourceValue::Invalid(reason) = value {
        return Err(reason.clone());
    }

    match class {
        ValueClass::Flag => flag(value).map(|b| Some(if b { "t" } else { "f" }.to_string())),
        ValueClass::Temporal => temporal(value),
        ValueClass::Binary => Ok(Some(binary(value))),
        ValueClass::Text | ValueClass::Plain => Ok(Some(text(value))),
    }
}

fn flag(value: &SourceValue) -> Result<bool, String> {
    match value {
        SourceValue::Int(v) => Ok(*v != 0),
        SourceValue::UInt(v) => Ok(*v != 0),
        SourceValue::Float(v) => Ok(*v != 0.0),
        SourceValue::Double(v) => Ok(*v != 0.0),
        SourceValue::Bytes(b) => Ok(b.iter().any(|&x| x != 0)),
        SourceValue::Decimal(s) | SourceValue::Text(s) => {
            let trimmed = s.trim();
            trimmed
                .parse::<f64>()
                .map(|v| v != 0.0)
                .map_err(|_| format!("non-numeric flag value '{}'", trimmed))
        }
        SourceValue::Temporal(s) => Err(format!("non-numeric flag value '{}'", s)),
        SourceValue::Null | SourceValue::Invalid(_) => Err("unreachable flag value".into()),
    }
}

fn temporal(value: &SourceValue) -> Result<Option<String>, String> {
    let raw = match value {
        SourceValue::Temporal(s) | SourceValue::Text(s) => s.as_str(),
        other => return Ok(Some(text(other))),
    };
    if raw.starts_with(ZERO_DATE) {
        return Ok(None);
    }
    if has_zero_part(raw) {
        return Err(format!("partial zero date '{}'", raw));
    }
    Ok(Some(escape_copy_text(&strip_nul(raw))))
}

/// True for `YYYY-00-DD` or `YYYY-MM-00`.
fn has_zero_part(raw: &str) -> bool {
    let b = raw.as_bytes();
    b.len() >= 10
        && b[4] == b'-'
        && b[7] == b'-'
        && (&b[5..7] == b"00" || &b[8..10] == b"00")
}

fn binary(value: &SourceValue) -> String {
    let bytes: Vec<u8> = match value {
        SourceValue::Bytes(b) => b.iter().copied().filter(|&x| x != 0).collect(),
        other => text_of(other).into_bytes().into_iter().filter(|&x| x != 0).collect(),
    };
    format!("\\\\x{}", hex::encode(bytes))
}

fn text(value: &SourceValue) -> String {
    match value {
        SourceValue::Int(v) => v.to_string(),
        SourceValue::UInt(v) => v.to_string(),
        SourceValue::Float(v) => float_text(f64::from(*v), v.to_string()),
        SourceValue::Double(v) => float_text(*v, v.to_string()),
        SourceValue::Decimal(s) => s.clone(),
        other => escape_copy_text(&strip_nul(&text_of(other))),
    }
}

fn text_of(value: &SourceValue) -> String {
    match value {
        SourceValue::Text(s) | SourceValue::Temporal(s) | SourceValue::Decimal(s) => s.clone(),
        SourceValue::Bytes(b) => String::from_utf8_lossy(b).into_owned(),
        SourceValue::Int(v) => v.to_string(),
        SourceValue::UInt(v) => v.to_string(),
        SourceValue::Float(v) => v.to_string(),
        SourceValue::Double(v) => v.to_string(),
        SourceValue::Null | SourceValue::Invalid(_) => String::new(),
    }
}

fn float_text(v: f64, display: String) -> String {
    if v.is_nan() {
        "NaN".to_string()
    } else if v.is_infinite() {
        if v > 0.0 { "Infinity" } else { "-Infinity" }.to_string()
    } else {
        display
    }
}

fn strip_nul(s: &str) -> String {
    if s.contains('\0') {
        s.replace('\0', "")
    } else {
        s.to_string()
    }
}

/// Escape text for PostgreSQL COPY.
pub fn escape_copy_text(s: &str) -> String {
    let mut result = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '\\' => result.push_str("\\\\"),
            '\t' => result.push_str("\\t"),
            '\n' => result.push_str("\\n"),
            '\r' => result.push_str("\\r"),
            _ => result.push(c),
        }
    }
    result
}
