//! Source row and value types.
//!
//! Rows coming out of the source driver are positional: value `i` of a
//! [`SourceRow`] belongs to column `i` of the table descriptor. Drivers are
//! expected to produce exactly one value per column.

/// A single value decoded from the source.
#[derive(Debug, Clone, PartialEq)]
pub enum SourceValue {
    /// SQL NULL.
    Null,

    /// Signed integer (tinyint through bigint).
    Int(i64),

    /// Unsigned integer, also used for BIT columns.
    UInt(u64),

    /// Single precision float (FLOAT).
    Float(f32),

    /// Double precision float (DOUBLE).
    Double(f64),

    /// Exact numeric, kept as its decimal text so no precision is lost.
    Decimal(String),

    /// Character data.
    Text(String),

    /// Binary data.
    Bytes(Vec<u8>),

    /// Date, datetime, timestamp or time rendered by the source as text.
    ///
    /// Zero dates (`0000-00-00`) survive as text here; they are turned into
    /// NULL by the transcoder.
    Temporal(String),

    /// The driver could not decode the value; carries the reason.
    Invalid(String),
}

impl SourceValue {
    /// Check if the value is SQL NULL.
    pub fn is_null(&self) -> bool {
        matches!(self, SourceValue::Null)
    }
}

impl From<i64> for SourceValue {
    fn from(v: i64) -> Self {
        SourceValue::Int(v)
    }
}

impl From<u64> for SourceValue {
    fn from(v: u64) -> Self {
        SourceValue::UInt(v)
    }
}

impl From<f64> for SourceValue {
    fn from(v: f64) -> Self {
        SourceValue::Double(v)
    }
}

impl From<&str> for SourceValue {
    fn from(v: &str) -> Self {
        SourceValue::Text(v.to_string())
    }
}

impl From<String> for SourceValue {
    fn from(v: String) -> Self {
        SourceValue::Text(v)
    }
}

impl From<Vec<u8>> for SourceValue {
    fn from(v: Vec<u8>) -> Self {
        SourceValue::Bytes(v)
    }
}

impl<T: Into<SourceValue>> From<Option<T>> for SourceValue {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(SourceValue::Null)
    }
}

/// One source row keyed by column ordinal.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SourceRow {
    values: Vec<SourceValue>,
}

impl SourceRow {
    /// Create a row from values in column order.
    pub fn new(values: Vec<SourceValue>) -> Self {
        Self { values }
    }

    /// Number of values in the row.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Check if the row has no values.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Value at a column ordinal.
    pub fn get(&self, ordinal: usize) -> Option<&SourceValue> {
        self.values.get(ordinal)
    }
}

impl From<Vec<SourceValue>> for SourceRow {
    fn from(values: Vec<SourceValue>) -> Self {
        Self::new(values)
    }
}
