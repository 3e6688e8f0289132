use serde::{Deserialize, Serialize};
use std::fmt;
use time::{Date, OffsetDateTime, PrimitiveDateTime, Time};

/// Coarse classification of a result column. Formatting reasons about these
/// families instead of the many native type names a database reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LogicalType {
    Number,
    Text,
    Date,
    Time,
    Bytes,
    Unknown,
}

impl fmt::Display for LogicalType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LogicalType::Number => "Number",
            LogicalType::Text => "Text",
            LogicalType::Date => "Date",
            LogicalType::Time => "Time",
            LogicalType::Bytes => "Bytes",
            LogicalType::Unknown => "Unknown",
        };
        f.write_str(name)
    }
}

/// Decode strategy for one column, fixed when the cursor is opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScanKind {
    Text,
    Integer,
    Float,
    Decimal,
    Bool,
    Timestamp,
    Date,
    Time,
    Bytes,
    /// Unmapped native type: any non-null cell is accepted and rendered as text.
    Fallback,
}

impl ScanKind {
    pub fn logical_type(self) -> LogicalType {
        match self {
            ScanKind::Text | ScanKind::Bool => LogicalType::Text,
            ScanKind::Integer | ScanKind::Float | ScanKind::Decimal => LogicalType::Number,
            ScanKind::Timestamp | ScanKind::Date => LogicalType::Date,
            ScanKind::Time => LogicalType::Time,
            ScanKind::Bytes => LogicalType::Bytes,
            ScanKind::Fallback => LogicalType::Unknown,
        }
    }
}

/// Resolve the decode strategy for a native type name. Matching is
/// case-sensitive; anything unrecognised falls back.
pub fn scan_kind(native_type: &str) -> ScanKind {
    match native_type {
        "VARCHAR" | "TEXT" | "NVARCHAR" | "CHAR" | "MONEY" => ScanKind::Text,
        "DATE" => ScanKind::Date,
        "TIMESTAMP" => ScanKind::Timestamp,
        "TIME" => ScanKind::Time,
        "DECIMAL" | "NUMERIC" => ScanKind::Decimal,
        "FLOAT" => ScanKind::Float,
        "INT" | "INT4" | "BIGINT" => ScanKind::Integer,
        "BOOL" => ScanKind::Bool,
        "BYTEA" => ScanKind::Bytes,
        _ => ScanKind::Fallback,
    }
}

/// Map a native column type name to its logical family. Total: unmapped names
/// are `Unknown`, never an error.
pub fn classify(native_type: &str) -> LogicalType {
    scan_kind(native_type).logical_type()
}

/// Name and native type as reported by the driver, before classification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnDescriptor {
    pub name: String,
    pub native_type: String,
}

impl ColumnDescriptor {
    pub fn new(name: impl Into<String>, native_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            native_type: native_type.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Column {
    pub name: String,
    pub native_type: String,
    pub logical_type: LogicalType,
    pub ordinal: usize,
    #[serde(skip)]
    pub scan_kind: ScanKind,
}

impl Column {
    pub fn new(ordinal: usize, descriptor: ColumnDescriptor) -> Self {
        let kind = scan_kind(&descriptor.native_type);
        Self {
            name: descriptor.name,
            native_type: descriptor.native_type,
            logical_type: kind.logical_type(),
            ordinal,
            scan_kind: kind,
        }
    }
}

/// A captured cell: either absent (SQL NULL) or its canonical text.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct NullableValue {
    raw: Option<String>,
}

impl NullableValue {
    pub fn present(raw: impl Into<String>) -> Self {
        Self {
            raw: Some(raw.into()),
        }
    }

    pub fn absent() -> Self {
        Self { raw: None }
    }

    pub fn is_present(&self) -> bool {
        self.raw.is_some()
    }

    pub fn raw(&self) -> Option<&str> {
        self.raw.as_deref()
    }
}

impl From<Option<String>> for NullableValue {
    fn from(raw: Option<String>) -> Self {
        Self { raw }
    }
}

impl From<&str> for NullableValue {
    fn from(raw: &str) -> Self {
        Self::present(raw)
    }
}

pub type Row = Vec<NullableValue>;

#[derive(Debug, Clone, PartialEq)]
pub enum Number {
    Integer(i64),
    Float(f64),
    /// Exact decimal text as produced by the driver.
    Decimal(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Temporal {
    Timestamp(PrimitiveDateTime),
    TimestampTz(OffsetDateTime),
    Date(Date),
    Time(Time),
}

/// A typed value handed over by a cursor for one cell.
#[derive(Debug, Clone, PartialEq)]
pub enum CellValue {
    Null,
    Text(String),
    Number(Number),
    Temporal(Temporal),
    Bool(bool),
    Bytes(Vec<u8>),
}

impl CellValue {
    pub fn variant_name(&self) -> &'static str {
        match self {
            CellValue::Null => "null",
            CellValue::Text(_) => "text",
            CellValue::Number(Number::Integer(_)) => "integer",
            CellValue::Number(Number::Float(_)) => "float",
            CellValue::Number(Number::Decimal(_)) => "decimal",
            CellValue::Temporal(Temporal::Timestamp(_)) => "timestamp",
            CellValue::Temporal(Temporal::TimestampTz(_)) => "timestamptz",
            CellValue::Temporal(Temporal::Date(_)) => "date",
            CellValue::Temporal(Temporal::Time(_)) => "time",
            CellValue::Bool(_) => "bool",
            CellValue::Bytes(_) => "bytes",
        }
    }
}

impl From<&str> for CellValue {
    fn from(value: &str) -> Self {
        CellValue::Text(value.to_string())
    }
}

impl From<String> for CellValue {
    fn from(value: String) -> Self {
        CellValue::Text(value)
    }
}

impl From<i64> for CellValue {
    fn from(value: i64) -> Self {
        CellValue::Number(Number::Integer(value))
    }
}

impl From<f64> for CellValue {
    fn from(value: f64) -> Self {
        CellValue::Number(Number::Float(value))
    }
}

impl From<bool> for CellValue {
    fn from(value: bool) -> Self {
        CellValue::Bool(value)
    }
}

impl From<Date> for CellValue {
    fn from(value: Date) -> Self {
        CellValue::Temporal(Temporal::Date(value))
    }
}

impl<T: Into<CellValue>> From<Option<T>> for CellValue {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(CellValue::Null)
    }
}
