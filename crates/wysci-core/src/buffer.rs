use crate::error::WysciError;
use crate::types::{CellValue, Column, NullableValue, Number, Row, ScanKind, Temporal};
use time::format_description::well_known::Rfc3339;
use time::macros::format_description;
use time::{Date, PrimitiveDateTime, Time};

/// One nullable slot per column. The slot's kind is fixed at allocation; a
/// cursor fills it with a `CellValue` for every row.
#[derive(Debug, Clone)]
struct ScanTarget {
    kind: ScanKind,
    value: CellValue,
}

#[derive(Debug, Clone)]
pub struct ScanTargets {
    slots: Vec<ScanTarget>,
}

impl ScanTargets {
    pub fn allocate(columns: &[Column]) -> Self {
        let slots = columns
            .iter()
            .map(|c| ScanTarget {
                kind: c.scan_kind,
                value: CellValue::Null,
            })
            .collect();
        Self { slots }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn kind(&self, ordinal: usize) -> Option<ScanKind> {
        self.slots.get(ordinal).map(|s| s.kind)
    }

    /// Store a value into its slot. A value whose variant does not fit the
    /// slot's kind is a driver contract violation and is rejected as a scan
    /// error rather than coerced.
    pub fn set(&mut self, ordinal: usize, value: CellValue) -> Result<(), WysciError> {
        let count = self.slots.len();
        let slot = self.slots.get_mut(ordinal).ok_or_else(|| {
            WysciError::Scan(format!("column {ordinal} out of range ({count} columns)"))
        })?;
        if !accepts(slot.kind, &value) {
            return Err(WysciError::Scan(format!(
                "column {ordinal}: {:?} slot cannot hold a {} value",
                slot.kind,
                value.variant_name()
            )));
        }
        slot.value = value;
        Ok(())
    }

    pub fn clear(&mut self) {
        for slot in &mut self.slots {
            slot.value = CellValue::Null;
        }
    }

    /// Render every slot to its canonical text. The row always has one entry
    /// per column.
    pub fn capture(&self) -> Result<Row, WysciError> {
        self.slots
            .iter()
            .map(|slot| render(slot.kind, &slot.value))
            .collect()
    }
}

fn accepts(kind: ScanKind, value: &CellValue) -> bool {
    match (kind, value) {
        (_, CellValue::Null) => true,
        (ScanKind::Fallback, _) => true,
        (ScanKind::Text, CellValue::Text(_)) => true,
        (ScanKind::Integer, CellValue::Number(Number::Integer(_))) => true,
        (ScanKind::Float, CellValue::Number(Number::Float(_))) => true,
        (ScanKind::Decimal, CellValue::Number(Number::Decimal(_))) => true,
        (ScanKind::Bool, CellValue::Bool(_)) => true,
        (ScanKind::Timestamp, CellValue::Temporal(Temporal::Timestamp(_))) => true,
        (ScanKind::Timestamp, CellValue::Temporal(Temporal::TimestampTz(_))) => true,
        (ScanKind::Date, CellValue::Temporal(Temporal::Date(_))) => true,
        (ScanKind::Time, CellValue::Temporal(Temporal::Time(_))) => true,
        (ScanKind::Bytes, CellValue::Bytes(_)) => true,
        _ => false,
    }
}

fn render(kind: ScanKind, value: &CellValue) -> Result<NullableValue, WysciError> {
    let text = match value {
        CellValue::Null => return Ok(NullableValue::absent()),
        CellValue::Text(s) => s.clone(),
        CellValue::Number(Number::Integer(v)) => v.to_string(),
        CellValue::Number(Number::Float(v)) => v.to_string(),
        CellValue::Number(Number::Decimal(v)) => v.clone(),
        CellValue::Bool(v) => v.to_string(),
        CellValue::Bytes(v) => hex_text(v),
        CellValue::Temporal(Temporal::Date(d)) => format_date(*d)?,
        CellValue::Temporal(Temporal::Time(t)) => format_time(*t)?,
        CellValue::Temporal(Temporal::Timestamp(ts)) => format_timestamp(*ts)?,
        CellValue::Temporal(Temporal::TimestampTz(ts)) => ts
            .format(&Rfc3339)
            .map_err(|e| render_error(kind, e))?,
    };
    Ok(NullableValue::present(text))
}

/// Bytes in the server's hex output form, `\x` followed by two digits a byte.
fn hex_text(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(2 + bytes.len() * 2);
    out.push_str("\\x");
    for b in bytes {
        out.push(char::from(HEX_DIGITS[usize::from(b >> 4)]));
        out.push(char::from(HEX_DIGITS[usize::from(b & 0x0f)]));
    }
    out
}

const HEX_DIGITS: &[u8; 16] = b"0123456789abcdef";

fn render_error(kind: ScanKind, err: time::error::Format) -> WysciError {
    WysciError::Scan(format!("cannot render {kind:?} value: {err}"))
}

fn format_date(date: Date) -> Result<String, WysciError> {
    date.format(format_description!("[month]/[day]/[year]"))
        .map_err(|e| render_error(ScanKind::Date, e))
}

fn format_time(t: Time) -> Result<String, WysciError> {
    let out = if t.nanosecond() == 0 {
        t.format(format_description!("[hour]:[minute]:[second]"))
    } else {
        t.format(format_description!(
            "[hour]:[minute]:[second].[subsecond digits:6]"
        ))
    };
    out.map_err(|e| render_error(ScanKind::Time, e))
}

fn format_timestamp(ts: PrimitiveDateTime) -> Result<String, WysciError> {
    let out = if ts.nanosecond() == 0 {
        ts.format(format_description!(
            "[year]-[month]-[day]T[hour]:[minute]:[second]"
        ))
    } else {
        ts.format(format_description!(
            "[year]-[month]-[day]T[hour]:[minute]:[second].[subsecond digits:6]"
        ))
    };
    out.map_err(|e| render_error(ScanKind::Timestamp, e))
}

#[cfg(test)]
mod tests {
    use super::ScanTargets;
    use crate::error::WysciError;
    use crate::types::{CellValue, Column, ColumnDescriptor, NullableValue, Number, Temporal};
    use time::macros::{date, datetime, time};

    fn columns(types: &[&str]) -> Vec<Column> {
        types
            .iter()
            .enumerate()
            .map(|(i, t)| Column::new(i, ColumnDescriptor::new(format!("c{i}"), *t)))
            .collect()
    }

    #[test]
    fn renders_each_family_to_text() {
        let cols = columns(&["INT4", "NUMERIC", "FLOAT", "BOOL", "DATE", "TIMESTAMP", "TIME", "TEXT"]);
        let mut targets = ScanTargets::allocate(&cols);
        targets.set(0, CellValue::from(42i64)).expect("int");
        targets
            .set(1, CellValue::Number(Number::Decimal("12345678901234567890.12".into())))
            .expect("decimal");
        targets.set(2, CellValue::from(0.1f64)).expect("float");
        targets.set(3, CellValue::from(true)).expect("bool");
        targets.set(4, CellValue::from(date!(2019 - 01 - 04))).expect("date");
        targets
            .set(5, CellValue::Temporal(Temporal::Timestamp(datetime!(2019-01-02 03:04:05))))
            .expect("ts");
        targets
            .set(6, CellValue::Temporal(Temporal::Time(time!(13:30:00.25))))
            .expect("time");
        targets.set(7, CellValue::from("hello world")).expect("text");

        let row = targets.capture().expect("capture");
        let raw: Vec<_> = row.iter().map(|v| v.raw().unwrap_or("<null>")).collect();
        assert_eq!(
            raw,
            vec![
                "42",
                "12345678901234567890.12",
                "0.1",
                "true",
                "01/04/2019",
                "2019-01-02T03:04:05",
                "13:30:00.250000",
                "hello world",
            ]
        );
    }

    #[test]
    fn null_is_absent_in_every_family() {
        let cols = columns(&["INT4", "DATE", "TEXT", "BOOL", "UUID"]);
        let targets = ScanTargets::allocate(&cols);
        let row = targets.capture().expect("capture");
        assert_eq!(row.len(), 5);
        assert!(row.iter().all(|v| *v == NullableValue::absent()));
    }

    #[test]
    fn mismatched_value_is_a_scan_error() {
        let cols = columns(&["INT4"]);
        let mut targets = ScanTargets::allocate(&cols);
        let err = targets.set(0, CellValue::from("seven")).unwrap_err();
        assert!(matches!(err, WysciError::Scan(_)));
    }

    #[test]
    fn fallback_slot_takes_anything() {
        let cols = columns(&["UUID", "INT8"]);
        let mut targets = ScanTargets::allocate(&cols);
        targets.set(0, CellValue::from("8d1c")).expect("text");
        targets.set(1, CellValue::from(9_000_000_000i64)).expect("int8");
        let row = targets.capture().expect("capture");
        assert_eq!(row[0].raw(), Some("8d1c"));
        assert_eq!(row[1].raw(), Some("9000000000"));
    }

    #[test]
    fn bytes_render_as_hex_not_text() {
        let cols = columns(&["BYTEA", "BYTEA"]);
        let mut targets = ScanTargets::allocate(&cols);
        targets.set(0, CellValue::Bytes(vec![0xde, 0xad, 0xbe, 0xef])).expect("bytes");
        targets.set(1, CellValue::Bytes(b"a\n\0".to_vec())).expect("bytes");
        let row = targets.capture().expect("capture");
        assert_eq!(row[0].raw(), Some("\\xdeadbeef"));
        assert_eq!(row[1].raw(), Some("\\x610a00"));
    }

    #[test]
    fn out_of_range_ordinal_is_rejected() {
        let mut targets = ScanTargets::allocate(&columns(&["TEXT"]));
        assert!(targets.set(3, CellValue::Null).is_err());
    }
}
