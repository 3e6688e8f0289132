use crate::special::{PgInet, PgInterval, PgMacAddr, PgTimeTz, PgUnsigned};
use std::error::Error;
use std::fmt::Write as _;
use time::{Date, OffsetDateTime, PrimitiveDateTime, Time};
use tokio_postgres::types::{FromSql, Kind, Type};
use tokio_postgres::Row;
use wysci_core::types::ScanKind;
use wysci_core::{CellValue, Number, Temporal, WysciError};

type BoxError = Box<dyn Error + Sync + Send>;

const NUMERIC_POS: u16 = 0x0000;
const NUMERIC_NEG: u16 = 0x4000;
const NUMERIC_NAN: u16 = 0xC000;
const NUMERIC_PINF: u16 = 0xD000;
const NUMERIC_NINF: u16 = 0xF000;

/// NUMERIC rendered straight from its base-10000 wire digits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PgNumeric(pub String);

impl<'a> FromSql<'a> for PgNumeric {
    fn from_sql(_ty: &Type, raw: &'a [u8]) -> Result<Self, BoxError> {
        numeric_text(raw).map(PgNumeric)
    }

    fn accepts(ty: &Type) -> bool {
        *ty == Type::NUMERIC
    }
}

pub(crate) fn numeric_text(raw: &[u8]) -> Result<String, BoxError> {
    if raw.len() < 8 {
        return Err("numeric value too short".into());
    }
    let ndigits = i16::from_be_bytes([raw[0], raw[1]]);
    let weight = i32::from(i16::from_be_bytes([raw[2], raw[3]]));
    let sign = u16::from_be_bytes([raw[4], raw[5]]);
    let dscale = usize::from(u16::from_be_bytes([raw[6], raw[7]]));
    let ndigits = usize::try_from(ndigits)?;
    if raw.len() != 8 + ndigits * 2 {
        return Err("numeric digit count does not match payload".into());
    }
    match sign {
        NUMERIC_NAN => return Ok("NaN".into()),
        NUMERIC_PINF => return Ok("Infinity".into()),
        NUMERIC_NINF => return Ok("-Infinity".into()),
        NUMERIC_POS | NUMERIC_NEG => {}
        other => return Err(format!("invalid numeric sign {other:#x}").into()),
    }

    let digits: Vec<u16> = raw[8..]
        .chunks_exact(2)
        .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
        .collect();
    // digits[k] carries weight (weight - k)
    let digit = |k: i32| -> u16 {
        usize::try_from(k)
            .ok()
            .and_then(|k| digits.get(k).copied())
            .unwrap_or(0)
    };

    let mut out = String::new();
    if sign == NUMERIC_NEG {
        out.push('-');
    }
    if weight < 0 {
        out.push('0');
    } else {
        for k in 0..=weight {
            if k == 0 {
                write!(out, "{}", digit(k))?;
            } else {
                write!(out, "{:04}", digit(k))?;
            }
        }
    }
    if dscale > 0 {
        let mut frac = String::with_capacity(dscale + 4);
        let mut k = weight + 1;
        while frac.len() < dscale {
            write!(frac, "{:04}", digit(k))?;
            k += 1;
        }
        frac.truncate(dscale);
        out.push('.');
        out.push_str(&frac);
    }
    Ok(out)
}

/// MONEY as a plain two-decimal amount.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PgMoney(pub String);

impl<'a> FromSql<'a> for PgMoney {
    fn from_sql(_ty: &Type, raw: &'a [u8]) -> Result<Self, BoxError> {
        let cents = i64::from_be_bytes(raw.try_into()?);
        let sign = if cents < 0 { "-" } else { "" };
        let abs = cents.unsigned_abs();
        Ok(PgMoney(format!("{sign}{}.{:02}", abs / 100, abs % 100)))
    }

    fn accepts(ty: &Type) -> bool {
        *ty == Type::MONEY
    }
}

/// Last resort for types nothing else decodes.
#[derive(Debug, Clone, PartialEq)]
pub struct PgRaw(pub CellValue);

impl<'a> FromSql<'a> for PgRaw {
    fn from_sql(ty: &Type, raw: &'a [u8]) -> Result<Self, BoxError> {
        if *ty == Type::UUID && raw.len() == 16 {
            let hex: String = raw.iter().map(|b| format!("{b:02x}")).collect();
            let text = format!(
                "{}-{}-{}-{}-{}",
                &hex[0..8],
                &hex[8..12],
                &hex[12..16],
                &hex[16..20],
                &hex[20..32]
            );
            return Ok(PgRaw(CellValue::Text(text)));
        }
        let body = match raw.split_first() {
            Some((&1, rest)) if *ty == Type::JSONB => rest,
            _ => raw,
        };
        if is_textual(ty) {
            return Ok(PgRaw(CellValue::Text(std::str::from_utf8(body)?.to_string())));
        }
        // anything else is a binary payload and renders as hex
        Ok(PgRaw(CellValue::Bytes(raw.to_vec())))
    }

    fn accepts(_ty: &Type) -> bool {
        true
    }
}

/// Types whose binary send format is their text form.
fn is_textual(ty: &Type) -> bool {
    *ty == Type::JSON || *ty == Type::JSONB || *ty == Type::XML || matches!(ty.kind(), Kind::Enum(_))
}

fn get<'a, T: FromSql<'a>>(row: &'a Row, idx: usize) -> Result<Option<T>, WysciError> {
    row.try_get::<_, Option<T>>(idx).map_err(|e| {
        WysciError::Scan(format!(
            "column {idx} ({}): {e}",
            row.columns()[idx].type_().name()
        ))
    })
}

fn text_cell(v: Option<String>) -> CellValue {
    v.map(CellValue::Text).unwrap_or(CellValue::Null)
}

fn number_cell(v: Option<Number>) -> CellValue {
    v.map(CellValue::Number).unwrap_or(CellValue::Null)
}

fn temporal_cell(v: Option<Temporal>) -> CellValue {
    v.map(CellValue::Temporal).unwrap_or(CellValue::Null)
}

/// f32 widened through its shortest decimal form so `0.1f32` stays `0.1`.
fn widen(v: f32) -> f64 {
    v.to_string().parse().unwrap_or(f64::from(v))
}

/// Decode one cell according to the column's scan kind.
pub fn decode_cell(row: &Row, idx: usize, kind: ScanKind) -> Result<CellValue, WysciError> {
    let ty = row.columns()[idx].type_().clone();
    match kind {
        ScanKind::Text if ty == Type::MONEY => Ok(text_cell(get::<PgMoney>(row, idx)?.map(|m| m.0))),
        ScanKind::Text if ty == Type::CHAR => Ok(text_cell(
            get::<i8>(row, idx)?.map(|c| char::from(c as u8).to_string()),
        )),
        ScanKind::Text => Ok(text_cell(get::<String>(row, idx)?)),
        ScanKind::Integer => integer(row, idx, &ty),
        ScanKind::Float => float(row, idx, &ty),
        ScanKind::Decimal => Ok(number_cell(
            get::<PgNumeric>(row, idx)?.map(|n| Number::Decimal(n.0)),
        )),
        ScanKind::Bool => Ok(get::<bool>(row, idx)?.map(CellValue::Bool).unwrap_or(CellValue::Null)),
        ScanKind::Timestamp => timestamp(row, idx, &ty),
        ScanKind::Date => Ok(temporal_cell(get::<Date>(row, idx)?.map(Temporal::Date))),
        ScanKind::Time => Ok(temporal_cell(get::<Time>(row, idx)?.map(Temporal::Time))),
        ScanKind::Bytes => Ok(get::<Vec<u8>>(row, idx)?.map(CellValue::Bytes).unwrap_or(CellValue::Null)),
        ScanKind::Fallback => fallback(row, idx, &ty),
    }
}

fn integer(row: &Row, idx: usize, ty: &Type) -> Result<CellValue, WysciError> {
    let v = if *ty == Type::INT2 {
        get::<i16>(row, idx)?.map(i64::from)
    } else if *ty == Type::INT4 {
        get::<i32>(row, idx)?.map(i64::from)
    } else {
        get::<i64>(row, idx)?
    };
    Ok(number_cell(v.map(Number::Integer)))
}

fn float(row: &Row, idx: usize, ty: &Type) -> Result<CellValue, WysciError> {
    let v = if *ty == Type::FLOAT4 {
        get::<f32>(row, idx)?.map(widen)
    } else {
        get::<f64>(row, idx)?
    };
    Ok(number_cell(v.map(Number::Float)))
}

fn timestamp(row: &Row, idx: usize, ty: &Type) -> Result<CellValue, WysciError> {
    let v = if *ty == Type::TIMESTAMPTZ {
        get::<OffsetDateTime>(row, idx)?.map(Temporal::TimestampTz)
    } else {
        get::<PrimitiveDateTime>(row, idx)?.map(Temporal::Timestamp)
    };
    Ok(temporal_cell(v))
}

/// Best-effort decoding for native types outside the mapping table.
fn fallback(row: &Row, idx: usize, ty: &Type) -> Result<CellValue, WysciError> {
    if [Type::INT2, Type::INT4, Type::INT8].contains(ty) {
        return integer(row, idx, ty);
    }
    if [Type::FLOAT4, Type::FLOAT8].contains(ty) {
        return float(row, idx, ty);
    }
    if *ty == Type::NUMERIC {
        return decode_cell(row, idx, ScanKind::Decimal);
    }
    if *ty == Type::MONEY || *ty == Type::CHAR {
        return decode_cell(row, idx, ScanKind::Text);
    }
    if *ty == Type::BOOL {
        return decode_cell(row, idx, ScanKind::Bool);
    }
    if [Type::TIMESTAMP, Type::TIMESTAMPTZ].contains(ty) {
        return timestamp(row, idx, ty);
    }
    if *ty == Type::DATE {
        return decode_cell(row, idx, ScanKind::Date);
    }
    if *ty == Type::TIME {
        return decode_cell(row, idx, ScanKind::Time);
    }
    if *ty == Type::BYTEA {
        return decode_cell(row, idx, ScanKind::Bytes);
    }
    if <PgUnsigned as FromSql<'_>>::accepts(ty) {
        let v = get::<PgUnsigned>(row, idx)?.map(|v| Number::Integer(i64::from(v.0)));
        return Ok(number_cell(v));
    }
    if <PgInterval as FromSql<'_>>::accepts(ty) {
        return Ok(text_cell(get::<PgInterval>(row, idx)?.map(|v| v.0)));
    }
    if <PgTimeTz as FromSql<'_>>::accepts(ty) {
        return Ok(text_cell(get::<PgTimeTz>(row, idx)?.map(|v| v.0)));
    }
    if <PgInet as FromSql<'_>>::accepts(ty) {
        return Ok(text_cell(get::<PgInet>(row, idx)?.map(|v| v.0)));
    }
    if <PgMacAddr as FromSql<'_>>::accepts(ty) {
        return Ok(text_cell(get::<PgMacAddr>(row, idx)?.map(|v| v.0)));
    }
    if <String as FromSql<'_>>::accepts(ty) {
        return decode_cell(row, idx, ScanKind::Text);
    }
    Ok(get::<PgRaw>(row, idx)?.map(|raw| raw.0).unwrap_or(CellValue::Null))
}

#[cfg(test)]
mod tests {
    use super::{numeric_text, PgMoney, PgRaw};
    use tokio_postgres::types::{FromSql, Type};
    use wysci_core::CellValue;

    fn numeric(ndigits: i16, weight: i16, sign: u16, dscale: u16, digits: &[u16]) -> Vec<u8> {
        let mut raw = Vec::new();
        raw.extend_from_slice(&ndigits.to_be_bytes());
        raw.extend_from_slice(&weight.to_be_bytes());
        raw.extend_from_slice(&sign.to_be_bytes());
        raw.extend_from_slice(&dscale.to_be_bytes());
        for d in digits {
            raw.extend_from_slice(&d.to_be_bytes());
        }
        raw
    }

    #[test]
    fn numeric_keeps_every_digit() {
        let raw = numeric(6, 4, 0, 2, &[1234, 5678, 9012, 3456, 7890, 1200]);
        assert_eq!(numeric_text(&raw).expect("decode"), "12345678901234567890.12");
    }

    #[test]
    fn numeric_fractions_and_sign() {
        assert_eq!(numeric_text(&numeric(1, -1, 0, 2, &[500])).expect("0.05"), "0.05");
        assert_eq!(numeric_text(&numeric(1, -2, 0, 5, &[5000])).expect("small"), "0.00005");
        assert_eq!(numeric_text(&numeric(2, 0, 0x4000, 1, &[1, 5000])).expect("neg"), "-1.5");
        assert_eq!(numeric_text(&numeric(1, 1, 0, 0, &[1])).expect("10000"), "10000");
        assert_eq!(numeric_text(&numeric(0, 0, 0, 2, &[])).expect("zero"), "0.00");
        assert_eq!(numeric_text(&numeric(0, 0, 0xC000, 0, &[])).expect("nan"), "NaN");
    }

    #[test]
    fn numeric_rejects_truncated_payloads() {
        assert!(numeric_text(&[0, 1]).is_err());
        assert!(numeric_text(&numeric(2, 0, 0, 0, &[1])).is_err());
    }

    #[test]
    fn money_is_two_decimals() {
        let raw = (-12345i64).to_be_bytes();
        let money = PgMoney::from_sql(&Type::MONEY, &raw).expect("money");
        assert_eq!(money.0, "-123.45");
        let raw = 100i64.to_be_bytes();
        assert_eq!(PgMoney::from_sql(&Type::MONEY, &raw).expect("money").0, "1.00");
    }

    #[test]
    fn raw_fallback_handles_uuid_and_jsonb() {
        let uuid: Vec<u8> = (0u8..16).collect();
        let value = PgRaw::from_sql(&Type::UUID, &uuid).expect("uuid");
        assert_eq!(
            value.0,
            CellValue::Text("00010203-0405-0607-0809-0a0b0c0d0e0f".into())
        );
        let jsonb = b"\x01{\"a\":1}";
        let value = PgRaw::from_sql(&Type::JSONB, jsonb).expect("jsonb");
        assert_eq!(value.0, CellValue::Text("{\"a\":1}".into()));
        let value = PgRaw::from_sql(&Type::TID, &[0xff, 0xfe]).expect("bytes");
        assert_eq!(value.0, CellValue::Bytes(vec![0xff, 0xfe]));
    }

    #[test]
    fn raw_fallback_never_reads_binary_as_text() {
        let mut interval = Vec::new();
        interval.extend_from_slice(&0i64.to_be_bytes());
        interval.extend_from_slice(&1i32.to_be_bytes());
        interval.extend_from_slice(&0i32.to_be_bytes());
        let value = PgRaw::from_sql(&Type::POINT, &interval).expect("point");
        assert_eq!(value.0, CellValue::Bytes(interval));

        let value = PgRaw::from_sql(&Type::JSON, b"[1,2]").expect("json");
        assert_eq!(value.0, CellValue::Text("[1,2]".into()));
        assert!(PgRaw::from_sql(&Type::XML, &[0xff]).is_err());
    }
}
