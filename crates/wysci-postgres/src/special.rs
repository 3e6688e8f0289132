use std::error::Error;
use std::fmt::Write as _;
use std::net::{Ipv4Addr, Ipv6Addr};
use tokio_postgres::types::{FromSql, Type};

type BoxError = Box<dyn Error + Sync + Send>;

const USECS_PER_SEC: i64 = 1_000_000;
const USECS_PER_MINUTE: i64 = 60 * USECS_PER_SEC;
const USECS_PER_HOUR: i64 = 60 * USECS_PER_MINUTE;

const PGSQL_AF_INET: u8 = 2;
const PGSQL_AF_INET6: u8 = 3;

/// INTERVAL in the server's default `postgres` output style, e.g.
/// `1 year 2 mons 3 days 04:05:06.5`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PgInterval(pub String);

impl<'a> FromSql<'a> for PgInterval {
    fn from_sql(_ty: &Type, raw: &'a [u8]) -> Result<Self, BoxError> {
        if raw.len() != 16 {
            return Err(format!("interval value has {} bytes, expected 16", raw.len()).into());
        }
        let micros = i64::from_be_bytes(raw[0..8].try_into()?);
        let days = i32::from_be_bytes(raw[8..12].try_into()?);
        let months = i32::from_be_bytes(raw[12..16].try_into()?);
        Ok(PgInterval(interval_text(micros, days, months)))
    }

    fn accepts(ty: &Type) -> bool {
        *ty == Type::INTERVAL
    }
}

fn interval_text(micros: i64, days: i32, months: i32) -> String {
    let mut out = String::new();
    let mut negative_before = false;
    for (value, unit) in [(months / 12, "year"), (months % 12, "mon"), (days, "day")] {
        if value == 0 {
            continue;
        }
        if !out.is_empty() {
            out.push(' ');
        }
        let plus = if negative_before && value > 0 { "+" } else { "" };
        let plural = if value != 1 { "s" } else { "" };
        let _ = write!(out, "{plus}{value} {unit}{plural}");
        negative_before = value < 0;
    }
    if out.is_empty() || micros != 0 {
        if !out.is_empty() {
            out.push(' ');
        }
        if micros < 0 {
            out.push('-');
        } else if negative_before {
            out.push('+');
        }
        push_clock(&mut out, micros.unsigned_abs());
    }
    out
}

/// `HH:MM:SS` plus a fraction with trailing zeros trimmed.
fn push_clock(out: &mut String, micros: u64) {
    let hours = micros / USECS_PER_HOUR as u64;
    let minutes = micros % USECS_PER_HOUR as u64 / USECS_PER_MINUTE as u64;
    let seconds = micros % USECS_PER_MINUTE as u64 / USECS_PER_SEC as u64;
    let fraction = micros % USECS_PER_SEC as u64;
    let _ = write!(out, "{hours:02}:{minutes:02}:{seconds:02}");
    if fraction != 0 {
        let digits = format!("{fraction:06}");
        let _ = write!(out, ".{}", digits.trim_end_matches('0'));
    }
}

/// TIMETZ as `HH:MM:SS[.f]±HH[:MM[:SS]]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PgTimeTz(pub String);

impl<'a> FromSql<'a> for PgTimeTz {
    fn from_sql(_ty: &Type, raw: &'a [u8]) -> Result<Self, BoxError> {
        if raw.len() != 12 {
            return Err(format!("timetz value has {} bytes, expected 12", raw.len()).into());
        }
        let micros = i64::from_be_bytes(raw[0..8].try_into()?);
        // stored as seconds west of UTC
        let zone = i32::from_be_bytes(raw[8..12].try_into()?);
        let micros = u64::try_from(micros)?;
        let mut out = String::new();
        push_clock(&mut out, micros);
        let east = -i64::from(zone);
        let sign = if east < 0 { '-' } else { '+' };
        let east = east.unsigned_abs();
        let _ = write!(out, "{sign}{:02}", east / 3600);
        let (minutes, seconds) = (east % 3600 / 60, east % 60);
        if minutes != 0 || seconds != 0 {
            let _ = write!(out, ":{minutes:02}");
        }
        if seconds != 0 {
            let _ = write!(out, ":{seconds:02}");
        }
        Ok(PgTimeTz(out))
    }

    fn accepts(ty: &Type) -> bool {
        *ty == Type::TIMETZ
    }
}

/// INET and CIDR. INET omits a full-length netmask, CIDR always shows it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PgInet(pub String);

impl<'a> FromSql<'a> for PgInet {
    fn from_sql(ty: &Type, raw: &'a [u8]) -> Result<Self, BoxError> {
        let [family, bits, _is_cidr, len, addr @ ..] = raw else {
            return Err("inet value too short".into());
        };
        if addr.len() != usize::from(*len) {
            return Err(format!("inet address has {} bytes, header says {len}", addr.len()).into());
        }
        let (text, max_bits) = match *family {
            PGSQL_AF_INET => {
                let octets: [u8; 4] = addr.try_into()?;
                (Ipv4Addr::from(octets).to_string(), 32)
            }
            PGSQL_AF_INET6 => {
                let octets: [u8; 16] = addr.try_into()?;
                (Ipv6Addr::from(octets).to_string(), 128)
            }
            other => return Err(format!("unknown inet address family {other}").into()),
        };
        if *ty == Type::CIDR || *bits != max_bits {
            return Ok(PgInet(format!("{text}/{bits}")));
        }
        Ok(PgInet(text))
    }

    fn accepts(ty: &Type) -> bool {
        *ty == Type::INET || *ty == Type::CIDR
    }
}

/// MACADDR and MACADDR8 as colon-separated lowercase hex.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PgMacAddr(pub String);

impl<'a> FromSql<'a> for PgMacAddr {
    fn from_sql(_ty: &Type, raw: &'a [u8]) -> Result<Self, BoxError> {
        if raw.len() != 6 && raw.len() != 8 {
            return Err(format!("mac address has {} bytes", raw.len()).into());
        }
        let parts: Vec<String> = raw.iter().map(|b| format!("{b:02x}")).collect();
        Ok(PgMacAddr(parts.join(":")))
    }

    fn accepts(ty: &Type) -> bool {
        *ty == Type::MACADDR || *ty == Type::MACADDR8
    }
}

/// Unsigned 32-bit system identifiers (OID, XID, CID, REGCLASS, ...).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PgUnsigned(pub u32);

impl<'a> FromSql<'a> for PgUnsigned {
    fn from_sql(_ty: &Type, raw: &'a [u8]) -> Result<Self, BoxError> {
        Ok(PgUnsigned(u32::from_be_bytes(raw.try_into()?)))
    }

    fn accepts(ty: &Type) -> bool {
        [
            Type::OID,
            Type::XID,
            Type::CID,
            Type::REGPROC,
            Type::REGCLASS,
            Type::REGTYPE,
        ]
        .contains(ty)
    }
}
