use bytes::BytesMut;
use std::error::Error;
use tokio_postgres::types::{to_sql_checked, IsNull, ToSql, Type};

/// A bound query parameter. Numbers adapt to whichever integer or text type
/// the server inferred for the placeholder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryParam {
    Null,
    Number(i64),
    Text(String),
}

const INTEGER_TYPES: [Type; 3] = [Type::INT2, Type::INT4, Type::INT8];

impl ToSql for QueryParam {
    fn to_sql(&self, ty: &Type, out: &mut BytesMut) -> Result<IsNull, Box<dyn Error + Sync + Send>> {
        match self {
            QueryParam::Null => Ok(IsNull::Yes),
            QueryParam::Number(v) => number_to_sql(*v, ty, out),
            QueryParam::Text(s) if INTEGER_TYPES.contains(ty) => {
                let v: i64 = s.trim().parse()?;
                number_to_sql(v, ty, out)
            }
            QueryParam::Text(s) if *ty == Type::FLOAT8 => s.trim().parse::<f64>()?.to_sql(ty, out),
            QueryParam::Text(s) => s.as_str().to_sql(ty, out),
        }
    }

    fn accepts(ty: &Type) -> bool {
        INTEGER_TYPES.contains(ty) || *ty == Type::FLOAT8 || <&str as ToSql>::accepts(ty)
    }

    to_sql_checked!();
}

fn number_to_sql(v: i64, ty: &Type, out: &mut BytesMut) -> Result<IsNull, Box<dyn Error + Sync + Send>> {
    if *ty == Type::INT2 {
        i16::try_from(v)?.to_sql(ty, out)
    } else if *ty == Type::INT4 {
        i32::try_from(v)?.to_sql(ty, out)
    } else if *ty == Type::INT8 {
        v.to_sql(ty, out)
    } else if *ty == Type::FLOAT8 {
        (v as f64).to_sql(ty, out)
    } else {
        v.to_string().as_str().to_sql(ty, out)
    }
}
