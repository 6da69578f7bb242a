//! Conversion of driver rows into JSON values.

use std::error::Error;
use std::fmt::Write;
use std::net::IpAddr;

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde_json::Value;
use tokio_postgres::types::{FromSql, Kind, Type};

use crate::error::PgTestError;

/// Decode column `idx` of `row`.
///
/// NULL becomes `Value::Null`. Types without a mapping fail with
/// [`PgTestError::Decode`] naming the column and its type.
pub(crate) fn decode_column(row: &tokio_postgres::Row, idx: usize) -> Result<Value, PgTestError> {
    let column = &row.columns()[idx];
    let ty = column.type_();

    let decoded = match *ty {
        // Scalars
        Type::BOOL => scalar(row, idx, |v: bool| Value::from(v)),
        Type::CHAR => scalar(row, idx, |v: i8| Value::from(v)),
        Type::INT2 => scalar(row, idx, |v: i16| Value::from(v)),
        Type::INT4 => scalar(row, idx, |v: i32| Value::from(v)),
        Type::INT8 => scalar(row, idx, |v: i64| Value::from(v)),
        Type::OID => scalar(row, idx, |v: u32| Value::from(v)),
        Type::FLOAT4 => scalar(row, idx, |v: f32| float_value(v as f64)),
        Type::FLOAT8 => scalar(row, idx, float_value),
        Type::NUMERIC => scalar(row, idx, decimal_value),
        Type::JSON | Type::JSONB => scalar(row, idx, |v: Value| v),
        Type::UUID => scalar(row, idx, |v: uuid::Uuid| Value::from(v.to_string())),
        Type::BYTEA => scalar(row, idx, |v: Vec<u8>| Value::from(hex_bytes(&v))),
        Type::INET => scalar(row, idx, |v: IpAddr| Value::from(v.to_string())),

        // Date/Time
        Type::TIMESTAMP => scalar(row, idx, |t: chrono::NaiveDateTime| {
            Value::from(t.format("%Y-%m-%dT%H:%M:%S%.f").to_string())
        }),
        Type::TIMESTAMPTZ => {
            scalar(row, idx, |t: chrono::DateTime<chrono::Utc>| Value::from(t.to_rfc3339()))
        }
        Type::DATE => scalar(row, idx, |d: chrono::NaiveDate| Value::from(d.to_string())),
        Type::TIME => scalar(row, idx, |t: chrono::NaiveTime| Value::from(t.to_string())),
        Type::INTERVAL => scalar(row, idx, |v: Interval| Value::from(v.to_iso8601())),

        // One-dimensional arrays
        Type::BOOL_ARRAY => array(row, idx, |v: bool| Value::from(v)),
        Type::INT2_ARRAY => array(row, idx, |v: i16| Value::from(v)),
        Type::INT4_ARRAY => array(row, idx, |v: i32| Value::from(v)),
        Type::INT8_ARRAY => array(row, idx, |v: i64| Value::from(v)),
        Type::FLOAT4_ARRAY => array(row, idx, |v: f32| float_value(v as f64)),
        Type::FLOAT8_ARRAY => array(row, idx, float_value),
        Type::NUMERIC_ARRAY => array(row, idx, decimal_value),
        Type::JSON_ARRAY | Type::JSONB_ARRAY => array(row, idx, |v: Value| v),
        Type::UUID_ARRAY => array(row, idx, |v: uuid::Uuid| Value::from(v.to_string())),
        Type::TEXT_ARRAY | Type::VARCHAR_ARRAY | Type::BPCHAR_ARRAY | Type::NAME_ARRAY => {
            array(row, idx, |v: String| Value::from(v))
        }

        // Text-like types, including citext and friends
        _ if <String as FromSql<'_>>::accepts(ty) => scalar(row, idx, |v: String| Value::from(v)),
        _ if matches!(ty.kind(), Kind::Enum(_)) => scalar(row, idx, |v: EnumLabel| Value::from(v.0)),

        _ => Err(format!("unsupported type {}, cast it to text in SQL", ty.name())),
    };

    decoded.map_err(|e| {
        tracing::warn!(column = %column.name(), pg_type = %ty.name(), error = %e, "Column decode failed");
        PgTestError::decode(column.name(), e)
    })
}

fn scalar<'a, T, F>(row: &'a tokio_postgres::Row, idx: usize, f: F) -> Result<Value, String>
where
    T: FromSql<'a>,
    F: Fn(T) -> Value,
{
    let value = row.try_get::<_, Option<T>>(idx).map_err(|e| driver_message(&e))?;
    Ok(value.map(f).unwrap_or(Value::Null))
}

fn array<'a, T, F>(row: &'a tokio_postgres::Row, idx: usize, f: F) -> Result<Value, String>
where
    T: FromSql<'a>,
    F: Fn(T) -> Value,
{
    let items = row.try_get::<_, Option<Vec<Option<T>>>>(idx).map_err(|e| driver_message(&e))?;
    Ok(items
        .map(|items| {
            Value::Array(items.into_iter().map(|item| item.map(&f).unwrap_or(Value::Null)).collect())
        })
        .unwrap_or(Value::Null))
}

/// The driver's error plus its source, which carries the actual conversion failure.
fn driver_message(e: &tokio_postgres::Error) -> String {
    match e.source() {
        Some(source) => format!("{e}: {source}"),
        None => e.to_string(),
    }
}

fn float_value(f: f64) -> Value {
    serde_json::Number::from_f64(f).map(Value::Number).unwrap_or(Value::Null)
}

/// A JSON number when `f64` holds the exact value, else the decimal text.
fn decimal_value(d: Decimal) -> Value {
    let d = d.normalize();
    if d.scale() == 0 {
        if let Some(i) = d.to_i64() {
            return Value::from(i);
        }
    }
    match d.to_f64() {
        Some(f) if f.to_string() == d.to_string() => float_value(f),
        _ => Value::from(d.to_string()),
    }
}

/// Same text form PostgreSQL prints for `bytea`: `\x` then lower-case hex.
fn hex_bytes(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(2 + bytes.len() * 2);
    out.push_str("\\x");
    for b in bytes {
        let _ = write!(out, "{b:02x}");
    }
    out
}

/// Binary `interval`: microseconds, days and months, kept apart like the server does.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Interval {
    micros: i64,
    days: i32,
    months: i32,
}

impl Interval {
    /// ISO 8601 duration, e.g. `P1Y2M3DT4H5M6.5S`.
    fn to_iso8601(self) -> String {
        let mut out = String::from("P");
        let (years, months) = (self.months / 12, self.months % 12);
        if years != 0 {
            let _ = write!(out, "{years}Y");
        }
        if months != 0 {
            let _ = write!(out, "{months}M");
        }
        if self.days != 0 {
            let _ = write!(out, "{}D", self.days);
        }

        if self.micros != 0 {
            out.push('T');
            let hours = self.micros / 3_600_000_000;
            let minutes = (self.micros / 60_000_000) % 60;
            let rest = self.micros % 60_000_000;
            if hours != 0 {
                let _ = write!(out, "{hours}H");
            }
            if minutes != 0 {
                let _ = write!(out, "{minutes}M");
            }
            if rest != 0 {
                let sign = if rest < 0 { "-" } else { "" };
                let abs = rest.unsigned_abs();
                let (secs, frac) = (abs / 1_000_000, abs % 1_000_000);
                if frac == 0 {
                    let _ = write!(out, "{sign}{secs}S");
                } else {
                    let frac = format!("{frac:06}");
                    let _ = write!(out, "{sign}{secs}.{}S", frac.trim_end_matches('0'));
                }
            }
        }

        if out == "P" {
            out.push_str("T0S");
        }
        out
    }
}

impl<'a> FromSql<'a> for Interval {
    fn from_sql(_ty: &Type, raw: &'a [u8]) -> Result<Self, Box<dyn Error + Sync + Send>> {
        if raw.len() != 16 {
            return Err(format!("invalid interval length {}", raw.len()).into());
        }
        Ok(Self {
            micros: i64::from_be_bytes(raw[0..8].try_into()?),
            days: i32::from_be_bytes(raw[8..12].try_into()?),
            months: i32::from_be_bytes(raw[12..16].try_into()?),
        })
    }

    fn accepts(ty: &Type) -> bool {
        *ty == Type::INTERVAL
    }
}

/// Label of a user-defined enum value, sent as UTF-8 text.
struct EnumLabel(String);

impl<'a> FromSql<'a> for EnumLabel {
    fn from_sql(_ty: &Type, raw: &'a [u8]) -> Result<Self, Box<dyn Error + Sync + Send>> {
        Ok(Self(std::str::from_utf8(raw)?.to_owned()))
    }

    fn accepts(ty: &Type) -> bool {
        matches!(ty.kind(), Kind::Enum(_))
    }
}
