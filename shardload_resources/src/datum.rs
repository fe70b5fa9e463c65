//! Column values.
//!
//! A [`Datum`] is one decoded, non-null column value. Every value has a text
//! representation (what the text bulk-load format carries) and a binary
//! representation (network byte order, what the binary format carries).
//! NULL is modelled as `Option<Datum>` by callers, never as a variant.

use std::fmt;

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use snafu::{ResultExt, Snafu, ensure};

/// Microseconds between 1970-01-01 and 2000-01-01, the binary epoch.
const BINARY_EPOCH_OFFSET_MICROS: i64 = 946_684_800_000_000;
/// Days between 1970-01-01 and 2000-01-01.
const BINARY_EPOCH_OFFSET_DAYS: i32 = 10_957;

#[derive(Debug, Clone, PartialEq, Snafu)]
#[snafu(visibility(pub))]
pub enum DatumError {
    #[snafu(display("invalid input syntax for type {column_type}: \"{input}\""))]
    InvalidInput {
        column_type: ColumnType,
        input: String,
    },
    #[snafu(display("invalid {column_type} integer value \"{input}\""))]
    InvalidInteger {
        column_type: ColumnType,
        input: String,
        source: std::num::ParseIntError,
    },
    #[snafu(display("invalid binary value for type {column_type}: {message}"))]
    InvalidBinary {
        column_type: ColumnType,
        message: String,
    },
    #[snafu(display("value of type {actual} does not match column type {expected}"))]
    TypeMismatch {
        expected: ColumnType,
        actual: ColumnType,
    },
}

pub type DatumResult<T, E = DatumError> = std::result::Result<T, E>;

/// Column types understood by the codecs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ColumnType {
    Bool,
    Int16,
    Int32,
    Int64,
    Float64,
    Text,
    Bytea,
    /// Days since 1970-01-01.
    Date,
    /// Microseconds since 1970-01-01 00:00:00 UTC.
    Timestamp,
}

/// A non-null column value.
#[derive(Debug, Clone, PartialEq)]
pub enum Datum {
    Bool(bool),
    Int16(i16),
    Int32(i32),
    Int64(i64),
    Float64(f64),
    Text(String),
    Bytea(Vec<u8>),
    Date(i32),
    Timestamp(i64),
}

impl ColumnType {
    pub fn name(&self) -> &'static str {
        match self {
            ColumnType::Bool => "bool",
            ColumnType::Int16 => "int2",
            ColumnType::Int32 => "int4",
            ColumnType::Int64 => "int8",
            ColumnType::Float64 => "float8",
            ColumnType::Text => "text",
            ColumnType::Bytea => "bytea",
            ColumnType::Date => "date",
            ColumnType::Timestamp => "timestamp",
        }
    }

    /// Parses the text representation of a value of this type.
    pub fn parse_text(&self, input: &str) -> DatumResult<Datum> {
        let column_type = *self;
        let invalid = || InvalidInputSnafu {
            column_type,
            input: input.to_string(),
        };

        match self {
            ColumnType::Bool => match input.trim().to_ascii_lowercase().as_str() {
                "t" | "true" | "y" | "yes" | "on" | "1" => Ok(Datum::Bool(true)),
                "f" | "false" | "n" | "no" | "off" | "0" => Ok(Datum::Bool(false)),
                _ => invalid().fail(),
            },
            ColumnType::Int16 => input
                .trim()
                .parse::<i16>()
                .map(Datum::Int16)
                .context(InvalidIntegerSnafu {
                    column_type,
                    input,
                }),
            ColumnType::Int32 => input
                .trim()
                .parse::<i32>()
                .map(Datum::Int32)
                .context(InvalidIntegerSnafu {
                    column_type,
                    input,
                }),
            ColumnType::Int64 => input
                .trim()
                .parse::<i64>()
                .map(Datum::Int64)
                .context(InvalidIntegerSnafu {
                    column_type,
                    input,
                }),
            ColumnType::Float64 => {
                let value = match input.trim() {
                    "NaN" => f64::NAN,
                    "Infinity" => f64::INFINITY,
                    "-Infinity" => f64::NEG_INFINITY,
                    other => other.parse::<f64>().map_err(|_| invalid().build())?,
                };
                Ok(Datum::Float64(value))
            }
            ColumnType::Text => Ok(Datum::Text(input.to_string())),
            ColumnType::Bytea => match input.strip_prefix("\\x") {
                Some(hex) => decode_hex(hex)
                    .map(Datum::Bytea)
                    .ok_or_else(|| invalid().build()),
                None => Ok(Datum::Bytea(input.as_bytes().to_vec())),
            },
            ColumnType::Date => {
                let date = NaiveDate::parse_from_str(input.trim(), "%Y-%m-%d")
                    .map_err(|_| invalid().build())?;
                Ok(Datum::Date(days_since_unix_epoch(date)))
            }
            ColumnType::Timestamp => {
                let input = input.trim();
                let micros = if let Ok(ts) = DateTime::parse_from_rfc3339(input) {
                    ts.timestamp_micros()
                } else {
                    ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"]
                        .iter()
                        .find_map(|fmt| NaiveDateTime::parse_from_str(input, fmt).ok())
                        .map(|ts| ts.and_utc().timestamp_micros())
                        .ok_or_else(|| invalid().build())?
                };
                Ok(Datum::Timestamp(micros))
            }
        }
    }

    /// Decodes the binary representation of a value of this type.
    pub fn decode_binary(&self, data: &[u8]) -> DatumResult<Datum> {
        let column_type = *self;
        let fixed = |len: usize| -> DatumResult<()> {
            ensure!(
                data.len() == len,
                InvalidBinarySnafu {
                    column_type,
                    message: format!("expected {len} bytes, got {}", data.len()),
                }
            );
            Ok(())
        };

        match self {
            ColumnType::Bool => {
                fixed(1)?;
                Ok(Datum::Bool(data[0] != 0))
            }
            ColumnType::Int16 => {
                fixed(2)?;
                Ok(Datum::Int16(i16::from_be_bytes([data[0], data[1]])))
            }
            ColumnType::Int32 => {
                fixed(4)?;
                Ok(Datum::Int32(i32::from_be_bytes(be_array(data))))
            }
            ColumnType::Int64 => {
                fixed(8)?;
                Ok(Datum::Int64(i64::from_be_bytes(be_array(data))))
            }
            ColumnType::Float64 => {
                fixed(8)?;
                Ok(Datum::Float64(f64::from_bits(u64::from_be_bytes(
                    be_array(data),
                ))))
            }
            ColumnType::Text => String::from_utf8(data.to_vec())
                .map(Datum::Text)
                .map_err(|err| {
                    InvalidBinarySnafu {
                        column_type,
                        message: err.to_string(),
                    }
                    .build()
                }),
            ColumnType::Bytea => Ok(Datum::Bytea(data.to_vec())),
            ColumnType::Date => {
                fixed(4)?;
                let days = i32::from_be_bytes(be_array(data));
                Ok(Datum::Date(days.saturating_add(BINARY_EPOCH_OFFSET_DAYS)))
            }
            ColumnType::Timestamp => {
                fixed(8)?;
                let micros = i64::from_be_bytes(be_array(data));
                Ok(Datum::Timestamp(
                    micros.saturating_add(BINARY_EPOCH_OFFSET_MICROS),
                ))
            }
        }
    }
}

impl Datum {
    pub fn column_type(&self) -> ColumnType {
        match self {
            Datum::Bool(_) => ColumnType::Bool,
            Datum::Int16(_) => ColumnType::Int16,
            Datum::Int32(_) => ColumnType::Int32,
            Datum::Int64(_) => ColumnType::Int64,
            Datum::Float64(_) => ColumnType::Float64,
            Datum::Text(_) => ColumnType::Text,
            Datum::Bytea(_) => ColumnType::Bytea,
            Datum::Date(_) => ColumnType::Date,
            Datum::Timestamp(_) => ColumnType::Timestamp,
        }
    }

    /// Checks that the value can be stored in a column of the given type.
    pub fn check_type(&self, expected: ColumnType) -> DatumResult<()> {
        let actual = self.column_type();
        ensure!(actual == expected, TypeMismatchSnafu { expected, actual });
        Ok(())
    }

    /// Returns the text representation of the value.
    pub fn to_text(&self) -> String {
        match self {
            Datum::Bool(true) => "t".to_string(),
            Datum::Bool(false) => "f".to_string(),
            Datum::Int16(v) => v.to_string(),
            Datum::Int32(v) => v.to_string(),
            Datum::Int64(v) => v.to_string(),
            Datum::Float64(v) if v.is_nan() => "NaN".to_string(),
            Datum::Float64(v) if v.is_infinite() && *v > 0.0 => "Infinity".to_string(),
            Datum::Float64(v) if v.is_infinite() => "-Infinity".to_string(),
            Datum::Float64(v) => v.to_string(),
            Datum::Text(v) => v.clone(),
            Datum::Bytea(v) => {
                let mut out = String::with_capacity(2 + v.len() * 2);
                out.push_str("\\x");
                for byte in v {
                    out.push_str(&format!("{byte:02x}"));
                }
                out
            }
            Datum::Date(days) => NaiveDate::default()
                .checked_add_signed(chrono::Duration::days(i64::from(*days)))
                .map(|date| date.format("%Y-%m-%d").to_string())
                .unwrap_or_else(|| days.to_string()),
            Datum::Timestamp(micros) => DateTime::from_timestamp_micros(*micros)
                .map(|ts| ts.naive_utc().format("%Y-%m-%d %H:%M:%S%.f").to_string())
                .unwrap_or_else(|| micros.to_string()),
        }
    }

    /// Appends the binary representation of the value to `out`.
    pub fn write_binary(&self, out: &mut Vec<u8>) {
        match self {
            Datum::Bool(v) => out.push(u8::from(*v)),
            Datum::Int16(v) => out.extend_from_slice(&v.to_be_bytes()),
            Datum::Int32(v) => out.extend_from_slice(&v.to_be_bytes()),
            Datum::Int64(v) => out.extend_from_slice(&v.to_be_bytes()),
            Datum::Float64(v) => out.extend_from_slice(&v.to_bits().to_be_bytes()),
            Datum::Text(v) => out.extend_from_slice(v.as_bytes()),
            Datum::Bytea(v) => out.extend_from_slice(v),
            Datum::Date(days) => out.extend_from_slice(
                &days
                    .saturating_sub(BINARY_EPOCH_OFFSET_DAYS)
                    .to_be_bytes(),
            ),
            Datum::Timestamp(micros) => out.extend_from_slice(
                &micros
                    .saturating_sub(BINARY_EPOCH_OFFSET_MICROS)
                    .to_be_bytes(),
            ),
        }
    }

    /// Returns the binary representation of the value.
    pub fn to_binary(&self) -> Vec<u8> {
        let mut out = Vec::new();
        self.write_binary(&mut out);
        out
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl fmt::Display for Datum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_text())
    }
}

fn be_array<const N: usize>(data: &[u8]) -> [u8; N] {
    let mut out = [0u8; N];
    out.copy_from_slice(&data[..N]);
    out
}

fn days_since_unix_epoch(date: NaiveDate) -> i32 {
    let days = date.signed_duration_since(NaiveDate::default()).num_days();
    days.clamp(i64::from(i32::MIN), i64::from(i32::MAX)) as i32
}

fn decode_hex(hex: &str) -> Option<Vec<u8>> {
    if hex.len() % 2 != 0 {
        return None;
    }

    hex.as_bytes()
        .chunks(2)
        .map(|pair| {
            let pair = std::str::from_utf8(pair).ok()?;
            u8::from_str_radix(pair, 16).ok()
        })
        .collect()
}
