//! Cell value coercion.
//!
//! Probe queries return cells of unknown runtime type. This module maps
//! each cell onto a finite tagged union (`CellValue`) and coerces it into
//! a numeric gauge reading or a classified failure (`Coerced`). Coercion
//! is total: it never fails, it only classifies.

use crate::config::ProbeMode;
use chrono::{DateTime, NaiveDateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{Row, TypeInfo, ValueRef};

/// A result cell reduced to its native kind
#[derive(Debug, Clone, PartialEq)]
pub enum CellValue {
    Integer(i64),
    Float(f64),
    Timestamp(DateTime<Utc>),
    Bool(bool),
    Null,
    Text(String),
    /// Any kind the coercer has no rule for; carries the SQL type name
    Other(String),
}

/// Outcome of coercing one cell
#[derive(Debug, Clone, PartialEq)]
pub enum Coerced {
    /// A numeric gauge value
    Number(f64),

    /// A label-mode reading: the label text plus its occurrence value
    Labeled { label: String, value: f64 },

    /// The cell cannot be represented as a number; raw text kept when known
    NotNumeric { raw: Option<String> },
}

/// Coerce a cell according to the probe's result-interpretation mode.
///
/// Float mode resolves by kind: integers and floats pass through,
/// timestamps become Unix epoch seconds, booleans 1.0/0.0, NULL is 0.0
/// (explicit policy, not NaN), and text is trimmed and parsed as a float
/// literal. Label mode turns the cell's text rendering into a metric
/// label with the gauge fixed at 1 (0 for NULL).
pub fn coerce(cell: &CellValue, mode: ProbeMode) -> Coerced {
    match mode {
        ProbeMode::Float => coerce_float(cell),
        ProbeMode::Label => coerce_label(cell),
    }
}

fn coerce_float(cell: &CellValue) -> Coerced {
    match cell {
        CellValue::Integer(v) => Coerced::Number(*v as f64),
        CellValue::Float(v) => Coerced::Number(*v),
        CellValue::Timestamp(t) => Coerced::Number(epoch_seconds(t)),
        CellValue::Bool(b) => Coerced::Number(if *b { 1.0 } else { 0.0 }),
        CellValue::Null => Coerced::Number(0.0),
        CellValue::Text(s) => match s.trim().parse::<f64>() {
            Ok(v) => Coerced::Number(v),
            Err(_) => Coerced::NotNumeric {
                raw: Some(s.clone()),
            },
        },
        CellValue::Other(_) => Coerced::NotNumeric { raw: None },
    }
}

fn coerce_label(cell: &CellValue) -> Coerced {
    match cell {
        CellValue::Null => Coerced::Labeled {
            label: String::new(),
            value: 0.0,
        },
        CellValue::Text(s) => Coerced::Labeled {
            label: s.clone(),
            value: 1.0,
        },
        CellValue::Integer(v) => Coerced::Labeled {
            label: v.to_string(),
            value: 1.0,
        },
        CellValue::Float(v) => Coerced::Labeled {
            label: v.to_string(),
            value: 1.0,
        },
        CellValue::Bool(b) => Coerced::Labeled {
            label: b.to_string(),
            value: 1.0,
        },
        CellValue::Timestamp(t) => Coerced::Labeled {
            label: t.to_rfc3339(),
            value: 1.0,
        },
        CellValue::Other(_) => Coerced::NotNumeric { raw: None },
    }
}

fn epoch_seconds(t: &DateTime<Utc>) -> f64 {
    t.timestamp_micros() as f64 / 1_000_000.0
}

/// Read one cell of a result row into its `CellValue` kind.
///
/// The mapping is keyed on the Postgres type name; anything not listed
/// (NUMERIC included - cast to float8 in the probe SQL) lands in `Other`.
pub fn read_cell(row: &PgRow, index: usize) -> CellValue {
    let raw = match row.try_get_raw(index) {
        Ok(raw) => raw,
        Err(_) => return CellValue::Other("unknown".to_string()),
    };

    if raw.is_null() {
        return CellValue::Null;
    }

    let type_name = raw.type_info().name().to_string();

    match type_name.as_str() {
        "INT2" => row
            .try_get::<i16, _>(index)
            .map(|v| CellValue::Integer(v as i64))
            .unwrap_or_else(|_| CellValue::Other(type_name)),
        "INT4" => row
            .try_get::<i32, _>(index)
            .map(|v| CellValue::Integer(v as i64))
            .unwrap_or_else(|_| CellValue::Other(type_name)),
        "INT8" => row
            .try_get::<i64, _>(index)
            .map(CellValue::Integer)
            .unwrap_or_else(|_| CellValue::Other(type_name)),
        "FLOAT4" => row
            .try_get::<f32, _>(index)
            .map(|v| CellValue::Float(v as f64))
            .unwrap_or_else(|_| CellValue::Other(type_name)),
        "FLOAT8" => row
            .try_get::<f64, _>(index)
            .map(CellValue::Float)
            .unwrap_or_else(|_| CellValue::Other(type_name)),
        "BOOL" => row
            .try_get::<bool, _>(index)
            .map(CellValue::Bool)
            .unwrap_or_else(|_| CellValue::Other(type_name)),
        "TIMESTAMPTZ" => row
            .try_get::<DateTime<Utc>, _>(index)
            .map(CellValue::Timestamp)
            .unwrap_or_else(|_| CellValue::Other(type_name)),
        "TIMESTAMP" => row
            .try_get::<NaiveDateTime, _>(index)
            .map(|t| CellValue::Timestamp(t.and_utc()))
            .unwrap_or_else(|_| CellValue::Other(type_name)),
        "TEXT" | "VARCHAR" | "BPCHAR" | "NAME" => row
            .try_get::<String, _>(index)
            .map(CellValue::Text)
            .unwrap_or_else(|_| CellValue::Other(type_name)),
        "BYTEA" => row
            .try_get::<Vec<u8>, _>(index)
            .map(|b| CellValue::Text(String::from_utf8_lossy(&b).into_owned()))
            .unwrap_or_else(|_| CellValue::Other(type_name)),
        _ => CellValue::Other(type_name),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_integer_casts_to_float() {
        assert_eq!(
            coerce(&CellValue::Integer(42), ProbeMode::Float),
            Coerced::Number(42.0)
        );
    }

    #[test]
    fn test_float_passes_through() {
        assert_eq!(
            coerce(&CellValue::Float(2.125), ProbeMode::Float),
            Coerced::Number(2.125)
        );
    }

    #[test]
    fn test_timestamp_becomes_epoch_seconds() {
        let t = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        match coerce(&CellValue::Timestamp(t), ProbeMode::Float) {
            Coerced::Number(v) => assert_eq!(v, 1_704_067_200.0),
            other => panic!("expected number, got {:?}", other),
        }
    }

    #[test]
    fn test_bool_is_one_or_zero() {
        assert_eq!(
            coerce(&CellValue::Bool(true), ProbeMode::Float),
            Coerced::Number(1.0)
        );
        assert_eq!(
            coerce(&CellValue::Bool(false), ProbeMode::Float),
            Coerced::Number(0.0)
        );
    }

    #[test]
    fn test_null_is_zero_not_nan() {
        match coerce(&CellValue::Null, ProbeMode::Float) {
            Coerced::Number(v) => {
                assert_eq!(v, 0.0);
                assert!(!v.is_nan());
            }
            other => panic!("expected number, got {:?}", other),
        }
    }

    #[test]
    fn test_text_parses_with_trimming() {
        assert_eq!(
            coerce(&CellValue::Text("  3.5 \n".to_string()), ProbeMode::Float),
            Coerced::Number(3.5)
        );
    }

    #[test]
    fn test_text_round_trip_within_epsilon() {
        let original = 1234.5678_f64;
        let text = CellValue::Text(original.to_string());
        match coerce(&text, ProbeMode::Float) {
            Coerced::Number(v) => assert!((v - original).abs() < f64::EPSILON),
            other => panic!("expected number, got {:?}", other),
        }
    }

    #[test]
    fn test_non_numeric_text_keeps_raw() {
        assert_eq!(
            coerce(&CellValue::Text("abc".to_string()), ProbeMode::Float),
            Coerced::NotNumeric {
                raw: Some("abc".to_string())
            }
        );
    }

    #[test]
    fn test_other_kind_has_no_raw() {
        assert_eq!(
            coerce(&CellValue::Other("NUMERIC".to_string()), ProbeMode::Float),
            Coerced::NotNumeric { raw: None }
        );
    }

    #[test]
    fn test_label_mode_text() {
        assert_eq!(
            coerce(&CellValue::Text("primary".to_string()), ProbeMode::Label),
            Coerced::Labeled {
                label: "primary".to_string(),
                value: 1.0
            }
        );
    }

    #[test]
    fn test_label_mode_null() {
        assert_eq!(
            coerce(&CellValue::Null, ProbeMode::Label),
            Coerced::Labeled {
                label: String::new(),
                value: 0.0
            }
        );
    }

    #[test]
    fn test_label_mode_renders_numbers() {
        assert_eq!(
            coerce(&CellValue::Integer(7), ProbeMode::Label),
            Coerced::Labeled {
                label: "7".to_string(),
                value: 1.0
            }
        );
    }
}
