//! Normalization of the catalog's genre field.
//!
//! Upstream exports have encoded this column three different ways over time:
//! a native integer, a stringified list (`"[28, 12]"`), or nothing at all.
//! Everything funnels through one total function; malformed input normalizes
//! to `Empty` instead of failing the row.

use polars::prelude::AnyValue;
use serde_json::Value;

/// The genre field of a single catalog row, after normalization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GenreField {
    Empty,
    Single(i64),
    List(Vec<i64>),
}

impl GenreField {
    /// The genre IDs in source order. `Empty` yields nothing.
    pub fn ids(&self) -> &[i64] {
        match self {
            GenreField::Empty => &[],
            GenreField::Single(id) => std::slice::from_ref(id),
            GenreField::List(ids) => ids.as_slice(),
        }
    }
}

/// Normalizes one cell of the genre column. Never errors.
pub fn parse_genre_field(value: &AnyValue<'_>) -> GenreField {
    match value {
        AnyValue::Null => GenreField::Empty,
        AnyValue::Int8(v) => GenreField::Single(i64::from(*v)),
        AnyValue::Int16(v) => GenreField::Single(i64::from(*v)),
        AnyValue::Int32(v) => GenreField::Single(i64::from(*v)),
        AnyValue::Int64(v) => GenreField::Single(*v),
        AnyValue::UInt8(v) => GenreField::Single(i64::from(*v)),
        AnyValue::UInt16(v) => GenreField::Single(i64::from(*v)),
        AnyValue::UInt32(v) => GenreField::Single(i64::from(*v)),
        AnyValue::Float32(v) => float_to_genre(f64::from(*v)),
        AnyValue::Float64(v) => float_to_genre(*v),
        AnyValue::String(text) => parse_genre_text(text),
        AnyValue::StringOwned(text) => parse_genre_text(text.as_str()),
        _ => GenreField::Empty,
    }
}

fn float_to_genre(value: f64) -> GenreField {
    if value.is_finite() && value.fract() == 0.0 {
        GenreField::Single(value as i64)
    } else {
        GenreField::Empty
    }
}

fn parse_genre_text(text: &str) -> GenreField {
    let trimmed = text.trim();
    if trimmed.is_empty() || trimmed == "[]" {
        return GenreField::Empty;
    }

    // Stringified lists are valid JSON often enough that one parse covers
    // both the JSON and the Python-literal spelling of an integer array.
    if let Ok(value) = serde_json::from_str::<Value>(trimmed) {
        match value {
            Value::Number(number) => {
                return number
                    .as_i64()
                    .map(GenreField::Single)
                    .unwrap_or(GenreField::Empty);
            }
            Value::Array(items) => {
                let mut ids = Vec::with_capacity(items.len());
                for item in items {
                    match item.as_i64() {
                        Some(id) => ids.push(id),
                        None => return GenreField::Empty,
                    }
                }
                return if ids.is_empty() {
                    GenreField::Empty
                } else {
                    GenreField::List(ids)
                };
            }
            _ => return GenreField::Empty,
        }
    }

    // Bracketed lists that are not strict JSON, e.g. "[28, 12,]".
    if let Some(inner) = trimmed
        .strip_prefix('[')
        .and_then(|rest| rest.strip_suffix(']'))
    {
        let mut ids = Vec::new();
        for part in inner.split(',') {
            let part = part.trim();
            if part.is_empty() {
                continue;
            }
            match part.parse::<i64>() {
                Ok(id) => ids.push(id),
                Err(_) => return GenreField::Empty,
            }
        }
        return if ids.is_empty() {
            GenreField::Empty
        } else {
            GenreField::List(ids)
        };
    }

    GenreField::Empty
}
