//! Typed column materialization shared by the dimension builder and the fact
//! assembler. Transform code works on plain vectors so row order stays under
//! our control instead of depending on join/explode internals.

use polars::prelude::*;

/// A single column pulled out of a DataFrame into owned, typed storage.
#[derive(Debug, Clone, PartialEq)]
pub enum ColumnValues {
    Int(Vec<Option<i64>>),
    Float(Vec<Option<f64>>),
    Str(Vec<Option<String>>),
    Bool(Vec<Option<bool>>),
}

impl ColumnValues {
    /// Materializes a polars column. Integer and float widths are normalized
    /// to i64/f64; anything that is not numeric or boolean is read as text.
    pub fn from_column(column: &Column) -> PolarsResult<Self> {
        let series = column.as_materialized_series();
        match series.dtype() {
            DataType::Int8
            | DataType::Int16
            | DataType::Int32
            | DataType::Int64
            | DataType::UInt8
            | DataType::UInt16
            | DataType::UInt32
            | DataType::UInt64 => {
                let cast = series.cast(&DataType::Int64)?;
                Ok(ColumnValues::Int(cast.i64()?.into_iter().collect()))
            }
            DataType::Float32 | DataType::Float64 => {
                let cast = series.cast(&DataType::Float64)?;
                Ok(ColumnValues::Float(cast.f64()?.into_iter().collect()))
            }
            DataType::Boolean => Ok(ColumnValues::Bool(series.bool()?.into_iter().collect())),
            DataType::String => Ok(ColumnValues::Str(
                series
                    .str()?
                    .into_iter()
                    .map(|value| value.map(str::to_string))
                    .collect(),
            )),
            _ => {
                let cast = series.cast(&DataType::String)?;
                Ok(ColumnValues::Str(
                    cast.str()?
                        .into_iter()
                        .map(|value| value.map(str::to_string))
                        .collect(),
                ))
            }
        }
    }

    pub fn len(&self) -> usize {
        match self {
            ColumnValues::Int(values) => values.len(),
            ColumnValues::Float(values) => values.len(),
            ColumnValues::Str(values) => values.len(),
            ColumnValues::Bool(values) => values.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Appends an unambiguous encoding of the value at `idx` to a row
    /// fingerprint. Floats are encoded by bit pattern so -0.0 and 0.0 stay
    /// distinct and the fingerprint is stable across runs.
    pub fn write_fingerprint(&self, idx: usize, out: &mut String) {
        use std::fmt::Write;
        match self {
            ColumnValues::Int(values) => match values[idx] {
                Some(value) => {
                    let _ = write!(out, "i{value}");
                }
                None => out.push('n'),
            },
            ColumnValues::Float(values) => match values[idx] {
                Some(value) => {
                    let _ = write!(out, "f{:x}", value.to_bits());
                }
                None => out.push('n'),
            },
            ColumnValues::Str(values) => match &values[idx] {
                Some(value) => {
                    let _ = write!(out, "s{}:{value}", value.len());
                }
                None => out.push('n'),
            },
            ColumnValues::Bool(values) => match values[idx] {
                Some(value) => {
                    out.push(if value { 't' } else { 'b' });
                }
                None => out.push('n'),
            },
        }
        out.push('\u{1f}');
    }

    /// Like `write_fingerprint`, but case-folds text so key comparison
    /// matches the warehouse's case-normalized key handling.
    pub fn write_key_fingerprint(&self, idx: usize, out: &mut String) {
        use std::fmt::Write;
        match self {
            ColumnValues::Str(values) => {
                match &values[idx] {
                    Some(value) => {
                        let folded = value.to_lowercase();
                        let _ = write!(out, "s{}:{folded}", folded.len());
                    }
                    None => out.push('n'),
                }
                out.push('\u{1f}');
            }
            other => other.write_fingerprint(idx, out),
        }
    }

    /// Builds a new column holding the rows at `indices`, in that order.
    pub fn take(&self, indices: &[usize]) -> ColumnValues {
        match self {
            ColumnValues::Int(values) => {
                ColumnValues::Int(indices.iter().map(|&idx| values[idx]).collect())
            }
            ColumnValues::Float(values) => {
                ColumnValues::Float(indices.iter().map(|&idx| values[idx]).collect())
            }
            ColumnValues::Str(values) => {
                ColumnValues::Str(indices.iter().map(|&idx| values[idx].clone()).collect())
            }
            ColumnValues::Bool(values) => {
                ColumnValues::Bool(indices.iter().map(|&idx| values[idx]).collect())
            }
        }
    }

    /// Coerces the column to owned strings, rendering numerics with their
    /// standard formatting. Nulls stay null.
    pub fn into_strings(self) -> Vec<Option<String>> {
        match self {
            ColumnValues::Int(values) => values
                .into_iter()
                .map(|value| value.map(|v| v.to_string()))
                .collect(),
            ColumnValues::Float(values) => values
                .into_iter()
                .map(|value| value.map(|v| v.to_string()))
                .collect(),
            ColumnValues::Str(values) => values,
            ColumnValues::Bool(values) => values
                .into_iter()
                .map(|value| value.map(|v| v.to_string()))
                .collect(),
        }
    }

    pub fn into_series(self, name: &str) -> Series {
        match self {
            ColumnValues::Int(values) => Series::new(name.into(), values),
            ColumnValues::Float(values) => Series::new(name.into(), values),
            ColumnValues::Str(values) => Series::new(name.into(), values),
            ColumnValues::Bool(values) => Series::new(name.into(), values),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn materializes_and_rebuilds_typed_columns() {
        let df = df![
            "id" => [Some(1i64), None, Some(3)],
            "name" => [Some("a"), Some("b"), None]
        ]
        .expect("construct dataframe");

        let ids = ColumnValues::from_column(df.column("id").unwrap()).unwrap();
        assert_eq!(ids, ColumnValues::Int(vec![Some(1), None, Some(3)]));

        let taken = ids.take(&[2, 0]);
        assert_eq!(taken, ColumnValues::Int(vec![Some(3), Some(1)]));

        let series = taken.into_series("id");
        assert_eq!(series.i64().unwrap().get(0), Some(3));
    }

    #[test]
    fn key_fingerprints_are_case_folded() {
        let col = ColumnValues::Str(vec![Some("US".to_string()), Some("us".to_string())]);
        let mut first = String::new();
        let mut second = String::new();
        col.write_key_fingerprint(0, &mut first);
        col.write_key_fingerprint(1, &mut second);
        assert_eq!(first, second);

        let mut plain = String::new();
        col.write_fingerprint(0, &mut plain);
        assert_ne!(plain, second);
    }

    #[test]
    fn fingerprints_distinguish_null_and_empty() {
        let col = ColumnValues::Str(vec![Some(String::new()), None]);
        let mut empty = String::new();
        let mut null = String::new();
        col.write_fingerprint(0, &mut empty);
        col.write_fingerprint(1, &mut null);
        assert_ne!(empty, null);
    }
}
