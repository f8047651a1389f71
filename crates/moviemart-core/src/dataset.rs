//! Tabular dataset loader: turns a named CSV blob into a typed DataFrame.
//!
//! Source files come from several upstream exports with inconsistent
//! encodings, so decoding goes through a detection step (BOM, then UTF-8
//! validation of a sample, then Windows-1252) before the CSV parse.

use encoding_rs::{Encoding, UTF_8, WINDOWS_1252};
use polars::prelude::*;
use thiserror::Error;

use crate::column::ColumnValues;

const ENCODING_SAMPLE_BYTES: usize = 64 * 1024;

#[derive(Debug, Error)]
pub enum DatasetError {
    #[error("dataset {name}: failed to decode as {encoding}: {message}")]
    Decode {
        name: String,
        encoding: &'static str,
        message: String,
    },

    #[error("dataset {name}: CSV parse error: {source}")]
    Parse {
        name: String,
        #[source]
        source: csv::Error,
    },

    #[error("dataset {name}: {source}")]
    Polars {
        name: String,
        #[source]
        source: PolarsError,
    },
}

/// Decodes `bytes` and parses them as headered CSV. Column types are inferred
/// from a full pass over the values: all-integer columns become Int64,
/// all-numeric become Float64, everything else stays text. Empty fields (and
/// the literal `NaN` some exporters write) become nulls.
pub fn decode_csv(name: &str, bytes: &[u8]) -> Result<DataFrame, DatasetError> {
    let encoding = detect_encoding(bytes);
    let (text, _, had_errors) = encoding.decode(bytes);
    if had_errors {
        return Err(DatasetError::Decode {
            name: name.to_string(),
            encoding: encoding.name(),
            message: "input contains byte sequences invalid for the detected encoding".to_string(),
        });
    }

    tracing::debug!(dataset = name, encoding = encoding.name(), "decoded blob");

    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .from_reader(text.as_bytes());

    let headers = reader
        .headers()
        .map_err(|source| DatasetError::Parse {
            name: name.to_string(),
            source,
        })?
        .clone();

    let mut cells: Vec<Vec<Option<String>>> = vec![Vec::new(); headers.len()];
    for record in reader.records() {
        let record = record.map_err(|source| DatasetError::Parse {
            name: name.to_string(),
            source,
        })?;
        for (idx, column) in cells.iter_mut().enumerate() {
            column.push(normalize_cell(record.get(idx)));
        }
    }

    let columns: Vec<Column> = headers
        .iter()
        .zip(cells)
        .map(|(header, raw)| infer_column(raw).into_series(header).into())
        .collect();

    DataFrame::new(columns).map_err(|source| DatasetError::Polars {
        name: name.to_string(),
        source,
    })
}

fn normalize_cell(value: Option<&str>) -> Option<String> {
    let value = value?.trim();
    if value.is_empty() || value.eq_ignore_ascii_case("nan") {
        None
    } else {
        Some(value.to_string())
    }
}

/// BOM wins; otherwise a UTF-8-valid sample means UTF-8, with Windows-1252 as
/// the fallback for everything else.
fn detect_encoding(bytes: &[u8]) -> &'static Encoding {
    if let Some((encoding, _)) = Encoding::for_bom(bytes) {
        return encoding;
    }

    let sample = &bytes[..bytes.len().min(ENCODING_SAMPLE_BYTES)];
    match std::str::from_utf8(sample) {
        Ok(_) => UTF_8,
        // The sample may end mid-codepoint when truncated; only the tail can
        // be incomplete, so a failure within the last three bytes still
        // counts as UTF-8.
        Err(err)
            if sample.len() < bytes.len()
                && err.error_len().is_none()
                && err.valid_up_to() + 4 > sample.len() =>
        {
            UTF_8
        }
        Err(_) => WINDOWS_1252,
    }
}

fn infer_column(raw: Vec<Option<String>>) -> ColumnValues {
    let has_values = raw.iter().any(Option::is_some);

    if has_values && raw.iter().flatten().all(|v| v.parse::<i64>().is_ok()) {
        return ColumnValues::Int(
            raw.into_iter()
                .map(|v| v.and_then(|v| v.parse::<i64>().ok()))
                .collect(),
        );
    }

    if has_values
        && raw
            .iter()
            .flatten()
            .all(|v| v.parse::<f64>().map(f64::is_finite).unwrap_or(false))
    {
        return ColumnValues::Float(
            raw.into_iter()
                .map(|v| v.and_then(|v| v.parse::<f64>().ok()))
                .collect(),
        );
    }

    ColumnValues::Str(raw)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn infers_int_float_and_text_columns() {
        let data = b"id,rating,title\n1,7.5,Heat\n2,8.1,Ran\n3,,Alien\n";
        let df = decode_csv("test.csv", data).expect("decode");

        assert_eq!(df.height(), 3);
        assert_eq!(df.column("id").unwrap().dtype(), &DataType::Int64);
        assert_eq!(df.column("rating").unwrap().dtype(), &DataType::Float64);
        assert_eq!(df.column("title").unwrap().dtype(), &DataType::String);
        assert_eq!(df.column("rating").unwrap().f64().unwrap().get(2), None);
    }

    #[test]
    fn empty_and_nan_cells_become_null() {
        let data = b"year,votes\n2001,NaN\n,42\n";
        let df = decode_csv("test.csv", data).expect("decode");

        let years = df.column("year").unwrap().i64().unwrap();
        let votes = df.column("votes").unwrap().i64().unwrap();
        assert_eq!(years.get(0), Some(2001));
        assert_eq!(years.get(1), None);
        assert_eq!(votes.get(0), None);
        assert_eq!(votes.get(1), Some(42));
    }

    #[test]
    fn decodes_windows_1252_fallback() {
        // "Amélie" in Windows-1252: 0xE9 is not valid UTF-8.
        let data = b"title\nAm\xe9lie\n";
        let df = decode_csv("legacy.csv", data).expect("decode");
        let titles = df.column("title").unwrap().str().unwrap();
        assert_eq!(titles.get(0), Some("Am\u{e9}lie"));
    }

    #[test]
    fn utf8_bom_is_honored() {
        let data = b"\xef\xbb\xbfcode,name\nfr,France\n";
        let df = decode_csv("bom.csv", data).expect("decode");
        let codes = df.column("code").unwrap().str().unwrap();
        assert_eq!(codes.get(0), Some("fr"));
    }

    #[test]
    fn ragged_rows_report_a_parse_error() {
        let data = b"a,b\n1,2,3\n";
        let err = decode_csv("broken.csv", data).unwrap_err();
        assert!(matches!(err, DatasetError::Parse { .. }));
        assert!(err.to_string().contains("broken.csv"));
    }

    #[test]
    fn malformed_utf16_reports_a_decode_error() {
        // UTF-16LE BOM followed by an odd number of bytes: the final unit is
        // truncated and cannot decode.
        let data = b"\xff\xfea\x00b";
        let err = decode_csv("truncated.csv", data).unwrap_err();
        assert!(matches!(err, DatasetError::Decode { .. }));
    }
}
