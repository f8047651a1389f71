//! Statement builders and row materialization for the warehouse writer.
//!
//! Identifiers are double-quoted and values always go through `$n`
//! placeholders; nothing from the data ever lands in statement text.

use polars::prelude::*;

use crate::WarehouseError;

/// One bound value. The variant carries the column's SQL type so nulls bind
/// with the right type information.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Int(Option<i64>),
    Float(Option<f64>),
    Text(Option<String>),
    Bool(Option<bool>),
}

impl SqlValue {
    /// Case-normalized key rendering used for incremental-load comparison.
    pub fn key_string(&self) -> Option<String> {
        match self {
            SqlValue::Int(value) => value.map(|v| v.to_string()),
            SqlValue::Float(value) => value.map(|v| v.to_string()),
            SqlValue::Text(value) => value.as_ref().map(|v| v.to_lowercase()),
            SqlValue::Bool(value) => value.map(|v| v.to_string()),
        }
    }
}

pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn sql_type(dtype: &DataType) -> Option<&'static str> {
    match dtype {
        DataType::Int64 => Some("BIGINT"),
        DataType::Float64 => Some("DOUBLE PRECISION"),
        DataType::String => Some("TEXT"),
        DataType::Boolean => Some("BOOLEAN"),
        _ => None,
    }
}

pub fn drop_table_sql(table: &str) -> String {
    format!("DROP TABLE IF EXISTS {}", quote_ident(table))
}

pub fn create_table_sql(table: &str, frame: &DataFrame) -> Result<String, WarehouseError> {
    let mut columns = Vec::with_capacity(frame.width());
    for column in frame.get_columns() {
        let ty = sql_type(column.dtype()).ok_or_else(|| WarehouseError::UnsupportedType {
            table: table.to_string(),
            column: column.name().to_string(),
            dtype: column.dtype().to_string(),
        })?;
        columns.push(format!("{} {}", quote_ident(column.name()), ty));
    }
    Ok(format!(
        "CREATE TABLE {} ({})",
        quote_ident(table),
        columns.join(", ")
    ))
}

/// Multi-row insert with `$n` placeholders, numbered row-major.
pub fn insert_sql(table: &str, columns: &[String], row_count: usize) -> String {
    let quoted: Vec<String> = columns.iter().map(|c| quote_ident(c)).collect();
    let mut rows = Vec::with_capacity(row_count);
    let mut placeholder = 1usize;
    for _ in 0..row_count {
        let mut row = Vec::with_capacity(columns.len());
        for _ in columns {
            row.push(format!("${placeholder}"));
            placeholder += 1;
        }
        rows.push(format!("({})", row.join(", ")));
    }
    format!(
        "INSERT INTO {} ({}) VALUES {}",
        quote_ident(table),
        quoted.join(", "),
        rows.join(", ")
    )
}

/// Key statements applied after a replace-mode load: retype each key column
/// (VARCHAR(20) for text keys, BIGINT otherwise), force NOT NULL, then declare
/// the primary key over the full key set.
pub fn primary_key_statements(
    table: &str,
    frame: &DataFrame,
    keys: &[String],
) -> Result<Vec<String>, WarehouseError> {
    let mut statements = Vec::new();
    for key in keys {
        let column = frame
            .column(key)
            .map_err(|_| WarehouseError::MissingKey {
                table: table.to_string(),
                key: key.clone(),
            })?;
        let ty = match column.dtype() {
            DataType::String => "VARCHAR(20)",
            DataType::Int64 => "BIGINT",
            other => {
                return Err(WarehouseError::UnsupportedType {
                    table: table.to_string(),
                    column: key.clone(),
                    dtype: other.to_string(),
                })
            }
        };
        statements.push(format!(
            "ALTER TABLE {} ALTER COLUMN {} TYPE {}, ALTER COLUMN {} SET NOT NULL",
            quote_ident(table),
            quote_ident(key),
            ty,
            quote_ident(key),
        ));
    }

    let key_list: Vec<String> = keys.iter().map(|k| quote_ident(k)).collect();
    statements.push(format!(
        "ALTER TABLE {} ADD CONSTRAINT {} PRIMARY KEY ({})",
        quote_ident(table),
        quote_ident(&format!("PK_{table}")),
        key_list.join(", ")
    ));
    Ok(statements)
}

/// Foreign key declared NOT VALID: existing rows are not checked, matching
/// the source system's behavior for the fact table.
pub fn foreign_key_statement(
    table: &str,
    column: &str,
    referenced_table: &str,
    referenced_column: &str,
) -> String {
    format!(
        "ALTER TABLE {} ADD CONSTRAINT {} FOREIGN KEY ({}) REFERENCES {} ({}) NOT VALID",
        quote_ident(table),
        quote_ident(&format!("FK_{referenced_table}")),
        quote_ident(column),
        quote_ident(referenced_table),
        quote_ident(referenced_column),
    )
}

/// Materializes the frame into bindable rows, row-major.
pub fn frame_rows(table: &str, frame: &DataFrame) -> Result<Vec<Vec<SqlValue>>, WarehouseError> {
    let height = frame.height();
    let mut columns: Vec<Vec<SqlValue>> = Vec::with_capacity(frame.width());

    for column in frame.get_columns() {
        let series = column.as_materialized_series();
        let values: Vec<SqlValue> = match series.dtype() {
            DataType::Int64 => series.i64()?.into_iter().map(SqlValue::Int).collect(),
            DataType::Float64 => series.f64()?.into_iter().map(SqlValue::Float).collect(),
            DataType::String => series
                .str()?
                .into_iter()
                .map(|v| SqlValue::Text(v.map(str::to_string)))
                .collect(),
            DataType::Boolean => series.bool()?.into_iter().map(SqlValue::Bool).collect(),
            other => {
                return Err(WarehouseError::UnsupportedType {
                    table: table.to_string(),
                    column: column.name().to_string(),
                    dtype: other.to_string(),
                })
            }
        };
        columns.push(values);
    }

    let mut rows = Vec::with_capacity(height);
    for idx in 0..height {
        rows.push(columns.iter().map(|col| col[idx].clone()).collect());
    }
    Ok(rows)
}

/// Keeps the rows whose key is not already present. A row with a null key
/// cannot be deduplicated and passes through.
pub fn filter_new_rows(
    rows: &[Vec<SqlValue>],
    key_idx: usize,
    existing: &std::collections::HashSet<String>,
) -> Vec<Vec<SqlValue>> {
    rows.iter()
        .filter(|row| match row[key_idx].key_string() {
            Some(key) => !existing.contains(&key),
            None => true,
        })
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identifiers_are_quoted_and_escaped() {
        assert_eq!(quote_ident("Country_dim"), "\"Country_dim\"");
        assert_eq!(quote_ident("we\"ird"), "\"we\"\"ird\"");
    }

    #[test]
    fn create_table_maps_frame_dtypes() {
        let frame = df![
            "GenreID" => [1i64],
            "GenreName" => ["Action"],
            "Rating" => [7.5f64],
            "IsEnglishSpeaking" => [true]
        ]
        .expect("construct dataframe");

        let sql = create_table_sql("Genre_dim", &frame).expect("render");
        assert_eq!(
            sql,
            "CREATE TABLE \"Genre_dim\" (\"GenreID\" BIGINT, \"GenreName\" TEXT, \
             \"Rating\" DOUBLE PRECISION, \"IsEnglishSpeaking\" BOOLEAN)"
        );
    }

    #[test]
    fn insert_placeholders_are_numbered_row_major() {
        let sql = insert_sql(
            "Genre_dim",
            &["GenreID".to_string(), "GenreName".to_string()],
            2,
        );
        assert_eq!(
            sql,
            "INSERT INTO \"Genre_dim\" (\"GenreID\", \"GenreName\") \
             VALUES ($1, $2), ($3, $4)"
        );
    }

    #[test]
    fn primary_key_statements_retype_string_and_int_keys() {
        let frame = df![
            "MovieID" => ["tt0001"],
            "GenreID" => [28i64],
            "Rating" => [7.5f64]
        ]
        .expect("construct dataframe");

        let statements = primary_key_statements(
            "MovieGenreFact_dim",
            &frame,
            &["MovieID".to_string(), "GenreID".to_string()],
        )
        .expect("render");

        assert_eq!(statements.len(), 3);
        assert!(statements[0].contains("VARCHAR(20)"));
        assert!(statements[1].contains("BIGINT"));
        assert_eq!(
            statements[2],
            "ALTER TABLE \"MovieGenreFact_dim\" ADD CONSTRAINT \"PK_MovieGenreFact_dim\" \
             PRIMARY KEY (\"MovieID\", \"GenreID\")"
        );
    }

    #[test]
    fn foreign_keys_are_declared_not_valid() {
        let sql = foreign_key_statement("MovieGenreFact_dim", "GenreID", "Genre_dim", "GenreID");
        assert_eq!(
            sql,
            "ALTER TABLE \"MovieGenreFact_dim\" ADD CONSTRAINT \"FK_Genre_dim\" \
             FOREIGN KEY (\"GenreID\") REFERENCES \"Genre_dim\" (\"GenreID\") NOT VALID"
        );
    }

    #[test]
    fn frame_rows_are_row_major_with_typed_nulls() {
        let frame = df![
            "id" => [Some(1i64), None],
            "name" => [Some("a"), Some("b")]
        ]
        .expect("construct dataframe");

        let rows = frame_rows("t", &frame).expect("rows");
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0][0], SqlValue::Int(Some(1)));
        assert_eq!(rows[1][0], SqlValue::Int(None));
        assert_eq!(rows[1][1], SqlValue::Text(Some("b".to_string())));
    }

    #[test]
    fn overlapping_keys_are_filtered_case_insensitively() {
        let rows = vec![
            vec![SqlValue::Text(Some("US".to_string()))],
            vec![SqlValue::Text(Some("fr".to_string()))],
            vec![SqlValue::Text(None)],
        ];
        let existing: std::collections::HashSet<String> = ["us".to_string()].into_iter().collect();

        let fresh = filter_new_rows(&rows, 0, &existing);
        assert_eq!(fresh.len(), 2);
        assert_eq!(fresh[0][0], SqlValue::Text(Some("fr".to_string())));
        assert_eq!(fresh[1][0], SqlValue::Text(None));
    }

    #[test]
    fn key_strings_are_case_normalized() {
        assert_eq!(
            SqlValue::Text(Some("TT0001".to_string())).key_string(),
            Some("tt0001".to_string())
        );
        assert_eq!(SqlValue::Int(Some(5)).key_string(), Some("5".to_string()));
        assert_eq!(SqlValue::Text(None).key_string(), None);
    }
}
