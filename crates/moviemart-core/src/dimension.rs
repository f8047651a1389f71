//! Dimension builder: projects and renames source columns, deduplicates (by
//! primary key for natural-key dimensions, by full row otherwise), and
//! attaches either an existing natural key or a generated dense surrogate
//! key.

use std::collections::{HashMap, HashSet};

use once_cell::sync::Lazy;
use polars::prelude::*;
use thiserror::Error;

use crate::column::ColumnValues;

#[derive(Debug, Error)]
pub enum DimensionError {
    #[error("dimension {dimension}: source column {column} not found")]
    MissingColumn { dimension: String, column: String },

    #[error("dimension {dimension}: primary key column {key} not present after renaming")]
    MissingPrimaryKey { dimension: String, key: String },

    #[error("dimension {dimension}: {source}")]
    Polars {
        dimension: String,
        #[source]
        source: PolarsError,
    },
}

#[derive(Debug, Clone)]
pub enum KeyStrategy {
    /// One of the renamed columns is the primary key.
    Existing(String),
    /// A dense 1..=n integer key is generated per surviving row, under the
    /// given column name.
    Generated(String),
}

#[derive(Debug, Clone)]
pub struct DimensionSpec {
    pub name: String,
    /// Ordered (source column, target column) pairs; only these survive.
    pub columns: Vec<(String, String)>,
    pub key: KeyStrategy,
}

/// A built dimension table plus the metadata later stages need: which column
/// is the key and which renamed columns are plain attributes (the attribute
/// list scopes the columns dropped from raw tables before fact assembly).
#[derive(Debug, Clone)]
pub struct Dimension {
    pub name: String,
    pub table: DataFrame,
    pub primary_key: String,
    pub attributes: Vec<String>,
}

pub fn build_dimension(df: &DataFrame, spec: &DimensionSpec) -> Result<Dimension, DimensionError> {
    let mut projected: Vec<(String, ColumnValues)> = Vec::with_capacity(spec.columns.len());
    for (source, target) in &spec.columns {
        let column = df
            .column(source)
            .map_err(|_| DimensionError::MissingColumn {
                dimension: spec.name.clone(),
                column: source.clone(),
            })?;
        let values =
            ColumnValues::from_column(column).map_err(|source| DimensionError::Polars {
                dimension: spec.name.clone(),
                source,
            })?;
        projected.push((target.clone(), values));
    }

    let height = projected.first().map(|(_, v)| v.len()).unwrap_or(0);

    let key_idx = match &spec.key {
        KeyStrategy::Existing(key) => Some(
            spec.columns
                .iter()
                .position(|(_, target)| target == key)
                .ok_or_else(|| DimensionError::MissingPrimaryKey {
                    dimension: spec.name.clone(),
                    key: key.clone(),
                })?,
        ),
        KeyStrategy::Generated(_) => None,
    };

    // First-occurrence dedup, so output order follows source order and
    // repeated builds are byte-identical. Natural-key dimensions dedup on the
    // key alone (case-folded for text, matching the warehouse's key
    // comparison) so the primary key constraint cannot see a duplicate;
    // generated-key dimensions dedup on the full projected row.
    let mut seen: HashSet<String> = HashSet::with_capacity(height);
    let mut keep: Vec<usize> = Vec::with_capacity(height);
    let mut fingerprint = String::new();
    for idx in 0..height {
        fingerprint.clear();
        match key_idx {
            Some(key_idx) => projected[key_idx].1.write_key_fingerprint(idx, &mut fingerprint),
            None => {
                for (_, values) in &projected {
                    values.write_fingerprint(idx, &mut fingerprint);
                }
            }
        }
        if seen.insert(fingerprint.clone()) {
            keep.push(idx);
        }
    }

    let mut columns: Vec<Column> = projected
        .iter()
        .map(|(target, values)| values.take(&keep).into_series(target).into())
        .collect();

    let targets: Vec<String> = spec.columns.iter().map(|(_, t)| t.clone()).collect();
    let primary_key = match &spec.key {
        KeyStrategy::Existing(key) => key.clone(),
        KeyStrategy::Generated(key) => {
            let ids: Vec<Option<i64>> = (1..=keep.len() as i64).map(Some).collect();
            columns.push(Series::new(key.as_str().into(), ids).into());
            key.clone()
        }
    };

    let table = DataFrame::new(columns).map_err(|source| DimensionError::Polars {
        dimension: spec.name.clone(),
        source,
    })?;

    let attributes = targets.into_iter().filter(|t| *t != primary_key).collect();

    tracing::info!(
        dimension = %spec.name,
        rows = table.height(),
        deduped = height - keep.len(),
        "built dimension table"
    );

    Ok(Dimension {
        name: spec.name.clone(),
        table,
        primary_key,
        attributes,
    })
}

/// Country dimension from the country annotation table. The 2-letter code is
/// the natural key, stored uppercase; IsEnglishSpeaking is derived from the
/// free-text language list.
pub fn country_dimension(df: &DataFrame) -> Result<Dimension, DimensionError> {
    let spec = DimensionSpec {
        name: "Country".to_string(),
        columns: vec![
            ("code".to_string(), "CountryID".to_string()),
            ("name".to_string(), "CountryName".to_string()),
            ("continent".to_string(), "Continent".to_string()),
            ("languages".to_string(), "LanguagesSpoken".to_string()),
        ],
        key: KeyStrategy::Existing("CountryID".to_string()),
    };
    let mut dimension = build_dimension(df, &spec)?;

    let polars_err = |source| DimensionError::Polars {
        dimension: "Country".to_string(),
        source,
    };

    let codes: Vec<Option<String>> = dimension
        .table
        .column("CountryID")
        .map_err(polars_err)?
        .str()
        .map_err(polars_err)?
        .into_iter()
        .map(|code| code.map(|c| c.to_uppercase()))
        .collect();
    dimension
        .table
        .with_column(Series::new("CountryID".into(), codes))
        .map_err(polars_err)?;

    let english: Vec<Option<bool>> = dimension
        .table
        .column("LanguagesSpoken")
        .map_err(polars_err)?
        .str()
        .map_err(polars_err)?
        .into_iter()
        .map(|languages| Some(languages.map(|l| l.contains("English")).unwrap_or(false)))
        .collect();
    dimension
        .table
        .with_column(Series::new("IsEnglishSpeaking".into(), english))
        .map_err(polars_err)?;
    dimension.attributes.push("IsEnglishSpeaking".to_string());

    Ok(dimension)
}

/// Movie dimension keyed by the international catalog's native title ID,
/// enriched with the poster reference and original language carried only by
/// the domestic catalog (joined on its cross-reference ID).
pub fn movie_dimension(
    international: &DataFrame,
    domestic: &DataFrame,
) -> Result<Dimension, DimensionError> {
    let spec = DimensionSpec {
        name: "Movie".to_string(),
        columns: vec![
            ("tconst".to_string(), "MovieID".to_string()),
            ("primaryTitle".to_string(), "MovieTitle".to_string()),
            ("originalTitle".to_string(), "OriginalTitle".to_string()),
        ],
        key: KeyStrategy::Existing("MovieID".to_string()),
    };
    let mut dimension = build_dimension(international, &spec)?;

    let cross_ids = string_column(domestic, "Movie", "imdb_id")?;
    let posters = string_column(domestic, "Movie", "poster_path")?;
    let languages = string_column(domestic, "Movie", "original_language")?;

    let mut by_cross_id: HashMap<&str, (Option<&String>, Option<&String>)> = HashMap::new();
    for idx in 0..cross_ids.len() {
        if let Some(id) = cross_ids[idx].as_deref() {
            by_cross_id
                .entry(id)
                .or_insert((posters[idx].as_ref(), languages[idx].as_ref()));
        }
    }

    let polars_err = |source| DimensionError::Polars {
        dimension: "Movie".to_string(),
        source,
    };

    let movie_ids = dimension
        .table
        .column("MovieID")
        .map_err(polars_err)?
        .str()
        .map_err(polars_err)?;

    let mut poster_col: Vec<Option<String>> = Vec::with_capacity(movie_ids.len());
    let mut language_col: Vec<Option<String>> = Vec::with_capacity(movie_ids.len());
    for movie_id in movie_ids.into_iter() {
        let hit = movie_id.and_then(|id| by_cross_id.get(id));
        poster_col.push(hit.and_then(|entry| entry.0.cloned()));
        language_col.push(hit.and_then(|entry| entry.1.cloned()));
    }

    dimension
        .table
        .with_column(Series::new("PosterString".into(), poster_col))
        .map_err(polars_err)?;
    dimension
        .table
        .with_column(Series::new("OriginalLanguage".into(), language_col))
        .map_err(polars_err)?;
    dimension.attributes.push("PosterString".to_string());
    dimension.attributes.push("OriginalLanguage".to_string());

    Ok(dimension)
}

/// Genre dimension from the static genre reference list, deduplicated by ID.
pub fn genre_dimension(df: &DataFrame) -> Result<Dimension, DimensionError> {
    build_dimension(
        df,
        &DimensionSpec {
            name: "Genre".to_string(),
            columns: vec![
                ("id".to_string(), "GenreID".to_string()),
                ("name".to_string(), "GenreName".to_string()),
            ],
            key: KeyStrategy::Existing("GenreID".to_string()),
        },
    )
}

const MOVIE_TYPES: [(&str, i64, &str); 7] = [
    ("short", 1, "Short film"),
    ("tvMovie", 2, "Television movie"),
    ("tvEpisode", 3, "Television episode"),
    ("movie", 4, "Feature film"),
    ("tvSeries", 5, "Television series"),
    ("video", 6, "Video"),
    ("tvMiniSeries", 7, "Television miniseries"),
];

static MOVIE_TYPE_DIMENSION: Lazy<Dimension> = Lazy::new(|| {
    let names: Vec<&str> = MOVIE_TYPES.iter().map(|(name, _, _)| *name).collect();
    let ids: Vec<i64> = MOVIE_TYPES.iter().map(|(_, id, _)| *id).collect();
    let descriptions: Vec<&str> = MOVIE_TYPES.iter().map(|(_, _, desc)| *desc).collect();

    let table = DataFrame::new(vec![
        Series::new("MovieTypeName".into(), names).into(),
        Series::new("MovieTypeID".into(), ids).into(),
        Series::new("TypeDescription".into(), descriptions).into(),
    ])
    .expect("static movie type table");

    Dimension {
        name: "MovieType".to_string(),
        table,
        primary_key: "MovieTypeID".to_string(),
        attributes: vec!["MovieTypeName".to_string(), "TypeDescription".to_string()],
    }
});

/// The fixed movie-type enumeration. Never loaded from input; built once at
/// first use.
pub fn movie_type_dimension() -> Dimension {
    MOVIE_TYPE_DIMENSION.clone()
}

fn string_column(
    df: &DataFrame,
    dimension: &str,
    name: &str,
) -> Result<Vec<Option<String>>, DimensionError> {
    let column = df.column(name).map_err(|_| DimensionError::MissingColumn {
        dimension: dimension.to_string(),
        column: name.to_string(),
    })?;
    let values = ColumnValues::from_column(column).map_err(|source| DimensionError::Polars {
        dimension: dimension.to_string(),
        source,
    })?;
    Ok(values.into_strings())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_spec(key: KeyStrategy) -> DimensionSpec {
        DimensionSpec {
            name: "Sample".to_string(),
            columns: vec![
                ("src_id".to_string(), "SampleID".to_string()),
                ("src_name".to_string(), "SampleName".to_string()),
            ],
            key,
        }
    }

    #[test]
    fn duplicate_rows_collapse_and_generated_key_is_dense() {
        let df = df![
            "src_id" => ["a", "a", "b"],
            "src_name" => ["x", "x", "y"]
        ]
        .expect("construct dataframe");

        let dim = build_dimension(
            &df,
            &sample_spec(KeyStrategy::Generated("SampleKey".to_string())),
        )
        .expect("build");

        assert_eq!(dim.table.height(), 2);
        let keys = dim.table.column("SampleKey").unwrap().i64().unwrap();
        assert_eq!(keys.get(0), Some(1));
        assert_eq!(keys.get(1), Some(2));
        assert_eq!(dim.primary_key, "SampleKey");
        assert_eq!(
            dim.attributes,
            vec!["SampleID".to_string(), "SampleName".to_string()]
        );
    }

    #[test]
    fn building_twice_yields_identical_tables() {
        let df = df![
            "src_id" => ["b", "a", "b"],
            "src_name" => ["y", "x", "y"]
        ]
        .expect("construct dataframe");
        let spec = sample_spec(KeyStrategy::Generated("SampleKey".to_string()));

        let first = build_dimension(&df, &spec).expect("first build");
        let second = build_dimension(&df, &spec).expect("second build");
        assert!(first.table.equals_missing(&second.table));
    }

    #[test]
    fn existing_key_must_survive_renaming() {
        let df = df![
            "src_id" => ["a"],
            "src_name" => ["x"]
        ]
        .expect("construct dataframe");

        let err = build_dimension(
            &df,
            &sample_spec(KeyStrategy::Existing("SomethingElse".to_string())),
        )
        .unwrap_err();
        assert!(matches!(err, DimensionError::MissingPrimaryKey { .. }));
    }

    #[test]
    fn missing_source_column_is_a_validation_error() {
        let df = df!["src_id" => ["a"]].expect("construct dataframe");
        let err = build_dimension(
            &df,
            &sample_spec(KeyStrategy::Existing("SampleID".to_string())),
        )
        .unwrap_err();
        assert!(matches!(err, DimensionError::MissingColumn { .. }));
    }

    #[test]
    fn country_codes_are_uppercased_and_english_flag_derived() {
        let df = df![
            "code" => ["us", "fr"],
            "name" => ["United States", "France"],
            "continent" => ["North America", "Europe"],
            "languages" => ["English", "French"]
        ]
        .expect("construct dataframe");

        let dim = country_dimension(&df).expect("build");
        let codes = dim.table.column("CountryID").unwrap().str().unwrap();
        assert_eq!(codes.get(0), Some("US"));
        assert_eq!(codes.get(1), Some("FR"));

        let english = dim.table.column("IsEnglishSpeaking").unwrap().bool().unwrap();
        assert_eq!(english.get(0), Some(true));
        assert_eq!(english.get(1), Some(false));
        assert!(dim.attributes.contains(&"IsEnglishSpeaking".to_string()));
    }

    #[test]
    fn movie_dimension_enriches_from_the_domestic_catalog() {
        let international = df![
            "tconst" => ["tt0001", "tt0002"],
            "primaryTitle" => ["Heat", "Ran"],
            "originalTitle" => ["Heat", "Ran"]
        ]
        .expect("construct dataframe");
        let domestic = df![
            "imdb_id" => [Some("tt0001"), None],
            "poster_path" => [Some("/heat.jpg"), Some("/orphan.jpg")],
            "original_language" => [Some("en"), Some("ja")]
        ]
        .expect("construct dataframe");

        let dim = movie_dimension(&international, &domestic).expect("build");
        let posters = dim.table.column("PosterString").unwrap().str().unwrap();
        assert_eq!(posters.get(0), Some("/heat.jpg"));
        assert_eq!(posters.get(1), None);
        let languages = dim.table.column("OriginalLanguage").unwrap().str().unwrap();
        assert_eq!(languages.get(0), Some("en"));
    }

    #[test]
    fn movie_type_dimension_is_the_fixed_seven_row_table() {
        let dim = movie_type_dimension();
        assert_eq!(dim.table.height(), 7);
        assert_eq!(dim.primary_key, "MovieTypeID");

        let ids = dim.table.column("MovieTypeID").unwrap().i64().unwrap();
        let mut seen = std::collections::HashSet::new();
        for idx in 0..7 {
            assert!(seen.insert(ids.get(idx).unwrap()));
        }
        let names = dim.table.column("MovieTypeName").unwrap().str().unwrap();
        assert_eq!(names.get(3), Some("movie"));
        assert_eq!(ids.get(3), Some(4));
    }

    #[test]
    fn genre_dimension_dedupes_by_id_keeping_first() {
        // Same ID with differing names must still collapse to one row, or the
        // primary key constraint would reject the table.
        let df = df![
            "id" => [28i64, 28, 12],
            "name" => ["Action", "action", "Adventure"]
        ]
        .expect("construct dataframe");
        let dim = genre_dimension(&df).expect("build");
        assert_eq!(dim.table.height(), 2);
        assert_eq!(dim.primary_key, "GenreID");

        let names = dim.table.column("GenreName").unwrap().str().unwrap();
        assert_eq!(names.get(0), Some("Action"));
        assert_eq!(names.get(1), Some("Adventure"));
    }

    #[test]
    fn country_codes_differing_only_in_case_collapse_to_one_row() {
        let df = df![
            "code" => ["us", "US", "fr"],
            "name" => ["United States", "United States of America", "France"],
            "continent" => ["North America", "North America", "Europe"],
            "languages" => ["English", "English", "French"]
        ]
        .expect("construct dataframe");

        let dim = country_dimension(&df).expect("build");
        assert_eq!(dim.table.height(), 2);
        let codes = dim.table.column("CountryID").unwrap().str().unwrap();
        assert_eq!(codes.get(0), Some("US"));
        assert_eq!(codes.get(1), Some("FR"));
    }
}
