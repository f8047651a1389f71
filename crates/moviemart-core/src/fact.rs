//! Fact-table assembly: joins the two catalogs, explodes the genre list, and
//! resolves the dimension foreign keys.
//!
//! The joins are hash lookups driven by a single pass over the domestic
//! catalog in source row order, so output order is exactly (domestic row,
//! genre-list position) and identical inputs produce identical output.

use std::collections::{HashMap, HashSet};

use polars::prelude::*;
use thiserror::Error;

use crate::column::ColumnValues;
use crate::dimension::Dimension;
use crate::genres::parse_genre_field;

/// Rows whose region matches no known country code get this code instead of
/// being dropped.
pub const FALLBACK_COUNTRY: &str = "us";

#[derive(Debug, Error)]
pub enum FactError {
    #[error("fact table: required column {column} not found in {table}")]
    MissingColumn {
        table: &'static str,
        column: &'static str,
    },

    #[error("fact table: {source}")]
    Polars {
        #[from]
        source: PolarsError,
    },
}

/// Fields pulled in from the international catalog for one title.
#[derive(Debug, Clone, Default)]
struct InternationalFields {
    rating: Option<f64>,
    region: Option<String>,
    votes: Option<i64>,
    year: Option<i64>,
    title_type: Option<String>,
}

/// Builds the movie-genre fact table.
///
/// Steps, in order: left-join the domestic catalog to the international one on
/// the cross-reference ID, normalize and explode the genre list (an empty list
/// contributes zero rows), resolve country case-insensitively with the `"us"`
/// fallback, resolve the movie type by category label, then project to the
/// fact schema dropping every row with a null field.
pub fn assemble_fact_table(
    domestic: &DataFrame,
    international: &DataFrame,
    genre_dim: &Dimension,
    country_dim: &Dimension,
    movie_type_dim: &Dimension,
) -> Result<DataFrame, FactError> {
    let international_by_id = index_international(international)?;
    let genre_keys = genre_key_set(genre_dim)?;
    let country_codes = country_code_set(country_dim)?;
    let movie_type_ids = movie_type_map(movie_type_dim)?;

    let cross_ids = str_values(domestic, "domestic catalog", "imdb_id")?;
    let popularity = f64_values(domestic, "domestic catalog", "popularity")?;
    let genre_column = domestic
        .column("genre_ids")
        .map_err(|_| FactError::MissingColumn {
            table: "domestic catalog",
            column: "genre_ids",
        })?
        .as_materialized_series();

    let height = domestic.height();

    let mut movie_id_col: Vec<String> = Vec::new();
    let mut genre_id_col: Vec<i64> = Vec::new();
    let mut movie_type_col: Vec<i64> = Vec::new();
    let mut rating_col: Vec<f64> = Vec::new();
    let mut votes_col: Vec<i64> = Vec::new();
    let mut year_col: Vec<i64> = Vec::new();
    let mut popularity_col: Vec<f64> = Vec::new();
    let mut country_col: Vec<String> = Vec::new();

    let mut exploded_rows = 0usize;
    let mut dropped_rows = 0usize;

    for idx in 0..height {
        let genre_field = parse_genre_field(&genre_column.get(idx)?);
        let cross_id = cross_ids[idx].as_deref();
        let international = cross_id.and_then(|id| international_by_id.get(id));

        for &genre_id in genre_field.ids() {
            exploded_rows += 1;

            // The joined native ID equals the cross-reference ID whenever the
            // join matched; without a match every pulled field is null and
            // the row cannot survive the finalize gate.
            let movie_id = international.and_then(|_| cross_id);

            let resolved_genre = genre_keys.contains(&genre_id).then_some(genre_id);

            let country = match international.and_then(|fields| fields.region.as_deref()) {
                Some(region) => {
                    let lowered = region.to_lowercase();
                    if country_codes.contains(&lowered) {
                        lowered
                    } else {
                        FALLBACK_COUNTRY.to_string()
                    }
                }
                None => FALLBACK_COUNTRY.to_string(),
            };

            let movie_type = international
                .and_then(|fields| fields.title_type.as_deref())
                .and_then(|label| movie_type_ids.get(label).copied());

            let rating = international.and_then(|fields| fields.rating);
            let votes = international.and_then(|fields| fields.votes);
            let year = international.and_then(|fields| fields.year);

            match (movie_id, resolved_genre, movie_type, rating, votes, year, popularity[idx]) {
                (
                    Some(movie_id),
                    Some(genre_id),
                    Some(movie_type),
                    Some(rating),
                    Some(votes),
                    Some(year),
                    Some(popularity),
                ) => {
                    movie_id_col.push(movie_id.to_string());
                    genre_id_col.push(genre_id);
                    movie_type_col.push(movie_type);
                    rating_col.push(rating);
                    votes_col.push(votes);
                    year_col.push(year);
                    popularity_col.push(popularity);
                    country_col.push(country);
                }
                _ => dropped_rows += 1,
            }
        }
    }

    tracing::info!(
        source_rows = height,
        exploded_rows,
        dropped_rows,
        fact_rows = movie_id_col.len(),
        "assembled fact table"
    );

    let fact = DataFrame::new(vec![
        Series::new("MovieID".into(), movie_id_col).into(),
        Series::new("GenreID".into(), genre_id_col).into(),
        Series::new("MovieTypeID".into(), movie_type_col).into(),
        Series::new("Rating".into(), rating_col).into(),
        Series::new("NumRatings".into(), votes_col).into(),
        Series::new("ReleaseYear".into(), year_col).into(),
        Series::new("Popularity".into(), popularity_col).into(),
        Series::new("CountryID".into(), country_col).into(),
    ])?;

    Ok(fact)
}

/// Indexes the international catalog by native title ID. The first row wins
/// on a duplicate ID, matching a left join that keeps the first match.
fn index_international(
    df: &DataFrame,
) -> Result<HashMap<String, InternationalFields>, FactError> {
    const TABLE: &str = "international catalog";
    let ids = str_values(df, TABLE, "tconst")?;
    let ratings = f64_values(df, TABLE, "averageRating")?;
    let regions = str_values(df, TABLE, "region")?;
    let votes = i64_values(df, TABLE, "numVotes")?;
    let years = i64_values(df, TABLE, "startYear")?;
    let title_types = str_values(df, TABLE, "titleType")?;

    let mut by_id = HashMap::with_capacity(ids.len());
    for idx in 0..ids.len() {
        let Some(id) = ids[idx].clone() else {
            continue;
        };
        by_id.entry(id).or_insert(InternationalFields {
            rating: ratings[idx],
            region: regions[idx].clone(),
            votes: votes[idx],
            year: years[idx],
            title_type: title_types[idx].clone(),
        });
    }
    Ok(by_id)
}

fn genre_key_set(dim: &Dimension) -> Result<HashSet<i64>, FactError> {
    let keys = i64_values(&dim.table, "genre dimension", "GenreID")?;
    Ok(keys.into_iter().flatten().collect())
}

/// Country codes lowercased for case-insensitive matching; the dimension
/// stores them uppercase.
fn country_code_set(dim: &Dimension) -> Result<HashSet<String>, FactError> {
    let codes = str_values(&dim.table, "country dimension", "CountryID")?;
    Ok(codes
        .into_iter()
        .flatten()
        .map(|code| code.to_lowercase())
        .collect())
}

fn movie_type_map(dim: &Dimension) -> Result<HashMap<String, i64>, FactError> {
    let names = str_values(&dim.table, "movie type dimension", "MovieTypeName")?;
    let ids = i64_values(&dim.table, "movie type dimension", "MovieTypeID")?;

    let mut map = HashMap::with_capacity(names.len());
    for idx in 0..names.len() {
        if let (Some(name), Some(id)) = (&names[idx], ids[idx]) {
            map.entry(name.clone()).or_insert(id);
        }
    }
    Ok(map)
}

fn typed_column(
    df: &DataFrame,
    table: &'static str,
    column: &'static str,
) -> Result<ColumnValues, FactError> {
    let col = df
        .column(column)
        .map_err(|_| FactError::MissingColumn { table, column })?;
    Ok(ColumnValues::from_column(col)?)
}

fn str_values(
    df: &DataFrame,
    table: &'static str,
    column: &'static str,
) -> Result<Vec<Option<String>>, FactError> {
    Ok(typed_column(df, table, column)?.into_strings())
}

fn f64_values(
    df: &DataFrame,
    table: &'static str,
    column: &'static str,
) -> Result<Vec<Option<f64>>, FactError> {
    Ok(match typed_column(df, table, column)? {
        ColumnValues::Float(values) => values,
        ColumnValues::Int(values) => values
            .into_iter()
            .map(|value| value.map(|v| v as f64))
            .collect(),
        ColumnValues::Str(values) => values
            .into_iter()
            .map(|value| value.and_then(|v| v.parse::<f64>().ok()))
            .collect(),
        ColumnValues::Bool(values) => values.into_iter().map(|_| None).collect(),
    })
}

fn i64_values(
    df: &DataFrame,
    table: &'static str,
    column: &'static str,
) -> Result<Vec<Option<i64>>, FactError> {
    Ok(match typed_column(df, table, column)? {
        ColumnValues::Int(values) => values,
        ColumnValues::Float(values) => values
            .into_iter()
            .map(|value| {
                value.and_then(|v| {
                    (v.is_finite() && v.fract() == 0.0).then_some(v as i64)
                })
            })
            .collect(),
        ColumnValues::Str(values) => values
            .into_iter()
            .map(|value| value.and_then(|v| v.parse::<i64>().ok()))
            .collect(),
        ColumnValues::Bool(values) => values.into_iter().map(|_| None).collect(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dimension::{country_dimension, movie_type_dimension, Dimension};

    fn genre_dim() -> Dimension {
        Dimension {
            name: "Genre".to_string(),
            table: df![
                "GenreID" => [28i64, 12, 16],
                "GenreName" => ["Action", "Adventure", "Animation"]
            ]
            .expect("construct dataframe"),
            primary_key: "GenreID".to_string(),
            attributes: vec!["GenreName".to_string()],
        }
    }

    fn country_dim() -> Dimension {
        let df = df![
            "code" => ["us", "jp"],
            "name" => ["United States", "Japan"],
            "continent" => ["North America", "Asia"],
            "languages" => ["English", "Japanese"]
        ]
        .expect("construct dataframe");
        country_dimension(&df).expect("build country dimension")
    }

    fn international() -> DataFrame {
        df![
            "tconst" => ["tt0001", "tt0002", "tt0003"],
            "averageRating" => [Some(7.5f64), Some(8.1), None],
            "region" => [Some("US"), Some("xx"), Some("JP")],
            "numVotes" => [Some(1000i64), Some(2000), Some(50)],
            "startYear" => [Some(1995i64), Some(1985), Some(2001)],
            "titleType" => [Some("movie"), Some("movie"), Some("tvSeries")]
        ]
        .expect("construct dataframe")
    }

    fn assemble(domestic: &DataFrame) -> DataFrame {
        assemble_fact_table(
            domestic,
            &international(),
            &genre_dim(),
            &country_dim(),
            &movie_type_dimension(),
        )
        .expect("assemble")
    }

    #[test]
    fn explodes_one_row_per_genre_in_list_order() {
        let domestic = df![
            "imdb_id" => ["tt0001"],
            "genre_ids" => ["[28, 12, 16]"],
            "popularity" => [42.0f64]
        ]
        .expect("construct dataframe");

        let fact = assemble(&domestic);
        assert_eq!(fact.height(), 3);

        let genres = fact.column("GenreID").unwrap().i64().unwrap();
        assert_eq!(genres.get(0), Some(28));
        assert_eq!(genres.get(1), Some(12));
        assert_eq!(genres.get(2), Some(16));

        let movies = fact.column("MovieID").unwrap().str().unwrap();
        for idx in 0..3 {
            assert_eq!(movies.get(idx), Some("tt0001"));
        }
    }

    #[test]
    fn empty_genre_list_yields_zero_rows() {
        let domestic = df![
            "imdb_id" => ["tt0001", "tt0002"],
            "genre_ids" => [Some("[]"), Some("[28]")],
            "popularity" => [42.0f64, 7.0]
        ]
        .expect("construct dataframe");

        let fact = assemble(&domestic);
        assert_eq!(fact.height(), 1);
        let movies = fact.column("MovieID").unwrap().str().unwrap();
        assert_eq!(movies.get(0), Some("tt0002"));
    }

    #[test]
    fn unknown_region_falls_back_to_default_country() {
        // tt0002 carries region "xx", absent from the country dimension.
        let domestic = df![
            "imdb_id" => ["tt0002"],
            "genre_ids" => ["[28]"],
            "popularity" => [1.5f64]
        ]
        .expect("construct dataframe");

        let fact = assemble(&domestic);
        assert_eq!(fact.height(), 1);
        let countries = fact.column("CountryID").unwrap().str().unwrap();
        assert_eq!(countries.get(0), Some(FALLBACK_COUNTRY));
    }

    #[test]
    fn region_matching_is_case_insensitive() {
        // Dimension stores "US"; the catalog row carries "US" which must match
        // the lowercased code and come out lowercase.
        let domestic = df![
            "imdb_id" => ["tt0001"],
            "genre_ids" => ["[12]"],
            "popularity" => [3.0f64]
        ]
        .expect("construct dataframe");

        let fact = assemble(&domestic);
        let countries = fact.column("CountryID").unwrap().str().unwrap();
        assert_eq!(countries.get(0), Some("us"));
    }

    #[test]
    fn unresolved_genre_and_movie_type_rows_are_dropped() {
        let international = df![
            "tconst" => ["tt0001", "tt0004"],
            "averageRating" => [7.5f64, 6.0],
            "region" => ["US", "US"],
            "numVotes" => [1000i64, 10],
            "startYear" => [1995i64, 2005],
            "titleType" => [Some("movie"), Some("videoGame")]
        ]
        .expect("construct dataframe");
        let domestic = df![
            "imdb_id" => ["tt0001", "tt0001", "tt0004"],
            "genre_ids" => ["[28]", "[999]", "[28]"],
            "popularity" => [42.0f64, 42.0, 9.0]
        ]
        .expect("construct dataframe");

        let fact = assemble_fact_table(
            &domestic,
            &international,
            &genre_dim(),
            &country_dim(),
            &movie_type_dimension(),
        )
        .expect("assemble");

        // Row 2 has an unknown genre, row 3 an unknown category label.
        assert_eq!(fact.height(), 1);
        let movies = fact.column("MovieID").unwrap().str().unwrap();
        assert_eq!(movies.get(0), Some("tt0001"));
    }

    #[test]
    fn rows_without_an_international_match_are_dropped() {
        let domestic = df![
            "imdb_id" => [Some("tt9999"), None],
            "genre_ids" => [Some("[28]"), Some("[12]")],
            "popularity" => [1.0f64, 2.0]
        ]
        .expect("construct dataframe");

        let fact = assemble(&domestic);
        assert_eq!(fact.height(), 0);
    }

    #[test]
    fn null_rating_fails_the_finalize_gate() {
        // tt0003 joins but carries a null averageRating.
        let domestic = df![
            "imdb_id" => ["tt0003"],
            "genre_ids" => ["[16]"],
            "popularity" => [5.0f64]
        ]
        .expect("construct dataframe");

        let fact = assemble(&domestic);
        assert_eq!(fact.height(), 0);
    }

    #[test]
    fn assembly_is_deterministic() {
        let domestic = df![
            "imdb_id" => ["tt0001", "tt0002"],
            "genre_ids" => ["[28, 12]", "[16]"],
            "popularity" => [42.0f64, 7.0]
        ]
        .expect("construct dataframe");

        let first = assemble(&domestic);
        let second = assemble(&domestic);
        assert!(first.equals_missing(&second));
    }

    #[test]
    fn fact_schema_is_fixed() {
        let domestic = df![
            "imdb_id" => ["tt0001"],
            "genre_ids" => ["[28]"],
            "popularity" => [42.0f64]
        ]
        .expect("construct dataframe");

        let fact = assemble(&domestic);
        let names: Vec<&str> = fact
            .get_column_names()
            .iter()
            .map(|name| name.as_str())
            .collect();
        assert_eq!(
            names,
            [
                "MovieID",
                "GenreID",
                "MovieTypeID",
                "Rating",
                "NumRatings",
                "ReleaseYear",
                "Popularity",
                "CountryID"
            ]
        );
    }
}
