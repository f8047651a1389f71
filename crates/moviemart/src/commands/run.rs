//! The end-to-end ETL pass: fetch blobs, build dimensions, assemble the fact
//! table, load the warehouse.

use anyhow::{Context, Result};
use polars::prelude::DataFrame;
use tracing::{info, warn};

use moviemart_bucket::{BlobStore, S3BlobStore};
use moviemart_core::dataset::decode_csv;
use moviemart_core::dimension::{
    country_dimension, genre_dimension, movie_dimension, movie_type_dimension, Dimension,
};
use moviemart_core::fact::assemble_fact_table;
use moviemart_warehouse::{sql, WarehouseWriter};

use super::{COUNTRY_ANNOTATION, DOMESTIC_DATASET, GENRE_REFERENCE, INTERNATIONAL_DATASET};
use crate::config::Config;

const FACT_TABLE: &str = "MovieGenreFact_dim";
const LOAD_ATTEMPTS: u32 = 2;

/// How a batch lands in the warehouse. Replace rebuilds the table and its
/// constraints; the incremental modes assume the table and constraints exist.
#[derive(Clone, Copy)]
enum LoadMode {
    Replace,
    InsertMissing,
    Append,
}

pub async fn handle_run(config: &Config, incremental: bool) -> Result<()> {
    let store = S3BlobStore::new(config.bucket.clone())
        .await
        .context("opening blob store")?;
    let pool = moviemart_warehouse::connect(&config.database_url)
        .await
        .context("connecting to warehouse database")?;
    let writer = WarehouseWriter::new(pool);

    info!("starting extract");
    let domestic = fetch_dataset(&store, DOMESTIC_DATASET).await?;
    let international = fetch_dataset(&store, INTERNATIONAL_DATASET).await?;
    let genre_reference = fetch_dataset(&store, GENRE_REFERENCE).await?;
    let country_annotation = fetch_dataset(&store, COUNTRY_ANNOTATION).await?;

    info!("starting transform");
    let country = country_dimension(&country_annotation)?;
    let movie = movie_dimension(&international, &domestic)?;
    let genre = genre_dimension(&genre_reference)?;
    let movie_type = movie_type_dimension();
    let fact = assemble_fact_table(&domestic, &international, &genre, &country, &movie_type)?;

    info!(incremental, "starting load");
    let dimension_mode = if incremental {
        LoadMode::InsertMissing
    } else {
        LoadMode::Replace
    };

    // Dimensions first: the fact table's constraints reference them by name.
    for dimension in [&country, &movie, &genre, &movie_type] {
        load_with_retry(
            &writer,
            dimension_mode,
            &dimension_table_name(dimension),
            &dimension.table,
            std::slice::from_ref(&dimension.primary_key),
        )
        .await?;
    }

    let fact_mode = if incremental {
        LoadMode::Append
    } else {
        LoadMode::Replace
    };
    load_with_retry(
        &writer,
        fact_mode,
        FACT_TABLE,
        &fact,
        &["MovieID".to_string(), "GenreID".to_string()],
    )
    .await?;

    if !incremental {
        let constraints = vec![
            sql::foreign_key_statement(FACT_TABLE, "MovieID", "Movie_dim", "MovieID"),
            sql::foreign_key_statement(FACT_TABLE, "GenreID", "Genre_dim", "GenreID"),
            sql::foreign_key_statement(FACT_TABLE, "MovieTypeID", "MovieType_dim", "MovieTypeID"),
            sql::foreign_key_statement(FACT_TABLE, "CountryID", "Country_dim", "CountryID"),
        ];
        writer
            .apply_constraints(FACT_TABLE, &constraints)
            .await
            .context("applying fact table foreign keys")?;
    }

    info!(fact_rows = fact.height(), "ETL run complete");
    Ok(())
}

async fn fetch_dataset(store: &S3BlobStore, name: &str) -> Result<DataFrame> {
    let bytes = store
        .get(name)
        .await
        .with_context(|| format!("fetching blob {name}"))?;
    let frame = decode_csv(name, &bytes)?;
    info!(
        blob = name,
        rows = frame.height(),
        columns = frame.width(),
        "loaded dataset"
    );
    Ok(frame)
}

fn dimension_table_name(dimension: &Dimension) -> String {
    format!("{}_dim", dimension.name)
}

/// Bounded per-table retry: a transient failure gets one more attempt before
/// the run aborts.
async fn load_with_retry(
    writer: &WarehouseWriter,
    mode: LoadMode,
    table: &str,
    frame: &DataFrame,
    keys: &[String],
) -> Result<()> {
    let mut last_error = None;
    for attempt in 1..=LOAD_ATTEMPTS {
        let result = match mode {
            LoadMode::Replace => writer.replace_table(table, frame, keys).await,
            LoadMode::InsertMissing => writer
                .insert_missing(table, frame, &keys[0])
                .await
                .map(|_| ()),
            LoadMode::Append => writer.append_rows(table, frame).await.map(|_| ()),
        };
        match result {
            Ok(()) => return Ok(()),
            Err(err) => {
                warn!(table, attempt, error = %err, "table load failed");
                last_error = Some(err);
            }
        }
    }
    Err(last_error.expect("at least one attempt ran"))
        .with_context(|| format!("loading table {table}"))
}
