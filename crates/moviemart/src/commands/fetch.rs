//! Catalog refresh: query the upstream REST catalog for every distinct
//! external ID in the international dataset and rewrite the domestic catalog
//! and genre reference blobs.

use std::collections::HashSet;

use anyhow::{Context, Result};
use bytes::Bytes;
use tracing::info;

use moviemart_bucket::{BlobStore, S3BlobStore};
use moviemart_catalog::{genres_to_csv, movies_to_csv, CatalogClient};
use moviemart_core::dataset::decode_csv;

use super::{DOMESTIC_DATASET, GENRE_REFERENCE, INTERNATIONAL_DATASET};
use crate::config::Config;

pub async fn handle_fetch_catalog(config: &Config) -> Result<()> {
    let store = S3BlobStore::new(config.bucket.clone())
        .await
        .context("opening blob store")?;
    let client = CatalogClient::new(config.catalog_token()?);

    let bytes = store
        .get(INTERNATIONAL_DATASET)
        .await
        .with_context(|| format!("fetching blob {INTERNATIONAL_DATASET}"))?;
    let international = decode_csv(INTERNATIONAL_DATASET, &bytes)?;

    let external_ids = distinct_external_ids(&international)?;
    info!(count = external_ids.len(), "querying catalog by external ID");

    let mut records = Vec::new();
    for external_id in &external_ids {
        let movies = client
            .find_by_external_id(external_id)
            .await
            .with_context(|| format!("catalog lookup for {external_id}"))?;
        for movie in movies {
            records.push((external_id.clone(), movie));
        }
    }

    let movie_csv = movies_to_csv(&records)?;
    store
        .put(DOMESTIC_DATASET, Bytes::from(movie_csv), "text/csv")
        .await
        .with_context(|| format!("uploading blob {DOMESTIC_DATASET}"))?;
    info!(records = records.len(), blob = DOMESTIC_DATASET, "uploaded domestic catalog");

    let genres = client.movie_genres().await.context("fetching genre list")?;
    let genre_csv = genres_to_csv(&genres)?;
    store
        .put(GENRE_REFERENCE, Bytes::from(genre_csv), "text/csv")
        .await
        .with_context(|| format!("uploading blob {GENRE_REFERENCE}"))?;
    info!(genres = genres.len(), blob = GENRE_REFERENCE, "uploaded genre reference");

    Ok(())
}

/// Distinct non-null native IDs, in first-appearance order.
fn distinct_external_ids(international: &polars::prelude::DataFrame) -> Result<Vec<String>> {
    let ids = international
        .column("tconst")
        .context("international dataset is missing the tconst column")?
        .str()
        .context("tconst column is not a string column")?;

    let mut seen = HashSet::new();
    let mut ordered = Vec::new();
    for id in ids.into_iter().flatten() {
        if seen.insert(id) {
            ordered.push(id.to_string());
        }
    }
    Ok(ordered)
}
