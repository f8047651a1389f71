pub mod fetch;
pub mod run;

/// Blob names of the four source datasets in the store.
pub const DOMESTIC_DATASET: &str = "tmdb_dataset.csv";
pub const INTERNATIONAL_DATASET: &str = "imdb_dataset_with_region.csv";
pub const GENRE_REFERENCE: &str = "tmdb_genre_list_dataset.csv";
pub const COUNTRY_ANNOTATION: &str = "country_annotation.csv";
