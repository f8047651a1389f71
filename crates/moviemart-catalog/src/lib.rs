//! Client for the upstream movie catalog REST API (find-by-external-id and
//! the genre reference list), plus CSV materialization of fetched records for
//! upload to the blob store.

use serde::de::DeserializeOwned;
use serde::Deserialize;
use thiserror::Error;

const DEFAULT_BASE_URL: &str = "https://api.themoviedb.org/3";

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("catalog returned status {status} for {url}")]
    Status { status: u16, url: String },

    #[error("csv write error: {0}")]
    Csv(String),
}

/// One movie record from the catalog's find endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct CatalogMovie {
    pub id: i64,
    pub title: Option<String>,
    pub original_title: Option<String>,
    pub original_language: Option<String>,
    pub poster_path: Option<String>,
    pub release_date: Option<String>,
    pub popularity: Option<f64>,
    pub vote_average: Option<f64>,
    pub vote_count: Option<i64>,
    #[serde(default)]
    pub genre_ids: Vec<i64>,
}

#[derive(Debug, Deserialize)]
struct FindResponse {
    #[serde(default)]
    movie_results: Vec<CatalogMovie>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GenreEntry {
    pub id: i64,
    pub name: String,
}

#[derive(Debug, Deserialize)]
struct GenreListResponse {
    #[serde(default)]
    genres: Vec<GenreEntry>,
}

#[derive(Clone)]
pub struct CatalogClient {
    http: reqwest::Client,
    base_url: String,
    token: String,
}

impl CatalogClient {
    pub fn new(token: impl Into<String>) -> Self {
        Self::with_base_url(token, DEFAULT_BASE_URL)
    }

    pub fn with_base_url(token: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into(),
            token: token.into(),
        }
    }

    /// Looks a title up by its external (IMDb-style) ID; returns the
    /// `movie_results` array, which is empty when the catalog has no match.
    pub async fn find_by_external_id(
        &self,
        external_id: &str,
    ) -> Result<Vec<CatalogMovie>, CatalogError> {
        let url = format!(
            "{}/find/{}?external_source=imdb_id",
            self.base_url, external_id
        );
        let response: FindResponse = self.get_json(url).await?;
        Ok(response.movie_results)
    }

    /// The catalog's static genre reference list.
    pub async fn movie_genres(&self) -> Result<Vec<GenreEntry>, CatalogError> {
        let url = format!("{}/genre/movie/list?language=en", self.base_url);
        let response: GenreListResponse = self.get_json(url).await?;
        Ok(response.genres)
    }

    async fn get_json<T: DeserializeOwned>(&self, url: String) -> Result<T, CatalogError> {
        tracing::debug!(%url, "catalog request");
        let response = self
            .http
            .get(&url)
            .bearer_auth(&self.token)
            .header(reqwest::header::ACCEPT, "application/json")
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(CatalogError::Status {
                status: status.as_u16(),
                url,
            });
        }

        Ok(response.json::<T>().await?)
    }
}

/// Renders fetched movie records as the domestic-catalog CSV, one row per
/// record with its external cross-reference ID appended, genre IDs as a
/// bracketed list.
pub fn movies_to_csv(records: &[(String, CatalogMovie)]) -> Result<String, CatalogError> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    writer
        .write_record([
            "id",
            "title",
            "original_title",
            "original_language",
            "poster_path",
            "release_date",
            "popularity",
            "vote_average",
            "vote_count",
            "genre_ids",
            "imdb_id",
        ])
        .map_err(|e| CatalogError::Csv(e.to_string()))?;

    for (external_id, movie) in records {
        writer
            .write_record([
                movie.id.to_string(),
                movie.title.clone().unwrap_or_default(),
                movie.original_title.clone().unwrap_or_default(),
                movie.original_language.clone().unwrap_or_default(),
                movie.poster_path.clone().unwrap_or_default(),
                movie.release_date.clone().unwrap_or_default(),
                movie.popularity.map(|v| v.to_string()).unwrap_or_default(),
                movie
                    .vote_average
                    .map(|v| v.to_string())
                    .unwrap_or_default(),
                movie.vote_count.map(|v| v.to_string()).unwrap_or_default(),
                format_genre_ids(&movie.genre_ids),
                external_id.clone(),
            ])
            .map_err(|e| CatalogError::Csv(e.to_string()))?;
    }

    finish_csv(writer)
}

/// Renders the genre reference list as CSV (`id,name`).
pub fn genres_to_csv(genres: &[GenreEntry]) -> Result<String, CatalogError> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    writer
        .write_record(["id", "name"])
        .map_err(|e| CatalogError::Csv(e.to_string()))?;
    for genre in genres {
        writer
            .write_record([genre.id.to_string(), genre.name.clone()])
            .map_err(|e| CatalogError::Csv(e.to_string()))?;
    }
    finish_csv(writer)
}

fn format_genre_ids(ids: &[i64]) -> String {
    let parts: Vec<String> = ids.iter().map(|id| id.to_string()).collect();
    format!("[{}]", parts.join(", "))
}

fn finish_csv(writer: csv::Writer<Vec<u8>>) -> Result<String, CatalogError> {
    let bytes = writer
        .into_inner()
        .map_err(|e| CatalogError::Csv(e.to_string()))?;
    String::from_utf8(bytes).map_err(|e| CatalogError::Csv(e.to_string()))
}
