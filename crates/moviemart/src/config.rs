use anyhow::{Context, Result};
use moviemart_bucket::BucketConfig;

/// Process configuration, read once from the environment at startup. Library
/// crates never touch the environment themselves.
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub bucket: BucketConfig,
    catalog_token: Option<String>,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        let database_url = std::env::var("DATABASE_URL")
            .or_else(|_| std::env::var("MOVIEMART_DATABASE_URL"))
            .context("DATABASE_URL (or MOVIEMART_DATABASE_URL) must be set")?;

        let mut bucket = BucketConfig::default();
        if let Ok(name) = std::env::var("MOVIEMART_BUCKET") {
            bucket.bucket = name;
        }
        if let Ok(region) = std::env::var("MOVIEMART_S3_REGION") {
            bucket.region = region;
        }
        if let Ok(endpoint) = std::env::var("MOVIEMART_S3_ENDPOINT") {
            bucket.endpoint = Some(endpoint);
        }
        if let Ok(key) = std::env::var("MOVIEMART_S3_ACCESS_KEY_ID") {
            bucket.access_key_id = Some(key);
        }
        if let Ok(secret) = std::env::var("MOVIEMART_S3_SECRET_ACCESS_KEY") {
            bucket.secret_access_key = Some(secret);
        }
        if let Ok(flag) = std::env::var("MOVIEMART_S3_FORCE_PATH_STYLE") {
            bucket.force_path_style = flag == "1" || flag.eq_ignore_ascii_case("true");
        }

        let catalog_token = std::env::var("TMDB_API_READ_ACCESS_TOKEN").ok();

        Ok(Self {
            database_url,
            bucket,
            catalog_token,
        })
    }

    pub fn catalog_token(&self) -> Result<&str> {
        self.catalog_token
            .as_deref()
            .context("TMDB_API_READ_ACCESS_TOKEN must be set for catalog access")
    }
}
