//! Blob-store access for the raw catalog CSVs, over S3-compatible storage.

use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_credential_types::provider::SharedCredentialsProvider;
use aws_credential_types::Credentials;
use aws_sdk_s3::config::Region;
use aws_sdk_s3::error::SdkError;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client;
use bytes::Bytes;
use std::fmt;
use thiserror::Error;

#[derive(Debug, Clone)]
pub struct BucketConfig {
    pub bucket: String,
    pub region: String,
    pub endpoint: Option<String>,
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,
    pub force_path_style: bool,
}

impl Default for BucketConfig {
    fn default() -> Self {
        Self {
            bucket: "moviemart-csv-files".to_string(),
            region: "us-east-1".to_string(),
            endpoint: None,
            access_key_id: None,
            secret_access_key: None,
            force_path_style: false,
        }
    }
}

#[derive(Debug, Error)]
pub enum BlobError {
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error("sdk error: {0}")]
    Sdk(String),
    #[error("blob not found: {0}")]
    NotFound(String),
}

impl BlobError {
    fn from_sdk(err: impl fmt::Display) -> Self {
        Self::Sdk(err.to_string())
    }
}

#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn get(&self, name: &str) -> Result<Bytes, BlobError>;
    async fn put(&self, name: &str, bytes: Bytes, content_type: &str) -> Result<(), BlobError>;
    async fn list(&self) -> Result<Vec<String>, BlobError>;
}

#[derive(Clone)]
pub struct S3BlobStore {
    client: Client,
    bucket: String,
}

impl S3BlobStore {
    pub async fn new(config: BucketConfig) -> Result<Self, BlobError> {
        if config.bucket.is_empty() {
            return Err(BlobError::Configuration(
                "bucket name cannot be empty".into(),
            ));
        }

        let mut loader = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(config.region.clone()));

        if let (Some(access_key), Some(secret_key)) =
            (&config.access_key_id, &config.secret_access_key)
        {
            let credentials = Credentials::new(access_key, secret_key, None, None, "static");
            loader = loader.credentials_provider(SharedCredentialsProvider::new(credentials));
        }

        let shared_config = loader.load().await;
        let mut builder = aws_sdk_s3::config::Builder::from(&shared_config);

        if let Some(endpoint) = &config.endpoint {
            builder = builder.endpoint_url(endpoint);
        }

        if config.force_path_style {
            builder = builder.force_path_style(true);
        }

        let client = Client::from_conf(builder.build());
        let store = Self {
            client,
            bucket: config.bucket,
        };
        store.ensure_bucket().await?;
        Ok(store)
    }

    /// Creates the bucket when it does not exist yet, otherwise reuses it.
    async fn ensure_bucket(&self) -> Result<(), BlobError> {
        let exists = self
            .client
            .head_bucket()
            .bucket(&self.bucket)
            .send()
            .await
            .is_ok();

        if exists {
            tracing::debug!(bucket = %self.bucket, "reusing existing bucket");
            return Ok(());
        }

        tracing::info!(bucket = %self.bucket, "creating bucket");
        self.client
            .create_bucket()
            .bucket(&self.bucket)
            .send()
            .await
            .map_err(BlobError::from_sdk)?;
        Ok(())
    }
}

#[async_trait]
impl BlobStore for S3BlobStore {
    async fn get(&self, name: &str) -> Result<Bytes, BlobError> {
        let output = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(name)
            .send()
            .await
            .map_err(|err| match err {
                SdkError::ServiceError(service_err) => {
                    let message = service_err.err().to_string();
                    if message.contains("NoSuchKey") {
                        BlobError::NotFound(name.to_string())
                    } else {
                        BlobError::from_sdk(message)
                    }
                }
                other => BlobError::from_sdk(other),
            })?;

        let data = output.body.collect().await.map_err(BlobError::from_sdk)?;
        Ok(Bytes::from(data.into_bytes()))
    }

    async fn put(&self, name: &str, bytes: Bytes, content_type: &str) -> Result<(), BlobError> {
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(name)
            .body(ByteStream::from(bytes.to_vec()))
            .content_type(content_type)
            .send()
            .await
            .map_err(BlobError::from_sdk)?;
        Ok(())
    }

    async fn list(&self) -> Result<Vec<String>, BlobError> {
        let mut names = Vec::new();
        let mut continuation: Option<String> = None;

        loop {
            let mut request = self.client.list_objects_v2().bucket(&self.bucket);
            if let Some(token) = &continuation {
                request = request.continuation_token(token);
            }
            let output = request.send().await.map_err(BlobError::from_sdk)?;

            for object in output.contents() {
                if let Some(key) = object.key() {
                    names.push(key.to_string());
                }
            }

            match output.next_continuation_token() {
                Some(token) => continuation = Some(token.to_string()),
                None => break,
            }
        }

        Ok(names)
    }
}
