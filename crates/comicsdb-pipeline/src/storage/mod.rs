//! Object storage wrapper
//!
//! Thin collaborator around an S3-compatible bucket. The cloud ingest job
//! only needs listing with sizes, whole-object download, and cover upload.

use anyhow::{Context, Result};
use aws_sdk_s3::{
    config::{Credentials, Region},
    primitives::ByteStream,
    Client,
};
use std::path::Path;
use tracing::{debug, info, instrument};

pub mod config;

pub use config::StorageConfig;

#[derive(Clone)]
pub struct CloudStorage {
    client: Client,
    bucket: String,
}

impl CloudStorage {
    pub fn new(config: StorageConfig) -> Self {
        debug!("Initializing storage for bucket: {}", config.bucket);

        let credentials = Credentials::new(
            &config.access_key,
            &config.secret_key,
            None,
            None,
            "comicsdb-storage",
        );

        let mut s3_config_builder = aws_sdk_s3::Config::builder()
            .credentials_provider(credentials)
            .region(Region::new(config.region.clone()))
            .force_path_style(config.path_style);

        if let Some(endpoint) = &config.endpoint {
            s3_config_builder = s3_config_builder.endpoint_url(endpoint);
        }

        let client = Client::from_conf(s3_config_builder.build());

        Self {
            client,
            bucket: config.bucket,
        }
    }

    /// List all keys under a prefix, with object sizes.
    ///
    /// Paginates through the full result set with continuation tokens.
    #[instrument(skip(self))]
    pub async fn list_keys(&self, prefix: &str) -> Result<Vec<(String, i64)>> {
        debug!("Listing objects in s3://{}/{}", self.bucket, prefix);

        let mut keys = Vec::new();
        let mut continuation: Option<String> = None;

        loop {
            let mut request = self
                .client
                .list_objects_v2()
                .bucket(&self.bucket)
                .prefix(prefix);

            if let Some(token) = &continuation {
                request = request.continuation_token(token);
            }

            let response = request.send().await.context("Failed to list bucket keys")?;

            for obj in response.contents() {
                if let Some(key) = obj.key() {
                    keys.push((key.to_string(), obj.size().unwrap_or(0)));
                }
            }

            match response.next_continuation_token() {
                Some(token) => continuation = Some(token.to_string()),
                None => break,
            }
        }

        info!("Listed {} keys under s3://{}/{}", keys.len(), self.bucket, prefix);

        Ok(keys)
    }

    #[instrument(skip(self))]
    pub async fn download(&self, key: &str) -> Result<Vec<u8>> {
        debug!("Downloading from s3://{}/{}", self.bucket, key);

        let response = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .context(format!("Failed to download from bucket: {}", key))?;

        let data = response
            .body
            .collect()
            .await
            .context("Failed to read bucket response body")?
            .into_bytes()
            .to_vec();

        debug!("Downloaded {} bytes from s3://{}/{}", data.len(), self.bucket, key);

        Ok(data)
    }

    /// Download an object into a local file, for archives too large to hold
    /// in memory comfortably.
    #[instrument(skip(self))]
    pub async fn download_to_file(&self, key: &str, path: &Path) -> Result<u64> {
        let data = self.download(key).await?;
        tokio::fs::write(path, &data)
            .await
            .context("Failed to write downloaded object to file")?;
        Ok(data.len() as u64)
    }

    /// Upload cover image bytes, returning the stored key.
    #[instrument(skip(self, data))]
    pub async fn upload(&self, key: &str, data: Vec<u8>, content_type: Option<String>) -> Result<String> {
        debug!("Uploading {} bytes to s3://{}/{}", data.len(), self.bucket, key);

        let mut request = self
            .client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(ByteStream::from(data));

        if let Some(ct) = content_type {
            request = request.content_type(ct);
        }

        request.send().await.context("Failed to upload to bucket")?;

        Ok(key.to_string())
    }
}
