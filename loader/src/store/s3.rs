use async_trait::async_trait;
use aws_config::{BehaviorVersion, Region};
use aws_sdk_s3::Client;
use aws_sdk_s3::config::Credentials;
use aws_sdk_s3::primitives::ByteStream;
use bytes::Bytes;
use loader_config::shared::S3StagingConfig;
use tracing::{debug, info};

use crate::error::{ErrorKind, LoadResult};
use crate::load_error;
use crate::store::ObjectStore;

/// [`ObjectStore`] backed by an S3 bucket.
///
/// Keys are placed under the configured prefix and exposed as
/// `s3://{bucket}/{prefix}/{key}`.
#[derive(Debug, Clone)]
pub struct S3ObjectStore {
    client: Client,
    bucket: String,
    prefix: String,
}

impl S3ObjectStore {
    /// Builds a client from the staging settings.
    ///
    /// Static credentials are used when configured, the default AWS
    /// credential chain otherwise. No request is sent.
    pub async fn new(config: &S3StagingConfig) -> S3ObjectStore {
        let mut loader = aws_config::defaults(BehaviorVersion::latest());

        if let Some(region) = &config.s3_region {
            loader = loader.region(Region::new(region.clone()));
        }
        if let Some(endpoint) = &config.s3_endpoint_url {
            loader = loader.endpoint_url(endpoint);
        }
        if let Some((key_id, secret)) = config.static_credentials() {
            let credentials = Credentials::new(
                key_id,
                secret.expose(),
                config
                    .aws_session_token
                    .as_ref()
                    .map(|token| token.expose().to_string()),
                None,
                "loader-static",
            );
            loader = loader.credentials_provider(credentials);
        }

        let sdk_config = loader.load().await;
        let s3_config = aws_sdk_s3::config::Builder::from(&sdk_config)
            .force_path_style(config.s3_endpoint_url.is_some())
            .build();

        S3ObjectStore {
            client: Client::from_conf(s3_config),
            bucket: config.s3_bucket.clone(),
            prefix: config.normalized_prefix().to_string(),
        }
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    /// Checks that the bucket is reachable with the configured credentials.
    pub async fn test_connection(&self) -> LoadResult<()> {
        info!(bucket = %self.bucket, "testing s3 connection");

        self.client
            .head_bucket()
            .bucket(&self.bucket)
            .send()
            .await
            .map_err(|err| {
                load_error!(
                    ErrorKind::ConnectionError,
                    "S3 bucket is not reachable",
                    format!("{}: {err:?}", self.bucket)
                )
            })?;

        Ok(())
    }

    fn full_key(&self, key: &str) -> String {
        if self.prefix.is_empty() {
            key.to_string()
        } else {
            format!("{}/{key}", self.prefix)
        }
    }
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    fn uri_for(&self, key: &str) -> String {
        format!("s3://{}/{}", self.bucket, self.full_key(key))
    }

    async fn put(&self, key: &str, body: Bytes) -> LoadResult<()> {
        let full_key = self.full_key(key);
        debug!(bucket = %self.bucket, key = %full_key, bytes = body.len(), "uploading staged object");

        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(&full_key)
            .body(ByteStream::from(body))
            .content_type("application/octet-stream")
            .send()
            .await
            .map_err(|err| {
                load_error!(
                    ErrorKind::StagingError,
                    "S3 upload failed",
                    format!("s3://{}/{full_key}: {err:?}", self.bucket)
                )
            })?;

        Ok(())
    }

    async fn delete(&self, key: &str) -> LoadResult<()> {
        let full_key = self.full_key(key);

        // S3 answers 204 for keys that do not exist.
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(&full_key)
            .send()
            .await
            .map_err(|err| {
                load_error!(
                    ErrorKind::CleanupError,
                    "S3 delete failed",
                    format!("s3://{}/{full_key}: {err:?}", self.bucket)
                )
            })?;

        debug!(bucket = %self.bucket, key = %full_key, "deleted staged object");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use loader_config::shared::StagingFormat;

    use super::*;

    fn staging(prefix: &str) -> S3StagingConfig {
        S3StagingConfig {
            s3_bucket: "loads".to_string(),
            s3_region: Some("eu-central-1".to_string()),
            s3_prefix: prefix.to_string(),
            s3_endpoint_url: Some("http://localhost:9000".to_string()),
            aws_access_key_id: Some("minio".to_string()),
            aws_secret_access_key: Some("minio123".into()),
            aws_session_token: None,
            staging_format: StagingFormat::Parquet,
        }
    }

    #[tokio::test]
    async fn uris_include_the_prefix() {
        let store = S3ObjectStore::new(&staging("/staging/")).await;
        assert_eq!(store.uri_for("t_1.parquet"), "s3://loads/staging/t_1.parquet");

        let store = S3ObjectStore::new(&staging("")).await;
        assert_eq!(store.uri_for("t_1.parquet"), "s3://loads/t_1.parquet");
    }
}
