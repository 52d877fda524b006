//! S3-compatible object store (MinIO in the reference deployment).

use aws_sdk_s3::config::{BehaviorVersion, Credentials, Region};
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client;
use tracing::debug;

use super::{validate_key, ObjectStore, S3Config, StorageError};

pub struct S3ObjectStore {
    /// `None` when the referenced credentials were not set.
    client: Option<Client>,
    bucket: String,
    missing: Vec<String>,
}

impl S3ObjectStore {
    /// Build a store from `config`, resolving credentials from the environment.
    ///
    /// Absent credentials are not an error here: every call reports
    /// [`StorageError::MissingCredentials`] instead, so the failure surfaces
    /// inside a cycle where it can be recorded.
    pub fn new(config: &S3Config) -> Result<Self, StorageError> {
        if config.bucket.trim().is_empty() {
            return Err(StorageError::Config("bucket must be set".to_string()));
        }

        let access_key = read_env(&config.access_key_env);
        let secret_key = read_env(&config.secret_key_env);
        let mut missing = Vec::new();
        if access_key.is_none() {
            missing.push(config.access_key_env.clone());
        }
        if secret_key.is_none() {
            missing.push(config.secret_key_env.clone());
        }

        let client = match (access_key, secret_key) {
            (Some(ak), Some(sk)) => {
                let credentials = Credentials::new(ak, sk, None, None, "freshness-agent");
                let mut builder = aws_sdk_s3::Config::builder()
                    .behavior_version(BehaviorVersion::latest())
                    .region(Region::new(config.region.clone()))
                    .credentials_provider(credentials)
                    .force_path_style(config.force_path_style);
                if let Some(endpoint) = &config.endpoint {
                    builder = builder.endpoint_url(endpoint);
                }
                Some(Client::from_conf(builder.build()))
            }
            _ => None,
        };

        Ok(Self {
            client,
            bucket: config.bucket.clone(),
            missing,
        })
    }

    fn client(&self) -> Result<&Client, StorageError> {
        self.client.as_ref().ok_or_else(|| {
            StorageError::MissingCredentials(format!("set {}", self.missing.join(" and ")))
        })
    }
}

fn read_env(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

#[async_trait::async_trait]
impl ObjectStore for S3ObjectStore {
    async fn list(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
        let client = self.client()?;
        let mut keys = Vec::new();
        let mut continuation: Option<String> = None;

        loop {
            let resp = client
                .list_objects_v2()
                .bucket(&self.bucket)
                .prefix(prefix)
                .set_continuation_token(continuation.take())
                .send()
                .await
                .map_err(|e| StorageError::Backend(format!("list {}: {}", prefix, e)))?;

            keys.extend(resp.contents().iter().filter_map(|o| o.key().map(str::to_string)));

            match resp.next_continuation_token() {
                Some(token) if resp.is_truncated().unwrap_or(false) => {
                    continuation = Some(token.to_string());
                }
                _ => break,
            }
        }

        debug!(bucket = %self.bucket, %prefix, count = keys.len(), "Listed objects");
        Ok(keys)
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>, StorageError> {
        validate_key(key)?;
        let client = self.client()?;
        let resp = client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| {
                let not_found = e
                    .as_service_error()
                    .map(|se| se.is_no_such_key())
                    .unwrap_or(false);
                if not_found {
                    StorageError::NotFound(self.uri(key))
                } else {
                    StorageError::Backend(format!("get {}: {}", key, e))
                }
            })?;
        let data = resp
            .body
            .collect()
            .await
            .map_err(|e| StorageError::Backend(format!("read {}: {}", key, e)))?;
        Ok(data.into_bytes().to_vec())
    }

    async fn put(&self, key: &str, data: Vec<u8>, content_type: &str) -> Result<(), StorageError> {
        validate_key(key)?;
        let client = self.client()?;
        client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .content_type(content_type)
            .body(ByteStream::from(data))
            .send()
            .await
            .map_err(|e| StorageError::Backend(format!("put {}: {}", key, e)))?;
        Ok(())
    }

    fn uri(&self, key: &str) -> String {
        format!("s3://{}/{}", self.bucket, key)
    }
}
