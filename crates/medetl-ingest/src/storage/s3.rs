//! S3 / MinIO backend

use async_trait::async_trait;
use aws_sdk_s3::{
    config::{Credentials, Region},
    primitives::ByteStream,
    Client,
};
use chrono::{DateTime, Utc};
use tracing::{debug, info, instrument};

use super::{join_key, ObjectEntry, ObjectStore, S3Settings};
use crate::error::{PipelineError, Result};

/// Object store over one bucket and key prefix
#[derive(Clone)]
pub struct S3Store {
    client: Client,
    bucket: String,
    prefix: String,
}

impl S3Store {
    pub async fn new(settings: &S3Settings, bucket: String, prefix: String) -> Self {
        debug!(
            endpoint = ?settings.endpoint,
            region = %settings.region,
            path_style = settings.path_style,
            static_credentials = settings.static_credentials().is_some(),
            "Initializing S3 store"
        );

        let mut builder = match settings.static_credentials() {
            Some((access, secret)) => aws_sdk_s3::Config::builder()
                .behavior_version(aws_sdk_s3::config::BehaviorVersion::latest())
                .credentials_provider(Credentials::new(access, secret, None, None, "medetl-storage")),
            None => {
                let shared = aws_config::load_defaults(aws_config::BehaviorVersion::latest()).await;
                aws_sdk_s3::config::Builder::from(&shared)
            },
        };

        builder = builder
            .region(Region::new(settings.region.clone()))
            .force_path_style(settings.path_style);

        if let Some(endpoint) = &settings.endpoint {
            builder = builder.endpoint_url(endpoint);
        }

        let client = Client::from_conf(builder.build());
        info!("S3 store initialized for s3://{}/{}", bucket, prefix);

        Self {
            client,
            bucket,
            prefix,
        }
    }

    pub fn from_client(client: Client, bucket: impl Into<String>, prefix: impl Into<String>) -> Self {
        Self {
            client,
            bucket: bucket.into(),
            prefix: prefix.into(),
        }
    }

    fn full_key(&self, key: &str) -> String {
        join_key(&[&self.prefix, key])
    }

    fn strip_prefix<'a>(&self, full: &'a str) -> &'a str {
        if self.prefix.is_empty() {
            return full;
        }
        full.strip_prefix(self.prefix.as_str())
            .map(|rest| rest.trim_start_matches('/'))
            .unwrap_or(full)
    }
}

fn storage_err(action: &str, key: &str, err: impl std::fmt::Display) -> PipelineError {
    PipelineError::Storage(format!("Failed to {} {}: {}", action, key, err))
}

fn to_chrono(dt: &aws_sdk_s3::primitives::DateTime) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp(dt.secs(), dt.subsec_nanos())
}

#[async_trait]
impl ObjectStore for S3Store {
    fn uri_for(&self, key: &str) -> String {
        format!("s3://{}/{}", self.bucket, self.full_key(key))
    }

    #[instrument(skip(self, data), fields(bucket = %self.bucket))]
    async fn put(&self, key: &str, data: Vec<u8>) -> Result<()> {
        let full = self.full_key(key);
        let size = data.len();

        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(&full)
            .body(ByteStream::from(data))
            .send()
            .await
            .map_err(|e| storage_err("upload", &full, e))?;

        debug!("Uploaded {} bytes to s3://{}/{}", size, self.bucket, full);
        Ok(())
    }

    async fn put_atomic(&self, key: &str, data: Vec<u8>) -> Result<()> {
        // single PutObject is all-or-nothing for readers
        self.put(key, data).await
    }

    #[instrument(skip(self), fields(bucket = %self.bucket))]
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let full = self.full_key(key);

        let response = match self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(&full)
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) if e.as_service_error().map(|s| s.is_no_such_key()).unwrap_or(false) => {
                return Ok(None)
            },
            Err(e) => return Err(storage_err("download", &full, e)),
        };

        let data = response
            .body
            .collect()
            .await
            .map_err(|e| storage_err("read body of", &full, e))?
            .into_bytes()
            .to_vec();

        Ok(Some(data))
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        let full = self.full_key(key);
        match self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(&full)
            .send()
            .await
        {
            Ok(_) => Ok(true),
            Err(e) if e.as_service_error().map(|s| s.is_not_found()).unwrap_or(false) => Ok(false),
            Err(e) => Err(storage_err("check", &full, e)),
        }
    }

    #[instrument(skip(self), fields(bucket = %self.bucket))]
    async fn delete(&self, key: &str) -> Result<()> {
        let full = self.full_key(key);
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(&full)
            .send()
            .await
            .map_err(|e| storage_err("delete", &full, e))?;
        debug!("Deleted s3://{}/{}", self.bucket, full);
        Ok(())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<ObjectEntry>> {
        let full_prefix = self.full_key(prefix);
        let mut entries = Vec::new();
        let mut continuation: Option<String> = None;

        loop {
            let response = self
                .client
                .list_objects_v2()
                .bucket(&self.bucket)
                .prefix(&full_prefix)
                .set_continuation_token(continuation.take())
                .send()
                .await
                .map_err(|e| storage_err("list", &full_prefix, e))?;

            for object in response.contents() {
                if let Some(key) = object.key() {
                    entries.push(ObjectEntry {
                        key: self.strip_prefix(key).to_string(),
                        size: object.size().unwrap_or(0).max(0) as u64,
                        last_modified: object.last_modified().and_then(to_chrono),
                    });
                }
            }

            match response.next_continuation_token() {
                Some(token) if response.is_truncated().unwrap_or(false) => {
                    continuation = Some(token.to_string());
                },
                _ => break,
            }
        }

        entries.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(entries)
    }

    #[instrument(skip(self, data), fields(bucket = %self.bucket))]
    async fn create_exclusive(&self, key: &str, data: Vec<u8>) -> Result<bool> {
        let full = self.full_key(key);

        match self
            .client
            .put_object()
            .bucket(&self.bucket)
            .key(&full)
            .if_none_match("*")
            .body(ByteStream::from(data))
            .send()
            .await
        {
            Ok(_) => Ok(true),
            Err(e) => {
                // 412 PreconditionFailed: object exists; 409: concurrent conditional write
                let status = e.raw_response().map(|r| r.status().as_u16());
                if matches!(status, Some(412) | Some(409)) {
                    Ok(false)
                } else {
                    Err(storage_err("conditionally create", &full, e))
                }
            },
        }
    }

    async fn last_modified(&self, key: &str) -> Result<Option<DateTime<Utc>>> {
        let full = self.full_key(key);
        match self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(&full)
            .send()
            .await
        {
            Ok(head) => Ok(head.last_modified().and_then(to_chrono)),
            Err(e) if e.as_service_error().map(|s| s.is_not_found()).unwrap_or(false) => Ok(None),
            Err(e) => Err(storage_err("check", &full, e)),
        }
    }

    async fn delete_if_unchanged(&self, key: &str, expected: &[u8]) -> Result<bool> {
        let full = self.full_key(key);

        let response = match self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(&full)
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) if e.as_service_error().map(|s| s.is_no_such_key()).unwrap_or(false) => {
                return Ok(false)
            },
            Err(e) => return Err(storage_err("download", &full, e)),
        };
        let Some(etag) = response.e_tag().map(str::to_string) else {
            return Err(storage_err("read etag of", &full, "missing ETag"));
        };
        let data = response
            .body
            .collect()
            .await
            .map_err(|e| storage_err("read body of", &full, e))?
            .into_bytes();
        if data.as_ref() != expected {
            return Ok(false);
        }

        match self
            .client
            .delete_object()
            .bucket(&self.bucket)
            .key(&full)
            .if_match(etag)
            .send()
            .await
        {
            Ok(_) => Ok(true),
            Err(e) => {
                let status = e.raw_response().map(|r| r.status().as_u16());
                if matches!(status, Some(412) | Some(404)) {
                    Ok(false)
                } else {
                    Err(storage_err("conditionally delete", &full, e))
                }
            },
        }
    }
}
