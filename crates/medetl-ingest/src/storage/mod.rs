//! Object storage backends
//!
//! Staging, published, and quarantine roots are each an [`ObjectStore`]
//! selected from a location URI: a plain path or `file://` URI opens a
//! [`LocalStore`], `s3://bucket/prefix` opens an [`S3Store`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::path::PathBuf;
use std::sync::Arc;

use crate::error::{PipelineError, Result};

pub mod config;
pub mod local;
pub mod s3;

pub use config::S3Settings;
pub use local::LocalStore;
pub use s3::S3Store;

/// Listing entry; keys are relative to the store root
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectEntry {
    pub key: String,
    pub size: u64,
    pub last_modified: Option<DateTime<Utc>>,
}

/// Minimal key/value object store used by the writer and checkpoints.
///
/// Keys are `/`-separated and relative to the store's root.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Fully qualified URI for a key, used in manifests and run results
    fn uri_for(&self, key: &str) -> String;

    async fn put(&self, key: &str, data: Vec<u8>) -> Result<()>;

    /// Replace `key` so readers observe either the old or the new bytes
    async fn put_atomic(&self, key: &str, data: Vec<u8>) -> Result<()>;

    /// `None` when the key does not exist
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    async fn exists(&self, key: &str) -> Result<bool>;

    /// Deleting a missing key is not an error
    async fn delete(&self, key: &str) -> Result<()>;

    /// All objects below `prefix`, sorted by key
    async fn list(&self, prefix: &str) -> Result<Vec<ObjectEntry>>;

    /// Create `key` only if absent; returns `false` when it already exists.
    ///
    /// Readers never observe the key with partial contents.
    async fn create_exclusive(&self, key: &str, data: Vec<u8>) -> Result<bool>;

    /// `None` when the key does not exist
    async fn last_modified(&self, key: &str) -> Result<Option<DateTime<Utc>>>;

    /// Delete `key` only if it still holds `expected`; `false` otherwise
    async fn delete_if_unchanged(&self, key: &str, expected: &[u8]) -> Result<bool>;

    /// Remove every object below `prefix`, returning how many were deleted
    async fn delete_prefix(&self, prefix: &str) -> Result<usize> {
        let entries = self.list(prefix).await?;
        for entry in &entries {
            self.delete(&entry.key).await?;
        }
        Ok(entries.len())
    }
}

/// Parsed storage root
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageLocation {
    Local(PathBuf),
    S3 { bucket: String, prefix: String },
}

impl StorageLocation {
    pub fn parse(uri: &str) -> Result<Self> {
        let uri = uri.trim();
        if uri.is_empty() {
            return Err(PipelineError::Config("Storage location cannot be empty".to_string()));
        }

        if let Some(rest) = uri.strip_prefix("s3://") {
            let (bucket, prefix) = match rest.split_once('/') {
                Some((bucket, prefix)) => (bucket, prefix.trim_matches('/')),
                None => (rest, ""),
            };
            if bucket.is_empty() {
                return Err(PipelineError::Config(format!("Missing bucket in {}", uri)));
            }
            return Ok(StorageLocation::S3 {
                bucket: bucket.to_string(),
                prefix: prefix.to_string(),
            });
        }

        if let Some(path) = uri.strip_prefix("file://") {
            return Ok(StorageLocation::Local(PathBuf::from(path)));
        }

        if uri.contains("://") {
            return Err(PipelineError::Config(format!(
                "Unsupported storage scheme: {}",
                uri
            )));
        }

        Ok(StorageLocation::Local(PathBuf::from(uri)))
    }
}

/// Open the backend for a location URI
pub async fn open_store(uri: &str) -> Result<Arc<dyn ObjectStore>> {
    match StorageLocation::parse(uri)? {
        StorageLocation::Local(root) => Ok(Arc::new(LocalStore::new(root))),
        StorageLocation::S3 { bucket, prefix } => {
            let settings = S3Settings::from_env();
            Ok(Arc::new(S3Store::new(&settings, bucket, prefix).await))
        },
    }
}

/// Join key segments with `/`, skipping empty ones
pub(crate) fn join_key(parts: &[&str]) -> String {
    parts
        .iter()
        .map(|p| p.trim_matches('/'))
        .filter(|p| !p.is_empty())
        .collect::<Vec<_>>()
        .join("/")
}
