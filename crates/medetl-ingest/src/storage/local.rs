//! Local filesystem backend

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, instrument, warn};

use super::{ObjectEntry, ObjectStore};
use crate::error::Result;

const TEMP_PREFIX: &str = ".medetl-tmp-";

/// Object store rooted at a local directory
#[derive(Debug, Clone)]
pub struct LocalStore {
    root: PathBuf,
}

impl LocalStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &str) -> PathBuf {
        key.split('/')
            .filter(|segment| !segment.is_empty())
            .fold(self.root.clone(), |path, segment| path.join(segment))
    }

    async fn ensure_parent(path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        Ok(())
    }

    /// Sibling of `path` hidden from listings
    fn temp_path(path: &Path) -> PathBuf {
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        path.with_file_name(format!("{}{}-{}", TEMP_PREFIX, uuid::Uuid::new_v4(), file_name))
    }

    fn relative_key(&self, path: &Path) -> Option<String> {
        let relative = path.strip_prefix(&self.root).ok()?;
        let parts: Vec<String> = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect();
        Some(parts.join("/"))
    }
}

#[async_trait]
impl ObjectStore for LocalStore {
    fn uri_for(&self, key: &str) -> String {
        format!("file://{}", self.path_for(key).display())
    }

    #[instrument(skip(self, data), fields(root = %self.root.display()))]
    async fn put(&self, key: &str, data: Vec<u8>) -> Result<()> {
        let path = self.path_for(key);
        Self::ensure_parent(&path).await?;
        fs::write(&path, &data).await?;
        debug!("Wrote {} bytes to {}", data.len(), path.display());
        Ok(())
    }

    #[instrument(skip(self, data), fields(root = %self.root.display()))]
    async fn put_atomic(&self, key: &str, data: Vec<u8>) -> Result<()> {
        let path = self.path_for(key);
        Self::ensure_parent(&path).await?;

        let temp_path = Self::temp_path(&path);

        let mut file = fs::File::create(&temp_path).await?;
        file.write_all(&data).await?;
        file.sync_all().await?;
        drop(file);

        // rename within one directory replaces the target atomically
        if let Err(e) = fs::rename(&temp_path, &path).await {
            let _ = fs::remove_file(&temp_path).await;
            return Err(e.into());
        }

        debug!("Atomically replaced {} ({} bytes)", path.display(), data.len());
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        match fs::read(self.path_for(key)).await {
            Ok(data) => Ok(Some(data)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        Ok(fs::try_exists(self.path_for(key)).await?)
    }

    async fn delete(&self, key: &str) -> Result<()> {
        match fs::remove_file(self.path_for(key)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn list(&self, prefix: &str) -> Result<Vec<ObjectEntry>> {
        let start = self.path_for(prefix);
        let mut entries = Vec::new();
        let mut pending = vec![start];

        while let Some(dir) = pending.pop() {
            let mut read_dir = match fs::read_dir(&dir).await {
                Ok(rd) => rd,
                Err(e) if e.kind() == ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };

            while let Some(entry) = read_dir.next_entry().await? {
                let file_type = entry.file_type().await?;
                let path = entry.path();
                if file_type.is_dir() {
                    pending.push(path);
                    continue;
                }
                if entry.file_name().to_string_lossy().starts_with(TEMP_PREFIX) {
                    continue;
                }

                let metadata = entry.metadata().await?;
                if let Some(key) = self.relative_key(&path) {
                    entries.push(ObjectEntry {
                        key,
                        size: metadata.len(),
                        last_modified: metadata.modified().ok().map(DateTime::<Utc>::from),
                    });
                }
            }
        }

        entries.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(entries)
    }

    async fn create_exclusive(&self, key: &str, data: Vec<u8>) -> Result<bool> {
        let path = self.path_for(key);
        Self::ensure_parent(&path).await?;
        let temp_path = Self::temp_path(&path);

        let mut file = fs::File::create(&temp_path).await?;
        file.write_all(&data).await?;
        file.sync_all().await?;
        drop(file);

        // hard_link never replaces an existing target
        let linked = fs::hard_link(&temp_path, &path).await;
        let _ = fs::remove_file(&temp_path).await;
        match linked {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::AlreadyExists => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn last_modified(&self, key: &str) -> Result<Option<DateTime<Utc>>> {
        match fs::metadata(self.path_for(key)).await {
            Ok(metadata) => Ok(metadata.modified().ok().map(DateTime::<Utc>::from)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn delete_if_unchanged(&self, key: &str, expected: &[u8]) -> Result<bool> {
        let path = self.path_for(key);
        let claimed = Self::temp_path(&path);

        // Only one caller can move a given file away
        match fs::rename(&path, &claimed).await {
            Ok(()) => {},
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(false),
            Err(e) => return Err(e.into()),
        }

        let contents = fs::read(&claimed).await?;
        if contents == expected {
            fs::remove_file(&claimed).await?;
            return Ok(true);
        }

        // Replaced since it was read: put it back unless a newer one exists
        match fs::hard_link(&claimed, &path).await {
            Ok(()) => {},
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                warn!("{} was recreated while being restored", path.display());
            },
            Err(e) => {
                let _ = fs::remove_file(&claimed).await;
                return Err(e.into());
            },
        }
        fs::remove_file(&claimed).await?;
        Ok(false)
    }

    async fn delete_prefix(&self, prefix: &str) -> Result<usize> {
        let count = self.list(prefix).await?.len();
        match fs::remove_dir_all(self.path_for(prefix)).await {
            Ok(()) => Ok(count),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(0),
            Err(e) => Err(e.into()),
        }
    }
}
