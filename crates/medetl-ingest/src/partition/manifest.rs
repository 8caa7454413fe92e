//! Partition manifests
//!
//! A partition is visible to consumers if and only if its `_MANIFEST.json`
//! exists. The manifest names the data files that make up the partition
//! and carries the checksum and quality summary of the batch.

use chrono::{DateTime, NaiveDate, Utc};
use bytes::Bytes;
use medetl_common::checksum::{verify_checksum, ChecksumAlgorithm};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

use super::columnar::{decode_records, PartitionRow};
use super::PartitionKey;
use crate::error::{PipelineError, Result};
use crate::models::{DateWindow, SourceKind};
use crate::quality::{BatchReport, BatchStatus};
use crate::storage::ObjectStore;

/// Manifest document format version
pub const MANIFEST_VERSION: u32 = 1;

/// One published data file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataFile {
    /// Key relative to the published root
    pub key: String,
    pub uri: String,
    pub row_count: u64,
    pub size_bytes: u64,
    /// SHA-256 of the file bytes
    pub sha256: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    pub manifest_version: u32,
    pub schema_version: u32,
    pub source: SourceKind,
    pub logical_date: NaiveDate,
    pub window: DateWindow,
    pub run_id: Uuid,
    pub record_count: u64,
    pub quarantine_count: u64,
    pub checksum: String,
    pub checksum_algorithm: ChecksumAlgorithm,
    pub batch_status: BatchStatus,
    pub batch_report: BatchReport,
    pub data_files: Vec<DataFile>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quarantine_uri: Option<String>,
    pub written_at: DateTime<Utc>,
}

impl Manifest {
    pub fn partition_key(&self) -> PartitionKey {
        PartitionKey::new(self.source, self.logical_date)
    }

    pub fn to_json_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec_pretty(self)?)
    }

    pub fn from_json_bytes(data: &[u8]) -> Result<Self> {
        let manifest: Manifest = serde_json::from_slice(data)?;
        if manifest.manifest_version > MANIFEST_VERSION {
            return Err(PipelineError::Storage(format!(
                "Unsupported manifest version {} (max {})",
                manifest.manifest_version, MANIFEST_VERSION
            )));
        }
        Ok(manifest)
    }
}

/// Read-only access to published manifests
#[derive(Clone)]
pub struct ManifestReader {
    store: Arc<dyn ObjectStore>,
}

impl ManifestReader {
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self { store }
    }

    /// Current manifest for a partition, if one has been published
    pub async fn read(&self, source: SourceKind, logical_date: NaiveDate) -> Result<Option<Manifest>> {
        let key = PartitionKey::new(source, logical_date).manifest_key();
        debug!(%source, %logical_date, "Reading manifest {}", key);

        match self.store.get(&key).await? {
            Some(data) => Ok(Some(Manifest::from_json_bytes(&data)?)),
            None => Ok(None),
        }
    }

    /// Check every data file against the manifest.
    ///
    /// File bytes must hash to the recorded SHA-256, row counts must match,
    /// and each file must carry the partition checksum in its metadata.
    pub async fn verify(&self, manifest: &Manifest) -> Result<()> {
        let mut rows = 0u64;
        for file in &manifest.data_files {
            let data = self.store.get(&file.key).await?.ok_or_else(|| {
                PipelineError::Storage(format!("Data file {} is missing", file.key))
            })?;
            verify_checksum(&data, &file.sha256)?;

            let decoded = decode_records(Bytes::from(data))?;
            if decoded.rows.len() as u64 != file.row_count {
                return Err(PipelineError::Storage(format!(
                    "Data file {} has {} rows, manifest records {}",
                    file.key,
                    decoded.rows.len(),
                    file.row_count
                )));
            }
            if decoded.checksum.as_deref() != Some(manifest.checksum.as_str()) {
                return Err(PipelineError::Storage(format!(
                    "Data file {} was written for a different partition checksum",
                    file.key
                )));
            }
            rows += file.row_count;
        }

        if rows != manifest.record_count {
            return Err(PipelineError::Storage(format!(
                "Data files hold {} rows, manifest records {}",
                rows, manifest.record_count
            )));
        }
        info!(files = manifest.data_files.len(), rows, "Verified partition {}", manifest.partition_key());
        Ok(())
    }

    /// Decoded rows of every data file listed in the manifest
    pub async fn read_rows(&self, manifest: &Manifest) -> Result<Vec<PartitionRow>> {
        let mut rows = Vec::with_capacity(manifest.record_count as usize);
        for file in &manifest.data_files {
            let data = self.store.get(&file.key).await?.ok_or_else(|| {
                PipelineError::Storage(format!("Data file {} is missing", file.key))
            })?;
            rows.extend(decode_records(Bytes::from(data))?.rows);
        }
        Ok(rows)
    }

    pub fn uri_for(&self, source: SourceKind, logical_date: NaiveDate) -> String {
        self.store
            .uri_for(&PartitionKey::new(source, logical_date).manifest_key())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
pub(crate) mod tests {
    use super::*;
    use crate::storage::LocalStore;
    use std::collections::BTreeMap;
    use tempfile::TempDir;

    pub(crate) fn sample_manifest() -> Manifest {
        let date = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        Manifest {
            manifest_version: MANIFEST_VERSION,
            schema_version: 1,
            source: SourceKind::FdaDrugEvent,
            logical_date: date,
            window: DateWindow::for_logical_date(date, 0),
            run_id: Uuid::new_v4(),
            record_count: 92,
            quarantine_count: 8,
            checksum: "ab".repeat(32),
            checksum_algorithm: ChecksumAlgorithm::Sha256,
            batch_status: BatchStatus::PassWithQuarantine,
            batch_report: BatchReport {
                total: 100,
                accepted: 92,
                quarantined: 8,
                critical_quarantined: 0,
                duplicates_dropped: 0,
                quarantine_rate: 0.08,
                threshold: 0.1,
                rule_counts: BTreeMap::from([("required_fields".to_string(), 8)]),
                violated_rules: vec!["required_fields".to_string()],
                batch_status: BatchStatus::PassWithQuarantine,
            },
            data_files: vec![],
            quarantine_uri: None,
            written_at: Utc::now(),
        }
    }

    #[test]
    fn test_manifest_json_fields() {
        let manifest = sample_manifest();
        let json: serde_json::Value =
            serde_json::from_slice(&manifest.to_json_bytes().unwrap()).unwrap();
        assert_eq!(json["source"], "FDA_DRUG_EVENT");
        assert_eq!(json["logical_date"], "2024-01-01");
        assert_eq!(json["batch_status"], "PASS_WITH_QUARANTINE");
        assert_eq!(json["checksum_algorithm"], "sha256");
        assert!(json.get("quarantine_uri").is_none());
    }

    #[test]
    fn test_rejects_newer_manifest_version() {
        let mut manifest = sample_manifest();
        manifest.manifest_version = MANIFEST_VERSION + 1;
        let bytes = serde_json::to_vec(&manifest).unwrap();
        assert!(Manifest::from_json_bytes(&bytes).is_err());
    }

    #[tokio::test]
    async fn test_reader_returns_none_before_publish() {
        let dir = TempDir::new().unwrap();
        let store: Arc<dyn ObjectStore> = Arc::new(LocalStore::new(dir.path()));
        let reader = ManifestReader::new(store.clone());
        let manifest = sample_manifest();

        assert!(reader.read(manifest.source, manifest.logical_date).await.unwrap().is_none());

        store
            .put_atomic(&manifest.partition_key().manifest_key(), manifest.to_json_bytes().unwrap())
            .await
            .unwrap();
        let read = reader.read(manifest.source, manifest.logical_date).await.unwrap().unwrap();
        assert_eq!(read.run_id, manifest.run_id);
        assert_eq!(read.record_count, 92);
    }
}
