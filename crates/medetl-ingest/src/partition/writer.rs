//! Staged, atomically published partition writes
//!
//! Publish sequence for one `(source, logical_date)`:
//!
//! 1. stage the Parquet file under a run-scoped staging key
//! 2. promote it to a run- and content-named data key (invisible until referenced)
//! 3. take the partition's manifest lock
//! 4. atomically replace `_MANIFEST.json`
//! 5. release the lock and drop the staging directory
//!
//! A crash anywhere before step 4 leaves the previous manifest untouched.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use medetl_common::checksum::{sha256_hex, ChecksumAlgorithm, LineHasher};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use super::columnar::encode_records;
use super::manifest::{DataFile, Manifest, MANIFEST_VERSION};
use super::{staging_key, staging_prefix, staging_root, PartitionKey};
use crate::error::{PipelineError, Result};
use crate::models::{CanonicalRecord, DateWindow, SourceKind};
use crate::normalize::SCHEMA_VERSION;
use crate::quality::{BatchReport, QualityVerdict, Violation};
use crate::retry::RetryPolicy;
use crate::storage::ObjectStore;

/// A staged but unpublished partition file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagedPartition {
    pub key: PartitionKey,
    pub run_id: Uuid,
    pub staging_key: String,
    pub checksum: String,
    pub record_count: u64,
    pub size_bytes: u64,
}

/// Everything about a batch the manifest records besides the data itself
#[derive(Debug, Clone)]
pub struct PublishContext {
    pub key: PartitionKey,
    pub window: DateWindow,
    pub run_id: Uuid,
    pub report: BatchReport,
    pub quarantine_uri: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct LockRecord {
    run_id: Uuid,
    acquired_at: DateTime<Utc>,
}

/// One quarantine line: the record, what it violated, and where it came from
#[derive(Serialize)]
struct QuarantineEntry<'a> {
    record_id: &'a str,
    source: SourceKind,
    event_date: chrono::NaiveDate,
    critical: bool,
    violations: &'a [Violation],
    record: &'a CanonicalRecord,
}

/// Checksum over the canonical lines of a record set, in order
pub fn partition_checksum(records: &[CanonicalRecord]) -> Result<String> {
    let mut hasher = LineHasher::new();
    for record in records {
        hasher.update_line(&record.canonical_line()?);
    }
    Ok(hasher.finalize_hex())
}

pub struct PartitionWriter {
    staging: Arc<dyn ObjectStore>,
    published: Arc<dyn ObjectStore>,
    quarantine: Arc<dyn ObjectStore>,
    publish_retry: RetryPolicy,
    lock_ttl: Duration,
}

impl PartitionWriter {
    pub fn new(
        staging: Arc<dyn ObjectStore>,
        published: Arc<dyn ObjectStore>,
        quarantine: Arc<dyn ObjectStore>,
        publish_retry: RetryPolicy,
        lock_ttl: Duration,
    ) -> Self {
        Self {
            staging,
            published,
            quarantine,
            publish_retry,
            lock_ttl,
        }
    }

    /// Write the accepted set of a batch: stage, then publish
    pub async fn write(&self, ctx: &PublishContext, records: &[CanonicalRecord]) -> Result<Manifest> {
        let staged = self.stage(ctx.key, ctx.run_id, records).await?;
        self.publish(&staged, ctx).await
    }

    /// Encode and stage records under the run's staging directory
    #[instrument(skip(self, key, run_id, records), fields(partition = %key, run_id = %run_id, records = records.len()))]
    pub async fn stage(
        &self,
        key: PartitionKey,
        run_id: Uuid,
        records: &[CanonicalRecord],
    ) -> Result<StagedPartition> {
        let checksum = partition_checksum(records)?;
        let data = encode_records(records, SCHEMA_VERSION, run_id, &checksum)?;
        let size_bytes = data.len() as u64;
        let staging_key = staging_key(key.source, run_id);

        self.staging.put(&staging_key, data.to_vec()).await?;
        debug!("Staged {} bytes at {}", size_bytes, staging_key);

        Ok(StagedPartition {
            key,
            run_id,
            staging_key,
            checksum,
            record_count: records.len() as u64,
            size_bytes,
        })
    }

    /// Promote a staged file and atomically swap the partition manifest
    #[instrument(skip(self, staged, ctx), fields(partition = %staged.key, run_id = %staged.run_id))]
    pub async fn publish(&self, staged: &StagedPartition, ctx: &PublishContext) -> Result<Manifest> {
        let data = self.staging.get(&staged.staging_key).await?.ok_or_else(|| {
            PipelineError::Storage(format!("Staged file {} is missing", staged.staging_key))
        })?;

        let data_key = staged.key.data_key(staged.run_id, &staged.checksum);
        let file_sha256 = sha256_hex(&data);
        self.published.put(&data_key, data).await?;
        debug!("Promoted staged file to {}", data_key);

        let manifest = Manifest {
            manifest_version: MANIFEST_VERSION,
            schema_version: SCHEMA_VERSION,
            source: staged.key.source,
            logical_date: staged.key.logical_date,
            window: ctx.window,
            run_id: staged.run_id,
            record_count: staged.record_count,
            quarantine_count: ctx.report.quarantined,
            checksum: staged.checksum.clone(),
            checksum_algorithm: ChecksumAlgorithm::Sha256,
            batch_status: ctx.report.batch_status,
            batch_report: ctx.report.clone(),
            data_files: vec![DataFile {
                uri: self.published.uri_for(&data_key),
                key: data_key,
                row_count: staged.record_count,
                size_bytes: staged.size_bytes,
                sha256: file_sha256,
            }],
            quarantine_uri: ctx.quarantine_uri.clone(),
            written_at: Utc::now(),
        };

        self.swap_manifest(&manifest).await?;

        let staging_dir = staging_prefix(staged.key.source, staged.run_id);
        if let Err(e) = self.staging.delete_prefix(&staging_dir).await {
            // Published already; sweep_staging collects leftovers
            warn!("Failed to clean staging directory {}: {}", staging_dir, e);
        }

        info!(
            source = %manifest.source,
            logical_date = %manifest.logical_date,
            records = manifest.record_count,
            checksum = %manifest.checksum,
            "Published partition"
        );
        Ok(manifest)
    }

    async fn swap_manifest(&self, manifest: &Manifest) -> Result<()> {
        let key = manifest.partition_key();
        let bytes = manifest.to_json_bytes()?;

        let lock = self.acquire_lock(&key, manifest.run_id).await?;

        if let Some(previous) = self.published.get(&key.manifest_key()).await.ok().flatten() {
            if let Ok(previous) = Manifest::from_json_bytes(&previous) {
                info!(
                    previous_run = %previous.run_id,
                    previous_checksum = %previous.checksum,
                    "Replacing existing manifest for {}",
                    key
                );
            }
        }

        let written = self.published.put_atomic(&key.manifest_key(), bytes).await;
        self.release_lock(&key, &lock).await;
        written
    }

    /// Take the partition lock, returning the exact bytes written to it.
    ///
    /// A lock older than the TTL is broken. Its age comes from the recorded
    /// acquisition time, or from the object's mtime when the body cannot be
    /// read. Breaking only removes the lock if it still holds what was read.
    async fn acquire_lock(&self, key: &PartitionKey, run_id: Uuid) -> Result<Vec<u8>> {
        let lock_key = key.lock_key();
        let record = serde_json::to_vec(&LockRecord {
            run_id,
            acquired_at: Utc::now(),
        })?;
        let ttl = ChronoDuration::from_std(self.lock_ttl).unwrap_or(ChronoDuration::MAX);
        let mut last_conflict: Option<PipelineError> = None;

        for attempt in 1..=self.publish_retry.max_attempts {
            if self.published.create_exclusive(&lock_key, record.clone()).await? {
                debug!(attempt, "Acquired manifest lock {}", lock_key);
                return Ok(record);
            }

            let Some(current) = self.published.get(&lock_key).await? else {
                // Released between our create and read
                if self.published.create_exclusive(&lock_key, record.clone()).await? {
                    return Ok(record);
                }
                continue;
            };

            let holder = serde_json::from_slice::<LockRecord>(&current).ok();
            let acquired_at = match &holder {
                Some(holder) => Some(holder.acquired_at),
                None => self.published.last_modified(&lock_key).await?,
            };
            let stale = acquired_at.map_or(false, |at| Utc::now() - at > ttl);

            if stale {
                warn!(
                    attempt,
                    holder = ?holder.as_ref().map(|h| h.run_id),
                    "Breaking stale manifest lock {}",
                    lock_key
                );
                if self.published.delete_if_unchanged(&lock_key, &current).await?
                    && self.published.create_exclusive(&lock_key, record.clone()).await?
                {
                    return Ok(record);
                }
            } else {
                let conflict = PipelineError::PublishConflict {
                    key: lock_key.clone(),
                    holder: holder
                        .map(|h| h.run_id.to_string())
                        .unwrap_or_else(|| "unknown".to_string()),
                };
                warn!(attempt, "Manifest lock busy: {}", conflict);
                last_conflict = Some(conflict);
            }

            if attempt < self.publish_retry.max_attempts {
                tokio::time::sleep(self.publish_retry.backoff(attempt)).await;
            }
        }

        let detail = last_conflict
            .map(|e| e.to_string())
            .unwrap_or_else(|| format!("could not acquire {}", lock_key));
        Err(PipelineError::SourceFailure {
            source_kind: key.source,
            attempts: self.publish_retry.max_attempts,
            detail,
        })
    }

    async fn release_lock(&self, key: &PartitionKey, lock: &[u8]) {
        let lock_key = key.lock_key();
        match self.published.delete_if_unchanged(&lock_key, lock).await {
            Ok(true) => {},
            Ok(false) => warn!("Manifest lock {} was no longer ours to release", lock_key),
            Err(e) => warn!("Failed to release manifest lock {}: {}", lock_key, e),
        }
    }

    /// Write quarantined records as JSON lines; `None` when there are none
    #[instrument(skip(self, key, run_id, quarantined), fields(partition = %key, run_id = %run_id, records = quarantined.len()))]
    pub async fn write_quarantine(
        &self,
        key: PartitionKey,
        run_id: Uuid,
        quarantined: &[(CanonicalRecord, QualityVerdict)],
    ) -> Result<Option<String>> {
        if quarantined.is_empty() {
            return Ok(None);
        }

        let mut lines = Vec::new();
        for (record, verdict) in quarantined {
            let entry = QuarantineEntry {
                record_id: &record.record_id,
                source: record.source,
                event_date: record.event_date,
                critical: verdict.critical,
                violations: &verdict.violations,
                record,
            };
            serde_json::to_writer(&mut lines, &entry)?;
            lines.push(b'\n');
        }

        let quarantine_key = key.quarantine_key(run_id);
        self.quarantine.put_atomic(&quarantine_key, lines).await?;
        let uri = self.quarantine.uri_for(&quarantine_key);
        info!("Quarantined {} records to {}", quarantined.len(), uri);
        Ok(Some(uri))
    }

    /// Delete staging directories whose files are all older than `older_than`.
    /// Returns the number of abandoned runs removed.
    #[instrument(skip(self))]
    pub async fn sweep_staging(&self, source: SourceKind, older_than: Duration) -> Result<usize> {
        let cutoff = Utc::now()
            - ChronoDuration::from_std(older_than).unwrap_or(ChronoDuration::zero());
        let root = staging_root(source);

        let mut newest_by_run: BTreeMap<String, Option<DateTime<Utc>>> = BTreeMap::new();
        for entry in self.staging.list(&root).await? {
            let Some(run_dir) = entry
                .key
                .strip_prefix(&format!("{}/", root))
                .and_then(|rest| rest.split('/').next())
                .filter(|dir| dir.starts_with("run_id="))
            else {
                continue;
            };

            let newest = newest_by_run.entry(run_dir.to_string()).or_insert(entry.last_modified);
            if entry.last_modified > *newest {
                *newest = entry.last_modified;
            }
        }

        let mut removed = 0;
        for (run_dir, newest) in newest_by_run {
            // unknown modification time counts as abandoned
            if newest.map_or(true, |t| t < cutoff) {
                let prefix = format!("{}/{}", root, run_dir);
                let files = self.staging.delete_prefix(&prefix).await?;
                info!("Swept abandoned staging run {} ({} files)", prefix, files);
                removed += 1;
            }
        }

        Ok(removed)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::models::{FieldValue, Provenance};
    use crate::partition::columnar::decode_records;
    use crate::partition::ManifestReader;
    use crate::quality::{BatchStatus, VerdictStatus};
    use crate::storage::LocalStore;
    use chrono::NaiveDate;
    use tempfile::TempDir;

    struct Fixture {
        _dir: TempDir,
        staging: Arc<dyn ObjectStore>,
        published: Arc<dyn ObjectStore>,
        writer: PartitionWriter,
    }

    fn fixture() -> Fixture {
        let dir = TempDir::new().unwrap();
        let staging: Arc<dyn ObjectStore> = Arc::new(LocalStore::new(dir.path().join("staging")));
        let published: Arc<dyn ObjectStore> = Arc::new(LocalStore::new(dir.path().join("published")));
        let quarantine: Arc<dyn ObjectStore> = Arc::new(LocalStore::new(dir.path().join("quarantine")));
        let writer = PartitionWriter::new(
            staging.clone(),
            published.clone(),
            quarantine,
            RetryPolicy::new(2, Duration::from_millis(1), Duration::from_millis(5)),
            Duration::from_secs(60),
        );
        Fixture {
            _dir: dir,
            staging,
            published,
            writer,
        }
    }

    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, 1).unwrap()
    }

    fn record(n: u32) -> CanonicalRecord {
        let mut payload = BTreeMap::new();
        payload.insert("safety_report_id".to_string(), FieldValue::Text(n.to_string()));
        CanonicalRecord {
            record_id: format!("r{}", n),
            source: SourceKind::FdaDrugEvent,
            schema_version: 1,
            event_date: day(),
            payload,
            provenance: Provenance {
                source_id: "openfda".into(),
                page_cursor: None,
                page_number: 1,
                fetched_at: Utc::now(),
            },
        }
    }

    fn report(accepted: u64) -> BatchReport {
        BatchReport {
            total: accepted,
            accepted,
            quarantined: 0,
            critical_quarantined: 0,
            duplicates_dropped: 0,
            quarantine_rate: 0.0,
            threshold: 0.1,
            rule_counts: BTreeMap::new(),
            violated_rules: vec![],
            batch_status: BatchStatus::Pass,
        }
    }

    fn ctx(run_id: Uuid, accepted: u64) -> PublishContext {
        PublishContext {
            key: PartitionKey::new(SourceKind::FdaDrugEvent, day()),
            window: DateWindow::for_logical_date(day(), 0),
            run_id,
            report: report(accepted),
            quarantine_uri: None,
        }
    }

    #[tokio::test]
    async fn test_write_publishes_manifest_and_cleans_staging() {
        let f = fixture();
        let run_id = Uuid::new_v4();
        let records: Vec<_> = (0..3).map(record).collect();

        let manifest = f.writer.write(&ctx(run_id, 3), &records).await.unwrap();

        assert_eq!(manifest.record_count, 3);
        assert_eq!(manifest.checksum, partition_checksum(&records).unwrap());
        let data = f.published.get(&manifest.data_files[0].key).await.unwrap().unwrap();
        let decoded = decode_records(bytes::Bytes::from(data)).unwrap();
        assert_eq!(decoded.rows.len(), 3);
        assert_eq!(decoded.checksum.as_deref(), Some(manifest.checksum.as_str()));

        assert!(f.staging.list("fda_drug_event/_staging").await.unwrap().is_empty());
        assert!(!f.published.exists(&manifest.partition_key().lock_key()).await.unwrap());
        ManifestReader::new(f.published.clone()).verify(&manifest).await.unwrap();
    }

    #[tokio::test]
    async fn test_verify_detects_tampered_data_file() {
        let f = fixture();
        let records: Vec<_> = (0..3).map(record).collect();
        let manifest = f.writer.write(&ctx(Uuid::new_v4(), 3), &records).await.unwrap();
        let reader = ManifestReader::new(f.published.clone());

        // A file from another batch under this manifest's key
        let other = f.writer.write(&ctx(Uuid::new_v4(), 1), &[record(9)]).await.unwrap();
        let foreign = f.published.get(&other.data_files[0].key).await.unwrap().unwrap();
        f.published.put(&manifest.data_files[0].key, foreign.clone()).await.unwrap();
        let err = reader.verify(&manifest).await.unwrap_err();
        assert!(matches!(
            err,
            PipelineError::Common(medetl_common::CommonError::ChecksumMismatch { .. })
        ));

        // Right hash, wrong partition
        let mut relabelled = manifest.clone();
        relabelled.data_files[0].sha256 = sha256_hex(&foreign);
        relabelled.data_files[0].row_count = 1;
        relabelled.record_count = 1;
        assert!(matches!(reader.verify(&relabelled).await, Err(PipelineError::Storage(_))));

        f.published.delete(&manifest.data_files[0].key).await.unwrap();
        assert!(matches!(reader.verify(&manifest).await, Err(PipelineError::Storage(_))));
    }

    #[tokio::test]
    async fn test_staged_but_unpublished_is_invisible() {
        let f = fixture();
        let run_id = Uuid::new_v4();
        let key = PartitionKey::new(SourceKind::FdaDrugEvent, day());

        f.writer.stage(key, run_id, &[record(1)]).await.unwrap();

        let reader = ManifestReader::new(f.published.clone());
        assert!(reader.read(key.source, key.logical_date).await.unwrap().is_none());
        assert_eq!(f.staging.list("fda_drug_event/_staging").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_checksum_ignores_provenance_and_run() {
        let f = fixture();
        let first: Vec<_> = (0..2).map(record).collect();
        let mut second = first.clone();
        second[0].provenance.page_cursor = Some("200".into());

        let a = f.writer.write(&ctx(Uuid::new_v4(), 2), &first).await.unwrap();
        let b = f.writer.write(&ctx(Uuid::new_v4(), 2), &second).await.unwrap();
        assert_eq!(a.checksum, b.checksum);
        assert_ne!(a.data_files[0].key, b.data_files[0].key);
    }

    #[tokio::test]
    async fn test_live_lock_becomes_source_failure() {
        let f = fixture();
        let key = PartitionKey::new(SourceKind::FdaDrugEvent, day());
        let other = serde_json::to_vec(&LockRecord {
            run_id: Uuid::new_v4(),
            acquired_at: Utc::now(),
        })
        .unwrap();
        f.published.create_exclusive(&key.lock_key(), other).await.unwrap();

        let err = f.writer.write(&ctx(Uuid::new_v4(), 1), &[record(1)]).await.unwrap_err();
        assert!(matches!(err, PipelineError::SourceFailure { attempts: 2, .. }));
        assert!(f.published.get(&key.manifest_key()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_stale_lock_is_broken() {
        let f = fixture();
        let key = PartitionKey::new(SourceKind::FdaDrugEvent, day());
        let stale = serde_json::to_vec(&LockRecord {
            run_id: Uuid::new_v4(),
            acquired_at: Utc::now() - ChronoDuration::hours(2),
        })
        .unwrap();
        f.published.create_exclusive(&key.lock_key(), stale).await.unwrap();

        let manifest = f.writer.write(&ctx(Uuid::new_v4(), 1), &[record(1)]).await.unwrap();
        assert_eq!(manifest.record_count, 1);
    }

    #[tokio::test]
    async fn test_unreadable_lock_is_live_until_ttl() {
        let f = fixture();
        let key = PartitionKey::new(SourceKind::FdaDrugEvent, day());
        f.published.create_exclusive(&key.lock_key(), Vec::new()).await.unwrap();

        let err = f.writer.write(&ctx(Uuid::new_v4(), 1), &[record(1)]).await.unwrap_err();
        assert!(matches!(err, PipelineError::SourceFailure { .. }));
        assert_eq!(f.published.get(&key.lock_key()).await.unwrap(), Some(Vec::new()));

        // Same empty lock under a zero TTL is old enough to break
        let writer = PartitionWriter::new(
            f.staging.clone(),
            f.published.clone(),
            f.published.clone(),
            RetryPolicy::new(2, Duration::from_millis(1), Duration::from_millis(5)),
            Duration::ZERO,
        );
        tokio::time::sleep(Duration::from_millis(20)).await;
        let manifest = writer.write(&ctx(Uuid::new_v4(), 1), &[record(1)]).await.unwrap();
        assert_eq!(manifest.record_count, 1);
        assert!(!f.published.exists(&key.lock_key()).await.unwrap());
    }

    /// Records, for every manifest write, whether the writer's run held the lock
    struct LockAuditStore {
        inner: LocalStore,
        violations: std::sync::Mutex<Vec<Uuid>>,
        writes: std::sync::atomic::AtomicUsize,
    }

    #[async_trait::async_trait]
    impl ObjectStore for LockAuditStore {
        fn uri_for(&self, key: &str) -> String {
            self.inner.uri_for(key)
        }
        async fn put(&self, key: &str, data: Vec<u8>) -> Result<()> {
            self.inner.put(key, data).await
        }
        async fn put_atomic(&self, key: &str, data: Vec<u8>) -> Result<()> {
            if let Some(dir) = key.strip_suffix("_MANIFEST.json") {
                let run_id = Manifest::from_json_bytes(&data)?.run_id;
                tokio::time::sleep(Duration::from_millis(2)).await;
                let holder = self
                    .inner
                    .get(&format!("{}_MANIFEST.lock", dir))
                    .await?
                    .and_then(|lock| serde_json::from_slice::<LockRecord>(&lock).ok())
                    .map(|lock| lock.run_id);
                if holder != Some(run_id) {
                    self.violations.lock().unwrap().push(run_id);
                }
                self.writes.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            }
            self.inner.put_atomic(key, data).await
        }
        async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
            self.inner.get(key).await
        }
        async fn exists(&self, key: &str) -> Result<bool> {
            self.inner.exists(key).await
        }
        async fn delete(&self, key: &str) -> Result<()> {
            self.inner.delete(key).await
        }
        async fn list(&self, prefix: &str) -> Result<Vec<crate::storage::ObjectEntry>> {
            self.inner.list(prefix).await
        }
        async fn create_exclusive(&self, key: &str, data: Vec<u8>) -> Result<bool> {
            self.inner.create_exclusive(key, data).await
        }
        async fn last_modified(&self, key: &str) -> Result<Option<DateTime<Utc>>> {
            self.inner.last_modified(key).await
        }
        async fn delete_if_unchanged(&self, key: &str, expected: &[u8]) -> Result<bool> {
            self.inner.delete_if_unchanged(key, expected).await
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_writers_hold_lock_while_swapping() {
        let dir = TempDir::new().unwrap();
        let audit = Arc::new(LockAuditStore {
            inner: LocalStore::new(dir.path().join("published")),
            violations: std::sync::Mutex::new(Vec::new()),
            writes: std::sync::atomic::AtomicUsize::new(0),
        });
        let published: Arc<dyn ObjectStore> = audit.clone();
        let staging: Arc<dyn ObjectStore> = Arc::new(LocalStore::new(dir.path().join("staging")));
        let writer = Arc::new(PartitionWriter::new(
            staging,
            published.clone(),
            published.clone(),
            RetryPolicy::new(50, Duration::from_millis(2), Duration::from_millis(20)),
            Duration::from_secs(60),
        ));

        let tasks: Vec<_> = (0..6)
            .map(|_| {
                let writer = writer.clone();
                tokio::spawn(async move { writer.write(&ctx(Uuid::new_v4(), 2), &[record(1), record(2)]).await })
            })
            .collect();
        let mut run_ids = Vec::new();
        for task in tasks {
            run_ids.push(task.await.unwrap().unwrap().run_id);
        }

        assert_eq!(audit.writes.load(std::sync::atomic::Ordering::SeqCst), 6);
        assert!(audit.violations.lock().unwrap().is_empty());
        let key = PartitionKey::new(SourceKind::FdaDrugEvent, day());
        assert!(!published.exists(&key.lock_key()).await.unwrap());
        let visible = ManifestReader::new(published).read(key.source, key.logical_date).await.unwrap();
        assert!(run_ids.contains(&visible.unwrap().run_id));
    }

    #[tokio::test]
    async fn test_quarantine_file_lines() {
        let f = fixture();
        let key = PartitionKey::new(SourceKind::FdaDrugEvent, day());
        let verdict = QualityVerdict {
            status: VerdictStatus::Quarantined,
            violations: vec![Violation::new("required_fields", "missing required field serious")],
            critical: false,
        };
        let quarantined = vec![(record(1), verdict.clone()), (record(2), verdict)];

        let uri = f.writer.write_quarantine(key, Uuid::new_v4(), &quarantined).await.unwrap();
        assert!(uri.unwrap().ends_with("quarantine.jsonl"));
        assert_eq!(f.writer.write_quarantine(key, Uuid::new_v4(), &[]).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_sweep_staging_removes_old_runs_only() {
        let f = fixture();
        let key = PartitionKey::new(SourceKind::FdaDrugEvent, day());
        f.writer.stage(key, Uuid::new_v4(), &[record(1)]).await.unwrap();

        assert_eq!(
            f.writer.sweep_staging(SourceKind::FdaDrugEvent, Duration::from_secs(3600)).await.unwrap(),
            0
        );
        assert_eq!(
            f.writer.sweep_staging(SourceKind::FdaDrugEvent, Duration::ZERO).await.unwrap(),
            1
        );
        assert!(f.staging.list("fda_drug_event/_staging").await.unwrap().is_empty());
    }
}
