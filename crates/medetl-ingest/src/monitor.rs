//! Manifest polling
//!
//! A scheduled task that reads the manifests for one logical date and
//! reports changes, stopped by an explicit cancellation token.

use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::time::Duration;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::Result;
use crate::models::SourceKind;
use crate::partition::{Manifest, ManifestReader};
use crate::quality::BatchStatus;

/// What a reader sees for one partition
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PartitionStatus {
    pub source: SourceKind,
    pub logical_date: NaiveDate,
    pub run_id: Uuid,
    pub record_count: u64,
    pub quarantine_count: u64,
    pub batch_status: BatchStatus,
    pub checksum: String,
    pub written_at: DateTime<Utc>,
}

impl From<&Manifest> for PartitionStatus {
    fn from(manifest: &Manifest) -> Self {
        Self {
            source: manifest.source,
            logical_date: manifest.logical_date,
            run_id: manifest.run_id,
            record_count: manifest.record_count,
            quarantine_count: manifest.quarantine_count,
            batch_status: manifest.batch_status,
            checksum: manifest.checksum.clone(),
            written_at: manifest.written_at,
        }
    }
}

pub struct ManifestWatcher {
    reader: ManifestReader,
    sources: Vec<SourceKind>,
    logical_date: NaiveDate,
    poll_interval: Duration,
    last_seen: BTreeMap<SourceKind, Option<Uuid>>,
}

impl ManifestWatcher {
    pub fn new(
        reader: ManifestReader,
        sources: Vec<SourceKind>,
        logical_date: NaiveDate,
        poll_interval: Duration,
    ) -> Self {
        Self {
            reader,
            sources,
            logical_date,
            poll_interval,
            last_seen: BTreeMap::new(),
        }
    }

    /// Read every watched manifest once and return the ones that changed
    /// since the previous poll. The first poll reports every published one.
    pub async fn poll_once(&mut self) -> Result<Vec<PartitionStatus>> {
        let mut changed = Vec::new();

        for &source in &self.sources {
            let current = self.reader.read(source, self.logical_date).await?;
            let run_id = current.as_ref().map(|m| m.run_id);

            if self.last_seen.get(&source) != Some(&run_id) {
                if let Some(manifest) = &current {
                    changed.push(PartitionStatus::from(manifest));
                }
                self.last_seen.insert(source, run_id);
            }
        }

        Ok(changed)
    }

    /// Poll until cancelled. Returns the number of changes observed.
    pub async fn run(mut self, cancel: CancellationToken) -> usize {
        let mut ticker = interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut observed = 0;

        info!(
            logical_date = %self.logical_date,
            sources = self.sources.len(),
            "Watching manifests every {:?}",
            self.poll_interval
        );

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!(observed, "Manifest watch stopped");
                    return observed;
                }
                _ = ticker.tick() => {
                    match self.poll_once().await {
                        Ok(changes) => {
                            for status in changes {
                                observed += 1;
                                info!(
                                    source = %status.source,
                                    run_id = %status.run_id,
                                    records = status.record_count,
                                    quarantined = status.quarantine_count,
                                    batch_status = status.batch_status.as_str(),
                                    "Partition manifest changed"
                                );
                            }
                        }
                        Err(e) => warn!("Manifest poll failed: {}", e),
                    }
                }
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::partition::manifest::tests::sample_manifest;
    use crate::storage::{LocalStore, ObjectStore};
    use std::sync::Arc;
    use tempfile::TempDir;

    async fn publish(store: &Arc<dyn ObjectStore>, manifest: &Manifest) {
        store
            .put_atomic(&manifest.partition_key().manifest_key(), manifest.to_json_bytes().unwrap())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_poll_reports_only_changes() {
        let dir = TempDir::new().unwrap();
        let store: Arc<dyn ObjectStore> = Arc::new(LocalStore::new(dir.path()));
        let manifest = sample_manifest();
        let mut watcher = ManifestWatcher::new(
            ManifestReader::new(store.clone()),
            SourceKind::ALL.to_vec(),
            manifest.logical_date,
            Duration::from_millis(10),
        );

        assert!(watcher.poll_once().await.unwrap().is_empty());

        publish(&store, &manifest).await;
        let changes = watcher.poll_once().await.unwrap();
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].run_id, manifest.run_id);
        assert!(watcher.poll_once().await.unwrap().is_empty());

        let mut rerun = manifest.clone();
        rerun.run_id = Uuid::new_v4();
        publish(&store, &rerun).await;
        assert_eq!(watcher.poll_once().await.unwrap()[0].run_id, rerun.run_id);
    }

    #[tokio::test]
    async fn test_run_stops_on_cancel() {
        let dir = TempDir::new().unwrap();
        let store: Arc<dyn ObjectStore> = Arc::new(LocalStore::new(dir.path()));
        let manifest = sample_manifest();
        publish(&store, &manifest).await;

        let watcher = ManifestWatcher::new(
            ManifestReader::new(store),
            vec![SourceKind::FdaDrugEvent],
            manifest.logical_date,
            Duration::from_millis(5),
        );
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(watcher.run(cancel.clone()));

        tokio::time::sleep(Duration::from_millis(50)).await;
        cancel.cancel();
        assert_eq!(handle.await.unwrap(), 1);
    }
}
