//! Page-level extraction checkpoints
//!
//! After each completed page the coordinator spills that page's normalized
//! records and then records the continuation cursor. A later run for the
//! same `(source, logical_date)` reloads the spills and resumes paging from
//! the stored cursor instead of the start of the window.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::error::{PipelineError, Result};
use crate::models::{CanonicalRecord, DateWindow, SourceKind};
use crate::normalize::SCHEMA_VERSION;
use crate::partition::PartitionKey;
use crate::storage::ObjectStore;

const STATE_FILE: &str = "state.json";

/// Progress of one extraction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckpointState {
    pub source: SourceKind,
    pub logical_date: NaiveDate,
    pub window: DateWindow,
    pub schema_version: u32,
    pub pages_completed: u32,
    /// Cursor of the next page to fetch
    pub next_cursor: Option<String>,
    /// The last page has been fetched
    pub exhausted: bool,
    pub records_spilled: u64,
    pub updated_at: DateTime<Utc>,
}

/// A checkpoint that can be resumed from
#[derive(Debug, Clone)]
pub struct ResumePoint {
    pub state: CheckpointState,
    /// Records from every completed page, in page order
    pub records: Vec<CanonicalRecord>,
}

#[derive(Clone)]
pub struct CheckpointStore {
    store: Arc<dyn ObjectStore>,
}

impl CheckpointStore {
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self { store }
    }

    fn state_key(key: &PartitionKey) -> String {
        format!("{}/{}", key.checkpoint_prefix(), STATE_FILE)
    }

    fn spill_key(key: &PartitionKey, page_number: u32) -> String {
        format!("{}/page-{:05}.jsonl", key.checkpoint_prefix(), page_number)
    }

    /// Load a resumable checkpoint.
    ///
    /// A checkpoint taken for a different window or schema version is
    /// discarded and `None` returned.
    pub async fn load(&self, key: PartitionKey, window: DateWindow) -> Result<Option<ResumePoint>> {
        let Some(data) = self.store.get(&Self::state_key(&key)).await? else {
            return Ok(None);
        };

        let state: CheckpointState = match serde_json::from_slice(&data) {
            Ok(state) => state,
            Err(e) => {
                warn!("Discarding unreadable checkpoint for {}: {}", key, e);
                self.clear(key).await?;
                return Ok(None);
            },
        };

        if state.window != window || state.schema_version != SCHEMA_VERSION {
            info!(
                checkpoint_window = %state.window,
                %window,
                "Discarding checkpoint for {} taken under a different window or schema",
                key
            );
            self.clear(key).await?;
            return Ok(None);
        }

        let mut records = Vec::with_capacity(state.records_spilled as usize);
        for page in 1..=state.pages_completed {
            let spill_key = Self::spill_key(&key, page);
            let spill = self.store.get(&spill_key).await?.ok_or_else(|| {
                PipelineError::Storage(format!("Checkpoint spill {} is missing", spill_key))
            })?;
            for line in spill.split(|b| *b == b'\n').filter(|l| !l.is_empty()) {
                records.push(serde_json::from_slice::<CanonicalRecord>(line)?);
            }
        }

        info!(
            pages = state.pages_completed,
            records = records.len(),
            next_cursor = ?state.next_cursor,
            "Resuming {} from checkpoint",
            key
        );
        Ok(Some(ResumePoint { state, records }))
    }

    /// Persist one completed page: spill first, then advance the state.
    ///
    /// A crash between the two writes leaves an orphan spill that the next
    /// `record_page` for that page number overwrites.
    pub async fn record_page(
        &self,
        key: PartitionKey,
        window: DateWindow,
        page_number: u32,
        records: &[CanonicalRecord],
        next_cursor: Option<&str>,
        records_spilled: u64,
    ) -> Result<CheckpointState> {
        let mut spill = Vec::new();
        for record in records {
            serde_json::to_writer(&mut spill, record)?;
            spill.push(b'\n');
        }
        self.store
            .put_atomic(&Self::spill_key(&key, page_number), spill)
            .await?;

        let state = CheckpointState {
            source: key.source,
            logical_date: key.logical_date,
            window,
            schema_version: SCHEMA_VERSION,
            pages_completed: page_number,
            next_cursor: next_cursor.map(str::to_string),
            exhausted: next_cursor.is_none(),
            records_spilled,
            updated_at: Utc::now(),
        };
        self.store
            .put_atomic(&Self::state_key(&key), serde_json::to_vec_pretty(&state)?)
            .await?;

        debug!(page_number, next_cursor = ?next_cursor, "Checkpointed {}", key);
        Ok(state)
    }

    pub async fn clear(&self, key: PartitionKey) -> Result<()> {
        let removed = self.store.delete_prefix(&key.checkpoint_prefix()).await?;
        if removed > 0 {
            debug!(removed, "Cleared checkpoint for {}", key);
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::models::{FieldValue, Provenance};
    use crate::storage::LocalStore;
    use std::collections::BTreeMap;
    use tempfile::TempDir;

    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, 1).unwrap()
    }

    fn key() -> PartitionKey {
        PartitionKey::new(SourceKind::ClinicalTrial, day())
    }

    fn record(n: u32) -> CanonicalRecord {
        let mut payload = BTreeMap::new();
        payload.insert("nct_id".into(), FieldValue::Text(format!("NCT{:08}", n)));
        payload.insert("enrollment".into(), FieldValue::Integer(i64::from(n)));
        CanonicalRecord {
            record_id: format!("r{}", n),
            source: SourceKind::ClinicalTrial,
            schema_version: SCHEMA_VERSION,
            event_date: day(),
            payload,
            provenance: Provenance {
                source_id: "ctgov:/api/v2/studies".into(),
                page_cursor: None,
                page_number: n,
                fetched_at: Utc::now(),
            },
        }
    }

    fn store() -> (TempDir, CheckpointStore) {
        let dir = TempDir::new().unwrap();
        let store = CheckpointStore::new(Arc::new(LocalStore::new(dir.path())));
        (dir, store)
    }

    #[tokio::test]
    async fn test_resume_reloads_spilled_pages_in_order() {
        let (_dir, checkpoints) = store();
        let window = DateWindow::for_logical_date(day(), 0);

        checkpoints.record_page(key(), window, 1, &[record(1), record(2)], Some("tok-2"), 2).await.unwrap();
        checkpoints.record_page(key(), window, 2, &[record(3)], Some("tok-3"), 3).await.unwrap();

        let resume = checkpoints.load(key(), window).await.unwrap().unwrap();
        assert_eq!(resume.state.pages_completed, 2);
        assert_eq!(resume.state.next_cursor.as_deref(), Some("tok-3"));
        assert!(!resume.state.exhausted);
        let ids: Vec<_> = resume.records.iter().map(|r| r.record_id.as_str()).collect();
        assert_eq!(ids, vec!["r1", "r2", "r3"]);
        assert_eq!(resume.records[0].payload, record(1).payload);
    }

    #[tokio::test]
    async fn test_last_page_marks_exhausted() {
        let (_dir, checkpoints) = store();
        let window = DateWindow::for_logical_date(day(), 0);
        let state = checkpoints.record_page(key(), window, 1, &[], None, 0).await.unwrap();
        assert!(state.exhausted);
    }

    #[tokio::test]
    async fn test_window_change_discards_checkpoint() {
        let (_dir, checkpoints) = store();
        let window = DateWindow::for_logical_date(day(), 0);
        checkpoints.record_page(key(), window, 1, &[record(1)], Some("x"), 1).await.unwrap();

        let wider = DateWindow::for_logical_date(day(), 3);
        assert!(checkpoints.load(key(), wider).await.unwrap().is_none());
        assert!(checkpoints.load(key(), window).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_clear_removes_everything() {
        let (_dir, checkpoints) = store();
        let window = DateWindow::for_logical_date(day(), 0);
        checkpoints.record_page(key(), window, 1, &[record(1)], Some("x"), 1).await.unwrap();

        checkpoints.clear(key()).await.unwrap();
        assert!(checkpoints.load(key(), window).await.unwrap().is_none());
        checkpoints.clear(key()).await.unwrap();
    }

    #[tokio::test]
    async fn test_non_numeric_age_survives_spill_and_is_quarantined() {
        use crate::models::RawPage;
        use crate::normalize::normalize;
        use crate::quality::{QualityGate, RuleContext};
        use serde_json::json;

        let (_dir, checkpoints) = store();
        let window = DateWindow::for_logical_date(day(), 0);
        let key = PartitionKey::new(SourceKind::FdaDrugEvent, day());
        let page = RawPage {
            source: SourceKind::FdaDrugEvent,
            window,
            records: vec![json!({
                "safetyreportid": "10000001",
                "receivedate": "20240101",
                "serious": "2",
                "patient": {
                    "patientonsetage": "NaN",
                    "patientonsetageunit": "801",
                    "drug": [ { "medicinalproduct": "ASPIRIN" } ]
                }
            })],
            cursor: None,
            next_cursor: Some("100".into()),
            page_number: 1,
            fetched_at: Utc::now(),
        };
        let records = normalize(&page).unwrap();
        assert_eq!(
            records[0].field("patient_age_years"),
            Some(&FieldValue::Text("NaN".into()))
        );

        checkpoints.record_page(key, window, 1, &records, Some("100"), 1).await.unwrap();
        let resume = checkpoints.load(key, window).await.unwrap().unwrap();
        assert_eq!(resume.records[0].payload, records[0].payload);

        let gate = QualityGate::new(0.5).unwrap();
        let (verdicts, _) = gate.validate(resume.records, &RuleContext::for_window(window));
        assert!(!verdicts[0].1.is_accepted());
    }
}
