//! Pipeline coordinator
//!
//! Runs extract → normalize → validate → publish for each requested source
//! of one logical date. Sources run concurrently and fail independently;
//! a failed source never changes its manifest.

use chrono::{DateTime, NaiveDate, Utc};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::checkpoint::CheckpointStore;
use crate::config::PipelineConfig;
use crate::error::{ErrorKind, PipelineError, Result};
use crate::models::{CanonicalRecord, DateWindow, SourceKind};
use crate::normalize::normalize;
use crate::partition::{ManifestReader, PartitionKey, PartitionWriter, PublishContext};
use crate::quality::{
    partition_verdicts, record_count_warnings, BatchReport, BatchStatus, QualityGate, RuleContext,
};
use crate::retry::RetryPolicy;
use crate::source::{HttpSourceClient, PageFetcher, PageStream};
use crate::storage::{open_store, ObjectStore};

/// Overall run status reported to the scheduler
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunStatus {
    Success,
    Partial,
    Failed,
}

impl RunStatus {
    /// Process exit code for the CLI
    pub fn exit_code(&self) -> i32 {
        match self {
            RunStatus::Success => 0,
            RunStatus::Failed => 1,
            RunStatus::Partial => 2,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SourceStatus {
    Published,
    Failed,
}

/// Result for one `(source, logical_date)`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceOutcome {
    pub source: SourceKind,
    pub logical_date: NaiveDate,
    pub window: DateWindow,
    pub status: SourceStatus,
    pub record_count: u64,
    pub quarantine_count: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub batch_report: Option<BatchReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub manifest_uri: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quarantine_uri: Option<String>,
    pub pages_fetched: u32,
    /// Set when extraction continued from a checkpoint
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resumed_from_page: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SourceOutcome {
    pub fn is_published(&self) -> bool {
        self.status == SourceStatus::Published
    }
}

/// Structured result of one pipeline invocation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunResult {
    pub run_id: Uuid,
    pub logical_date: NaiveDate,
    pub status: RunStatus,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub records_published: u64,
    pub records_quarantined: u64,
    pub sources: Vec<SourceOutcome>,
    /// Advisory; set when published volumes look too small
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

impl RunResult {
    pub fn manifest_uris(&self) -> Vec<&str> {
        self.sources
            .iter()
            .filter_map(|s| s.manifest_uri.as_deref())
            .collect()
    }

    pub fn outcome(&self, source: SourceKind) -> Option<&SourceOutcome> {
        self.sources.iter().find(|s| s.source == source)
    }
}

/// The three storage roots a run writes to
#[derive(Clone)]
pub struct PipelineStores {
    pub staging: Arc<dyn ObjectStore>,
    pub published: Arc<dyn ObjectStore>,
    pub quarantine: Arc<dyn ObjectStore>,
}

impl PipelineStores {
    pub async fn open(config: &PipelineConfig) -> Result<Self> {
        Ok(Self {
            staging: open_store(&config.staging_root).await?,
            published: open_store(&config.manifest_root).await?,
            quarantine: open_store(&config.quarantine_root()).await?,
        })
    }
}

/// Progress of a source run, reported even when the run fails
#[derive(Default)]
struct Progress {
    pages_fetched: u32,
    resumed_from_page: Option<u32>,
    report: Option<BatchReport>,
    quarantine_uri: Option<String>,
}

pub struct PipelineCoordinator {
    config: PipelineConfig,
    fetcher: Arc<dyn PageFetcher>,
    writer: PartitionWriter,
    checkpoints: CheckpointStore,
    reader: ManifestReader,
    gate: QualityGate,
}

impl PipelineCoordinator {
    /// Coordinator over HTTP sources and the configured storage roots
    pub async fn from_config(config: PipelineConfig) -> Result<Self> {
        config
            .validate()
            .map_err(|e| PipelineError::Config(e.to_string()))?;
        let fetcher = Arc::new(HttpSourceClient::new(&config)?);
        let stores = PipelineStores::open(&config).await?;
        Self::new(config, fetcher, stores)
    }

    pub fn new(
        config: PipelineConfig,
        fetcher: Arc<dyn PageFetcher>,
        stores: PipelineStores,
    ) -> Result<Self> {
        let writer = PartitionWriter::new(
            stores.staging.clone(),
            stores.published.clone(),
            stores.quarantine,
            RetryPolicy::for_publish(&config),
            config.lock_ttl(),
        );
        let gate = QualityGate::new(config.quarantine_threshold)?;

        Ok(Self {
            checkpoints: CheckpointStore::new(stores.staging),
            reader: ManifestReader::new(stores.published),
            fetcher,
            writer,
            gate,
            config,
        })
    }

    /// Replace the default rule set
    pub fn with_quality_gate(mut self, gate: QualityGate) -> Self {
        self.gate = gate;
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn manifest_reader(&self) -> &ManifestReader {
        &self.reader
    }

    pub fn writer(&self) -> &PartitionWriter {
        &self.writer
    }

    /// Run every requested source for `logical_date` concurrently
    pub async fn run(
        &self,
        sources: &[SourceKind],
        logical_date: NaiveDate,
        cancel: &CancellationToken,
    ) -> RunResult {
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        let unique: BTreeSet<SourceKind> = sources.iter().copied().collect();

        info!(%run_id, %logical_date, sources = unique.len(), "Starting pipeline run");

        let outcomes = join_all(
            unique
                .into_iter()
                .map(|source| self.run_source(source, logical_date, run_id, cancel)),
        )
        .await;

        let published = outcomes.iter().filter(|o| o.is_published()).count();
        let status = if published == outcomes.len() {
            RunStatus::Success
        } else if published == 0 {
            RunStatus::Failed
        } else {
            RunStatus::Partial
        };

        let published_counts: Vec<(SourceKind, u64)> = outcomes
            .iter()
            .filter(|o| o.is_published())
            .map(|o| (o.source, o.record_count))
            .collect();
        let warnings = record_count_warnings(&published_counts);

        let result = RunResult {
            run_id,
            logical_date,
            status,
            started_at,
            finished_at: Utc::now(),
            records_published: outcomes.iter().map(|o| o.record_count).sum(),
            records_quarantined: outcomes.iter().map(|o| o.quarantine_count).sum(),
            sources: outcomes,
            warnings,
        };

        info!(
            %run_id,
            status = ?result.status,
            records_published = result.records_published,
            records_quarantined = result.records_quarantined,
            "Pipeline run finished"
        );
        result
    }

    /// Run one source. Never returns an error: failures become a FAILED outcome.
    pub async fn run_source(
        &self,
        source: SourceKind,
        logical_date: NaiveDate,
        run_id: Uuid,
        cancel: &CancellationToken,
    ) -> SourceOutcome {
        let window = DateWindow::for_logical_date(logical_date, self.config.lookback_days);
        let key = PartitionKey::new(source, logical_date);
        let mut progress = Progress::default();

        let span = info_span!("source_run", %source, %logical_date, %run_id);
        let result = self
            .execute(key, window, run_id, cancel, &mut progress)
            .instrument(span)
            .await;

        let mut outcome = SourceOutcome {
            source,
            logical_date,
            window,
            status: SourceStatus::Failed,
            record_count: 0,
            quarantine_count: 0,
            checksum: None,
            batch_report: progress.report,
            manifest_uri: None,
            quarantine_uri: progress.quarantine_uri,
            pages_fetched: progress.pages_fetched,
            resumed_from_page: progress.resumed_from_page,
            error_kind: None,
            error: None,
        };

        match result {
            Ok(manifest) => {
                outcome.status = SourceStatus::Published;
                outcome.record_count = manifest.record_count;
                outcome.quarantine_count = manifest.quarantine_count;
                outcome.checksum = Some(manifest.checksum);
                outcome.manifest_uri = Some(self.reader.uri_for(source, logical_date));
            },
            Err(e) => {
                error!(%source, %logical_date, error_kind = ?e.kind(), "Source run failed: {}", e);
                if let Some(report) = &outcome.batch_report {
                    outcome.quarantine_count = report.quarantined;
                }
                outcome.error_kind = Some(e.kind());
                outcome.error = Some(e.to_string());
            },
        }
        outcome
    }

    async fn execute(
        &self,
        key: PartitionKey,
        window: DateWindow,
        run_id: Uuid,
        cancel: &CancellationToken,
        progress: &mut Progress,
    ) -> Result<crate::partition::Manifest> {
        let records = self.extract(key, window, cancel, progress).await?;

        if cancel.is_cancelled() {
            return Err(PipelineError::Cancelled {
                stage: "validation".to_string(),
            });
        }

        let (verdicts, report) = self.gate.validate(records, &RuleContext::for_window(window));
        progress.report = Some(report.clone());

        if report.batch_status == BatchStatus::Fail {
            // Nothing was consumed; the next run re-extracts the window
            self.clear_checkpoint(key).await;
            return Err(PipelineError::QualityGateFailure {
                source_kind: key.source,
                quarantine_rate: report.quarantine_rate,
                threshold: report.threshold,
            });
        }

        let (accepted, quarantined) = partition_verdicts(verdicts);
        let quarantine_uri = self.writer.write_quarantine(key, run_id, &quarantined).await?;
        progress.quarantine_uri = quarantine_uri.clone();

        if cancel.is_cancelled() {
            return Err(PipelineError::Cancelled {
                stage: "publish".to_string(),
            });
        }

        let ctx = PublishContext {
            key,
            window,
            run_id,
            report,
            quarantine_uri,
        };
        let manifest = self.writer.write(&ctx, &accepted).await?;
        self.clear_checkpoint(key).await;
        Ok(manifest)
    }

    /// Fetch and normalize every page of the window, checkpointing each one
    async fn extract(
        &self,
        key: PartitionKey,
        window: DateWindow,
        cancel: &CancellationToken,
        progress: &mut Progress,
    ) -> Result<Vec<CanonicalRecord>> {
        let (mut records, mut stream) = match self.checkpoints.load(key, window).await? {
            Some(resume) => {
                progress.resumed_from_page = Some(resume.state.pages_completed + 1);
                let stream = PageStream::resume_from(
                    self.fetcher.clone(),
                    key.source,
                    window,
                    resume.state.next_cursor,
                    resume.state.pages_completed,
                );
                (resume.records, stream)
            },
            None => (
                Vec::new(),
                PageStream::new(self.fetcher.clone(), key.source, window),
            ),
        };
        progress.pages_fetched = stream.pages_fetched();

        loop {
            if let Some(cap) = self.config.max_records_per_source {
                if records.len() >= cap {
                    info!(cap, fetched = records.len(), "Record cap reached; stopping pagination");
                    break;
                }
            }
            if cancel.is_cancelled() {
                warn!(pages = stream.pages_fetched(), "Cancellation requested; stopping before next page");
                return Err(PipelineError::Cancelled {
                    stage: format!("page {}", stream.pages_fetched() + 1),
                });
            }

            let Some(page) = stream.next_page().await? else {
                break;
            };
            let normalized = normalize(&page)?;
            records.extend(normalized.iter().cloned());
            progress.pages_fetched = page.page_number;

            self.checkpoints
                .record_page(
                    key,
                    window,
                    page.page_number,
                    &normalized,
                    page.next_cursor.as_deref(),
                    records.len() as u64,
                )
                .await?;
        }

        info!(
            pages = stream.pages_fetched(),
            records = records.len(),
            "Extraction complete for {}",
            key
        );
        Ok(records)
    }

    async fn clear_checkpoint(&self, key: PartitionKey) {
        if let Err(e) = self.checkpoints.clear(key).await {
            warn!("Failed to clear checkpoint for {}: {}", key, e);
        }
    }

    /// Garbage-collect abandoned staging runs for `source`
    pub async fn sweep_staging(&self, source: SourceKind, older_than: Duration) -> Result<usize> {
        self.writer.sweep_staging(source, older_than).await
    }
}
