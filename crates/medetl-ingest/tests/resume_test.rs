//! Crash recovery: page checkpoints and staged-but-unpublished partitions

mod common;

use anyhow::Result;
use common::*;
use medetl_ingest::partition::{PartitionKey, PartitionWriter, PublishContext};
use medetl_ingest::quality::{QualityGate, RuleContext};
use medetl_ingest::retry::RetryPolicy;
use medetl_ingest::storage::{LocalStore, ObjectStore};
use medetl_ingest::{
    normalize::normalize, DateWindow, ErrorKind, ManifestReader, PipelineCoordinator, RawPage,
    RunStatus, SourceKind,
};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;
use wiremock::matchers::{method, path, query_param, query_param_is_missing};
use wiremock::{Mock, MockServer, ResponseTemplate};

const PAGES: usize = 5;
const PER_PAGE: usize = 3;

fn page_studies(page: usize) -> Vec<serde_json::Value> {
    (0..PER_PAGE).map(|i| study(page * PER_PAGE + i)).collect()
}

fn token(page: usize) -> String {
    format!("t{}", page + 1)
}

/// Mount pages `from..PAGES`; page 0 is the request without a token
async fn mount_pages(server: &MockServer, from: usize, first_page_hits: u64) {
    for page in from..PAGES {
        let next = (page + 1 < PAGES).then(|| token(page + 1));
        let response =
            ResponseTemplate::new(200).set_body_json(ct_envelope(page_studies(page), next.as_deref()));
        let mock = Mock::given(method("GET")).and(path("/studies"));
        if page == 0 {
            mock.and(query_param_is_missing("pageToken"))
                .respond_with(response)
                .expect(first_page_hits)
                .mount(server)
                .await;
        } else {
            mock.and(query_param("pageToken", token(page).as_str()))
                .respond_with(response)
                .mount(server)
                .await;
        }
    }
}

#[tokio::test]
async fn test_resume_after_page_two_of_five() -> Result<()> {
    init_tracing();
    let server = MockServer::start().await;

    // Page 3 fails once with a terminal error, then serves normally
    Mock::given(method("GET"))
        .and(path("/studies"))
        .and(query_param("pageToken", token(2).as_str()))
        .respond_with(ResponseTemplate::new(400).set_body_string("flaky gateway"))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    mount_pages(&server, 0, 1).await;

    let dir = TempDir::new()?;
    let config = test_config(dir.path(), &server.uri());
    let coordinator = PipelineCoordinator::from_config(config.clone()).await?;
    let cancel = CancellationToken::new();

    let crashed = coordinator.run(&[SourceKind::ClinicalTrial], day(), &cancel).await;
    assert_eq!(crashed.status, RunStatus::Failed);
    let outcome = &crashed.sources[0];
    assert_eq!(outcome.error_kind, Some(ErrorKind::TerminalFetch));
    assert_eq!(outcome.pages_fetched, 2);

    let resumed = coordinator.run(&[SourceKind::ClinicalTrial], day(), &cancel).await;
    assert_eq!(resumed.status, RunStatus::Success, "{:?}", resumed.sources[0].error);
    let outcome = &resumed.sources[0];
    assert_eq!(outcome.resumed_from_page, Some(3));
    assert_eq!(outcome.pages_fetched, PAGES as u32);
    assert_eq!(outcome.record_count, (PAGES * PER_PAGE) as u64);

    // Same record set as an uninterrupted run
    let clean_server = MockServer::start().await;
    mount_pages(&clean_server, 0, 1).await;
    let clean_dir = TempDir::new()?;
    let clean = PipelineCoordinator::from_config(test_config(clean_dir.path(), &clean_server.uri()))
        .await?
        .run(&[SourceKind::ClinicalTrial], day(), &cancel)
        .await;
    assert_eq!(clean.sources[0].checksum, outcome.checksum);
    Ok(())
}

fn writer(root: &std::path::Path) -> (PartitionWriter, Arc<dyn ObjectStore>, Arc<dyn ObjectStore>) {
    let staging: Arc<dyn ObjectStore> = Arc::new(LocalStore::new(root.join("staging")));
    let published: Arc<dyn ObjectStore> = Arc::new(LocalStore::new(root.join("published")));
    let quarantine: Arc<dyn ObjectStore> = Arc::new(LocalStore::new(root.join("quarantine")));
    let writer = PartitionWriter::new(
        staging.clone(),
        published.clone(),
        quarantine,
        RetryPolicy::new(2, Duration::from_millis(1), Duration::from_millis(5)),
        Duration::from_secs(60),
    );
    (writer, staging, published)
}

fn studies_page(first: usize, count: usize) -> Result<Vec<medetl_ingest::CanonicalRecord>> {
    let page = RawPage {
        source: SourceKind::ClinicalTrial,
        window: DateWindow::for_logical_date(day(), 0),
        records: (first..first + count).map(study).collect(),
        cursor: None,
        next_cursor: None,
        page_number: 1,
        fetched_at: chrono::Utc::now(),
    };
    Ok(normalize(&page)?)
}

#[tokio::test]
async fn test_crash_between_stage_and_publish_keeps_prior_manifest() -> Result<()> {
    let dir = TempDir::new()?;
    let (writer, staging, published) = writer(dir.path());
    let reader = ManifestReader::new(published.clone());
    let key = PartitionKey::new(SourceKind::ClinicalTrial, day());
    let window = DateWindow::for_logical_date(day(), 0);
    let gate = QualityGate::new(0.1)?;

    // First run never publishes: nothing is visible
    let records = studies_page(0, 4)?;
    writer.stage(key, Uuid::new_v4(), &records).await?;
    assert!(reader.read(key.source, key.logical_date).await?.is_none());

    // A complete run publishes
    let run_id = Uuid::new_v4();
    let (_, report) = gate.validate(records.clone(), &RuleContext::for_window(window));
    let ctx = PublishContext {
        key,
        window,
        run_id,
        report,
        quarantine_uri: None,
    };
    let manifest = writer.write(&ctx, &records).await?;

    // Reprocessing run crashes after staging different data
    let changed = studies_page(0, 6)?;
    writer.stage(key, Uuid::new_v4(), &changed).await?;

    let visible = reader.read(key.source, key.logical_date).await?.expect("manifest");
    assert_eq!(visible.run_id, run_id);
    assert_eq!(visible.checksum, manifest.checksum);
    assert_eq!(visible.record_count, 4);

    // The invisible partial writes are garbage collected
    let swept = writer.sweep_staging(SourceKind::ClinicalTrial, Duration::ZERO).await?;
    assert_eq!(swept, 2);
    assert!(staging.list("clinical_trial/_staging").await?.is_empty());
    assert_eq!(reader.read(key.source, key.logical_date).await?.unwrap().run_id, run_id);
    Ok(())
}
