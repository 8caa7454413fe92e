//! HTTP source client: retry classification and envelope contracts

mod common;

use anyhow::Result;
use common::*;
use medetl_ingest::source::{HttpSourceClient, PageFetcher};
use medetl_ingest::{DateWindow, PipelineError, SourceKind};
use serde_json::json;
use tempfile::TempDir;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn client(server: &MockServer, dir: &TempDir) -> Result<HttpSourceClient> {
    Ok(HttpSourceClient::new(&test_config(dir.path(), &server.uri()))?)
}

fn window() -> DateWindow {
    DateWindow::for_logical_date(day(), 0)
}

#[tokio::test]
async fn test_server_errors_are_retried() -> Result<()> {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/studies"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(2)
        .expect(2)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/studies"))
        .respond_with(ResponseTemplate::new(200).set_body_json(ct_envelope(vec![study(1)], None)))
        .expect(1)
        .mount(&server)
        .await;
    let dir = TempDir::new()?;

    let page = client(&server, &dir)?
        .fetch_page(SourceKind::ClinicalTrial, &window(), None, 1)
        .await?;
    assert_eq!(page.records.len(), 1);
    assert!(page.is_last());
    Ok(())
}

#[tokio::test]
async fn test_rate_limited_response_honours_retry_after() -> Result<()> {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/drug/event.json"))
        .respond_with(ResponseTemplate::new(429).insert_header("Retry-After", "1"))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/drug/event.json"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(fda_envelope(fda_reports(2, 0), 0, 100, 2)),
        )
        .mount(&server)
        .await;
    let dir = TempDir::new()?;

    let page = client(&server, &dir)?
        .fetch_page(SourceKind::FdaDrugEvent, &window(), None, 1)
        .await?;
    assert_eq!(page.records.len(), 2);
    Ok(())
}

#[tokio::test]
async fn test_exhausted_retries_become_source_failure() -> Result<()> {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/studies"))
        .respond_with(ResponseTemplate::new(502))
        .expect(3)
        .mount(&server)
        .await;
    let dir = TempDir::new()?;

    let err = client(&server, &dir)?
        .fetch_page(SourceKind::ClinicalTrial, &window(), None, 1)
        .await
        .unwrap_err();
    assert!(matches!(err, PipelineError::SourceFailure { attempts: 3, .. }), "{err:?}");
    Ok(())
}

#[tokio::test]
async fn test_client_errors_are_terminal() -> Result<()> {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/studies"))
        .respond_with(ResponseTemplate::new(400).set_body_string("invalid filter.advanced"))
        .expect(1)
        .mount(&server)
        .await;
    let dir = TempDir::new()?;

    let err = client(&server, &dir)?
        .fetch_page(SourceKind::ClinicalTrial, &window(), None, 1)
        .await
        .unwrap_err();
    match err {
        PipelineError::TerminalFetch { status, detail, .. } => {
            assert_eq!(status, Some(400));
            assert!(detail.contains("invalid filter.advanced"));
        },
        other => panic!("expected terminal fetch error, got {other:?}"),
    }
    Ok(())
}

#[tokio::test]
async fn test_unusable_base_url_fails_without_retry() -> Result<()> {
    let dir = TempDir::new()?;

    for base in ["ftp://127.0.0.1:9", "http://bad host"] {
        let client = HttpSourceClient::new(&test_config(dir.path(), base))?;
        let err = client
            .fetch_page(SourceKind::FdaDrugEvent, &window(), None, 1)
            .await
            .unwrap_err();
        assert!(
            matches!(err, PipelineError::TerminalFetch { status: None, .. }),
            "{base}: {err:?}"
        );
    }
    Ok(())
}

#[tokio::test]
async fn test_malformed_json_is_schema_mismatch() -> Result<()> {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/drug/event.json"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>maintenance</html>"))
        .mount(&server)
        .await;
    let dir = TempDir::new()?;

    let err = client(&server, &dir)?
        .fetch_page(SourceKind::FdaDrugEvent, &window(), Some("100"), 2)
        .await
        .unwrap_err();
    match err {
        PipelineError::SchemaMismatch { cursor, .. } => assert_eq!(cursor.as_deref(), Some("100")),
        other => panic!("expected schema mismatch, got {other:?}"),
    }
    Ok(())
}

#[tokio::test]
async fn test_changed_envelope_is_schema_mismatch() -> Result<()> {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/studies"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "data": [] })))
        .mount(&server)
        .await;
    let dir = TempDir::new()?;

    let err = client(&server, &dir)?
        .fetch_page(SourceKind::ClinicalTrial, &window(), None, 1)
        .await
        .unwrap_err();
    assert!(matches!(err, PipelineError::SchemaMismatch { .. }));
    Ok(())
}

#[tokio::test]
async fn test_fda_offset_pagination() -> Result<()> {
    let server = MockServer::start().await;
    let mut config = test_config(TempDir::new()?.path(), &server.uri());
    config.endpoints.fda_page_size = 2;
    Mock::given(method("GET"))
        .and(path("/drug/event.json"))
        .and(query_param("limit", "2"))
        .and(query_param("skip", "2"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(fda_envelope(fda_reports(2, 0), 2, 2, 5)),
        )
        .expect(1)
        .mount(&server)
        .await;

    let page = HttpSourceClient::new(&config)?
        .fetch_page(SourceKind::FdaDrugEvent, &window(), Some("2"), 2)
        .await?;
    assert_eq!(page.cursor.as_deref(), Some("2"));
    assert_eq!(page.next_cursor.as_deref(), Some("4"));
    assert_eq!(page.page_number, 2);
    Ok(())
}
