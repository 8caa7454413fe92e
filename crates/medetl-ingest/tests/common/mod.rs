//! Shared fixtures for medetl-ingest integration tests
//!
//! Upstream APIs are mocked with `wiremock`; storage roots live in a
//! `tempfile` directory so no network or cloud access is needed.

#![allow(dead_code)]

use chrono::NaiveDate;
use medetl_ingest::{PipelineConfig, SourceEndpoints};
use serde_json::{json, Value};
use std::path::Path;

/// Initialize tracing for tests
pub fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};

    let _ = fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,medetl_ingest=debug")),
        )
        .with_test_writer()
        .try_init();
}

pub fn day() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 1, 1).unwrap_or(NaiveDate::MIN)
}

/// Pipeline config pointing both sources at `server_uri` and storage at `root`
pub fn test_config(root: &Path, server_uri: &str) -> PipelineConfig {
    PipelineConfig::builder()
        .rate_limit_per_sec(1000)
        .retry_max_attempts(3)
        .retry_delays_ms(1, 5)
        .request_timeout_secs(5)
        .publish_max_attempts(2)
        .staging_root(root.join("staging").display().to_string())
        .manifest_root(root.join("published").display().to_string())
        .endpoints(SourceEndpoints {
            fda_base_url: server_uri.to_string(),
            ct_base_url: server_uri.to_string(),
            ..SourceEndpoints::default()
        })
        .build()
}

/// openFDA adverse event report. Invalid reports lack the `serious` flag.
pub fn fda_report(n: usize, valid: bool) -> Value {
    let mut report = json!({
        "safetyreportid": format!("{}", 10_000_000 + n),
        "receivedate": "20240101",
        "receiptdate": "20240101",
        "occurcountry": "US",
        "primarysource": { "qualification": "1" },
        "patient": {
            "patientonsetage": "45",
            "patientonsetageunit": "801",
            "patientsex": "1",
            "drug": [ { "medicinalproduct": "ASPIRIN", "drugindication": "Headache" } ],
            "reaction": [ { "reactionmeddrapt": "Headache" } ]
        }
    });
    if valid {
        report["serious"] = json!("2");
    }
    report
}

/// `total` reports with the first `invalid` of them missing a required field
pub fn fda_reports(total: usize, invalid: usize) -> Vec<Value> {
    (0..total).map(|n| fda_report(n, n >= invalid)).collect()
}

pub fn fda_envelope(results: Vec<Value>, skip: usize, limit: usize, total: usize) -> Value {
    json!({
        "meta": { "results": { "skip": skip, "limit": limit, "total": total } },
        "results": results
    })
}

/// ClinicalTrials.gov v2 study
pub fn study(n: usize) -> Value {
    json!({
        "protocolSection": {
            "identificationModule": {
                "nctId": format!("NCT{:08}", n),
                "briefTitle": format!("Study {}", n)
            },
            "statusModule": {
                "overallStatus": "RECRUITING",
                "lastUpdatePostDateStruct": { "date": "2024-01-01" }
            },
            "conditionsModule": { "conditions": ["Tension Headache"] },
            "designModule": {
                "phases": ["PHASE2"],
                "enrollmentInfo": { "count": 40 }
            }
        }
    })
}

pub fn ct_envelope(studies: Vec<Value>, next_token: Option<&str>) -> Value {
    match next_token {
        Some(token) => json!({ "studies": studies, "nextPageToken": token }),
        None => json!({ "studies": studies }),
    }
}
