//! ClinicalTrials.gov v2 `/studies` request and envelope contract

use serde::Deserialize;
use serde_json::Value;

use super::PageRequest;
use crate::config::SourceEndpoints;
use crate::error::{PipelineError, Result};
use crate::models::{DateWindow, SourceKind};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Envelope {
    studies: Vec<Value>,
    #[serde(default)]
    next_page_token: Option<String>,
}

pub fn build_request(endpoints: &SourceEndpoints, window: &DateWindow, cursor: Option<&str>) -> PageRequest {
    let mut query = vec![
        ("format", "json".to_string()),
        ("pageSize", endpoints.ct_page_size.to_string()),
        (
            "filter.advanced",
            format!(
                "AREA[LastUpdatePostDate]RANGE[{},{}]",
                window.start.format("%Y-%m-%d"),
                window.end.format("%Y-%m-%d")
            ),
        ),
    ];
    if let Some(token) = cursor {
        query.push(("pageToken", token.to_string()));
    }

    PageRequest {
        url: format!("{}/studies", endpoints.ct_base_url.trim_end_matches('/')),
        query,
    }
}

pub fn parse_envelope(body: Value, cursor: Option<&str>) -> Result<(Vec<Value>, Option<String>)> {
    let envelope: Envelope = serde_json::from_value(body).map_err(|e| {
        PipelineError::schema_mismatch(
            SourceKind::ClinicalTrial,
            cursor,
            format!("unexpected envelope: {}", e),
        )
    })?;

    let next = envelope.next_page_token.filter(|t| !t.is_empty());
    Ok((envelope.studies, next))
}
