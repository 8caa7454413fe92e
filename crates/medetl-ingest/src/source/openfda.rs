//! openFDA `/drug/event.json` request and envelope contract
//!
//! Pagination is offset based: the cursor is the decimal `skip` of the
//! next page.

use serde::Deserialize;
use serde_json::Value;

use super::PageRequest;
use crate::config::SourceEndpoints;
use crate::error::{PipelineError, Result};
use crate::models::{DateWindow, SourceKind};

/// openFDA rejects `skip` above this
pub const MAX_SKIP: u64 = 25_000;

const SOURCE: SourceKind = SourceKind::FdaDrugEvent;

#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(default)]
    meta: Option<Meta>,
    results: Vec<Value>,
}

#[derive(Debug, Deserialize)]
struct Meta {
    results: Option<ResultsMeta>,
}

#[derive(Debug, Deserialize)]
struct ResultsMeta {
    total: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    code: String,
}

pub(crate) fn parse_skip(cursor: Option<&str>) -> Result<u64> {
    match cursor {
        None => Ok(0),
        Some(c) => c.parse().map_err(|_| PipelineError::TerminalFetch {
            source_kind: SOURCE,
            status: None,
            detail: format!("invalid openFDA cursor {:?}", c),
        }),
    }
}

pub fn build_request(
    endpoints: &SourceEndpoints,
    window: &DateWindow,
    cursor: Option<&str>,
) -> Result<PageRequest> {
    let skip = parse_skip(cursor)?;
    let mut query = vec![
        (
            "search",
            format!(
                "receivedate:[{} TO {}]",
                window.start.format("%Y%m%d"),
                window.end.format("%Y%m%d")
            ),
        ),
        ("limit", endpoints.fda_page_size.to_string()),
        ("skip", skip.to_string()),
    ];
    if let Some(key) = &endpoints.fda_api_key {
        query.push(("api_key", key.clone()));
    }

    Ok(PageRequest {
        url: format!("{}/drug/event.json", endpoints.fda_base_url.trim_end_matches('/')),
        query,
    })
}

/// `true` for openFDA's "no matches" 404 body
pub fn is_no_matches(body: &[u8]) -> bool {
    serde_json::from_slice::<ErrorEnvelope>(body)
        .map(|e| e.error.code == "NOT_FOUND")
        .unwrap_or(false)
}

/// Split an envelope into records and the next cursor
pub fn parse_envelope(
    body: Value,
    cursor: Option<&str>,
    limit: u32,
) -> Result<(Vec<Value>, Option<String>)> {
    let envelope: Envelope = serde_json::from_value(body).map_err(|e| {
        PipelineError::schema_mismatch(SOURCE, cursor, format!("unexpected envelope: {}", e))
    })?;

    let skip = parse_skip(cursor)?;
    let returned = envelope.results.len() as u64;
    let next_skip = skip + returned;
    let total = envelope.meta.and_then(|m| m.results).and_then(|r| r.total);

    let more = returned > 0
        && returned >= u64::from(limit)
        && total.map_or(true, |total| next_skip < total);

    if !more {
        return Ok((envelope.results, None));
    }
    if next_skip > MAX_SKIP {
        return Err(PipelineError::TerminalFetch {
            source_kind: SOURCE,
            status: None,
            detail: format!(
                "window holds {} results but openFDA paging stops at skip {}; narrow the window",
                total.map_or_else(|| "more".to_string(), |t| t.to_string()),
                MAX_SKIP
            ),
        });
    }
    Ok((envelope.results, Some(next_skip.to_string())))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use serde_json::json;

    fn window() -> DateWindow {
        DateWindow::new(
            NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            NaiveDate::from_ymd_opt(2024, 1, 3).unwrap(),
        )
        .unwrap()
    }

    fn envelope(n: usize, total: u64) -> Value {
        json!({
            "meta": {"results": {"skip": 0, "limit": 2, "total": total}},
            "results": (0..n).map(|i| json!({"safetyreportid": i.to_string()})).collect::<Vec<_>>()
        })
    }

    #[test]
    fn test_request_parameters() {
        let endpoints = SourceEndpoints {
            fda_api_key: Some("k".into()),
            ..SourceEndpoints::default()
        };
        let req = build_request(&endpoints, &window(), Some("200")).unwrap();
        assert_eq!(req.url, "https://api.fda.gov/drug/event.json");
        assert!(req.query.contains(&("search", "receivedate:[20240101 TO 20240103]".to_string())));
        assert!(req.query.contains(&("skip", "200".to_string())));
        assert!(req.query.contains(&("api_key", "k".to_string())));
    }

    #[test]
    fn test_next_cursor_advances_by_returned() {
        let (records, next) = parse_envelope(envelope(2, 5), Some("2"), 2).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(next.as_deref(), Some("4"));
    }

    #[test]
    fn test_last_page_by_total_and_short_page() {
        assert_eq!(parse_envelope(envelope(2, 4), Some("2"), 2).unwrap().1, None);
        assert_eq!(parse_envelope(envelope(1, 100), None, 2).unwrap().1, None);
    }

    #[test]
    fn test_skip_cap_is_terminal() {
        let err = parse_envelope(envelope(2, 30_000), Some("24999"), 2).unwrap_err();
        assert!(matches!(err, PipelineError::TerminalFetch { .. }));
    }

    #[test]
    fn test_missing_results_is_schema_mismatch() {
        let err = parse_envelope(json!({"meta": {}}), None, 2).unwrap_err();
        assert!(matches!(err, PipelineError::SchemaMismatch { .. }));
    }

    #[test]
    fn test_no_matches_body() {
        assert!(is_no_matches(br#"{"error":{"code":"NOT_FOUND","message":"No matches found!"}}"#));
        assert!(!is_no_matches(br#"{"error":{"code":"BAD_REQUEST"}}"#));
        assert!(!is_no_matches(b"not json"));
    }
}
