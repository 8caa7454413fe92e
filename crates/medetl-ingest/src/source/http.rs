//! HTTP page fetcher for both upstream APIs
//!
//! Every attempt, retries included, waits for a rate-limit permit.

use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use reqwest::{header::RETRY_AFTER, Client, StatusCode};
use std::num::NonZeroU32;
use std::time::Duration;
use tracing::{debug, instrument, warn};

use super::{clinical_trials, openfda, PageFetcher, PageRequest};
use crate::config::{PipelineConfig, SourceEndpoints};
use crate::error::{PipelineError, Result};
use crate::models::{DateWindow, RawPage, SourceKind};
use crate::retry::RetryPolicy;

/// Longest response excerpt carried in error details
const BODY_EXCERPT: usize = 256;

pub struct HttpSourceClient {
    client: Client,
    endpoints: SourceEndpoints,
    limiter: DefaultDirectRateLimiter,
    retry: RetryPolicy,
}

impl HttpSourceClient {
    pub fn new(config: &PipelineConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.request_timeout())
            .user_agent(config.endpoints.user_agent.clone())
            .build()
            .map_err(|e| PipelineError::Config(format!("Failed to build HTTP client: {}", e)))?;

        let per_second = NonZeroU32::new(config.rate_limit_per_sec).ok_or_else(|| {
            PipelineError::Config("rate_limit_per_sec must be greater than 0".to_string())
        })?;

        Ok(Self {
            client,
            endpoints: config.endpoints.clone(),
            limiter: RateLimiter::direct(Quota::per_second(per_second)),
            retry: RetryPolicy::for_fetch(config),
        })
    }

    /// One attempt. Returns the status and body for any non-retryable status.
    async fn execute(&self, source: SourceKind, request: &PageRequest) -> Result<(StatusCode, Bytes)> {
        self.limiter.until_ready().await;

        let response = self
            .client
            .get(&request.url)
            .query(&request.query)
            .send()
            .await
            .map_err(|e| classify_send_error(source, e))?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
            let retry_after = response
                .headers()
                .get(RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse::<u64>().ok())
                .map(Duration::from_secs);
            return Err(PipelineError::TransientFetch {
                source_kind: source,
                detail: format!("HTTP {} from {}", status, request.url),
                retry_after,
            });
        }

        let body = response.bytes().await.map_err(|e| classify_send_error(source, e))?;
        Ok((status, body))
    }

    async fn execute_with_retry(
        &self,
        source: SourceKind,
        request: &PageRequest,
    ) -> Result<(StatusCode, Bytes)> {
        let mut last_error = None;

        for attempt in 1..=self.retry.max_attempts {
            match self.execute(source, request).await {
                Ok(reply) => return Ok(reply),
                Err(e) if e.is_retryable() => {
                    warn!(
                        %source,
                        attempt,
                        "Fetch attempt {}/{} failed: {}",
                        attempt,
                        self.retry.max_attempts,
                        e
                    );
                    if attempt < self.retry.max_attempts {
                        let delay = self.retry.delay_for(attempt, e.retry_after());
                        debug!("Retrying in {:?}", delay);
                        tokio::time::sleep(delay).await;
                    }
                    last_error = Some(e.to_string());
                },
                Err(e) => return Err(e),
            }
        }

        Err(PipelineError::SourceFailure {
            source_kind: source,
            attempts: self.retry.max_attempts,
            detail: last_error.unwrap_or_else(|| "no attempt was made".to_string()),
        })
    }
}

#[async_trait]
impl PageFetcher for HttpSourceClient {
    #[instrument(skip(self, source, window), fields(%source, %window))]
    async fn fetch_page(
        &self,
        source: SourceKind,
        window: &DateWindow,
        cursor: Option<&str>,
        page_number: u32,
    ) -> Result<RawPage> {
        let request = match source {
            SourceKind::FdaDrugEvent => openfda::build_request(&self.endpoints, window, cursor)?,
            SourceKind::ClinicalTrial => clinical_trials::build_request(&self.endpoints, window, cursor),
        };

        let (status, body) = self.execute_with_retry(source, &request).await?;

        let (records, next_cursor) = if status.is_success() {
            let json: serde_json::Value = serde_json::from_slice(&body).map_err(|e| {
                PipelineError::schema_mismatch(source, cursor, format!("response is not valid JSON: {}", e))
            })?;
            match source {
                SourceKind::FdaDrugEvent => {
                    openfda::parse_envelope(json, cursor, self.endpoints.fda_page_size)?
                },
                SourceKind::ClinicalTrial => clinical_trials::parse_envelope(json, cursor)?,
            }
        } else if source == SourceKind::FdaDrugEvent
            && status == StatusCode::NOT_FOUND
            && openfda::is_no_matches(&body)
        {
            debug!("openFDA reported no matches for {}", window);
            (Vec::new(), None)
        } else {
            return Err(PipelineError::TerminalFetch {
                source_kind: source,
                status: Some(status.as_u16()),
                detail: excerpt(&body),
            });
        };

        Ok(RawPage {
            source,
            window: *window,
            records,
            cursor: cursor.map(str::to_string),
            next_cursor,
            page_number,
            fetched_at: Utc::now(),
        })
    }
}

/// Network trouble is transient; anything about the request itself is not
fn classify_send_error(source: SourceKind, e: reqwest::Error) -> PipelineError {
    let transient = !(e.is_builder() || e.is_redirect() || e.is_decode())
        && (e.is_timeout() || e.is_connect() || e.is_request() || e.is_body());
    if transient {
        PipelineError::TransientFetch {
            source_kind: source,
            detail: e.to_string(),
            retry_after: None,
        }
    } else {
        PipelineError::TerminalFetch {
            source_kind: source,
            status: e.status().map(|s| s.as_u16()),
            detail: e.to_string(),
        }
    }
}

fn excerpt(body: &[u8]) -> String {
    let text = String::from_utf8_lossy(body);
    match text.char_indices().nth(BODY_EXCERPT) {
        Some((end, _)) => format!("{}...", &text[..end]),
        None => text.into_owned(),
    }
}
