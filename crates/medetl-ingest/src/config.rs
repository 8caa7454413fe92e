//! Pipeline configuration
//!
//! Loaded from defaults, then `MEDETL_*` environment variables, then CLI
//! flags applied by the binary. Nothing here is process-global: every
//! coordinator owns its own copy.

use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const DEFAULT_FDA_BASE_URL: &str = "https://api.fda.gov";
pub const DEFAULT_CT_BASE_URL: &str = "https://clinicaltrials.gov/api/v2";

/// Upstream endpoints and per-source request parameters
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SourceEndpoints {
    /// openFDA base URL (without the `/drug/event.json` path)
    pub fda_base_url: String,
    /// Optional openFDA API key, sent as a query parameter per request
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fda_api_key: Option<String>,
    /// Records per openFDA page (`limit`)
    pub fda_page_size: u32,
    /// ClinicalTrials.gov v2 base URL
    pub ct_base_url: String,
    /// Studies per ClinicalTrials.gov page (`pageSize`)
    pub ct_page_size: u32,
    pub user_agent: String,
}

impl Default for SourceEndpoints {
    fn default() -> Self {
        Self {
            fda_base_url: DEFAULT_FDA_BASE_URL.to_string(),
            fda_api_key: None,
            fda_page_size: 100,
            ct_base_url: DEFAULT_CT_BASE_URL.to_string(),
            ct_page_size: 100,
            user_agent: concat!("medetl-ingest/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

/// Invocation parameters for one pipeline run
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PipelineConfig {
    /// Request permits per second, per source client
    pub rate_limit_per_sec: u32,
    /// Attempts per page before a transient failure becomes a source failure
    pub retry_max_attempts: u32,
    pub retry_base_delay_ms: u64,
    pub retry_max_delay_ms: u64,
    pub request_timeout_secs: u64,
    /// Maximum tolerated quarantined / evaluated ratio
    pub quarantine_threshold: f64,
    /// Location URI for staging files and checkpoints
    pub staging_root: String,
    /// Location URI for published data files and manifests
    pub manifest_root: String,
    /// Location URI for quarantine files (defaults under the manifest root)
    #[serde(default)]
    pub quarantine_root: Option<String>,
    pub publish_max_attempts: u32,
    /// Age after which a manifest lock is considered abandoned
    pub lock_ttl_secs: u64,
    pub lookback_days: u32,
    /// Stop paging once this many records have been fetched
    #[serde(default)]
    pub max_records_per_source: Option<usize>,
    pub endpoints: SourceEndpoints,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            rate_limit_per_sec: 2,
            retry_max_attempts: 3,
            retry_base_delay_ms: 500,
            retry_max_delay_ms: 30_000,
            request_timeout_secs: 30,
            quarantine_threshold: 0.10,
            staging_root: "./data/staging".to_string(),
            manifest_root: "./data/published".to_string(),
            quarantine_root: None,
            publish_max_attempts: 5,
            lock_ttl_secs: 900,
            lookback_days: 0,
            max_records_per_source: None,
            endpoints: SourceEndpoints::default(),
        }
    }
}

impl PipelineConfig {
    /// Create a new builder
    pub fn builder() -> PipelineConfigBuilder {
        PipelineConfigBuilder::default()
    }

    /// Load configuration from `MEDETL_*` environment variables over defaults
    pub fn from_env() -> anyhow::Result<Self> {
        let defaults = Self::default();
        let endpoint_defaults = SourceEndpoints::default();

        let config = Self {
            rate_limit_per_sec: env_parse("MEDETL_RATE_LIMIT_PER_SEC", defaults.rate_limit_per_sec),
            retry_max_attempts: env_parse("MEDETL_RETRY_MAX_ATTEMPTS", defaults.retry_max_attempts),
            retry_base_delay_ms: env_parse(
                "MEDETL_RETRY_BASE_DELAY_MS",
                defaults.retry_base_delay_ms,
            ),
            retry_max_delay_ms: env_parse("MEDETL_RETRY_MAX_DELAY_MS", defaults.retry_max_delay_ms),
            request_timeout_secs: env_parse(
                "MEDETL_REQUEST_TIMEOUT_SECS",
                defaults.request_timeout_secs,
            ),
            quarantine_threshold: env_parse(
                "MEDETL_QUARANTINE_THRESHOLD",
                defaults.quarantine_threshold,
            ),
            staging_root: std::env::var("MEDETL_STAGING_ROOT").unwrap_or(defaults.staging_root),
            manifest_root: std::env::var("MEDETL_MANIFEST_ROOT").unwrap_or(defaults.manifest_root),
            quarantine_root: std::env::var("MEDETL_QUARANTINE_ROOT").ok(),
            publish_max_attempts: env_parse(
                "MEDETL_PUBLISH_MAX_ATTEMPTS",
                defaults.publish_max_attempts,
            ),
            lock_ttl_secs: env_parse("MEDETL_LOCK_TTL_SECS", defaults.lock_ttl_secs),
            lookback_days: env_parse("MEDETL_LOOKBACK_DAYS", defaults.lookback_days),
            max_records_per_source: std::env::var("MEDETL_MAX_RECORDS_PER_SOURCE")
                .ok()
                .and_then(|s| s.parse().ok()),
            endpoints: SourceEndpoints {
                fda_base_url: std::env::var("MEDETL_FDA_BASE_URL")
                    .unwrap_or(endpoint_defaults.fda_base_url),
                fda_api_key: std::env::var("MEDETL_FDA_API_KEY")
                    .ok()
                    .filter(|k| !k.trim().is_empty()),
                fda_page_size: env_parse("MEDETL_FDA_PAGE_SIZE", endpoint_defaults.fda_page_size),
                ct_base_url: std::env::var("MEDETL_CT_BASE_URL")
                    .unwrap_or(endpoint_defaults.ct_base_url),
                ct_page_size: env_parse("MEDETL_CT_PAGE_SIZE", endpoint_defaults.ct_page_size),
                user_agent: std::env::var("MEDETL_USER_AGENT")
                    .unwrap_or(endpoint_defaults.user_agent),
            },
        };

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.rate_limit_per_sec == 0 {
            anyhow::bail!("rate_limit_per_sec must be greater than 0");
        }
        if self.retry_max_attempts == 0 {
            anyhow::bail!("retry_max_attempts must be greater than 0");
        }
        if self.publish_max_attempts == 0 {
            anyhow::bail!("publish_max_attempts must be greater than 0");
        }
        if !(0.0..=1.0).contains(&self.quarantine_threshold) {
            anyhow::bail!(
                "quarantine_threshold must be within [0, 1], got {}",
                self.quarantine_threshold
            );
        }
        if self.retry_base_delay_ms > self.retry_max_delay_ms {
            anyhow::bail!("retry_base_delay_ms must not exceed retry_max_delay_ms");
        }
        if self.request_timeout_secs == 0 {
            anyhow::bail!("request_timeout_secs must be greater than 0");
        }
        if self.staging_root.trim().is_empty() {
            anyhow::bail!("staging_root cannot be empty");
        }
        if self.manifest_root.trim().is_empty() {
            anyhow::bail!("manifest_root cannot be empty");
        }
        if self.endpoints.fda_page_size == 0 || self.endpoints.ct_page_size == 0 {
            anyhow::bail!("page sizes must be greater than 0");
        }
        // ClinicalTrials.gov rejects pageSize above 1000
        if self.endpoints.ct_page_size > 1000 {
            anyhow::bail!("ct_page_size must not exceed 1000");
        }
        if self.endpoints.fda_page_size > 1000 {
            anyhow::bail!("fda_page_size must not exceed 1000");
        }
        Ok(())
    }

    /// Quarantine location, defaulting to `<manifest_root>/_quarantine`
    pub fn quarantine_root(&self) -> String {
        self.quarantine_root.clone().unwrap_or_else(|| {
            format!("{}/_quarantine", self.manifest_root.trim_end_matches('/'))
        })
    }

    pub fn retry_base_delay(&self) -> Duration {
        Duration::from_millis(self.retry_base_delay_ms)
    }

    pub fn retry_max_delay(&self) -> Duration {
        Duration::from_millis(self.retry_max_delay_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn lock_ttl(&self) -> Duration {
        Duration::from_secs(self.lock_ttl_secs)
    }
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|s| s.trim().parse().ok())
        .unwrap_or(default)
}

/// Builder for PipelineConfig
#[derive(Debug, Default)]
pub struct PipelineConfigBuilder {
    rate_limit_per_sec: Option<u32>,
    retry_max_attempts: Option<u32>,
    retry_base_delay_ms: Option<u64>,
    retry_max_delay_ms: Option<u64>,
    request_timeout_secs: Option<u64>,
    quarantine_threshold: Option<f64>,
    staging_root: Option<String>,
    manifest_root: Option<String>,
    quarantine_root: Option<String>,
    publish_max_attempts: Option<u32>,
    lock_ttl_secs: Option<u64>,
    lookback_days: Option<u32>,
    max_records_per_source: Option<usize>,
    endpoints: Option<SourceEndpoints>,
}

impl PipelineConfigBuilder {
    pub fn rate_limit_per_sec(mut self, rate: u32) -> Self {
        self.rate_limit_per_sec = Some(rate);
        self
    }

    pub fn retry_max_attempts(mut self, attempts: u32) -> Self {
        self.retry_max_attempts = Some(attempts);
        self
    }

    pub fn retry_delays_ms(mut self, base: u64, max: u64) -> Self {
        self.retry_base_delay_ms = Some(base);
        self.retry_max_delay_ms = Some(max);
        self
    }

    pub fn request_timeout_secs(mut self, secs: u64) -> Self {
        self.request_timeout_secs = Some(secs);
        self
    }

    pub fn quarantine_threshold(mut self, threshold: f64) -> Self {
        self.quarantine_threshold = Some(threshold);
        self
    }

    pub fn staging_root(mut self, root: impl Into<String>) -> Self {
        self.staging_root = Some(root.into());
        self
    }

    pub fn manifest_root(mut self, root: impl Into<String>) -> Self {
        self.manifest_root = Some(root.into());
        self
    }

    pub fn quarantine_root(mut self, root: impl Into<String>) -> Self {
        self.quarantine_root = Some(root.into());
        self
    }

    pub fn publish_max_attempts(mut self, attempts: u32) -> Self {
        self.publish_max_attempts = Some(attempts);
        self
    }

    pub fn lock_ttl_secs(mut self, secs: u64) -> Self {
        self.lock_ttl_secs = Some(secs);
        self
    }

    pub fn lookback_days(mut self, days: u32) -> Self {
        self.lookback_days = Some(days);
        self
    }

    pub fn max_records_per_source(mut self, cap: usize) -> Self {
        self.max_records_per_source = Some(cap);
        self
    }

    pub fn endpoints(mut self, endpoints: SourceEndpoints) -> Self {
        self.endpoints = Some(endpoints);
        self
    }

    pub fn build(self) -> PipelineConfig {
        let default = PipelineConfig::default();

        PipelineConfig {
            rate_limit_per_sec: self.rate_limit_per_sec.unwrap_or(default.rate_limit_per_sec),
            retry_max_attempts: self.retry_max_attempts.unwrap_or(default.retry_max_attempts),
            retry_base_delay_ms: self.retry_base_delay_ms.unwrap_or(default.retry_base_delay_ms),
            retry_max_delay_ms: self.retry_max_delay_ms.unwrap_or(default.retry_max_delay_ms),
            request_timeout_secs: self
                .request_timeout_secs
                .unwrap_or(default.request_timeout_secs),
            quarantine_threshold: self
                .quarantine_threshold
                .unwrap_or(default.quarantine_threshold),
            staging_root: self.staging_root.unwrap_or(default.staging_root),
            manifest_root: self.manifest_root.unwrap_or(default.manifest_root),
            quarantine_root: self.quarantine_root.or(default.quarantine_root),
            publish_max_attempts: self
                .publish_max_attempts
                .unwrap_or(default.publish_max_attempts),
            lock_ttl_secs: self.lock_ttl_secs.unwrap_or(default.lock_ttl_secs),
            lookback_days: self.lookback_days.unwrap_or(default.lookback_days),
            max_records_per_source: self.max_records_per_source.or(default.max_records_per_source),
            endpoints: self.endpoints.unwrap_or(default.endpoints),
        }
    }
}
