//! Quality gate
//!
//! Evaluates every canonical record against a set of [`QualityRule`]s and
//! decides the batch outcome from the quarantine rate.

use chrono::{Duration, NaiveDate};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use tracing::{info, warn};

use crate::error::Result;
use crate::models::{CanonicalRecord, DateWindow, SourceKind};

pub mod rules;

pub use rules::default_rules;

/// Rule family, reported alongside violations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleCategory {
    Completeness,
    TypeFormat,
    RangeDomain,
    CrossField,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Violation {
    pub rule: String,
    pub detail: String,
}

impl Violation {
    pub fn new(rule: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            rule: rule.into(),
            detail: detail.into(),
        }
    }
}

/// Per-run facts rules may depend on
#[derive(Debug, Clone, Copy)]
pub struct RuleContext {
    pub window: DateWindow,
    /// Latest acceptable date for any field
    pub reference_date: NaiveDate,
}

impl RuleContext {
    /// Reference date is one day past the window end to absorb timezone skew
    pub fn for_window(window: DateWindow) -> Self {
        Self {
            window,
            reference_date: window.end + Duration::days(1),
        }
    }
}

pub trait QualityRule: Send + Sync {
    fn name(&self) -> &str;

    fn category(&self) -> RuleCategory;

    fn is_critical(&self) -> bool {
        false
    }

    fn evaluate(&self, record: &CanonicalRecord, ctx: &RuleContext) -> Vec<Violation>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VerdictStatus {
    Accepted,
    Quarantined,
}

/// Outcome for one record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityVerdict {
    pub status: VerdictStatus,
    pub violations: Vec<Violation>,
    /// A critical rule was violated
    pub critical: bool,
}

impl QualityVerdict {
    pub fn is_accepted(&self) -> bool {
        self.status == VerdictStatus::Accepted
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BatchStatus {
    Pass,
    PassWithQuarantine,
    Fail,
}

impl BatchStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BatchStatus::Pass => "PASS",
            BatchStatus::PassWithQuarantine => "PASS_WITH_QUARANTINE",
            BatchStatus::Fail => "FAIL",
        }
    }
}

/// Aggregate quality statistics for one `(source, logical_date)` batch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchReport {
    /// Records evaluated after de-duplication
    pub total: u64,
    pub accepted: u64,
    pub quarantined: u64,
    pub critical_quarantined: u64,
    pub duplicates_dropped: u64,
    pub quarantine_rate: f64,
    pub threshold: f64,
    /// Violations per rule name
    pub rule_counts: BTreeMap<String, u64>,
    /// Distinct rule names that fired, sorted
    pub violated_rules: Vec<String>,
    pub batch_status: BatchStatus,
}

/// Runs the rule set over batches of canonical records
pub struct QualityGate {
    rules: Vec<Box<dyn QualityRule>>,
    threshold: f64,
}

impl QualityGate {
    /// Gate with the default rule set
    pub fn new(threshold: f64) -> Result<Self> {
        Ok(Self::with_rules(threshold, default_rules()?))
    }

    pub fn with_rules(threshold: f64, rules: Vec<Box<dyn QualityRule>>) -> Self {
        Self { rules, threshold }
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    pub fn rule_names(&self) -> Vec<&str> {
        self.rules.iter().map(|r| r.name()).collect()
    }

    pub fn evaluate_record(&self, record: &CanonicalRecord, ctx: &RuleContext) -> QualityVerdict {
        let mut violations = Vec::new();
        let mut critical = false;

        for rule in &self.rules {
            let found = rule.evaluate(record, ctx);
            if !found.is_empty() && rule.is_critical() {
                critical = true;
            }
            violations.extend(found);
        }

        QualityVerdict {
            status: if violations.is_empty() {
                VerdictStatus::Accepted
            } else {
                VerdictStatus::Quarantined
            },
            violations,
            critical,
        }
    }

    /// Validate a batch.
    ///
    /// Duplicate `record_id`s keep their first occurrence. Order of the
    /// returned verdicts follows the input.
    pub fn validate(
        &self,
        records: Vec<CanonicalRecord>,
        ctx: &RuleContext,
    ) -> (Vec<(CanonicalRecord, QualityVerdict)>, BatchReport) {
        let mut seen = HashSet::new();
        let mut duplicates_dropped = 0u64;
        let mut verdicts = Vec::with_capacity(records.len());
        let mut rule_counts: BTreeMap<String, u64> = BTreeMap::new();
        let mut accepted = 0u64;
        let mut quarantined = 0u64;
        let mut critical_quarantined = 0u64;

        for record in records {
            if !seen.insert(record.record_id.clone()) {
                duplicates_dropped += 1;
                continue;
            }

            let verdict = self.evaluate_record(&record, ctx);
            if verdict.is_accepted() {
                accepted += 1;
            } else {
                quarantined += 1;
                if verdict.critical {
                    critical_quarantined += 1;
                }
                for violation in &verdict.violations {
                    *rule_counts.entry(violation.rule.clone()).or_insert(0) += 1;
                }
            }
            verdicts.push((record, verdict));
        }

        let total = accepted + quarantined;
        let quarantine_rate = if total == 0 {
            0.0
        } else {
            quarantined as f64 / total as f64
        };

        let batch_status = if quarantine_rate > self.threshold {
            BatchStatus::Fail
        } else if quarantined > 0 {
            BatchStatus::PassWithQuarantine
        } else {
            BatchStatus::Pass
        };

        let violated_rules: Vec<String> = rule_counts.keys().cloned().collect();

        let report = BatchReport {
            total,
            accepted,
            quarantined,
            critical_quarantined,
            duplicates_dropped,
            quarantine_rate,
            threshold: self.threshold,
            rule_counts,
            violated_rules,
            batch_status,
        };

        if batch_status == BatchStatus::Fail {
            warn!(
                total,
                quarantined,
                rate = quarantine_rate,
                threshold = self.threshold,
                "Quality gate failed"
            );
        } else {
            info!(
                total,
                accepted,
                quarantined,
                duplicates_dropped,
                status = batch_status.as_str(),
                "Quality gate evaluated batch"
            );
        }

        (verdicts, report)
    }
}

/// Fewest published records across a whole run before it is reported as thin
pub const MIN_RUN_RECORDS: u64 = 10;

/// Fewest published records per source before it is reported as thin
pub const MIN_SOURCE_RECORDS: u64 = 5;

/// Advisory warnings for suspiciously small runs.
///
/// `counts` holds the published record count of each published source.
/// Nothing here fails a batch.
pub fn record_count_warnings(counts: &[(SourceKind, u64)]) -> Vec<String> {
    let mut warnings = Vec::new();

    let total: u64 = counts.iter().map(|(_, n)| n).sum();
    if !counts.is_empty() && total < MIN_RUN_RECORDS {
        warnings.push(format!(
            "Record count ({}) is below minimum threshold ({})",
            total, MIN_RUN_RECORDS
        ));
    }
    for (source, count) in counts {
        if *count < MIN_SOURCE_RECORDS {
            warnings.push(format!("Source {} has only {} records", source, count));
        }
    }

    for warning in &warnings {
        warn!("{}", warning);
    }
    warnings
}

/// Split verdicts into accepted records and quarantined pairs, preserving order
pub fn partition_verdicts(
    verdicts: Vec<(CanonicalRecord, QualityVerdict)>,
) -> (Vec<CanonicalRecord>, Vec<(CanonicalRecord, QualityVerdict)>) {
    let mut accepted = Vec::new();
    let mut quarantined = Vec::new();
    for (record, verdict) in verdicts {
        if verdict.is_accepted() {
            accepted.push(record);
        } else {
            quarantined.push((record, verdict));
        }
    }
    (accepted, quarantined)
}
