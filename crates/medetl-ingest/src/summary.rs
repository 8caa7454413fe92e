//! Cross-source drug summary
//!
//! Rolls published adverse event reports up per drug and links each drug
//! to the published trials whose conditions match one of its reported
//! indications. Matching ignores case and whitespace and accepts either
//! string containing the other, so "Lung Cancer" finds
//! "Non-Small Cell Lung Cancer".

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use tracing::info;

use crate::error::Result;
use crate::models::SourceKind;
use crate::partition::{ManifestReader, PartitionRow};

/// Adverse event and trial statistics for one drug
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DrugSummary {
    /// Upper-cased product name
    pub drug_name: String,
    pub adverse_event_count: u64,
    /// Mean over reports that carry a severity score
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avg_severity_score: Option<f64>,
    pub death_count: u64,
    pub hospitalization_count: u64,
    pub indications: Vec<String>,
    pub trial_count: u64,
    pub total_enrollment: i64,
    pub completed_trials: u64,
}

/// Trial statistics for one condition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConditionSummary {
    /// Upper-cased condition name
    pub condition: String,
    pub trial_count: u64,
    pub total_enrollment: i64,
    pub completed_trials: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrossSourceSummary {
    pub logical_date: NaiveDate,
    pub drugs: Vec<DrugSummary>,
    pub conditions: Vec<ConditionSummary>,
}

#[derive(Default)]
struct DrugTally {
    reports: u64,
    severity_total: f64,
    severity_reports: u64,
    deaths: u64,
    hospitalizations: u64,
    indications: BTreeSet<String>,
}

struct Trial {
    match_keys: Vec<String>,
    enrollment: i64,
    completed: bool,
}

fn text_list(payload: &Value, field: &str) -> Vec<String> {
    payload
        .get(field)
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

fn flag(payload: &Value, field: &str) -> bool {
    payload.get(field).and_then(Value::as_bool).unwrap_or(false)
}

/// Lower-cased with all whitespace removed
fn match_key(text: &str) -> String {
    text.chars()
        .filter(|c| !c.is_whitespace())
        .flat_map(char::to_lowercase)
        .collect()
}

fn related(indication: &str, condition: &str) -> bool {
    !indication.is_empty()
        && !condition.is_empty()
        && (condition.contains(indication) || indication.contains(condition))
}

fn trial_of(row: &PartitionRow) -> (Trial, BTreeSet<String>) {
    let conditions: BTreeSet<String> = text_list(&row.payload, "conditions")
        .iter()
        .map(|c| c.to_uppercase())
        .collect();
    let trial = Trial {
        match_keys: conditions.iter().map(|c| match_key(c)).collect(),
        enrollment: row.payload.get("enrollment_count").and_then(Value::as_i64).unwrap_or(0),
        completed: flag(&row.payload, "is_completed"),
    };
    (trial, conditions)
}

/// Summarize already-decoded partitions of both sources
pub fn summarize(
    logical_date: NaiveDate,
    drug_events: &[PartitionRow],
    clinical_trials: &[PartitionRow],
) -> CrossSourceSummary {
    let mut tallies: BTreeMap<String, DrugTally> = BTreeMap::new();
    for row in drug_events {
        let names: BTreeSet<String> = text_list(&row.payload, "drug_names")
            .iter()
            .map(|n| n.to_uppercase())
            .collect();
        let indications = text_list(&row.payload, "drug_indications");
        let severity = row.payload.get("severity_score").and_then(Value::as_f64);

        for name in names {
            let tally = tallies.entry(name).or_default();
            tally.reports += 1;
            if let Some(score) = severity {
                tally.severity_total += score;
                tally.severity_reports += 1;
            }
            tally.deaths += u64::from(flag(&row.payload, "seriousness_death"));
            tally.hospitalizations += u64::from(flag(&row.payload, "seriousness_hospitalization"));
            tally.indications.extend(indications.iter().cloned());
        }
    }

    let mut trials = Vec::with_capacity(clinical_trials.len());
    let mut conditions: BTreeMap<String, ConditionSummary> = BTreeMap::new();
    for row in clinical_trials {
        let (trial, names) = trial_of(row);
        for name in names {
            let entry = conditions.entry(name.clone()).or_insert_with(|| ConditionSummary {
                condition: name,
                trial_count: 0,
                total_enrollment: 0,
                completed_trials: 0,
            });
            entry.trial_count += 1;
            entry.total_enrollment += trial.enrollment;
            entry.completed_trials += u64::from(trial.completed);
        }
        trials.push(trial);
    }

    let drugs = tallies
        .into_iter()
        .map(|(drug_name, tally)| {
            let keys: Vec<String> = tally.indications.iter().map(|i| match_key(i)).collect();
            let matched: Vec<&Trial> = trials
                .iter()
                .filter(|t| {
                    t.match_keys
                        .iter()
                        .any(|c| keys.iter().any(|i| related(i, c)))
                })
                .collect();

            DrugSummary {
                drug_name,
                adverse_event_count: tally.reports,
                avg_severity_score: (tally.severity_reports > 0)
                    .then(|| tally.severity_total / tally.severity_reports as f64),
                death_count: tally.deaths,
                hospitalization_count: tally.hospitalizations,
                indications: tally.indications.into_iter().collect(),
                trial_count: matched.len() as u64,
                total_enrollment: matched.iter().map(|t| t.enrollment).sum(),
                completed_trials: matched.iter().filter(|t| t.completed).count() as u64,
            }
        })
        .collect();

    CrossSourceSummary {
        logical_date,
        drugs,
        conditions: conditions.into_values().collect(),
    }
}

async fn published_rows(
    reader: &ManifestReader,
    source: SourceKind,
    logical_date: NaiveDate,
) -> Result<Vec<PartitionRow>> {
    match reader.read(source, logical_date).await? {
        Some(manifest) => reader.read_rows(&manifest).await,
        None => Ok(Vec::new()),
    }
}

/// Summarize the currently published partitions of a logical date.
///
/// A source without a manifest contributes no rows.
pub async fn summarize_date(reader: &ManifestReader, logical_date: NaiveDate) -> Result<CrossSourceSummary> {
    let drug_events = published_rows(reader, SourceKind::FdaDrugEvent, logical_date).await?;
    let clinical_trials = published_rows(reader, SourceKind::ClinicalTrial, logical_date).await?;

    let summary = summarize(logical_date, &drug_events, &clinical_trials);
    info!(
        %logical_date,
        reports = drug_events.len(),
        trials = clinical_trials.len(),
        drugs = summary.drugs.len(),
        "Built cross-source summary"
    );
    Ok(summary)
}
