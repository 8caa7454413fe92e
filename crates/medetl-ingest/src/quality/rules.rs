//! Default rule set

use chrono::NaiveDate;
use regex::Regex;

use super::{QualityRule, RuleCategory, RuleContext, Violation};
use crate::error::{PipelineError, Result};
use crate::models::{CanonicalRecord, FieldValue, SourceKind};
use crate::normalize::natural_key_parts;
use crate::normalize::schema::{fields_for, AGE_GROUP_VALUES, PATIENT_SEX_VALUES, TRIAL_STATUS_VALUES};

/// Every schema-required field is present and non-empty
pub struct RequiredFields;

impl QualityRule for RequiredFields {
    fn name(&self) -> &str {
        "required_fields"
    }

    fn category(&self) -> RuleCategory {
        RuleCategory::Completeness
    }

    fn evaluate(&self, record: &CanonicalRecord, _ctx: &RuleContext) -> Vec<Violation> {
        fields_for(record.source)
            .iter()
            .filter(|spec| spec.required)
            .filter(|spec| record.payload.get(spec.name).map_or(true, FieldValue::is_empty))
            .map(|spec| Violation::new(self.name(), format!("missing required field {}", spec.name)))
            .collect()
    }
}

/// The natural key is complete. Without it the record has no identity.
pub struct NaturalKeyPresent;

impl QualityRule for NaturalKeyPresent {
    fn name(&self) -> &str {
        "natural_key_present"
    }

    fn category(&self) -> RuleCategory {
        RuleCategory::Completeness
    }

    fn is_critical(&self) -> bool {
        true
    }

    fn evaluate(&self, record: &CanonicalRecord, _ctx: &RuleContext) -> Vec<Violation> {
        match natural_key_parts(record.source, &record.payload) {
            Some(_) => Vec::new(),
            None => vec![Violation::new(self.name(), "natural key incomplete")],
        }
    }
}

/// Present fields match their schema type and identifier formats
pub struct FieldTypes {
    nct_id: Regex,
    safety_report_id: Regex,
}

impl FieldTypes {
    pub fn new() -> Result<Self> {
        let compile = |pattern: &str| {
            Regex::new(pattern).map_err(|e| PipelineError::Config(format!("invalid pattern: {}", e)))
        };
        Ok(Self {
            nct_id: compile(r"^NCT\d{8}$")?,
            safety_report_id: compile(r"^[A-Za-z0-9-]+$")?,
        })
    }
}

impl QualityRule for FieldTypes {
    fn name(&self) -> &str {
        "field_types"
    }

    fn category(&self) -> RuleCategory {
        RuleCategory::TypeFormat
    }

    fn evaluate(&self, record: &CanonicalRecord, _ctx: &RuleContext) -> Vec<Violation> {
        let specs = fields_for(record.source);
        let mut violations = Vec::new();

        for (name, value) in &record.payload {
            match specs.iter().find(|s| s.name == name) {
                Some(spec) if !spec.kind.matches(value) => violations.push(Violation::new(
                    self.name(),
                    format!(
                        "{} expected {} but was {}",
                        name,
                        spec.kind.as_str(),
                        value.type_name()
                    ),
                )),
                Some(_) => {},
                None => violations.push(Violation::new(self.name(), format!("unknown field {}", name))),
            }
        }

        let (id_field, pattern) = match record.source {
            SourceKind::FdaDrugEvent => ("safety_report_id", &self.safety_report_id),
            SourceKind::ClinicalTrial => ("nct_id", &self.nct_id),
        };
        if let Some(FieldValue::Text(id)) = record.field(id_field) {
            if !pattern.is_match(id) {
                violations.push(Violation::new(
                    self.name(),
                    format!("{} '{}' has invalid format", id_field, id),
                ));
            }
        }

        violations
    }
}

/// Numeric ranges and enumerations
pub struct ValueRanges;

impl ValueRanges {
    fn check_range(
        &self,
        record: &CanonicalRecord,
        field: &str,
        min: f64,
        max: Option<f64>,
        out: &mut Vec<Violation>,
    ) {
        if let Some(value) = record.field(field).and_then(FieldValue::as_number) {
            if !value.is_finite() {
                out.push(Violation::new(self.name(), format!("{} is not a finite number", field)));
            } else if value < min || max.map_or(false, |m| value > m) {
                out.push(Violation::new(
                    self.name(),
                    format!("{} {} outside allowed range", field, value),
                ));
            }
        }
    }

    fn check_enum(&self, record: &CanonicalRecord, field: &str, allowed: &[&str], out: &mut Vec<Violation>) {
        if let Some(FieldValue::Text(value)) = record.field(field) {
            if !allowed.contains(&value.as_str()) {
                out.push(Violation::new(
                    self.name(),
                    format!("{} '{}' not in allowed values", field, value),
                ));
            }
        }
    }
}

impl QualityRule for ValueRanges {
    fn name(&self) -> &str {
        "value_ranges"
    }

    fn category(&self) -> RuleCategory {
        RuleCategory::RangeDomain
    }

    fn evaluate(&self, record: &CanonicalRecord, _ctx: &RuleContext) -> Vec<Violation> {
        let mut violations = Vec::new();
        match record.source {
            SourceKind::FdaDrugEvent => {
                self.check_range(record, "severity_score", 0.0, Some(100.0), &mut violations);
                self.check_range(record, "patient_age_years", 0.0, Some(120.0), &mut violations);
                self.check_enum(record, "patient_sex", PATIENT_SEX_VALUES, &mut violations);
                self.check_enum(record, "age_group", AGE_GROUP_VALUES, &mut violations);
            },
            SourceKind::ClinicalTrial => {
                self.check_range(record, "enrollment_count", 0.0, None, &mut violations);
                self.check_range(record, "phase_numeric", 0.0, Some(4.0), &mut violations);
                self.check_enum(record, "overall_status", TRIAL_STATUS_VALUES, &mut violations);
            },
        }
        violations
    }
}

/// No date after the run's reference date
pub struct NoFutureDates;

impl QualityRule for NoFutureDates {
    fn name(&self) -> &str {
        "no_future_dates"
    }

    fn category(&self) -> RuleCategory {
        RuleCategory::RangeDomain
    }

    fn evaluate(&self, record: &CanonicalRecord, ctx: &RuleContext) -> Vec<Violation> {
        // Trial start and completion dates are anticipated and may be in the future
        let exempt: &[&str] = match record.source {
            SourceKind::ClinicalTrial => &["start_date", "completion_date"],
            SourceKind::FdaDrugEvent => &[],
        };

        record
            .payload
            .iter()
            .filter(|(name, _)| !exempt.contains(&name.as_str()))
            .filter_map(|(name, value)| value.as_date().map(|d| (name, d)))
            .filter(|(_, date)| *date > ctx.reference_date)
            .map(|(name, date)| {
                Violation::new(
                    self.name(),
                    format!("{} {} is after {}", name, date, ctx.reference_date),
                )
            })
            .collect()
    }
}

/// Cross-field date ordering
pub struct DateConsistency;

impl DateConsistency {
    fn ordered(
        &self,
        record: &CanonicalRecord,
        earlier: &str,
        later: &str,
        out: &mut Vec<Violation>,
    ) {
        let pick = |name: &str| -> Option<NaiveDate> { record.field(name).and_then(FieldValue::as_date) };
        if let (Some(a), Some(b)) = (pick(earlier), pick(later)) {
            if b < a {
                out.push(Violation::new(
                    self.name(),
                    format!("{} {} precedes {} {}", later, b, earlier, a),
                ));
            }
        }
    }
}

impl QualityRule for DateConsistency {
    fn name(&self) -> &str {
        "date_consistency"
    }

    fn category(&self) -> RuleCategory {
        RuleCategory::CrossField
    }

    fn evaluate(&self, record: &CanonicalRecord, _ctx: &RuleContext) -> Vec<Violation> {
        let mut violations = Vec::new();
        match record.source {
            SourceKind::FdaDrugEvent => {
                self.ordered(record, "receive_date", "receipt_date", &mut violations);
            },
            SourceKind::ClinicalTrial => {
                self.ordered(record, "start_date", "completion_date", &mut violations);
                self.ordered(record, "first_post_date", "last_update_date", &mut violations);
            },
        }
        violations
    }
}

/// The record's event date falls inside the extraction window
pub struct EventDateInWindow;

impl QualityRule for EventDateInWindow {
    fn name(&self) -> &str {
        "event_date_in_window"
    }

    fn category(&self) -> RuleCategory {
        RuleCategory::RangeDomain
    }

    fn evaluate(&self, record: &CanonicalRecord, ctx: &RuleContext) -> Vec<Violation> {
        if ctx.window.contains(record.event_date) {
            Vec::new()
        } else {
            vec![Violation::new(
                self.name(),
                format!("event_date {} outside window {}", record.event_date, ctx.window),
            )]
        }
    }
}

pub fn default_rules() -> Result<Vec<Box<dyn QualityRule>>> {
    Ok(vec![
        Box::new(RequiredFields),
        Box::new(NaturalKeyPresent),
        Box::new(FieldTypes::new()?),
        Box::new(ValueRanges),
        Box::new(NoFutureDates),
        Box::new(DateConsistency),
        Box::new(EventDateInWindow),
    ])
}
