//! Canonical schema definitions, version 1

use crate::models::{FieldValue, SourceKind};

/// Canonical schema version written into every record, data file, and manifest
pub const SCHEMA_VERSION: u32 = 1;

/// Expected type of a canonical field
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Text,
    Integer,
    Float,
    Bool,
    Date,
    TextList,
}

impl FieldKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FieldKind::Text => "text",
            FieldKind::Integer => "integer",
            FieldKind::Float => "float",
            FieldKind::Bool => "bool",
            FieldKind::Date => "date",
            FieldKind::TextList => "text_list",
        }
    }

    pub fn matches(&self, value: &FieldValue) -> bool {
        matches!(
            (self, value),
            (_, FieldValue::Null)
                | (FieldKind::Text, FieldValue::Text(_))
                | (FieldKind::Integer, FieldValue::Integer(_))
                | (FieldKind::Float, FieldValue::Float(_))
                | (FieldKind::Float, FieldValue::Integer(_))
                | (FieldKind::Bool, FieldValue::Bool(_))
                | (FieldKind::Date, FieldValue::Date(_))
                | (FieldKind::TextList, FieldValue::TextList(_))
        )
    }
}

/// One field of a canonical schema
#[derive(Debug, Clone, Copy)]
pub struct FieldSpec {
    pub name: &'static str,
    pub kind: FieldKind,
    pub required: bool,
    /// Part of the natural key
    pub key: bool,
}

const fn field(name: &'static str, kind: FieldKind) -> FieldSpec {
    FieldSpec {
        name,
        kind,
        required: false,
        key: false,
    }
}

const fn required(name: &'static str, kind: FieldKind) -> FieldSpec {
    FieldSpec {
        name,
        kind,
        required: true,
        key: false,
    }
}

const fn key(name: &'static str, kind: FieldKind) -> FieldSpec {
    FieldSpec {
        name,
        kind,
        required: true,
        key: true,
    }
}

pub const FDA_DRUG_EVENT_FIELDS: &[FieldSpec] = &[
    key("safety_report_id", FieldKind::Text),
    key("receive_date", FieldKind::Date),
    field("receipt_date", FieldKind::Date),
    required("serious", FieldKind::Bool),
    field("seriousness_death", FieldKind::Bool),
    field("seriousness_hospitalization", FieldKind::Bool),
    field("patient_age_years", FieldKind::Float),
    field("age_group", FieldKind::Text),
    field("patient_sex", FieldKind::Text),
    required("drug_names", FieldKind::TextList),
    field("drug_indications", FieldKind::TextList),
    field("reactions", FieldKind::TextList),
    field("occur_country", FieldKind::Text),
    field("reporter_qualification", FieldKind::Text),
    field("company_number", FieldKind::Text),
    field("severity_score", FieldKind::Integer),
];

pub const CLINICAL_TRIAL_FIELDS: &[FieldSpec] = &[
    key("nct_id", FieldKind::Text),
    field("org_study_id", FieldKind::Text),
    required("brief_title", FieldKind::Text),
    field("official_title", FieldKind::Text),
    field("brief_summary", FieldKind::Text),
    field("detailed_description", FieldKind::Text),
    required("overall_status", FieldKind::Text),
    field("first_post_date", FieldKind::Date),
    required("last_update_date", FieldKind::Date),
    field("start_date", FieldKind::Date),
    field("completion_date", FieldKind::Date),
    field("conditions", FieldKind::TextList),
    field("keywords", FieldKind::TextList),
    field("study_type", FieldKind::Text),
    field("phases", FieldKind::TextList),
    field("phase_numeric", FieldKind::Float),
    field("enrollment_count", FieldKind::Integer),
    field("allocation", FieldKind::Text),
    field("intervention_model", FieldKind::Text),
    field("primary_purpose", FieldKind::Text),
    field("masking", FieldKind::Text),
    field("intervention_types", FieldKind::TextList),
    field("primary_outcome_measures", FieldKind::TextList),
    field("lead_sponsor", FieldKind::Text),
    field("sex", FieldKind::Text),
    field("min_age", FieldKind::Text),
    field("max_age", FieldKind::Text),
    field("healthy_volunteers", FieldKind::Bool),
    field("location_countries", FieldKind::TextList),
    field("is_active", FieldKind::Bool),
    field("is_completed", FieldKind::Bool),
];

pub const AGE_GROUP_VALUES: &[&str] = &["Pediatric", "Young Adult", "Adult", "Senior", "Elderly"];

pub const PATIENT_SEX_VALUES: &[&str] = &["unknown", "male", "female"];

pub const TRIAL_STATUS_VALUES: &[&str] = &[
    "ACTIVE_NOT_RECRUITING",
    "COMPLETED",
    "ENROLLING_BY_INVITATION",
    "NOT_YET_RECRUITING",
    "RECRUITING",
    "SUSPENDED",
    "TERMINATED",
    "WITHDRAWN",
    "AVAILABLE",
    "NO_LONGER_AVAILABLE",
    "TEMPORARILY_NOT_AVAILABLE",
    "APPROVED_FOR_MARKETING",
    "WITHHELD",
    "UNKNOWN",
];

pub const ACTIVE_TRIAL_STATUSES: &[&str] = &[
    "RECRUITING",
    "ACTIVE_NOT_RECRUITING",
    "ENROLLING_BY_INVITATION",
    "NOT_YET_RECRUITING",
];

pub fn fields_for(source: SourceKind) -> &'static [FieldSpec] {
    match source {
        SourceKind::FdaDrugEvent => FDA_DRUG_EVENT_FIELDS,
        SourceKind::ClinicalTrial => CLINICAL_TRIAL_FIELDS,
    }
}

pub fn field_spec(source: SourceKind, name: &str) -> Option<&'static FieldSpec> {
    fields_for(source).iter().find(|f| f.name == name)
}

/// Natural key fields, in hashing order
pub fn natural_key_fields(source: SourceKind) -> impl Iterator<Item = &'static str> {
    fields_for(source).iter().filter(|f| f.key).map(|f| f.name)
}
