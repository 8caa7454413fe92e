//! Core data model shared by every pipeline stage

use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::error::{PipelineError, Result};

/// Upstream data source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SourceKind {
    /// openFDA drug adverse event reports
    FdaDrugEvent,
    /// ClinicalTrials.gov study registrations
    ClinicalTrial,
}

impl SourceKind {
    pub const ALL: [SourceKind; 2] = [SourceKind::FdaDrugEvent, SourceKind::ClinicalTrial];

    pub fn as_str(&self) -> &'static str {
        match self {
            SourceKind::FdaDrugEvent => "FDA_DRUG_EVENT",
            SourceKind::ClinicalTrial => "CLINICAL_TRIAL",
        }
    }

    /// Path segment used in storage layouts
    pub fn slug(&self) -> &'static str {
        match self {
            SourceKind::FdaDrugEvent => "fda_drug_event",
            SourceKind::ClinicalTrial => "clinical_trial",
        }
    }

    /// Tag mixed into the record id hash
    pub(crate) fn id_tag(&self) -> &'static str {
        match self {
            SourceKind::FdaDrugEvent => "FDA",
            SourceKind::ClinicalTrial => "CT",
        }
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SourceKind {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "fda_drug_event" | "fda" => Ok(SourceKind::FdaDrugEvent),
            "clinical_trial" | "clinical_trials" | "ct" => Ok(SourceKind::ClinicalTrial),
            other => Err(PipelineError::Config(format!("Unknown source: {}", other))),
        }
    }
}

/// Inclusive date range an extraction covers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateWindow {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateWindow {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Result<Self> {
        if start > end {
            return Err(PipelineError::Config(format!(
                "Window start {} is after end {}",
                start, end
            )));
        }
        Ok(Self { start, end })
    }

    /// `[date - lookback_days, date]`
    pub fn for_logical_date(logical_date: NaiveDate, lookback_days: u32) -> Self {
        Self {
            start: logical_date - Duration::days(i64::from(lookback_days)),
            end: logical_date,
        }
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        date >= self.start && date <= self.end
    }
}

impl fmt::Display for DateWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}]", self.start, self.end)
    }
}

/// One page of upstream records exactly as received
#[derive(Debug, Clone)]
pub struct RawPage {
    pub source: SourceKind,
    pub window: DateWindow,
    pub records: Vec<Value>,
    /// Cursor that produced this page; `None` for the first page
    pub cursor: Option<String>,
    /// Continuation cursor; `None` on the last page
    pub next_cursor: Option<String>,
    /// 1-based page number within the window
    pub page_number: u32,
    pub fetched_at: DateTime<Utc>,
}

impl RawPage {
    pub fn is_last(&self) -> bool {
        self.next_cursor.is_none()
    }
}

/// Typed canonical field value
///
/// Serialized with an explicit type tag so spills and checksums
/// round-trip without re-inferring types.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum FieldValue {
    Text(String),
    Integer(i64),
    Float(f64),
    Bool(bool),
    Date(NaiveDate),
    TextList(Vec<String>),
    Null,
}

impl FieldValue {
    pub fn type_name(&self) -> &'static str {
        match self {
            FieldValue::Text(_) => "text",
            FieldValue::Integer(_) => "integer",
            FieldValue::Float(_) => "float",
            FieldValue::Bool(_) => "bool",
            FieldValue::Date(_) => "date",
            FieldValue::TextList(_) => "text_list",
            FieldValue::Null => "null",
        }
    }

    /// Null, blank text, and empty lists count as missing
    pub fn is_empty(&self) -> bool {
        match self {
            FieldValue::Null => true,
            FieldValue::Text(s) => s.trim().is_empty(),
            FieldValue::TextList(items) => items.is_empty(),
            _ => false,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            FieldValue::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_date(&self) -> Option<NaiveDate> {
        match self {
            FieldValue::Date(d) => Some(*d),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            FieldValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Integers and floats as f64
    pub fn as_number(&self) -> Option<f64> {
        match self {
            FieldValue::Integer(i) => Some(*i as f64),
            FieldValue::Float(f) => Some(*f),
            _ => None,
        }
    }

    /// Untagged JSON rendering used for the published payload column
    pub fn to_json(&self) -> Value {
        match self {
            FieldValue::Text(s) => Value::String(s.clone()),
            FieldValue::Integer(i) => Value::from(*i),
            FieldValue::Float(f) => serde_json::Number::from_f64(*f)
                .map(Value::Number)
                .unwrap_or(Value::Null),
            FieldValue::Bool(b) => Value::Bool(*b),
            FieldValue::Date(d) => Value::String(d.format("%Y-%m-%d").to_string()),
            FieldValue::TextList(items) => {
                Value::Array(items.iter().cloned().map(Value::String).collect())
            },
            FieldValue::Null => Value::Null,
        }
    }
}

/// Where a canonical record came from
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Provenance {
    /// Upstream endpoint identifier, e.g. `openfda:/drug/event.json`
    pub source_id: String,
    /// Cursor of the page the record arrived on
    pub page_cursor: Option<String>,
    pub page_number: u32,
    pub fetched_at: DateTime<Utc>,
}

/// A normalized record in the versioned canonical schema
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalRecord {
    pub record_id: String,
    pub source: SourceKind,
    pub schema_version: u32,
    pub event_date: NaiveDate,
    pub payload: BTreeMap<String, FieldValue>,
    pub provenance: Provenance,
}

/// Provenance-free projection hashed into the partition checksum
#[derive(Serialize)]
struct CanonicalContent<'a> {
    record_id: &'a str,
    source: SourceKind,
    event_date: NaiveDate,
    payload: &'a BTreeMap<String, FieldValue>,
}

impl CanonicalRecord {
    pub fn field(&self, name: &str) -> Option<&FieldValue> {
        self.payload.get(name).filter(|v| !matches!(v, FieldValue::Null))
    }

    /// Stable byte encoding of the record's content.
    ///
    /// Keys are ordered (BTreeMap) and provenance is excluded, so re-fetching
    /// identical upstream data yields identical bytes.
    pub fn canonical_line(&self) -> Result<Vec<u8>> {
        let content = CanonicalContent {
            record_id: &self.record_id,
            source: self.source,
            event_date: self.event_date,
            payload: &self.payload,
        };
        Ok(serde_json::to_vec(&content)?)
    }

    /// Payload as a plain JSON object
    pub fn payload_json(&self) -> Value {
        Value::Object(
            self.payload
                .iter()
                .map(|(k, v)| (k.clone(), v.to_json()))
                .collect(),
        )
    }
}
