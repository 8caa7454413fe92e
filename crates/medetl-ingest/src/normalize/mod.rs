//! Raw page → canonical records
//!
//! Pure and deterministic: the same raw record always maps to the same
//! payload and `record_id`. Values that fail to convert are kept as raw
//! text for the quality gate to flag. Structural mismatches fail the page.

use chrono::NaiveDate;
use medetl_common::checksum::sha256_hex;
use std::collections::BTreeMap;
use tracing::debug;

use crate::error::{PipelineError, Result};
use crate::models::{CanonicalRecord, FieldValue, Provenance, RawPage, SourceKind};

pub mod clinical_trials;
pub mod openfda;
pub mod schema;

pub use schema::{natural_key_fields, FieldKind, FieldSpec, SCHEMA_VERSION};

/// Payload and event date produced by a source mapper
#[derive(Debug, Default)]
pub(crate) struct MappedRecord {
    pub payload: BTreeMap<String, FieldValue>,
    pub event_date: Option<NaiveDate>,
}

/// Upstream endpoint identifier recorded in provenance
pub fn endpoint_id(source: SourceKind) -> &'static str {
    match source {
        SourceKind::FdaDrugEvent => "openfda:/drug/event.json",
        SourceKind::ClinicalTrial => "ctgov:/api/v2/studies",
    }
}

/// Normalize every record on a page.
///
/// The first record that does not match the upstream contract fails the
/// whole page with `SchemaMismatch`.
pub fn normalize(page: &RawPage) -> Result<Vec<CanonicalRecord>> {
    let mut records = Vec::with_capacity(page.records.len());

    for (index, raw) in page.records.iter().enumerate() {
        let mismatch = |detail: String| {
            PipelineError::schema_mismatch(
                page.source,
                page.cursor.as_deref(),
                format!("page {} record {}: {}", page.page_number, index, detail),
            )
        };

        if !raw.is_object() {
            return Err(mismatch("record is not a JSON object".to_string()));
        }

        let mapped = match page.source {
            SourceKind::FdaDrugEvent => openfda::map_record(raw),
            SourceKind::ClinicalTrial => clinical_trials::map_record(raw),
        }
        .map_err(mismatch)?;

        let record_id = record_id(page.source, &mapped.payload);
        // Records without a usable event date are quarantined by the
        // required-field rules; the logical date keeps them partitionable.
        let event_date = mapped.event_date.unwrap_or(page.window.end);

        records.push(CanonicalRecord {
            record_id,
            source: page.source,
            schema_version: SCHEMA_VERSION,
            event_date,
            payload: mapped.payload,
            provenance: Provenance {
                source_id: endpoint_id(page.source).to_string(),
                page_cursor: page.cursor.clone(),
                page_number: page.page_number,
                fetched_at: page.fetched_at,
            },
        });
    }

    debug!(
        source = %page.source,
        page = page.page_number,
        records = records.len(),
        "Normalized page"
    );
    Ok(records)
}

fn key_part(value: Option<&FieldValue>) -> Option<String> {
    match value? {
        FieldValue::Text(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        FieldValue::Date(d) => Some(d.format("%Y-%m-%d").to_string()),
        FieldValue::Integer(i) => Some(i.to_string()),
        _ => None,
    }
}

/// Natural key values in hashing order, or `None` if any part is missing
pub fn natural_key_parts(
    source: SourceKind,
    payload: &BTreeMap<String, FieldValue>,
) -> Option<Vec<String>> {
    natural_key_fields(source)
        .map(|name| key_part(payload.get(name)))
        .collect()
}

/// Deterministic record id.
///
/// `sha256("<TAG>|v<version>|<key parts joined by |>")`, falling back to a
/// hash of the canonical payload when the natural key is incomplete.
pub fn record_id(source: SourceKind, payload: &BTreeMap<String, FieldValue>) -> String {
    match natural_key_parts(source, payload) {
        Some(parts) => sha256_hex(
            format!("{}|v{}|{}", source.id_tag(), SCHEMA_VERSION, parts.join("|")).as_bytes(),
        ),
        None => {
            let content = serde_json::to_string(payload).unwrap_or_default();
            sha256_hex(
                format!("{}|v{}|content|{}", source.id_tag(), SCHEMA_VERSION, content).as_bytes(),
            )
        },
    }
}

pub(crate) fn insert_text(
    payload: &mut BTreeMap<String, FieldValue>,
    name: &str,
    raw: Option<&str>,
) {
    if let Some(value) = raw.map(str::trim).filter(|v| !v.is_empty()) {
        payload.insert(name.to_string(), FieldValue::Text(value.to_string()));
    }
}

pub(crate) fn parse_date(raw: &str, formats: &[&str]) -> Option<NaiveDate> {
    let raw = raw.trim();
    formats.iter().find_map(|fmt| {
        if fmt.contains("%d") {
            NaiveDate::parse_from_str(raw, fmt).ok()
        } else {
            // month precision → first day of the month
            NaiveDate::parse_from_str(&format!("{}-01", raw), &format!("{}-%d", fmt)).ok()
        }
    })
}

/// Insert a parsed date, or the raw text if it does not parse.
/// Returns the parsed date.
pub(crate) fn insert_date(
    payload: &mut BTreeMap<String, FieldValue>,
    name: &str,
    raw: Option<&str>,
    formats: &[&str],
) -> Option<NaiveDate> {
    let raw = raw.map(str::trim).filter(|v| !v.is_empty())?;
    match parse_date(raw, formats) {
        Some(date) => {
            payload.insert(name.to_string(), FieldValue::Date(date));
            Some(date)
        },
        None => {
            payload.insert(name.to_string(), FieldValue::Text(raw.to_string()));
            None
        },
    }
}
