//! openFDA drug adverse event → canonical schema v1

use serde::Deserialize;
use serde_json::Value;

use super::schema::AGE_GROUP_VALUES;
use super::{insert_date, insert_text, MappedRecord};
use crate::models::FieldValue;

const FDA_DATE_FORMATS: &[&str] = &["%Y%m%d"];

#[derive(Debug, Deserialize)]
struct DrugEvent {
    safetyreportid: Option<String>,
    receivedate: Option<String>,
    receiptdate: Option<String>,
    serious: Option<String>,
    seriousnessdeath: Option<String>,
    seriousnesshospitalization: Option<String>,
    occurcountry: Option<String>,
    companynumb: Option<String>,
    primarysource: Option<PrimarySource>,
    patient: Option<Patient>,
}

#[derive(Debug, Deserialize)]
struct PrimarySource {
    qualification: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Patient {
    patientonsetage: Option<String>,
    patientonsetageunit: Option<String>,
    patientsex: Option<String>,
    drug: Option<Vec<Drug>>,
    reaction: Option<Vec<Reaction>>,
}

#[derive(Debug, Deserialize)]
struct Drug {
    medicinalproduct: Option<String>,
    drugindication: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Reaction {
    reactionmeddrapt: Option<String>,
}

/// Years per unit for E2B age unit codes
fn age_unit_factor(code: &str) -> Option<f64> {
    match code.trim() {
        "800" => Some(10.0),
        "801" => Some(1.0),
        "802" => Some(1.0 / 12.0),
        "803" => Some(7.0 / 365.25),
        "804" => Some(1.0 / 365.25),
        "805" => Some(1.0 / 8766.0),
        _ => None,
    }
}

/// `"1"` → true; `"2"` (or `"0"`) → false; anything else stays raw text
fn flag(raw: &str) -> FieldValue {
    match raw.trim() {
        "1" => FieldValue::Bool(true),
        "2" | "0" => FieldValue::Bool(false),
        other => FieldValue::Text(other.to_string()),
    }
}

fn patient_sex(raw: &str) -> FieldValue {
    match raw.trim() {
        "0" => FieldValue::Text("unknown".to_string()),
        "1" => FieldValue::Text("male".to_string()),
        "2" => FieldValue::Text("female".to_string()),
        other => FieldValue::Text(other.to_string()),
    }
}

fn patient_age_years(age: &str, unit: Option<&str>) -> FieldValue {
    let parsed = age.trim().parse::<f64>().ok();
    let factor = unit.and_then(age_unit_factor);
    match (parsed, factor) {
        (Some(value), Some(factor)) if (value * factor).is_finite() => {
            FieldValue::Float((value * factor * 1000.0).round() / 1000.0)
        },
        // Without a known unit the number is meaningless; NaN and inf are not numbers either
        _ => FieldValue::Text(age.trim().to_string()),
    }
}

/// Inclusive upper bound in years of each band in [`AGE_GROUP_VALUES`]
const AGE_GROUP_BOUNDS: [f64; 5] = [18.0, 30.0, 50.0, 65.0, 100.0];

/// Band for a normalized age; none past the last band
fn age_group(years: f64) -> Option<&'static str> {
    if years < 0.0 {
        return None;
    }
    AGE_GROUP_BOUNDS
        .iter()
        .zip(AGE_GROUP_VALUES)
        .find(|(upper, _)| years <= **upper)
        .map(|(_, label)| *label)
}

fn non_empty_list(values: impl Iterator<Item = Option<String>>) -> Vec<String> {
    values
        .flatten()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .collect()
}

pub(crate) fn map_record(raw: &Value) -> Result<MappedRecord, String> {
    let event: DrugEvent = serde_json::from_value(raw.clone()).map_err(|e| e.to_string())?;
    let mut mapped = MappedRecord::default();
    let payload = &mut mapped.payload;

    insert_text(payload, "safety_report_id", event.safetyreportid.as_deref());
    let receive_date = insert_date(payload, "receive_date", event.receivedate.as_deref(), FDA_DATE_FORMATS);
    insert_date(payload, "receipt_date", event.receiptdate.as_deref(), FDA_DATE_FORMATS);

    let serious = event.serious.as_deref().map(flag);
    if let Some(value) = &serious {
        payload.insert("serious".to_string(), value.clone());
    }

    // Seriousness criteria are only present when set
    let death = event.seriousnessdeath.as_deref().map(flag).unwrap_or(FieldValue::Bool(false));
    let hospitalization = event
        .seriousnesshospitalization
        .as_deref()
        .map(flag)
        .unwrap_or(FieldValue::Bool(false));

    if let (Some(FieldValue::Bool(s)), FieldValue::Bool(d), FieldValue::Bool(h)) =
        (&serious, &death, &hospitalization)
    {
        let score = i64::from(*s) * 2 + i64::from(*d) * 10 + i64::from(*h) * 5;
        payload.insert("severity_score".to_string(), FieldValue::Integer(score));
    }
    payload.insert("seriousness_death".to_string(), death);
    payload.insert("seriousness_hospitalization".to_string(), hospitalization);

    insert_text(payload, "occur_country", event.occurcountry.as_deref());
    insert_text(payload, "company_number", event.companynumb.as_deref());
    insert_text(
        payload,
        "reporter_qualification",
        event.primarysource.as_ref().and_then(|p| p.qualification.as_deref()),
    );

    if let Some(patient) = event.patient {
        if let Some(age) = patient.patientonsetage.as_deref().filter(|a| !a.trim().is_empty()) {
            let years = patient_age_years(age, patient.patientonsetageunit.as_deref());
            if let Some(group) = years.as_number().and_then(age_group) {
                payload.insert("age_group".to_string(), FieldValue::Text(group.to_string()));
            }
            payload.insert("patient_age_years".to_string(), years);
        }
        if let Some(sex) = patient.patientsex.as_deref().filter(|s| !s.trim().is_empty()) {
            payload.insert("patient_sex".to_string(), patient_sex(sex));
        }
        if let Some(drugs) = patient.drug {
            let (products, indications): (Vec<_>, Vec<_>) = drugs
                .into_iter()
                .map(|d| (d.medicinalproduct, d.drugindication))
                .unzip();
            payload.insert(
                "drug_names".to_string(),
                FieldValue::TextList(non_empty_list(products.into_iter())),
            );
            let mut indications = non_empty_list(indications.into_iter());
            indications.sort();
            indications.dedup();
            if !indications.is_empty() {
                payload.insert("drug_indications".to_string(), FieldValue::TextList(indications));
            }
        }
        if let Some(reactions) = patient.reaction {
            let terms = non_empty_list(reactions.into_iter().map(|r| r.reactionmeddrapt));
            payload.insert("reactions".to_string(), FieldValue::TextList(terms));
        }
    }

    mapped.event_date = receive_date;
    Ok(mapped)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use serde_json::json;

    fn sample() -> Value {
        json!({
            "safetyreportid": "10003301",
            "receivedate": "20240101",
            "receiptdate": "20240103",
            "serious": "1",
            "seriousnesshospitalization": "1",
            "occurcountry": "US",
            "primarysource": { "qualification": "1" },
            "patient": {
                "patientonsetage": "18",
                "patientonsetageunit": "802",
                "patientsex": "2",
                "drug": [
                    { "medicinalproduct": " ASPIRIN ", "drugindication": "HEADACHE" },
                    { "medicinalproduct": "" },
                    { "medicinalproduct": "IBUPROFEN", "drugindication": "HEADACHE" },
                    { "medicinalproduct": "METFORMIN", "drugindication": " Type 2 Diabetes " }
                ],
                "reaction": [ { "reactionmeddrapt": "Nausea" } ]
            }
        })
    }

    #[test]
    fn test_maps_full_record() {
        let mapped = map_record(&sample()).unwrap();
        let p = &mapped.payload;

        assert_eq!(p["safety_report_id"], FieldValue::Text("10003301".into()));
        assert_eq!(
            p["receive_date"],
            FieldValue::Date(NaiveDate::from_ymd_opt(2024, 1, 1).unwrap())
        );
        assert_eq!(p["serious"], FieldValue::Bool(true));
        assert_eq!(p["seriousness_death"], FieldValue::Bool(false));
        assert_eq!(p["severity_score"], FieldValue::Integer(7));
        assert_eq!(p["patient_age_years"], FieldValue::Float(1.5));
        assert_eq!(p["patient_sex"], FieldValue::Text("female".into()));
        assert_eq!(
            p["drug_names"],
            FieldValue::TextList(vec!["ASPIRIN".into(), "IBUPROFEN".into(), "METFORMIN".into()])
        );
        assert_eq!(
            p["drug_indications"],
            FieldValue::TextList(vec!["HEADACHE".into(), "Type 2 Diabetes".into()])
        );
        assert_eq!(p["age_group"], FieldValue::Text("Pediatric".into()));
        assert_eq!(mapped.event_date, NaiveDate::from_ymd_opt(2024, 1, 1));
    }

    #[test]
    fn test_unparseable_values_kept_as_text() {
        let mut raw = sample();
        raw["receivedate"] = json!("2024-01-01");
        raw["serious"] = json!("Y");
        raw["patient"]["patientonsetageunit"] = json!("999");

        let mapped = map_record(&raw).unwrap();
        assert_eq!(mapped.payload["receive_date"], FieldValue::Text("2024-01-01".into()));
        assert_eq!(mapped.payload["serious"], FieldValue::Text("Y".into()));
        assert_eq!(mapped.payload["patient_age_years"], FieldValue::Text("18".into()));
        assert!(!mapped.payload.contains_key("severity_score"));
        assert!(!mapped.payload.contains_key("age_group"));
        assert_eq!(mapped.event_date, None);
    }

    #[test]
    fn test_age_group_bands() {
        assert_eq!(age_group(0.0), Some("Pediatric"));
        assert_eq!(age_group(18.0), Some("Pediatric"));
        assert_eq!(age_group(18.5), Some("Young Adult"));
        assert_eq!(age_group(50.0), Some("Adult"));
        assert_eq!(age_group(64.9), Some("Senior"));
        assert_eq!(age_group(100.0), Some("Elderly"));
        assert_eq!(age_group(104.0), None);
        assert_eq!(age_group(-1.0), None);
    }

    #[test]
    fn test_missing_drug_list_leaves_field_absent() {
        let mut raw = sample();
        raw["patient"].as_object_mut().unwrap().remove("drug");
        let mapped = map_record(&raw).unwrap();
        assert!(!mapped.payload.contains_key("drug_names"));
        assert!(!mapped.payload.contains_key("drug_indications"));
    }

    #[test]
    fn test_structural_mismatch_is_error() {
        let mut raw = sample();
        raw["patient"]["drug"] = json!("ASPIRIN");
        assert!(map_record(&raw).is_err());

        let mut raw = sample();
        raw["patient"] = json!([1, 2]);
        assert!(map_record(&raw).is_err());
    }

    #[test]
    fn test_age_units() {
        assert_eq!(patient_age_years("5", Some("800")), FieldValue::Float(50.0));
        assert_eq!(patient_age_years("730.5", Some("804")), FieldValue::Float(2.0));
        assert_eq!(patient_age_years("abc", Some("801")), FieldValue::Text("abc".into()));
    }

    #[test]
    fn test_non_finite_age_kept_as_text() {
        assert_eq!(patient_age_years("NaN", Some("801")), FieldValue::Text("NaN".into()));
        assert_eq!(patient_age_years("inf", Some("801")), FieldValue::Text("inf".into()));
        assert_eq!(patient_age_years("1e308", Some("800")), FieldValue::Text("1e308".into()));
    }
}
