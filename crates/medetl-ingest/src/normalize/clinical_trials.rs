//! ClinicalTrials.gov v2 study → canonical schema v1

use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeSet;

use super::schema::ACTIVE_TRIAL_STATUSES;
use super::{insert_date, insert_text, MappedRecord};
use crate::models::FieldValue;

/// Full dates, or month precision which maps to the first of the month
const CT_DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%Y-%m"];

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Study {
    protocol_section: ProtocolSection,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProtocolSection {
    identification_module: Option<IdentificationModule>,
    status_module: Option<StatusModule>,
    description_module: Option<DescriptionModule>,
    conditions_module: Option<ConditionsModule>,
    design_module: Option<DesignModule>,
    arms_interventions_module: Option<ArmsInterventionsModule>,
    outcomes_module: Option<OutcomesModule>,
    sponsor_collaborators_module: Option<SponsorCollaboratorsModule>,
    eligibility_module: Option<EligibilityModule>,
    contacts_locations_module: Option<ContactsLocationsModule>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct IdentificationModule {
    nct_id: Option<String>,
    org_study_id_info: Option<OrgStudyIdInfo>,
    brief_title: Option<String>,
    official_title: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OrgStudyIdInfo {
    id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct DateStruct {
    date: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StatusModule {
    overall_status: Option<String>,
    start_date_struct: Option<DateStruct>,
    completion_date_struct: Option<DateStruct>,
    study_first_post_date_struct: Option<DateStruct>,
    last_update_post_date_struct: Option<DateStruct>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DescriptionModule {
    brief_summary: Option<String>,
    detailed_description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ConditionsModule {
    conditions: Option<Vec<String>>,
    keywords: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DesignModule {
    study_type: Option<String>,
    phases: Option<Vec<String>>,
    design_info: Option<DesignInfo>,
    enrollment_info: Option<EnrollmentInfo>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DesignInfo {
    allocation: Option<String>,
    intervention_model: Option<String>,
    primary_purpose: Option<String>,
    masking_info: Option<MaskingInfo>,
}

#[derive(Debug, Deserialize)]
struct MaskingInfo {
    masking: Option<String>,
}

#[derive(Debug, Deserialize)]
struct EnrollmentInfo {
    count: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct ArmsInterventionsModule {
    interventions: Option<Vec<Intervention>>,
}

#[derive(Debug, Deserialize)]
struct Intervention {
    #[serde(rename = "type")]
    kind: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OutcomesModule {
    primary_outcomes: Option<Vec<Outcome>>,
}

#[derive(Debug, Deserialize)]
struct Outcome {
    measure: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SponsorCollaboratorsModule {
    lead_sponsor: Option<Sponsor>,
}

#[derive(Debug, Deserialize)]
struct Sponsor {
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EligibilityModule {
    sex: Option<String>,
    healthy_volunteers: Option<bool>,
    minimum_age: Option<String>,
    maximum_age: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ContactsLocationsModule {
    locations: Option<Vec<Location>>,
}

#[derive(Debug, Deserialize)]
struct Location {
    country: Option<String>,
}

/// Primary outcome measures kept per study
const MAX_PRIMARY_OUTCOMES: usize = 3;

fn phase_rank(phase: &str) -> Option<f64> {
    match phase {
        "EARLY_PHASE1" => Some(0.5),
        "PHASE1" => Some(1.0),
        "PHASE2" => Some(2.0),
        "PHASE3" => Some(3.0),
        "PHASE4" => Some(4.0),
        _ => None,
    }
}

fn distinct_sorted(values: impl Iterator<Item = Option<String>>) -> Vec<String> {
    values
        .flatten()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

fn clean_list(values: Vec<String>) -> Vec<String> {
    values
        .into_iter()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .collect()
}

fn date_of(value: &Option<DateStruct>) -> Option<&str> {
    value.as_ref().and_then(|d| d.date.as_deref())
}

pub(crate) fn map_record(raw: &Value) -> Result<MappedRecord, String> {
    if !raw.get("protocolSection").map(Value::is_object).unwrap_or(false) {
        return Err("protocolSection missing or not an object".to_string());
    }
    let study: Study = serde_json::from_value(raw.clone()).map_err(|e| e.to_string())?;
    let section = study.protocol_section;

    let mut mapped = MappedRecord::default();
    let payload = &mut mapped.payload;

    if let Some(ident) = &section.identification_module {
        insert_text(payload, "nct_id", ident.nct_id.as_deref());
        insert_text(
            payload,
            "org_study_id",
            ident.org_study_id_info.as_ref().and_then(|o| o.id.as_deref()),
        );
        insert_text(payload, "brief_title", ident.brief_title.as_deref());
        insert_text(payload, "official_title", ident.official_title.as_deref());
    }

    if let Some(status) = &section.status_module {
        if let Some(overall) = status.overall_status.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
            payload.insert("overall_status".to_string(), FieldValue::Text(overall.to_string()));
            payload.insert(
                "is_active".to_string(),
                FieldValue::Bool(ACTIVE_TRIAL_STATUSES.contains(&overall)),
            );
            payload.insert("is_completed".to_string(), FieldValue::Bool(overall == "COMPLETED"));
        }
        insert_date(payload, "first_post_date", date_of(&status.study_first_post_date_struct), CT_DATE_FORMATS);
        mapped.event_date = insert_date(
            payload,
            "last_update_date",
            date_of(&status.last_update_post_date_struct),
            CT_DATE_FORMATS,
        );
        insert_date(payload, "start_date", date_of(&status.start_date_struct), CT_DATE_FORMATS);
        insert_date(payload, "completion_date", date_of(&status.completion_date_struct), CT_DATE_FORMATS);
    }

    if let Some(description) = &section.description_module {
        insert_text(payload, "brief_summary", description.brief_summary.as_deref());
        insert_text(payload, "detailed_description", description.detailed_description.as_deref());
    }

    if let Some(conditions) = section.conditions_module {
        if let Some(values) = conditions.conditions {
            payload.insert("conditions".to_string(), FieldValue::TextList(clean_list(values)));
        }
        if let Some(values) = conditions.keywords {
            payload.insert("keywords".to_string(), FieldValue::TextList(clean_list(values)));
        }
    }

    if let Some(design) = section.design_module {
        insert_text(payload, "study_type", design.study_type.as_deref());
        if let Some(phases) = design.phases {
            let phases = clean_list(phases);
            let highest = phases
                .iter()
                .filter_map(|p| phase_rank(p))
                .fold(None, |acc: Option<f64>, rank| Some(acc.map_or(rank, |a| a.max(rank))));
            if let Some(rank) = highest {
                payload.insert("phase_numeric".to_string(), FieldValue::Float(rank));
            }
            payload.insert("phases".to_string(), FieldValue::TextList(phases));
        }
        if let Some(info) = &design.design_info {
            insert_text(payload, "allocation", info.allocation.as_deref());
            insert_text(payload, "intervention_model", info.intervention_model.as_deref());
            insert_text(payload, "primary_purpose", info.primary_purpose.as_deref());
            insert_text(
                payload,
                "masking",
                info.masking_info.as_ref().and_then(|m| m.masking.as_deref()),
            );
        }
        if let Some(count) = design.enrollment_info.and_then(|e| e.count) {
            payload.insert("enrollment_count".to_string(), FieldValue::Integer(count));
        }
    }

    if let Some(interventions) = section.arms_interventions_module.and_then(|a| a.interventions) {
        payload.insert(
            "intervention_types".to_string(),
            FieldValue::TextList(distinct_sorted(interventions.into_iter().map(|i| i.kind))),
        );
    }

    if let Some(outcomes) = section.outcomes_module.and_then(|o| o.primary_outcomes) {
        let measures: Vec<String> = clean_list(outcomes.into_iter().filter_map(|o| o.measure).collect())
            .into_iter()
            .take(MAX_PRIMARY_OUTCOMES)
            .collect();
        payload.insert("primary_outcome_measures".to_string(), FieldValue::TextList(measures));
    }

    insert_text(
        payload,
        "lead_sponsor",
        section
            .sponsor_collaborators_module
            .as_ref()
            .and_then(|s| s.lead_sponsor.as_ref())
            .and_then(|l| l.name.as_deref()),
    );

    if let Some(eligibility) = section.eligibility_module {
        insert_text(payload, "sex", eligibility.sex.as_deref());
        insert_text(payload, "min_age", eligibility.minimum_age.as_deref());
        insert_text(payload, "max_age", eligibility.maximum_age.as_deref());
        if let Some(healthy) = eligibility.healthy_volunteers {
            payload.insert("healthy_volunteers".to_string(), FieldValue::Bool(healthy));
        }
    }

    if let Some(locations) = section.contacts_locations_module.and_then(|c| c.locations) {
        payload.insert(
            "location_countries".to_string(),
            FieldValue::TextList(distinct_sorted(locations.into_iter().map(|l| l.country))),
        );
    }

    Ok(mapped)
}
