//! FHIR JSON to lab panel mapping, the upstream source for the timeline views.

use std::collections::{hash_map::Entry, HashMap, HashSet};

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use lab_timeline_core::{
    display_time, ObservationFetch, ObservationRecord, Panel, PanelKind, PanelMap,
    TimelineConfig, TimelineError,
};
use serde_json::Value;

/// Read lab panels from a FHIR Bundle JSON string.
pub fn observations_from_bundle_str(
    bundle_json: &str,
    config: &TimelineConfig,
) -> Result<PanelMap, TimelineError> {
    let value: Value =
        serde_json::from_str(bundle_json).map_err(|err| TimelineError::Parse(err.to_string()))?;
    observations_from_bundle_value(&value, config)
}

/// Read lab panels from a `serde_json::Value` holding a FHIR Bundle.
///
/// Observations with `hasMember` become `LabSet` entries; observations that are
/// not a member of any set become `Test` panels of their own. Entries of each
/// panel are sorted by the wall-clock time the axis will display under
/// `config`, so mixed offsets still yield ascending labels.
pub fn observations_from_bundle_value(
    bundle: &Value,
    config: &TimelineConfig,
) -> Result<PanelMap, TimelineError> {
    let bundle_type = bundle
        .get("resourceType")
        .and_then(Value::as_str)
        .ok_or(TimelineError::MissingData)?;

    if bundle_type != "Bundle" {
        return Err(TimelineError::Parse(format!(
            "Expected resourceType Bundle, received {bundle_type}"
        )));
    }

    let entries = bundle
        .get("entry")
        .and_then(Value::as_array)
        .ok_or(TimelineError::MissingData)?;

    let mut observations = Vec::new();
    for entry in entries {
        let Some(resource) = entry.get("resource") else {
            continue;
        };
        if resource.get("resourceType").and_then(Value::as_str) != Some("Observation") {
            continue;
        }

        match ParsedObservation::parse(entry, resource, config) {
            Some(observation) => observations.push(observation),
            None => tracing::warn!(
                id = %resource_id(resource, "observation"),
                "observation without effective time skipped"
            ),
        }
    }

    let mut by_reference: HashMap<&str, &ParsedObservation> = HashMap::new();
    for observation in &observations {
        by_reference.insert(observation.record.uuid.as_str(), observation);
        if let Some(full_url) = observation.full_url.as_deref() {
            by_reference.insert(full_url, observation);
        }
    }

    let referenced: HashSet<&str> = observations
        .iter()
        .flat_map(|observation| observation.members.iter())
        .filter_map(|reference| by_reference.get(reference.as_str()))
        .map(|member| member.record.uuid.as_str())
        .collect();

    let mut collector = PanelCollector::default();
    for observation in &observations {
        if !observation.members.is_empty() {
            let members = observation
                .members
                .iter()
                .filter_map(|reference| match by_reference.get(reference.as_str()) {
                    Some(member) => Some(member.record.clone()),
                    None => {
                        tracing::warn!(%reference, "hasMember reference not found in bundle");
                        None
                    }
                })
                .collect();
            let record = observation.record.clone().with_members(members);
            collector.push(observation, PanelKind::LabSet, record);
        } else if !referenced.contains(observation.record.uuid.as_str()) {
            collector.push(observation, PanelKind::Test, observation.record.clone());
        }
    }

    Ok(collector.finalize())
}

/// Wrap a bundle as the upstream fetch state; a bundle that cannot be read
/// becomes a failed fetch carrying the error message.
pub fn fetch_from_bundle_str(
    bundle_json: &str,
    revision: u64,
    config: &TimelineConfig,
) -> ObservationFetch {
    into_fetch(observations_from_bundle_str(bundle_json, config), revision)
}

/// Same as [`fetch_from_bundle_str`] for an already parsed bundle.
pub fn fetch_from_bundle_value(
    bundle: &Value,
    revision: u64,
    config: &TimelineConfig,
) -> ObservationFetch {
    into_fetch(observations_from_bundle_value(bundle, config), revision)
}

fn into_fetch(panels: Result<PanelMap, TimelineError>, revision: u64) -> ObservationFetch {
    match panels {
        Ok(panels) => ObservationFetch::ready(panels, revision),
        Err(err) => ObservationFetch::failed(TimelineError::Upstream(err.to_string()), revision),
    }
}

struct ParsedObservation {
    record: ObservationRecord,
    full_url: Option<String>,
    code: Option<String>,
    members: Vec<String>,
    displayed_at: NaiveDateTime,
}

impl ParsedObservation {
    fn parse(entry: &Value, resource: &Value, config: &TimelineConfig) -> Option<Self> {
        let (effective, recorded_at) = extract_datetime(
            resource,
            &[
                "effectiveDateTime",
                "effectiveInstant",
                "effectivePeriod",
                "issued",
            ],
        )?;
        let displayed_at =
            display_time(&effective, config).unwrap_or_else(|_| recorded_at.naive_utc());

        let name = resource
            .get("code")
            .and_then(extract_codeable_text)
            .unwrap_or_else(|| "Observation".to_string());

        let record = ObservationRecord {
            uuid: resource_id(resource, "observation"),
            name,
            effective_date_time: effective,
            value: summarize_observation_value(resource),
            unit: resource
                .get("valueQuantity")
                .and_then(|quantity| quantity.get("unit"))
                .and_then(Value::as_str)
                .map(str::to_string),
            interpretation: resource
                .get("interpretation")
                .and_then(Value::as_array)
                .and_then(|arr| arr.first())
                .and_then(extract_codeable_text),
            members: Vec::new(),
        };

        let members = resource
            .get("hasMember")
            .and_then(Value::as_array)
            .map(|arr| {
                arr.iter()
                    .filter_map(|member| member.get("reference").and_then(Value::as_str))
                    .map(normalize_reference)
                    .collect()
            })
            .unwrap_or_default();

        Some(Self {
            record,
            full_url: entry
                .get("fullUrl")
                .and_then(Value::as_str)
                .map(str::to_string),
            code: resource.get("code").and_then(extract_primary_code),
            members,
            displayed_at,
        })
    }
}

struct PanelAccumulator {
    name: String,
    uuid: String,
    kind: PanelKind,
    entries: Vec<(NaiveDateTime, ObservationRecord)>,
}

#[derive(Default)]
struct PanelCollector {
    positions: HashMap<String, usize>,
    panels: Vec<PanelAccumulator>,
}

impl PanelCollector {
    fn push(&mut self, observation: &ParsedObservation, kind: PanelKind, record: ObservationRecord) {
        let name = observation.record.name.clone();
        match self.positions.entry(name) {
            Entry::Occupied(entry) => {
                let panel = &mut self.panels[*entry.get()];
                if panel.kind != kind {
                    tracing::warn!(
                        panel = %panel.name,
                        expected = panel.kind.as_str(),
                        received = kind.as_str(),
                        "observation kind differs from its panel, skipped"
                    );
                    return;
                }
                panel.entries.push((observation.displayed_at, record));
            }
            Entry::Vacant(entry) => {
                let name = entry.key().clone();
                entry.insert(self.panels.len());
                self.panels.push(PanelAccumulator {
                    uuid: observation.code.clone().unwrap_or_else(|| name.clone()),
                    name,
                    kind,
                    entries: vec![(observation.displayed_at, record)],
                });
            }
        }
    }

    fn finalize(self) -> PanelMap {
        self.panels
            .into_iter()
            .map(|mut acc| {
                acc.entries.sort_by(|a, b| a.0.cmp(&b.0));
                let entries = acc.entries.into_iter().map(|(_, record)| record).collect();
                (acc.name, Panel::new(acc.uuid, acc.kind, entries))
            })
            .collect()
    }
}

fn normalize_reference(reference: &str) -> String {
    reference
        .strip_prefix("Observation/")
        .unwrap_or(reference)
        .to_string()
}

fn extract_codeable_text(value: &Value) -> Option<String> {
    if let Some(text) = value.get("text").and_then(Value::as_str) {
        if !text.trim().is_empty() {
            return Some(text.trim().to_string());
        }
    }

    if let Some(codings) = value.get("coding").and_then(Value::as_array) {
        for coding in codings {
            if let Some(display) = coding.get("display").and_then(Value::as_str) {
                if !display.trim().is_empty() {
                    return Some(display.trim().to_string());
                }
            }
            if let Some(code) = coding.get("code").and_then(Value::as_str) {
                if !code.trim().is_empty() {
                    return Some(code.trim().to_string());
                }
            }
        }
    }

    None
}

fn extract_primary_code(value: &Value) -> Option<String> {
    value
        .get("coding")
        .and_then(Value::as_array)?
        .iter()
        .filter_map(|coding| coding.get("code").and_then(Value::as_str))
        .map(str::trim)
        .find(|code| !code.is_empty())
        .map(str::to_string)
}

fn resource_id(resource: &Value, fallback: &str) -> String {
    resource
        .get("id")
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| format!("{fallback}-unknown"))
}

fn summarize_observation_value(resource: &Value) -> Option<String> {
    if let Some(quantity) = resource.get("valueQuantity") {
        return quantity
            .get("value")
            .and_then(Value::as_f64)
            .map(format_numeric);
    }

    if let Some(value_string) = resource.get("valueString").and_then(Value::as_str) {
        if !value_string.is_empty() {
            return Some(value_string.to_string());
        }
    }

    resource
        .get("valueCodeableConcept")
        .and_then(extract_codeable_text)
}

fn format_numeric(value: f64) -> String {
    if (value.fract() - 0.0).abs() < f64::EPSILON {
        format!("{value:.0}")
    } else if (value * 10.0).fract().abs() < f64::EPSILON {
        format!("{value:.1}")
    } else {
        format!("{value}")
    }
}

/// First parseable timestamp among `fields`, with the text it was read from.
fn extract_datetime(resource: &Value, fields: &[&str]) -> Option<(String, DateTime<Utc>)> {
    for field in fields {
        let Some(value) = resource.get(*field) else {
            continue;
        };

        if let Some(text) = value.as_str() {
            if let Some(dt) = parse_datetime(text) {
                return Some((text.to_string(), dt));
            }
        }

        if let Some(obj) = value.as_object() {
            for bound in ["start", "end"] {
                if let Some(text) = obj.get(bound).and_then(Value::as_str) {
                    if let Some(dt) = parse_datetime(text) {
                        return Some((text.to_string(), dt));
                    }
                }
            }
        }
    }
    None
}

fn parse_datetime(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .ok()
        .or_else(|| {
            NaiveDate::parse_from_str(value, "%Y-%m-%d")
                .ok()
                .and_then(|date| date.and_hms_opt(0, 0, 0))
                .map(|naive| naive.and_utc())
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use lab_timeline_core::{all_panel_timelines, panel_timeline};
    use serde_json::json;

    fn defaults() -> TimelineConfig {
        TimelineConfig::default()
    }

    fn observation(id: &str, name: &str, at: &str, value: f64) -> Value {
        json!({
            "fullUrl": format!("urn:uuid:{id}"),
            "resource": {
                "resourceType": "Observation",
                "id": id,
                "code": {"coding": [{"code": format!("code-{name}"), "display": name}]},
                "effectiveDateTime": at,
                "valueQuantity": {"value": value, "unit": "mg/dL"}
            }
        })
    }

    #[test]
    fn rejects_non_bundle() {
        let err = observations_from_bundle_value(&json!({"resourceType": "Patient"}), &defaults())
            .unwrap_err();
        assert!(matches!(err, TimelineError::Parse(_)));

        let err = observations_from_bundle_value(&json!({"entry": []}), &defaults()).unwrap_err();
        assert_eq!(err, TimelineError::MissingData);
    }

    #[test]
    fn standalone_tests_are_sorted_by_time() {
        let bundle = json!({
            "resourceType": "Bundle",
            "entry": [
                observation("g2", "Glucose", "2023-01-06T08:00:00Z", 101.0),
                observation("g1", "Glucose", "2023-01-05T08:00:00Z", 98.5),
            ]
        });

        let panels = observations_from_bundle_value(&bundle, &defaults()).expect("panels");
        let glucose = panels.get("Glucose").expect("glucose panel");

        assert_eq!(glucose.kind, PanelKind::Test);
        assert_eq!(glucose.uuid, "code-Glucose");
        let ids: Vec<&str> = glucose.entries.iter().map(|e| e.uuid.as_str()).collect();
        assert_eq!(ids, vec!["g1", "g2"]);
        assert_eq!(glucose.entries[0].value.as_deref(), Some("98.5"));
    }

    #[test]
    fn members_resolve_by_full_url_and_are_not_panels() {
        let bundle = json!({
            "resourceType": "Bundle",
            "entry": [
                observation("na", "Sodium", "2023-01-05T08:00:00Z", 140.0),
                {
                    "resource": {
                        "resourceType": "Observation",
                        "id": "bmp",
                        "code": {"text": "Basic Metabolic Panel", "coding": [{"code": "51990-0"}]},
                        "effectiveDateTime": "2023-01-05T08:00:00Z",
                        "hasMember": [{"reference": "urn:uuid:na"}, {"reference": "Observation/gone"}]
                    }
                }
            ]
        });

        let panels = observations_from_bundle_value(&bundle, &defaults()).expect("panels");

        assert_eq!(panels.len(), 1);
        let panel = panels.get("Basic Metabolic Panel").expect("panel");
        assert_eq!(panel.kind, PanelKind::LabSet);
        assert_eq!(panel.uuid, "51990-0");
        assert_eq!(panel.entries[0].members.len(), 1);
        assert_eq!(panel.entries[0].members[0].name, "Sodium");
    }

    #[test]
    fn unreadable_bundle_becomes_failed_fetch() {
        let fetch = fetch_from_bundle_str("{not json", 4, &defaults());
        assert!(fetch.loaded);
        assert_eq!(fetch.revision, 4);
        assert!(matches!(fetch.error, Some(TimelineError::Upstream(_))));
    }

    #[test]
    fn mixed_offsets_sort_by_displayed_wall_clock() {
        let bundle = json!({
            "resourceType": "Bundle",
            "entry": [
                observation("late", "Glucose", "2023-03-02T00:10:00+07:00", 110.0),
                observation("early", "Glucose", "2023-03-01T23:30:00+00:00", 95.0),
            ]
        });

        let fetch = fetch_from_bundle_value(&bundle, 1, &defaults());
        let result = panel_timeline(&fetch, "code-Glucose", &defaults());
        let timeline = result.data.into_timeline().expect("timeline");
        let days: Vec<&str> = timeline
            .parsed_time
            .day_columns
            .iter()
            .map(|c| c.day.as_str())
            .collect();
        assert_eq!(days, vec!["01 - Mar", "02 - Mar"]);
        assert_eq!(timeline.parsed_time.time_columns, vec!["23:30", "00:10"]);

        let utc = TimelineConfig {
            display_offset_minutes: Some(0),
            ..TimelineConfig::default()
        };
        let fetch = fetch_from_bundle_value(&bundle, 1, &utc);
        let result = all_panel_timelines(&fetch, None, &utc);
        assert_eq!(result.data[0].parsed_time.time_columns, vec!["17:10", "23:30"]);
    }
}
