use std::fs;

use lab_timeline_core::{all_panel_timelines, ObservationFetch, TimelineConfig};
use lab_timeline_fhir::observations_from_bundle_str;
use serde_json::Value;

fn fixture_path(name: &str) -> String {
    format!("{}/tests/data/{name}", env!("CARGO_MANIFEST_DIR"))
}

fn load_bundle() -> String {
    fs::read_to_string(fixture_path("lab_panel_bundle.json")).expect("Không đọc được bundle mẫu")
}

#[test]
fn lab_bundle_matches_golden() {
    let panels = observations_from_bundle_str(&load_bundle(), &TimelineConfig::default()).expect("Không đọc được panel");

    let actual = serde_json::to_value(&panels).expect("Không serialize panel");
    let expected = fs::read_to_string(fixture_path("lab_panel_expected.json"))
        .expect("Không đọc được golden");
    let expected: Value = serde_json::from_str(&expected).expect("Golden không hợp lệ");

    assert_eq!(actual, expected);

    let names: Vec<&str> = panels.iter().map(|(name, _)| name).collect();
    assert_eq!(names, vec!["Complete Blood Count", "Albumin"]);
}

#[test]
fn lab_bundle_pivots_into_tables() {
    let panels = observations_from_bundle_str(&load_bundle(), &TimelineConfig::default()).expect("Không đọc được panel");
    let fetch = ObservationFetch::ready(panels, 1);

    let result = all_panel_timelines(&fetch, None, &TimelineConfig::default());
    assert!(result.loaded);
    assert_eq!(result.error, None);
    assert_eq!(result.data.len(), 2);

    let cbc = &result.data[0];
    assert_eq!(cbc.panel_name, "Complete Blood Count");
    assert_eq!(cbc.parsed_time.time_columns, vec!["06:00", "07:30"]);
    let days: Vec<&str> = cbc
        .parsed_time
        .day_columns
        .iter()
        .map(|c| c.day.as_str())
        .collect();
    assert_eq!(days, vec!["01 - Mar", "02 - Mar"]);

    let hemoglobin = cbc.row_data.row("Hemoglobin").expect("hemoglobin row");
    assert_eq!(hemoglobin.populated_indices().collect::<Vec<_>>(), vec![0, 1]);
    let leukocytes = cbc.row_data.row("Leukocytes").expect("leukocyte row");
    assert_eq!(leukocytes.populated_indices().collect::<Vec<_>>(), vec![1]);
    assert_eq!(
        leukocytes.get(1).and_then(|r| r.interpretation.as_deref()),
        Some("High")
    );
}
