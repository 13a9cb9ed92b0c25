use std::collections::HashSet;

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use crate::time_axis::parse_timestamp;
use crate::TimelineError;

/// Cấu hình bảng biểu mẫu lâm sàng.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FormsConfig {
    /// Tên đối tượng cấu hình (ví dụ "clinical-forms-dashboard").
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub forms: Vec<FormEntry>,
}

/// Định nghĩa một biểu mẫu được hiển thị trên dashboard.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FormEntry {
    pub form_uuid: String,
    pub display: String,
    /// Ẩn biểu mẫu khỏi danh sách khi bệnh nhân đã hoàn thành ít nhất một lần.
    #[serde(default)]
    pub hide_when_completed: bool,
}

/// Một lần điền biểu mẫu của bệnh nhân.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FormEncounter {
    pub form_uuid: String,
    pub encounter_datetime: String,
}

/// Một dòng trên dashboard biểu mẫu.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FormRow {
    pub form_uuid: String,
    pub display: String,
    pub last_completed: Option<String>,
    pub completed_count: usize,
}

/// Dựng danh sách biểu mẫu theo thứ tự cấu hình kèm lần hoàn thành gần nhất.
pub fn build_forms_dashboard(
    config: &FormsConfig,
    encounters: &[FormEncounter],
) -> Result<Vec<FormRow>, TimelineError> {
    let mut parsed: Vec<(&FormEncounter, NaiveDateTime)> = Vec::with_capacity(encounters.len());
    for encounter in encounters {
        let at = parse_timestamp(&encounter.encounter_datetime, None).ok_or_else(|| {
            TimelineError::InvalidTimestamp(encounter.encounter_datetime.clone())
        })?;
        parsed.push((encounter, at));
    }

    let mut seen = HashSet::new();
    let mut rows = Vec::new();

    for entry in &config.forms {
        if !seen.insert(entry.form_uuid.as_str()) {
            tracing::debug!(form_uuid = %entry.form_uuid, "duplicate form entry ignored");
            continue;
        }

        let completed: Vec<&(&FormEncounter, NaiveDateTime)> = parsed
            .iter()
            .filter(|(encounter, _)| encounter.form_uuid == entry.form_uuid)
            .collect();

        if entry.hide_when_completed && !completed.is_empty() {
            continue;
        }

        let last_completed = completed
            .iter()
            .max_by_key(|(_, at)| *at)
            .map(|(encounter, _)| encounter.encounter_datetime.clone());

        rows.push(FormRow {
            form_uuid: entry.form_uuid.clone(),
            display: entry.display.clone(),
            last_completed,
            completed_count: completed.len(),
        });
    }

    Ok(rows)
}
