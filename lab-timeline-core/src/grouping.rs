use std::collections::HashMap;

use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};

use crate::{ObservationRecord, PanelKind, TimelineError};

/// Một hàng của bảng: các kết quả của cùng một xét nghiệm theo từng mốc thời gian.
///
/// Ô trống là `None`, tách biệt hẳn với giá trị rỗng của dữ liệu.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Row {
    pub name: String,
    pub cells: Vec<Option<ObservationRecord>>,
}

impl Row {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            cells: Vec::new(),
        }
    }

    fn place(&mut self, index: usize, record: ObservationRecord) {
        if self.cells.len() <= index {
            self.cells.resize(index + 1, None);
        }
        self.cells[index] = Some(record);
    }

    fn pad_to(&mut self, width: usize) {
        if self.cells.len() < width {
            self.cells.resize(width, None);
        }
    }

    /// Kết quả tại cột `index`, `None` nếu ô trống hoặc vượt ngoài bảng.
    pub fn get(&self, index: usize) -> Option<&ObservationRecord> {
        self.cells.get(index).and_then(Option::as_ref)
    }

    /// Các chỉ số cột có dữ liệu.
    pub fn populated_indices(&self) -> impl Iterator<Item = usize> + '_ {
        self.cells
            .iter()
            .enumerate()
            .filter_map(|(index, cell)| cell.as_ref().map(|_| index))
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }
}

/// Tên xét nghiệm -> hàng, theo thứ tự xuất hiện đầu tiên.
///
/// Mọi hàng có cùng độ rộng nên cột `i` của mọi hàng cùng ứng với một mốc thời gian.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RowMap {
    rows: Vec<Row>,
    positions: HashMap<String, usize>,
    width: usize,
}

impl RowMap {
    fn place(&mut self, name: &str, index: usize, record: ObservationRecord) {
        let position = match self.positions.get(name) {
            Some(position) => *position,
            None => {
                self.rows.push(Row::new(name));
                self.positions.insert(name.to_string(), self.rows.len() - 1);
                self.rows.len() - 1
            }
        };
        self.rows[position].place(index, record);
    }

    fn pad_to(&mut self, width: usize) {
        self.width = width;
        for row in &mut self.rows {
            row.pad_to(width);
        }
    }

    pub fn row(&self, name: &str) -> Option<&Row> {
        self.positions.get(name).map(|position| &self.rows[*position])
    }

    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.rows.iter().map(|row| row.name.as_str())
    }

    /// Số cột (mốc thời gian) của bảng.
    pub fn width(&self) -> usize {
        self.width
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

impl Serialize for RowMap {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.rows.len()))?;
        for row in &self.rows {
            map.serialize_entry(&row.name, &row.cells)?;
        }
        map.end()
    }
}

/// Xoay danh sách entry của một panel thành bảng hàng theo tên xét nghiệm.
///
/// Với `LabSet`, mỗi kết quả con của entry thứ `i` nằm ở cột `i` của hàng mang
/// tên nó. Với `Test`, chính entry thứ `i` nằm ở cột `i`. Nếu cùng một ô nhận
/// hai giá trị, giá trị sau được giữ.
pub fn group_entries(
    entries: &[ObservationRecord],
    kind: &PanelKind,
) -> Result<RowMap, TimelineError> {
    let mut rows = RowMap::default();

    match kind {
        PanelKind::LabSet => {
            for (index, entry) in entries.iter().enumerate() {
                for member in &entry.members {
                    rows.place(&member.name, index, member.clone());
                }
            }
        }
        PanelKind::Test => {
            for (index, entry) in entries.iter().enumerate() {
                rows.place(&entry.name, index, entry.clone());
            }
        }
        PanelKind::Unsupported(other) => {
            return Err(TimelineError::UnsupportedPanelKind(other.clone()));
        }
    }

    rows.pad_to(entries.len());
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn leaf(name: &str, at: &str) -> ObservationRecord {
        ObservationRecord::new(format!("{name}-{at}"), name, at)
    }

    fn lab_set(at: &str, members: &[&str]) -> ObservationRecord {
        ObservationRecord::new(format!("set-{at}"), "Chemistry", at)
            .with_members(members.iter().map(|name| leaf(name, at)).collect())
    }

    #[test]
    fn lab_set_members_land_at_parent_index() {
        let entries = vec![
            lab_set("2023-01-01T08:00", &["Sodium"]),
            lab_set("2023-01-02T08:00", &["Glucose", "Sodium"]),
            lab_set("2023-01-03T08:00", &["Sodium"]),
            lab_set("2023-01-04T08:00", &["Potassium"]),
            lab_set("2023-01-05T08:00", &["Glucose"]),
        ];

        let rows = group_entries(&entries, &PanelKind::LabSet).expect("rows");
        let glucose = rows.row("Glucose").expect("glucose row");

        assert_eq!(glucose.populated_indices().collect::<Vec<_>>(), vec![1, 4]);
        assert!(glucose.get(0).is_none());
        assert!(glucose.get(2).is_none());
        assert!(glucose.get(3).is_none());
        assert_eq!(
            glucose.get(4).map(|r| r.uuid.as_str()),
            Some("Glucose-2023-01-05T08:00")
        );
    }

    #[test]
    fn rows_follow_first_appearance_and_share_width() {
        let entries = vec![
            lab_set("2023-01-01T08:00", &["Sodium", "Chloride"]),
            lab_set("2023-01-02T08:00", &["Glucose"]),
        ];

        let rows = group_entries(&entries, &PanelKind::LabSet).expect("rows");

        assert_eq!(
            rows.names().collect::<Vec<_>>(),
            vec!["Sodium", "Chloride", "Glucose"]
        );
        assert_eq!(rows.width(), 2);
        assert!(rows.rows().iter().all(|row| row.len() == 2));
    }

    #[test]
    fn test_panel_rows_match_distinct_names() {
        let entries = vec![
            leaf("Albumin", "2023-01-01T08:00"),
            leaf("Hemoglobin", "2023-01-02T08:00"),
            leaf("Albumin", "2023-01-03T08:00"),
        ];

        let rows = group_entries(&entries, &PanelKind::Test).expect("rows");

        assert_eq!(rows.len(), 2);
        let albumin = rows.row("Albumin").expect("albumin");
        assert_eq!(albumin.populated_indices().collect::<Vec<_>>(), vec![0, 2]);
        let hemoglobin = rows.row("Hemoglobin").expect("hemoglobin");
        assert_eq!(hemoglobin.populated_indices().collect::<Vec<_>>(), vec![1]);
    }

    #[test]
    fn later_value_wins_for_same_cell() {
        let first = leaf("Sodium", "2023-01-01T08:00").with_value("139");
        let second = leaf("Sodium", "2023-01-01T08:00").with_value("141");
        let entries = vec![ObservationRecord::new("set", "Chemistry", "2023-01-01T08:00")
            .with_members(vec![first, second])];

        let rows = group_entries(&entries, &PanelKind::LabSet).expect("rows");
        let cell = rows.row("Sodium").and_then(|row| row.get(0));

        assert_eq!(cell.and_then(|r| r.value.as_deref()), Some("141"));
    }

    #[test]
    fn grouping_twice_is_identical() {
        let entries = vec![
            lab_set("2023-01-01T08:00", &["Sodium", "Glucose"]),
            lab_set("2023-01-02T08:00", &["Potassium"]),
        ];

        let first = group_entries(&entries, &PanelKind::LabSet).expect("rows");
        let second = group_entries(&entries, &PanelKind::LabSet).expect("rows");

        assert_eq!(first, second);
        assert_eq!(
            serde_json::to_value(&first).expect("json"),
            serde_json::to_value(&second).expect("json")
        );
    }

    #[test]
    fn unsupported_kind_is_an_error() {
        let entries = vec![leaf("Albumin", "2023-01-01T08:00")];
        let err = group_entries(&entries, &PanelKind::from("Imaging")).unwrap_err();
        assert_eq!(err, TimelineError::UnsupportedPanelKind("Imaging".to_string()));
    }

    #[test]
    fn serializes_as_name_to_cells() {
        let entries = vec![
            leaf("Albumin", "2023-01-01T08:00"),
            leaf("Hemoglobin", "2023-01-02T08:00"),
        ];
        let rows = group_entries(&entries, &PanelKind::Test).expect("rows");
        let value = serde_json::to_value(&rows).expect("json");

        assert_eq!(value["Albumin"][1], serde_json::Value::Null);
        assert_eq!(value["Hemoglobin"][1]["name"], "Hemoglobin");
    }
}
