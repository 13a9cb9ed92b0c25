use std::fmt;

use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::ObservationRecord;

/// Phân loại panel: bộ xét nghiệm lồng nhau hay xét nghiệm đơn.
///
/// Giá trị lạ được giữ nguyên trong `Unsupported` để báo lỗi rõ ràng khi
/// dựng bảng thay vì âm thầm trả về rỗng.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum PanelKind {
    LabSet,
    Test,
    Unsupported(String),
}

impl PanelKind {
    pub fn as_str(&self) -> &str {
        match self {
            PanelKind::LabSet => "LabSet",
            PanelKind::Test => "Test",
            PanelKind::Unsupported(other) => other,
        }
    }
}

impl From<String> for PanelKind {
    fn from(value: String) -> Self {
        match value.as_str() {
            "LabSet" => PanelKind::LabSet,
            "Test" => PanelKind::Test,
            _ => PanelKind::Unsupported(value),
        }
    }
}

impl From<&str> for PanelKind {
    fn from(value: &str) -> Self {
        PanelKind::from(value.to_string())
    }
}

impl From<PanelKind> for String {
    fn from(kind: PanelKind) -> Self {
        match kind {
            PanelKind::Unsupported(other) => other,
            known => known.as_str().to_string(),
        }
    }
}

/// Một panel xét nghiệm của bệnh nhân.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Panel {
    pub uuid: String,
    #[serde(rename = "type")]
    pub kind: PanelKind,
    #[serde(default)]
    pub entries: Vec<ObservationRecord>,
}

impl Panel {
    pub fn new(uuid: impl Into<String>, kind: PanelKind, entries: Vec<ObservationRecord>) -> Self {
        Self {
            uuid: uuid.into(),
            kind,
            entries,
        }
    }

    /// Mốc thời gian của từng entry, cùng thứ tự với `entries`.
    pub fn timestamps(&self) -> Vec<&str> {
        self.entries
            .iter()
            .map(|entry| entry.effective_date_time.as_str())
            .collect()
    }
}

/// Ánh xạ tên panel -> panel, giữ nguyên thứ tự chèn.
///
/// Khi đọc từ JSON object, thứ tự khóa trong tài liệu được giữ lại.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PanelMap {
    panels: Vec<(String, Panel)>,
}

impl PanelMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Thêm hoặc thay thế panel theo tên. Panel bị thay giữ nguyên vị trí.
    pub fn insert(&mut self, name: impl Into<String>, panel: Panel) -> Option<Panel> {
        let name = name.into();
        match self.panels.iter_mut().find(|(existing, _)| *existing == name) {
            Some((_, slot)) => Some(std::mem::replace(slot, panel)),
            None => {
                self.panels.push((name, panel));
                None
            }
        }
    }

    pub fn get(&self, name: &str) -> Option<&Panel> {
        self.panels
            .iter()
            .find(|(existing, _)| existing == name)
            .map(|(_, panel)| panel)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut Panel> {
        self.panels
            .iter_mut()
            .find(|(existing, _)| existing == name)
            .map(|(_, panel)| panel)
    }

    /// Tìm panel đầu tiên có `uuid` trùng khớp, trả về kèm tên.
    pub fn find_by_uuid(&self, uuid: &str) -> Option<(&str, &Panel)> {
        self.iter().find(|(_, panel)| panel.uuid == uuid)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Panel)> {
        self.panels
            .iter()
            .map(|(name, panel)| (name.as_str(), panel))
    }

    pub fn len(&self) -> usize {
        self.panels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.panels.is_empty()
    }
}

impl FromIterator<(String, Panel)> for PanelMap {
    fn from_iter<I: IntoIterator<Item = (String, Panel)>>(iter: I) -> Self {
        let mut map = PanelMap::new();
        for (name, panel) in iter {
            map.insert(name, panel);
        }
        map
    }
}

impl Serialize for PanelMap {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.panels.len()))?;
        for (name, panel) in &self.panels {
            map.serialize_entry(name, panel)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for PanelMap {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct PanelMapVisitor;

        impl<'de> Visitor<'de> for PanelMapVisitor {
            type Value = PanelMap;

            fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
                formatter.write_str("a map of panel name to panel")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<PanelMap, A::Error> {
                let mut map = PanelMap::new();
                while let Some((name, panel)) = access.next_entry::<String, Panel>()? {
                    map.insert(name, panel);
                }
                Ok(map)
            }
        }

        deserializer.deserialize_map(PanelMapVisitor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_kind_is_preserved() {
        let kind: PanelKind = serde_json::from_str("\"Radiology\"").expect("kind");
        assert_eq!(kind, PanelKind::Unsupported("Radiology".to_string()));
        assert_eq!(serde_json::to_string(&kind).expect("ser"), "\"Radiology\"");
    }

    #[test]
    fn panel_map_keeps_document_order() {
        let json = r#"{
            "Hematology": {"uuid": "h-1", "type": "LabSet", "entries": []},
            "Albumin": {"uuid": "a-1", "type": "Test", "entries": []},
            "Chemistry": {"uuid": "c-1", "type": "LabSet", "entries": []}
        }"#;
        let map: PanelMap = serde_json::from_str(json).expect("panel map");
        let names: Vec<&str> = map.iter().map(|(name, _)| name).collect();
        assert_eq!(names, vec!["Hematology", "Albumin", "Chemistry"]);
        assert_eq!(map.get("Albumin").map(|p| &p.kind), Some(&PanelKind::Test));
        assert_eq!(map.find_by_uuid("c-1").map(|(name, _)| name), Some("Chemistry"));
    }

    #[test]
    fn insert_replaces_in_place() {
        let mut map = PanelMap::new();
        map.insert("A", Panel::new("1", PanelKind::Test, Vec::new()));
        map.insert("B", Panel::new("2", PanelKind::Test, Vec::new()));
        let previous = map.insert("A", Panel::new("3", PanelKind::LabSet, Vec::new()));

        assert_eq!(previous.map(|p| p.uuid), Some("1".to_string()));
        let uuids: Vec<&str> = map.iter().map(|(_, p)| p.uuid.as_str()).collect();
        assert_eq!(uuids, vec!["3", "2"]);
    }
}
