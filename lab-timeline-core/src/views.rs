use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};

use crate::{
    group_entries, parse_time_axis, Panel, PanelMap, RowMap, TimeAxis, TimelineConfig,
    TimelineError,
};

/// Trạng thái dữ liệu do tầng tải kết quả xét nghiệm cung cấp cho một bệnh nhân.
///
/// `revision` tăng mỗi khi tầng tải thay dữ liệu, dùng làm khóa cho bộ nhớ đệm.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ObservationFetch {
    pub sorted_obs: PanelMap,
    pub loaded: bool,
    pub error: Option<TimelineError>,
    pub revision: u64,
}

impl ObservationFetch {
    /// Đang tải, chưa có dữ liệu.
    pub fn loading(revision: u64) -> Self {
        Self {
            revision,
            ..Self::default()
        }
    }

    pub fn ready(sorted_obs: PanelMap, revision: u64) -> Self {
        Self {
            sorted_obs,
            loaded: true,
            error: None,
            revision,
        }
    }

    pub fn failed(error: TimelineError, revision: u64) -> Self {
        Self {
            sorted_obs: PanelMap::default(),
            loaded: true,
            error: Some(error),
            revision,
        }
    }

    fn is_ready(&self) -> bool {
        self.loaded && self.error.is_none()
    }
}

/// Kết quả trả cho giao diện: `{ data, loaded, error? }`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TimelineResult<T> {
    pub data: T,
    pub loaded: bool,
    #[serde(
        skip_serializing_if = "Option::is_none",
        serialize_with = "serialize_error"
    )]
    pub error: Option<TimelineError>,
}

impl<T> TimelineResult<T> {
    fn ready(data: T) -> Self {
        Self {
            data,
            loaded: true,
            error: None,
        }
    }
}

impl<T: Default> TimelineResult<T> {
    /// Chuyển nguyên trạng thái `loaded`/`error` của tầng tải khi dữ liệu chưa sẵn sàng.
    fn pending(fetch: &ObservationFetch) -> Option<Self> {
        if fetch.is_ready() {
            return None;
        }
        Some(Self {
            data: T::default(),
            loaded: fetch.loaded,
            error: fetch.error.clone(),
        })
    }

    fn failed(loaded: bool, error: TimelineError) -> Self {
        Self {
            data: T::default(),
            loaded,
            error: Some(error),
        }
    }
}

fn serialize_error<S: Serializer>(
    error: &Option<TimelineError>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    match error {
        Some(err) => serializer.serialize_str(&err.to_string()),
        None => serializer.serialize_none(),
    }
}

/// Bảng của một panel: tiêu đề thời gian và các hàng xét nghiệm.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PanelTimeline {
    pub parsed_time: TimeAxis,
    pub row_data: RowMap,
    pub panel_name: String,
}

/// Dữ liệu của góc nhìn một panel.
///
/// Khi không có bảng, giao diện vẫn nhận `{ "parsedTime": {} }` nên đọc
/// `data.parsedTime` không bao giờ gặp `null`.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum PanelData {
    #[default]
    Empty,
    Table(PanelTimeline),
}

impl PanelData {
    pub fn timeline(&self) -> Option<&PanelTimeline> {
        match self {
            Self::Table(timeline) => Some(timeline),
            Self::Empty => None,
        }
    }

    pub fn into_timeline(self) -> Option<PanelTimeline> {
        match self {
            Self::Table(timeline) => Some(timeline),
            Self::Empty => None,
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, Self::Empty)
    }
}

#[derive(Serialize)]
struct EmptyAxis {}

impl Serialize for PanelData {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Table(timeline) => timeline.serialize(serializer),
            Self::Empty => {
                let mut map = serializer.serialize_map(Some(1))?;
                map.serialize_entry("parsedTime", &EmptyAxis {})?;
                map.end()
            }
        }
    }
}

/// Danh sách uuid panel cần hiển thị, đã loại trùng và giữ thứ tự đầu tiên.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct PanelFilter {
    uuids: Vec<String>,
}

impl PanelFilter {
    pub fn new<I, S>(uuids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut filter = Self::default();
        for uuid in uuids {
            let uuid = uuid.into();
            if !filter.uuids.contains(&uuid) {
                filter.uuids.push(uuid);
            }
        }
        filter
    }

    pub fn matches(&self, uuid: &str) -> bool {
        self.uuids.iter().any(|candidate| candidate == uuid)
    }

    pub fn uuids(&self) -> &[String] {
        &self.uuids
    }

    pub fn is_empty(&self) -> bool {
        self.uuids.is_empty()
    }
}

/// Tên panel -> uuid, giữ thứ tự của ánh xạ panel.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PanelLookup {
    entries: Vec<(String, String)>,
}

impl PanelLookup {
    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(panel_name, _)| panel_name == name)
            .map(|(_, uuid)| uuid.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries
            .iter()
            .map(|(name, uuid)| (name.as_str(), uuid.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Serialize for PanelLookup {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (name, uuid) in &self.entries {
            map.serialize_entry(name, uuid)?;
        }
        map.end()
    }
}

/// Bảng của panel có `uuid` trùng `panel_uuid`.
///
/// Không tìm thấy panel thì trả lỗi `PanelDataMissing`, `loaded` giữ nguyên.
pub fn panel_timeline(
    fetch: &ObservationFetch,
    panel_uuid: &str,
    config: &TimelineConfig,
) -> TimelineResult<PanelData> {
    if let Some(pending) = TimelineResult::pending(fetch) {
        return pending;
    }

    let Some((name, panel)) = fetch.sorted_obs.find_by_uuid(panel_uuid) else {
        tracing::debug!(panel_uuid, "no panel matches requested uuid");
        return TimelineResult::failed(fetch.loaded, TimelineError::PanelDataMissing);
    };

    match build_panel_timeline(name, panel, config) {
        Ok(timeline) => TimelineResult::ready(PanelData::Table(timeline)),
        Err(err) => TimelineResult::failed(fetch.loaded, err),
    }
}

/// Bảng của mọi panel theo thứ tự trong ánh xạ, lọc theo `filter` nếu có.
pub fn all_panel_timelines(
    fetch: &ObservationFetch,
    filter: Option<&PanelFilter>,
    config: &TimelineConfig,
) -> TimelineResult<Vec<PanelTimeline>> {
    if let Some(pending) = TimelineResult::pending(fetch) {
        return pending;
    }

    let built: Result<Vec<PanelTimeline>, TimelineError> = fetch
        .sorted_obs
        .iter()
        .filter(|(_, panel)| filter.map_or(true, |f| f.matches(&panel.uuid)))
        .map(|(name, panel)| build_panel_timeline(name, panel, config))
        .collect();

    match built {
        Ok(timelines) => TimelineResult::ready(timelines),
        Err(err) => TimelineResult::failed(fetch.loaded, err),
    }
}

/// Ánh xạ tên panel -> uuid, không dựng bảng.
pub fn panel_uuid_lookup(fetch: &ObservationFetch) -> TimelineResult<PanelLookup> {
    if let Some(pending) = TimelineResult::pending(fetch) {
        return pending;
    }

    TimelineResult::ready(PanelLookup {
        entries: fetch
            .sorted_obs
            .iter()
            .map(|(name, panel)| (name.to_string(), panel.uuid.clone()))
            .collect(),
    })
}

fn build_panel_timeline(
    name: &str,
    panel: &Panel,
    config: &TimelineConfig,
) -> Result<PanelTimeline, TimelineError> {
    let row_data = group_entries(&panel.entries, &panel.kind)?;
    let parsed_time = parse_time_axis(panel.timestamps().as_slice(), config)?;

    Ok(PanelTimeline {
        parsed_time,
        row_data,
        panel_name: name.to_string(),
    })
}
