//! Logic lõi dựng bảng kết quả xét nghiệm theo trục thời gian.

use serde::{Deserialize, Serialize};

mod cache;
mod forms;
mod grouping;
mod panels;
mod time_axis;
mod views;

pub use cache::TimelineCache;
pub use forms::{build_forms_dashboard, FormEncounter, FormEntry, FormRow, FormsConfig};
pub use grouping::{group_entries, Row, RowMap};
pub use panels::{Panel, PanelKind, PanelMap};
pub use time_axis::{display_time, parse_time_axis, DayColumn, TimeAxis, YearColumn};
pub use views::{
    all_panel_timelines, panel_timeline, panel_uuid_lookup, ObservationFetch, PanelData,
    PanelFilter, PanelLookup, PanelTimeline, TimelineResult,
};

/// Cấu hình cách dựng trục thời gian.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TimelineConfig {
    /// Quy tắc gộp cột năm/ngày.
    pub run_grouping: RunGrouping,
    /// Độ lệch múi giờ (phút) dùng để hiển thị nhãn giờ. `None` giữ nguyên
    /// độ lệch có sẵn trong từng mốc thời gian.
    pub display_offset_minutes: Option<i32>,
}

impl Default for TimelineConfig {
    fn default() -> Self {
        Self {
            run_grouping: RunGrouping::Adjacent,
            display_offset_minutes: None,
        }
    }
}

/// Cách gom các mốc thời gian thành cột có `size`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum RunGrouping {
    /// Mở cột mới mỗi khi khóa khác với mốc liền trước.
    #[default]
    Adjacent,
    /// Tìm cột có cùng khóa trong toàn bộ danh sách, kể cả không liền kề.
    MergeEqual,
}

/// Một kết quả đo lâm sàng (hoặc một bộ xét nghiệm chứa các kết quả con).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct ObservationRecord {
    pub uuid: String,
    pub name: String,
    pub effective_date_time: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interpretation: Option<String>,
    /// Các kết quả con khi bản ghi đại diện cho một bộ xét nghiệm.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub members: Vec<ObservationRecord>,
}

impl ObservationRecord {
    /// Tạo bản ghi lá với tên và mốc thời gian.
    pub fn new(
        uuid: impl Into<String>,
        name: impl Into<String>,
        effective_date_time: impl Into<String>,
    ) -> Self {
        Self {
            uuid: uuid.into(),
            name: name.into(),
            effective_date_time: effective_date_time.into(),
            ..Self::default()
        }
    }

    pub fn with_value(mut self, value: impl Into<String>) -> Self {
        self.value = Some(value.into());
        self
    }

    pub fn with_members(mut self, members: Vec<ObservationRecord>) -> Self {
        self.members = members;
        self
    }
}

/// Lỗi chung khi dựng bảng xét nghiệm.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TimelineError {
    #[error("Dữ liệu đầu vào thiếu thông tin tối thiểu")]
    MissingData,
    #[error("Không đọc được dữ liệu: {0}")]
    Parse(String),
    #[error("panel data missing")]
    PanelDataMissing,
    #[error("Loại panel không được hỗ trợ: {0}")]
    UnsupportedPanelKind(String),
    #[error("Mốc thời gian không hợp lệ: {0}")]
    InvalidTimestamp(String),
    /// Lỗi do tầng tải dữ liệu báo về, giữ nguyên thông điệp.
    #[error("{0}")]
    Upstream(String),
}
