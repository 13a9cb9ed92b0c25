use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime};
use serde::Serialize;

use crate::{RunGrouping, TimelineConfig, TimelineError};

/// Cột năm trên tiêu đề bảng, `size` là số cột giờ nằm dưới nó.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct YearColumn {
    pub year: String,
    pub size: usize,
}

/// Cột ngày ("DD - MMM") trên tiêu đề bảng.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct DayColumn {
    pub year: String,
    pub day: String,
    pub size: usize,
}

/// Tiêu đề ba tầng: năm, ngày, giờ.
#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TimeAxis {
    pub year_columns: Vec<YearColumn>,
    pub day_columns: Vec<DayColumn>,
    pub time_columns: Vec<String>,
    pub sorted_times: Vec<String>,
}

const NAIVE_FORMATS: [&str; 2] = ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%dT%H:%M"];

/// Dựng trục thời gian từ danh sách mốc đã sắp xếp.
///
/// Danh sách không được sắp xếp lại: cột năm/ngày được gom theo
/// `config.run_grouping`, cột giờ giữ một nhãn cho mỗi mốc.
pub fn parse_time_axis<S: AsRef<str>>(
    timestamps: &[S],
    config: &TimelineConfig,
) -> Result<TimeAxis, TimelineError> {
    let display_offset = display_offset(config)?;
    let mut years: Vec<(String, usize)> = Vec::new();
    let mut days: Vec<((String, String), usize)> = Vec::new();
    let mut time_columns = Vec::with_capacity(timestamps.len());
    let mut previous: Option<NaiveDateTime> = None;

    for raw in timestamps {
        let raw = raw.as_ref();
        let local = parse_timestamp(raw, display_offset)
            .ok_or_else(|| TimelineError::InvalidTimestamp(raw.to_string()))?;

        if previous.is_some_and(|prev| local < prev) {
            tracing::debug!(timestamp = raw, "time axis input is not sorted");
        }
        previous = Some(local);

        let year = local.format("%Y").to_string();
        let day = local.format("%d - %b").to_string();
        accumulate(&mut years, year.clone(), config.run_grouping);
        accumulate(&mut days, (year, day), config.run_grouping);
        time_columns.push(local.format("%H:%M").to_string());
    }

    Ok(TimeAxis {
        year_columns: years
            .into_iter()
            .map(|(year, size)| YearColumn { year, size })
            .collect(),
        day_columns: days
            .into_iter()
            .map(|((year, day), size)| DayColumn { year, day, size })
            .collect(),
        time_columns,
        sorted_times: timestamps.iter().map(|t| t.as_ref().to_string()).collect(),
    })
}

/// Giờ địa phương mà trục thời gian dùng để gắn nhãn cho `raw`.
///
/// Tầng tải dữ liệu sắp xếp entry theo giá trị này để nhãn luôn tăng dần.
pub fn display_time(raw: &str, config: &TimelineConfig) -> Result<NaiveDateTime, TimelineError> {
    parse_timestamp(raw, display_offset(config)?)
        .ok_or_else(|| TimelineError::InvalidTimestamp(raw.to_string()))
}

fn accumulate<K: PartialEq>(runs: &mut Vec<(K, usize)>, key: K, grouping: RunGrouping) {
    let existing = match grouping {
        RunGrouping::Adjacent => runs.last_mut().filter(|(current, _)| *current == key),
        RunGrouping::MergeEqual => runs.iter_mut().find(|(current, _)| *current == key),
    };

    match existing {
        Some((_, size)) => *size += 1,
        None => runs.push((key, 1)),
    }
}

fn display_offset(config: &TimelineConfig) -> Result<Option<FixedOffset>, TimelineError> {
    match config.display_offset_minutes {
        None => Ok(None),
        Some(minutes) => FixedOffset::east_opt(minutes * 60).map(Some).ok_or_else(|| {
            TimelineError::Parse(format!("display_offset_minutes ngoài phạm vi: {minutes}"))
        }),
    }
}

/// Đọc mốc thời gian ISO-8601 thành giờ địa phương để hiển thị.
///
/// Mốc có độ lệch múi giờ được hiển thị theo độ lệch của chính nó, trừ khi
/// `display` được đặt.
pub(crate) fn parse_timestamp(raw: &str, display: Option<FixedOffset>) -> Option<NaiveDateTime> {
    let raw = raw.trim();

    let with_offset = DateTime::parse_from_rfc3339(raw)
        .or_else(|_| DateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f%z"));
    if let Ok(dt) = with_offset {
        return Some(match display {
            Some(offset) => dt.with_timezone(&offset).naive_local(),
            None => dt.naive_local(),
        });
    }

    NAIVE_FORMATS
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(raw, format).ok())
        .or_else(|| {
            NaiveDate::parse_from_str(raw, "%Y-%m-%d")
                .ok()
                .and_then(|date| date.and_hms_opt(0, 0, 0))
        })
}
