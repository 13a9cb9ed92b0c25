//! Bridge WASM <-> JavaScript cho bảng xét nghiệm, trung lập framework.

use lab_timeline_core::{
    all_panel_timelines, build_forms_dashboard, panel_timeline, panel_uuid_lookup, FormEncounter,
    FormsConfig, ObservationFetch, PanelFilter, RunGrouping, TimelineConfig, TimelineError,
};
use serde::Deserialize;
use serde_wasm_bindgen::{from_value, to_value};
use wasm_bindgen::prelude::*;

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct JsTimelineConfig {
    #[serde(default)]
    run_grouping: Option<RunGrouping>,
    #[serde(default)]
    display_offset_minutes: Option<i32>,
    #[serde(default)]
    panel_uuids: Option<Vec<String>>,
}

impl JsTimelineConfig {
    fn split(self) -> (TimelineConfig, Option<PanelFilter>) {
        let mut base = TimelineConfig::default();
        if let Some(grouping) = self.run_grouping {
            base.run_grouping = grouping;
        }
        if self.display_offset_minutes.is_some() {
            base.display_offset_minutes = self.display_offset_minutes;
        }
        (base, self.panel_uuids.map(PanelFilter::new))
    }
}

/// Bảng của mọi panel trong bundle. `config.panelUuids` lọc panel nếu có.
#[wasm_bindgen]
pub fn panel_timelines(input_bundle: JsValue, config: Option<JsValue>) -> Result<JsValue, JsValue> {
    init_panic_hook();
    let (cfg, filter) = read_config(config)?;
    let fetch = read_fetch(input_bundle, &cfg)?;

    let result = all_panel_timelines(&fetch, filter.as_ref(), &cfg);
    to_value(&result).map_err(|err| JsValue::from_str(&format!("Không serialize kết quả: {err}")))
}

/// Bảng của một panel theo uuid.
#[wasm_bindgen]
pub fn panel_table(
    input_bundle: JsValue,
    panel_uuid: &str,
    config: Option<JsValue>,
) -> Result<JsValue, JsValue> {
    init_panic_hook();
    let (cfg, _) = read_config(config)?;
    let fetch = read_fetch(input_bundle, &cfg)?;

    let result = panel_timeline(&fetch, panel_uuid, &cfg);
    to_value(&result).map_err(|err| JsValue::from_str(&format!("Không serialize kết quả: {err}")))
}

/// Tên panel -> uuid.
#[wasm_bindgen]
pub fn panel_lookup(input_bundle: JsValue) -> Result<JsValue, JsValue> {
    init_panic_hook();
    let fetch = read_fetch(input_bundle, &TimelineConfig::default())?;

    let result = panel_uuid_lookup(&fetch);
    to_value(&result).map_err(|err| JsValue::from_str(&format!("Không serialize kết quả: {err}")))
}

/// Danh sách biểu mẫu cho dashboard.
#[wasm_bindgen]
pub fn forms_dashboard(forms_config: JsValue, encounters: JsValue) -> Result<JsValue, JsValue> {
    init_panic_hook();
    let forms_config: FormsConfig = from_value(forms_config)
        .map_err(|err| JsValue::from_str(&format!("Không đọc được cấu hình biểu mẫu: {err}")))?;
    let encounters: Vec<FormEncounter> = from_value(encounters)
        .map_err(|err| JsValue::from_str(&format!("Không đọc được danh sách encounter: {err}")))?;

    let rows = build_forms_dashboard(&forms_config, &encounters)
        .map_err(|err| JsValue::from_str(&format_timeline_error(err)))?;
    to_value(&rows).map_err(|err| JsValue::from_str(&format!("Không serialize kết quả: {err}")))
}

fn init_panic_hook() {
    #[cfg(target_arch = "wasm32")]
    console_error_panic_hook::set_once();
}

fn read_fetch(input_bundle: JsValue, config: &TimelineConfig) -> Result<ObservationFetch, JsValue> {
    let bundle_value = from_value::<serde_json::Value>(input_bundle)
        .map_err(|err| JsValue::from_str(&format!("Không đọc được JSON bundle: {err}")))?;

    Ok(lab_timeline_fhir::fetch_from_bundle_value(
        &bundle_value,
        0,
        config,
    ))
}

fn read_config(config: Option<JsValue>) -> Result<(TimelineConfig, Option<PanelFilter>), JsValue> {
    match config {
        Some(js_cfg) => {
            let cfg: JsTimelineConfig = from_value(js_cfg)
                .map_err(|err| JsValue::from_str(&format!("Không đọc được config: {err}")))?;
            Ok(cfg.split())
        }
        None => Ok((TimelineConfig::default(), None)),
    }
}

fn format_timeline_error(err: TimelineError) -> String {
    format!("Timeline error: {err}")
}
