use crate::{
    all_panel_timelines, panel_timeline, panel_uuid_lookup, ObservationFetch, PanelData,
    PanelFilter, PanelLookup, PanelTimeline, TimelineConfig, TimelineError, TimelineResult,
};

/// Khóa nhận diện trạng thái của tầng tải.
#[derive(Debug, Clone, PartialEq)]
struct FetchKey {
    revision: u64,
    loaded: bool,
    error: Option<TimelineError>,
}

impl FetchKey {
    fn of(fetch: &ObservationFetch) -> Self {
        Self {
            revision: fetch.revision,
            loaded: fetch.loaded,
            error: fetch.error.clone(),
        }
    }
}

#[derive(Debug)]
struct Memo<K, V> {
    slot: Option<(K, V)>,
}

impl<K, V> Default for Memo<K, V> {
    fn default() -> Self {
        Self { slot: None }
    }
}

impl<K: PartialEq, V> Memo<K, V> {
    fn get_or_compute(&mut self, key: K, compute: impl FnOnce() -> V) -> &V {
        let fresh = matches!(&self.slot, Some((cached, _)) if *cached == key);
        if !fresh {
            self.slot = None;
        }
        let (_, value) = self.slot.get_or_insert_with(|| (key, compute()));
        value
    }
}

/// Bộ nhớ đệm cho ba góc nhìn timeline.
///
/// Mỗi góc nhìn chỉ tính lại khi `(revision, loaded, error)` của tầng tải hoặc
/// tham số của nó thay đổi.
#[derive(Debug, Default)]
pub struct TimelineCache {
    config: TimelineConfig,
    panel: Memo<(FetchKey, String), TimelineResult<PanelData>>,
    all_panels: Memo<(FetchKey, Option<PanelFilter>), TimelineResult<Vec<PanelTimeline>>>,
    lookup: Memo<FetchKey, TimelineResult<PanelLookup>>,
    recomputations: u64,
}

impl TimelineCache {
    pub fn new(config: TimelineConfig) -> Self {
        Self {
            config,
            ..Self::default()
        }
    }

    pub fn config(&self) -> &TimelineConfig {
        &self.config
    }

    pub fn panel(
        &mut self,
        fetch: &ObservationFetch,
        panel_uuid: &str,
    ) -> &TimelineResult<PanelData> {
        let config = &self.config;
        let recomputations = &mut self.recomputations;
        self.panel
            .get_or_compute((FetchKey::of(fetch), panel_uuid.to_string()), || {
                *recomputations += 1;
                tracing::debug!(panel_uuid, revision = fetch.revision, "recomputing panel timeline");
                panel_timeline(fetch, panel_uuid, config)
            })
    }

    pub fn all_panels(
        &mut self,
        fetch: &ObservationFetch,
        filter: Option<&PanelFilter>,
    ) -> &TimelineResult<Vec<PanelTimeline>> {
        let config = &self.config;
        let recomputations = &mut self.recomputations;
        self.all_panels
            .get_or_compute((FetchKey::of(fetch), filter.cloned()), || {
                *recomputations += 1;
                tracing::debug!(revision = fetch.revision, "recomputing all panel timelines");
                all_panel_timelines(fetch, filter, config)
            })
    }

    pub fn lookup(&mut self, fetch: &ObservationFetch) -> &TimelineResult<PanelLookup> {
        let recomputations = &mut self.recomputations;
        self.lookup.get_or_compute(FetchKey::of(fetch), || {
            *recomputations += 1;
            tracing::debug!(revision = fetch.revision, "recomputing panel lookup");
            panel_uuid_lookup(fetch)
        })
    }

    /// Số lần đã tính lại (dùng cho kiểm thử và log).
    pub fn recomputations(&self) -> u64 {
        self.recomputations
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ObservationRecord, Panel, PanelKind, PanelMap};

    fn fetch(revision: u64) -> ObservationFetch {
        let mut panels = PanelMap::new();
        panels.insert(
            "Albumin",
            Panel::new(
                "alb-1",
                PanelKind::Test,
                vec![ObservationRecord::new("a1", "Albumin", "2023-02-01T10:15")],
            ),
        );
        ObservationFetch::ready(panels, revision)
    }

    #[test]
    fn same_key_reuses_result() {
        let mut cache = TimelineCache::default();
        let upstream = fetch(1);

        let first = cache.panel(&upstream, "alb-1").clone();
        let second = cache.panel(&upstream, "alb-1").clone();

        assert_eq!(first, second);
        assert_eq!(cache.recomputations(), 1);
    }

    #[test]
    fn revision_or_parameter_change_recomputes() {
        let mut cache = TimelineCache::default();

        cache.panel(&fetch(1), "alb-1");
        cache.panel(&fetch(2), "alb-1");
        cache.panel(&fetch(2), "missing");
        assert_eq!(cache.recomputations(), 3);

        let filter = PanelFilter::new(["alb-1"]);
        cache.all_panels(&fetch(2), None);
        cache.all_panels(&fetch(2), Some(&filter));
        cache.all_panels(&fetch(2), Some(&filter));
        assert_eq!(cache.recomputations(), 5);
    }

    #[test]
    fn loading_then_loaded_recomputes() {
        let mut cache = TimelineCache::default();

        let pending = cache.lookup(&ObservationFetch::loading(1)).clone();
        assert!(!pending.loaded);

        let ready = cache.lookup(&fetch(1)).clone();
        assert!(ready.loaded);
        assert_eq!(ready.data.get("Albumin"), Some("alb-1"));
        assert_eq!(cache.recomputations(), 2);
    }
}
