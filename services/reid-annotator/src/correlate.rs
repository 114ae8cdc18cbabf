//! Correlation step: matches reid results to detections, keeps the registration
//! store current and produces one overlay per detection.

use crate::announce::IdentityAnnouncement;
use crate::frame::{image_width, FrameBundle, SourceFrame};
use crate::naming::NamingIngestor;
use crate::registry::RegistrationStore;
use crate::wire::{BoundingBox, ReidRecord};
use clap::ValueEnum;
use opentelemetry::KeyValue;
use overlay_core::ANNOTATOR_METRICS;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt::Write;
use tracing::{debug, info, instrument};

/// Which facts the label carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DisplayMode {
    Age,
    #[value(name = "dwell_time")]
    DwellTime,
    Both,
}

impl DisplayMode {
    pub fn shows_age(self) -> bool { matches!(self, DisplayMode::Age | DisplayMode::Both) }
    pub fn shows_dwell_time(self) -> bool { matches!(self, DisplayMode::DwellTime | DisplayMode::Both) }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverlayColor {
    /// Head detected, no identity yet.
    Head,
    /// Face detected, no identity yet.
    Face,
    /// Identity resolved through a reid match.
    Matched,
}

impl OverlayColor {
    pub const fn bgr(self) -> [u8; 3] {
        match self {
            OverlayColor::Head => [128, 128, 128],
            OverlayColor::Face => [255, 95, 10],
            OverlayColor::Matched => [10, 95, 255],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Overlay {
    pub label: String,
    pub color: OverlayColor,
    /// Box already multiplied by `scale`.
    pub bounding_box: BoundingBox,
    /// Text scale for the compositor.
    pub scale: f64,
}

#[derive(Debug, Clone)]
pub struct AnnotatedFrame {
    pub source: String,
    pub time: i64,
    pub image: Vec<u8>,
    pub overlays: Vec<Overlay>,
}

#[derive(Debug, Default)]
pub struct FrameOutcome {
    pub frames: Vec<AnnotatedFrame>,
    pub announcements: Vec<IdentityAnnouncement>,
}

/// Merges the reid records of all configured reid sources into one map keyed by
/// detection key. Sources are visited in configuration order, so for any key the
/// records of earlier sources come first. Reid sources are removed from `sources`.
pub fn extract_reids(sources: &mut BTreeMap<String, SourceFrame>, reid_sources: &[String]) -> HashMap<String, Vec<ReidRecord>> {
    let mut merged: HashMap<String, Vec<ReidRecord>> = HashMap::new();
    for id in reid_sources {
        let Some(frame) = sources.remove(id) else { continue };
        for (key, records) in frame.reids {
            merged.entry(key).or_default().extend(records);
        }
    }
    merged
}

pub struct Correlator {
    mode: DisplayMode,
    reid_sources: Vec<String>,
    store: RegistrationStore,
    scales: HashMap<String, f64>,
}

impl Correlator {
    pub fn new(mode: DisplayMode, reid_sources: Vec<String>) -> Self {
        Self { mode, reid_sources, store: RegistrationStore::new(), scales: HashMap::new() }
    }

    pub fn store(&self) -> &RegistrationStore { &self.store }

    pub fn scale(&self, source: &str) -> f64 { self.scales.get(source).copied().unwrap_or(1.0) }

    /// Processes every camera source of one frame timestamp.
    #[instrument(skip_all, fields(time = bundle.time))]
    pub async fn process(&mut self, bundle: FrameBundle, naming: &mut NamingIngestor) -> FrameOutcome {
        let time = bundle.time;
        let mut sources = bundle.sources;
        let reids = extract_reids(&mut sources, &self.reid_sources);
        let mut outcome = FrameOutcome::default();

        for (source, frame) in sources {
            let Some(image) = frame.image else {
                debug!(%source, "no image for frame, skipped");
                continue;
            };
            if let Some(info) = frame.frame_info {
                self.update_scale(&source, &image, info.columns);
            }
            let scale = self.scale(&source);

            let mut overlays = Vec::with_capacity(frame.detections.len());
            for det in &frame.detections {
                let Some(bbox) = det.bounding_box else { continue };

                let mut color = if det.face { OverlayColor::Face } else { OverlayColor::Head };
                let mut label = match det.age {
                    Some(age) if self.mode.shows_age() => format!("Age: {age}"),
                    _ => String::new(),
                };

                let candidate = reids.get(&det.key)
                    .and_then(|records| records.iter().find_map(|r| r.first_candidate()));
                if let Some(m) = candidate {
                    let person_key = &m.id.first_detection_key;
                    let (reg, created) = self.store.get_or_create(person_key);
                    if let Some(age) = det.age { reg.add_age(age); }
                    if created {
                        info!(%person_key, id = reg.id(), "identity registered");
                        ANNOTATOR_METRICS.identities_registered_total.add(1, &[]);
                        outcome.announcements.push(IdentityAnnouncement { person_key: person_key.clone(), id: reg.id(), time });
                    } else {
                        let mut text = reg.display_name();
                        if let (true, Some(_), Some(avg)) = (self.mode.shows_age(), det.age, reg.age()) {
                            let _ = write!(text, "; Age: {avg}");
                        }
                        if self.mode.shows_dwell_time() {
                            let _ = write!(text, "; Dwell time: {}ms", dwell_time(time, m.id.first_detection_time));
                        }
                        label = text;
                        color = OverlayColor::Matched;
                    }
                }

                naming.poll(&mut self.store).await;

                overlays.push(Overlay { label, color, bounding_box: bbox.scaled(scale), scale });
            }

            ANNOTATOR_METRICS.frames_annotated_total.add(1, &[KeyValue::new("camera", source.clone())]);
            overlay_core::record_frame(time, self.store.len());
            outcome.frames.push(AnnotatedFrame { source, time, image, overlays });
        }
        outcome
    }

    fn update_scale(&mut self, source: &str, image: &[u8], reference_columns: u32) {
        if reference_columns == 0 { return; }
        match image_width(image) {
            Some(width) => {
                let scale = f64::from(width) / f64::from(reference_columns);
                self.scales.insert(source.to_string(), scale);
            }
            None => debug!(%source, "image width unreadable, keeping previous scale"),
        }
    }
}

/// Milliseconds since the person was first detected. Not clamped: a first detection
/// stamped after the current frame yields a negative value. Saturates at the `i64` range.
pub fn dwell_time(frame_time: i64, first_detection_time: i64) -> i64 { frame_time.saturating_sub(first_detection_time) }

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{encoded_png, Detection};
    use crate::naming::NamingUpdate;
    use crate::wire::{MatchId, ReidEvent, ReidMatch, FrameInfoRecord};
    use std::time::Duration;
    use tokio::sync::mpsc;

    fn bbox() -> BoundingBox { BoundingBox { x: 100, y: 50, width: 40, height: 60 } }

    fn det(key: &str, age: Option<u32>) -> Detection {
        Detection { key: key.into(), bounding_box: Some(bbox()), face: false, age }
    }

    fn reid(person_key: &str, first_time: i64) -> ReidRecord {
        ReidRecord {
            kind: "REID_EVENT".into(),
            reid_event: Some(ReidEvent { match_list: vec![ReidMatch { id: MatchId { first_detection_key: person_key.into(), first_detection_time: first_time }, score: 0.9 }] }),
        }
    }

    fn camera(dets: Vec<Detection>) -> SourceFrame {
        SourceFrame { image: Some(encoded_png(32, 16)), detections: dets, ..Default::default() }
    }

    fn reid_source(entries: Vec<(&str, ReidRecord)>) -> SourceFrame {
        let mut frame = SourceFrame::default();
        for (key, r) in entries { frame.reids.entry(key.to_string()).or_default().push(r); }
        frame
    }

    fn bundle(time: i64, sources: Vec<(&str, SourceFrame)>) -> FrameBundle {
        FrameBundle { time, sources: sources.into_iter().map(|(k, v)| (k.to_string(), v)).collect() }
    }

    fn naming() -> (mpsc::Sender<Vec<u8>>, NamingIngestor) {
        let (tx, rx) = mpsc::channel(8);
        (tx, NamingIngestor::new(rx, Duration::from_millis(1)))
    }

    fn correlator(mode: DisplayMode) -> Correlator { Correlator::new(mode, vec!["99".into(), "100".into()]) }

    #[tokio::test]
    async fn first_sighting_registers_and_announces() {
        let (_tx, mut names) = naming();
        let mut c = correlator(DisplayMode::Both);
        let b = bundle(1500, vec![("0", camera(vec![det("1500_0", Some(30))])), ("99", reid_source(vec![("1500_0", reid("k1", 1000))]))]);
        let out = c.process(b, &mut names).await;
        assert_eq!(out.announcements, vec![IdentityAnnouncement { person_key: "k1".into(), id: 1, time: 1500 }]);
        let reg = c.store().lookup("k1").unwrap();
        assert_eq!(reg.age(), Some(30));
        let ov = &out.frames[0].overlays[0];
        assert_eq!(ov.label, "Age: 30");
        assert_eq!(ov.color, OverlayColor::Head);
    }

    #[tokio::test]
    async fn dwell_time_label_for_known_person() {
        let (_tx, mut names) = naming();
        let mut c = correlator(DisplayMode::DwellTime);
        c.process(bundle(1200, vec![("0", camera(vec![det("1200_0", None)])), ("99", reid_source(vec![("1200_0", reid("k1", 1000))]))]), &mut names).await;
        let out = c.process(bundle(1500, vec![("0", camera(vec![det("1500_0", Some(44))])), ("99", reid_source(vec![("1500_0", reid("k1", 1000))]))]), &mut names).await;
        assert!(out.announcements.is_empty());
        let ov = &out.frames[0].overlays[0];
        assert_eq!(ov.label, "ID: 1; Dwell time: 500ms");
        assert_eq!(ov.color, OverlayColor::Matched);
    }

    #[tokio::test]
    async fn both_mode_uses_name_and_running_age() {
        let (tx, mut names) = naming();
        let mut c = correlator(DisplayMode::Both);
        c.process(bundle(1000, vec![("0", camera(vec![det("1000_0", Some(30))])), ("99", reid_source(vec![("1000_0", reid("k1", 1000))]))]), &mut names).await;
        tx.send(serde_json::to_vec(&NamingUpdate { person_key: "k1".into(), name: "Ada".into() }).unwrap()).await.unwrap();
        // naming is polled after the reid step, so the name shows from the next detection on
        let first = c.process(bundle(1100, vec![("0", camera(vec![det("1100_0", Some(40))])), ("99", reid_source(vec![("1100_0", reid("k1", 1000))]))]), &mut names).await;
        assert_eq!(first.frames[0].overlays[0].label, "ID: 1; Age: 35; Dwell time: 100ms");
        let second = c.process(bundle(1200, vec![("0", camera(vec![det("1200_0", None)])), ("99", reid_source(vec![("1200_0", reid("k1", 1000))]))]), &mut names).await;
        assert_eq!(second.frames[0].overlays[0].label, "Ada; Dwell time: 200ms");
        assert_eq!(c.store().lookup("k1").unwrap().sample_count(), 2);
    }

    #[tokio::test]
    async fn age_mode_without_match_shows_raw_age_only() {
        let (_tx, mut names) = naming();
        let mut c = correlator(DisplayMode::Age);
        let out = c.process(bundle(10, vec![("0", camera(vec![det("10_0", Some(27)), det("10_1", None)]))]), &mut names).await;
        let labels: Vec<_> = out.frames[0].overlays.iter().map(|o| o.label.as_str()).collect();
        assert_eq!(labels, ["Age: 27", ""]);
        let dwell = correlator(DisplayMode::DwellTime).process(bundle(10, vec![("0", camera(vec![det("10_0", Some(27))]))]), &mut names).await;
        assert_eq!(dwell.frames[0].overlays[0].label, "");
    }

    #[tokio::test]
    async fn first_reid_source_wins_for_shared_detection_key() {
        let (_tx, mut names) = naming();
        let mut c = correlator(DisplayMode::DwellTime);
        let b = bundle(2000, vec![
            ("0", camera(vec![det("2000_0", None)])),
            ("99", reid_source(vec![("2000_0", reid("from-99", 1000))])),
            ("100", reid_source(vec![("2000_0", reid("from-100", 1500))])),
        ]);
        let out = c.process(b, &mut names).await;
        assert_eq!(out.announcements.len(), 1);
        assert_eq!(out.announcements[0].person_key, "from-99");
        assert!(c.store().lookup("from-100").is_none());
        // reid sources never render as cameras
        assert_eq!(out.frames.len(), 1);
        assert_eq!(out.frames[0].source, "0");
    }

    #[tokio::test]
    async fn events_without_match_are_skipped() {
        let (_tx, mut names) = naming();
        let mut c = correlator(DisplayMode::DwellTime);
        let no_match = ReidRecord { kind: "REID_EVENT".into(), reid_event: Some(ReidEvent::default()) };
        let b = bundle(3000, vec![
            ("0", camera(vec![det("3000_0", None)])),
            ("99", reid_source(vec![("3000_0", ReidRecord::default()), ("3000_0", no_match), ("3000_0", reid("k2", 2500))])),
        ]);
        let out = c.process(b, &mut names).await;
        assert_eq!(out.announcements[0].person_key, "k2");
    }

    #[tokio::test]
    async fn detections_without_box_are_skipped() {
        let (tx, mut names) = naming();
        let mut c = correlator(DisplayMode::Both);
        tx.send(serde_json::to_vec(&NamingUpdate { person_key: "x".into(), name: "X".into() }).unwrap()).await.unwrap();
        let mut no_box = det("1_0", Some(20));
        no_box.bounding_box = None;
        let out = c.process(bundle(1, vec![("0", camera(vec![no_box]))]), &mut names).await;
        assert!(out.frames[0].overlays.is_empty());
        // no detection processed, so the naming channel was not polled
        assert!(c.store().is_empty());
    }

    #[tokio::test]
    async fn zero_sized_box_is_still_processed() {
        let (tx, mut names) = naming();
        let mut c = correlator(DisplayMode::Age);
        tx.send(serde_json::to_vec(&NamingUpdate { person_key: "x".into(), name: "X".into() }).unwrap()).await.unwrap();
        let mut flat = det("1_0", Some(20));
        flat.bounding_box = Some(BoundingBox { x: 5, y: 5, width: 0, height: 0 });
        let out = c.process(bundle(1, vec![("0", camera(vec![flat]))]), &mut names).await;
        assert_eq!(out.frames[0].overlays.len(), 1);
        assert_eq!(out.frames[0].overlays[0].label, "Age: 20");
        assert_eq!(c.store().lookup("x").and_then(|r| r.name()), Some("X"));
    }

    #[tokio::test]
    async fn face_flag_changes_default_color() {
        let (_tx, mut names) = naming();
        let mut c = correlator(DisplayMode::Age);
        let mut face = det("1_0", None);
        face.face = true;
        let out = c.process(bundle(1, vec![("0", camera(vec![face]))]), &mut names).await;
        assert_eq!(out.frames[0].overlays[0].color, OverlayColor::Face);
    }

    #[tokio::test]
    async fn scale_follows_latest_frame_info_per_source() {
        let (_tx, mut names) = naming();
        let mut c = correlator(DisplayMode::Age);
        let mut cam = camera(vec![det("1_0", None)]);
        cam.frame_info = Some(FrameInfoRecord { columns: 64, rows: 32 });
        let out = c.process(bundle(1, vec![("0", cam), ("1", camera(vec![det("1_0", None)]))]), &mut names).await;
        assert_eq!(c.scale("0"), 0.5);
        assert_eq!(c.scale("1"), 1.0);
        assert_eq!(out.frames[0].overlays[0].bounding_box, BoundingBox { x: 50, y: 25, width: 20, height: 30 });
        assert_eq!(out.frames[1].overlays[0].bounding_box, bbox());
        // persists without a new reference
        let out = c.process(bundle(2, vec![("0", camera(vec![det("2_0", None)]))]), &mut names).await;
        assert_eq!(out.frames[0].overlays[0].scale, 0.5);
    }

    #[tokio::test]
    async fn sources_without_image_are_not_rendered() {
        let (_tx, mut names) = naming();
        let mut c = correlator(DisplayMode::Age);
        let mut cam = camera(vec![det("1_0", None)]);
        cam.image = None;
        let out = c.process(bundle(1, vec![("0", cam)]), &mut names).await;
        assert!(out.frames.is_empty());
    }

    #[test]
    fn dwell_time_is_not_clamped() {
        assert_eq!(dwell_time(1500, 1000), 500);
        assert_eq!(dwell_time(1000, 1500), -500);
        assert_eq!(dwell_time(2000, i64::MIN), i64::MAX);
    }

    #[tokio::test]
    async fn negative_and_extreme_dwell_times_render() {
        let (_tx, mut names) = naming();
        let mut c = correlator(DisplayMode::DwellTime);
        c.process(bundle(1000, vec![("0", camera(vec![det("1000_0", None)])), ("99", reid_source(vec![("1000_0", reid("k1", 1500))]))]), &mut names).await;
        let out = c.process(bundle(1000, vec![("0", camera(vec![det("1000_1", None)])), ("99", reid_source(vec![("1000_1", reid("k1", 1500))]))]), &mut names).await;
        assert_eq!(out.frames[0].overlays[0].label, "ID: 1; Dwell time: -500ms");
        let out = c.process(bundle(2000, vec![("0", camera(vec![det("2000_0", None)])), ("99", reid_source(vec![("2000_0", reid("k1", i64::MIN))]))]), &mut names).await;
        assert_eq!(out.frames[0].overlays[0].label, format!("ID: 1; Dwell time: {}ms", i64::MAX));
    }

    #[test]
    fn extract_reids_orders_by_configured_source() {
        let mut sources: BTreeMap<String, SourceFrame> = BTreeMap::new();
        sources.insert("100".into(), reid_source(vec![("k", reid("b", 1))]));
        sources.insert("99".into(), reid_source(vec![("k", reid("a", 1))]));
        sources.insert("0".into(), camera(vec![]));
        let merged = extract_reids(&mut sources, &["99".to_string(), "100".to_string()]);
        let keys: Vec<_> = merged["k"].iter().map(|r| r.first_candidate().unwrap().id.first_detection_key.as_str()).collect();
        assert_eq!(keys, ["a", "b"]);
        assert_eq!(sources.len(), 1);
    }
}
