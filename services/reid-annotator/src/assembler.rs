//! Groups inbound records by frame time and releases them oldest first once the
//! event-time watermark has moved `latency_ms` past them.

use crate::frame::FrameBundle;
use crate::wire::InputRecord;
use opentelemetry::KeyValue;
use overlay_core::ANNOTATOR_METRICS;
use std::collections::BTreeMap;
use tracing::{debug, warn};

pub const DEFAULT_LATENCY_MS: i64 = 200;
/// Records further than this from the stream position are treated as clock outliers.
pub const DEFAULT_MAX_LEAD_MS: i64 = 60_000;
/// Consecutive outliers after which the stream is taken to have really jumped.
pub const RESYNC_AFTER: u32 = 32;

pub struct FrameAssembler {
    latency_ms: i64,
    max_lead_ms: i64,
    pending: BTreeMap<i64, FrameBundle>,
    watermark: Option<i64>,
    last_released: Option<i64>,
    late_reids: Vec<InputRecord>,
    dropped_late: u64,
    dropped_ahead: u64,
    outlier_streak: u32,
}

impl FrameAssembler {
    pub fn new(latency_ms: i64) -> Self {
        Self {
            latency_ms,
            max_lead_ms: DEFAULT_MAX_LEAD_MS,
            pending: BTreeMap::new(),
            watermark: None,
            last_released: None,
            late_reids: Vec::new(),
            dropped_late: 0,
            dropped_ahead: 0,
            outlier_streak: 0,
        }
    }

    pub fn with_max_lead(mut self, max_lead_ms: i64) -> Self {
        self.max_lead_ms = max_lead_ms.max(0);
        self
    }

    pub fn push(&mut self, rec: InputRecord) {
        if self.is_outlier(&rec) {
            self.outlier_streak += 1;
            if self.outlier_streak < RESYNC_AFTER {
                self.drop_outlier(&rec);
                return;
            }
            warn!(source=%rec.source, time=rec.time, watermark=?self.watermark, "frame time jumped, resynchronizing");
            self.outlier_streak = 0;
            self.watermark = None;
            if self.last_released.is_some_and(|last| rec.time <= last) { self.last_released = None; }
        } else {
            self.outlier_streak = 0;
        }

        if self.last_released.is_some_and(|last| rec.time <= last) {
            if rec.kind().droppable() {
                self.dropped_late += 1;
                ANNOTATOR_METRICS.records_dropped_late_total.add(1, &[KeyValue::new("source", rec.source.clone()), KeyValue::new("reason", "late")]);
                debug!(source=%rec.source, time=rec.time, kind=?rec.kind(), "late record dropped");
            } else {
                self.late_reids.push(rec);
            }
            return;
        }
        self.watermark = Some(self.watermark.map_or(rec.time, |w| w.max(rec.time)));
        let time = rec.time;
        self.pending.entry(time).or_insert_with(|| FrameBundle::new(time)).insert(rec);
    }

    /// Far ahead of the watermark, or (for droppable kinds) far behind the last release.
    fn is_outlier(&self, rec: &InputRecord) -> bool {
        let ahead = self.watermark.is_some_and(|w| rec.time > w.saturating_add(self.max_lead_ms));
        let behind = rec.kind().droppable()
            && self.last_released.is_some_and(|last| last.saturating_sub(rec.time) > self.max_lead_ms);
        ahead || behind
    }

    fn drop_outlier(&mut self, rec: &InputRecord) {
        let ahead = self.watermark.is_some_and(|w| rec.time > w);
        let reason = if ahead { "ahead" } else { "late" };
        if ahead { self.dropped_ahead += 1 } else { self.dropped_late += 1 }
        ANNOTATOR_METRICS.records_dropped_late_total.add(1, &[KeyValue::new("source", rec.source.clone()), KeyValue::new("reason", reason)]);
        warn!(source=%rec.source, time=rec.time, watermark=?self.watermark, reason, "frame time outlier dropped");
    }

    /// Next bundle whose time is at least `latency_ms` behind the watermark.
    pub fn pop_ready(&mut self) -> Option<FrameBundle> {
        let watermark = self.watermark?;
        let (&time, _) = self.pending.first_key_value()?;
        if time.saturating_add(self.latency_ms) > watermark { return None; }
        self.release_first()
    }

    /// Releases everything buffered, oldest first. Used when input goes idle and at shutdown.
    pub fn drain_all(&mut self) -> Vec<FrameBundle> {
        std::iter::from_fn(|| self.release_first()).collect()
    }

    fn release_first(&mut self) -> Option<FrameBundle> {
        let (time, mut bundle) = self.pending.pop_first()?;
        for rec in self.late_reids.drain(..) { bundle.insert(rec); }
        self.last_released = Some(time);
        Some(bundle)
    }

    pub fn pending_len(&self) -> usize { self.pending.len() }

    pub fn dropped_late(&self) -> u64 { self.dropped_late }

    pub fn dropped_ahead(&self) -> u64 { self.dropped_ahead }
}
