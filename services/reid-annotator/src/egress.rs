//! Hands annotated frames to the operator display and/or the output subjects.

use crate::correlate::{AnnotatedFrame, Overlay};
use crate::wire::{output_subject, HEADER_FRAME_TIME, HEADER_OVERLAYS};
use anyhow::Result;
use async_nats::{Client, HeaderMap};
use overlay_core::ANNOTATOR_METRICS;
use tracing::{debug, info, warn};

pub const DEFAULT_FLUSH_EVERY: u64 = 1000;

/// Display mode: one structured log line per overlay.
pub fn display(frame: &AnnotatedFrame) {
    for ov in &frame.overlays {
        let b = ov.bounding_box;
        info!(camera=%frame.source, time=frame.time, label=%ov.label, color=?ov.color, bgr=?ov.color.bgr(), x=b.x, y=b.y, w=b.width, h=b.height, "overlay");
    }
    debug!(camera=%frame.source, time=frame.time, overlays=frame.overlays.len(), "frame displayed");
}

pub fn overlay_headers(frame: &AnnotatedFrame) -> Result<HeaderMap> {
    let overlays: &[Overlay] = &frame.overlays;
    let mut headers = HeaderMap::new();
    headers.insert(HEADER_FRAME_TIME, frame.time.to_string().as_str());
    headers.insert(HEADER_OVERLAYS, serde_json::to_string(overlays)?.as_str());
    Ok(headers)
}

/// Publishes each frame's image bytes to `<prefix>.cam.<id>.reids.Image.jpg` with the
/// overlays attached as a header, and flushes the client every `flush_every` frames.
pub struct FramePublisher {
    client: Client,
    prefix: String,
    flush_every: u64,
    published: u64,
}

impl FramePublisher {
    pub fn new(client: Client, prefix: impl Into<String>, flush_every: u64) -> Self {
        Self { client, prefix: prefix.into(), flush_every: flush_every.max(1), published: 0 }
    }

    pub async fn publish(&mut self, frame: &AnnotatedFrame) {
        let headers = match overlay_headers(frame) {
            Ok(h) => h,
            Err(e) => { warn!(error=?e, camera=%frame.source, "overlay encode failed"); return; }
        };
        let subject = output_subject(&self.prefix, &frame.source);
        if let Err(e) = self.client.publish_with_headers(subject, headers, frame.image.clone().into()).await {
            ANNOTATOR_METRICS.egress_failures_total.add(1, &[]);
            warn!(error=%e, camera=%frame.source, "frame publish failed");
        }
        if self.published % self.flush_every == 0 { self.flush().await; }
        self.published += 1;
    }

    pub async fn flush(&self) {
        if let Err(e) = self.client.flush().await {
            ANNOTATOR_METRICS.egress_failures_total.add(1, &[]);
            warn!(error=%e, "flush failed");
        }
    }
}
