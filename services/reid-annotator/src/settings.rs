//! Runtime settings: layered config file/environment plus the command line.

use crate::announce::DEFAULT_ANNOUNCE_SUBJECT;
use crate::assembler::{DEFAULT_LATENCY_MS, DEFAULT_MAX_LEAD_MS};
use crate::cli::Args;
use crate::correlate::DisplayMode;
use crate::egress::DEFAULT_FLUSH_EVERY;
use crate::naming::DEFAULT_POLL_TIMEOUT;
use crate::wire::{subject, TopicKind};
use anyhow::{Context, Result};
use serde::Deserialize;
use std::time::Duration;

pub const SERVICE_NAME: &str = "reid-annotator";

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AnnotatorConfig {
    pub camera_ids: Vec<String>,
    pub reid_source_ids: Vec<String>,
    pub latency_ms: i64,
    /// Frame times further than this from the stream position are dropped as outliers.
    pub max_lead_ms: i64,
    pub idle_flush_ms: u64,
    pub naming_subject: String,
    pub announce_subject: String,
    pub naming_poll_ms: u64,
    pub channel_capacity: usize,
    pub flush_every: u64,
    /// 0 disables the health server.
    pub health_port: u16,
}

impl Default for AnnotatorConfig {
    fn default() -> Self {
        Self {
            camera_ids: vec!["0".into(), "1".into()],
            reid_source_ids: vec!["99".into(), "100".into()],
            latency_ms: DEFAULT_LATENCY_MS,
            max_lead_ms: DEFAULT_MAX_LEAD_MS,
            idle_flush_ms: 1000,
            naming_subject: "named.records.json".into(),
            announce_subject: DEFAULT_ANNOUNCE_SUBJECT.into(),
            naming_poll_ms: DEFAULT_POLL_TIMEOUT.as_millis() as u64,
            channel_capacity: 1024,
            flush_every: DEFAULT_FLUSH_EVERY,
            health_port: 0,
        }
    }
}

impl AnnotatorConfig {
    pub fn load() -> Result<Self> {
        overlay_core::layered_config(SERVICE_NAME)?
            .try_deserialize()
            .context("invalid reid-annotator configuration")
    }

    pub fn naming_poll(&self) -> Duration { Duration::from_millis(self.naming_poll_ms) }

    pub fn idle_flush(&self) -> Duration { Duration::from_millis(self.idle_flush_ms) }
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub broker: String,
    pub prefix: String,
    pub mode: DisplayMode,
    pub display: bool,
    pub output: bool,
    pub config: AnnotatorConfig,
}

impl Settings {
    pub fn new(args: Args, config: AnnotatorConfig) -> Self {
        Self { broker: args.broker, prefix: args.prefix, mode: args.text, display: args.display, output: args.output, config }
    }

    /// Camera inputs (dropped when late) followed by reid inputs (never dropped).
    pub fn input_subjects(&self) -> Vec<String> {
        let cameras = self.config.camera_ids.iter()
            .flat_map(|id| TopicKind::CAMERA_INPUTS.into_iter().map(move |k| (id, k)));
        let reids = self.config.reid_source_ids.iter().map(|id| (id, TopicKind::Reid));
        cameras.chain(reids).map(|(id, k)| subject(&self.prefix, id, k)).collect()
    }
}
