//! Metric instruments for the annotation pipeline.

use once_cell::sync::Lazy;
use opentelemetry::metrics::{Counter, Meter};

#[derive(Clone, Debug)]
pub struct AnnotatorMetrics {
    pub frames_annotated_total: Counter<u64>,
    pub identities_registered_total: Counter<u64>,
    pub naming_applied_total: Counter<u64>,
    pub naming_rejected_total: Counter<u64>,
    pub records_dropped_late_total: Counter<u64>,
    pub records_rejected_total: Counter<u64>,
    pub egress_failures_total: Counter<u64>,
}

static ANNOTATOR_METER: Lazy<Meter> = Lazy::new(|| opentelemetry::global::meter("reid_annotator"));

pub static ANNOTATOR_METRICS: Lazy<AnnotatorMetrics> = Lazy::new(|| AnnotatorMetrics {
    frames_annotated_total: ANNOTATOR_METER.u64_counter("annotator_frames_annotated_total")
        .with_description("Camera frames annotated and handed to a sink")
        .init(),
    identities_registered_total: ANNOTATOR_METER.u64_counter("annotator_identities_registered_total")
        .with_description("New person keys registered and announced")
        .init(),
    naming_applied_total: ANNOTATOR_METER.u64_counter("annotator_naming_applied_total")
        .with_description("Naming updates applied to the registration store")
        .init(),
    naming_rejected_total: ANNOTATOR_METER.u64_counter("annotator_naming_rejected_total")
        .with_description("Naming records discarded because they could not be decoded")
        .init(),
    records_dropped_late_total: ANNOTATOR_METER.u64_counter("annotator_records_dropped_late_total")
        .with_description("Input records dropped for arriving after their frame or with an outlier frame time")
        .init(),
    records_rejected_total: ANNOTATOR_METER.u64_counter("annotator_records_rejected_total")
        .with_description("Input records with an unknown subject, missing headers or bad payload")
        .init(),
    egress_failures_total: ANNOTATOR_METER.u64_counter("annotator_egress_failures_total")
        .with_description("Publish or flush calls reported as failed by the transport")
        .init(),
});
