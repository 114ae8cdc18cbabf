//! Time-grouped view of everything received for one frame timestamp.

use crate::wire::{BoundingBox, FrameInfoRecord, InputRecord, RecordPayload, ReidRecord, FACE_DETECTION_TYPE};
use std::collections::{BTreeMap, HashMap};
use std::io::Cursor;

/// One head/face detection with whatever per-detection records arrived for it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Detection {
    pub key: String,
    pub bounding_box: Option<BoundingBox>,
    pub face: bool,
    pub age: Option<u32>,
}

#[derive(Debug, Clone, Default)]
pub struct SourceFrame {
    pub image: Option<Vec<u8>>,
    pub frame_info: Option<FrameInfoRecord>,
    /// Detections in arrival order.
    pub detections: Vec<Detection>,
    /// Reid records by detection key, arrival order kept per key.
    pub reids: HashMap<String, Vec<ReidRecord>>,
}

impl SourceFrame {
    pub fn detection_mut(&mut self, key: &str) -> &mut Detection {
        let idx = match self.detections.iter().position(|d| d.key == key) {
            Some(i) => i,
            None => {
                self.detections.push(Detection { key: key.to_string(), ..Default::default() });
                self.detections.len() - 1
            }
        };
        &mut self.detections[idx]
    }
}

#[derive(Debug, Clone, Default)]
pub struct FrameBundle {
    pub time: i64,
    pub sources: BTreeMap<String, SourceFrame>,
}

impl FrameBundle {
    pub fn new(time: i64) -> Self { Self { time, sources: BTreeMap::new() } }

    /// Files a record under its source. End-of-frame markers carry nothing and are ignored.
    pub fn insert(&mut self, rec: InputRecord) {
        let frame = self.sources.entry(rec.source).or_default();
        match rec.payload {
            RecordPayload::Image(bytes) => frame.image = Some(bytes),
            RecordPayload::FrameInfo(info) => frame.frame_info = Some(info),
            RecordPayload::Detection(d) => {
                if d.end_of_frame { return; }
                let det = frame.detection_mut(&rec.key);
                if d.bounding_box.is_some() { det.bounding_box = d.bounding_box; }
                if d.kind == FACE_DETECTION_TYPE { det.face = true; }
            }
            RecordPayload::Age(a) => {
                if let (Some(age), false) = (a.age, a.end_of_frame) {
                    frame.detection_mut(&rec.key).age = Some(age);
                }
            }
            RecordPayload::FeatureVector => {}
            RecordPayload::Reid(r) => frame.reids.entry(rec.key).or_default().push(r),
        }
    }
}

/// Pixel width of an encoded image, read from its header only.
pub fn image_width(bytes: &[u8]) -> Option<u32> {
    image::ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()
        .ok()?
        .into_dimensions()
        .ok()
        .map(|(w, _)| w)
}

#[cfg(test)]
pub(crate) fn encoded_png(width: u32, height: u32) -> Vec<u8> {
    let mut buf = Vec::new();
    image::DynamicImage::new_rgb8(width, height)
        .write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)
        .expect("png encode");
    buf
}
