//! Subject layout and record formats shared with the upstream analysis stack.
//!
//! Every input subject looks like `<prefix>.cam.<source>.<postfix>`. Record metadata
//! (frame time, detection key) travels in message headers, the JSON body follows the
//! upstream record schemas.

use serde::{Deserialize, Deserializer, Serialize};
use thiserror::Error;

pub const HEADER_FRAME_TIME: &str = "X-Frame-Time";
pub const HEADER_RECORD_KEY: &str = "X-Record-Key";
pub const HEADER_OVERLAYS: &str = "X-Overlays";

pub const OUTPUT_POSTFIX: &str = "reids.Image.jpg";
pub const FACE_DETECTION_TYPE: &str = "PERSON_FACE";

#[derive(Debug, Error)]
pub enum RecordError {
    #[error("subject {0} does not belong to prefix {1}")] ForeignSubject(String, String),
    #[error("unknown topic postfix: {0}")] UnknownPostfix(String),
    #[error("missing header {0}")] MissingHeader(&'static str),
    #[error("invalid frame time: {0}")] FrameTime(String),
    #[error("payload decode failed: {0}")] Payload(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TopicKind { Image, Detection, FrameInfo, FeatureVector, Age, Reid }

impl TopicKind {
    /// Per-camera inputs consumed alongside the image stream.
    pub const CAMERA_INPUTS: [TopicKind; 5] = [TopicKind::Image, TopicKind::Detection, TopicKind::FrameInfo, TopicKind::FeatureVector, TopicKind::Age];

    pub const fn postfix(self) -> &'static str {
        match self {
            TopicKind::Image => "original.Image.jpg",
            TopicKind::Detection => "dets.ObjectDetectionRecord.json",
            TopicKind::FrameInfo => "frameinfo.FrameInfoRecord.json",
            TopicKind::FeatureVector => "fvecs.FeatureVectorRecord.json",
            TopicKind::Age => "ages.AgeRecord.json",
            TopicKind::Reid => "reids.ReidRecord.json",
        }
    }

    pub fn from_postfix(postfix: &str) -> Option<Self> {
        [TopicKind::Reid].into_iter().chain(Self::CAMERA_INPUTS).find(|k| k.postfix() == postfix)
    }

    /// Reid results must survive arriving after their frame was released.
    pub const fn droppable(self) -> bool { !matches!(self, TopicKind::Reid) }
}

pub fn subject(prefix: &str, source: &str, kind: TopicKind) -> String {
    format!("{prefix}.cam.{source}.{}", kind.postfix())
}

pub fn output_subject(prefix: &str, source: &str) -> String {
    format!("{prefix}.cam.{source}.{OUTPUT_POSTFIX}")
}

/// Splits a subject into its source id and topic kind.
pub fn parse_subject(prefix: &str, subject: &str) -> Result<(String, TopicKind), RecordError> {
    let foreign = || RecordError::ForeignSubject(subject.to_string(), prefix.to_string());
    let rest = subject.strip_prefix(prefix).and_then(|r| r.strip_prefix(".cam.")).ok_or_else(foreign)?;
    let (source, postfix) = rest.split_once('.').ok_or_else(foreign)?;
    let kind = TopicKind::from_postfix(postfix).ok_or_else(|| RecordError::UnknownPostfix(postfix.to_string()))?;
    Ok((source.to_string(), kind))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

impl BoundingBox {
    pub fn scaled(&self, scale: f64) -> BoundingBox {
        let s = |v: i32| (f64::from(v) * scale).round() as i32;
        BoundingBox { x: s(self.x), y: s(self.y), width: s(self.width), height: s(self.height) }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ObjectDetectionRecord {
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub bounding_box: Option<BoundingBox>,
    #[serde(default)]
    pub detection_confidence: f32,
    #[serde(default)]
    pub end_of_frame: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct FrameInfoRecord {
    pub columns: u32,
    #[serde(default)]
    pub rows: u32,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AgeRecord {
    #[serde(default)]
    pub age: Option<u32>,
    #[serde(default)]
    pub confidence: f32,
    #[serde(default)]
    pub end_of_frame: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ReidRecord {
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub reid_event: Option<ReidEvent>,
}

impl ReidRecord {
    /// First candidate of the match list. Further candidates are never consulted.
    pub fn first_candidate(&self) -> Option<&ReidMatch> {
        self.reid_event.as_ref().and_then(|e| e.match_list.first())
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ReidEvent {
    #[serde(default)]
    pub match_list: Vec<ReidMatch>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReidMatch {
    pub id: MatchId,
    #[serde(default)]
    pub score: f32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MatchId {
    pub first_detection_key: String,
    #[serde(deserialize_with = "millis_from_text_or_int")]
    pub first_detection_time: i64,
}

// Upstream writes epoch millis as a decimal string.
fn millis_from_text_or_int<'de, D: Deserializer<'de>>(d: D) -> Result<i64, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw { Int(i64), Text(String) }
    match Raw::deserialize(d)? {
        Raw::Int(v) => Ok(v),
        Raw::Text(s) => s.trim().parse().map_err(serde::de::Error::custom),
    }
}

#[derive(Debug, Clone)]
pub enum RecordPayload {
    Image(Vec<u8>),
    Detection(ObjectDetectionRecord),
    FrameInfo(FrameInfoRecord),
    FeatureVector,
    Age(AgeRecord),
    Reid(ReidRecord),
}

impl RecordPayload {
    pub fn kind(&self) -> TopicKind {
        match self {
            RecordPayload::Image(_) => TopicKind::Image,
            RecordPayload::Detection(_) => TopicKind::Detection,
            RecordPayload::FrameInfo(_) => TopicKind::FrameInfo,
            RecordPayload::FeatureVector => TopicKind::FeatureVector,
            RecordPayload::Age(_) => TopicKind::Age,
            RecordPayload::Reid(_) => TopicKind::Reid,
        }
    }
}

/// Transport-neutral view of one inbound message.
#[derive(Debug, Clone, Default)]
pub struct RawMessage {
    pub subject: String,
    pub frame_time: Option<String>,
    pub key: Option<String>,
    pub payload: Vec<u8>,
}

impl RawMessage {
    pub fn from_nats(msg: async_nats::Message) -> Self {
        let header = |name: &str| msg.headers.as_ref().and_then(|h| h.get(name)).map(|v| v.as_str().to_string());
        Self {
            subject: msg.subject.to_string(),
            frame_time: header(HEADER_FRAME_TIME),
            key: header(HEADER_RECORD_KEY),
            payload: msg.payload.to_vec(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct InputRecord {
    pub source: String,
    pub time: i64,
    pub key: String,
    pub payload: RecordPayload,
}

impl InputRecord {
    pub fn kind(&self) -> TopicKind { self.payload.kind() }
}

/// Decodes one inbound message. Frame-info records may omit the key header.
pub fn decode_record(prefix: &str, raw: &RawMessage) -> Result<InputRecord, RecordError> {
    let (source, kind) = parse_subject(prefix, &raw.subject)?;
    let time_text = raw.frame_time.as_deref().ok_or(RecordError::MissingHeader(HEADER_FRAME_TIME))?;
    let time = time_text.trim().parse::<i64>().map_err(|_| RecordError::FrameTime(time_text.to_string()))?;
    let key = match (&raw.key, kind) {
        (Some(k), _) => k.clone(),
        (None, TopicKind::Image | TopicKind::FrameInfo) => time.to_string(),
        (None, _) => return Err(RecordError::MissingHeader(HEADER_RECORD_KEY)),
    };
    let payload = match kind {
        TopicKind::Image => RecordPayload::Image(raw.payload.clone()),
        TopicKind::Detection => RecordPayload::Detection(serde_json::from_slice(&raw.payload)?),
        TopicKind::FrameInfo => RecordPayload::FrameInfo(serde_json::from_slice(&raw.payload)?),
        TopicKind::FeatureVector => RecordPayload::FeatureVector,
        TopicKind::Age => RecordPayload::Age(serde_json::from_slice(&raw.payload)?),
        TopicKind::Reid => RecordPayload::Reid(serde_json::from_slice(&raw.payload)?),
    };
    Ok(InputRecord { source, time, key, payload })
}
