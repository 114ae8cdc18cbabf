use crate::correlate::DisplayMode;
use clap::{ArgGroup, Parser};

/// Annotates multi-camera frames with reid identities, running-average age and dwell time.
///
/// Consumes `<prefix>.cam.<id>.{original.Image.jpg, dets.ObjectDetectionRecord.json,
/// frameinfo.FrameInfoRecord.json, fvecs.FeatureVectorRecord.json, ages.AgeRecord.json}`
/// per camera and `<prefix>.cam.<id>.reids.ReidRecord.json` per reid source.
#[derive(Parser, Debug, Clone)]
#[command(name = "reid-annotator", version)]
#[command(group(ArgGroup::new("sink").required(true).multiple(true).args(["display", "output"])))]
pub struct Args {
    /// NATS server address, e.g. nats://127.0.0.1:4222
    pub broker: String,
    /// Prefix of the input subjects (base|skeleton)
    pub prefix: String,
    /// What to display next to the identity
    #[arg(value_enum)]
    pub text: DisplayMode,
    /// Log the annotated overlays and accept `q` on stdin to stop
    #[arg(short = 'd', long)]
    pub display: bool,
    /// Publish annotated frames to `<prefix>.cam.<id>.reids.Image.jpg`
    #[arg(short = 'o', long)]
    pub output: bool,
}
