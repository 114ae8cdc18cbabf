//! Reid overlay annotator: correlates camera frames, head detections, reid results
//! and operator naming updates into per-person identity overlays.

pub mod announce;
pub mod assembler;
pub mod cli;
pub mod correlate;
pub mod egress;
pub mod frame;
pub mod naming;
pub mod registry;
pub mod service;
pub mod settings;
pub mod stop;
pub mod wire;

pub use announce::{Announcer, IdentityAnnouncement};
pub use assembler::FrameAssembler;
pub use correlate::{AnnotatedFrame, Correlator, DisplayMode, FrameOutcome, Overlay, OverlayColor};
pub use naming::{NamingIngestor, NamingPoll, NamingUpdate};
pub use registry::{Registration, RegistrationStore};
pub use settings::{AnnotatorConfig, Settings};
