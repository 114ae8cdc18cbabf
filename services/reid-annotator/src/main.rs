use anyhow::Result;
use clap::Parser;
use overlay_core::init_tracing;
use reid_annotator::cli::Args;
use reid_annotator::settings::{AnnotatorConfig, Settings, SERVICE_NAME};
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    // Usage errors exit here, before any connection is attempted.
    let args = Args::parse();
    init_tracing(SERVICE_NAME)?;
    let config = AnnotatorConfig::load()?;
    info!(?config, "config loaded");
    reid_annotator::service::run(Settings::new(args, config)).await
}
