//! Shared plumbing for the overlay services: tracing, layered config,
//! health endpoints and metric instruments.

use anyhow::{anyhow, Result};
use axum::{routing::get, Json, Router};
use once_cell::sync::{Lazy, OnceCell};
use parking_lot::RwLock;
use serde::Serialize;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::info;
use tracing_subscriber::EnvFilter;

pub mod config;
pub mod metrics;

pub use config::{layered_config, CONFIG_FILE_ENV, ENV_PREFIX};
pub use metrics::{AnnotatorMetrics, ANNOTATOR_METRICS};

static TRACING_INIT: OnceCell<()> = OnceCell::new();
static NODE_LIVENESS: AtomicBool = AtomicBool::new(true);
static NODE_READINESS: AtomicBool = AtomicBool::new(false);
static STATUS: Lazy<RwLock<ServiceStatus>> = Lazy::new(|| RwLock::new(ServiceStatus::default()));

pub fn mark_ready() { NODE_READINESS.store(true, Ordering::SeqCst); }
pub fn clear_ready() { NODE_READINESS.store(false, Ordering::SeqCst); }
pub fn is_ready() -> bool { NODE_READINESS.load(Ordering::SeqCst) }

/// Progress snapshot served on `/status`.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ServiceStatus {
    pub service: String,
    pub frames_annotated: u64,
    pub registrations: usize,
    pub last_frame_time: Option<i64>,
}

pub fn set_service_name(service: &str) { STATUS.write().service = service.to_string(); }

/// Records one annotated frame and the current size of the identity store.
pub fn record_frame(frame_time: i64, registrations: usize) {
    let mut st = STATUS.write();
    st.frames_annotated += 1;
    st.registrations = registrations;
    st.last_frame_time = Some(frame_time);
}

pub fn status_snapshot() -> ServiceStatus { STATUS.read().clone() }

/// Installs the global subscriber once. `RUST_LOG` drives filtering (default `info`);
/// `ANNOTATOR_JSON_LOG=1` switches to flattened JSON lines.
pub fn init_tracing(service: &str) -> Result<()> {
    TRACING_INIT.get_or_try_init(|| -> Result<()> {
        let json = std::env::var("ANNOTATOR_JSON_LOG").ok().map(|v| v == "1" || v.eq_ignore_ascii_case("true")).unwrap_or(false);
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
        let res = if json {
            tracing_subscriber::fmt()
                .json()
                .flatten_event(true)
                .with_current_span(true)
                .with_span_list(false)
                .with_env_filter(filter)
                .try_init()
        } else {
            tracing_subscriber::fmt()
                .with_target(true)
                .with_thread_ids(false)
                .with_line_number(true)
                .with_env_filter(filter)
                .try_init()
        };
        res.map_err(|e| anyhow!("tracing init failed: {e}"))
    })?;
    set_service_name(service);
    info!(target: "overlay_core", %service, "tracing initialized");
    Ok(())
}

fn health_router() -> Router {
    Router::new()
        .route("/live", get(|| async { Json(serde_json::json!({"live": NODE_LIVENESS.load(Ordering::SeqCst)})) }))
        .route("/ready", get(|| async { Json(serde_json::json!({"ready": NODE_READINESS.load(Ordering::SeqCst)})) }))
        .route("/status", get(|| async {
            Json(serde_json::json!({
                "live": NODE_LIVENESS.load(Ordering::SeqCst),
                "ready": NODE_READINESS.load(Ordering::SeqCst),
                "progress": status_snapshot(),
            }))
        }))
}

/// Serves `/live`, `/ready` and `/status` in a background task.
pub async fn start_health_server(port: u16) -> Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(?addr, "health server listening");
    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, health_router()).await {
            tracing::error!(error=?e, "health server failed");
        }
    });
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn readiness_toggles() {
        mark_ready();
        assert!(is_ready());
        clear_ready();
        assert!(!is_ready());
    }

    #[test]
    fn record_frame_tracks_progress() {
        let before = status_snapshot().frames_annotated;
        record_frame(1_500, 3);
        let st = status_snapshot();
        assert!(st.frames_annotated > before);
        assert!(st.last_frame_time.is_some());
    }

    #[tokio::test]
    async fn health_server_binds_ephemeral_port() {
        assert!(start_health_server(0).await.is_ok());
    }
}
