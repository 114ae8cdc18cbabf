//! Operator naming side channel: `(person key, name)` pairs merged into the store.

use crate::registry::RegistrationStore;
use overlay_core::ANNOTATOR_METRICS;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, warn};

pub const DEFAULT_POLL_TIMEOUT: Duration = Duration::from_millis(10);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NamingUpdate {
    pub person_key: String,
    pub name: String,
}

#[derive(Debug, Error)]
pub enum NamingDecodeError {
    #[error("record is not valid utf-8: {0}")] NotUtf8(#[from] std::str::Utf8Error),
    #[error("record is not a naming update: {0}")] Json(#[from] serde_json::Error),
}

pub fn decode_naming(bytes: &[u8]) -> Result<NamingUpdate, NamingDecodeError> {
    let text = std::str::from_utf8(bytes)?;
    Ok(serde_json::from_str(text)?)
}

/// Result of one poll.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NamingPoll {
    /// Nothing arrived within the poll timeout (or the channel is closed).
    Idle,
    /// A name was applied; `created` is set for name-only registrations.
    Applied { person_key: String, created: bool },
    /// The record could not be decoded and was discarded.
    Rejected,
}

pub struct NamingIngestor {
    rx: mpsc::Receiver<Vec<u8>>,
    wait: Duration,
}

impl NamingIngestor {
    pub fn new(rx: mpsc::Receiver<Vec<u8>>, wait: Duration) -> Self { Self { rx, wait } }

    /// Waits at most the poll timeout for one record and applies it.
    pub async fn poll(&mut self, store: &mut RegistrationStore) -> NamingPoll {
        let bytes = match tokio::time::timeout(self.wait, self.rx.recv()).await {
            Ok(Some(b)) => b,
            Ok(None) | Err(_) => return NamingPoll::Idle,
        };
        match decode_naming(&bytes) {
            Ok(update) => apply(store, update),
            Err(e) => {
                warn!(error=%e, len=bytes.len(), "naming record decode failed, discarded");
                ANNOTATOR_METRICS.naming_rejected_total.add(1, &[]);
                NamingPoll::Rejected
            }
        }
    }
}

fn apply(store: &mut RegistrationStore, update: NamingUpdate) -> NamingPoll {
    let created = match store.lookup_mut(&update.person_key) {
        Some(reg) => {
            reg.add_name(update.name);
            false
        }
        None => {
            // Name-only registration; it takes the next id but is not announced.
            let (reg, created) = store.get_or_create(&update.person_key);
            reg.add_name(update.name);
            created
        }
    };
    debug!(person_key=%update.person_key, created, "naming update applied");
    ANNOTATOR_METRICS.naming_applied_total.add(1, &[]);
    NamingPoll::Applied { person_key: update.person_key, created }
}
