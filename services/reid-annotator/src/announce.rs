//! Publishes newly registered person-key → id mappings.

use crate::wire::HEADER_FRAME_TIME;
use async_nats::{Client, HeaderMap};
use overlay_core::ANNOTATOR_METRICS;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

pub const DEFAULT_ANNOUNCE_SUBJECT: &str = "detected.records.json";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityAnnouncement {
    pub person_key: String,
    pub id: u64,
    /// Frame time at which the identity was first registered.
    pub time: i64,
}

impl IdentityAnnouncement {
    pub fn headers(&self) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(HEADER_FRAME_TIME, self.time.to_string().as_str());
        headers
    }
}

pub struct Announcer {
    client: Client,
    subject: String,
}

impl Announcer {
    pub fn new(client: Client, subject: impl Into<String>) -> Self { Self { client, subject: subject.into() } }

    /// Delivery problems are logged and counted, never retried.
    pub async fn announce(&self, a: &IdentityAnnouncement) {
        let body = match serde_json::to_vec(a) {
            Ok(b) => b,
            Err(e) => { warn!(error=?e, "announcement serialize failed"); return; }
        };
        match self.client.publish_with_headers(self.subject.clone(), a.headers(), body.into()).await {
            Ok(()) => debug!(person_key=%a.person_key, id=a.id, "identity announced"),
            Err(e) => {
                ANNOTATOR_METRICS.egress_failures_total.add(1, &[]);
                warn!(error=%e, person_key=%a.person_key, "identity announce failed");
            }
        }
    }
}
