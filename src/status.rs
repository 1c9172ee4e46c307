//! Per-backend status probing.
//!
//! Each worker exposes `GET /status` with its available memory, warm
//! container counts and unit cost. The probe caches nothing itself; the
//! target-refresh tick stores the snapshots in the proxy's `TargetsInfo` so
//! policies can read them without doing I/O.

use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

use crate::types::{NodeStatus, backend_key};

const STATUS_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Clone)]
pub struct StatusProbe {
    http: reqwest::Client,
}

impl Default for StatusProbe {
    fn default() -> Self {
        Self {
            http: reqwest::Client::new(),
        }
    }
}

impl StatusProbe {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fetch one backend's status snapshot. Any transport error, non-200
    /// answer or undecodable body yields `None`; consumers fall back to
    /// conservative defaults.
    pub async fn fetch_status(&self, backend: &Url) -> Option<NodeStatus> {
        let url = format!("{}/status", backend_key(backend));
        let resp = match self.http.get(&url).timeout(STATUS_TIMEOUT).send().await {
            Ok(resp) => resp,
            Err(e) => {
                warn!(backend = %backend, error = %e, "Status fetch failed");
                return None;
            }
        };
        if !resp.status().is_success() {
            warn!(backend = %backend, status = %resp.status(), "Status fetch rejected");
            return None;
        }
        match resp.json::<NodeStatus>().await {
            Ok(status) => Some(status),
            Err(e) => {
                warn!(backend = %backend, error = %e, "Undecodable status body");
                None
            }
        }
    }

    /// Snapshot every target, in order. The result is index-parallel to
    /// `targets`.
    pub async fn fetch_all(&self, targets: &[Url]) -> Vec<Option<NodeStatus>> {
        let mut statuses = Vec::with_capacity(targets.len());
        for target in targets {
            statuses.push(self.fetch_status(target).await);
        }
        let known = statuses.iter().filter(|s| s.is_some()).count();
        debug!(known, total = targets.len(), "Refreshed status cache");
        statuses
    }
}
