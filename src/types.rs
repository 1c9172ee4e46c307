//! Shared domain types used across the codebase.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use url::Url;

/// Identifier of a load-balancing policy. The one-token names are used in
/// configuration files and telemetry records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PolicyId {
    #[serde(rename = "random")]
    Random,
    #[serde(rename = "round-robin")]
    RoundRobin,
    #[serde(rename = "mama")]
    Mama,
    #[serde(rename = "wrr-memory")]
    WrrMemory,
    #[serde(rename = "wrr-cost")]
    WrrCost,
    #[serde(rename = "const-hash")]
    ConstHash,
}

impl PolicyId {
    /// Every policy the MAB agent may select between.
    pub fn all() -> [PolicyId; 6] {
        [
            PolicyId::Random,
            PolicyId::RoundRobin,
            PolicyId::Mama,
            PolicyId::WrrMemory,
            PolicyId::WrrCost,
            PolicyId::ConstHash,
        ]
    }

    pub fn name(&self) -> &'static str {
        match self {
            PolicyId::Random => "random",
            PolicyId::RoundRobin => "round-robin",
            PolicyId::Mama => "mama",
            PolicyId::WrrMemory => "wrr-memory",
            PolicyId::WrrCost => "wrr-cost",
            PolicyId::ConstHash => "const-hash",
        }
    }
}

impl fmt::Display for PolicyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Canonical string identity of a backend.
///
/// `Url` always renders an explicit path (`http://host:1234/`); the trailing
/// slash is stripped so keys match the bare `scheme://host:port` form used by
/// the registry and so path concatenation stays clean.
pub fn backend_key(url: &Url) -> String {
    url.as_str().trim_end_matches('/').to_string()
}

/// Snapshot of one worker node, as returned by its `/status` endpoint.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NodeStatus {
    #[serde(rename = "AvailableMemMB", default)]
    pub available_mem_mb: i64,
    #[serde(rename = "MaxMemMB", default)]
    pub max_mem_mb: i64,
    #[serde(rename = "CostCloud", default)]
    pub cost_cloud: f64,
    #[serde(rename = "Addresses", default)]
    pub addresses: NodeAddresses,
    /// Warm (pre-initialised) container count per function name.
    #[serde(rename = "AvailableWarmContainers", default)]
    pub available_warm_containers: HashMap<String, u32>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NodeAddresses {
    #[serde(rename = "NodeAddress", default)]
    pub node_address: String,
}

/// Function descriptor stored in the registry under `/function/<name>`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Function {
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "MemoryMB", default)]
    pub memory_mb: i64,
}

/// Execution report attached to a successful invoke response.
/// Workers that predate a field simply omit it; absent fields read as zero.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExecutionReport {
    #[serde(rename = "ResponseTime", default)]
    pub response_time: f64,
    #[serde(rename = "CostCloud", default)]
    pub cost_cloud: f64,
    #[serde(rename = "Utility", default)]
    pub utility: f64,
    /// Response-time violations observed by the worker for this request.
    #[serde(rename = "Violations", default)]
    pub violations: u64,
}

/// The proxy's current view of the backend fleet: an ordered list of targets
/// plus a parallel slice of cached `/status` snapshots (same index; `None`
/// while a snapshot is missing or stale-failed).
#[derive(Debug, Clone, Default)]
pub struct TargetsInfo {
    pub targets: Vec<Url>,
    pub statuses: Vec<Option<NodeStatus>>,
}

impl TargetsInfo {
    pub fn new(targets: Vec<Url>) -> Self {
        let statuses = vec![None; targets.len()];
        Self { targets, statuses }
    }

    pub fn with_statuses(targets: Vec<Url>, statuses: Vec<Option<NodeStatus>>) -> Self {
        debug_assert_eq!(targets.len(), statuses.len());
        Self { targets, statuses }
    }

    pub fn len(&self) -> usize {
        self.targets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }

    /// True when `other` holds the same multiset of target URLs, in any order.
    pub fn same_targets(&self, other: &[Url]) -> bool {
        if self.targets.len() != other.len() {
            return false;
        }
        let mut counts: HashMap<&str, i64> = HashMap::new();
        for url in &self.targets {
            *counts.entry(url.as_str()).or_default() += 1;
        }
        for url in other {
            let entry = counts.entry(url.as_str()).or_default();
            *entry -= 1;
            if *entry == 0 {
                counts.remove(url.as_str());
            }
        }
        counts.is_empty()
    }
}
