//! Memory-Aware Most-Available (MAMA) selection.

use async_trait::async_trait;
use tracing::{info, warn};
use url::Url;

use super::LbPolicy;
use crate::types::{NodeStatus, TargetsInfo};

/// Prefers a backend that already holds a warm container for the function,
/// breaking ties by available memory; with no warm backend it falls back to
/// the most-available node over the whole set (the cold-start admission
/// path).
pub struct MamaPolicy;

impl MamaPolicy {
    pub fn new() -> Self {
        info!("MamaPolicy created");
        Self
    }
}

impl Default for MamaPolicy {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LbPolicy for MamaPolicy {
    async fn select_target(&self, targets: &TargetsInfo, fun_name: &str) -> Option<Url> {
        let known: Vec<&NodeStatus> = targets.statuses.iter().flatten().collect();
        if known.is_empty() {
            return None;
        }

        let warm: Vec<&NodeStatus> = known
            .iter()
            .copied()
            .filter(|status| {
                status
                    .available_warm_containers
                    .get(fun_name)
                    .is_some_and(|count| *count > 0)
            })
            .collect();

        let selected = if warm.is_empty() {
            max_available_mem(&known)?
        } else {
            max_available_mem(&warm)?
        };

        match Url::parse(&selected.addresses.node_address) {
            Ok(url) => Some(url),
            Err(e) => {
                warn!(
                    address = %selected.addresses.node_address,
                    error = %e,
                    "Selected node reports an unparseable address"
                );
                None
            }
        }
    }
}

/// First node with the greatest available memory, in iteration order.
fn max_available_mem<'a>(statuses: &[&'a NodeStatus]) -> Option<&'a NodeStatus> {
    let mut best = *statuses.first()?;
    for status in &statuses[1..] {
        if status.available_mem_mb > best.available_mem_mb {
            best = status;
        }
    }
    Some(best)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn node(addr: &str, mem: i64, warm: &[(&str, u32)]) -> NodeStatus {
        NodeStatus {
            available_mem_mb: mem,
            max_mem_mb: mem,
            cost_cloud: 1.0,
            addresses: crate::types::NodeAddresses {
                node_address: addr.to_string(),
            },
            available_warm_containers: warm
                .iter()
                .map(|(name, count)| (name.to_string(), *count))
                .collect::<HashMap<_, _>>(),
        }
    }

    fn info(statuses: Vec<Option<NodeStatus>>) -> TargetsInfo {
        let targets = statuses
            .iter()
            .enumerate()
            .map(|(i, _)| Url::parse(&format!("http://10.0.0.{}:2001", i + 1)).unwrap())
            .collect();
        TargetsInfo::with_statuses(targets, statuses)
    }

    #[tokio::test]
    async fn prefers_warm_backend_even_with_less_memory() {
        let targets = info(vec![
            Some(node("http://10.0.0.1:2001", 4096, &[])),
            Some(node("http://10.0.0.2:2001", 1024, &[("resize", 2)])),
        ]);
        let policy = MamaPolicy::new();
        let picked = policy.select_target(&targets, "resize").await.unwrap();
        assert_eq!(picked.as_str(), "http://10.0.0.2:2001/");
    }

    #[tokio::test]
    async fn cold_start_picks_most_available_memory() {
        let targets = info(vec![
            Some(node("http://10.0.0.1:2001", 512, &[])),
            Some(node("http://10.0.0.2:2001", 2048, &[])),
            Some(node("http://10.0.0.3:2001", 1024, &[])),
        ]);
        let policy = MamaPolicy::new();
        let picked = policy.select_target(&targets, "resize").await.unwrap();
        assert_eq!(picked.as_str(), "http://10.0.0.2:2001/");
    }

    #[tokio::test]
    async fn warm_ties_break_by_memory() {
        let targets = info(vec![
            Some(node("http://10.0.0.1:2001", 512, &[("resize", 1)])),
            Some(node("http://10.0.0.2:2001", 2048, &[("resize", 1)])),
        ]);
        let policy = MamaPolicy::new();
        let picked = policy.select_target(&targets, "resize").await.unwrap();
        assert_eq!(picked.as_str(), "http://10.0.0.2:2001/");
    }

    #[tokio::test]
    async fn empty_status_cache_yields_none() {
        let targets = info(vec![None, None]);
        let policy = MamaPolicy::new();
        assert!(policy.select_target(&targets, "resize").await.is_none());
    }

    #[tokio::test]
    async fn zero_warm_count_is_not_warm() {
        let targets = info(vec![
            Some(node("http://10.0.0.1:2001", 512, &[("resize", 0)])),
            Some(node("http://10.0.0.2:2001", 256, &[])),
        ]);
        let policy = MamaPolicy::new();
        // Nobody is warm, so the 512 MB node wins on memory.
        let picked = policy.select_target(&targets, "resize").await.unwrap();
        assert_eq!(picked.as_str(), "http://10.0.0.1:2001/");
    }
}
