//! Consistent hashing with capacity overflow.
//!
//! Backends are placed on a ring keyed by `hash64(host:port)`; a function
//! name hashes to a point on the ring and is served by the first backend at
//! or after that point that can actually take it — a warm container for the
//! function, or enough free memory to cold-start it. Only when a full
//! revolution finds no capacity does the name fall back to its primary
//! backend.

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tracing::{debug, info};
use url::Url;

use super::LbPolicy;
use crate::registry::FunctionLookup;
use crate::types::{Function, NodeStatus, TargetsInfo, backend_key};

struct RingEntry {
    key: u64,
    target: Url,
}

pub struct ConstHashPolicy {
    ring: Vec<RingEntry>,
    functions: Arc<dyn FunctionLookup>,
}

impl ConstHashPolicy {
    /// Build the ring from the current target set. The ring is immutable for
    /// the lifetime of the policy; a target change rebuilds the policy.
    pub fn new(targets: &TargetsInfo, functions: Arc<dyn FunctionLookup>) -> Self {
        let mut ring: Vec<RingEntry> = targets
            .targets
            .iter()
            .map(|target| RingEntry {
                key: hash64(&host_port(target)),
                target: target.clone(),
            })
            .collect();
        ring.sort_by_key(|entry| entry.key);
        info!(ring_size = ring.len(), "ConstHashPolicy created");
        Self { ring, functions }
    }

    /// Walk the ring clockwise from the primary position, returning the
    /// first backend with capacity for `function`, or the primary itself
    /// after a fruitless full revolution. `None` while any status snapshot
    /// is missing (the policy is not ready yet).
    fn walk(&self, targets: &TargetsInfo, function: &Function, start: usize) -> Option<Url> {
        let mut statuses: Vec<&NodeStatus> = Vec::with_capacity(self.ring.len());
        for entry in &self.ring {
            let idx = targets
                .targets
                .iter()
                .position(|t| backend_key(t) == backend_key(&entry.target))?;
            statuses.push(targets.statuses[idx].as_ref()?);
        }

        for offset in 0..self.ring.len() {
            let pos = (start + offset) % self.ring.len();
            let status = statuses[pos];
            let warm = status
                .available_warm_containers
                .get(&function.name)
                .is_some_and(|count| *count > 0);
            if warm || status.available_mem_mb > function.memory_mb {
                return Some(self.ring[pos].target.clone());
            }
        }
        debug!(function = %function.name, "No backend with capacity; using primary");
        Some(self.ring[start].target.clone())
    }
}

#[async_trait]
impl LbPolicy for ConstHashPolicy {
    async fn select_target(&self, targets: &TargetsInfo, fun_name: &str) -> Option<Url> {
        if self.ring.is_empty() {
            return None;
        }
        let function = self.functions.get_function(fun_name).await?;

        let key = hash64(&function.name);
        // Smallest ring key strictly greater than the name's key; wraps to
        // entry 0 past the end.
        let primary = self
            .ring
            .partition_point(|entry| entry.key <= key)
            % self.ring.len();

        self.walk(targets, &function, primary)
    }
}

/// Big-endian integer of the first 8 bytes of SHA-256.
fn hash64(key: &str) -> u64 {
    let digest = Sha256::digest(key.as_bytes());
    let mut prefix = [0u8; 8];
    prefix.copy_from_slice(&digest[..8]);
    u64::from_be_bytes(prefix)
}

fn host_port(target: &Url) -> String {
    format!(
        "{}:{}",
        target.host_str().unwrap_or_default(),
        target.port_or_known_default().unwrap_or_default()
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::NodeAddresses;
    use std::collections::HashMap;

    struct StaticFunctions(HashMap<String, Function>);

    #[async_trait]
    impl FunctionLookup for StaticFunctions {
        async fn get_function(&self, name: &str) -> Option<Function> {
            self.0.get(name).cloned()
        }
    }

    fn functions(entries: &[(&str, i64)]) -> Arc<dyn FunctionLookup> {
        Arc::new(StaticFunctions(
            entries
                .iter()
                .map(|(name, mem)| {
                    (
                        name.to_string(),
                        Function {
                            name: name.to_string(),
                            memory_mb: *mem,
                        },
                    )
                })
                .collect(),
        ))
    }

    fn node(mem: i64, warm: &[(&str, u32)]) -> NodeStatus {
        NodeStatus {
            available_mem_mb: mem,
            max_mem_mb: mem,
            cost_cloud: 1.0,
            addresses: NodeAddresses::default(),
            available_warm_containers: warm
                .iter()
                .map(|(name, count)| (name.to_string(), *count))
                .collect(),
        }
    }

    fn info(urls: &[&str], statuses: Vec<Option<NodeStatus>>) -> TargetsInfo {
        TargetsInfo::with_statuses(
            urls.iter().map(|u| Url::parse(u).unwrap()).collect(),
            statuses,
        )
    }

    #[test]
    fn hash64_is_big_endian_sha256_prefix() {
        // First 8 bytes of SHA-256("") are e3 b0 c4 42 98 fc 1c 14.
        assert_eq!(hash64(""), 0xe3b0_c442_98fc_1c14);
    }

    #[tokio::test]
    async fn names_map_deterministically() {
        let info = info(
            &["http://1.2.3.4:8", "http://1.2.3.5:8"],
            vec![Some(node(2048, &[])), Some(node(2048, &[]))],
        );
        let names: Vec<String> = (0..100).map(|i| format!("fun-{i}")).collect();
        let table: Vec<(&str, i64)> = names.iter().map(|n| (n.as_str(), 128)).collect();
        let policy = ConstHashPolicy::new(&info, functions(&table));

        for name in &names {
            let first = policy.select_target(&info, name).await.unwrap();
            for _ in 0..10 {
                let again = policy.select_target(&info, name).await.unwrap();
                assert_eq!(first, again, "unstable mapping for {name}");
            }
        }
    }

    #[tokio::test]
    async fn unknown_function_yields_none() {
        let info = info(&["http://1.2.3.4:8"], vec![Some(node(2048, &[]))]);
        let policy = ConstHashPolicy::new(&info, functions(&[]));
        assert!(policy.select_target(&info, "ghost").await.is_none());
    }

    #[tokio::test]
    async fn missing_status_means_not_ready() {
        let info = info(
            &["http://1.2.3.4:8", "http://1.2.3.5:8"],
            vec![Some(node(2048, &[])), None],
        );
        let policy = ConstHashPolicy::new(&info, functions(&[("echo", 128)]));
        assert!(policy.select_target(&info, "echo").await.is_none());
    }

    #[tokio::test]
    async fn overflows_past_full_backend() {
        let urls = ["http://1.2.3.4:8", "http://1.2.3.5:8"];
        let open = info(
            &urls,
            vec![Some(node(2048, &[])), Some(node(2048, &[]))],
        );
        let policy = ConstHashPolicy::new(&open, functions(&[("echo", 128)]));
        let primary = policy.select_target(&open, "echo").await.unwrap();

        // Exhaust the primary: no warm containers, no memory headroom.
        let statuses: Vec<Option<NodeStatus>> = urls
            .iter()
            .map(|u| {
                if Url::parse(u).unwrap() == primary {
                    Some(node(64, &[]))
                } else {
                    Some(node(2048, &[]))
                }
            })
            .collect();
        let constrained = info(&urls, statuses);
        let picked = policy.select_target(&constrained, "echo").await.unwrap();
        assert_ne!(picked, primary);
    }

    #[tokio::test]
    async fn full_revolution_falls_back_to_primary() {
        let urls = ["http://1.2.3.4:8", "http://1.2.3.5:8"];
        let open = info(&urls, vec![Some(node(2048, &[])), Some(node(2048, &[]))]);
        let policy = ConstHashPolicy::new(&open, functions(&[("echo", 128)]));
        let primary = policy.select_target(&open, "echo").await.unwrap();

        let full = info(&urls, vec![Some(node(0, &[])), Some(node(0, &[]))]);
        let picked = policy.select_target(&full, "echo").await.unwrap();
        assert_eq!(picked, primary);
    }

    #[tokio::test]
    async fn warm_container_beats_memory_check() {
        let urls = ["http://1.2.3.4:8", "http://1.2.3.5:8"];
        // No memory headroom anywhere, but one backend is warm for "echo".
        let statuses = vec![
            Some(node(0, &[])),
            Some(node(0, &[("echo", 1)])),
        ];
        let open = info(&urls, statuses);
        let policy = ConstHashPolicy::new(&open, functions(&[("echo", 128)]));
        let picked = policy.select_target(&open, "echo").await.unwrap();
        assert_eq!(picked.as_str(), "http://1.2.3.5:8/");
    }
}
