//! Weighted round-robin selection.
//!
//! One engine serves both flavours; they differ only in how the per-backend
//! weight is derived from the cached status snapshot:
//!
//! - *memory*: `w = max(1, trunc(MULT · MaxMemMB / min MaxMemMB))` — bigger
//!   nodes absorb proportionally more traffic;
//! - *cost*: `w = max(1, trunc(MULT · max CostCloud / CostCloud))` — cheaper
//!   nodes absorb proportionally more traffic.
//!
//! A backend with a missing or zero measurement gets weight 1, never zero.
//! Weights are fixed at construction; the MAB switch rebuilds the table.

use async_trait::async_trait;
use std::sync::Mutex;
use tracing::info;
use url::Url;

use super::LbPolicy;
use crate::types::TargetsInfo;

const MULT_FACTOR: f64 = 10.0;

struct WeightedServer {
    target: Url,
    weight: u64,
}

struct Cursor {
    index: usize,
    dispensed: Vec<u64>,
    total_dispensed: u64,
}

pub struct WrrPolicy {
    servers: Vec<WeightedServer>,
    total_weight: u64,
    cursor: Mutex<Cursor>,
}

impl WrrPolicy {
    /// Weights proportional to each node's maximum memory.
    pub fn memory_weighted(targets: &TargetsInfo) -> Self {
        let memories: Vec<Option<f64>> = targets
            .statuses
            .iter()
            .map(|s| {
                s.as_ref()
                    .map(|s| s.max_mem_mb as f64)
                    .filter(|mem| *mem > 0.0)
            })
            .collect();
        let min_mem = memories
            .iter()
            .flatten()
            .copied()
            .fold(f64::INFINITY, f64::min);

        let weights = memories
            .iter()
            .map(|mem| match mem {
                Some(mem) if min_mem.is_finite() => scaled_weight(mem / min_mem),
                _ => 1,
            })
            .collect();
        let policy = Self::with_weights(targets, weights);
        info!(total_weight = policy.total_weight, "WrrMemoryPolicy created");
        policy
    }

    /// Weights inversely proportional to each node's unit cost.
    pub fn cost_weighted(targets: &TargetsInfo) -> Self {
        let costs: Vec<Option<f64>> = targets
            .statuses
            .iter()
            .map(|s| {
                s.as_ref()
                    .map(|s| s.cost_cloud)
                    .filter(|cost| *cost > 0.0)
            })
            .collect();
        let max_cost = costs
            .iter()
            .flatten()
            .copied()
            .fold(f64::NEG_INFINITY, f64::max);

        let weights = costs
            .iter()
            .map(|cost| match cost {
                Some(cost) if max_cost.is_finite() => scaled_weight(max_cost / cost),
                _ => 1,
            })
            .collect();
        let policy = Self::with_weights(targets, weights);
        info!(total_weight = policy.total_weight, "WrrCostPolicy created");
        policy
    }

    fn with_weights(targets: &TargetsInfo, weights: Vec<u64>) -> Self {
        let servers: Vec<WeightedServer> = targets
            .targets
            .iter()
            .zip(&weights)
            .map(|(target, weight)| WeightedServer {
                target: target.clone(),
                weight: *weight,
            })
            .collect();
        let total_weight = servers.iter().map(|s| s.weight).sum();
        let dispensed = vec![0; servers.len()];
        Self {
            servers,
            total_weight,
            cursor: Mutex::new(Cursor {
                index: 0,
                dispensed,
                total_dispensed: 0,
            }),
        }
    }

    #[cfg(test)]
    fn weights(&self) -> Vec<u64> {
        self.servers.iter().map(|s| s.weight).collect()
    }
}

fn scaled_weight(ratio: f64) -> u64 {
    ((MULT_FACTOR * ratio).trunc() as u64).max(1)
}

#[async_trait]
impl LbPolicy for WrrPolicy {
    async fn select_target(&self, _targets: &TargetsInfo, _fun_name: &str) -> Option<Url> {
        if self.servers.is_empty() {
            return None;
        }

        let mut cursor = self.cursor.lock().unwrap();
        loop {
            if cursor.total_dispensed == self.total_weight {
                cursor.total_dispensed = 0;
                cursor.dispensed.fill(0);
                cursor.index = 0;
            }
            let index = cursor.index;
            cursor.index = (index + 1) % self.servers.len();
            if cursor.dispensed[index] < self.servers[index].weight {
                cursor.dispensed[index] += 1;
                cursor.total_dispensed += 1;
                return Some(self.servers[index].target.clone());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{NodeAddresses, NodeStatus};
    use std::collections::HashMap;

    fn node(mem: i64, cost: f64) -> NodeStatus {
        NodeStatus {
            available_mem_mb: mem,
            max_mem_mb: mem,
            cost_cloud: cost,
            addresses: NodeAddresses::default(),
            available_warm_containers: HashMap::new(),
        }
    }

    fn info(specs: &[(i64, f64)]) -> TargetsInfo {
        let targets = specs
            .iter()
            .enumerate()
            .map(|(i, _)| Url::parse(&format!("http://10.0.0.{}:2001", i + 1)).unwrap())
            .collect();
        let statuses = specs.iter().map(|(mem, cost)| Some(node(*mem, *cost))).collect();
        TargetsInfo::with_statuses(targets, statuses)
    }

    async fn selection_counts(policy: &WrrPolicy, info: &TargetsInfo, calls: u64) -> Vec<u64> {
        let mut counts = vec![0u64; info.len()];
        for _ in 0..calls {
            let picked = policy.select_target(info, "echo").await.unwrap();
            let idx = info.targets.iter().position(|t| *t == picked).unwrap();
            counts[idx] += 1;
        }
        counts
    }

    #[tokio::test]
    async fn cost_weights_follow_inverse_cost() {
        let info = info(&[(1024, 1.0), (1024, 2.0), (1024, 5.0)]);
        let policy = WrrPolicy::cost_weighted(&info);
        assert_eq!(policy.weights(), vec![50, 25, 10]);

        // Over one full weighted cycle each backend is dispensed exactly its
        // weight.
        let counts = selection_counts(&policy, &info, 85).await;
        assert_eq!(counts, vec![50, 25, 10]);
    }

    #[tokio::test]
    async fn memory_weights_follow_max_memory() {
        let info = info(&[(1024, 1.0), (2048, 1.0), (3072, 1.0)]);
        let policy = WrrPolicy::memory_weighted(&info);
        assert_eq!(policy.weights(), vec![10, 20, 30]);

        let counts = selection_counts(&policy, &info, 60).await;
        assert_eq!(counts, vec![10, 20, 30]);
    }

    #[tokio::test]
    async fn weighted_cycle_repeats() {
        let info = info(&[(1024, 1.0), (1024, 2.0)]);
        let policy = WrrPolicy::cost_weighted(&info);
        assert_eq!(policy.weights(), vec![20, 10]);

        let counts = selection_counts(&policy, &info, 3 * 30).await;
        assert_eq!(counts, vec![60, 30]);
    }

    #[tokio::test]
    async fn missing_or_zero_measurements_default_to_weight_one() {
        let targets = vec![
            Url::parse("http://10.0.0.1:2001").unwrap(),
            Url::parse("http://10.0.0.2:2001").unwrap(),
            Url::parse("http://10.0.0.3:2001").unwrap(),
        ];
        let statuses = vec![Some(node(2048, 2.0)), None, Some(node(0, 0.0))];
        let info = TargetsInfo::with_statuses(targets, statuses);

        let cost = WrrPolicy::cost_weighted(&info);
        assert_eq!(cost.weights(), vec![10, 1, 1]);

        let memory = WrrPolicy::memory_weighted(&info);
        assert_eq!(memory.weights(), vec![10, 1, 1]);
    }

    #[tokio::test]
    async fn empty_target_set_yields_none() {
        let info = TargetsInfo::default();
        let policy = WrrPolicy::cost_weighted(&info);
        assert!(policy.select_target(&info, "echo").await.is_none());
    }
}
