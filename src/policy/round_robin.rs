//! Round-robin target selection.

use async_trait::async_trait;
use std::sync::Mutex;
use tracing::info;
use url::Url;

use super::LbPolicy;
use crate::types::TargetsInfo;

/// Cycles through the target list in order. The cursor is folded into the
/// current list length on every call, so a target set that shrinks between
/// calls restarts cleanly instead of indexing out of bounds.
pub struct RoundRobinPolicy {
    index: Mutex<usize>,
}

impl RoundRobinPolicy {
    pub fn new() -> Self {
        info!("RoundRobinPolicy created");
        Self {
            index: Mutex::new(0),
        }
    }
}

impl Default for RoundRobinPolicy {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LbPolicy for RoundRobinPolicy {
    async fn select_target(&self, targets: &TargetsInfo, _fun_name: &str) -> Option<Url> {
        if targets.is_empty() {
            return None;
        }
        let mut index = self.index.lock().unwrap();
        let picked = *index % targets.len();
        *index = picked + 1;
        Some(targets.targets[picked].clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn targets(n: usize) -> TargetsInfo {
        TargetsInfo::new(
            (0..n)
                .map(|i| Url::parse(&format!("http://10.0.0.{}:2001", i + 1)).unwrap())
                .collect(),
        )
    }

    #[tokio::test]
    async fn cycles_evenly_over_stable_set() {
        let policy = RoundRobinPolicy::new();
        let info = targets(3);

        let mut counts = [0u32; 3];
        for _ in 0..3 * 40 {
            let picked = policy.select_target(&info, "echo").await.unwrap();
            let idx = info.targets.iter().position(|t| *t == picked).unwrap();
            counts[idx] += 1;
        }
        assert_eq!(counts, [40, 40, 40]);
    }

    #[tokio::test]
    async fn tolerates_shrinking_target_set() {
        let policy = RoundRobinPolicy::new();
        let three = targets(3);
        let two = targets(2);

        let mut counts = std::collections::HashMap::<String, u32>::new();
        for _ in 0..300 {
            let picked = policy.select_target(&three, "echo").await.unwrap();
            *counts.entry(picked.to_string()).or_default() += 1;
        }
        for _ in 0..200 {
            let picked = policy.select_target(&two, "echo").await.unwrap();
            *counts.entry(picked.to_string()).or_default() += 1;
        }

        assert_eq!(counts[&three.targets[0].to_string()], 200);
        assert_eq!(counts[&three.targets[1].to_string()], 200);
        assert_eq!(counts[&three.targets[2].to_string()], 100);
    }

    #[tokio::test]
    async fn empty_target_set_yields_none() {
        let policy = RoundRobinPolicy::new();
        assert!(policy.select_target(&targets(0), "echo").await.is_none());
    }
}
