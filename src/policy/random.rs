//! Uniform random target selection.

use async_trait::async_trait;
use rand::Rng;
use tracing::info;
use url::Url;

use super::LbPolicy;
use crate::types::TargetsInfo;

/// Picks a target uniformly at random. Stateless.
pub struct RandomPolicy;

impl RandomPolicy {
    pub fn new() -> Self {
        info!("RandomPolicy created");
        Self
    }
}

impl Default for RandomPolicy {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LbPolicy for RandomPolicy {
    async fn select_target(&self, targets: &TargetsInfo, _fun_name: &str) -> Option<Url> {
        if targets.is_empty() {
            return None;
        }
        let idx = rand::rng().random_range(0..targets.len());
        Some(targets.targets[idx].clone())
    }
}
