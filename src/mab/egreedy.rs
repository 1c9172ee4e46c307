//! Epsilon-Greedy strategy.

use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::debug;

use super::reward::{RewardConfig, calculate_reward};
use super::{PolicyEstimates, SelectionStrategy};
use crate::stats::Stats;
use crate::telemetry::InfluxWriter;
use crate::types::PolicyId;

/// With probability ε pick a uniformly random policy; otherwise exploit the
/// policy with the best mean reward so far. An unplayed policy counts as
/// mean 0, which dominates the (non-positive) rewards, so every arm gets
/// tried early on.
pub struct EpsilonGreedy {
    epsilon: f64,
    policies: Vec<PolicyId>,
    estimates: PolicyEstimates,
    rng: StdRng,
    reward_config: RewardConfig,
    telemetry: InfluxWriter,
}

impl EpsilonGreedy {
    pub fn new(
        epsilon: f64,
        policies: Vec<PolicyId>,
        reward_config: RewardConfig,
        telemetry: InfluxWriter,
    ) -> Self {
        Self {
            epsilon,
            policies,
            estimates: PolicyEstimates::new(),
            rng: StdRng::from_os_rng(),
            reward_config,
            telemetry,
        }
    }

    /// Deterministic exploration draws, for tests.
    pub fn with_seed(
        epsilon: f64,
        policies: Vec<PolicyId>,
        reward_config: RewardConfig,
        telemetry: InfluxWriter,
        seed: u64,
    ) -> Self {
        let mut strategy = Self::new(epsilon, policies, reward_config, telemetry);
        strategy.rng = StdRng::seed_from_u64(seed);
        strategy
    }
}

#[async_trait]
impl SelectionStrategy for EpsilonGreedy {
    async fn update(&mut self, new_stats: &Stats, old_stats: &Stats) {
        let policy = new_stats.lb_policy;
        let reward = calculate_reward(&self.reward_config, new_stats, old_stats);
        self.estimates.record(policy, reward);
        debug!(%policy, reward, "Epsilon-Greedy updated");

        self.telemetry.record_tick(new_stats, old_stats, reward).await;
    }

    fn select_policy(&mut self) -> PolicyId {
        if self.rng.random::<f64>() < self.epsilon {
            return self.policies[self.rng.random_range(0..self.policies.len())];
        }

        let mut best_policy = self.policies[0];
        let mut best_reward = f64::NEG_INFINITY;
        for &policy in &self.policies {
            let reward = self.estimates.reward(policy).unwrap_or(0.0);
            if reward > best_reward {
                best_policy = policy;
                best_reward = reward;
            }
        }
        best_policy
    }
}
