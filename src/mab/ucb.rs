//! UCB1 strategy.

use async_trait::async_trait;
use tracing::debug;

use super::reward::{RewardConfig, calculate_reward};
use super::{PolicyEstimates, SelectionStrategy};
use crate::stats::Stats;
use crate::telemetry::InfluxWriter;
use crate::types::PolicyId;

/// Upper Confidence Bound: exploit the best mean reward, padded with an
/// exploration bonus `c·√(2 ln T / n)` that shrinks as an arm accumulates
/// plays.
pub struct Ucb {
    exploration_factor: f64,
    policies: Vec<PolicyId>,
    estimates: PolicyEstimates,
    reward_config: RewardConfig,
    telemetry: InfluxWriter,
}

impl Ucb {
    pub fn new(
        exploration_factor: f64,
        policies: Vec<PolicyId>,
        reward_config: RewardConfig,
        telemetry: InfluxWriter,
    ) -> Self {
        Self {
            exploration_factor,
            policies,
            estimates: PolicyEstimates::new(),
            reward_config,
            telemetry,
        }
    }
}

#[async_trait]
impl SelectionStrategy for Ucb {
    async fn update(&mut self, new_stats: &Stats, old_stats: &Stats) {
        let policy = new_stats.lb_policy;
        let reward = calculate_reward(&self.reward_config, new_stats, old_stats);
        self.estimates.record(policy, reward);
        debug!(%policy, reward, total_plays = self.estimates.total_plays(), "UCB updated");

        self.telemetry.record_tick(new_stats, old_stats, reward).await;
    }

    fn select_policy(&mut self) -> PolicyId {
        self.estimates
            .ucb1_select(&self.policies, self.exploration_factor)
    }
}
