//! UCB1 with a one-shot estimate reset.

use async_trait::async_trait;
use tracing::{debug, info};

use super::reward::{RewardConfig, calculate_reward};
use super::{PolicyEstimates, SelectionStrategy};
use crate::stats::Stats;
use crate::telemetry::InfluxWriter;
use crate::types::PolicyId;

const POST_RESET_EXPLORATION_FACTOR: f64 = 0.03;

/// Plain UCB1 until `reset_interval` updates have been seen, then the
/// estimates are wiped and the knobs shift toward exploitation: the
/// exploration factor drops to 0.03 and the reward re-weights to pure
/// response time (β = 1, γ = 0). The update counter itself keeps running,
/// so the reset fires exactly once. A `reset_interval` of 0 disables it.
pub struct ResetUcb {
    reset_interval: u64,
    exploration_factor: f64,
    policies: Vec<PolicyId>,
    estimates: PolicyEstimates,
    reset_counter: u64,
    reward_config: RewardConfig,
    telemetry: InfluxWriter,
}

impl ResetUcb {
    pub fn new(
        reset_interval: u64,
        exploration_factor: f64,
        policies: Vec<PolicyId>,
        reward_config: RewardConfig,
        telemetry: InfluxWriter,
    ) -> Self {
        Self {
            reset_interval,
            exploration_factor,
            policies,
            estimates: PolicyEstimates::new(),
            reset_counter: 0,
            reward_config,
            telemetry,
        }
    }

    fn reset(&mut self) {
        info!(after_updates = self.reset_counter, "ResetUCB resetting estimates");
        self.estimates.clear();
        self.exploration_factor = POST_RESET_EXPLORATION_FACTOR;
        self.reward_config.beta = 1.0;
        self.reward_config.gamma = 0.0;
    }
}

#[async_trait]
impl SelectionStrategy for ResetUcb {
    async fn update(&mut self, new_stats: &Stats, old_stats: &Stats) {
        let policy = new_stats.lb_policy;
        let reward = calculate_reward(&self.reward_config, new_stats, old_stats);
        self.estimates.record(policy, reward);
        self.reset_counter += 1;
        debug!(%policy, reward, counter = self.reset_counter, "ResetUCB updated");

        self.telemetry.record_tick(new_stats, old_stats, reward).await;

        if self.reset_interval > 0 && self.reset_counter == self.reset_interval {
            self.reset();
        }
    }

    fn select_policy(&mut self) -> PolicyId {
        self.estimates
            .ucb1_select(&self.policies, self.exploration_factor)
    }
}
