//! UCB-Tuned strategy (variance-aware UCB).

use async_trait::async_trait;
use std::collections::HashMap;
use tracing::debug;

use super::reward::{RewardConfig, calculate_reward};
use super::{PolicyEstimates, SelectionStrategy};
use crate::stats::Stats;
use crate::telemetry::InfluxWriter;
use crate::types::PolicyId;

/// UCB1 with the constant 2 in the bonus replaced by an empirical variance
/// estimate, capped at 1/4 (the maximum variance of a bounded reward):
/// `c·√((ln T / n)·min(1/4, s² + √(2 ln T / n)))`. Low-variance arms get a
/// tighter bonus and are abandoned sooner when they underperform.
pub struct UcbTuned {
    exploration_factor: f64,
    policies: Vec<PolicyId>,
    estimates: PolicyEstimates,
    /// Sum of squared deviations per policy (Welford's M2).
    m2: HashMap<PolicyId, f64>,
    reward_config: RewardConfig,
    telemetry: InfluxWriter,
}

impl UcbTuned {
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
            m2: HashMap::new(),
            reward_config,
            telemetry,
        }
    }

    /// Variance-based exploration term `s² + √(2 ln T / n)`.
    fn variance_bound(&self, policy: PolicyId) -> f64 {
        let n = self.estimates.plays(policy) as f64;
        let t = self.estimates.total_plays() as f64;
        let variance = self.m2.get(&policy).copied().unwrap_or(0.0) / n;
        variance + (2.0 * t.ln() / n).sqrt()
    }
}

#[async_trait]
impl SelectionStrategy for UcbTuned {
    async fn update(&mut self, new_stats: &Stats, old_stats: &Stats) {
        let policy = new_stats.lb_policy;
        let reward = calculate_reward(&self.reward_config, new_stats, old_stats);
        let (delta_before, delta_after) = self.estimates.record(policy, reward);
        *self.m2.entry(policy).or_insert(0.0) += delta_before * delta_after;
        debug!(%policy, reward, "UCBTuned updated");

        self.telemetry.record_tick(new_stats, old_stats, reward).await;
    }

    fn select_policy(&mut self) -> PolicyId {
        let mut best_policy = self.policies[0];
        let mut best_value = f64::NEG_INFINITY;

        for &policy in &self.policies {
            let Some(mean) = self.estimates.reward(policy) else {
                return policy;
            };
            let n = self.estimates.plays(policy) as f64;
            let t = self.estimates.total_plays() as f64;
            let bonus = self.exploration_factor
                * ((t.ln() / n) * f64::min(0.25, self.variance_bound(policy))).sqrt();
            let value = mean + bonus;
            if value > best_value {
                best_policy = policy;
                best_value = value;
            }
        }
        best_policy
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn observe(strategy: &mut UcbTuned, policy: PolicyId, resp_time: f64) {
        let old_stats = Stats::new(policy, &[]);
        let mut new_stats = old_stats.clone();
        new_stats.completions = 1;
        new_stats.resp_time = resp_time;
        strategy.update(&new_stats, &old_stats).await;
    }

    fn new_strategy() -> UcbTuned {
        let reward_config = RewardConfig {
            beta: 1.0,
            ..Default::default()
        };
        UcbTuned::new(
            0.05,
            vec![PolicyId::Random, PolicyId::RoundRobin],
            reward_config,
            InfluxWriter::disabled(),
        )
    }

    #[tokio::test]
    async fn m2_tracks_sum_of_squared_deviations() {
        let mut strategy = new_strategy();
        // Rewards -0.2, -0.4, -0.6: mean -0.4, M2 = 0.08.
        for resp_time in [0.2, 0.4, 0.6] {
            observe(&mut strategy, PolicyId::Random, resp_time).await;
        }
        let mean = strategy.estimates.reward(PolicyId::Random).unwrap();
        assert!((mean - (-0.4)).abs() < 1e-9);
        assert!((strategy.m2[&PolicyId::Random] - 0.08).abs() < 1e-9);
    }

    #[tokio::test]
    async fn unplayed_policy_is_selected_first() {
        let mut strategy = new_strategy();
        observe(&mut strategy, PolicyId::Random, 0.1).await;
        assert_eq!(strategy.select_policy(), PolicyId::RoundRobin);
    }

    #[tokio::test]
    async fn converges_to_better_arm() {
        let mut strategy = new_strategy();
        for _ in 0..40 {
            observe(&mut strategy, PolicyId::Random, 0.7).await;
            observe(&mut strategy, PolicyId::RoundRobin, 0.2).await;
        }
        assert_eq!(strategy.select_policy(), PolicyId::RoundRobin);
    }
}
