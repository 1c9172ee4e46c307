//! Sliding-window UCB.

use async_trait::async_trait;
use std::collections::VecDeque;
use tracing::debug;

use super::reward::{RewardConfig, calculate_reward};
use super::{PolicyEstimates, SelectionStrategy};
use crate::stats::Stats;
use crate::telemetry::InfluxWriter;
use crate::types::PolicyId;

/// UCB1 computed over only the last `window_size` observations. When the
/// window is full the oldest (policy, reward) pair is evicted and its
/// contribution removed from that policy's play count and running mean, so
/// estimates track the recent regime instead of the whole history.
pub struct SlidingWindowUcb {
    window_size: usize,
    exploration_factor: f64,
    policies: Vec<PolicyId>,
    estimates: PolicyEstimates,
    history: VecDeque<(PolicyId, f64)>,
    reward_config: RewardConfig,
    telemetry: InfluxWriter,
}

impl SlidingWindowUcb {
    pub fn new(
        window_size: usize,
        exploration_factor: f64,
        policies: Vec<PolicyId>,
        reward_config: RewardConfig,
        telemetry: InfluxWriter,
    ) -> Self {
        Self {
            window_size,
            exploration_factor,
            policies,
            estimates: PolicyEstimates::new(),
            history: VecDeque::with_capacity(window_size),
            reward_config,
            telemetry,
        }
    }
}

#[async_trait]
impl SelectionStrategy for SlidingWindowUcb {
    async fn update(&mut self, new_stats: &Stats, old_stats: &Stats) {
        let policy = new_stats.lb_policy;
        let reward = calculate_reward(&self.reward_config, new_stats, old_stats);

        if self.history.len() == self.window_size
            && let Some((evicted_policy, evicted_reward)) = self.history.pop_front()
        {
            self.estimates.unrecord(evicted_policy, evicted_reward);
        }
        self.history.push_back((policy, reward));
        self.estimates.record(policy, reward);
        debug!(
            %policy,
            reward,
            window = self.history.len(),
            "SWUCB updated"
        );

        self.telemetry.record_tick(new_stats, old_stats, reward).await;
    }

    fn select_policy(&mut self) -> PolicyId {
        self.estimates
            .ucb1_select(&self.policies, self.exploration_factor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn observe(strategy: &mut SlidingWindowUcb, policy: PolicyId, resp_time: f64) {
        let old_stats = Stats::new(policy, &[]);
        let mut new_stats = old_stats.clone();
        new_stats.completions = 1;
        new_stats.resp_time = resp_time;
        strategy.update(&new_stats, &old_stats).await;
    }

    fn new_strategy(window_size: usize) -> SlidingWindowUcb {
        let reward_config = RewardConfig {
            beta: 1.0,
            ..Default::default()
        };
        SlidingWindowUcb::new(
            window_size,
            0.05,
            vec![PolicyId::Random, PolicyId::RoundRobin],
            reward_config,
            InfluxWriter::disabled(),
        )
    }

    #[tokio::test]
    async fn window_bounds_total_plays() {
        let mut strategy = new_strategy(4);
        for i in 0..10 {
            let policy = if i % 2 == 0 {
                PolicyId::Random
            } else {
                PolicyId::RoundRobin
            };
            observe(&mut strategy, policy, 0.3).await;
            assert_eq!(
                strategy.estimates.total_plays(),
                std::cmp::min(i + 1, 4) as u64
            );
        }
        assert_eq!(strategy.history.len(), 4);
    }

    #[tokio::test]
    async fn eviction_removes_old_regime() {
        let mut strategy = new_strategy(3);
        // Random starts out terrible...
        observe(&mut strategy, PolicyId::Random, 0.9).await;
        observe(&mut strategy, PolicyId::Random, 0.9).await;
        observe(&mut strategy, PolicyId::Random, 0.9).await;
        // ...then recovers; the window forgets the bad phase entirely.
        observe(&mut strategy, PolicyId::Random, 0.1).await;
        observe(&mut strategy, PolicyId::Random, 0.1).await;
        observe(&mut strategy, PolicyId::Random, 0.1).await;

        let mean = strategy.estimates.reward(PolicyId::Random).unwrap();
        assert!((mean - (-0.1)).abs() < 1e-9);
    }

    #[tokio::test]
    async fn fully_evicted_policy_reads_as_unplayed() {
        let mut strategy = new_strategy(2);
        observe(&mut strategy, PolicyId::Random, 0.9).await;
        observe(&mut strategy, PolicyId::RoundRobin, 0.3).await;
        observe(&mut strategy, PolicyId::RoundRobin, 0.3).await;

        // Random's only observation slid out of the window.
        assert_eq!(strategy.estimates.plays(PolicyId::Random), 0);
        assert!(strategy.estimates.reward(PolicyId::Random).is_none());
        // The explore-first rule kicks back in for it.
        assert_eq!(strategy.select_policy(), PolicyId::Random);
    }
}
