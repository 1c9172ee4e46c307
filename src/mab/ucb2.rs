//! UCB2 strategy (epoch-locked UCB).

use async_trait::async_trait;
use std::collections::HashMap;
use tracing::{debug, info};

use super::reward::{RewardConfig, calculate_reward};
use super::{PolicyEstimates, SelectionStrategy};
use crate::stats::Stats;
use crate::telemetry::InfluxWriter;
use crate::types::PolicyId;

/// UCB2 plays arms in epochs: once an arm is selected it stays locked for
/// `max(1, τ(r+1) − τ(r))` subsequent selections, where `τ(r) = ⌈(1+α)^r⌉`
/// and `r` counts the epochs the arm has started. Locking amortises the
/// exploration bookkeeping and gives each arm contiguous runs.
pub struct Ucb2 {
    exploration_factor: f64,
    alpha: f64,
    policies: Vec<PolicyId>,
    estimates: PolicyEstimates,
    /// Epoch count `r` per policy.
    epochs: HashMap<PolicyId, u64>,
    locked_policy: Option<PolicyId>,
    remaining_locked_plays: u64,
    reward_config: RewardConfig,
    telemetry: InfluxWriter,
}

impl Ucb2 {
    pub fn new(
        exploration_factor: f64,
        alpha: f64,
        policies: Vec<PolicyId>,
        reward_config: RewardConfig,
        telemetry: InfluxWriter,
    ) -> Self {
        Self {
            exploration_factor,
            alpha,
            policies,
            estimates: PolicyEstimates::new(),
            epochs: HashMap::new(),
            locked_policy: None,
            remaining_locked_plays: 0,
            reward_config,
            telemetry,
        }
    }

    fn tau(&self, r: u64) -> f64 {
        (1.0 + self.alpha).powf(r as f64).ceil()
    }

    fn epoch(&self, policy: PolicyId) -> u64 {
        self.epochs.get(&policy).copied().unwrap_or(0)
    }
}

#[async_trait]
impl SelectionStrategy for Ucb2 {
    async fn update(&mut self, new_stats: &Stats, old_stats: &Stats) {
        let policy = new_stats.lb_policy;
        let reward = calculate_reward(&self.reward_config, new_stats, old_stats);
        self.estimates.record(policy, reward);
        debug!(%policy, reward, "UCB2 updated");

        self.telemetry.record_tick(new_stats, old_stats, reward).await;
    }

    fn select_policy(&mut self) -> PolicyId {
        // Honour an open epoch before recomputing anything.
        if self.remaining_locked_plays > 0
            && let Some(locked) = self.locked_policy
        {
            self.remaining_locked_plays -= 1;
            debug!(
                policy = %locked,
                remaining = self.remaining_locked_plays,
                "UCB2 selection locked"
            );
            return locked;
        }

        let mut best_policy = None;
        let mut best_value = f64::NEG_INFINITY;
        for &policy in &self.policies {
            let Some(mean) = self.estimates.reward(policy) else {
                // Init step: play every arm once before opening epochs.
                return policy;
            };

            let n = self.estimates.plays(policy) as f64;
            let tau_r = self.tau(self.epoch(policy));
            let bonus = self.exploration_factor
                * (((1.0 + self.alpha) * (std::f64::consts::E * n / tau_r)) / (2.0 * tau_r))
                    .sqrt();
            let value = mean + bonus;
            if value > best_value {
                best_policy = Some(policy);
                best_value = value;
            }
        }
        let best_policy = best_policy.unwrap_or(self.policies[0]);

        // Open an epoch: lock the winner for max(1, τ(r+1) − τ(r)) plays.
        let r = self.epoch(best_policy);
        let lock_span = self.tau(r + 1) - self.tau(r);
        if lock_span < 0.0 {
            panic!("UCB2 computed a negative lock length: {lock_span}");
        }
        // This selection counts as the first locked play.
        self.remaining_locked_plays = (lock_span.max(1.0) as u64) - 1;
        self.locked_policy = Some(best_policy);
        *self.epochs.entry(best_policy).or_insert(0) += 1;
        info!(
            policy = %best_policy,
            epoch = self.epochs[&best_policy],
            plays = self.remaining_locked_plays + 1,
            "UCB2 starting epoch"
        );

        best_policy
    }
}
