//! KL-UCB strategy.

use async_trait::async_trait;
use tracing::debug;

use super::reward::{RewardConfig, calculate_reward};
use super::{PolicyEstimates, SelectionStrategy};
use crate::stats::Stats;
use crate::telemetry::InfluxWriter;
use crate::types::PolicyId;

const BISECTION_TOLERANCE: f64 = 1e-6;

/// KL-UCB scores each arm with the largest plausible mean `q` whose
/// Bernoulli KL divergence from the observed mean stays within the
/// exploration budget `(ln T + c·ln ln T) / n`, found by bisection. Rewards
/// live in `[-1, 0]`, so means are shifted by +1 into the Bernoulli domain
/// before the divergence is evaluated.
pub struct KlUcb {
    c: f64,
    policies: Vec<PolicyId>,
    estimates: PolicyEstimates,
    reward_config: RewardConfig,
    telemetry: InfluxWriter,
}

impl KlUcb {
    pub fn new(
        c: f64,
        policies: Vec<PolicyId>,
        reward_config: RewardConfig,
        telemetry: InfluxWriter,
    ) -> Self {
        Self {
            c,
            policies,
            estimates: PolicyEstimates::new(),
            reward_config,
            telemetry,
        }
    }

    /// Largest `q` in `(p, 1]` with `KL(p, q)` within this arm's budget.
    fn upper_confidence(&self, policy: PolicyId) -> f64 {
        let t = self.estimates.total_plays() as f64;
        let n = self.estimates.plays(policy) as f64;
        let shifted_mean = self.estimates.reward(policy).unwrap_or(0.0) + 1.0;
        let budget = (t.ln() + self.c * t.ln().ln()) / n;

        let mut lower = shifted_mean;
        let mut upper = 1.0;
        while upper - lower > BISECTION_TOLERANCE {
            let q = (upper + lower) / 2.0;
            if kl_divergence(shifted_mean, q) <= budget {
                lower = q;
            } else {
                upper = q;
            }
        }
        (upper + lower) / 2.0
    }
}

/// Bernoulli KL divergence, with the conventions `KL(p, p) = 0` and
/// `KL(·, 0) = KL(·, 1) = +∞`.
fn kl_divergence(p: f64, q: f64) -> f64 {
    if p == q {
        return 0.0;
    }
    if q == 0.0 || q == 1.0 {
        return f64::MAX;
    }
    let mut divergence = 0.0;
    if p > 0.0 {
        divergence += p * (p / q).ln();
    }
    if p < 1.0 {
        divergence += (1.0 - p) * ((1.0 - p) / (1.0 - q)).ln();
    }
    divergence
}

#[async_trait]
impl SelectionStrategy for KlUcb {
    async fn update(&mut self, new_stats: &Stats, old_stats: &Stats) {
        let policy = new_stats.lb_policy;
        let reward = calculate_reward(&self.reward_config, new_stats, old_stats);
        self.estimates.record(policy, reward);
        debug!(%policy, reward, "KL-UCB updated");

        self.telemetry.record_tick(new_stats, old_stats, reward).await;
    }

    fn select_policy(&mut self) -> PolicyId {
        let mut best_policy = self.policies[0];
        let mut best_value = f64::NEG_INFINITY;

        for &policy in &self.policies {
            if self.estimates.reward(policy).is_none() {
                return policy;
            }
            let value = self.upper_confidence(policy);
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

    async fn observe(strategy: &mut KlUcb, policy: PolicyId, resp_time: f64) {
        let old_stats = Stats::new(policy, &[]);
        let mut new_stats = old_stats.clone();
        new_stats.completions = 1;
        new_stats.resp_time = resp_time;
        strategy.update(&new_stats, &old_stats).await;
    }

    fn new_strategy() -> KlUcb {
        let reward_config = RewardConfig {
            beta: 1.0,
            ..Default::default()
        };
        KlUcb::new(
            3.0,
            vec![PolicyId::Random, PolicyId::RoundRobin],
            reward_config,
            InfluxWriter::disabled(),
        )
    }

    #[test]
    fn kl_divergence_conventions() {
        assert_eq!(kl_divergence(0.5, 0.5), 0.0);
        assert_eq!(kl_divergence(0.5, 0.0), f64::MAX);
        assert_eq!(kl_divergence(0.5, 1.0), f64::MAX);
        // KL(0.5, 0.75) = 0.5 ln(2/3) + 0.5 ln 2.
        let expected = 0.5 * (0.5f64 / 0.75).ln() + 0.5 * (0.5f64 / 0.25).ln();
        assert!((kl_divergence(0.5, 0.75) - expected).abs() < 1e-12);
    }

    #[test]
    fn kl_divergence_grows_with_distance() {
        assert!(kl_divergence(0.3, 0.6) < kl_divergence(0.3, 0.9));
    }

    #[tokio::test]
    async fn upper_confidence_stays_in_unit_interval_and_above_mean() {
        let mut strategy = new_strategy();
        for _ in 0..5 {
            observe(&mut strategy, PolicyId::Random, 0.4).await;
            observe(&mut strategy, PolicyId::RoundRobin, 0.6).await;
        }
        for policy in [PolicyId::Random, PolicyId::RoundRobin] {
            let q = strategy.upper_confidence(policy);
            let shifted = strategy.estimates.reward(policy).unwrap() + 1.0;
            assert!(q >= shifted - BISECTION_TOLERANCE);
            assert!(q <= 1.0);
        }
    }

    #[tokio::test]
    async fn unplayed_policy_is_selected_first() {
        let mut strategy = new_strategy();
        observe(&mut strategy, PolicyId::Random, 0.1).await;
        assert_eq!(strategy.select_policy(), PolicyId::RoundRobin);
    }

    #[tokio::test]
    async fn prefers_arm_with_better_mean_after_many_plays() {
        let mut strategy = new_strategy();
        for _ in 0..50 {
            observe(&mut strategy, PolicyId::Random, 0.8).await;
            observe(&mut strategy, PolicyId::RoundRobin, 0.2).await;
        }
        assert_eq!(strategy.select_policy(), PolicyId::RoundRobin);
    }
}
