//! Multi-Armed Bandit agent.
//!
//! The agent treats load-balancing policies as bandit arms. On every tick it
//! feeds its [`SelectionStrategy`] the stats gathered since the previous
//! tick; the strategy converts them to a scalar reward, updates its per-arm
//! estimates, emits one telemetry sample, and nominates the policy to run
//! next.

mod egreedy;
mod klucb;
mod reset_ucb;
pub mod reward;
mod swucb;
mod ucb;
mod ucb2;
mod ucb_tuned;

pub use egreedy::EpsilonGreedy;
pub use klucb::KlUcb;
pub use reset_ucb::ResetUcb;
pub use swucb::SlidingWindowUcb;
pub use ucb::Ucb;
pub use ucb2::Ucb2;
pub use ucb_tuned::UcbTuned;

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::info;

use crate::config::{AgentConfig, StorageConfig, StrategyKind};
use crate::proxy::LbProxy;
use crate::stats::Stats;
use crate::telemetry::InfluxWriter;
use crate::types::PolicyId;

/// One exploration/exploitation strategy over the policy arms.
#[async_trait]
pub trait SelectionStrategy: Send + Sync {
    /// Feed one observation: the stats delta between `old_stats` and
    /// `new_stats` is attributed to `new_stats.lb_policy`.
    async fn update(&mut self, new_stats: &Stats, old_stats: &Stats);

    /// The policy deemed best right now. Any policy that has never been
    /// played is returned first (explore before exploiting).
    fn select_policy(&mut self) -> PolicyId;
}

/// Per-arm play counts and running-mean rewards, shared by the strategies.
///
/// The mean is maintained with Welford's incremental formula, so after any
/// sequence of rewards it equals the arithmetic mean of that sequence to
/// floating-point precision.
#[derive(Debug, Default)]
pub(crate) struct PolicyEstimates {
    rewards: HashMap<PolicyId, f64>,
    plays: HashMap<PolicyId, u64>,
    total_plays: u64,
}

impl PolicyEstimates {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Record one reward. Returns the Welford deltas (before and after the
    /// mean moved) for strategies that track a second moment.
    pub(crate) fn record(&mut self, policy: PolicyId, reward: f64) -> (f64, f64) {
        let plays = self.plays.entry(policy).or_insert(0);
        *plays += 1;
        self.total_plays += 1;

        let mean = self.rewards.entry(policy).or_insert(0.0);
        let delta_before = reward - *mean;
        *mean += delta_before / *plays as f64;
        let delta_after = reward - *mean;
        (delta_before, delta_after)
    }

    /// Remove one previously recorded reward (sliding-window eviction).
    /// The inverse of [`record`](Self::record); a policy whose count drops
    /// to zero reads as unplayed with mean 0.
    pub(crate) fn unrecord(&mut self, policy: PolicyId, reward: f64) {
        let Some(plays) = self.plays.get_mut(&policy) else {
            return;
        };
        if *plays == 0 {
            return;
        }
        *plays -= 1;
        self.total_plays -= 1;

        let mean = self.rewards.entry(policy).or_insert(0.0);
        if *plays == 0 {
            *mean = 0.0;
        } else {
            *mean = (*mean * (*plays + 1) as f64 - reward) / *plays as f64;
        }
    }

    pub(crate) fn plays(&self, policy: PolicyId) -> u64 {
        self.plays.get(&policy).copied().unwrap_or(0)
    }

    /// Mean reward, or `None` while the policy is unplayed.
    pub(crate) fn reward(&self, policy: PolicyId) -> Option<f64> {
        if self.plays(policy) == 0 {
            None
        } else {
            self.rewards.get(&policy).copied()
        }
    }

    pub(crate) fn total_plays(&self) -> u64 {
        self.total_plays
    }

    pub(crate) fn clear(&mut self) {
        self.rewards.clear();
        self.plays.clear();
        self.total_plays = 0;
    }

    /// Classic UCB1 selection: the first unplayed policy, otherwise the arm
    /// maximising `mean + c·√(2 ln T / n)`.
    pub(crate) fn ucb1_select(&self, policies: &[PolicyId], exploration_factor: f64) -> PolicyId {
        let mut best_policy = policies[0];
        let mut best_value = f64::NEG_INFINITY;

        for &policy in policies {
            let Some(mean) = self.reward(policy) else {
                return policy;
            };
            let n = self.plays(policy) as f64;
            let bonus =
                exploration_factor * (2.0 * (self.total_plays as f64).ln() / n).sqrt();
            let value = mean + bonus;
            if value > best_value {
                best_policy = policy;
                best_value = value;
            }
        }
        best_policy
    }

    #[cfg(test)]
    pub(crate) fn plays_by_policy(&self) -> &HashMap<PolicyId, u64> {
        &self.plays
    }
}

/// Owns one strategy and drives it once per tick.
pub struct MabAgent {
    strategy: Box<dyn SelectionStrategy>,
}

impl MabAgent {
    pub fn new(strategy: Box<dyn SelectionStrategy>) -> Self {
        Self { strategy }
    }

    /// Build the agent from configuration: telemetry writer, policy arms and
    /// the configured exploration strategy.
    pub fn from_config(agent: &AgentConfig, storage: &StorageConfig) -> Self {
        let writer = InfluxWriter::new(&storage.address, &storage.token, &storage.orgname);
        let policies = PolicyId::all().to_vec();
        let reward_config = agent.reward;
        info!(?policies, "Policies known to the MAB agent");

        let strategy: Box<dyn SelectionStrategy> = match agent.strategy {
            StrategyKind::Ucb => {
                info!(
                    exploration_factor = agent.explorationfactor,
                    "Using UCB strategy"
                );
                Box::new(Ucb::new(
                    agent.explorationfactor,
                    policies,
                    reward_config,
                    writer,
                ))
            }
            StrategyKind::ResetUcb => {
                info!(
                    exploration_factor = agent.explorationfactor,
                    reset_interval = agent.rucb.resetinterval,
                    "Using ResetUCB strategy"
                );
                Box::new(ResetUcb::new(
                    agent.rucb.resetinterval,
                    agent.explorationfactor,
                    policies,
                    reward_config,
                    writer,
                ))
            }
            StrategyKind::SlidingWindowUcb => {
                info!(
                    exploration_factor = agent.explorationfactor,
                    window_size = agent.swucb.windowsize,
                    "Using SWUCB strategy"
                );
                Box::new(SlidingWindowUcb::new(
                    agent.swucb.windowsize,
                    agent.explorationfactor,
                    policies,
                    reward_config,
                    writer,
                ))
            }
            StrategyKind::Ucb2 => {
                info!(
                    exploration_factor = agent.explorationfactor,
                    alpha = agent.ucb2.alpha,
                    "Using UCB2 strategy"
                );
                Box::new(Ucb2::new(
                    agent.explorationfactor,
                    agent.ucb2.alpha,
                    policies,
                    reward_config,
                    writer,
                ))
            }
            StrategyKind::UcbTuned => {
                info!(
                    exploration_factor = agent.explorationfactor,
                    "Using UCBTuned strategy"
                );
                Box::new(UcbTuned::new(
                    agent.explorationfactor,
                    policies,
                    reward_config,
                    writer,
                ))
            }
            StrategyKind::KlUcb => {
                info!(c = agent.klucb.c, "Using KL-UCB strategy");
                Box::new(KlUcb::new(agent.klucb.c, policies, reward_config, writer))
            }
            StrategyKind::EpsilonGreedy => {
                info!(epsilon = agent.epsilon, "Using Epsilon-Greedy strategy");
                Box::new(EpsilonGreedy::new(
                    agent.epsilon,
                    policies,
                    reward_config,
                    writer,
                ))
            }
        };

        Self::new(strategy)
    }

    pub async fn update(&mut self, new_stats: &Stats, old_stats: &Stats) {
        self.strategy.update(new_stats, old_stats).await;
    }

    pub fn select_policy(&mut self) -> PolicyId {
        self.strategy.select_policy()
    }
}

/// Periodic agent loop: wake every `interval`, run one tick against the
/// proxy, exit on shutdown.
pub async fn run_agent(
    proxy: Arc<LbProxy>,
    mut agent: MabAgent,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut tick = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
    tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = tick.tick() => {
                info!("MAB agent tick");
                proxy.mab_tick(&mut agent).await;
            }
            _ = shutdown.changed() => {
                info!("MAB agent stopping");
                return;
            }
        }
    }
}
