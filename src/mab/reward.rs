//! Reward calculation.
//!
//! The reward for one tick is a weighted sum of five terms, each a negated,
//! upper-bound-normalised quantity in `[-1, 0]`. The bounds are empirical;
//! a term that escapes its bound is logged but used as-is, never clamped.

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::stats::Stats;

/// As a coefficient of variation; upper bound determined empirically.
const MAX_LOAD_IMBALANCE: f64 = 3.0;
/// Max average response time; already normalised but tunable.
const MAX_RT: f64 = 1.0;
const MAX_COST: f64 = 5.0;
const MAX_UTILITY: f64 = 1000.0;
/// Max response-time violations per tick; upper bound determined empirically.
const MAX_VIOLATIONS: f64 = 10_000.0;

/// Coefficients weighting the five reward terms.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct RewardConfig {
    /// Load imbalance.
    #[serde(default)]
    pub alpha: f64,
    /// Response time.
    #[serde(default)]
    pub beta: f64,
    /// Cost.
    #[serde(default)]
    pub gamma: f64,
    /// Utility.
    #[serde(default)]
    pub delta: f64,
    /// Violations count.
    #[serde(default)]
    pub zeta: f64,
}

/// Scalar reward for the interval between two stats snapshots.
pub fn calculate_reward(config: &RewardConfig, new_stats: &Stats, old_stats: &Stats) -> f64 {
    config.alpha * load_imbalance(new_stats, old_stats)
        + config.beta * response_time(new_stats, old_stats)
        + config.gamma * cost(new_stats, old_stats)
        + config.delta * utility(new_stats, old_stats)
        + config.zeta * violations(new_stats, old_stats)
}

/// Coefficient of variation of the per-backend load deltas, negated and
/// normalised. Zero when there are no deltas or their mean is zero.
fn load_imbalance(new_stats: &Stats, old_stats: &Stats) -> f64 {
    let deltas: Vec<f64> = new_stats
        .server_loads
        .iter()
        .map(|(key, new_value)| {
            let old_value = old_stats.server_loads.get(key).copied().unwrap_or(0);
            (*new_value - old_value) as f64
        })
        .collect();
    if deltas.is_empty() {
        return 0.0;
    }

    let mean = deltas.iter().sum::<f64>() / deltas.len() as f64;
    if mean == 0.0 {
        return 0.0;
    }
    let variance = deltas.iter().map(|d| (d - mean) * (d - mean)).sum::<f64>() / deltas.len() as f64;
    let imbalance = variance.sqrt() / mean;

    if imbalance / MAX_LOAD_IMBALANCE > 1.0 {
        warn!(imbalance, "Load imbalance out of [0, 1] bounds");
    }
    -(imbalance / MAX_LOAD_IMBALANCE)
}

/// Negated, normalised average response time over the tick's completions.
fn response_time(new_stats: &Stats, old_stats: &Stats) -> f64 {
    let total_resp_time = new_stats.resp_time - old_stats.resp_time;
    let total_completions = new_stats.completions - old_stats.completions;
    if total_completions == 0 {
        return 0.0;
    }
    let avg_resp_time = total_resp_time / total_completions as f64;

    if avg_resp_time / MAX_RT > 1.0 {
        warn!(avg_resp_time, "Response time out of [0, 1] bounds");
    }
    -(avg_resp_time / MAX_RT)
}

fn cost(new_stats: &Stats, old_stats: &Stats) -> f64 {
    let current_cost = new_stats.cost - old_stats.cost;
    debug!(current_cost, "Tick cost");

    if current_cost / MAX_COST > 1.0 {
        warn!(current_cost, "Cost out of [0, 1] bounds");
    }
    -(current_cost / MAX_COST)
}

fn utility(new_stats: &Stats, old_stats: &Stats) -> f64 {
    let current_utility = new_stats.raw_utility - old_stats.raw_utility;

    if current_utility / MAX_UTILITY > 1.0 {
        warn!(current_utility, "Utility out of [0, 1] bounds");
    }
    -(1.0 - current_utility / MAX_UTILITY)
}

fn violations(new_stats: &Stats, old_stats: &Stats) -> f64 {
    let current_violations = (new_stats.violations - old_stats.violations) as f64;

    if current_violations / MAX_VIOLATIONS > 1.0 {
        warn!(current_violations, "Violations count out of [0, 1] bounds");
    }
    -(current_violations / MAX_VIOLATIONS)
}
