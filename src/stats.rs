//! Cumulative invocation statistics.
//!
//! Two live instances exist inside the proxy: `new_stats` is updated on every
//! request, `old_stats` is the snapshot taken at the last MAB tick. Reward
//! calculation always works on the difference between the two.

use crate::types::{ExecutionReport, PolicyId, backend_key};
use std::collections::HashMap;
use url::Url;

/// Counter bundle for one load-balancing interval. All counters are
/// monotonically non-decreasing between MAB snapshots.
#[derive(Debug, Clone, PartialEq)]
pub struct Stats {
    /// The policy in force while these counters were collected.
    pub lb_policy: PolicyId,
    /// Requests routed to each backend.
    pub server_loads: HashMap<String, u64>,
    /// Requests dropped per backend.
    pub dropped_reqs: HashMap<String, u64>,
    pub arrivals: u64,
    pub completions: u64,
    pub violations: u64,
    pub drops: u64,
    /// Cumulative response time in seconds.
    pub resp_time: f64,
    /// Cumulative cloud cost.
    pub cost: f64,
    /// Cumulative raw utility.
    pub raw_utility: f64,
}

impl Stats {
    /// Fresh counters with both per-backend maps pre-seeded at zero for every
    /// known target, so load deltas cover idle backends too.
    pub fn new(lb_policy: PolicyId, targets: &[Url]) -> Self {
        let mut server_loads = HashMap::with_capacity(targets.len());
        let mut dropped_reqs = HashMap::with_capacity(targets.len());
        for target in targets {
            server_loads.insert(backend_key(target), 0);
            dropped_reqs.insert(backend_key(target), 0);
        }
        Self {
            lb_policy,
            server_loads,
            dropped_reqs,
            arrivals: 0,
            completions: 0,
            violations: 0,
            drops: 0,
            resp_time: 0.0,
            cost: 0.0,
            raw_utility: 0.0,
        }
    }

    /// Account one completed invocation.
    pub fn record_completion(&mut self, backend: &str, report: &ExecutionReport) {
        self.arrivals += 1;
        *self.server_loads.entry(backend.to_string()).or_insert(0) += 1;
        self.dropped_reqs.entry(backend.to_string()).or_insert(0);
        self.completions += 1;
        self.resp_time += report.response_time;
        self.cost += report.cost_cloud;
        self.raw_utility += report.utility;
        self.violations += report.violations;
    }

    /// Account one dropped invocation (upstream answered non-200).
    pub fn record_drop(&mut self, backend: &str) {
        self.arrivals += 1;
        *self.server_loads.entry(backend.to_string()).or_insert(0) += 1;
        self.drops += 1;
        *self.dropped_reqs.entry(backend.to_string()).or_insert(0) += 1;
    }

    /// Overwrite `self` with the contents of `other`, reusing the existing
    /// map allocations. Used to roll `new_stats` into `old_stats` on each
    /// MAB tick.
    pub fn copy_from(&mut self, other: &Stats) {
        self.lb_policy = other.lb_policy;
        self.arrivals = other.arrivals;
        self.completions = other.completions;
        self.violations = other.violations;
        self.drops = other.drops;
        self.resp_time = other.resp_time;
        self.cost = other.cost;
        self.raw_utility = other.raw_utility;

        self.server_loads.clear();
        self.server_loads
            .extend(other.server_loads.iter().map(|(k, v)| (k.clone(), *v)));
        self.dropped_reqs.clear();
        self.dropped_reqs
            .extend(other.dropped_reqs.iter().map(|(k, v)| (k.clone(), *v)));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn targets() -> Vec<Url> {
        vec![
            Url::parse("http://10.0.0.1:2001").unwrap(),
            Url::parse("http://10.0.0.2:2001").unwrap(),
        ]
    }

    #[test]
    fn new_stats_pre_seeds_backend_maps() {
        let stats = Stats::new(PolicyId::Random, &targets());
        assert_eq!(stats.server_loads.len(), 2);
        assert_eq!(stats.dropped_reqs.len(), 2);
        assert_eq!(stats.server_loads["http://10.0.0.1:2001"], 0);
    }

    #[test]
    fn arrivals_split_into_completions_and_drops() {
        let mut stats = Stats::new(PolicyId::Random, &targets());
        let report = ExecutionReport {
            response_time: 0.2,
            cost_cloud: 0.01,
            utility: 1.0,
            violations: 0,
        };
        stats.record_completion("http://10.0.0.1:2001", &report);
        stats.record_completion("http://10.0.0.1:2001", &report);
        stats.record_drop("http://10.0.0.2:2001");

        assert_eq!(stats.arrivals, 3);
        assert_eq!(stats.completions, 2);
        assert_eq!(stats.drops, 1);
        assert_eq!(stats.arrivals, stats.completions + stats.drops);
        assert_eq!(stats.server_loads["http://10.0.0.1:2001"], 2);
        assert_eq!(stats.server_loads["http://10.0.0.2:2001"], 1);
        assert_eq!(stats.dropped_reqs["http://10.0.0.2:2001"], 1);
        assert!((stats.resp_time - 0.4).abs() < 1e-12);
    }

    #[test]
    fn unknown_backend_gains_keys_in_both_maps() {
        let mut stats = Stats::new(PolicyId::Random, &[]);
        stats.record_completion("http://10.0.0.9:2001", &ExecutionReport::default());
        assert!(stats.server_loads.contains_key("http://10.0.0.9:2001"));
        assert!(stats.dropped_reqs.contains_key("http://10.0.0.9:2001"));
    }

    #[test]
    fn copy_from_replaces_counters_and_maps() {
        let mut new_stats = Stats::new(PolicyId::RoundRobin, &targets());
        new_stats.record_drop("http://10.0.0.1:2001");
        new_stats.record_completion("http://10.0.0.2:2001", &ExecutionReport::default());

        let mut old_stats = Stats::new(PolicyId::Random, &[]);
        old_stats.copy_from(&new_stats);
        assert_eq!(old_stats, new_stats);

        // A later update to new_stats must not leak into the snapshot.
        new_stats.record_drop("http://10.0.0.1:2001");
        assert_eq!(old_stats.drops, 1);
        assert_eq!(new_stats.drops, 2);
    }
}
