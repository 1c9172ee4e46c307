//! Load-balancing policies.
//!
//! A policy maps a function name to one backend URL. Policies read the
//! proxy's current [`TargetsInfo`] (targets plus cached status snapshots)
//! passed in by the caller — they never own proxy state — and guard their own
//! cursor/counter state with an internal lock, because request handlers call
//! [`LbPolicy::select_target`] concurrently under the proxy's *read* lock.
//!
//! Construction runs once per policy activation (at boot and on every MAB
//! switch) and performs no I/O: weight tables and hash rings are derived
//! from the cached snapshots.

mod const_hash;
mod mama;
mod random;
mod round_robin;
mod wrr;

pub use const_hash::ConstHashPolicy;
pub use mama::MamaPolicy;
pub use random::RandomPolicy;
pub use round_robin::RoundRobinPolicy;
pub use wrr::WrrPolicy;

use async_trait::async_trait;
use std::sync::Arc;
use url::Url;

use crate::registry::FunctionLookup;
use crate::types::{PolicyId, TargetsInfo};

/// Picks one backend for a function invocation, or `None` when the policy
/// has no usable target (the proxy then answers 503).
#[async_trait]
pub trait LbPolicy: Send + Sync {
    async fn select_target(&self, targets: &TargetsInfo, fun_name: &str) -> Option<Url>;
}

/// Instantiate the policy behind `id` against the current target view.
pub fn build_policy(
    id: PolicyId,
    targets: &TargetsInfo,
    functions: Arc<dyn FunctionLookup>,
) -> Box<dyn LbPolicy> {
    match id {
        PolicyId::Random => Box::new(RandomPolicy::new()),
        PolicyId::RoundRobin => Box::new(RoundRobinPolicy::new()),
        PolicyId::Mama => Box::new(MamaPolicy::new()),
        PolicyId::WrrMemory => Box::new(WrrPolicy::memory_weighted(targets)),
        PolicyId::WrrCost => Box::new(WrrPolicy::cost_weighted(targets)),
        PolicyId::ConstHash => Box::new(ConstHashPolicy::new(targets, functions)),
    }
}
