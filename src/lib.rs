//! # faasgate
//!
//! Adaptive load-balancing gateway for serverless function invocations.
//!
//! faasgate is an HTTP reverse proxy that spreads `/invoke/<function>`
//! requests across a changing fleet of worker nodes. Every request is routed
//! by the currently active *load-balancing policy*; in the background a
//! *Multi-Armed Bandit agent* scores the active policy against the
//! alternatives from aggregate reward signals and may swap it out.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                        faasgate                          │
//! │  ┌────────────────────────────────────────────────────┐  │
//! │  │ LbProxy (axum)                                     │  │
//! │  │ - /invoke/<fn>: policy → backend, forward, account │  │
//! │  │ - anything else: policy → backend, forward         │  │
//! │  └───────────────┬────────────────────────────────────┘  │
//! │                  │ shared state (one RwLock)             │
//! │  ┌───────────────┴───────────┐  ┌──────────────────────┐ │
//! │  │ target refresh (30 s)     │  │ MAB agent (tick)     │ │
//! │  │ registry → targets        │  │ reward → strategy    │ │
//! │  │ /status  → status cache   │  │ strategy → policy    │ │
//! │  └───────────────────────────┘  └──────────┬───────────┘ │
//! │                                            │ samples     │
//! │                                   ┌────────┴───────────┐ │
//! │                                   │ telemetry (Influx) │ │
//! │                                   └────────────────────┘ │
//! └──────────────────────────────────────────────────────────┘
//!      ▼                ▼                ▼
//!  [worker:2001]   [worker:2002]    [worker:2003]
//! ```

pub mod config;
pub mod mab;
pub mod policy;
pub mod proxy;
pub mod registry;
pub mod stats;
pub mod status;
pub mod telemetry;
pub mod types;

pub use config::Config;
pub use mab::{MabAgent, SelectionStrategy};
pub use policy::{LbPolicy, build_policy};
pub use proxy::LbProxy;
pub use registry::{FunctionLookup, Registration, RegistryClient};
pub use stats::Stats;
pub use telemetry::InfluxWriter;
pub use types::{ExecutionReport, Function, NodeStatus, PolicyId, TargetsInfo};
