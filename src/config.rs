//! Configuration for faasgate.
//!
//! The config file is JSON; every section and field is optional and falls
//! back to the documented default, so an empty file (or no file at all) boots
//! a working gateway. Sections mirror the dotted key space used by the wider
//! platform: `api.port`, `registry.area`, `mab.agent.interval`,
//! `storage.address`, ...

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::mab::reward::RewardConfig;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub api: ApiConfig,

    #[serde(default)]
    pub registry: RegistryConfig,

    #[serde(default)]
    pub mab: MabSection,

    /// Telemetry sink (InfluxDB).
    #[serde(default)]
    pub storage: StorageConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    /// Port the reverse proxy listens on.
    #[serde(default = "default_api_port")]
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryConfig {
    /// Base URL of the registry's HTTP API.
    #[serde(default = "default_registry_address")]
    pub address: String,

    /// Region whose cloud nodes this gateway balances over.
    #[serde(default = "default_registry_area")]
    pub area: String,

    /// TTL in seconds of this node's own registration lease.
    #[serde(default = "default_registry_ttl")]
    pub ttl: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MabSection {
    #[serde(default)]
    pub agent: AgentConfig,
}

/// Exploration strategy of the MAB agent.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum StrategyKind {
    #[default]
    #[serde(rename = "Epsilon-Greedy")]
    EpsilonGreedy,
    #[serde(rename = "UCB")]
    Ucb,
    #[serde(rename = "ResetUCB")]
    ResetUcb,
    #[serde(rename = "SWUCB")]
    SlidingWindowUcb,
    #[serde(rename = "UCB2")]
    Ucb2,
    #[serde(rename = "UCBTuned")]
    UcbTuned,
    #[serde(rename = "KL-UCB")]
    KlUcb,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Whether the MAB agent runs at all. When disabled the gateway keeps the
    /// default policy for its whole lifetime.
    #[serde(default)]
    pub enabled: bool,

    /// Seconds between MAB ticks.
    #[serde(default = "default_mab_interval")]
    pub interval: u64,

    #[serde(default)]
    pub strategy: StrategyKind,

    /// Exploration probability for Epsilon-Greedy.
    #[serde(default = "default_epsilon")]
    pub epsilon: f64,

    /// Exploration factor for the UCB family.
    #[serde(default = "default_exploration_factor")]
    pub explorationfactor: f64,

    #[serde(default)]
    pub swucb: SwucbConfig,

    #[serde(default)]
    pub rucb: RucbConfig,

    #[serde(default)]
    pub ucb2: Ucb2Config,

    #[serde(default)]
    pub klucb: KlucbConfig,

    /// Reward coefficients (all default to zero).
    #[serde(default)]
    pub reward: RewardConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SwucbConfig {
    #[serde(default = "default_swucb_windowsize")]
    pub windowsize: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RucbConfig {
    /// Updates between estimate resets; 0 disables the reset.
    #[serde(default)]
    pub resetinterval: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ucb2Config {
    #[serde(default = "default_ucb2_alpha")]
    pub alpha: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KlucbConfig {
    #[serde(default = "default_klucb_c")]
    pub c: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_storage_address")]
    pub address: String,

    #[serde(default = "default_storage_token")]
    pub token: String,

    #[serde(default = "default_storage_orgname")]
    pub orgname: String,
}

fn default_api_port() -> u16 {
    1323
}

fn default_registry_address() -> String {
    "http://localhost:2379".to_string()
}

fn default_registry_area() -> String {
    "ROME".to_string()
}

fn default_registry_ttl() -> u64 {
    30
}

fn default_mab_interval() -> u64 {
    300
}

fn default_epsilon() -> f64 {
    0.1
}

fn default_exploration_factor() -> f64 {
    0.05
}

fn default_swucb_windowsize() -> usize {
    10
}

fn default_ucb2_alpha() -> f64 {
    0.5
}

fn default_klucb_c() -> f64 {
    3.0
}

fn default_storage_address() -> String {
    "http://localhost:8086".to_string()
}

fn default_storage_token() -> String {
    "faasgate".to_string()
}

fn default_storage_orgname() -> String {
    "faasgate".to_string()
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            port: default_api_port(),
        }
    }
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            address: default_registry_address(),
            area: default_registry_area(),
            ttl: default_registry_ttl(),
        }
    }
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            interval: default_mab_interval(),
            strategy: StrategyKind::default(),
            epsilon: default_epsilon(),
            explorationfactor: default_exploration_factor(),
            swucb: SwucbConfig::default(),
            rucb: RucbConfig::default(),
            ucb2: Ucb2Config::default(),
            klucb: KlucbConfig::default(),
            reward: RewardConfig::default(),
        }
    }
}

impl Default for SwucbConfig {
    fn default() -> Self {
        Self {
            windowsize: default_swucb_windowsize(),
        }
    }
}

impl Default for RucbConfig {
    fn default() -> Self {
        Self { resetinterval: 0 }
    }
}

impl Default for Ucb2Config {
    fn default() -> Self {
        Self {
            alpha: default_ucb2_alpha(),
        }
    }
}

impl Default for KlucbConfig {
    fn default() -> Self {
        Self {
            c: default_klucb_c(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            address: default_storage_address(),
            token: default_storage_token(),
            orgname: default_storage_orgname(),
        }
    }
}

impl Config {
    /// Load configuration from a JSON file, or all defaults when no path is
    /// given.
    pub async fn load(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };

        let contents = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }
}
