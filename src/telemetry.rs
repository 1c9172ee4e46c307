//! Per-tick MAB telemetry.
//!
//! Every strategy update emits one [`TelemetrySample`] describing what
//! happened between the last two snapshots: per-backend load and drop
//! deltas (plus cumulative totals), arrival/completion deltas, the interval's
//! average response time, cost and utility deltas, and the computed reward.
//!
//! Samples are appended to an InfluxDB v2 bucket as a single point per tick:
//! measurement `mab_agent_stats`, tag `new_data=new_data`, one string field
//! `json_data` carrying the serialized sample. Writes are best-effort; a sink
//! failure is logged and never fatal.

use chrono::{SecondsFormat, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, warn};

use crate::stats::Stats;

const WRITE_TIMEOUT: Duration = Duration::from_secs(5);
const MEASUREMENT: &str = "mab_agent_stats";
const BUCKET: &str = "stats";

/// One record per MAB tick.
#[derive(Debug, Clone, Serialize)]
pub struct TelemetrySample {
    #[serde(rename = "Time")]
    pub time: String,
    #[serde(rename = "Policy")]
    pub policy: String,
    #[serde(rename = "ServerLoads")]
    pub server_loads: Vec<u64>,
    #[serde(rename = "ServerLoadsCum")]
    pub server_loads_cum: Vec<u64>,
    #[serde(rename = "DroppedReqs")]
    pub dropped_reqs: Vec<u64>,
    #[serde(rename = "DroppedReqsCum")]
    pub dropped_reqs_cum: Vec<u64>,
    #[serde(rename = "Arrivals")]
    pub arrivals: u64,
    #[serde(rename = "Completions")]
    pub completions: u64,
    #[serde(rename = "AvgRespTime")]
    pub avg_resp_time: f64,
    #[serde(rename = "Cost")]
    pub cost: f64,
    #[serde(rename = "Utility")]
    pub utility: f64,
    #[serde(rename = "Reward")]
    pub reward: f64,
}

/// Build the sample for one tick from the two stats snapshots. Per-backend
/// vectors are ordered by sorted backend key so consecutive samples line up.
pub fn build_sample(new_stats: &Stats, old_stats: &Stats, time: String, reward: f64) -> TelemetrySample {
    let load_keys = sorted_keys(&new_stats.server_loads);
    let drop_keys = sorted_keys(&new_stats.dropped_reqs);

    let mut server_loads = Vec::with_capacity(load_keys.len());
    let mut server_loads_cum = Vec::with_capacity(load_keys.len());
    for key in &load_keys {
        let cum = new_stats.server_loads[*key];
        server_loads.push(cum - old_stats.server_loads.get(*key).copied().unwrap_or(0));
        server_loads_cum.push(cum);
    }

    let mut dropped_reqs = Vec::with_capacity(drop_keys.len());
    let mut dropped_reqs_cum = Vec::with_capacity(drop_keys.len());
    for key in &drop_keys {
        let cum = new_stats.dropped_reqs[*key];
        dropped_reqs.push(cum - old_stats.dropped_reqs.get(*key).copied().unwrap_or(0));
        dropped_reqs_cum.push(cum);
    }

    let completions = new_stats.completions - old_stats.completions;
    let avg_resp_time = if completions == 0 {
        0.0
    } else {
        (new_stats.resp_time - old_stats.resp_time) / completions as f64
    };

    TelemetrySample {
        time,
        policy: new_stats.lb_policy.name().to_string(),
        server_loads,
        server_loads_cum,
        dropped_reqs,
        dropped_reqs_cum,
        arrivals: new_stats.arrivals - old_stats.arrivals,
        completions,
        avg_resp_time,
        cost: new_stats.cost - old_stats.cost,
        utility: new_stats.raw_utility - old_stats.raw_utility,
        reward,
    }
}

fn sorted_keys(map: &HashMap<String, u64>) -> Vec<&String> {
    let mut keys: Vec<&String> = map.keys().collect();
    keys.sort();
    keys
}

struct Sink {
    http: reqwest::Client,
    write_url: String,
    token: String,
}

/// Append-only writer for the telemetry time-series sink.
#[derive(Clone)]
pub struct InfluxWriter {
    sink: Option<std::sync::Arc<Sink>>,
}

impl InfluxWriter {
    pub fn new(address: &str, token: &str, org: &str) -> Self {
        let write_url = format!(
            "{}/api/v2/write?org={}&bucket={}&precision=ns",
            address.trim_end_matches('/'),
            org,
            BUCKET,
        );
        Self {
            sink: Some(std::sync::Arc::new(Sink {
                http: reqwest::Client::new(),
                write_url,
                token: token.to_string(),
            })),
        }
    }

    /// A writer that drops every sample. Used by tests and by strategy
    /// simulations that have no sink to talk to.
    pub fn disabled() -> Self {
        Self { sink: None }
    }

    /// Derive this tick's sample from the two snapshots and append it.
    pub async fn record_tick(&self, new_stats: &Stats, old_stats: &Stats, reward: f64) {
        let time = Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true);
        let sample = build_sample(new_stats, old_stats, time, reward);
        self.write_sample(&sample).await;
    }

    pub async fn write_sample(&self, sample: &TelemetrySample) {
        let Some(sink) = &self.sink else {
            return;
        };

        let json = match serde_json::to_string(sample) {
            Ok(json) => json,
            Err(e) => {
                warn!(error = %e, "Unserializable telemetry sample");
                return;
            }
        };
        let line = format!(
            "{MEASUREMENT},new_data=new_data json_data=\"{}\" {}",
            escape_field_value(&json),
            Utc::now().timestamp_nanos_opt().unwrap_or_default(),
        );

        let result = sink
            .http
            .post(&sink.write_url)
            .timeout(WRITE_TIMEOUT)
            .header("Authorization", format!("Token {}", sink.token))
            .header("Content-Type", "text/plain; charset=utf-8")
            .body(line)
            .send()
            .await;

        match result {
            Ok(resp) if resp.status().is_success() => {
                debug!("Telemetry sample written");
            }
            Ok(resp) => {
                warn!(status = %resp.status(), "Telemetry sink rejected sample");
            }
            Err(e) => {
                warn!(error = %e, "Telemetry write failed");
            }
        }
    }
}

/// Escape a string for use as a line-protocol string field value.
fn escape_field_value(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}
