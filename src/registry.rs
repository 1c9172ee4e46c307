//! Read/write client for the service-discovery registry (etcd).
//!
//! The registry is an external key/value store reached through etcd's v3
//! JSON gateway (`/v3/kv/*`, `/v3/lease/*`). Three key families matter here:
//!
//! - `/registry/cloud/<region>/...` — one entry per cloud worker, value is a
//!   small JSON blob carrying at least `nodeAddress`;
//! - `/function/<name>` — function descriptors, read on demand by the
//!   consistent-hash policy;
//! - `/registry/lb/<region>/<url>` — this gateway's own registration,
//!   kept alive with a TTL lease heartbeat.

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as B64;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, info, warn};
use url::Url;

use crate::types::Function;

const FUNCTION_LOOKUP_TIMEOUT: Duration = Duration::from_secs(10);
const RANGE_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("registry request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("registry answered {0}")]
    Status(reqwest::StatusCode),

    #[error("malformed registry entry: {0}")]
    Parse(String),
}

/// Looks up function descriptors by name. The consistent-hash policy needs
/// this seam; tests substitute a fixed table.
#[async_trait]
pub trait FunctionLookup: Send + Sync {
    /// Descriptor stored at `/function/<name>`, or `None` when the key is
    /// absent or the lookup fails for any reason.
    async fn get_function(&self, name: &str) -> Option<Function>;
}

/// A live registration of this gateway in the registry.
#[derive(Debug, Clone)]
pub struct Registration {
    pub key: String,
    pub lease_id: i64,
}

pub struct RegistryClient {
    http: reqwest::Client,
    base: String,
}

#[derive(Debug, Deserialize)]
struct RangeResponse {
    #[serde(default)]
    kvs: Vec<KeyValue>,
}

#[derive(Debug, Deserialize)]
struct KeyValue {
    #[serde(default)]
    value: String,
}

#[derive(Debug, Deserialize)]
struct LeaseGrantResponse {
    #[serde(rename = "ID")]
    id: String,
}

impl RegistryClient {
    pub fn new(base: &str) -> Self {
        Self {
            http: reqwest::Client::new(),
            base: base.trim_end_matches('/').to_string(),
        }
    }

    fn cloud_prefix(region: &str) -> String {
        format!("/registry/cloud/{region}/")
    }

    fn lb_key(region: &str, node_url: &str) -> String {
        format!("/registry/lb/{region}/{node_url}")
    }

    /// The current set of cloud workers for `region`. A parse error on any
    /// individual entry fails the whole call; the caller retries at the next
    /// refresh tick.
    pub async fn list_backends(&self, region: &str) -> Result<Vec<Url>, RegistryError> {
        let prefix = Self::cloud_prefix(region);
        let body = serde_json::json!({
            "key": B64.encode(&prefix),
            "range_end": B64.encode(prefix_range_end(prefix.as_bytes())),
        });

        let resp = self
            .http
            .post(format!("{}/v3/kv/range", self.base))
            .timeout(RANGE_TIMEOUT)
            .json(&body)
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(RegistryError::Status(resp.status()));
        }
        let range: RangeResponse = resp.json().await?;

        let mut targets = Vec::with_capacity(range.kvs.len());
        for kv in &range.kvs {
            let raw = B64
                .decode(&kv.value)
                .map_err(|e| RegistryError::Parse(e.to_string()))?;
            let blob = String::from_utf8_lossy(&raw);
            targets.push(parse_node_blob(&blob)?);
        }
        debug!(region, count = targets.len(), "Listed cloud targets");
        Ok(targets)
    }

    /// Register this gateway's external URL under the load-balancer area,
    /// bound to a TTL lease.
    pub async fn register(
        &self,
        region: &str,
        node_url: &str,
        ttl: u64,
    ) -> Result<Registration, RegistryError> {
        let grant: LeaseGrantResponse = self
            .post_json(
                "/v3/lease/grant",
                &serde_json::json!({ "TTL": ttl.to_string() }),
            )
            .await?;
        let lease_id: i64 = grant
            .id
            .parse()
            .map_err(|_| RegistryError::Parse(format!("lease id {:?}", grant.id)))?;

        let key = Self::lb_key(region, node_url);
        let value = serde_json::json!({ "nodeAddress": node_url }).to_string();
        let _: serde_json::Value = self
            .post_json(
                "/v3/kv/put",
                &serde_json::json!({
                    "key": B64.encode(&key),
                    "value": B64.encode(&value),
                    "lease": grant.id,
                }),
            )
            .await?;

        info!(%key, lease_id, "Registered load balancer");
        Ok(Registration { key, lease_id })
    }

    /// Refresh the registration lease. Called periodically at half the TTL.
    pub async fn heartbeat(&self, registration: &Registration) -> Result<(), RegistryError> {
        let _: serde_json::Value = self
            .post_json(
                "/v3/lease/keepalive",
                &serde_json::json!({ "ID": registration.lease_id.to_string() }),
            )
            .await?;
        Ok(())
    }

    /// Remove the registration key and revoke its lease. The gateway should
    /// be unreachable once this returns.
    pub async fn deregister(&self, registration: &Registration) -> Result<(), RegistryError> {
        let _: serde_json::Value = self
            .post_json(
                "/v3/kv/deleterange",
                &serde_json::json!({ "key": B64.encode(&registration.key) }),
            )
            .await?;
        let _: serde_json::Value = self
            .post_json(
                "/v3/lease/revoke",
                &serde_json::json!({ "ID": registration.lease_id.to_string() }),
            )
            .await?;
        info!(key = %registration.key, "Deregistered load balancer");
        Ok(())
    }

    async fn post_json<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        body: &serde_json::Value,
    ) -> Result<T, RegistryError> {
        let resp = self
            .http
            .post(format!("{}{}", self.base, path))
            .timeout(RANGE_TIMEOUT)
            .json(body)
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(RegistryError::Status(resp.status()));
        }
        Ok(resp.json().await?)
    }
}

#[async_trait]
impl FunctionLookup for RegistryClient {
    async fn get_function(&self, name: &str) -> Option<Function> {
        let key = format!("/function/{name}");
        let body = serde_json::json!({ "key": B64.encode(&key) });

        let resp = self
            .http
            .post(format!("{}/v3/kv/range", self.base))
            .timeout(FUNCTION_LOOKUP_TIMEOUT)
            .json(&body)
            .send()
            .await
            .ok()?;
        if !resp.status().is_success() {
            return None;
        }
        let range: RangeResponse = resp.json().await.ok()?;
        let kv = range.kvs.first()?;
        let raw = B64.decode(&kv.value).ok()?;
        match serde_json::from_slice::<Function>(&raw) {
            Ok(function) => Some(function),
            Err(e) => {
                warn!(function = name, error = %e, "Malformed function descriptor");
                None
            }
        }
    }
}

/// Extract the node URL from one cloud-node registry value. Values can carry
/// non-JSON prefixes and suffixes, so only the outermost `{...}` is decoded.
fn parse_node_blob(blob: &str) -> Result<Url, RegistryError> {
    let start = blob
        .find('{')
        .ok_or_else(|| RegistryError::Parse(format!("no JSON object in {blob:?}")))?;
    let end = blob
        .rfind('}')
        .ok_or_else(|| RegistryError::Parse(format!("no JSON object in {blob:?}")))?;

    let fields: std::collections::HashMap<String, String> =
        serde_json::from_str(&blob[start..=end])
            .map_err(|e| RegistryError::Parse(e.to_string()))?;
    let address = fields
        .get("nodeAddress")
        .ok_or_else(|| RegistryError::Parse(format!("nodeAddress missing in {blob:?}")))?;

    Url::parse(address).map_err(|e| RegistryError::Parse(format!("{address:?}: {e}")))
}

/// End of the range covering every key under `prefix`: the prefix with its
/// last byte incremented.
fn prefix_range_end(prefix: &[u8]) -> Vec<u8> {
    let mut end = prefix.to_vec();
    while let Some(last) = end.last_mut() {
        if *last < 0xff {
            *last += 1;
            return end;
        }
        end.pop();
    }
    // All-0xff prefix: scan to the end of the keyspace.
    vec![0]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn node_blob_plain_json() {
        let url = parse_node_blob(r#"{"nodeAddress": "http://10.0.0.1:2001"}"#).unwrap();
        assert_eq!(url.as_str(), "http://10.0.0.1:2001/");
    }

    #[test]
    fn node_blob_with_surrounding_noise() {
        let url =
            parse_node_blob(r#"cloud/node-7 {"nodeAddress": "http://10.0.0.7:2001"} v3"#).unwrap();
        assert_eq!(url.host_str(), Some("10.0.0.7"));
        assert_eq!(url.port(), Some(2001));
    }

    #[test]
    fn node_blob_errors() {
        assert!(parse_node_blob("no json here").is_err());
        assert!(parse_node_blob(r#"{"somethingElse": "x"}"#).is_err());
        assert!(parse_node_blob(r#"{"nodeAddress": "not a url"}"#).is_err());
    }

    #[test]
    fn range_end_increments_last_byte() {
        assert_eq!(prefix_range_end(b"/registry/cloud/ROME/"), {
            let mut v = b"/registry/cloud/ROME/".to_vec();
            *v.last_mut().unwrap() += 1;
            v
        });
        assert_eq!(prefix_range_end(b"a\xff"), b"b".to_vec());
        assert_eq!(prefix_range_end(b"\xff"), vec![0]);
    }
}
