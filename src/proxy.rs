//! The load-balancing reverse proxy.
//!
//! All shared state — the target view, the active policy, and the two stats
//! instances — lives behind a single `RwLock`. Request handlers take the
//! read lock only to pick a backend, forward without holding any lock, then
//! take the write lock briefly to account the outcome. The target-refresh
//! ticker and the MAB agent take the write lock for their whole step, which
//! makes a request's arrival and completion counters atomic with respect to
//! every MAB snapshot.

use anyhow::{Context, Result};
use axum::Router;
use axum::body::Body;
use axum::extract::State;
use axum::http::{Request, Response, StatusCode, Uri};
use http_body_util::BodyExt;
use hyper_util::client::legacy::Client;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::rt::TokioExecutor;
use std::future::IntoFuture;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::{RwLock, watch};
use tracing::{error, info, warn};
use url::Url;

use crate::config::Config;
use crate::mab::{self, MabAgent};
use crate::policy::{LbPolicy, build_policy};
use crate::registry::{FunctionLookup, Registration, RegistryClient};
use crate::stats::Stats;
use crate::status::StatusProbe;
use crate::types::{ExecutionReport, PolicyId, TargetsInfo, backend_key};

const TARGET_REFRESH_INTERVAL: Duration = Duration::from_secs(30);
const SHUTDOWN_DEADLINE: Duration = Duration::from_secs(10);
const DEFAULT_POLICY: PolicyId = PolicyId::Random;

struct SharedState {
    targets: TargetsInfo,
    policy: Box<dyn LbPolicy>,
    policy_id: PolicyId,
    new_stats: Stats,
    old_stats: Stats,
}

/// The proxy: one long-lived instance owning every piece of shared state.
pub struct LbProxy {
    state: RwLock<SharedState>,
    client: Client<HttpConnector, Body>,
    functions: Arc<dyn FunctionLookup>,
}

impl LbProxy {
    /// Build a proxy over an initial target view, starting on the default
    /// (Random) policy.
    pub fn new(targets: TargetsInfo, functions: Arc<dyn FunctionLookup>) -> Arc<Self> {
        let policy = build_policy(DEFAULT_POLICY, &targets, Arc::clone(&functions));
        let new_stats = Stats::new(DEFAULT_POLICY, &targets.targets);
        let old_stats = Stats::new(DEFAULT_POLICY, &targets.targets);
        Arc::new(Self {
            state: RwLock::new(SharedState {
                targets,
                policy,
                policy_id: DEFAULT_POLICY,
                new_stats,
                old_stats,
            }),
            client: Client::builder(TokioExecutor::new()).build_http(),
            functions,
        })
    }

    /// The axum router serving this proxy. Every path is forwarded; only
    /// `/invoke/<function>` feeds the statistics.
    pub fn router(self: &Arc<Self>) -> Router {
        Router::new()
            .fallback(handle_request)
            .with_state(Arc::clone(self))
    }

    pub async fn active_policy(&self) -> PolicyId {
        self.state.read().await.policy_id
    }

    /// Swap in a specific policy, bypassing the MAB agent.
    pub async fn set_policy(&self, id: PolicyId) {
        let mut state = self.state.write().await;
        let state = &mut *state;
        state.policy = build_policy(id, &state.targets, Arc::clone(&self.functions));
        state.policy_id = id;
        state.new_stats.lb_policy = id;
        info!(policy = %id, "Policy set");
    }

    /// Replace the target view wholesale.
    pub async fn update_targets(&self, targets: TargetsInfo) {
        let mut state = self.state.write().await;
        state.targets = targets;
    }

    /// A copy of the live counters.
    pub async fn stats(&self) -> Stats {
        self.state.read().await.new_stats.clone()
    }

    /// One MAB step: feed the strategy the tick's stats, roll the snapshot,
    /// and apply the strategy's choice. Runs entirely under the write lock
    /// so request accounting can never straddle the snapshot.
    pub async fn mab_tick(&self, agent: &mut MabAgent) {
        let mut state = self.state.write().await;
        let SharedState {
            targets,
            policy,
            policy_id,
            new_stats,
            old_stats,
        } = &mut *state;

        agent.update(new_stats, old_stats).await;
        old_stats.copy_from(new_stats);

        let best = agent.select_policy();
        if best != *policy_id {
            info!(from = %policy_id, to = %best, "Switching load-balancing policy");
            *policy = build_policy(best, targets, Arc::clone(&self.functions));
            *policy_id = best;
            new_stats.lb_policy = best;
        }
    }

    /// Pick a backend for `fun_name` under the shared read lock.
    async fn select_backend(&self, fun_name: &str) -> Option<Url> {
        let state = self.state.read().await;
        state.policy.select_target(&state.targets, fun_name).await
    }
}

async fn handle_request(
    State(proxy): State<Arc<LbProxy>>,
    req: Request<Body>,
) -> Response<Body> {
    let fun_name = req
        .uri()
        .path()
        .strip_prefix("/invoke/")
        .map(str::to_string);

    let Some(backend) = proxy.select_backend(fun_name.as_deref().unwrap_or("")).await else {
        return error_response(StatusCode::SERVICE_UNAVAILABLE, "No backend available");
    };
    let backend = backend_key(&backend);

    match fun_name {
        Some(fun_name) => forward_invoke(&proxy, req, &backend, &fun_name).await,
        None => forward_passthrough(&proxy, req, &backend).await,
    }
}

/// Forward an `/invoke/<fn>` request, relay the response verbatim, and
/// account the outcome. A 200 carries an execution report that feeds the
/// response-time/cost/utility counters; anything else counts as a drop but
/// is still relayed.
async fn forward_invoke(
    proxy: &LbProxy,
    req: Request<Body>,
    backend: &str,
    fun_name: &str,
) -> Response<Body> {
    let resp = match forward(proxy, req, backend).await {
        Ok(resp) => resp,
        Err(e) => {
            error!(backend, function = fun_name, error = %e, "Forward failed");
            return error_response(StatusCode::BAD_GATEWAY, &format!("Backend error: {e}"));
        }
    };

    let (parts, body) = resp.into_parts();
    let bytes = match body.collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(e) => {
            error!(backend, function = fun_name, error = %e, "Upstream body read failed");
            return error_response(StatusCode::BAD_GATEWAY, &format!("Backend error: {e}"));
        }
    };

    if parts.status == StatusCode::OK {
        // A report that fails to decode is logged and counted with zeroed
        // metrics; it must not poison the proxy.
        let report: ExecutionReport = serde_json::from_slice(&bytes).unwrap_or_else(|e| {
            warn!(backend, function = fun_name, error = %e, "Undecodable execution report");
            ExecutionReport::default()
        });
        let mut state = proxy.state.write().await;
        state.new_stats.record_completion(backend, &report);
    } else {
        let mut state = proxy.state.write().await;
        state.new_stats.record_drop(backend);
    }

    Response::from_parts(parts, Body::from(bytes))
}

/// Forward any other path unchanged, streaming the response straight back.
async fn forward_passthrough(
    proxy: &LbProxy,
    req: Request<Body>,
    backend: &str,
) -> Response<Body> {
    match forward(proxy, req, backend).await {
        Ok(resp) => resp,
        Err(e) => {
            error!(backend, error = %e, "Forward failed");
            error_response(StatusCode::BAD_GATEWAY, &format!("Backend error: {e}"))
        }
    }
}

async fn forward(
    proxy: &LbProxy,
    mut req: Request<Body>,
    backend: &str,
) -> Result<Response<Body>, anyhow::Error> {
    let path_and_query = req
        .uri()
        .path_and_query()
        .map(|pq| pq.to_string())
        .unwrap_or_else(|| "/".to_string());

    let uri: Uri = format!("{backend}{path_and_query}")
        .parse()
        .context("Rewritten backend URI is invalid")?;
    *req.uri_mut() = uri;
    req.headers_mut().remove("host");

    let resp = proxy.client.request(req).await?;
    let (parts, body) = resp.into_parts();
    Ok(Response::from_parts(parts, Body::new(body)))
}

fn error_response(status: StatusCode, message: &str) -> Response<Body> {
    let body = serde_json::json!({
        "error": {
            "message": message,
            "type": "faasgate_error"
        }
    });

    Response::builder()
        .status(status)
        .header("Content-Type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

/// Boot the gateway: pull the initial target set from the registry, start the
/// refresh ticker and (if enabled) the MAB agent, and serve until SIGINT.
/// Blocks until shutdown completes.
pub async fn start_reverse_proxy(
    config: Config,
    registry: Arc<RegistryClient>,
    registration: Option<Registration>,
) -> Result<()> {
    let region = config.registry.area.clone();
    let targets = registry
        .list_backends(&region)
        .await
        .context("Cannot connect to registry to retrieve targets")?;
    info!(count = targets.len(), ?targets, "Initializing targets");

    let probe = StatusProbe::new();
    let statuses = probe.fetch_all(&targets).await;
    let targets_info = TargetsInfo::with_statuses(targets, statuses);

    let functions: Arc<dyn FunctionLookup> = Arc::clone(&registry) as Arc<dyn FunctionLookup>;
    let proxy = LbProxy::new(targets_info, functions);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    tokio::spawn(run_target_refresh(
        Arc::clone(&proxy),
        Arc::clone(&registry),
        region.clone(),
        probe,
        shutdown_rx.clone(),
    ));

    if config.mab.agent.enabled {
        info!("MAB agent enabled");
        let agent = MabAgent::from_config(&config.mab.agent, &config.storage);
        tokio::spawn(mab::run_agent(
            Arc::clone(&proxy),
            agent,
            Duration::from_secs(config.mab.agent.interval),
            shutdown_rx.clone(),
        ));
    } else {
        info!("MAB agent not enabled");
    }

    let listener = TcpListener::bind(("0.0.0.0", config.api.port))
        .await
        .with_context(|| format!("Failed to bind to port {}", config.api.port))?;
    info!(port = config.api.port, "Starting LbProxy server");

    let graceful = axum::serve(listener, proxy.router())
        .with_graceful_shutdown(shutdown_signal(registry, registration, shutdown_tx))
        .into_future();

    let mut deadline_rx = shutdown_rx.clone();
    tokio::select! {
        result = graceful => result.context("Server error")?,
        _ = async {
            let _ = deadline_rx.wait_for(|stop| *stop).await;
            tokio::time::sleep(SHUTDOWN_DEADLINE).await;
        } => {
            warn!("Shutdown deadline exceeded, aborting in-flight requests");
        }
    }

    info!("Shutdown complete");
    Ok(())
}

/// Wait for SIGINT, deregister from the registry so the gateway becomes
/// unreachable, then release the server and the tickers.
async fn shutdown_signal(
    registry: Arc<RegistryClient>,
    registration: Option<Registration>,
    shutdown_tx: watch::Sender<bool>,
) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Failed to install interrupt handler");
        return;
    }
    info!("Got interrupt signal, terminating");

    if let Some(registration) = &registration
        && let Err(e) = registry.deregister(registration).await
    {
        error!(error = %e, "Deregistration failed");
    }

    let _ = shutdown_tx.send(true);
}

/// Periodically re-read the target set from the registry and refresh the
/// cached status snapshots. The target list itself is swapped only when the
/// membership actually changed; statuses are refreshed either way.
async fn run_target_refresh(
    proxy: Arc<LbProxy>,
    registry: Arc<RegistryClient>,
    region: String,
    probe: StatusProbe,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut tick = tokio::time::interval_at(
        tokio::time::Instant::now() + TARGET_REFRESH_INTERVAL,
        TARGET_REFRESH_INTERVAL,
    );
    tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                info!("Target refresh stopping");
                return;
            }
            _ = tick.tick() => {}
        }

        let targets = match registry.list_backends(&region).await {
            Ok(targets) => targets,
            Err(e) => {
                warn!(error = %e, "Cannot retrieve targets from registry");
                continue;
            }
        };
        let statuses = probe.fetch_all(&targets).await;

        let mut state = proxy.state.write().await;
        if state.targets.same_targets(&targets) {
            // Membership unchanged: keep the stored order, realign statuses.
            let realigned = state
                .targets
                .targets
                .iter()
                .map(|stored| {
                    targets
                        .iter()
                        .position(|fresh| fresh == stored)
                        .and_then(|i| statuses[i].clone())
                })
                .collect();
            state.targets.statuses = realigned;
        } else {
            info!(?targets, "Targets updated");
            state.targets = TargetsInfo::with_statuses(targets, statuses);
        }
    }
}
