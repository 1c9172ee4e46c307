//! faasgate - adaptive load balancer for serverless function invocations.
//!
//! Boots the reverse proxy for one region: registers this node in the
//! service-discovery registry, keeps the registration lease alive, and serves
//! until interrupted.

use anyhow::Result;
use clap::Parser;
use faasgate::{Config, RegistryClient, proxy};
use std::net::{IpAddr, Ipv4Addr};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "faasgate")]
#[command(about = "Adaptive load-balancing gateway for serverless functions")]
struct Args {
    /// Path to configuration file
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .init();

    info!("Starting faasgate");

    let config = Config::load(args.config.as_deref()).await?;
    info!(
        port = config.api.port,
        region = %config.registry.area,
        mab_enabled = config.mab.agent.enabled,
        "Configuration loaded"
    );

    let registry = Arc::new(RegistryClient::new(&config.registry.address));

    let external_url = format!("http://{}:{}", local_ip_address(), config.api.port);
    let registration = match registry
        .register(&config.registry.area, &external_url, config.registry.ttl)
        .await
    {
        Ok(registration) => {
            info!(%external_url, "Load balancer registered");
            Some(registration)
        }
        Err(e) => {
            warn!(error = %e, "Could not register to the registry");
            None
        }
    };

    if let Some(registration) = &registration {
        let registry = Arc::clone(&registry);
        let registration = registration.clone();
        let period = Duration::from_secs((config.registry.ttl / 2).max(1));
        tokio::spawn(async move {
            let mut tick = tokio::time::interval_at(
                tokio::time::Instant::now() + period,
                period,
            );
            tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tick.tick().await;
                if let Err(e) = registry.heartbeat(&registration).await {
                    warn!(error = %e, "Registration heartbeat failed");
                }
            }
        });
    }

    proxy::start_reverse_proxy(config, registry, registration).await
}

/// Best-effort detection of this host's outward-facing address. The socket
/// is never written to; connecting a UDP socket just resolves the route.
fn local_ip_address() -> IpAddr {
    std::net::UdpSocket::bind("0.0.0.0:0")
        .and_then(|socket| {
            socket.connect("8.8.8.8:80")?;
            socket.local_addr()
        })
        .map(|addr| addr.ip())
        .unwrap_or(IpAddr::V4(Ipv4Addr::LOCALHOST))
}
